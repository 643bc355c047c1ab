//! Protocol-neutral value types shared by every provider adapter and the
//! conversation orchestrator.
//!
//! No adapter-private type ever crosses this boundary: adapters translate
//! their vendor wire formats into [`Message`], [`ToolCall`] and [`Chunk`],
//! and the store persists `Vec<Message>` through the [`codec`] module so the
//! on-disk format is independent of any vendor schema.

mod codec;
mod message;
mod request;

pub use codec::{CodecError, decode_messages, encode_messages};
pub use message::{FunctionCall, Message, Role, ToolCall};
pub use request::{
    Chunk, Request, ResponseFormat, ToolCallStatus, ToolCaller, ToolDescriptor, ToolError,
};
