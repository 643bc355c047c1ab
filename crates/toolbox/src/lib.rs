//! MCP tool gateway.
//!
//! Enumerates the configured tool servers, lists their tools concurrently,
//! and routes invocations back to the right server by qualified name. Every
//! server is a child process speaking the MCP stdio framing; a fresh process
//! is spawned per operation and shut down on every exit path.

mod gateway;

pub use gateway::{GatewayError, ToolGateway, split_qualified_name};
