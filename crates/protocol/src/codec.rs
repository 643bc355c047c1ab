//! Self-describing binary encoding for stored transcripts.
//!
//! Transcripts are written as CBOR. Blobs written before tool-call support
//! hold plain `{role, content}` records; decoding falls back to that layout
//! and fills in empty tool calls.

use serde::{Deserialize, Serialize};

use crate::message::{Message, Role};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("could not encode messages: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("could not decode messages: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}

/// Pre-tool-call message layout.
#[derive(Serialize, Deserialize)]
struct LegacyMessage {
    role: Role,
    content: String,
}

pub fn encode_messages(messages: &[Message]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ciborium::into_writer(messages, &mut out)?;
    Ok(out)
}

pub fn decode_messages(bytes: &[u8]) -> Result<Vec<Message>, CodecError> {
    match ciborium::from_reader::<Vec<Message>, _>(bytes) {
        Ok(messages) => Ok(messages),
        Err(current_err) => {
            let legacy: Vec<LegacyMessage> = match ciborium::from_reader(bytes) {
                Ok(legacy) => legacy,
                // The original failure is the more useful diagnostic.
                Err(_) => return Err(current_err.into()),
            };

            Ok(legacy
                .into_iter()
                .map(|m| Message::new(m.role, m.content))
                .collect())
        }
    }
}
