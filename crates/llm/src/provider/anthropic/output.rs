use serde::Deserialize;

/// Anthropic streaming event, one per SSE frame.
///
/// Event flow for a turn: `message_start`, then per content block a
/// `content_block_start` / `content_block_delta`* / `content_block_stop`
/// run, then `message_delta` with the stop reason and `message_stop`.
/// `ping` frames keep the connection alive.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicStreamEvent {
    MessageStart {
        #[allow(dead_code)]
        message: serde_json::Value,
    },
    ContentBlockStart {
        index: usize,
        content_block: AnthropicContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: AnthropicBlockDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    MessageDelta {
        #[allow(dead_code)]
        delta: AnthropicMessageDeltaData,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicStreamError,
    },
}

/// Metadata for a block opening: text blocks start empty, tool-use blocks
/// carry the call id and tool name up front.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicContentBlock {
    Text {
        #[allow(dead_code)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    /// Forward compatibility with block kinds this adapter does not render.
    #[serde(other)]
    Other,
}

/// Incremental update to an open content block.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicBlockDelta {
    /// Text fragment to append to the current text block.
    TextDelta { text: String },
    /// Partial JSON for the current tool-use block's arguments.
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicMessageDeltaData {
    #[serde(default)]
    #[allow(dead_code)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicStreamError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}
