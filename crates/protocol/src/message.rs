use serde::{Deserialize, Serialize};

/// Conversational role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the conversation.
    System,
    /// Input from the human driving the session.
    User,
    /// Output generated by the model.
    Assistant,
    /// Output of a tool invocation, fed back to the model.
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a conversation transcript.
///
/// For `role = Tool`, `content` holds the tool's output and `tool_calls` has
/// exactly one entry referencing the originating call. The assistant message
/// that emitted a call must precede, in order, the tool message answering it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Function invocations the model emitted in this turn, in emission
    /// order. Empty for anything but assistant turns and tool results.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Cohere's streamed tool-planning text. Preserved for the resumed turn
    /// but never rendered.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_plan: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_plan: String::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A tool-result turn answering `call`. `is_error` marks the content as
    /// an error message rather than tool output.
    pub fn tool_result(mut call: ToolCall, content: impl Into<String>, is_error: bool) -> Self {
        call.is_error = is_error;
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: vec![call],
            tool_plan: String::new(),
        }
    }
}

/// A function invocation emitted by the model.
///
/// The id is an opaque vendor string, unique within a turn; it correlates the
/// assistant-emitted call with the tool response in the resumed turn and is
/// stored verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
    /// Set on the copy embedded in a tool-result message when the invocation
    /// failed and the message content carries the error text.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
            is_error: false,
        }
    }
}

/// The callable half of a [`ToolCall`]: a qualified tool name plus the raw
/// text of a JSON argument object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}
