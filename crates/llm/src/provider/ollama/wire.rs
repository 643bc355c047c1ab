use protocol::{Message, Request, ResponseFormat, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ollama `/api/chat` request body.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct OllamaRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OllamaTool>>,
}

impl OllamaRequest {
    pub fn from_request(request: &Request) -> Self {
        let options = OllamaOptions {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            num_predict: request.max_tokens,
            stop: request.stop.clone(),
        };

        let tools: Vec<OllamaTool> = request
            .qualified_tools()
            .into_iter()
            .map(|tool| OllamaTool {
                r#type: "function",
                function: OllamaFunction {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                },
            })
            .collect();

        Self {
            model: request.model.clone(),
            messages: request.messages.iter().map(OllamaMessage::from_message).collect(),
            stream: true,
            options: options.is_set().then_some(options),
            format: matches!(request.format, ResponseFormat::Json).then_some("json"),
            tools: (!tools.is_empty()).then_some(tools),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OllamaMessage {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

impl OllamaMessage {
    pub fn from_message(message: &Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        let calls: Vec<OllamaToolCall> = message
            .tool_calls
            .iter()
            .filter(|_| message.role == Role::Assistant)
            .map(|call| OllamaToolCall {
                function: OllamaFunctionCall {
                    name: call.function.name.clone(),
                    // Ollama exchanges arguments as a JSON object, not text.
                    arguments: serde_json::from_str(&call.function.arguments)
                        .unwrap_or_else(|_| Value::Object(Default::default())),
                },
            })
            .collect();

        Self {
            role,
            content: message.content.clone(),
            tool_calls: (!calls.is_empty()).then_some(calls),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl OllamaOptions {
    fn is_set(&self) -> bool {
        self.temperature.is_some()
            || self.top_p.is_some()
            || self.top_k.is_some()
            || self.num_predict.is_some()
            || !self.stop.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OllamaTool {
    pub r#type: &'static str,
    pub function: OllamaFunction,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OllamaFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OllamaToolCall {
    pub function: OllamaFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OllamaFunctionCall {
    pub name: String,
    pub arguments: Value,
}

/// One line of the newline-delimited streaming response.
#[derive(Debug, Deserialize)]
pub(crate) struct OllamaChunk {
    #[serde(default)]
    pub message: Option<OllamaChunkMessage>,
    #[serde(default)]
    pub done: bool,
    /// Inline error, e.g. for a model that is not pulled.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaChunkMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<OllamaChunkToolCall>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaChunkToolCall {
    pub function: OllamaChunkFunctionCall,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaChunkFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[cfg(test)]
mod tests {
    use protocol::ToolCall;

    use super::*;

    #[test]
    fn sampling_controls_nest_under_options() {
        let mut request = Request::new("llama3", vec![Message::user("hi")]);
        request.max_tokens = Some(64);
        request.stop = vec!["END".to_string()];

        let body = serde_json::to_value(OllamaRequest::from_request(&request)).unwrap();

        assert_eq!(body["options"]["num_predict"], 64);
        assert_eq!(body["options"]["stop"][0], "END");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn assistant_tool_calls_serialise_arguments_as_objects() {
        let message = Message {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: vec![ToolCall::new("call_0", "github_get_issue", r#"{"number":42}"#)],
            tool_plan: String::new(),
        };

        let body = serde_json::to_value(OllamaMessage::from_message(&message)).unwrap();
        assert_eq!(body["tool_calls"][0]["function"]["arguments"]["number"], 42);
    }

    #[test]
    fn chunks_parse_with_and_without_tool_calls() {
        let chunk: OllamaChunk = serde_json::from_str(
            r#"{"model":"llama3","message":{"role":"assistant","content":"Hi"},"done":false}"#,
        )
        .unwrap();
        assert_eq!(chunk.message.unwrap().content, "Hi");
        assert!(!chunk.done);

        let chunk: OllamaChunk = serde_json::from_str(
            r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"github_get_issue","arguments":{"number":42}}}]},"done":false}"#,
        )
        .unwrap();
        let calls = chunk.message.unwrap().tool_calls;
        assert_eq!(calls[0].function.name, "github_get_issue");
        assert_eq!(calls[0].function.arguments["number"], 42);

        let done: OllamaChunk = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(done.done);
    }
}
