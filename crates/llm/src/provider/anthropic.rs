mod input;
mod output;

use std::sync::Arc;

use async_trait::async_trait;
use config::ApiConfig;
use protocol::{Chunk, Message, Request, ToolCallStatus, ToolCaller};
use secrecy::{ExposeSecret, SecretString};

use self::input::{AnthropicMessage, AnthropicRequest};
use self::output::{AnthropicBlockDelta, AnthropicContentBlock, AnthropicStreamEvent};
use crate::error::LlmError;
use crate::provider::{SseStream, next_event, send_checked, sse_stream};
use crate::stream::{ChatStream, StreamError, TurnState, run_tool_calls};

const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic Messages API.
pub(crate) struct AnthropicStream {
    http: reqwest::Client,
    url: String,
    key: SecretString,
    api_name: String,
    vendor: AnthropicRequest,
    inner: Option<SseStream>,
    state: TurnState,
    tool_caller: Option<Arc<dyn ToolCaller>>,
    reopen: bool,
}

impl AnthropicStream {
    pub async fn open(
        http: reqwest::Client,
        api_name: &str,
        config: &ApiConfig,
        key: SecretString,
        request: Request,
    ) -> Result<Self, LlmError> {
        let base = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_ANTHROPIC_API_URL);

        let mut stream = Self {
            http,
            url: format!("{base}/messages"),
            key,
            api_name: api_name.to_string(),
            vendor: AnthropicRequest::from_request(&request),
            inner: None,
            state: TurnState::new(request.messages),
            tool_caller: request.tool_caller,
            reopen: false,
        };

        stream.inner = Some(stream.connect().await?);
        Ok(stream)
    }

    async fn connect(&self) -> Result<SseStream, LlmError> {
        let builder = self
            .http
            .post(&self.url)
            .header("x-api-key", self.key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.vendor);

        let response = send_checked(builder, &self.api_name, &self.vendor.model, false).await?;
        Ok(sse_stream(response))
    }

    fn end_turn(&mut self) {
        let assistant = self.state.finish_turn();
        self.vendor
            .messages
            .push(AnthropicMessage::from_message(&assistant));
        self.inner = None;
    }

    /// Apply one event. `Some(true)` means visible text, `Some(false)` a
    /// control event, `None` the end of the turn.
    fn apply(&mut self, event: AnthropicStreamEvent) -> Option<bool> {
        match event {
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block: AnthropicContentBlock::ToolUse { id, name },
            } => {
                let builder = self.state.builder_at(index);
                builder.id = id;
                builder.name = name;
                Some(false)
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicBlockDelta::TextDelta { text } if !text.is_empty() => {
                    self.state.push_text(&text);
                    Some(true)
                }
                AnthropicBlockDelta::InputJsonDelta { partial_json } => {
                    if self.state.has_builder(index) {
                        self.state.builder_at(index).arguments.push_str(&partial_json);
                    }
                    Some(false)
                }
                _ => Some(false),
            },
            AnthropicStreamEvent::MessageStop => None,
            // message_start, content_block_stop, message_delta, ping: no
            // visible content.
            _ => Some(false),
        }
    }
}

#[async_trait]
impl ChatStream for AnthropicStream {
    async fn next(&mut self) -> bool {
        if !self.state.is_live() {
            return false;
        }

        if self.inner.is_none() {
            if !self.reopen {
                return false;
            }
            self.reopen = false;

            match self.connect().await {
                Ok(inner) => self.inner = Some(inner),
                Err(err) => {
                    self.state.fail(err);
                    return false;
                }
            }
        }

        loop {
            let Some(inner) = self.inner.as_mut() else {
                return false;
            };

            let Some(event) = next_event(inner).await else {
                self.end_turn();
                return false;
            };

            let event: AnthropicStreamEvent = match serde_json::from_str(&event.data) {
                Ok(event) => event,
                Err(err) => {
                    log::warn!("could not parse Anthropic stream event: {err}");
                    if self.state.push_empty() {
                        return true;
                    }
                    self.inner = None;
                    return false;
                }
            };

            if let AnthropicStreamEvent::Error { error } = event {
                self.state.fail(LlmError::Stream(format!(
                    "{}: {}",
                    error.error_type, error.message
                )));
                self.inner = None;
                return false;
            }

            match self.apply(event) {
                Some(true) => return true,
                Some(false) => {
                    if self.state.push_empty() {
                        return true;
                    }
                    self.inner = None;
                    return false;
                }
                None => {
                    self.end_turn();
                    return false;
                }
            }
        }
    }

    fn current(&self) -> Result<Chunk, StreamError> {
        self.state.current()
    }

    async fn call_tools(&mut self) -> Vec<ToolCallStatus> {
        let calls = self.state.take_pending_calls();
        if calls.is_empty() {
            return Vec::new();
        }

        let (messages, statuses) = run_tool_calls(calls, self.tool_caller.as_ref()).await;

        for message in messages {
            self.vendor
                .messages
                .push(AnthropicMessage::from_message(&message));
            self.state.push_transcript(message);
        }

        self.reopen = true;
        statuses
    }

    fn messages(&self) -> Vec<Message> {
        self.state.transcript()
    }

    fn close(&mut self) {
        self.inner = None;
        self.reopen = false;
        self.state.close();
    }

    fn err(&self) -> Option<&LlmError> {
        self.state.error()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::http::header::CONTENT_TYPE;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use config::Protocol;
    use indoc::indoc;
    use protocol::{Role, ToolError};
    use serde_json::Value;
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Clone)]
    struct SseScript {
        bodies: Arc<Vec<&'static str>>,
        hits: Arc<AtomicUsize>,
        captured: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
    }

    async fn messages_route(
        State(script): State<SseScript>,
        headers: HeaderMap,
        body: Bytes,
    ) -> impl IntoResponse {
        let body: Value = serde_json::from_slice(&body).unwrap();
        script.captured.lock().unwrap().push((headers, body));

        let index = script.hits.fetch_add(1, Ordering::SeqCst);
        let sse = script.bodies[index.min(script.bodies.len() - 1)];

        ([(CONTENT_TYPE, "text/event-stream")], sse.to_string())
    }

    async fn serve(script: SseScript) -> String {
        let app = Router::new()
            .route("/v1/messages", post(messages_route))
            .with_state(script);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{address}/v1")
    }

    fn api_config(base_url: String) -> ApiConfig {
        ApiConfig {
            protocol: Protocol::Anthropic,
            base_url: Some(base_url),
            api_key: None,
            api_key_env: None,
            api_key_cmd: None,
            api_version: None,
            azure_ad: false,
            user: None,
            models: BTreeMap::new(),
        }
    }

    struct EchoCaller;

    #[async_trait]
    impl ToolCaller for EchoCaller {
        async fn call(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
            Ok(format!("ran {name} with {arguments}"))
        }
    }

    const TOOL_TURN: &str = indoc! {r#"
        event: message_start
        data: {"type":"message_start","message":{"id":"msg_1","role":"assistant","content":[],"usage":{"input_tokens":10,"output_tokens":0}}}

        event: content_block_start
        data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}

        event: content_block_delta
        data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Let me check."}}

        event: content_block_stop
        data: {"type":"content_block_stop","index":0}

        event: content_block_start
        data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"github_get_issue","input":{}}}

        event: content_block_delta
        data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"number\""}}

        event: content_block_delta
        data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":":42}"}}

        event: content_block_stop
        data: {"type":"content_block_stop","index":1}

        event: message_delta
        data: {"type":"message_delta","delta":{"stop_reason":"tool_use"}}

        event: message_stop
        data: {"type":"message_stop"}

    "#};

    const FINAL_TURN: &str = indoc! {r#"
        event: message_start
        data: {"type":"message_start","message":{"id":"msg_2","role":"assistant","content":[],"usage":{"input_tokens":20,"output_tokens":0}}}

        event: content_block_start
        data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}

        event: content_block_delta
        data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Issue 42 wants a faster parser."}}

        event: message_delta
        data: {"type":"message_delta","delta":{"stop_reason":"end_turn"}}

        event: message_stop
        data: {"type":"message_stop"}

    "#};

    async fn drain(stream: &mut AnthropicStream) -> String {
        let mut text = String::new();
        while stream.next().await {
            match stream.current() {
                Ok(chunk) => text.push_str(&chunk.content),
                Err(StreamError::NoContent) => continue,
                Err(err) => unreachable!("stream broke: {err}"),
            }
        }
        text
    }

    #[tokio::test]
    async fn tool_turn_accumulates_streamed_arguments() {
        let script = SseScript {
            bodies: Arc::new(vec![TOOL_TURN, FINAL_TURN]),
            hits: Arc::new(AtomicUsize::new(0)),
            captured: Arc::new(Mutex::new(Vec::new())),
        };
        let base = serve(script.clone()).await;

        let mut request = Request::new(
            "claude-sonnet-4-0",
            vec![
                Message::system("be terse"),
                Message::user("look at issue 42"),
            ],
        );
        request.tool_caller = Some(Arc::new(EchoCaller));

        let mut stream = AnthropicStream::open(
            reqwest::Client::new(),
            "anthropic",
            &api_config(base),
            SecretString::from("sk-ant-test"),
            request,
        )
        .await
        .unwrap();

        let text = drain(&mut stream).await;
        assert_eq!(text, "Let me check.");

        let statuses = stream.call_tools().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].name, "github_get_issue");

        let text = drain(&mut stream).await;
        assert_eq!(text, "Issue 42 wants a faster parser.");
        assert!(stream.call_tools().await.is_empty());

        let messages = stream.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].tool_calls[0].id, "toolu_1");
        assert_eq!(messages[2].tool_calls[0].function.arguments, "{\"number\":42}");
        assert_eq!(messages[3].role, Role::Tool);
        assert_eq!(messages[4].content, "Issue 42 wants a faster parser.");

        let captured = script.captured.lock().unwrap();
        assert_eq!(captured.len(), 2);

        let (headers, first) = &captured[0];
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant-test");
        assert_eq!(headers.get("anthropic-version").unwrap(), "2023-06-01");
        // System messages never appear in the messages array.
        assert_eq!(first["system"], "be terse");
        assert_eq!(first["messages"].as_array().unwrap().len(), 1);

        // The resumed request carries the tool_use and tool_result blocks.
        let (_, second) = &captured[1];
        let resumed = second["messages"].as_array().unwrap();
        assert_eq!(resumed[1]["content"][1]["type"], "tool_use");
        assert_eq!(resumed[2]["role"], "user");
        assert_eq!(resumed[2]["content"][0]["type"], "tool_result");
        assert_eq!(resumed[2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[tokio::test]
    async fn error_events_surface_as_stream_errors() {
        let script = SseScript {
            bodies: Arc::new(vec![indoc! {r#"
                event: error
                data: {"type":"error","error":{"type":"overloaded_error","message":"busy"}}

            "#}]),
            hits: Arc::new(AtomicUsize::new(0)),
            captured: Arc::new(Mutex::new(Vec::new())),
        };
        let base = serve(script.clone()).await;

        let request = Request::new("claude-sonnet-4-0", vec![Message::user("hi")]);
        let mut stream = AnthropicStream::open(
            reqwest::Client::new(),
            "anthropic",
            &api_config(base),
            SecretString::from("sk-ant-test"),
            request,
        )
        .await
        .unwrap();

        assert!(!stream.next().await);
        let err = stream.err().unwrap();
        assert!(err.to_string().contains("overloaded_error"));
    }
}
