mod wire;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use config::ApiConfig;
use futures::{Stream, StreamExt};
use protocol::{Chunk, Message, Request, ToolCallStatus, ToolCaller};

use self::wire::{OllamaChunk, OllamaMessage, OllamaRequest};
use crate::error::LlmError;
use crate::provider::send_checked;
use crate::stream::{ChatStream, StreamError, TurnState, run_tool_calls};

const DEFAULT_OLLAMA_API_URL: &str = "http://localhost:11434";

type ByteChunks =
    Pin<Box<dyn Stream<Item = std::result::Result<Vec<u8>, reqwest::Error>> + Send + Sync>>;

/// Line reader over a chunked response body: Ollama streams one JSON object
/// per line rather than SSE frames.
struct NdjsonStream {
    bytes: ByteChunks,
    buffer: Vec<u8>,
    ended: bool,
}

impl NdjsonStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            bytes: Box::pin(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map(|bytes| bytes.to_vec())),
            ),
            buffer: Vec::new(),
            ended: false,
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&byte| byte == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line).trim().to_string();

                if line.is_empty() {
                    continue;
                }
                return Some(line);
            }

            if self.ended {
                if self.buffer.is_empty() {
                    return None;
                }

                let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
                self.buffer.clear();
                return (!line.is_empty()).then_some(line);
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    log::debug!("NDJSON stream ended: {err}");
                    self.ended = true;
                }
                None => self.ended = true,
            }
        }
    }
}

/// Adapter for Ollama's `/api/chat` streaming endpoint. Unauthenticated and
/// local by default; tool calls arrive whole rather than as deltas.
pub(crate) struct OllamaStream {
    http: reqwest::Client,
    url: String,
    api_name: String,
    vendor: OllamaRequest,
    inner: Option<NdjsonStream>,
    state: TurnState,
    tool_caller: Option<Arc<dyn ToolCaller>>,
    reopen: bool,
    /// Ollama does not assign call ids; they are minted per turn.
    calls_this_turn: usize,
}

impl OllamaStream {
    pub async fn open(
        http: reqwest::Client,
        api_name: &str,
        config: &ApiConfig,
        request: Request,
    ) -> Result<Self, LlmError> {
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_OLLAMA_API_URL);

        let mut stream = Self {
            http,
            url: format!("{base}/api/chat"),
            api_name: api_name.to_string(),
            vendor: OllamaRequest::from_request(&request),
            inner: None,
            state: TurnState::new(request.messages),
            tool_caller: request.tool_caller,
            reopen: false,
            calls_this_turn: 0,
        };

        stream.inner = Some(stream.connect().await?);
        Ok(stream)
    }

    async fn connect(&self) -> Result<NdjsonStream, LlmError> {
        let builder = self.http.post(&self.url).json(&self.vendor);
        let response = send_checked(builder, &self.api_name, &self.vendor.model, false).await?;
        Ok(NdjsonStream::new(response))
    }

    fn end_turn(&mut self) {
        let assistant = self.state.finish_turn();
        self.vendor
            .messages
            .push(OllamaMessage::from_message(&assistant));
        self.inner = None;
        self.calls_this_turn = 0;
    }

    fn apply(&mut self, chunk: OllamaChunk) -> Option<bool> {
        if chunk.done {
            return None;
        }

        let Some(message) = chunk.message else {
            return Some(false);
        };

        for call in message.tool_calls {
            let index = self.calls_this_turn;
            self.calls_this_turn += 1;

            let builder = self.state.builder_at(index);
            builder.id = format!("call_{index}");
            builder.name = call.function.name;
            builder.arguments = call.function.arguments.to_string();
        }

        if message.content.is_empty() {
            Some(false)
        } else {
            self.state.push_text(&message.content);
            Some(true)
        }
    }
}

#[async_trait]
impl ChatStream for OllamaStream {
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

            let Some(line) = inner.next_line().await else {
                self.end_turn();
                return false;
            };

            let chunk: OllamaChunk = match serde_json::from_str(&line) {
                Ok(chunk) => chunk,
                Err(err) => {
                    log::warn!("could not parse Ollama stream line: {err}");
                    if self.state.push_empty() {
                        return true;
                    }
                    self.inner = None;
                    return false;
                }
            };

            if let Some(error) = chunk.error {
                self.state.fail(LlmError::Stream(error));
                self.inner = None;
                return false;
            }

            match self.apply(chunk) {
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
                .push(OllamaMessage::from_message(&message));
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
    use axum::response::IntoResponse;
    use axum::routing::post;
    use config::Protocol;
    use indoc::indoc;
    use protocol::{Role, ToolError};
    use serde_json::Value;
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Clone)]
    struct NdjsonScript {
        bodies: Arc<Vec<&'static str>>,
        hits: Arc<AtomicUsize>,
        captured: Arc<Mutex<Vec<Value>>>,
    }

    async fn chat(State(script): State<NdjsonScript>, body: Bytes) -> impl IntoResponse {
        let body: Value = serde_json::from_slice(&body).unwrap();
        script.captured.lock().unwrap().push(body);

        let index = script.hits.fetch_add(1, Ordering::SeqCst);
        script.bodies[index.min(script.bodies.len() - 1)].to_string()
    }

    async fn serve(script: NdjsonScript) -> String {
        let app = Router::new().route("/api/chat", post(chat)).with_state(script);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{address}")
    }

    fn api_config(base_url: String) -> ApiConfig {
        ApiConfig {
            protocol: Protocol::Ollama,
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
        {"model":"llama3","message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"github_get_issue","arguments":{"number":42}}}]},"done":false}
        {"model":"llama3","message":{"role":"assistant","content":""},"done":true}
    "#};

    const FINAL_TURN: &str = indoc! {r#"
        {"model":"llama3","message":{"role":"assistant","content":"It wants "},"done":false}
        {"model":"llama3","message":{"role":"assistant","content":"a faster parser."},"done":false}
        {"model":"llama3","message":{"role":"assistant","content":""},"done":true}
    "#};

    async fn drain(stream: &mut OllamaStream) -> String {
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
    async fn ndjson_turns_stream_and_loop_over_tools() {
        let script = NdjsonScript {
            bodies: Arc::new(vec![TOOL_TURN, FINAL_TURN]),
            hits: Arc::new(AtomicUsize::new(0)),
            captured: Arc::new(Mutex::new(Vec::new())),
        };
        let base = serve(script.clone()).await;

        let mut request = Request::new("llama3", vec![Message::user("look at issue 42")]);
        request.tool_caller = Some(Arc::new(EchoCaller));

        let mut stream = OllamaStream::open(
            reqwest::Client::new(),
            "localhost",
            &api_config(base),
            request,
        )
        .await
        .unwrap();

        let text = drain(&mut stream).await;
        assert_eq!(text, "");

        let statuses = stream.call_tools().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].name, "github_get_issue");

        let text = drain(&mut stream).await;
        assert_eq!(text, "It wants a faster parser.");
        assert!(stream.call_tools().await.is_empty());

        let messages = stream.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].tool_calls[0].id, "call_0");
        assert_eq!(
            messages[1].tool_calls[0].function.arguments,
            r#"{"number":42}"#
        );
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[3].content, "It wants a faster parser.");

        let captured = script.captured.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[1]["messages"][2]["role"], "tool");
    }

    #[tokio::test]
    async fn inline_errors_surface_as_stream_errors() {
        let script = NdjsonScript {
            bodies: Arc::new(vec![r#"{"error":"model 'missing' not found"}"#]),
            hits: Arc::new(AtomicUsize::new(0)),
            captured: Arc::new(Mutex::new(Vec::new())),
        };
        let base = serve(script.clone()).await;

        let request = Request::new("missing", vec![Message::user("hi")]);
        let mut stream = OllamaStream::open(
            reqwest::Client::new(),
            "localhost",
            &api_config(base),
            request,
        )
        .await
        .unwrap();

        assert!(!stream.next().await);
        assert!(stream.err().unwrap().to_string().contains("not found"));
    }
}
