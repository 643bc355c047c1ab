mod input;
mod output;

use std::sync::Arc;

use async_trait::async_trait;
use config::ApiConfig;
use protocol::{Chunk, Message, Request, ToolCallStatus, ToolCaller};
use secrecy::{ExposeSecret, SecretString};

use self::input::{CohereMessage, CohereRequest};
use self::output::CohereStreamEvent;
use crate::error::LlmError;
use crate::provider::{SseStream, next_event, send_checked, sse_stream};
use crate::stream::{ChatStream, StreamError, TurnState, run_tool_calls};

const DEFAULT_COHERE_API_URL: &str = "https://api.cohere.com";

/// Adapter for Cohere's `v2/chat` streaming endpoint.
pub(crate) struct CohereStream {
    http: reqwest::Client,
    url: String,
    key: SecretString,
    api_name: String,
    vendor: CohereRequest,
    inner: Option<SseStream>,
    state: TurnState,
    tool_caller: Option<Arc<dyn ToolCaller>>,
    reopen: bool,
}

impl CohereStream {
    pub async fn open(
        http: reqwest::Client,
        api_name: &str,
        config: &ApiConfig,
        key: SecretString,
        request: Request,
    ) -> Result<Self, LlmError> {
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_COHERE_API_URL);

        let mut stream = Self {
            http,
            url: format!("{base}/v2/chat"),
            key,
            api_name: api_name.to_string(),
            vendor: CohereRequest::from_request(&request),
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
            .bearer_auth(self.key.expose_secret())
            .json(&self.vendor);

        let response = send_checked(builder, &self.api_name, &self.vendor.model, false).await?;
        Ok(sse_stream(response))
    }

    fn end_turn(&mut self) {
        let assistant = self.state.finish_turn();
        self.vendor
            .messages
            .push(CohereMessage::from_message(&assistant));
        self.inner = None;
    }

    /// Apply one event. `Some(true)` means visible text, `Some(false)` a
    /// control event, `None` the end of the turn.
    fn apply(&mut self, event: CohereStreamEvent) -> Option<bool> {
        match event {
            CohereStreamEvent::ContentDelta { delta, .. } => {
                let text = delta
                    .message
                    .and_then(|message| message.content)
                    .and_then(|content| content.text)
                    .unwrap_or_default();

                if text.is_empty() {
                    Some(false)
                } else {
                    self.state.push_text(&text);
                    Some(true)
                }
            }
            CohereStreamEvent::ToolPlanDelta { delta } => {
                if let Some(plan) = delta.message.and_then(|message| message.tool_plan) {
                    self.state.push_tool_plan(&plan);
                }
                Some(false)
            }
            CohereStreamEvent::ToolCallStart { index, delta }
            | CohereStreamEvent::ToolCallDelta { index, delta } => {
                if let Some(call) = delta.message.and_then(|message| message.tool_calls) {
                    let builder = self.state.builder_at(index);

                    if let Some(id) = call.id
                        && !id.is_empty()
                    {
                        builder.id = id;
                    }

                    if let Some(function) = call.function {
                        if let Some(name) = function.name
                            && !name.is_empty()
                        {
                            builder.name = name;
                        }
                        if let Some(arguments) = function.arguments {
                            builder.arguments.push_str(&arguments);
                        }
                    }
                }
                Some(false)
            }
            CohereStreamEvent::MessageEnd { .. } => None,
            _ => Some(false),
        }
    }
}

#[async_trait]
impl ChatStream for CohereStream {
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

            if event.event == "error" {
                self.state.fail(LlmError::Stream(event.data));
                self.inner = None;
                return false;
            }

            let event: CohereStreamEvent = match serde_json::from_str(&event.data) {
                Ok(event) => event,
                Err(err) => {
                    log::warn!("could not parse Cohere stream event: {err}");
                    if self.state.push_empty() {
                        return true;
                    }
                    self.inner = None;
                    return false;
                }
            };

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
                .push(CohereMessage::from_message(&message));
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
        captured: Arc<Mutex<Vec<Value>>>,
    }

    async fn chat(State(script): State<SseScript>, body: Bytes) -> impl IntoResponse {
        let body: Value = serde_json::from_slice(&body).unwrap();
        script.captured.lock().unwrap().push(body);

        let index = script.hits.fetch_add(1, Ordering::SeqCst);
        let sse = script.bodies[index.min(script.bodies.len() - 1)];

        ([(CONTENT_TYPE, "text/event-stream")], sse.to_string())
    }

    async fn serve(script: SseScript) -> String {
        let app = Router::new().route("/v2/chat", post(chat)).with_state(script);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{address}")
    }

    fn api_config(base_url: String) -> ApiConfig {
        ApiConfig {
            protocol: Protocol::Cohere,
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
        data: {"type":"message-start","id":"run_1"}

        data: {"type":"tool-plan-delta","delta":{"message":{"tool_plan":"I will fetch "}}}

        data: {"type":"tool-plan-delta","delta":{"message":{"tool_plan":"the issue."}}}

        data: {"type":"tool-call-start","index":0,"delta":{"message":{"tool_calls":{"id":"t1","type":"function","function":{"name":"github_get_issue","arguments":""}}}}}

        data: {"type":"tool-call-delta","index":0,"delta":{"message":{"tool_calls":{"function":{"arguments":"{\"number\":42}"}}}}}

        data: {"type":"tool-call-end","index":0}

        data: {"type":"message-end","delta":{"finish_reason":"TOOL_CALL"}}

    "#};

    const FINAL_TURN: &str = indoc! {r#"
        data: {"type":"message-start","id":"run_2"}

        data: {"type":"content-start","index":0}

        data: {"type":"content-delta","index":0,"delta":{"message":{"content":{"text":"A faster parser, please."}}}}

        data: {"type":"content-end","index":0}

        data: {"type":"message-end","delta":{"finish_reason":"COMPLETE"}}

    "#};

    async fn drain(stream: &mut CohereStream) -> String {
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
    async fn tool_plan_is_preserved_but_never_rendered() {
        let script = SseScript {
            bodies: Arc::new(vec![TOOL_TURN, FINAL_TURN]),
            hits: Arc::new(AtomicUsize::new(0)),
            captured: Arc::new(Mutex::new(Vec::new())),
        };
        let base = serve(script.clone()).await;

        let mut request = Request::new("command-r-plus", vec![Message::user("look at issue 42")]);
        request.tool_caller = Some(Arc::new(EchoCaller));

        let mut stream = CohereStream::open(
            reqwest::Client::new(),
            "cohere",
            &api_config(base),
            SecretString::from("co-test"),
            request,
        )
        .await
        .unwrap();

        // The tool-plan text must not surface as chunks.
        let text = drain(&mut stream).await;
        assert_eq!(text, "");

        let statuses = stream.call_tools().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].name, "github_get_issue");

        let text = drain(&mut stream).await;
        assert_eq!(text, "A faster parser, please.");
        assert!(stream.call_tools().await.is_empty());

        let messages = stream.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].tool_plan, "I will fetch the issue.");
        assert_eq!(messages[1].tool_calls[0].function.arguments, "{\"number\":42}");
        assert_eq!(messages[2].role, Role::Tool);

        // The resumed request carries the plan back to the vendor.
        let captured = script.captured.lock().unwrap();
        let resumed = &captured[1]["messages"];
        assert_eq!(resumed[1]["tool_plan"], "I will fetch the issue.");
        assert_eq!(resumed[2]["role"], "tool");
        assert_eq!(resumed[2]["tool_call_id"], "t1");
    }
}
