mod input;
mod output;

use async_trait::async_trait;
use config::ApiConfig;
use protocol::{Chunk, Message, Request, ToolCallStatus};
use secrecy::{ExposeSecret, SecretString};

use self::input::GoogleRequest;
use self::output::GoogleStreamChunk;
use crate::error::LlmError;
use crate::provider::{SseStream, next_event, send_checked, sse_stream};
use crate::stream::{ChatStream, StreamError, TurnState};

const DEFAULT_GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com";

/// Adapter for Google's `streamGenerateContent` endpoint.
///
/// Capability gap: the vendor API supports neither tool calling nor, in this
/// adapter, vision payloads. Requests carrying tools are refused before this
/// adapter is reached, so `call_tools` always reports an empty turn.
pub(crate) struct GoogleStream {
    inner: Option<SseStream>,
    state: TurnState,
}

impl GoogleStream {
    pub async fn open(
        http: reqwest::Client,
        api_name: &str,
        config: &ApiConfig,
        key: SecretString,
        request: Request,
    ) -> Result<Self, LlmError> {
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_GOOGLE_API_URL);
        // Model and key both travel in the URL on this API.
        let url = format!(
            "{base}/v1beta/models/{model}:streamGenerateContent?alt=sse&key={key}",
            model = request.model,
            key = key.expose_secret(),
        );

        let vendor = GoogleRequest::from_request(&request);
        let builder = http.post(url).json(&vendor);
        let response = send_checked(builder, api_name, &request.model, false).await?;

        Ok(Self {
            inner: Some(sse_stream(response)),
            state: TurnState::new(request.messages),
        })
    }
}

#[async_trait]
impl ChatStream for GoogleStream {
    async fn next(&mut self) -> bool {
        if !self.state.is_live() {
            return false;
        }

        let Some(inner) = self.inner.as_mut() else {
            return false;
        };

        let Some(event) = next_event(inner).await else {
            self.state.finish_turn();
            self.inner = None;
            return false;
        };

        let chunk: GoogleStreamChunk = match serde_json::from_str(&event.data) {
            Ok(chunk) => chunk,
            Err(err) => {
                log::warn!("could not parse Google stream chunk: {err}");
                return self.state.push_empty();
            }
        };

        match chunk.text() {
            Some(text) => {
                self.state.push_text(&text);
                true
            }
            None => self.state.push_empty(),
        }
    }

    fn current(&self) -> Result<Chunk, StreamError> {
        self.state.current()
    }

    async fn call_tools(&mut self) -> Vec<ToolCallStatus> {
        // No tool calling on this protocol; the turn is always final.
        Vec::new()
    }

    fn messages(&self) -> Vec<Message> {
        self.state.transcript()
    }

    fn close(&mut self) {
        self.inner = None;
        self.state.close();
    }

    fn err(&self) -> Option<&LlmError> {
        self.state.error()
    }
}
