mod input;
mod output;

use std::sync::Arc;

use async_trait::async_trait;
use config::{ApiConfig, Protocol};
use protocol::{Chunk, Message, Request, ToolCallStatus, ToolCaller};
use secrecy::{ExposeSecret, SecretString};

use self::input::{OpenAiMessage, OpenAiRequest};
use self::output::OpenAiStreamChunk;
use crate::error::LlmError;
use crate::provider::{SseStream, next_event, send_checked, sse_stream};
use crate::stream::{ChatStream, StreamError, TurnState, run_tool_calls};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_COPILOT_API_URL: &str = "https://api.githubcopilot.com";
const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";

enum Auth {
    Bearer(SecretString),
    /// Azure's `api-key` header, unless Azure-AD auth was requested.
    AzureKey(SecretString),
}

/// Adapter for OpenAI-compatible `chat/completions` streaming, covering the
/// `openai`, `azure` and `copilot` protocols.
pub(crate) struct OpenAiStream {
    http: reqwest::Client,
    url: String,
    auth: Auth,
    api_name: String,
    vendor: OpenAiRequest,
    inner: Option<SseStream>,
    state: TurnState,
    tool_caller: Option<Arc<dyn ToolCaller>>,
    reopen: bool,
}

impl std::fmt::Debug for OpenAiStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiStream")
            .field("url", &self.url)
            .field("api_name", &self.api_name)
            .field("vendor", &self.vendor)
            .finish_non_exhaustive()
    }
}

impl OpenAiStream {
    pub async fn open(
        http: reqwest::Client,
        api_name: &str,
        config: &ApiConfig,
        key: SecretString,
        request: Request,
    ) -> Result<Self, LlmError> {
        let (url, auth) = endpoint(api_name, config, &request.model, key)?;

        let mut stream = Self {
            http,
            url,
            auth,
            api_name: api_name.to_string(),
            vendor: OpenAiRequest::from_request(&request),
            inner: None,
            state: TurnState::new(request.messages),
            tool_caller: request.tool_caller,
            reopen: false,
        };

        stream.inner = Some(stream.connect().await?);
        Ok(stream)
    }

    async fn connect(&self) -> Result<SseStream, LlmError> {
        let builder = self.http.post(&self.url).json(&self.vendor);
        let builder = match &self.auth {
            Auth::Bearer(key) => builder.bearer_auth(key.expose_secret()),
            Auth::AzureKey(key) => builder.header("api-key", key.expose_secret()),
        };

        let response = send_checked(builder, &self.api_name, &self.vendor.model, true).await?;
        Ok(sse_stream(response))
    }

    /// Fold the accumulated turn into the transcript and mirror the
    /// assistant message into the vendor request for a possible resume.
    fn end_turn(&mut self) {
        let assistant = self.state.finish_turn();
        self.vendor.messages.push(OpenAiMessage::from_message(&assistant));
        self.inner = None;
    }

    /// Apply one parsed frame. Returns `true` when it carried visible text.
    fn apply(&mut self, chunk: OpenAiStreamChunk) -> bool {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return false;
        };

        let mut visible = false;

        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            self.state.push_text(&content);
            visible = true;
        }

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let builder = self.state.builder_at(delta.index);

            if let Some(id) = delta.id
                && !id.is_empty()
            {
                builder.id = id;
            }

            if let Some(function) = delta.function {
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

        visible
    }
}

#[async_trait]
impl ChatStream for OpenAiStream {
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

            if event.data == "[DONE]" {
                self.end_turn();
                return false;
            }

            let chunk: OpenAiStreamChunk = match serde_json::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(err) => {
                    log::warn!("could not parse OpenAI stream chunk: {err}");
                    if self.state.push_empty() {
                        return true;
                    }
                    self.inner = None;
                    return false;
                }
            };

            if self.apply(chunk) {
                return true;
            }

            if self.state.push_empty() {
                return true;
            }

            self.inner = None;
            return false;
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
            self.vendor.messages.push(OpenAiMessage::from_message(&message));
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

fn endpoint(
    api_name: &str,
    config: &ApiConfig,
    model: &str,
    key: SecretString,
) -> Result<(String, Auth), LlmError> {
    match config.protocol {
        Protocol::Openai => {
            let base = config.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_API_URL);
            Ok((format!("{base}/chat/completions"), Auth::Bearer(key)))
        }
        Protocol::Copilot => {
            let base = config.base_url.as_deref().unwrap_or(DEFAULT_COPILOT_API_URL);
            Ok((format!("{base}/chat/completions"), Auth::Bearer(key)))
        }
        Protocol::Azure => {
            let base = config.base_url.as_deref().ok_or_else(|| {
                LlmError::Config(config::ConfigError::MissingKey {
                    api: api_name.to_string(),
                    hint: format!("apis.{api_name}.base-url must point at the Azure resource"),
                })
            })?;
            let version = config.api_version.as_deref().unwrap_or(DEFAULT_AZURE_API_VERSION);
            let url =
                format!("{base}/openai/deployments/{model}/chat/completions?api-version={version}");

            let auth = if config.azure_ad {
                Auth::Bearer(key)
            } else {
                Auth::AzureKey(key)
            };

            Ok((url, auth))
        }
        _ => Err(LlmError::BadRequest(format!(
            "api '{api_name}' is not OpenAI-compatible"
        ))),
    }
}
