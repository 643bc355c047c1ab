//! Streaming LLM provider adapters behind one cursor-shaped contract.
//!
//! A [`Client`] is built for one configured api; [`Client::request`] selects
//! the adapter for the api's protocol and opens a [`ChatStream`]. Callers
//! drive `next()`/`current()` until the turn ends, run `call_tools()`, and
//! loop while tools keep being called. No vendor type leaks past this
//! crate's boundary; everything crossing it is a `protocol` type.

mod error;
mod provider;
mod retry;
mod stream;

use config::{ApiConfig, Protocol};
pub use error::{LlmError, Result, context_overage};
use protocol::Request;
pub use retry::{RetryPolicy, open_with_retries};
use secrecy::SecretString;
pub use stream::{ChatStream, StreamError};

/// A configured provider endpoint, ready to open streams.
pub struct Client {
    http: reqwest::Client,
    api_name: String,
    config: ApiConfig,
    key: SecretString,
}

impl Client {
    /// Build a client for one api entry. The key has already been resolved
    /// by the caller (literal, environment, command, or credential cache).
    pub fn new(
        api_name: impl Into<String>,
        config: ApiConfig,
        key: SecretString,
        http_proxy: Option<&str>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();

        if let Some(proxy) = http_proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|err| LlmError::Connection(format!("invalid http proxy: {err}")))?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|err| LlmError::Connection(format!("could not build http client: {err}")))?;

        Ok(Self {
            http,
            api_name: api_name.into(),
            config,
            key,
        })
    }

    pub fn api_name(&self) -> &str {
        &self.api_name
    }

    /// Begin a turn: translate the request for the api's protocol and open
    /// the underlying stream.
    pub async fn request(&self, request: Request) -> Result<Box<dyn ChatStream>> {
        match self.config.protocol {
            Protocol::Openai | Protocol::Azure | Protocol::Copilot => {
                let stream = provider::openai::OpenAiStream::open(
                    self.http.clone(),
                    &self.api_name,
                    &self.config,
                    self.key.clone(),
                    request,
                )
                .await?;
                Ok(Box::new(stream))
            }
            Protocol::Anthropic => {
                let stream = provider::anthropic::AnthropicStream::open(
                    self.http.clone(),
                    &self.api_name,
                    &self.config,
                    self.key.clone(),
                    request,
                )
                .await?;
                Ok(Box::new(stream))
            }
            Protocol::Google => {
                // Capability gap: the vendor API has no tool calling; refuse
                // instead of silently dropping the tools.
                if !request.tools.is_empty() {
                    return Err(LlmError::BadRequest(format!(
                        "api '{}' uses the google protocol, which does not support tool calling; \
                         disable MCP servers for this api",
                        self.api_name
                    )));
                }

                let stream = provider::google::GoogleStream::open(
                    self.http.clone(),
                    &self.api_name,
                    &self.config,
                    self.key.clone(),
                    request,
                )
                .await?;
                Ok(Box::new(stream))
            }
            Protocol::Cohere => {
                let stream = provider::cohere::CohereStream::open(
                    self.http.clone(),
                    &self.api_name,
                    &self.config,
                    self.key.clone(),
                    request,
                )
                .await?;
                Ok(Box::new(stream))
            }
            Protocol::Ollama => {
                let stream = provider::ollama::OllamaStream::open(
                    self.http.clone(),
                    &self.api_name,
                    &self.config,
                    request,
                )
                .await?;
                Ok(Box::new(stream))
            }
        }
    }

}
