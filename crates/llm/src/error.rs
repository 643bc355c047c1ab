use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

/// Provider errors, classified the way the retry loop needs them.
///
/// The display string doubles as the one-sentence reason shown to the user
/// when the error is surfaced.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The upstream does not know the requested model.
    #[error("missing model '{model}'")]
    MissingModel { model: String, detail: String },

    /// The upstream rejected the request shape.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The upstream rejected the credential.
    #[error("invalid api key for '{0}'")]
    InvalidKey(String),

    /// The upstream asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A non-OpenAI upstream failed to serve the model.
    #[error("could not load the model: {0}")]
    ModelLoad(String),

    /// The prompt does not fit the model's context window. Recoverable by
    /// trimming unless the user insisted on `--no-limit`.
    #[error("context length exceeded: {0}")]
    ContextLengthExceeded(String),

    /// The request never reached the upstream.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Any other upstream status.
    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    /// The stream broke mid-turn, or the upstream sent an error event.
    #[error("stream failed: {0}")]
    Stream(String),

    /// A misconfiguration detected before any request was made.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl LlmError {
    /// Map an upstream HTTP status into a classified error.
    ///
    /// `openai_protocol` matters for 500s: OpenAI's are transient, other
    /// vendors report a failed model load.
    pub fn from_status(status: u16, body: String, api: &str, model: &str, openai_protocol: bool) -> Self {
        match status {
            401 => LlmError::InvalidKey(api.to_string()),
            404 => LlmError::MissingModel {
                model: model.to_string(),
                detail: body,
            },
            429 => LlmError::RateLimited(body),
            400 if context_overage(&body).is_some() => LlmError::ContextLengthExceeded(body),
            400 => LlmError::BadRequest(body),
            500 if !openai_protocol => LlmError::ModelLoad(body),
            _ => LlmError::Provider {
                status,
                message: body,
            },
        }
    }

    /// Whether the retry loop may try again without further intervention.
    /// Missing models and context overflow have their own recovery paths and
    /// are not "plainly retryable".
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited(_)
            | LlmError::Connection(_)
            | LlmError::Provider { .. }
            | LlmError::Stream(_) => true,
            LlmError::MissingModel { .. }
            | LlmError::BadRequest(_)
            | LlmError::InvalidKey(_)
            | LlmError::ModelLoad(_)
            | LlmError::ContextLengthExceeded(_)
            | LlmError::Config(_) => false,
        }
    }
}

/// Parse an upstream context-length complaint of the shape "maximum context
/// length is M tokens, however your messages resulted in L tokens" into
/// `(maximum, got)`. Vendors vary the punctuation and casing, not the shape.
pub fn context_overage(message: &str) -> Option<(u64, u64)> {
    // Compiled per call; this only runs on 400 responses.
    let re = regex::Regex::new(
        r"(?is)maximum context length is\s+(\d+)\s+tokens.*?(\d+)\s+tokens",
    )
    .ok()?;

    let captures = re.captures(message)?;
    let max = captures.get(1)?.as_str().parse().ok()?;
    let got = captures.get(2)?.as_str().parse().ok()?;

    Some((max, got))
}
