//! Retry loop around opening a stream: classify, back off, recover.

use std::time::Duration;

use protocol::{Message, Request, Role};

use crate::Client;
use crate::error::{LlmError, context_overage};
use crate::stream::ChatStream;

/// Knobs for the retry loop, sourced from flags and settings.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// `--no-limit`: a context overflow is fatal instead of trimmed.
    pub no_limit: bool,
    /// Characters removed per token of overage when trimming.
    pub avg_chars_per_token: usize,
    /// Model swapped in when the upstream reports the requested one missing.
    pub fallback_model: Option<String>,
}

impl RetryPolicy {
    fn backoff(attempt: u32) -> Duration {
        Duration::from_millis(100) * 2u32.saturating_pow(attempt.min(16))
    }
}

/// Open a stream, retrying per the §classification table: swap in the
/// fallback model on 404, trim the prompt on context overflow, back off on
/// transient failures, and surface everything else.
pub async fn open_with_retries(
    client: &Client,
    mut request: Request,
    policy: &RetryPolicy,
) -> Result<Box<dyn ChatStream>, LlmError> {
    let mut fallback = policy.fallback_model.clone();
    let mut attempt = 0u32;

    loop {
        let err = match client.request(request.clone()).await {
            Ok(stream) => return Ok(stream),
            Err(err) => err,
        };

        if attempt >= policy.max_retries {
            return Err(err);
        }

        match &err {
            LlmError::MissingModel { model, .. } => match fallback.take() {
                Some(next) => {
                    log::warn!("model '{model}' is missing upstream, falling back to '{next}'");
                    request.model = next;
                }
                None => return Err(err),
            },
            LlmError::ContextLengthExceeded(message) => {
                if policy.no_limit {
                    return Err(err);
                }

                match context_overage(message) {
                    Some((max, got)) if got > max => {
                        let cut = (got - max) as usize * policy.avg_chars_per_token;
                        log::debug!("trimming {cut} characters off the prompt and retrying");
                        trim_prompt(&mut request.messages, cut);
                    }
                    // Unparseable overage: retry unchanged; the attempt
                    // counter bounds the loop.
                    _ => log::debug!("could not parse the context overage, retrying as-is"),
                }
            }
            err if err.is_retryable() => {
                log::debug!("retryable provider error: {err}");
            }
            _ => return Err(err),
        }

        tokio::time::sleep(RetryPolicy::backoff(attempt)).await;
        attempt += 1;
    }
}

/// Cut `chars` characters off the end of the last user prompt, respecting
/// character boundaries.
fn trim_prompt(messages: &mut [Message], chars: usize) {
    let Some(prompt) = messages
        .iter_mut()
        .rev()
        .find(|message| message.role == Role::User)
    else {
        return;
    };

    let keep = prompt.content.chars().count().saturating_sub(chars);
    prompt.content = prompt.content.chars().take(keep).collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_100ms() {
        assert_eq!(RetryPolicy::backoff(0), Duration::from_millis(100));
        assert_eq!(RetryPolicy::backoff(1), Duration::from_millis(200));
        assert_eq!(RetryPolicy::backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn trim_cuts_from_the_end_of_the_last_user_prompt() {
        let mut messages = vec![
            Message::system("be brief"),
            Message::user("0123456789"),
        ];

        // maximum 3 tokens, got 10, one char per token: cut 7, keep 3.
        let (max, got) = context_overage(
            "maximum context length is 3 tokens. However, your messages resulted in 10 tokens",
        )
        .unwrap();
        trim_prompt(&mut messages, (got - max) as usize);

        assert_eq!(messages[1].content, "012");
        assert_eq!(messages[0].content, "be brief");
    }

    #[test]
    fn trim_is_char_boundary_safe() {
        let mut messages = vec![Message::user("héllo wörld")];
        trim_prompt(&mut messages, 6);
        assert_eq!(messages[0].content, "héllo");
    }

    #[test]
    fn overlong_trims_empty_the_prompt() {
        let mut messages = vec![Message::user("short")];
        trim_prompt(&mut messages, 50);
        assert_eq!(messages[0].content, "");
    }
}
