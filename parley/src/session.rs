//! The conversation orchestrator: resolve read and write ids, assemble the
//! prompt, drive the stream/tool loop, and persist the transcript.

use std::io::{IsTerminal, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use config::{Protocol, Settings};
use llm::{Client, RetryPolicy, StreamError, open_with_retries};
use protocol::{Message, Request, ResponseFormat, Role};
use secrecy::{ExposeSecret, SecretString};
use store::{ConversationRow, ExpiringCache, Store, new_conversation_id};
use toolbox::ToolGateway;

use crate::args::Args;

const DEFAULT_FORMAT_TEXT: &str =
    "Format the response as markdown without enclosing backticks.";

/// Lifetime of a cached Copilot bearer token.
const COPILOT_TOKEN_TTL_SECS: i64 = 25 * 60;

/// Where the new transcript is written, and where history comes from.
struct Plan {
    write_id: String,
    /// Title fixed by the user or an existing row; otherwise derived from
    /// the prompt at save time.
    title: Option<String>,
    /// Conversation hydrated into the prompt, if any.
    read: Option<ConversationRow>,
}

pub async fn run(
    args: &Args,
    settings: &Settings,
    store: Option<&Store>,
    cache_root: &Path,
) -> anyhow::Result<()> {
    let stdin = read_stdin()?;
    let prefix = args.prefix.join(" ");

    if prefix.trim().is_empty() && stdin.as_deref().unwrap_or("").trim().is_empty() {
        if args.continue_last || args.continue_ref.is_some() {
            bail!("--continue needs a prompt; there is nothing to send");
        }
        bail!("missing prompt; pass one as arguments or pipe it on stdin");
    }

    let plan = resolve_plan(args, store)?;

    let (api_name, api) = settings.api(args.api.as_deref())?;
    let model = args
        .model
        .clone()
        .or_else(|| settings.default_model.clone())
        .ok_or_else(|| anyhow!("no model selected; pass --model or set default-model"))?;
    let model = api.resolve_model(&model);
    let model_config = api.model(&model);

    // Prompt assembly: format preamble, role presets, prior messages, then
    // the fresh user turn.
    let mut messages = Vec::new();

    if args.format && args.format_as != "json" {
        messages.push(Message::system(
            settings
                .format_text
                .clone()
                .unwrap_or_else(|| DEFAULT_FORMAT_TEXT.to_string()),
        ));
    }

    for source in role_sources(args, settings)? {
        let content = resolve_role_source(&source)
            .await
            .with_context(|| format!("could not load role source '{source}'"))?;
        messages.push(Message::system(content));
    }

    if let (Some(read), Some(store)) = (&plan.read, store) {
        let prior = store.read(&read.id).map_err(|err| {
            anyhow!("{err}; pass --no-cache to run without the conversation store")
        })?;
        messages.extend(prior);
    }

    let max_input_chars = args
        .max_input_chars
        .or(model_config.and_then(|m| m.max_input_chars))
        .unwrap_or_else(|| settings.max_input_chars());

    messages.push(Message::user(build_prompt(
        &prefix,
        stdin.as_deref(),
        max_input_chars,
        args.no_limit,
    )));

    // Advertise tools unless every server is disabled.
    let mut disable = settings.mcp_disable.clone();
    disable.extend(args.mcp_disable.iter().cloned());
    let timeout = Duration::from_secs(args.mcp_timeout.unwrap_or_else(|| settings.mcp_timeout_secs()));
    let gateway = ToolGateway::new(settings.mcp_servers.clone(), &disable, timeout);

    let mut request = Request::new(model.clone(), messages);
    request.user = api.user.clone().unwrap_or_default();
    request.temperature = args.temperature;
    request.top_p = args.top_p;
    request.top_k = args.top_k;
    request.max_tokens = args.max_tokens;
    request.stop = args.stop.clone();
    request.format = if args.format && args.format_as == "json" {
        ResponseFormat::Json
    } else {
        ResponseFormat::Text
    };

    if !gateway.is_empty() {
        // Capability gap: the google protocol has no tool calling, so the
        // configured servers sit the conversation out.
        if api.protocol == Protocol::Google {
            log::warn!("api '{api_name}' uses the google protocol, which has no tool calling; skipping MCP servers");
        } else {
            request.tools = gateway.tools().await?;
            request.tool_caller = Some(Arc::new(gateway));
        }
    }

    let key = resolve_key(api_name, api, cache_root)?;
    let client = Client::new(api_name, api.clone(), key, args.http_proxy.as_deref())?;

    let policy = RetryPolicy {
        max_retries: args.max_retries.unwrap_or_else(|| settings.max_retries()),
        no_limit: args.no_limit,
        avg_chars_per_token: settings.avg_chars_per_token(),
        fallback_model: model_config.and_then(|m| m.fallback.clone()),
    };

    let mut stream = open_with_retries(&client, request, &policy).await?;

    // The streaming loop proper. Ctrl-c cancels the in-flight turn; cleanly
    // completed turns are already folded into the transcript and persisted
    // below.
    let interrupted = tokio::select! {
        result = drive(stream.as_mut()) => {
            result?;
            false
        }
        _ = tokio::signal::ctrl_c() => {
            log::debug!("interrupted; discarding the in-flight turn");
            true
        }
    };

    stream.close();

    let transcript = stream.messages();

    let responded = transcript
        .last()
        .is_some_and(|message| message.role == Role::Assistant);

    if responded && !args.no_cache {
        if let Some(store) = store {
            let title = plan
                .title
                .clone()
                .unwrap_or_else(|| default_title(&transcript));
            store.save(
                &plan.write_id,
                &title,
                Some(api_name),
                Some(&model),
                &transcript,
            )?;
        }
    }

    if interrupted {
        bail!("interrupted");
    }

    Ok(())
}

/// The inner stream/tool loop: print chunks, run tools, re-enter until a
/// turn ends without tool calls.
async fn drive(stream: &mut dyn llm::ChatStream) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let mut printed = false;

    loop {
        while stream.next().await {
            match stream.current() {
                Ok(chunk) => {
                    stdout.write_all(chunk.content.as_bytes())?;
                    stdout.flush()?;
                    printed = true;
                }
                Err(StreamError::NoContent) => continue,
                Err(StreamError::Broken(reason)) => bail!("{reason}"),
            }
        }

        if let Some(err) = stream.err() {
            bail!("{err}");
        }

        let statuses = stream.call_tools().await;

        if statuses.is_empty() {
            break;
        }

        // Tool progress renders as markdown blockquotes between turns.
        for status in statuses {
            match status.error {
                None => writeln!(stdout, "\n> ran {}", status.name)?,
                Some(error) => writeln!(stdout, "\n> {} failed: {error}", status.name)?,
            }
        }
        stdout.flush()?;
    }

    if printed {
        writeln!(stdout)?;
    }

    Ok(())
}

/// Decide the read and write ids before any provider I/O.
fn resolve_plan(args: &Args, store: Option<&Store>) -> anyhow::Result<Plan> {
    let read = if let Some(reference) = &args.continue_ref {
        let store =
            store.ok_or_else(|| anyhow!("--continue cannot be used with --no-cache"))?;
        Some(store.find(reference)?)
    } else if args.continue_last {
        let store =
            store.ok_or_else(|| anyhow!("--continue-last cannot be used with --no-cache"))?;
        Some(
            store
                .find_head()?
                .ok_or_else(|| anyhow!("there are no saved conversations to continue"))?,
        )
    } else {
        None
    };

    let plan = match (&read, &args.title) {
        // Branch: new conversation seeded from the parent's messages.
        (Some(_), Some(title)) => Plan {
            write_id: new_conversation_id(),
            title: Some(title.clone()),
            read,
        },
        // Plain continuation updates the existing row in place.
        (Some(row), None) => Plan {
            write_id: row.id.clone(),
            title: Some(row.title.clone()),
            read,
        },
        (None, Some(title)) => Plan {
            write_id: new_conversation_id(),
            title: Some(title.clone()),
            read: None,
        },
        (None, None) => Plan {
            write_id: new_conversation_id(),
            title: None,
            read: None,
        },
    };

    Ok(plan)
}

fn role_sources(args: &Args, settings: &Settings) -> anyhow::Result<Vec<String>> {
    match settings.role(&args.role) {
        Ok(sources) => Ok(sources.to_vec()),
        // The implicit default role is optional; an explicit one must exist.
        Err(_) if args.role == "default" => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// A role source is a literal system message, a `file://` path, or an
/// `http(s)://` URL to fetch.
async fn resolve_role_source(source: &str) -> anyhow::Result<String> {
    if let Some(path) = source.strip_prefix("file://") {
        return Ok(std::fs::read_to_string(path)?);
    }

    if source.starts_with("http://") || source.starts_with("https://") {
        let response = reqwest::get(source).await?.error_for_status()?;
        return Ok(response.text().await?);
    }

    Ok(source.to_string())
}

/// Prefix then stdin, with stdin clamped unless `--no-limit`.
fn build_prompt(prefix: &str, stdin: Option<&str>, max_input_chars: usize, no_limit: bool) -> String {
    let mut prompt = prefix.trim().to_string();

    if let Some(stdin) = stdin {
        let stdin = if no_limit {
            stdin.to_string()
        } else {
            stdin.chars().take(max_input_chars).collect()
        };

        if prompt.is_empty() {
            prompt = stdin;
        } else {
            prompt = format!("{prompt}\n\n{stdin}");
        }
    }

    prompt
}

fn read_stdin() -> anyhow::Result<Option<String>> {
    let mut stdin = std::io::stdin();

    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut input = String::new();
    stdin.read_to_string(&mut input)?;

    Ok((!input.trim().is_empty()).then_some(input))
}

/// Default title: the first line of the last user prompt.
fn default_title(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .and_then(|message| message.content.lines().next())
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .unwrap_or_else(|| "untitled".to_string())
}

/// Resolve the api credential. Copilot bearer tokens are short-lived and go
/// through the expiring cache; every other protocol resolves directly.
fn resolve_key(api_name: &str, api: &config::ApiConfig, cache_root: &Path) -> anyhow::Result<SecretString> {
    if api.protocol != Protocol::Copilot {
        return Ok(api.resolve_key(api_name)?);
    }

    let cache: ExpiringCache<String> = ExpiringCache::new(&cache_root.join("temp"));

    if let Some(token) = cache.read("copilot-token")? {
        return Ok(SecretString::from(token));
    }

    let token = api.resolve_key(api_name)?;
    let expiry = jiff::Timestamp::now().as_second() + COPILOT_TOKEN_TTL_SECS;

    if let Err(err) = cache.write("copilot-token", &token.expose_secret().to_string(), expiry) {
        log::debug!("could not cache the copilot token: {err}");
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use protocol::Message;

    use super::*;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["parley"];
        full.extend(argv);
        Args::parse_from(full)
    }

    fn store_with(rows: &[(&str, &str)]) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        for (id, title) in rows {
            store
                .save(id, title, None, None, &[Message::user(*title)])
                .unwrap();
        }
        (dir, store)
    }

    #[test]
    fn continue_last_keeps_id_and_title() {
        let (_dir, store) = store_with(&[("df31ae23ab8b75b5643c2f846c570997edc71333", "m1")]);

        let args = args(&["--continue-last", "hello"]);
        let plan = resolve_plan(&args, Some(&store)).unwrap();

        assert_eq!(plan.write_id, "df31ae23ab8b75b5643c2f846c570997edc71333");
        assert_eq!(plan.title.as_deref(), Some("m1"));
        assert!(plan.read.is_some());
    }

    #[test]
    fn continue_with_title_branches_to_a_new_id() {
        let (_dir, store) = store_with(&[("fc5012d8c67073ea0a46a3c05488a0e1d87df74b", "naturals")]);

        let args = args(&["-c", "naturals", "-t", "naturals.json", "next"]);
        let plan = resolve_plan(&args, Some(&store)).unwrap();

        assert_ne!(plan.write_id, "fc5012d8c67073ea0a46a3c05488a0e1d87df74b");
        assert_eq!(plan.write_id.len(), 40);
        assert_eq!(plan.title.as_deref(), Some("naturals.json"));
        assert_eq!(
            plan.read.as_ref().map(|row| row.id.as_str()),
            Some("fc5012d8c67073ea0a46a3c05488a0e1d87df74b")
        );
    }

    #[test]
    fn fresh_runs_mint_an_id_and_defer_the_title() {
        let args = args(&["hello", "world"]);
        let plan = resolve_plan(&args, None).unwrap();

        assert_eq!(plan.write_id.len(), 40);
        assert_eq!(plan.title, None);
        assert!(plan.read.is_none());
    }

    #[test]
    fn continue_without_store_is_a_user_error() {
        let args = args(&["--continue-last", "--no-cache", "hi"]);
        assert!(resolve_plan(&args, None).is_err());
    }

    #[test]
    fn prompt_clamps_stdin_but_not_the_prefix() {
        let prompt = build_prompt("summarize this", Some("0123456789"), 4, false);
        assert_eq!(prompt, "summarize this\n\n0123");

        let prompt = build_prompt("summarize this", Some("0123456789"), 4, true);
        assert_eq!(prompt, "summarize this\n\n0123456789");

        let prompt = build_prompt("", Some("just stdin"), 100, false);
        assert_eq!(prompt, "just stdin");
    }

    #[test]
    fn titles_default_to_the_first_line_of_the_last_user_prompt() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("first question"),
            Message::assistant("answer"),
            Message::user("explain generics\nin rust please"),
            Message::assistant("sure"),
        ];

        assert_eq!(default_title(&messages), "explain generics");
        assert_eq!(default_title(&[]), "untitled");
    }
}
