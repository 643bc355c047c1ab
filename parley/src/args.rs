use std::path::PathBuf;

use clap::Parser;

/// Chat with LLMs and MCP tool servers from your shell pipeline.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about)]
pub struct Args {
    /// Prompt words, joined with spaces ahead of piped stdin.
    pub prefix: Vec<String>,

    /// API to use, as configured under `apis` in the settings.
    #[arg(short, long, env = "PARLEY_API")]
    pub api: Option<String>,

    /// Model name or alias.
    #[arg(short, long, env = "PARLEY_MODEL")]
    pub model: Option<String>,

    /// Role preset providing system messages.
    #[arg(short, long, default_value = "default")]
    pub role: String,

    /// Ask for formatted output (see `format-text` in the settings).
    #[arg(short, long)]
    pub format: bool,

    /// Output format requested with --format.
    #[arg(long, value_name = "FORMAT", default_value = "markdown")]
    pub format_as: String,

    /// Continue a conversation by id prefix or title.
    #[arg(short = 'c', long = "continue", value_name = "REF")]
    pub continue_ref: Option<String>,

    /// Continue the most recently saved conversation.
    #[arg(short = 'C', long)]
    pub continue_last: bool,

    /// Save the conversation under this title; with --continue, branch into
    /// a new conversation.
    #[arg(short, long, value_name = "TITLE")]
    pub title: Option<String>,

    /// Print a saved conversation's last response and exit.
    #[arg(short, long, value_name = "REF")]
    pub show: Option<String>,

    /// Print the most recently saved conversation's last response and exit.
    #[arg(short = 'S', long)]
    pub show_last: bool,

    /// List saved conversations and exit.
    #[arg(short, long)]
    pub list: bool,

    /// Delete a saved conversation by id prefix or title.
    #[arg(long, value_name = "REF")]
    pub delete: Option<String>,

    /// Delete conversations older than this age (e.g. 10d, 1h30m, 2w).
    #[arg(long, value_name = "AGE")]
    pub delete_older_than: Option<String>,

    /// Print completion lines for a conversation reference prefix and exit.
    #[arg(long, value_name = "PREFIX", hide = true)]
    pub complete: Option<String>,

    /// Skip reading from and writing to the conversation store.
    #[arg(long)]
    pub no_cache: bool,

    /// Do not clamp stdin, and treat context overflow as fatal.
    #[arg(long)]
    pub no_limit: bool,

    /// Upper bound on provider retries.
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Cap on stdin characters appended to the prompt.
    #[arg(long, value_name = "N")]
    pub max_input_chars: Option<usize>,

    /// Maximum tokens the model may generate.
    #[arg(long, value_name = "N")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[arg(long, value_name = "T")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[arg(long, value_name = "P")]
    pub top_p: Option<f32>,

    /// Top-k sampling cutoff.
    #[arg(long, value_name = "K")]
    pub top_k: Option<u32>,

    /// Stop sequence; may be repeated.
    #[arg(long, value_name = "SEQ")]
    pub stop: Vec<String>,

    /// HTTP proxy for provider requests.
    #[arg(long, env = "PARLEY_HTTP_PROXY", value_name = "URL")]
    pub http_proxy: Option<String>,

    /// MCP server to skip; may be repeated, `*` disables all.
    #[arg(long, value_name = "SERVER")]
    pub mcp_disable: Vec<String>,

    /// Per-server MCP timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub mcp_timeout: Option<u64>,

    /// Settings file path.
    #[arg(long, env = "PARLEY_CONFIG", value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Cache root for conversations and temporary blobs.
    #[arg(long, env = "PARLEY_CACHE_DIR", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `llm=debug,toolbox=debug`.
    #[arg(long, env = "PARLEY_LOG", default_value = "off", value_name = "FILTER")]
    pub log_filter: String,
}

impl Args {
    /// Whether this invocation manages the store instead of chatting.
    pub fn is_management(&self) -> bool {
        self.list
            || self.show.is_some()
            || self.show_last
            || self.delete.is_some()
            || self.delete_older_than.is_some()
            || self.complete.is_some()
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn continue_and_title_parse_together() {
        let args = Args::parse_from(["parley", "-c", "naturals", "-t", "naturals.json"]);
        assert_eq!(args.continue_ref.as_deref(), Some("naturals"));
        assert_eq!(args.title.as_deref(), Some("naturals.json"));
        assert!(!args.is_management());
    }

    #[test]
    fn management_flags_are_detected() {
        let args = Args::parse_from(["parley", "--list"]);
        assert!(args.is_management());

        let args = Args::parse_from(["parley", "--delete-older-than", "10d"]);
        assert!(args.is_management());
    }
}
