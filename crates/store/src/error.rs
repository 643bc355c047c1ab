use thiserror::Error;

/// Conversation store errors. Display strings are the user-facing reasons.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation id is empty")]
    EmptyId,

    #[error("conversation id and title must not be empty")]
    InvalidConversation,

    #[error("no conversation matched '{0}'")]
    NoMatches(String),

    #[error("'{0}' matched more than one conversation")]
    ManyMatches(String),

    #[error("conversation '{0}' has no saved messages")]
    NotFound(String),

    #[error("conversation '{id}' was only partially deleted: {detail}")]
    PartialDelete { id: String, detail: String },

    #[error("conversation cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("conversation index failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Codec(#[from] protocol::CodecError),
}
