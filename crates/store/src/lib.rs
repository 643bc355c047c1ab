//! Conversation persistence: a content-addressed blob cache for message
//! transcripts plus a titled SQLite index, both under one cache root.
//!
//! The blob and the index row either both exist or the blob is removed;
//! orphaned blobs are a transient failure state only, superseded on the next
//! write.

mod blob;
mod error;
mod expiring;
mod id;
mod index;

use std::path::Path;

pub use blob::ConversationCache;
pub use error::StoreError;
pub use expiring::ExpiringCache;
pub use id::new_conversation_id;
pub use index::{ConversationIndex, ConversationRow};
use protocol::Message;

/// The conversation store: blob cache and titled index behind one surface
/// that keeps the two consistent.
pub struct Store {
    cache: ConversationCache,
    index: ConversationIndex,
}

impl Store {
    /// Open (creating as needed) the store under `root`.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let conversations = root.join("conversations");
        std::fs::create_dir_all(&conversations)?;

        Ok(Self {
            cache: ConversationCache::new(&conversations),
            index: ConversationIndex::open(&conversations.join("parley.db"))?,
        })
    }

    /// Persist a transcript: blob first, then the index row. A failed blob
    /// write leaves the index untouched; a failed index write removes the
    /// just-written blob.
    pub fn save(
        &self,
        id: &str,
        title: &str,
        api: Option<&str>,
        model: Option<&str>,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        self.cache.write(id, messages)?;

        if let Err(err) = self.index.save(id, title, api, model) {
            if let Err(cleanup) = self.cache.delete(id) {
                log::warn!("could not remove orphaned blob for {id}: {cleanup}");
            }
            return Err(err);
        }

        Ok(())
    }

    /// Hydrate a stored transcript.
    pub fn read(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        self.cache.read(id)
    }

    /// Resolve a user-supplied reference to exactly one conversation.
    pub fn find(&self, input: &str) -> Result<ConversationRow, StoreError> {
        self.index.find(input)
    }

    /// The most recently updated conversation.
    pub fn find_head(&self) -> Result<Option<ConversationRow>, StoreError> {
        self.index.find_head()
    }

    /// All conversations, most recent first.
    pub fn list(&self) -> Result<Vec<ConversationRow>, StoreError> {
        self.index.list()
    }

    /// Shell-completion lines for ids and titles matching `prefix`.
    pub fn completions(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.index.completions(prefix)
    }

    /// Remove a conversation. Index row and blob are removed independently;
    /// if either fails the partial state is reported.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let index_result = self.index.delete(id);
        let blob_result = self.cache.delete(id);

        match (index_result, blob_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), Ok(())) => Err(StoreError::PartialDelete {
                id: id.to_string(),
                detail: format!("messages removed, but the index row was not: {err}"),
            }),
            (Ok(()), Err(err)) => Err(StoreError::PartialDelete {
                id: id.to_string(),
                detail: format!("index row removed, but the messages were not: {err}"),
            }),
            (Err(index_err), Err(_)) => Err(index_err),
        }
    }

    /// Remove every conversation last updated more than `max_age_secs` ago,
    /// returning the removed rows.
    pub fn delete_older_than(&self, max_age_secs: i64) -> Result<Vec<ConversationRow>, StoreError> {
        let rows = self.index.older_than(max_age_secs)?;

        for row in &rows {
            self.delete(&row.id)?;
        }

        Ok(rows)
    }
}
