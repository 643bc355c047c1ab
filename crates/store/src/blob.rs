use std::path::{Path, PathBuf};

use protocol::Message;

use crate::error::StoreError;

/// One-file-per-conversation transcript cache.
///
/// Blobs live at `<dir>/<id>.cbor`. Writes go through a temp file and an
/// atomic rename so a crash never leaves a half-written transcript behind.
pub struct ConversationCache {
    dir: PathBuf,
}

impl ConversationCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.cbor"))
    }

    pub fn read(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        if id.is_empty() {
            return Err(StoreError::EmptyId);
        }

        let bytes = match std::fs::read(self.path(id)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        Ok(protocol::decode_messages(&bytes)?)
    }

    pub fn write(&self, id: &str, messages: &[Message]) -> Result<(), StoreError> {
        if id.is_empty() {
            return Err(StoreError::EmptyId);
        }

        std::fs::create_dir_all(&self.dir)?;

        let bytes = protocol::encode_messages(messages)?;
        let tmp = self.dir.join(format!(".{id}.tmp"));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, self.path(id))?;

        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        if id.is_empty() {
            return Err(StoreError::EmptyId);
        }

        match std::fs::remove_file(self.path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use protocol::Message;

    use super::*;

    #[test]
    fn empty_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ConversationCache::new(dir.path());

        assert!(matches!(cache.read(""), Err(StoreError::EmptyId)));
        assert!(matches!(cache.write("", &[]), Err(StoreError::EmptyId)));
        assert!(matches!(cache.delete(""), Err(StoreError::EmptyId)));
    }

    #[test]
    fn write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ConversationCache::new(dir.path());
        let messages = vec![Message::user("hello"), Message::assistant("hi")];

        cache.write("abc123", &messages).unwrap();
        assert_eq!(cache.read("abc123").unwrap(), messages);

        cache.delete("abc123").unwrap();
        assert!(matches!(
            cache.read("abc123"),
            Err(StoreError::NotFound(_))
        ));

        // Deleting an absent blob is not an error.
        cache.delete("abc123").unwrap();
    }

    #[test]
    fn write_supersedes_previous_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ConversationCache::new(dir.path());

        cache.write("abc123", &[Message::user("one")]).unwrap();
        cache.write("abc123", &[Message::user("two")]).unwrap();

        let messages = cache.read("abc123").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "two");
    }
}
