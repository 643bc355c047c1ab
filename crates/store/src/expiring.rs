use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// A blob cache whose entries carry an expiry in the file name:
/// `<dir>/<id>.<unix-expiry>`.
///
/// Reads glob by the `<id>.` prefix and purge entries whose expiry has
/// passed; writes supersede every prior file for the same id. Used for
/// short-lived credentials such as the Copilot bearer token.
pub struct ExpiringCache<T> {
    dir: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> ExpiringCache<T> {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            _marker: PhantomData,
        }
    }

    /// Read the entry for `id`, removing it and missing when expired.
    pub fn read(&self, id: &str) -> Result<Option<T>, StoreError> {
        if id.is_empty() {
            return Err(StoreError::EmptyId);
        }

        let Some((path, expiry)) = self.entry(id)? else {
            return Ok(None);
        };

        if expiry <= Timestamp::now().as_second() {
            std::fs::remove_file(&path)?;
            return Ok(None);
        }

        let bytes = std::fs::read(&path)?;

        match ciborium::from_reader(bytes.as_slice()) {
            Ok(value) => Ok(Some(value)),
            // An undecodable credential is as good as an expired one.
            Err(err) => {
                log::debug!("discarding undecodable cache entry {}: {err}", path.display());
                std::fs::remove_file(&path)?;
                Ok(None)
            }
        }
    }

    /// Write `value` under `id`, expiring at `expires_at` (unix seconds).
    /// Any prior entries for the id are removed first.
    pub fn write(&self, id: &str, value: &T, expires_at: i64) -> Result<(), StoreError> {
        if id.is_empty() {
            return Err(StoreError::EmptyId);
        }

        std::fs::create_dir_all(&self.dir)?;

        while let Some((stale, _)) = self.entry(id)? {
            std::fs::remove_file(stale)?;
        }

        let mut bytes = Vec::new();
        ciborium::into_writer(value, &mut bytes)
            .map_err(|err| std::io::Error::other(err.to_string()))?;

        let tmp = self.dir.join(format!(".{id}.tmp"));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, self.dir.join(format!("{id}.{expires_at}")))?;

        Ok(())
    }

    /// The newest on-disk entry for `id`, as `(path, expiry)`.
    fn entry(&self, id: &str) -> Result<Option<(PathBuf, i64)>, StoreError> {
        let prefix = format!("{id}.");
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut best: Option<(PathBuf, i64)> = None;

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(suffix) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Ok(expiry) = suffix.parse::<i64>() else {
                continue;
            };

            if best.as_ref().is_none_or(|(_, prev)| expiry > *prev) {
                best = Some((entry.path(), expiry));
            }
        }

        Ok(best)
    }
}
