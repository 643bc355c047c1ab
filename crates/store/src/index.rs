use std::path::Path;
use std::sync::Mutex;

use jiff::Timestamp;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StoreError;

/// One row of the titled index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub id: String,
    pub title: String,
    /// Unix seconds of the last save.
    pub updated_at: i64,
    pub api: Option<String>,
    pub model: Option<String>,
}

impl ConversationRow {
    /// First seven hex digits, used for display and completions.
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(7);
        &self.id[..end]
    }
}

/// Relational index over stored conversations.
///
/// Single-writer: the connection is process-wide and writes serialise behind
/// the mutex. Opening runs idempotent migrations; the `api`/`model` columns
/// arrived after the first release and are added on the fly.
pub struct ConversationIndex {
    conn: Mutex<Connection>,
}

impl ConversationIndex {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Upsert a conversation row, refreshing its `updated_at`.
    pub fn save(
        &self,
        id: &str,
        title: &str,
        api: Option<&str>,
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        if id.is_empty() || title.is_empty() {
            return Err(StoreError::InvalidConversation);
        }

        let conn = self.lock();
        conn.execute(
            "INSERT INTO conversations (id, title, updated_at, api, model)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 updated_at = excluded.updated_at,
                 api = excluded.api,
                 model = excluded.model",
            params![id, title, Timestamp::now().as_second(), api, model],
        )?;

        Ok(())
    }

    /// Resolve `input` to exactly one row.
    ///
    /// Inputs shorter than four characters only ever match a title exactly;
    /// anything longer matches an id prefix or an exact title. Zero matches
    /// and multiple matches are distinct errors.
    pub fn find(&self, input: &str) -> Result<ConversationRow, StoreError> {
        let conn = self.lock();

        let mut rows = if input.len() < 4 {
            query_rows(
                &conn,
                "SELECT id, title, updated_at, api, model FROM conversations
                 WHERE title = ?1 LIMIT 2",
                params![input],
            )?
        } else {
            query_rows(
                &conn,
                "SELECT id, title, updated_at, api, model FROM conversations
                 WHERE id GLOB ?1 OR title = ?2 LIMIT 2",
                params![format!("{input}*"), input],
            )?
        };

        match rows.len() {
            0 => Err(StoreError::NoMatches(input.to_string())),
            1 => Ok(rows.remove(0)),
            _ => Err(StoreError::ManyMatches(input.to_string())),
        }
    }

    /// The single most recently updated row, if any.
    pub fn find_head(&self) -> Result<Option<ConversationRow>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, title, updated_at, api, model FROM conversations
                 ORDER BY updated_at DESC, rowid DESC LIMIT 1",
                [],
                row_from,
            )
            .optional()?;

        Ok(row)
    }

    /// All rows, most recent first.
    pub fn list(&self) -> Result<Vec<ConversationRow>, StoreError> {
        let conn = self.lock();

        query_rows(
            &conn,
            "SELECT id, title, updated_at, api, model FROM conversations
             ORDER BY updated_at DESC, rowid DESC",
            [],
        )
    }

    /// Completion lines for `prefix`: ids that match it paired with their
    /// title, and titles that match it paired with their short id.
    pub fn completions(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.lock();
        let glob = format!("{prefix}*");
        let mut lines = Vec::new();

        {
            let mut stmt = conn.prepare("SELECT id, title FROM conversations WHERE id GLOB ?1")?;
            let by_id = stmt.query_map(params![glob], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in by_id {
                let (id, title) = row?;
                let short = &id[..id.len().min(7)];
                lines.push(format!("{short}\t{title}"));
            }
        }

        {
            let mut stmt = conn.prepare("SELECT title, id FROM conversations WHERE title GLOB ?1")?;
            let by_title = stmt.query_map(params![glob], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in by_title {
                let (title, id) = row?;
                let short = &id[..id.len().min(7)];
                lines.push(format!("{title}\t{short}"));
            }
        }

        Ok(lines)
    }

    /// Remove a row by exact id.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        let affected = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;

        if affected == 0 {
            return Err(StoreError::NoMatches(id.to_string()));
        }

        Ok(())
    }

    /// Rows last updated more than `max_age_secs` ago.
    pub fn older_than(&self, max_age_secs: i64) -> Result<Vec<ConversationRow>, StoreError> {
        let cutoff = Timestamp::now().as_second() - max_age_secs;

        let conn = self.lock();
        query_rows(
            &conn,
            "SELECT id, title, updated_at, api, model FROM conversations
             WHERE updated_at < ?1",
            params![cutoff],
        )
    }

    #[cfg(test)]
    pub(crate) fn backdate_for_test(&self, id: &str, by_secs: i64) {
        let conn = self.lock();
        conn.execute(
            "UPDATE conversations SET updated_at = updated_at - ?1 WHERE id = ?2",
            params![by_secs, id],
        )
        .unwrap();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            // The store is single-writer and statements don't panic while
            // holding the lock; a poisoned mutex still guards valid state.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<ConversationRow>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, row_from)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        title: row.get(1)?,
        updated_at: row.get(2)?,
        api: row.get(3)?,
        model: row.get(4)?,
    })
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
             id TEXT PRIMARY KEY,
             title TEXT NOT NULL,
             updated_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_conversations_id ON conversations (id);
         CREATE INDEX IF NOT EXISTS idx_conversations_title ON conversations (title);",
    )?;

    // Columns added after the first release; re-running is harmless.
    for column in ["api", "model"] {
        match conn.execute(
            &format!("ALTER TABLE conversations ADD COLUMN {column} TEXT"),
            [],
        ) {
            Ok(_) => {}
            Err(err) if err.to_string().contains("duplicate column name") => {}
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}
