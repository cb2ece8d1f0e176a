use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palaver_core::{
    ConversationId, NewTurn, Part, Role, StoreError, TextEdit, Turn, TurnId,
    TurnStore,
};
use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use crate::db::Database;

/// A [`TurnStore`] persisting turns in SQLite.
///
/// Every operation runs on the blocking thread pool.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    #[inline]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Opens (or creates) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(Database::open(path.as_ref())?)))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, StoreError>
            + Send
            + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| StoreError::Backend(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl TurnStore for SqliteStore {
    async fn scan(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Turn>, StoreError> {
        let conversation = conversation.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, role, parts, created_at FROM turns
                     WHERE conversation = ?1
                     ORDER BY created_at ASC, seq ASC",
                )
                .map_err(StoreError::backend)?;
            let rows = stmt
                .query_map(params![conversation], |row| Ok(row_to_turn(row)))
                .map_err(StoreError::backend)?;

            let mut turns = Vec::new();
            for row in rows {
                turns.push(row.map_err(StoreError::backend)??);
            }
            Ok(turns)
        })
        .await
    }

    async fn insert_many(
        &self,
        conversation: &ConversationId,
        turns: Vec<(NewTurn, DateTime<Utc>)>,
    ) -> Result<Vec<TurnId>, StoreError> {
        let conversation = conversation.to_string();
        self.blocking(move |conn| {
            let tx = conn.transaction().map_err(StoreError::backend)?;
            let mut ids = Vec::with_capacity(turns.len());
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO turns (id, conversation, role, parts, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(StoreError::backend)?;
                for (turn, created_at) in turns {
                    let id = TurnId::generate();
                    let parts = serde_json::to_string(&turn.parts)
                        .map_err(StoreError::backend)?;
                    stmt.execute(params![
                        id.as_str(),
                        conversation,
                        turn.role.as_str(),
                        parts,
                        created_at.timestamp_micros(),
                    ])
                    .map_err(|e| {
                        StoreError::Backend(format!("failed to insert turn: {e}"))
                    })?;
                    ids.push(id);
                }
            }
            tx.commit().map_err(StoreError::backend)?;
            Ok(ids)
        })
        .await
    }

    async fn update_first_text(
        &self,
        conversation: &ConversationId,
        id: &TurnId,
        text: &str,
    ) -> Result<TextEdit, StoreError> {
        let conversation = conversation.to_string();
        let id = id.clone();
        let text = text.to_owned();
        self.blocking(move |conn| {
            let tx = conn.transaction().map_err(StoreError::backend)?;
            let parts: Option<String> = tx
                .query_row(
                    "SELECT parts FROM turns WHERE conversation = ?1 AND id = ?2",
                    params![conversation, id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::backend)?;
            let Some(parts) = parts else {
                return Ok(TextEdit::NotFound);
            };

            // Edit the raw record so the remaining parts stay byte-for-byte.
            // The first part is the first one `scan` would keep.
            let mut parts: Vec<Value> =
                serde_json::from_str(&parts).map_err(|e| corrupt(&id, e))?;
            let Some(Value::String(current)) = parts
                .iter_mut()
                .find(|p| is_part(p))
                .and_then(|p| p.get_mut("text"))
            else {
                return Ok(TextEdit::NotText);
            };
            *current = text;
            let parts = serde_json::to_string(&parts).map_err(StoreError::backend)?;

            tx.execute(
                "UPDATE turns SET parts = ?1 WHERE conversation = ?2 AND id = ?3",
                params![parts, conversation, id.as_str()],
            )
            .map_err(StoreError::backend)?;
            tx.commit().map_err(StoreError::backend)?;
            Ok(TextEdit::Updated)
        })
        .await
    }

    async fn delete_all(
        &self,
        conversation: &ConversationId,
    ) -> Result<u64, StoreError> {
        let conversation = conversation.to_string();
        self.blocking(move |conn| {
            let count = conn
                .execute(
                    "DELETE FROM turns WHERE conversation = ?1",
                    params![conversation],
                )
                .map_err(StoreError::backend)?;
            Ok(count as u64)
        })
        .await
    }
}

fn row_to_turn(row: &Row<'_>) -> Result<Turn, StoreError> {
    let id: String = row.get(0).map_err(StoreError::backend)?;
    let role: String = row.get(1).map_err(StoreError::backend)?;
    let parts: String = row.get(2).map_err(StoreError::backend)?;
    let created_at: i64 = row.get(3).map_err(StoreError::backend)?;
    let id = TurnId::from(id);

    let role = match role.as_str() {
        "user" => Role::User,
        "model" => Role::Model,
        other => return Err(corrupt(&id, format!("unknown role {other:?}"))),
    };
    let created_at = DateTime::from_timestamp_micros(created_at)
        .ok_or_else(|| corrupt(&id, "timestamp out of range"))?;
    let parts = decode_parts(&id, &parts)?;

    Ok(Turn {
        id,
        role,
        parts,
        created_at,
    })
}

/// Decodes stored parts, skipping the ones that match no part kind.
fn decode_parts(id: &TurnId, raw: &str) -> Result<Vec<Part>, StoreError> {
    let values: Vec<Value> =
        serde_json::from_str(raw).map_err(|e| corrupt(id, e))?;
    Ok(values
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| match serde_json::from_value(value) {
            Ok(part) => Some(part),
            Err(err) => {
                warn!(turn = %id, "dropping part {idx}: {err}");
                None
            }
        })
        .collect())
}

#[inline]
fn is_part(value: &Value) -> bool {
    serde_json::from_value::<Part>(value.clone()).is_ok()
}

#[inline]
fn corrupt<E: std::fmt::Display>(id: &TurnId, reason: E) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}
