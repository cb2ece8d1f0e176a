//! The persistence seam of a conversation.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::turn::{ConversationId, NewTurn, Turn, TurnId};
pub use memory::MemoryStore;

/// Failures reported by a [`TurnStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to execute an operation.
    #[error("storage backend failure: {0}")]
    Backend(String),
    /// A persisted record could not be decoded.
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    #[inline]
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Result of [`TurnStore::update_first_text`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextEdit {
    Updated,
    NotFound,
    /// The turn exists but its first part is not text.
    NotText,
}

/// An ordered log of turns, partitioned by conversation.
///
/// Implementations must return turns ordered by creation time, with ties
/// kept in insertion order.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Returns every turn of `conversation`, oldest first.
    async fn scan(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Turn>, StoreError>;

    /// Inserts all of `turns` in one atomic batch, in the given order.
    async fn insert_many(
        &self,
        conversation: &ConversationId,
        turns: Vec<(NewTurn, DateTime<Utc>)>,
    ) -> Result<Vec<TurnId>, StoreError>;

    /// Replaces the text of the first part of turn `id`.
    async fn update_first_text(
        &self,
        conversation: &ConversationId,
        id: &TurnId,
        text: &str,
    ) -> Result<TextEdit, StoreError>;

    /// Deletes every turn of `conversation`, returning how many were removed.
    async fn delete_all(
        &self,
        conversation: &ConversationId,
    ) -> Result<u64, StoreError>;
}
