use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{StoreError, TextEdit, TurnStore};
use crate::turn::{ConversationId, NewTurn, Part, Turn, TurnId};

/// A [`TurnStore`] keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<ConversationId, Vec<Turn>>>,
}

impl MemoryStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_turns<F, T>(
        &self,
        conversation: &ConversationId,
        f: F,
    ) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Turn>) -> T,
    {
        let mut conversations = self
            .conversations
            .lock()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))?;
        Ok(f(conversations.entry(conversation.clone()).or_default()))
    }
}

#[async_trait]
impl TurnStore for MemoryStore {
    async fn scan(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Turn>, StoreError> {
        self.with_turns(conversation, |turns| {
            let mut turns = turns.clone();
            // Stable, so equal timestamps keep insertion order.
            turns.sort_by_key(|t| t.created_at);
            turns
        })
    }

    async fn insert_many(
        &self,
        conversation: &ConversationId,
        new_turns: Vec<(NewTurn, DateTime<Utc>)>,
    ) -> Result<Vec<TurnId>, StoreError> {
        self.with_turns(conversation, |turns| {
            new_turns
                .into_iter()
                .map(|(NewTurn { role, parts }, created_at)| {
                    let id = TurnId::generate();
                    turns.push(Turn {
                        id: id.clone(),
                        role,
                        parts,
                        created_at,
                    });
                    id
                })
                .collect()
        })
    }

    async fn update_first_text(
        &self,
        conversation: &ConversationId,
        id: &TurnId,
        text: &str,
    ) -> Result<TextEdit, StoreError> {
        self.with_turns(conversation, |turns| {
            let Some(turn) = turns.iter_mut().find(|t| &t.id == id) else {
                return TextEdit::NotFound;
            };
            match turn.parts.first_mut() {
                Some(Part::Text { text: current }) => {
                    *current = text.to_owned();
                    TextEdit::Updated
                }
                _ => TextEdit::NotText,
            }
        })
    }

    async fn delete_all(
        &self,
        conversation: &ConversationId,
    ) -> Result<u64, StoreError> {
        self.with_turns(conversation, |turns| {
            let count = turns.len() as u64;
            turns.clear();
            count
        })
    }
}
