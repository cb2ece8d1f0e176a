//! A conversation log bound to its store.

use std::fmt::{self, Debug};
use std::sync::Arc;

use chrono::Utc;
use palaver_model::ModelContent;

use crate::error::Error;
use crate::store::{TextEdit, TurnStore};
use crate::transcript;
use crate::turn::{ConversationId, NewTurn, Role, Turn, TurnId};

/// One conversation: reads its history and commits new turn pairs.
#[derive(Clone)]
pub struct Conversation {
    store: Arc<dyn TurnStore>,
    id: ConversationId,
}

impl Conversation {
    #[inline]
    pub fn new(store: Arc<dyn TurnStore>, id: ConversationId) -> Self {
        Self { store, id }
    }

    #[inline]
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Returns every turn, oldest first.
    pub async fn history(&self) -> Result<Vec<Turn>, Error> {
        Ok(self.store.scan(&self.id).await?)
    }

    /// Returns the history in the shape a model request expects.
    pub async fn materialize(&self) -> Result<Vec<ModelContent>, Error> {
        let turns = self.history().await?;
        Ok(transcript::materialize(&turns))
    }

    /// Persists a user turn and the model's reply as one batch.
    ///
    /// Both turns are stamped now, the user turn never after the model
    /// turn.
    pub async fn commit(
        &self,
        user: NewTurn,
        model: NewTurn,
    ) -> Result<Vec<TurnId>, Error> {
        user.ensure_role(Role::User)?;
        model.ensure_role(Role::Model)?;

        let user_at = Utc::now();
        let model_at = Utc::now().max(user_at);
        let ids = self
            .store
            .insert_many(&self.id, vec![(user, user_at), (model, model_at)])
            .await?;
        debug!(conversation = %self.id, "committed turns {ids:?}");
        Ok(ids)
    }

    /// Replaces the text of the first part of turn `id`.
    pub async fn edit_text(&self, id: &TurnId, text: &str) -> Result<(), Error> {
        match self.store.update_first_text(&self.id, id, text).await? {
            TextEdit::Updated => {
                debug!(conversation = %self.id, "edited turn {id}");
                Ok(())
            }
            TextEdit::NotFound => Err(Error::NotFound(id.clone())),
            TextEdit::NotText => Err(Error::InvalidTurn(format!(
                "first part of turn {id} is not text"
            ))),
        }
    }

    /// Deletes every turn, returning how many were removed.
    pub async fn clear_all(&self) -> Result<u64, Error> {
        let count = self.store.delete_all(&self.id).await?;
        info!(conversation = %self.id, "cleared {count} turns");
        Ok(count)
    }
}

impl Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
