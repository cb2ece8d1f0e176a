//! The conversation pipeline: rebuilding stored turns into model requests,
//! streaming completions, relaying fragments, and committing turn pairs.

#[macro_use]
extern crate tracing;

pub mod codec;
mod completion;
mod conversation;
mod error;
mod model_client;
mod relay;
pub mod store;
pub mod transcript;
mod turn;

pub use completion::{
    Completer, CompleterBuilder, Completion, build_user_content,
};
pub use conversation::Conversation;
pub use error::Error;
pub use relay::{RelayOutcome, relay};
pub use store::{MemoryStore, StoreError, TextEdit, TurnStore};
pub use turn::{
    Attachment, AttachmentKind, ConversationId, NewTurn, Part, Role, Turn,
    TurnId,
};
