use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelRequest {
    /// The system instructions, sent alongside (not inside) the contents.
    pub system_instruction: Option<String>,
    /// The dialogue history, oldest first, ending with the new user turn.
    pub contents: Vec<ModelContent>,
}

/// The author of a [`ModelContent`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// The human side of the conversation.
    User,
    /// The generative model.
    Model,
}

impl ModelRole {
    /// Returns the wire name of the role.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::User => "user",
            ModelRole::Model => "model",
        }
    }
}

/// One role-tagged turn of the dialogue.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelContent {
    /// Who produced this turn.
    pub role: ModelRole,
    /// The parts of the turn, in replay order.
    pub parts: Vec<ModelPart>,
}

impl ModelContent {
    /// Creates a turn with a single text part.
    #[inline]
    pub fn text<S: Into<String>>(role: ModelRole, text: S) -> Self {
        Self {
            role,
            parts: vec![ModelPart::Text(text.into())],
        }
    }
}

/// A content unit of a turn.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelPart {
    /// Plain text.
    Text(String),
    /// Raw binary data, like an image or an audio clip.
    Binary {
        /// The IANA media type of `data`.
        mime_type: String,
        /// The decoded bytes.
        data: Bytes,
    },
}

impl ModelPart {
    /// Returns the text if this is a text part.
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ModelPart::Text(text) => Some(text),
            ModelPart::Binary { .. } => None,
        }
    }
}
