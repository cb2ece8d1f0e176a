//! Conversation records.
//!
//! A [`Turn`] is one persisted entry of the conversation log. Its parts are
//! kept in the inline form clients send (data URLs), and are only decoded
//! when the transcript is materialized for the model.

use std::fmt::{self, Display};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use mime::Mime;
use palaver_model::ModelRole;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::codec;
use crate::error::Error;

/// Opaque identifier of a persisted turn.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TurnId(String);

impl TurnId {
    /// Generates a fresh random identifier.
    #[inline]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TurnId {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TurnId {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one conversation log inside a store.
///
/// Deployments normally run a single conversation, named `default`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    #[inline]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    #[inline]
    fn default() -> Self {
        Self("default".to_owned())
    }
}

impl Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The author of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

impl From<Role> for ModelRole {
    #[inline]
    fn from(value: Role) -> Self {
        match value {
            Role::User => ModelRole::User,
            Role::Model => ModelRole::Model,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of an inline attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Image,
    Document,
    Audio,
}

impl AttachmentKind {
    /// Classifies a MIME type: `image/*` and `audio/*` map to their kinds,
    /// everything else (including unparsable types) is a document.
    pub fn for_mime(mime_type: &str) -> Self {
        match mime_type.parse::<Mime>() {
            Ok(m) if m.type_() == mime::IMAGE => AttachmentKind::Image,
            Ok(m) if m.type_() == mime::AUDIO => AttachmentKind::Audio,
            _ => AttachmentKind::Document,
        }
    }
}

/// One content unit of a turn.
///
/// Serialized as `{"text": ...}` or `{"image"|"document"|"audio": <data url>,
/// "fileName": ...}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPart", into = "RawPart")]
pub enum Part {
    Text {
        text: String,
    },
    Image {
        data: String,
        file_name: Option<String>,
    },
    Document {
        data: String,
        file_name: Option<String>,
    },
    Audio {
        data: String,
        file_name: Option<String>,
    },
}

impl Part {
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Part::Text { text: text.into() }
    }

    /// Creates an attachment part holding a data URL.
    pub fn attachment(
        kind: AttachmentKind,
        data: String,
        file_name: Option<String>,
    ) -> Self {
        match kind {
            AttachmentKind::Image => Part::Image { data, file_name },
            AttachmentKind::Document => Part::Document { data, file_name },
            AttachmentKind::Audio => Part::Audio { data, file_name },
        }
    }

    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Returns the kind and data URL of an attachment part.
    pub fn as_attachment(&self) -> Option<(AttachmentKind, &str)> {
        match self {
            Part::Text { .. } => None,
            Part::Image { data, .. } => Some((AttachmentKind::Image, data)),
            Part::Document { data, .. } => {
                Some((AttachmentKind::Document, data))
            }
            Part::Audio { data, .. } => Some((AttachmentKind::Audio, data)),
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            Part::Text { .. } => None,
            Part::Image { file_name, .. }
            | Part::Document { file_name, .. }
            | Part::Audio { file_name, .. } => file_name.as_deref(),
        }
    }
}

/// Wire and storage shape of a [`Part`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
}

impl TryFrom<RawPart> for Part {
    type Error = String;

    fn try_from(raw: RawPart) -> Result<Self, Self::Error> {
        // Legacy records may carry several kinds; the first one wins.
        let RawPart {
            text,
            image,
            document,
            audio,
            file_name,
        } = raw;
        if let Some(text) = text {
            return Ok(Part::Text { text });
        }
        if let Some(data) = image {
            return Ok(Part::Image { data, file_name });
        }
        if let Some(data) = document {
            return Ok(Part::Document { data, file_name });
        }
        if let Some(data) = audio {
            return Ok(Part::Audio { data, file_name });
        }
        Err("part has none of text, image, document or audio".to_owned())
    }
}

impl From<Part> for RawPart {
    fn from(part: Part) -> Self {
        match part {
            Part::Text { text } => RawPart {
                text: Some(text),
                ..Default::default()
            },
            Part::Image { data, file_name } => RawPart {
                image: Some(data),
                file_name,
                ..Default::default()
            },
            Part::Document { data, file_name } => RawPart {
                document: Some(data),
                file_name,
                ..Default::default()
            },
            Part::Audio { data, file_name } => RawPart {
                audio: Some(data),
                file_name,
                ..Default::default()
            },
        }
    }
}

/// Decodes a list of parts, dropping entries that match no part kind.
pub(crate) fn lenient_parts<'de, D>(deserializer: D) -> Result<Vec<Part>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<RawPart>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(idx, raw)| match Part::try_from(raw) {
            Ok(part) => Some(part),
            Err(reason) => {
                warn!("dropping part {idx}: {reason}");
                None
            }
        })
        .collect())
}

/// A persisted turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    #[serde(rename = "_id")]
    pub id: TurnId,
    pub role: Role,
    #[serde(deserialize_with = "lenient_parts")]
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
}

/// A turn that has not been persisted yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTurn {
    pub role: Role,
    #[serde(deserialize_with = "lenient_parts")]
    pub parts: Vec<Part>,
}

impl NewTurn {
    #[inline]
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// Builds the user turn for the given text and uploads.
    pub fn user(text: Option<&str>, attachments: &[Attachment]) -> Self {
        let mut parts = vec![];
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            parts.push(Part::text(text));
        }
        parts.extend(attachments.iter().map(Attachment::to_part));
        Self::new(Role::User, parts)
    }

    /// Builds a model turn with a single text part.
    #[inline]
    pub fn model_text<S: Into<String>>(text: S) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    pub(crate) fn ensure_role(&self, role: Role) -> Result<(), Error> {
        if self.role != role {
            return Err(Error::InvalidTurn(format!(
                "expected a {role} turn, got a {} turn",
                self.role
            )));
        }
        if self.parts.is_empty() {
            return Err(Error::InvalidTurn(format!(
                "{role} turn has no parts"
            )));
        }
        if self.parts.iter().all(|p| p.as_text() == Some("")) {
            return Err(Error::InvalidTurn(format!(
                "{role} turn has only empty text"
            )));
        }
        Ok(())
    }
}

/// An upload attached to the turn being sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Bytes,
    pub file_name: Option<String>,
}

impl Attachment {
    /// Decodes a data URL produced by client-side file or audio capture.
    ///
    /// `fallback_mime` is the type reported alongside the upload, used when
    /// the URL itself carries none.
    pub fn from_data_url(
        data_url: &str,
        fallback_mime: Option<&str>,
        file_name: Option<String>,
    ) -> Result<Self, Error> {
        let (mime_type, data) =
            codec::decode_with_fallback(data_url, fallback_mime)?;
        Ok(Self {
            mime_type,
            data,
            file_name,
        })
    }

    #[inline]
    pub fn kind(&self) -> AttachmentKind {
        AttachmentKind::for_mime(&self.mime_type)
    }

    /// Re-encodes the attachment into its stored form.
    pub fn to_part(&self) -> Part {
        Part::attachment(
            self.kind(),
            codec::encode(&self.mime_type, &self.data),
            self.file_name.clone(),
        )
    }
}
