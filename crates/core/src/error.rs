use palaver_model::ErrorKind;
use thiserror::Error;

use crate::store::StoreError;
use crate::turn::TurnId;

/// Errors produced by the conversation pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// An attachment is not a well-formed base64 data URL.
    #[error("malformed attachment payload: {0}")]
    MalformedPayload(String),

    /// The user turn has neither text nor attachments.
    #[error("a turn needs text or at least one attachment")]
    EmptyTurn,

    /// A turn violates the shape a commit or edit requires.
    #[error("invalid turn: {0}")]
    InvalidTurn(String),

    /// The model service rejected or failed the generation.
    #[error("generation failed ({kind}): {message}")]
    UpstreamGeneration { kind: ErrorKind, message: String },

    #[error("turn {0} not found")]
    NotFound(TurnId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    #[inline]
    pub(crate) fn upstream<E: palaver_model::ModelProviderError + ?Sized>(
        err: &E,
    ) -> Self {
        Error::UpstreamGeneration {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Whether the caller should fix the request rather than retry it.
    #[inline]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedPayload(_) | Error::EmptyTurn | Error::InvalidTurn(_)
        )
    }
}
