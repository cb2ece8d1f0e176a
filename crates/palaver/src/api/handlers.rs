//! Request handlers for every endpoint.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use palaver_core::{
    Attachment, NewTurn, RelayOutcome, Turn, TurnId, build_user_content, relay,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::error::ApiError;
use super::state::AppState;

// =============================================================================
// Request and response types
// =============================================================================

/// Body of `POST /api/chat`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attached_files: Vec<AttachedFile>,
}

/// An upload as sent by the browser.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedFile {
    /// A base64 data URL.
    pub file_data: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub id: TurnId,
    pub new_text: String,
}

/// Body of `POST /api/chat/save-response`, the turn pair to persist.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponseRequest {
    pub user_message: NewTurn,
    pub model_response: NewTurn,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<Turn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    #[inline]
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_owned(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /api/chat - stream the reply to a new user turn as plain text.
///
/// Nothing is persisted here; the client saves the finished pair through
/// `save-response`.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let attachments = parse_attachments(req.attached_files);
    // Reject an empty turn before touching the store.
    build_user_content(req.message.as_deref(), &attachments)?;

    let history = state.conversation.materialize().await?;
    let completion = state
        .completer
        .complete(history, req.message.as_deref(), &attachments)
        .await?;

    // A single slot, so every fragment is flushed as soon as it arrives.
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        match relay(completion, tx).await {
            RelayOutcome::Completed { fragments } => {
                debug!("streamed {} fragments", fragments.len());
            }
            RelayOutcome::Disconnected { fragments } => {
                info!("client went away after {} fragments", fragments.len());
            }
            RelayOutcome::Failed { fragments } => {
                warn!("stream aborted after {} fragments", fragments.len());
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}

/// Decodes uploads, dropping the ones that are not valid data URLs.
fn parse_attachments(files: Vec<AttachedFile>) -> Vec<Attachment> {
    files
        .into_iter()
        .filter_map(|file| {
            match Attachment::from_data_url(
                &file.file_data,
                file.file_type.as_deref(),
                file.file_name.clone(),
            ) {
                Ok(attachment) => Some(attachment),
                Err(err) => {
                    warn!(file_name = ?file.file_name, "dropping attachment: {err}");
                    None
                }
            }
        })
        .collect()
}

/// GET /api/chat/history - every turn, oldest first.
pub async fn history(
    State(state): State<AppState>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state.conversation.history().await?;
    Ok(Json(HistoryResponse { history }))
}

/// POST /api/chat/clear
pub async fn clear(
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.conversation.clear_all().await?;
    Ok(MessageResponse::new("Chat history cleared"))
}

/// POST /api/chat/edit - replace the leading text of a turn.
pub async fn edit(
    State(state): State<AppState>,
    payload: Result<Json<EditRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(req) = payload?;
    state.conversation.edit_text(&req.id, &req.new_text).await?;
    Ok(MessageResponse::new("Message updated"))
}

/// POST /api/chat/save-response
pub async fn save_response(
    State(state): State<AppState>,
    payload: Result<Json<SaveResponseRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(req) = payload?;
    state
        .conversation
        .commit(req.user_message, req.model_response)
        .await?;
    Ok(MessageResponse::new("Messages saved"))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
}
