//! The JSON-over-HTTP surface.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::ApiError;
pub use handlers::{
    AttachedFile, ChatRequest, EditRequest, HealthResponse, HistoryResponse,
    MessageResponse, SaveResponseRequest,
};
pub use routes::create_router;
pub use state::AppState;
