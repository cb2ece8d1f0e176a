//! An HTTP chat service relaying conversations to a generative model.
//!
//! The crate includes a CLI for serving the API and for chatting in the
//! terminal. The router is also usable as a library.

#[macro_use]
extern crate tracing;

pub mod api;

pub use api::{AppState, create_router};

/// The instruction sent with every request unless overridden.
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("./system_prompt.md");

/// Re-exports of [`palaver_core`] crate.
pub mod core {
    pub use palaver_core::*;
}
