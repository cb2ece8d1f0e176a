use palaver_core::{Completer, Conversation};

/// State shared by every handler.
///
/// Both fields are cheap to clone.
#[derive(Clone, Debug)]
pub struct AppState {
    pub conversation: Conversation,
    pub completer: Completer,
}

impl AppState {
    #[inline]
    pub fn new(conversation: Conversation, completer: Completer) -> Self {
        Self {
            conversation,
            completer,
        }
    }
}
