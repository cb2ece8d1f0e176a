//! Streaming generation of the model turn.

use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use futures_util::Stream;
use palaver_model::{
    ErrorKind, ModelContent, ModelFinishReason, ModelPart, ModelProvider,
    ModelRequest, ModelResponseEvent, ModelRole,
};
use tokio::time::timeout;

use crate::error::Error;
use crate::model_client::{EventStream, ModelClient};
use crate::turn::Attachment;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Completer`] builder.
pub struct CompleterBuilder {
    model_client: ModelClient,
    system_instruction: Option<String>,
    request_timeout: Duration,
}

impl CompleterBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_instruction: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the instruction sent alongside every request.
    #[inline]
    pub fn with_system_instruction<S: Into<String>>(
        mut self,
        instruction: S,
    ) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Bounds the time the service may take to accept a request.
    #[inline]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[inline]
    pub fn build(self) -> Completer {
        Completer {
            model_client: self.model_client,
            system_instruction: self.system_instruction.map(Arc::from),
            request_timeout: self.request_timeout,
        }
    }
}

/// Issues streaming generation requests for new user turns.
#[derive(Clone)]
pub struct Completer {
    model_client: ModelClient,
    system_instruction: Option<Arc<str>>,
    request_timeout: Duration,
}

impl Completer {
    #[inline]
    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    /// Sends `history` followed by a new user turn, returning the reply as
    /// a stream of text fragments.
    ///
    /// Fails with [`Error::EmptyTurn`] before any I/O when the user turn
    /// would be empty.
    pub async fn complete(
        &self,
        history: Vec<ModelContent>,
        user_text: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<Completion, Error> {
        let user_content = build_user_content(user_text, attachments)?;
        let mut contents = history;
        contents.push(user_content);
        let req = ModelRequest {
            system_instruction: self.system_instruction.as_deref().map(str::to_owned),
            contents,
        };

        debug!(contents = req.contents.len(), "requesting completion");
        let events = timeout(
            self.request_timeout,
            self.model_client.send_request(req),
        )
        .await
        .map_err(|_| {
            error!("request not accepted within {:?}", self.request_timeout);
            Error::UpstreamGeneration {
                kind: ErrorKind::Other,
                message: "request timed out".to_owned(),
            }
        })??;
        Ok(Completion::new(events))
    }
}

impl Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("system_instruction", &self.system_instruction)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Builds the model content of a new user turn: the text first, then one
/// binary part per attachment.
pub fn build_user_content(
    text: Option<&str>,
    attachments: &[Attachment],
) -> Result<ModelContent, Error> {
    let text = text.filter(|t| !t.is_empty());
    if text.is_none() && attachments.is_empty() {
        return Err(Error::EmptyTurn);
    }
    let mut parts = Vec::with_capacity(attachments.len() + 1);
    if let Some(text) = text {
        parts.push(ModelPart::Text(text.to_owned()));
    }
    parts.extend(attachments.iter().map(|a| ModelPart::Binary {
        mime_type: a.mime_type.clone(),
        data: a.data.clone(),
    }));
    Ok(ModelContent {
        role: ModelRole::User,
        parts,
    })
}

/// The reply being generated, as a stream of text fragments.
///
/// A failure is yielded once as an error, after which the stream ends. A
/// provider stream that ends without a finish reason counts as a failure.
/// Dropping the completion drops the provider response.
pub struct Completion {
    events: Option<EventStream>,
    finish_reason: Option<ModelFinishReason>,
}

impl Completion {
    #[inline]
    fn new(events: EventStream) -> Self {
        Self {
            events: Some(events),
            finish_reason: None,
        }
    }

    /// The finish reason, once the provider has reported one.
    #[inline]
    pub fn finish_reason(&self) -> Option<ModelFinishReason> {
        self.finish_reason
    }
}

impl Stream for Completion {
    type Item = Result<String, Error>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(events) = &mut this.events else {
                return Poll::Ready(None);
            };
            match ready!(events.as_mut().poll_next(cx)) {
                Some(Ok(ModelResponseEvent::MessageDelta(delta))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(delta)));
                }
                Some(Ok(ModelResponseEvent::Completed(reason))) => {
                    debug!("completion finished: {reason:?}");
                    this.finish_reason = Some(reason);
                }
                Some(Err(err)) => {
                    this.events = None;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.events = None;
                    if this.finish_reason.is_none() {
                        warn!("completion ended without a finish reason");
                        return Poll::Ready(Some(Err(
                            Error::UpstreamGeneration {
                                kind: ErrorKind::Other,
                                message: "stream ended without a finish reason"
                                    .to_owned(),
                            },
                        )));
                    }
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("finished", &self.events.is_none())
            .field("finish_reason", &self.finish_reason)
            .finish()
    }
}
