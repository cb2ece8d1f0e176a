//! A local fake model for testing purpose.

mod preset;

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use palaver_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[derive(Default)]
struct Counters {
    requests: Mutex<Vec<ModelRequest>>,
    events_emitted: AtomicUsize,
    responses_dropped: AtomicUsize,
}

/// Observes what a [`TestModelProvider`] (and all of its clones) did.
#[derive(Clone, Default)]
pub struct TestModelStats(Arc<Counters>);

impl TestModelStats {
    /// Returns every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.0
            .requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    #[inline]
    pub fn request_count(&self) -> usize {
        self.requests().len()
    }

    /// Number of events handed out by all responses.
    #[inline]
    pub fn events_emitted(&self) -> usize {
        self.0.events_emitted.load(Ordering::SeqCst)
    }

    /// Number of responses that have been dropped.
    #[inline]
    pub fn responses_dropped(&self) -> usize {
        self.0.responses_dropped.load(Ordering::SeqCst)
    }
}

impl Debug for TestModelStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestModelStats")
            .field("request_count", &self.request_count())
            .field("events_emitted", &self.events_emitted())
            .field("responses_dropped", &self.responses_dropped())
            .finish()
    }
}

pub struct TestModelResponse {
    events: Vec<PresetEvent>,
    event_idx: usize,
    done: bool,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
    stats: TestModelStats,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.done {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            let event = if this.event_idx < this.events.len() {
                match &this.events[this.event_idx] {
                    PresetEvent::MessageDelta(msg) => {
                        ModelResponseEvent::MessageDelta(msg.clone())
                    }
                    PresetEvent::Failure(msg) => {
                        this.done = true;
                        return Poll::Ready(Err(Error {
                            message: msg.clone(),
                            kind: ErrorKind::Other,
                        }));
                    }
                    PresetEvent::Truncation => {
                        this.done = true;
                        return Poll::Ready(Ok(None));
                    }
                }
            } else {
                this.done = true;
                ModelResponseEvent::Completed(ModelFinishReason::Stop)
            };
            this.event_idx += 1;
            this.stats.0.events_emitted.fetch_add(1, Ordering::SeqCst);
            return Poll::Ready(Ok(Some(event)));
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

impl Drop for TestModelResponse {
    fn drop(&mut self) {
        self.stats
            .0
            .responses_dropped
            .fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
enum ConversationStep {
    UserInput,
    AssistantResponse(PresetResponse),
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to a request. The step is selected by the
/// number of contents in the request, so a request carrying one user turn
/// picks step `1`. If there are no enough steps in the script, the default
/// response is used, and without one an error is returned.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<ConversationStep>,
    default_response: Option<PresetResponse>,
    delay: Option<Duration>,
    stats: TestModelStats,
}

impl TestModelProvider {
    /// Creates a provider answering every request with `preset`.
    #[inline]
    pub fn always(preset: PresetResponse) -> Self {
        let mut provider = Self::default();
        provider.set_default_response(preset);
        provider
    }

    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.conversation_script
            .push(ConversationStep::AssistantResponse(preset));
    }

    #[inline]
    pub fn add_user_input_step(&mut self) {
        self.conversation_script.push(ConversationStep::UserInput);
    }

    #[inline]
    pub fn set_default_response(&mut self, preset: PresetResponse) {
        self.default_response = Some(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns a handle observing this provider and its clones.
    #[inline]
    pub fn stats(&self) -> TestModelStats {
        self.stats.clone()
    }

    fn select_step(&self, req: &ModelRequest) -> Result<&PresetResponse, Error> {
        let step_idx = req.contents.len();
        match self.conversation_script.get(step_idx) {
            Some(ConversationStep::AssistantResponse(response)) => Ok(response),
            Some(ConversationStep::UserInput) => Err(Error {
                message: "not an assistant response step".to_owned(),
                kind: ErrorKind::InvalidRequest,
            }),
            None => self.default_response.as_ref().ok_or_else(|| Error {
                message: "no enough steps".to_owned(),
                kind: ErrorKind::RateLimitExceeded,
            }),
        }
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        if let Ok(mut requests) = self.stats.0.requests.lock() {
            requests.push(req.clone());
        }

        let result = self.select_step(req).and_then(|preset| {
            if let Some(rejection) = &preset.rejection {
                return Err(Error {
                    message: rejection.clone(),
                    kind: ErrorKind::InvalidRequest,
                });
            }
            Ok(TestModelResponse {
                events: preset.events.clone(),
                event_idx: 0,
                done: false,
                delay: self.delay.unwrap_or(Duration::from_millis(1)),
                sleep: None,
                stats: self.stats.clone(),
            })
        });
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use palaver_model::{ModelContent, ModelRequest, ModelRole};

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> Result<String, Error> {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        loop {
            let event =
                poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?;
            match event {
                Some(ModelResponseEvent::Completed(_)) | None => break,
                Some(ModelResponseEvent::MessageDelta(delta)) => {
                    msg.push_str(&delta);
                }
            }
        }
        Ok(msg)
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_deltas([
            "Hello, ", "world!",
        ]));
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_deltas([
            "Sure, ",
            "let me take a ",
            "look.",
        ]));

        let mut req = ModelRequest {
            system_instruction: None,
            contents: vec![ModelContent::text(ModelRole::User, "Hi")],
        };
        let resp = provider.send_request(&req).await.unwrap();
        let msg = collect_response(resp).await.unwrap();
        assert_eq!(msg, "Hello, world!");

        req.contents.push(ModelContent::text(ModelRole::Model, msg));
        req.contents
            .push(ModelContent::text(ModelRole::User, "Check my todo"));
        let resp = provider.send_request(&req).await.unwrap();
        let msg = collect_response(resp).await.unwrap();
        assert_eq!(msg, "Sure, let me take a look.");

        let stats = provider.stats();
        assert_eq!(stats.request_count(), 2);
        assert_eq!(stats.responses_dropped(), 2);
        // Five deltas plus two completion events.
        assert_eq!(stats.events_emitted(), 7);
    }

    #[tokio::test]
    async fn test_rejection_and_failure() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(
            PresetResponse::default().with_rejection("quota exceeded"),
        );
        let req = ModelRequest {
            system_instruction: None,
            contents: vec![ModelContent::text(ModelRole::User, "Hi")],
        };
        let err = provider.send_request(&req).await.err().unwrap();
        assert_eq!(err.message(), "quota exceeded");

        let provider = TestModelProvider::always(PresetResponse::with_events([
            PresetEvent::MessageDelta("par".to_owned()),
            PresetEvent::Failure("reset".to_owned()),
            PresetEvent::MessageDelta("never".to_owned()),
        ]));
        let resp = provider.send_request(&req).await.unwrap();
        let err = collect_response(resp).await.unwrap_err();
        assert_eq!(err.message(), "reset");
    }

    #[tokio::test]
    async fn test_missing_steps() {
        let provider = TestModelProvider::default();
        let req = ModelRequest {
            system_instruction: None,
            contents: vec![ModelContent::text(ModelRole::User, "Hi")],
        };
        let err = provider.send_request(&req).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
    }
}
