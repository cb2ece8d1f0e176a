use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use palaver_model::{
    ModelProvider, ModelRequest, ModelResponse, ModelResponseEvent,
};
use tracing::Instrument;

use crate::error::Error;

/// Type-erased stream of provider events.
pub(crate) type EventStream =
    Pin<Box<dyn Stream<Item = Result<ModelResponseEvent, Error>> + Send>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = Result<EventStream, Error>> + Send>>;
type HandlerFn = Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// A wrapper around a model provider that provides a type-erased
/// interface for the other modules.
#[derive(Clone)]
pub(crate) struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // Erase `P` so that `Completer` doesn't need a generic parameter.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!(contents = req.contents.len(), "sending request");
                    match fut.await {
                        Ok(resp) => {
                            let stream: EventStream =
                                Box::pin(ResponseStream::new(resp));
                            Ok(stream)
                        }
                        Err(err) => {
                            error!("request rejected: {err}");
                            Err(Error::upstream(&err))
                        }
                    }
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and returns the event stream of the response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Dropping the returned stream releases
    /// the provider response.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
    ) -> Result<EventStream, Error> {
        (self.handler_fn)(req).await
    }
}

/// Adapts a [`ModelResponse`] to a [`Stream`], fusing after the first error.
struct ResponseStream<R> {
    inner: Option<Pin<Box<R>>>,
}

impl<R: ModelResponse> ResponseStream<R> {
    #[inline]
    fn new(resp: R) -> Self {
        Self {
            inner: Some(Box::pin(resp)),
        }
    }
}

impl<R: ModelResponse> Stream for ResponseStream<R> {
    type Item = Result<ModelResponseEvent, Error>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = &mut this.inner else {
            return Poll::Ready(None);
        };
        match ready!(inner.as_mut().poll_next_event(cx)) {
            Ok(Some(event)) => {
                trace!("got an event: {event:?}");
                Poll::Ready(Some(Ok(event)))
            }
            Ok(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            Err(err) => {
                error!("response failed: {err}");
                this.inner = None;
                Poll::Ready(Some(Err(Error::upstream(&err))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use palaver_model::{
        ErrorKind, ModelContent, ModelFinishReason, ModelRole,
    };
    use palaver_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            system_instruction: None,
            contents: vec![ModelContent::text(ModelRole::User, "Hi")],
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_user_input_step();
        model_provider.add_assistant_response_step(
            PresetResponse::with_deltas(["How ", "are ", "you?"]),
        );
        let model_client = ModelClient::new(model_provider);

        for _ in 0..3 {
            let events: Vec<_> = model_client
                .send_request(request())
                .await
                .unwrap()
                .collect()
                .await;
            let events: Vec<_> =
                events.into_iter().map(Result::unwrap).collect();
            assert_eq!(
                events,
                vec![
                    ModelResponseEvent::MessageDelta("How ".to_owned()),
                    ModelResponseEvent::MessageDelta("are ".to_owned()),
                    ModelResponseEvent::MessageDelta("you?".to_owned()),
                    ModelResponseEvent::Completed(ModelFinishReason::Stop),
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_client = ModelClient::new(TestModelProvider::default());
        let err = model_client.send_request(request()).await.err().unwrap();
        assert!(matches!(
            err,
            Error::UpstreamGeneration {
                kind: ErrorKind::RateLimitExceeded,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stream_fuses_after_error() {
        let provider = TestModelProvider::always(PresetResponse::with_events([
            PresetEvent::Failure("boom".to_owned()),
            PresetEvent::MessageDelta("never".to_owned()),
        ]));
        let stats = provider.stats();
        let mut stream = ModelClient::new(provider)
            .send_request(request())
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(Err(_))));
        assert_eq!(stats.responses_dropped(), 1);
        assert!(stream.next().await.is_none());
    }
}
