//! Forwards a [`Completion`] to a channel as it is produced.

use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::completion::Completion;
use crate::error::Error;

/// How a relay ended.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The upstream finished and every fragment was delivered.
    Completed { fragments: Vec<String> },
    /// The receiver went away; `fragments` holds what was delivered.
    Disconnected { fragments: Vec<String> },
    /// The upstream failed after `fragments`; the error went to the sink.
    Failed { fragments: Vec<String> },
}

impl RelayOutcome {
    /// Fragments delivered before the relay ended.
    #[inline]
    pub fn fragments(&self) -> &[String] {
        match self {
            RelayOutcome::Completed { fragments }
            | RelayOutcome::Disconnected { fragments }
            | RelayOutcome::Failed { fragments } => fragments,
        }
    }

    /// The concatenated reply, only when generation ran to the end.
    pub fn into_reply(self) -> Option<String> {
        match self {
            RelayOutcome::Completed { fragments } => Some(fragments.concat()),
            _ => None,
        }
    }
}

/// Pulls `completion` and sends each fragment into `sink`.
///
/// Stops pulling as soon as the receiving half is dropped; the completion
/// is dropped along with it. The sink is closed when this returns.
pub async fn relay(
    mut completion: Completion,
    sink: mpsc::Sender<Result<String, Error>>,
) -> RelayOutcome {
    let mut fragments = vec![];
    loop {
        let next = tokio::select! {
            biased;
            _ = sink.closed() => {
                debug!(delivered = fragments.len(), "receiver went away");
                return RelayOutcome::Disconnected { fragments };
            }
            next = completion.next() => next,
        };
        match next {
            Some(Ok(fragment)) => {
                trace!("relaying fragment of {} bytes", fragment.len());
                if sink.send(Ok(fragment.clone())).await.is_err() {
                    debug!(delivered = fragments.len(), "receiver went away");
                    return RelayOutcome::Disconnected { fragments };
                }
                fragments.push(fragment);
            }
            Some(Err(err)) => {
                error!("completion failed mid-stream: {err}");
                sink.send(Err(err)).await.ok();
                return RelayOutcome::Failed { fragments };
            }
            None => return RelayOutcome::Completed { fragments },
        }
    }
}
