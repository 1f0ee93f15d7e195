use crate::core::ChangeType;
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{Level, event};

/// Listener on a controller's change-type stream.
///
/// Only events published after the listener was created are observed.
pub struct ChangeEvents {
    receiver: broadcast::Receiver<ChangeType>,
}

impl ChangeEvents {
    pub(crate) fn new(receiver: broadcast::Receiver<ChangeType>) -> Self {
        Self { receiver }
    }

    /// Next change type; `None` once the controller is gone.
    ///
    /// Events missed by a lagging listener are skipped.
    pub async fn next(&mut self) -> Option<ChangeType> {
        loop {
            match self.receiver.recv().await {
                Ok(kind) => return Some(kind),
                Err(RecvError::Lagged(skipped)) => {
                    event!(Level::WARN, skipped, "change listener lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published change type, without waiting.
    pub fn try_next(&mut self) -> Option<ChangeType> {
        loop {
            match self.receiver.try_recv() {
                Ok(kind) => return Some(kind),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ChangeType> + Send + 'static {
        futures::stream::unfold(self, |mut events| async move {
            events.next().await.map(|kind| (kind, events))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_late_listener_sees_only_future_events() {
        let (tx, _keep) = broadcast::channel(8);
        tx.send(ChangeType::Inserted).unwrap();

        let mut late = ChangeEvents::new(tx.subscribe());
        assert_eq!(late.try_next(), None);
        tx.send(ChangeType::Deleted).unwrap();
        assert_eq!(late.next().await, Some(ChangeType::Deleted));
    }

    #[tokio::test]
    async fn test_lagging_listener_skips_missed_events() {
        let (tx, rx) = broadcast::channel(2);
        let mut events = ChangeEvents::new(rx);
        tx.send(ChangeType::Inserted).unwrap();
        tx.send(ChangeType::Updated).unwrap();
        tx.send(ChangeType::Deleted).unwrap();
        assert_eq!(events.next().await, Some(ChangeType::Updated));
        assert_eq!(events.next().await, Some(ChangeType::Deleted));
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_dropped() {
        let (tx, rx) = broadcast::channel(4);
        let stream = ChangeEvents::new(rx).into_stream();
        tx.send(ChangeType::Inserted).unwrap();
        drop(tx);
        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected, vec![ChangeType::Inserted]);
    }
}
