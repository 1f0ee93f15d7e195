use super::Shared;
use crate::context::{PersistenceContext, SaveNotification, SaveNotificationSource};
use crate::core::{FetchError, PersistentModel, Result};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Level, event};

/// What a received notification asks the bridge to do.
enum Trigger {
    Replay,
    Ignore,
    Closed,
}

fn classify(received: std::result::Result<SaveNotification, RecvError>) -> Trigger {
    match received {
        Ok(notification) => {
            let relevant = notification.relevant();
            if relevant.is_empty() {
                Trigger::Ignore
            } else {
                event!(Level::DEBUG, notification = ?relevant, "save notification received");
                Trigger::Replay
            }
        }
        // Missed notifications may have carried changes.
        Err(RecvError::Lagged(skipped)) => {
            event!(Level::WARN, skipped, "save notifications lagged");
            Trigger::Replay
        }
        Err(RecvError::Closed) => Trigger::Closed,
    }
}

/// Drains notifications queued while a pass ran.
///
/// Returns `Some(true)` when at least one of them asks for another pass,
/// `None` once the source has closed and nothing is pending.
fn drain_pending(receiver: &mut broadcast::Receiver<SaveNotification>) -> Option<bool> {
    let mut pending = false;
    loop {
        match receiver.try_recv() {
            Ok(notification) => pending |= !notification.relevant().is_empty(),
            Err(TryRecvError::Lagged(_)) => pending = true,
            Err(TryRecvError::Empty) => return Some(pending),
            Err(TryRecvError::Closed) => return if pending { Some(true) } else { None },
        }
    }
}

/// Background task that turns save notifications into replay passes.
///
/// Passes never overlap: a notification that arrives mid-pass waits in the
/// receiver and, with coalescing enabled, all such notifications collapse
/// into exactly one follow-up pass.
pub(crate) struct NotificationBridge {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl NotificationBridge {
    pub(crate) fn spawn<E, C>(
        shared: &Arc<Shared<E, C>>,
        receiver: broadcast::Receiver<SaveNotification>,
    ) -> Self
    where
        E: PersistentModel,
        C: PersistenceContext<E> + SaveNotificationSource,
    {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let coalesce = shared.config.coalesce_notifications;
        let join_handle = tokio::spawn(run_bridge(
            Arc::downgrade(shared),
            receiver,
            stop_rx,
            coalesce,
        ));

        Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the task to stop and waits for it to finish.
    pub(crate) async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| FetchError::IoError(format!("notification bridge join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for NotificationBridge {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

async fn run_bridge<E, C>(
    shared: Weak<Shared<E, C>>,
    mut receiver: broadcast::Receiver<SaveNotification>,
    mut stop_rx: oneshot::Receiver<()>,
    coalesce: bool,
) where
    E: PersistentModel,
    C: PersistenceContext<E> + SaveNotificationSource,
{
    loop {
        let received = tokio::select! {
            _ = &mut stop_rx => break,
            received = receiver.recv() => received,
        };
        match classify(received) {
            Trigger::Replay => {}
            Trigger::Ignore => continue,
            Trigger::Closed => break,
        }

        loop {
            let Some(controller) = shared.upgrade() else {
                return;
            };
            if !controller.is_alive() {
                return;
            }
            // Errors are logged by the replayer; the subscription survives them.
            let _ = controller.replay().await;
            drop(controller);

            if !coalesce {
                break;
            }
            match drain_pending(&mut receiver) {
                Some(true) => continue,
                Some(false) => break,
                None => return,
            }
        }
    }
    event!(Level::DEBUG, "notification bridge stopped");
}
