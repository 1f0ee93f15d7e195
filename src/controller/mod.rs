//! Fetch + live-update controller.
//!
//! A [`FetchedResultsController`] runs an initial query, groups the results
//! into sections and then keeps that section snapshot current by replaying the
//! persistence history whenever the context announces a save.
//!
//! ```ignore
//! let store = Arc::new(ModelStore::<Person>::in_memory("People"));
//! let controller = FetchedResultsController::with_config(
//!     FetchDescriptor::new().sort_by(SortDescriptor::by_key(|p: &Person| p.name.clone())),
//!     store.clone(),
//!     Arc::new(MemoryTokenStore::new()),
//!     ControllerConfig::new().section_key_path("role"),
//! );
//! controller.fetch().await?;
//! let mut changes = controller.changes();
//! store.insert(person)?;
//! store.save()?;
//! assert_eq!(changes.next().await, Some(ChangeType::Inserted));
//! ```

mod bridge;
pub mod config;
pub mod delegate;
pub mod events;
mod query;
mod replayer;

pub use config::ControllerConfig;
pub use delegate::FetchedResultsDelegate;
pub use events::ChangeEvents;
pub use replayer::ReplayReport;

use crate::context::{FetchDescriptor, PersistenceContext, SaveNotificationSource};
use crate::core::{ChangeType, EntityId, FetchError, IndexPath, PersistentModel, Result};
use crate::snapshot::{ChangeSet, SectionInfo, SectionSnapshot};
use crate::storage::CheckpointTokenStore;
use bridge::NotificationBridge;
use delegate::DelegateSlot;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Counters describing a controller's replay activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub replay_passes: u64,
    pub transactions_folded: u64,
    pub failed_passes: u64,
    pub token_write_failures: u64,
}

#[derive(Default)]
struct StatsCounters {
    replay_passes: AtomicU64,
    transactions_folded: AtomicU64,
    failed_passes: AtomicU64,
    token_write_failures: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ControllerStats {
        ControllerStats {
            replay_passes: self.replay_passes.load(Ordering::Relaxed),
            transactions_folded: self.transactions_folded.load(Ordering::Relaxed),
            failed_passes: self.failed_passes.load(Ordering::Relaxed),
            token_write_failures: self.token_write_failures.load(Ordering::Relaxed),
        }
    }
}

struct ControllerState<E> {
    fetched_models: Option<Vec<E>>,
    snapshot: SectionSnapshot,
    objects: HashMap<EntityId, E>,
}

/// State shared between the controller and its notification bridge.
pub(crate) struct Shared<E, C> {
    context: Arc<C>,
    descriptor: FetchDescriptor<E>,
    token_store: Arc<dyn CheckpointTokenStore>,
    config: ControllerConfig,
    state: RwLock<ControllerState<E>>,
    /// Serializes the initial fetch and replay passes.
    replay_lock: tokio::sync::Mutex<()>,
    delegate: DelegateSlot,
    events: broadcast::Sender<ChangeType>,
    stats: StatsCounters,
    alive: AtomicBool,
}

impl<E, C> Shared<E, C>
where
    E: PersistentModel,
    C: PersistenceContext<E> + SaveNotificationSource,
{
    fn read_state(&self) -> RwLockReadGuard<'_, ControllerState<E>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ControllerState<E>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn section_key_path(&self) -> Option<&str> {
        self.config.section_key_path.as_deref()
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Delivers a committed change set to the delegate, then to the event
    /// stream.
    fn publish(&self, changes: &ChangeSet, snapshot: &SectionSnapshot) {
        if let Some(delegate) = self.delegate.get() {
            delegate.controller_will_change_content();
            for change in changes.iter() {
                delegate.controller_did_change_object(change);
            }
            delegate.controller_did_change_content_with(snapshot);
            delegate.controller_did_change_content();
        }
        for change in changes.iter() {
            // No listeners is not an error.
            let _ = self.events.send(change.kind);
        }
    }
}

/// Observes the results of a query and keeps them current as the store changes.
pub struct FetchedResultsController<E, C> {
    shared: Arc<Shared<E, C>>,
    bridge: Mutex<Option<NotificationBridge>>,
}

impl<E, C> FetchedResultsController<E, C>
where
    E: PersistentModel,
    C: PersistenceContext<E> + SaveNotificationSource,
{
    pub fn new(
        descriptor: FetchDescriptor<E>,
        context: Arc<C>,
        token_store: Arc<dyn CheckpointTokenStore>,
    ) -> Self {
        Self::with_config(descriptor, context, token_store, ControllerConfig::default())
    }

    pub fn with_config(
        descriptor: FetchDescriptor<E>,
        context: Arc<C>,
        token_store: Arc<dyn CheckpointTokenStore>,
        config: ControllerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Shared {
            context,
            descriptor,
            token_store,
            config,
            state: RwLock::new(ControllerState {
                fetched_models: None,
                snapshot: SectionSnapshot::new(),
                objects: HashMap::new(),
            }),
            replay_lock: tokio::sync::Mutex::new(()),
            delegate: DelegateSlot::default(),
            events,
            stats: StatsCounters::default(),
            alive: AtomicBool::new(true),
        };
        Self {
            shared: Arc::new(shared),
            bridge: Mutex::new(None),
        }
    }

    /// Registers `delegate` without taking ownership of it.
    pub fn set_delegate<D>(&self, delegate: &Arc<D>)
    where
        D: FetchedResultsDelegate + 'static,
    {
        let delegate: Arc<dyn FetchedResultsDelegate> = delegate.clone();
        self.shared.delegate.set(delegate);
    }

    pub fn clear_delegate(&self) {
        self.shared.delegate.clear();
    }

    pub fn has_delegate(&self) -> bool {
        self.shared.delegate.get().is_some()
    }

    /// Runs the query, rebuilds the sections and starts observing saves.
    ///
    /// Query errors are returned to the caller and leave the previous results
    /// in place.
    pub async fn fetch(&self) -> Result<()> {
        let receiver = self.shared.context.subscribe();
        self.shared.perform_fetch().await?;

        let mut bridge = self.bridge.lock()?;
        if bridge.is_none() {
            *bridge = Some(NotificationBridge::spawn(&self.shared, receiver));
        }
        Ok(())
    }

    /// Replays history immediately instead of waiting for a save.
    ///
    /// Unlike notification-triggered passes, errors are returned.
    pub async fn replay_now(&self) -> Result<ReplayReport> {
        self.shared.replay().await
    }

    /// Model at `index_path`.
    pub fn object(&self, index_path: IndexPath) -> Result<E> {
        let state = self.shared.read_state();
        let snapshot = &state.snapshot;
        let section = snapshot
            .section_identifiers()
            .get(index_path.section)
            .ok_or(FetchError::SectionIndexOutOfBounds {
                index: index_path.section,
                count: snapshot.number_of_sections(),
            })?;
        let ids = snapshot
            .item_identifiers(section)
            .ok_or_else(|| FetchError::SectionNotFound(section.clone()))?;
        let id = ids
            .get(index_path.item)
            .ok_or_else(|| FetchError::ItemIndexOutOfBounds {
                section: section.clone(),
                index: index_path.item,
                count: ids.len(),
            })?;
        state
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| FetchError::ItemNotFound(id.to_string()))
    }

    pub fn index_path(&self, model: &E) -> Option<IndexPath> {
        self.index_path_for_id(&model.persistent_id())
    }

    pub fn index_path_for_id(&self, id: &EntityId) -> Option<IndexPath> {
        self.shared.read_state().snapshot.index_path(id)
    }

    pub fn sections(&self) -> Vec<SectionInfo> {
        self.shared.read_state().snapshot.sections()
    }

    pub fn section_index_titles(&self) -> Vec<String> {
        self.shared.read_state().snapshot.section_identifiers().to_vec()
    }

    pub fn snapshot(&self) -> SectionSnapshot {
        self.shared.read_state().snapshot.clone()
    }

    /// Models from the most recent full fetch; `None` before the first one.
    ///
    /// Replayed changes do not refresh this list.
    pub fn fetched_models(&self) -> Option<Vec<E>> {
        self.shared.read_state().fetched_models.clone()
    }

    /// Listener for change types published from now on.
    pub fn changes(&self) -> ChangeEvents {
        ChangeEvents::new(self.shared.events.subscribe())
    }

    pub fn stats(&self) -> ControllerStats {
        self.shared.stats.snapshot()
    }

    pub fn is_monitoring(&self) -> bool {
        self.bridge
            .lock()
            .map(|bridge| bridge.as_ref().is_some_and(NotificationBridge::is_running))
            .unwrap_or(false)
    }

    /// Stops observing saves and waits for the bridge task to finish.
    pub async fn stop_monitoring(&self) -> Result<()> {
        let bridge = self.bridge.lock()?.take();
        if let Some(bridge) = bridge {
            bridge.stop().await?;
        }
        Ok(())
    }
}

impl<E, C> Drop for FetchedResultsController<E, C> {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        // Dropping the bridge signals and aborts its task.
        let bridge = match self.bridge.get_mut() {
            Ok(bridge) => bridge.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(bridge);
    }
}
