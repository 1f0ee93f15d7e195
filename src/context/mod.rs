//! Collaborators the controller runs against: a queryable persistence
//! context and the save notifications it publishes.

pub mod descriptor;
pub mod model_store;

pub use descriptor::{FetchDescriptor, HistoryDescriptor, SortDescriptor, SortOrder};
pub use model_store::ModelStore;

use crate::core::{ChangeType, EntityId, Result, Transaction};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// A context on which model queries and history queries can be run.
#[async_trait]
pub trait PersistenceContext<E>: Send + Sync + 'static {
    /// Runs a model query.
    async fn fetch(&self, descriptor: &FetchDescriptor<E>) -> Result<Vec<E>>;

    /// Reads one model as it exists now, or `None` if it is gone.
    async fn fetch_model(&self, id: &EntityId) -> Result<Option<E>>;

    /// Transactions selected by `descriptor`, ascending by token.
    async fn fetch_history(&self, descriptor: &HistoryDescriptor) -> Result<Vec<Transaction>>;
}

/// Source of save events, injected per controller.
pub trait SaveNotificationSource: Send + Sync + 'static {
    fn subscribe(&self) -> broadcast::Receiver<SaveNotification>;
}

/// Identities touched by one save, grouped by change category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveNotification {
    changes: BTreeMap<ChangeType, Vec<EntityId>>,
}

impl SaveNotification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ChangeType, ids: Vec<EntityId>) -> Self {
        self.changes.entry(kind).or_default().extend(ids);
        self
    }

    pub fn push(&mut self, kind: ChangeType, id: EntityId) {
        self.changes.entry(kind).or_default().push(id);
    }

    pub fn ids(&self, kind: ChangeType) -> &[EntityId] {
        self.changes.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Copy with empty categories removed.
    pub fn relevant(&self) -> SaveNotification {
        let changes = ChangeType::ALL
            .iter()
            .filter_map(|kind| {
                self.changes
                    .get(kind)
                    .filter(|ids| !ids.is_empty())
                    .map(|ids| (*kind, ids.clone()))
            })
            .collect();
        SaveNotification { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.values().all(Vec::is_empty)
    }

    pub fn categories(&self) -> impl Iterator<Item = ChangeType> + '_ {
        self.changes
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(kind, _)| *kind)
    }
}
