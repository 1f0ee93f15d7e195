//! In-memory persistence context with a history log.

use crate::context::{
    FetchDescriptor, HistoryDescriptor, PersistenceContext, SaveNotification,
    SaveNotificationSource,
};
use crate::core::{
    Change, ChangeType, EntityId, FetchError, HistoryToken, PersistentModel, Result, Transaction,
};
use crate::storage::StoreConfiguration;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{Level, event};

const NOTIFICATION_CAPACITY: usize = 64;

struct StoreState<E> {
    models: Vec<E>,
    pending: Vec<Change>,
    history: Vec<Transaction>,
    last_token: HistoryToken,
}

/// Stores models in insertion order and records every save as a transaction.
///
/// Changes are staged with [`insert`](Self::insert), [`update`](Self::update)
/// and [`delete`](Self::delete) and become visible in history when
/// [`save`](Self::save) commits them.
pub struct ModelStore<E> {
    schema: String,
    configurations: Vec<StoreConfiguration>,
    state: Mutex<StoreState<E>>,
    notifications: broadcast::Sender<SaveNotification>,
}

impl<E: PersistentModel> ModelStore<E> {
    pub fn new(schema: impl Into<String>, configurations: Vec<StoreConfiguration>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            schema: schema.into(),
            configurations,
            state: Mutex::new(StoreState {
                models: Vec::new(),
                pending: Vec::new(),
                history: Vec::new(),
                last_token: HistoryToken::new(0),
            }),
            notifications,
        }
    }

    /// A store with a single in-memory configuration.
    pub fn in_memory(schema: impl Into<String>) -> Self {
        let schema = schema.into();
        let configuration = StoreConfiguration::in_memory("Default", schema.clone());
        Self::new(schema, vec![configuration])
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn configurations(&self) -> &[StoreConfiguration] {
        &self.configurations
    }

    pub fn insert(&self, model: E) -> Result<()> {
        let mut state = self.state.lock()?;
        let id = model.persistent_id();
        if state.models.iter().any(|m| m.persistent_id() == id) {
            return Err(FetchError::QueryFailed(format!("Model '{}' already exists", id)));
        }
        state.models.push(model);
        state.pending.push(Change::inserted(id));
        Ok(())
    }

    pub fn update(&self, model: E) -> Result<()> {
        let mut state = self.state.lock()?;
        let id = model.persistent_id();
        let slot = state
            .models
            .iter_mut()
            .find(|m| m.persistent_id() == id)
            .ok_or_else(|| FetchError::ItemNotFound(id.to_string()))?;
        *slot = model;

        // One staged insert or update per id is enough for a reload.
        let already_staged = state
            .pending
            .iter()
            .any(|c| c.id == id && matches!(c.kind, ChangeType::Inserted | ChangeType::Updated));
        if !already_staged {
            state.pending.push(Change::updated(id));
        }
        Ok(())
    }

    pub fn delete(&self, id: &EntityId) -> Result<()> {
        let mut state = self.state.lock()?;
        let position = state
            .models
            .iter()
            .position(|m| m.persistent_id() == *id)
            .ok_or_else(|| FetchError::ItemNotFound(id.to_string()))?;
        state.models.remove(position);

        let staged_insert = state
            .pending
            .iter()
            .any(|c| c.id == *id && c.kind == ChangeType::Inserted);
        state.pending.retain(|c| c.id != *id);
        if !staged_insert {
            state.pending.push(Change::deleted(id.clone()));
        }
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        self.state.lock().map(|s| !s.pending.is_empty()).unwrap_or(false)
    }

    /// Commits staged changes as one transaction and announces it.
    ///
    /// Returns the new transaction's token, or `None` when nothing was staged.
    pub fn save(&self) -> Result<Option<HistoryToken>> {
        self.save_as(None)
    }

    pub fn save_as(&self, author: Option<&str>) -> Result<Option<HistoryToken>> {
        let transaction = {
            let mut state = self.state.lock()?;
            if state.pending.is_empty() {
                return Ok(None);
            }
            let token = state.last_token.next();
            state.last_token = token;
            let transaction = Transaction {
                token,
                author: author.map(str::to_string),
                timestamp: Utc::now(),
                changes: std::mem::take(&mut state.pending),
            };
            state.history.push(transaction.clone());
            transaction
        };

        let mut notification = SaveNotification::new();
        for change in &transaction.changes {
            notification.push(change.kind, change.id.clone());
        }
        event!(
            Level::DEBUG,
            token = %transaction.token,
            changes = transaction.changes.len(),
            "model store saved"
        );
        // No receivers is fine: nobody is observing yet.
        let _ = self.notifications.send(notification);
        Ok(Some(transaction.token))
    }

    /// Token of the most recent transaction, if any.
    pub fn current_token(&self) -> Option<HistoryToken> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.history.last().map(|t| t.token))
    }

    /// Broadcasts an arbitrary notification without touching history.
    pub fn post(&self, notification: SaveNotification) {
        let _ = self.notifications.send(notification);
    }
}

#[async_trait]
impl<E: PersistentModel> PersistenceContext<E> for ModelStore<E> {
    async fn fetch(&self, descriptor: &FetchDescriptor<E>) -> Result<Vec<E>> {
        let models = self.state.lock()?.models.clone();
        Ok(descriptor.apply(models))
    }

    async fn fetch_model(&self, id: &EntityId) -> Result<Option<E>> {
        let state = self.state.lock()?;
        Ok(state.models.iter().find(|m| m.persistent_id() == *id).cloned())
    }

    async fn fetch_history(&self, descriptor: &HistoryDescriptor) -> Result<Vec<Transaction>> {
        let state = self.state.lock()?;
        Ok(state
            .history
            .iter()
            .filter(|t| descriptor.includes(&t.token))
            .cloned()
            .collect())
    }
}

impl<E: PersistentModel> SaveNotificationSource for ModelStore<E> {
    fn subscribe(&self) -> broadcast::Receiver<SaveNotification> {
        self.notifications.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: EntityId,
        title: String,
    }

    impl PersistentModel for Note {
        fn persistent_id(&self) -> EntityId {
            self.id.clone()
        }

        fn value_for_key_path(&self, key_path: &str) -> Option<String> {
            (key_path == "title").then(|| self.title.clone())
        }
    }

    fn note(id: &str, title: &str) -> Note {
        Note { id: EntityId::new(id), title: title.to_string() }
    }

    #[tokio::test]
    async fn test_save_records_transactions_in_token_order() {
        let store = ModelStore::in_memory("Notes");
        store.insert(note("1", "a")).unwrap();
        assert_eq!(store.save().unwrap(), Some(HistoryToken::new(1)));
        store.insert(note("2", "b")).unwrap();
        store.delete(&EntityId::new("1")).unwrap();
        assert_eq!(store.save().unwrap(), Some(HistoryToken::new(2)));
        assert_eq!(store.save().unwrap(), None);

        let history = store.fetch_history(&HistoryDescriptor::after(None)).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].changes, vec![
            Change::inserted(EntityId::new("2")),
            Change::deleted(EntityId::new("1")),
        ]);

        let newer = store
            .fetch_history(&HistoryDescriptor::after(Some(HistoryToken::new(1))))
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].token, HistoryToken::new(2));
    }

    #[tokio::test]
    async fn test_insert_then_delete_before_save_cancels_out() {
        let store = ModelStore::in_memory("Notes");
        store.insert(note("1", "a")).unwrap();
        store.update(note("1", "b")).unwrap();
        store.delete(&EntityId::new("1")).unwrap();
        assert!(!store.has_changes());
        assert_eq!(store.save().unwrap(), None);
    }

    #[tokio::test]
    async fn test_repeated_updates_stage_one_change() {
        let store = ModelStore::in_memory("Notes");
        store.insert(note("1", "a")).unwrap();
        store.save().unwrap();
        store.update(note("1", "b")).unwrap();
        store.update(note("1", "c")).unwrap();
        store.update(note("1", "d")).unwrap();
        store.save().unwrap();

        let newer = store
            .fetch_history(&HistoryDescriptor::after(Some(HistoryToken::new(1))))
            .await
            .unwrap();
        assert_eq!(newer[0].changes, vec![Change::updated(EntityId::new("1"))]);
        let current = store.fetch_model(&EntityId::new("1")).await.unwrap().unwrap();
        assert_eq!(current.title, "d");
    }

    #[tokio::test]
    async fn test_save_broadcasts_notification() {
        let store = ModelStore::in_memory("Notes");
        let mut rx = store.subscribe();
        store.insert(note("1", "a")).unwrap();
        store.save_as(Some("tests")).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.ids(ChangeType::Inserted), &[EntityId::new("1")]);
        let history = store.fetch_history(&HistoryDescriptor::default()).await.unwrap();
        assert_eq!(history[0].author.as_deref(), Some("tests"));
    }

    #[tokio::test]
    async fn test_fetch_model_reads_current_state() {
        let store = ModelStore::in_memory("Notes");
        store.insert(note("1", "a")).unwrap();
        store.save().unwrap();
        store.update(note("1", "z")).unwrap();
        let current = store.fetch_model(&EntityId::new("1")).await.unwrap().unwrap();
        assert_eq!(current.title, "z");
        assert!(store.fetch_model(&EntityId::new("2")).await.unwrap().is_none());
        assert!(matches!(
            store.update(note("9", "x")),
            Err(FetchError::ItemNotFound(_))
        ));
    }
}
