#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use fetched_results::{
    Change, ChangeType, CheckpointTokenStore, EntityId, FetchDescriptor, FetchError,
    FetchedResultsDelegate, HistoryDescriptor, HistoryToken, ObjectChange, PersistenceContext,
    PersistentModel, Result, SaveNotification, SaveNotificationSource, SectionSnapshot,
    Transaction,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, broadcast};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: EntityId,
    pub name: String,
    pub role: String,
}

impl PersistentModel for Person {
    fn persistent_id(&self) -> EntityId {
        self.id.clone()
    }

    fn value_for_key_path(&self, key_path: &str) -> Option<String> {
        match key_path {
            "name" => Some(self.name.clone()),
            "role" => Some(self.role.clone()),
            _ => None,
        }
    }
}

pub fn person(id: &str, name: &str, role: &str) -> Person {
    Person {
        id: EntityId::new(id),
        name: name.to_string(),
        role: role.to_string(),
    }
}

pub fn id(raw: &str) -> EntityId {
    EntityId::new(raw)
}

/// Context whose models and history are set directly by the test.
pub struct ScriptedContext {
    models: Mutex<Vec<Person>>,
    history: Mutex<Vec<Transaction>>,
    notifications: broadcast::Sender<SaveNotification>,
    history_calls: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_history: AtomicBool,
    failing_model: Mutex<Option<EntityId>>,
    block_next_history: AtomicBool,
    entered: Notify,
    release: Semaphore,
}

impl ScriptedContext {
    pub fn new() -> Arc<Self> {
        let (notifications, _) = broadcast::channel(64);
        Arc::new(Self {
            models: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            notifications,
            history_calls: AtomicUsize::new(0),
            fail_fetch: AtomicBool::new(false),
            fail_history: AtomicBool::new(false),
            failing_model: Mutex::new(None),
            block_next_history: AtomicBool::new(false),
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    pub fn put(&self, model: Person) {
        let mut models = self.models.lock().unwrap();
        models.retain(|m| m.id != model.id);
        models.push(model);
    }

    pub fn remove(&self, id: &EntityId) {
        self.models.lock().unwrap().retain(|m| m.id != *id);
    }

    pub fn record(&self, token: u64, changes: Vec<Change>) {
        self.history.lock().unwrap().push(Transaction {
            token: HistoryToken::new(token),
            author: None,
            timestamp: Utc::now(),
            changes,
        });
    }

    pub fn notify(&self, kind: ChangeType, ids: Vec<EntityId>) {
        let _ = self.notifications.send(SaveNotification::new().with(kind, ids));
    }

    pub fn post(&self, notification: SaveNotification) {
        let _ = self.notifications.send(notification);
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn set_failing_model(&self, id: Option<EntityId>) {
        *self.failing_model.lock().unwrap() = id;
    }

    /// Makes the next history query wait until [`release`](Self::release).
    pub fn block_next_history(&self) {
        self.block_next_history.store(true, Ordering::SeqCst);
    }

    pub async fn wait_until_blocked(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

#[async_trait]
impl PersistenceContext<Person> for ScriptedContext {
    async fn fetch(&self, descriptor: &FetchDescriptor<Person>) -> Result<Vec<Person>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FetchError::QueryFailed("scripted fetch failure".to_string()));
        }
        let models = self.models.lock().unwrap().clone();
        Ok(descriptor.apply(models))
    }

    async fn fetch_model(&self, id: &EntityId) -> Result<Option<Person>> {
        if self.failing_model.lock().unwrap().as_ref() == Some(id) {
            return Err(FetchError::QueryFailed(format!("scripted failure for {}", id)));
        }
        Ok(self.models.lock().unwrap().iter().find(|m| m.id == *id).cloned())
    }

    async fn fetch_history(&self, descriptor: &HistoryDescriptor) -> Result<Vec<Transaction>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.block_next_history.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.acquire().await.unwrap().forget();
        }
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(FetchError::HistoryFailed("scripted history failure".to_string()));
        }
        let history = self.history.lock().unwrap();
        Ok(history
            .iter()
            .filter(|t| descriptor.includes(&t.token))
            .cloned()
            .collect())
    }
}

impl SaveNotificationSource for ScriptedContext {
    fn subscribe(&self) -> broadcast::Receiver<SaveNotification> {
        self.notifications.subscribe()
    }
}

/// Token store whose writes always fail.
#[derive(Default)]
pub struct FailingTokenStore {
    pub writes: AtomicUsize,
}

#[async_trait]
impl CheckpointTokenStore for FailingTokenStore {
    async fn read(&self) -> Option<HistoryToken> {
        None
    }

    async fn write(&self, _token: HistoryToken) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::IoError("disk full".to_string()))
    }
}

/// Delegate that records every callback it receives.
#[derive(Default)]
pub struct RecordingDelegate {
    pub calls: Mutex<Vec<String>>,
    pub object_changes: Mutex<Vec<ObjectChange>>,
    pub last_snapshot: Mutex<Option<SectionSnapshot>>,
}

impl RecordingDelegate {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl FetchedResultsDelegate for RecordingDelegate {
    fn controller_will_change_content(&self) {
        self.calls.lock().unwrap().push("will_change".to_string());
    }

    fn controller_did_change_object(&self, change: &ObjectChange) {
        self.calls.lock().unwrap().push(format!("did_change_object:{}", change.kind));
        self.object_changes.lock().unwrap().push(change.clone());
    }

    fn controller_did_change_content_with(&self, snapshot: &SectionSnapshot) {
        self.calls.lock().unwrap().push("did_change_content_with".to_string());
        *self.last_snapshot.lock().unwrap() = Some(snapshot.clone());
    }

    fn controller_did_change_content(&self) {
        self.calls.lock().unwrap().push("did_change_content".to_string());
    }
}

/// Delegate implementing none of the callbacks.
pub struct SilentDelegate;

impl FetchedResultsDelegate for SilentDelegate {}
