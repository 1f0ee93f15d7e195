use crate::core::{ChangeType, EntityId, IndexPath};

/// One object-level change produced by folding history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectChange {
    pub id: EntityId,
    pub kind: ChangeType,
    /// Position before the change; `None` for inserts.
    pub index_path: Option<IndexPath>,
    /// Position after the change; `None` for deletes.
    pub new_index_path: Option<IndexPath>,
}

/// Ordered object changes produced by one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changes: Vec<ObjectChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&mut self, id: EntityId, at: IndexPath) {
        self.changes.push(ObjectChange {
            id,
            kind: ChangeType::Inserted,
            index_path: None,
            new_index_path: Some(at),
        });
    }

    pub fn record_update(&mut self, id: EntityId, at: IndexPath) {
        self.changes.push(ObjectChange {
            id,
            kind: ChangeType::Updated,
            index_path: Some(at),
            new_index_path: Some(at),
        });
    }

    pub fn record_delete(&mut self, id: EntityId, at: IndexPath) {
        self.changes.push(ObjectChange {
            id,
            kind: ChangeType::Deleted,
            index_path: Some(at),
            new_index_path: None,
        });
    }

    pub fn changes(&self) -> &[ObjectChange] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn count(&self, kind: ChangeType) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectChange> {
        self.changes.iter()
    }
}
