use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identity of a persisted entity, independent of any in-memory copy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Generates a fresh random identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

/// Checkpoint marking how much change history has been processed.
///
/// Tokens are totally ordered; a transaction is "newer" than a checkpoint when
/// its token compares greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HistoryToken(u64);

impl HistoryToken {
    pub const fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    pub const fn sequence(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for HistoryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Inserted,
    Updated,
    Deleted,
}

impl ChangeType {
    pub const ALL: [ChangeType; 3] = [ChangeType::Inserted, ChangeType::Deleted, ChangeType::Updated];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Inserted => "inserted",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeType,
    pub id: EntityId,
}

impl Change {
    pub fn inserted(id: EntityId) -> Self {
        Self { kind: ChangeType::Inserted, id }
    }

    pub fn updated(id: EntityId) -> Self {
        Self { kind: ChangeType::Updated, id }
    }

    pub fn deleted(id: EntityId) -> Self {
        Self { kind: ChangeType::Deleted, id }
    }
}

/// A batch of changes recorded atomically by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub token: HistoryToken,
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub changes: Vec<Change>,
}

/// Position of an item: section first, then item within the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexPath {
    pub section: usize,
    pub item: usize,
}

impl IndexPath {
    pub const fn new(section: usize, item: usize) -> Self {
        Self { section, item }
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.section, self.item)
    }
}

/// A model object that can be fetched and observed.
pub trait PersistentModel: Clone + Send + Sync + 'static {
    fn persistent_id(&self) -> EntityId;

    /// Stringified value at `key_path`, used for section grouping.
    fn value_for_key_path(&self, key_path: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_path_is_section_then_item() {
        let path = IndexPath::new(2, 7);
        assert_eq!(path.section, 2);
        assert_eq!(path.item, 7);
        assert_eq!(path.to_string(), "[2, 7]");
        assert!(IndexPath::new(0, 9) < IndexPath::new(1, 0));
    }
}
