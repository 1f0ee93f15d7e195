//! Section/row state of a fetched result set and the diffs applied to it.

pub mod diff;

pub use diff::{ChangeSet, ObjectChange};

use crate::core::{EntityId, IndexPath, PersistentModel};
use std::collections::{BTreeMap, HashMap};

/// Name of the single section used when results are not grouped.
pub const DEFAULT_SECTION_NAME: &str = "All";

/// Section a model belongs to under `section_key_path`.
///
/// Missing key values group under the empty name.
pub fn section_name_for<E: PersistentModel>(model: &E, section_key_path: Option<&str>) -> String {
    match section_key_path {
        Some(key_path) => model.value_for_key_path(key_path).unwrap_or_default(),
        None => DEFAULT_SECTION_NAME.to_string(),
    }
}

/// Immutable view of one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub name: String,
    pub ids: Vec<EntityId>,
}

impl SectionInfo {
    pub fn number_of_objects(&self) -> usize {
        self.ids.len()
    }
}

/// Ordered mapping from section name to the identities it holds.
///
/// Sections stay sorted by name and an identity is held by at most one
/// section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionSnapshot {
    section_identifiers: Vec<String>,
    items: HashMap<String, Vec<EntityId>>,
}

impl SectionSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups already sorted models into sections, keeping their order.
    pub fn grouped<E: PersistentModel>(models: &[E], section_key_path: Option<&str>) -> Self {
        let mut grouped: BTreeMap<String, Vec<EntityId>> = BTreeMap::new();
        for model in models {
            let id = model.persistent_id();
            let section = grouped.entry(section_name_for(model, section_key_path)).or_default();
            if !section.contains(&id) {
                section.push(id);
            }
        }

        let mut snapshot = Self::new();
        for (name, ids) in grouped {
            snapshot.section_identifiers.push(name.clone());
            snapshot.items.insert(name, ids);
        }
        snapshot
    }

    pub fn section_identifiers(&self) -> &[String] {
        &self.section_identifiers
    }

    pub fn number_of_sections(&self) -> usize {
        self.section_identifiers.len()
    }

    pub fn number_of_items(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.number_of_items() == 0
    }

    pub fn item_identifiers(&self, section: &str) -> Option<&[EntityId]> {
        self.items.get(section).map(Vec::as_slice)
    }

    pub fn sections(&self) -> Vec<SectionInfo> {
        self.section_identifiers
            .iter()
            .map(|name| SectionInfo {
                name: name.clone(),
                ids: self.items.get(name).cloned().unwrap_or_default(),
            })
            .collect()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.index_path(id).is_some()
    }

    pub fn section_identifier(&self, id: &EntityId) -> Option<&str> {
        self.index_path(id)
            .map(|path| self.section_identifiers[path.section].as_str())
    }

    /// Linear scan for the position of `id`.
    pub fn index_path(&self, id: &EntityId) -> Option<IndexPath> {
        self.section_identifiers
            .iter()
            .enumerate()
            .find_map(|(section_index, name)| {
                self.items
                    .get(name)
                    .and_then(|ids| ids.iter().position(|candidate| candidate == id))
                    .map(|item| IndexPath::new(section_index, item))
            })
    }

    /// Identity at `path`, without resolving the model.
    pub fn identifier_at(&self, path: IndexPath) -> Option<&EntityId> {
        let name = self.section_identifiers.get(path.section)?;
        self.items.get(name)?.get(path.item)
    }

    fn ensure_section(&mut self, section: &str) {
        if let Err(position) = self
            .section_identifiers
            .binary_search_by(|name| name.as_str().cmp(section))
        {
            self.section_identifiers.insert(position, section.to_string());
            self.items.insert(section.to_string(), Vec::new());
        }
    }

    /// Appends `id` to `section`, creating the section in sorted position.
    ///
    /// Returns the new index path, or `None` when `id` is already present.
    pub fn append_item(&mut self, id: EntityId, section: &str) -> Option<IndexPath> {
        let len = self.items.get(section).map_or(0, Vec::len);
        self.insert_item(id, section, len)
    }

    /// Inserts `id` at `position` within `section` (clamped to its length).
    pub fn insert_item(&mut self, id: EntityId, section: &str, position: usize) -> Option<IndexPath> {
        if self.contains(&id) {
            return None;
        }
        self.ensure_section(section);
        let ids = self.items.entry(section.to_string()).or_default();
        let position = position.min(ids.len());
        ids.insert(position, id);

        let section_index = self
            .section_identifiers
            .iter()
            .position(|name| name == section)?;
        Some(IndexPath::new(section_index, position))
    }

    /// Removes `id` from whichever section holds it.
    ///
    /// Sections left empty are dropped. Returns the removed position; `None`
    /// when `id` was not present.
    pub fn delete_item(&mut self, id: &EntityId) -> Option<IndexPath> {
        let path = self.index_path(id)?;
        let name = self.section_identifiers[path.section].clone();
        let now_empty = match self.items.get_mut(&name) {
            Some(ids) => {
                ids.remove(path.item);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.items.remove(&name);
            self.section_identifiers.remove(path.section);
        }
        Some(path)
    }

    /// Marks `id` for reload; position is unchanged.
    pub fn reload_item(&self, id: &EntityId) -> Option<IndexPath> {
        self.index_path(id)
    }
}
