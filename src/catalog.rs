use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fnv::FnvHashMap;

use crate::content::ContentId;

/// The kind of entry the host's catalog holds for a `ContentId`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CatalogEntry {
    /// Content the host installed itself, never touched by the tracker.
    Local,
    /// A listing published by the tracker.
    Shared,
}

/// The host's content catalog, as far as the tracker is concerned.
///
/// The tracker publishes a `Shared` entry when a listing is created and
/// withdraws it in the same step that drops the listing, it never modifies
/// `Local` entries.
pub trait Catalog: Send {
    /// The entry currently stored under `id`.
    fn entry(&self, id: &ContentId) -> Option<CatalogEntry>;

    /// Insert a `Shared` entry for `id`.
    fn publish(&mut self, id: &ContentId);

    /// Remove the `Shared` entry for `id`.
    fn withdraw(&mut self, id: &ContentId);
}

/// In-memory catalog.
///
/// Clones share the same entries, so the host can keep a handle while the
/// tracker owns another.
#[derive(Clone, Debug, Default)]
pub struct MemoryCatalog {
    entries: Arc<Mutex<FnvHashMap<ContentId, CatalogEntry>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, FnvHashMap<ContentId, CatalogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register content installed by the host.
    pub fn insert_local(&self, id: ContentId) -> Option<CatalogEntry> {
        self.entries().insert(id, CatalogEntry::Local)
    }

    pub fn get(&self, id: &ContentId) -> Option<CatalogEntry> {
        self.entries().get(id).copied()
    }

    /// All ids currently published by the tracker.
    pub fn shared_ids(&self) -> Vec<ContentId> {
        self.entries()
            .iter()
            .filter(|(_, entry)| **entry == CatalogEntry::Shared)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl Catalog for MemoryCatalog {
    fn entry(&self, id: &ContentId) -> Option<CatalogEntry> {
        self.get(id)
    }

    fn publish(&mut self, id: &ContentId) {
        let previous = self.entries().insert(id.clone(), CatalogEntry::Shared);
        assert!(
            previous.is_none(),
            "publishing {} over an existing {:?} entry",
            id,
            previous
        );
    }

    fn withdraw(&mut self, id: &ContentId) {
        let mut entries = self.entries();
        let entry = entries.get(id).copied();
        match entry {
            Some(CatalogEntry::Shared) => {
                entries.remove(id);
            }
            other => panic!("withdrawing {} which is not shared but {:?}", id, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_entries() {
        let host = MemoryCatalog::new();
        let mut tracker_side = host.clone();
        let id = ContentId::beatmap_set("songA", "application/json");

        tracker_side.publish(&id);
        assert_eq!(host.get(&id), Some(CatalogEntry::Shared));
        assert_eq!(host.shared_ids(), vec![id.clone()]);

        tracker_side.withdraw(&id);
        assert!(host.is_empty());
    }

    #[test]
    fn local_entries_are_not_shared() {
        let catalog = MemoryCatalog::new();
        let id = ContentId::beatmap_set("installed", "application/json");
        catalog.insert_local(id.clone());

        assert_eq!(catalog.entry(&id), Some(CatalogEntry::Local));
        assert!(catalog.shared_ids().is_empty());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    #[should_panic]
    fn withdrawing_a_local_entry_panics() {
        let mut catalog = MemoryCatalog::new();
        let id = ContentId::beatmap_set("installed", "application/json");
        catalog.insert_local(id.clone());
        catalog.withdraw(&id);
    }
}
