// Catalog - the deduplicated, insertion-ordered collection of items
//
// All mutation goes through one write lock, so `add`, `remove` and
// `prune_duplicates` are serialized even when called from many
// resolution tasks at once. Reads hand out cloned snapshots.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::errors::DownloadError;
use super::models::{BatchSummary, Item, ItemStatus, OutputSelection};

/// Result of `Catalog::add`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted { insertion_order: u64 },
    /// First successful resolution wins; the new item was discarded
    Duplicate { existing_id: String },
}

impl AddOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}

#[derive(Debug, Default)]
struct CatalogInner {
    items: BTreeMap<u64, Item>,
    by_id: HashMap<String, u64>,
    /// Canonical source URLs plus any input URLs that led to an item
    by_url: HashMap<String, u64>,
    next_order: u64,
}

impl CatalogInner {
    fn rebuild_indexes(&mut self) {
        let aliases: Vec<(String, String)> = self
            .by_url
            .iter()
            .filter_map(|(url, order)| self.items.get(order).map(|item| (url.clone(), item.id.clone())))
            .collect();

        self.by_id = self.items.iter().map(|(order, item)| (item.id.clone(), *order)).collect();
        self.by_url = self
            .items
            .iter()
            .map(|(order, item)| (item.source_url.clone(), *order))
            .collect();
        for (url, id) in aliases {
            if let Some(order) = self.by_id.get(&id) {
                self.by_url.entry(url).or_insert(*order);
            }
        }
    }
}

/// Shared handle; clones refer to the same catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    inner: Arc<RwLock<CatalogInner>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item unless its id or source URL is already present
    pub fn add(&self, mut item: Item) -> AddOutcome {
        let mut inner = self.inner.write();

        let existing = inner
            .by_id
            .get(&item.id)
            .or_else(|| inner.by_url.get(&item.source_url))
            .and_then(|order| inner.items.get(order))
            .map(|existing| existing.id.clone());
        if let Some(existing_id) = existing {
            return AddOutcome::Duplicate { existing_id };
        }

        inner.next_order += 1;
        let order = inner.next_order;
        item.insertion_order = order;
        inner.by_id.insert(item.id.clone(), order);
        inner.by_url.insert(item.source_url.clone(), order);
        inner.items.insert(order, item);
        AddOutcome::Inserted { insertion_order: order }
    }

    /// Remember that `url` resolves to the item `id`, so revisiting the
    /// URL is a no-op. Returns false if `id` is unknown.
    pub fn add_alias(&self, url: &str, id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.by_id.get(id).copied() {
            Some(order) => {
                inner.by_url.entry(url.to_string()).or_insert(order);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<Item> {
        let mut inner = self.inner.write();
        let order = inner.by_id.remove(id)?;
        inner.by_url.retain(|_, o| *o != order);
        inner.items.remove(&order)
    }

    pub fn get(&self, id: &str) -> Result<Item, DownloadError> {
        let inner = self.inner.read();
        inner
            .by_id
            .get(id)
            .and_then(|order| inner.items.get(order))
            .cloned()
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))
    }

    /// Look up by position first, falling back to a search by id
    pub fn get_by_index_or_id(&self, id: &str, index: Option<usize>) -> Option<Item> {
        let inner = self.inner.read();
        if let Some(item) = index.and_then(|i| inner.items.values().nth(i)) {
            if item.id == id {
                return Some(item.clone());
            }
        }
        inner.items.values().find(|item| item.id == id).cloned()
    }

    /// Items in insertion order
    pub fn list(&self) -> Vec<Item> {
        self.inner.read().items.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.read().items.values().map(|item| item.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.inner.read().by_id.contains_key(id)
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.inner.read().by_url.contains_key(url)
    }

    /// Snapshot of every known URL (including aliases) and id
    pub fn known_urls_and_ids(&self) -> (HashSet<String>, HashSet<String>) {
        let inner = self.inner.read();
        (
            inner.by_url.keys().cloned().collect(),
            inner.by_id.keys().cloned().collect(),
        )
    }

    /// Remove all but the first item for each id and source URL.
    /// Returns how many items were dropped.
    pub fn prune_duplicates(&self) -> usize {
        let mut inner = self.inner.write();
        let mut seen_ids = HashSet::new();
        let mut seen_urls = HashSet::new();
        let duplicates: Vec<u64> = inner
            .items
            .iter()
            .filter(|(_, item)| {
                let new_id = seen_ids.insert(item.id.clone());
                let new_url = seen_urls.insert(item.source_url.clone());
                !(new_id && new_url)
            })
            .map(|(order, _)| *order)
            .collect();

        for order in &duplicates {
            inner.items.remove(order);
        }
        if !duplicates.is_empty() {
            inner.rebuild_indexes();
            tracing::info!("[Catalog] Pruned {} duplicate item(s)", duplicates.len());
        }
        duplicates.len()
    }

    /// Mutate one item under the write lock
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Item) -> R) -> Result<R, DownloadError> {
        let mut inner = self.inner.write();
        let order = *inner
            .by_id
            .get(id)
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))?;
        let item = inner
            .items
            .get_mut(&order)
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))?;
        Ok(f(item))
    }

    pub fn transition(&self, id: &str, next: ItemStatus) -> Result<(), DownloadError> {
        self.update(id, |item| item.transition(next))?
    }

    /// Explicit external reset back to `Ready`
    pub fn reset(&self, id: &str) -> Result<(), DownloadError> {
        self.update(id, |item| {
            item.status = ItemStatus::Ready;
            item.log("Reset to Ready");
        })
    }

    pub fn log(&self, id: &str, message: impl Into<String>) -> Result<(), DownloadError> {
        let message = message.into();
        self.update(id, move |item| item.log(message))
    }

    pub fn set_selection(&self, id: &str, selection: OutputSelection) -> Result<(), DownloadError> {
        self.update(id, |item| item.selection = selection)
    }

    pub fn set_selection_all(&self, selection: OutputSelection) {
        let mut inner = self.inner.write();
        for item in inner.items.values_mut() {
            item.selection = selection;
        }
    }

    /// Counts over the whole catalog
    pub fn status_counts(&self) -> BatchSummary {
        self.summary_for(&self.ids())
    }

    /// Counts by status over the given ids
    pub fn summary_for(&self, ids: &[String]) -> BatchSummary {
        let inner = self.inner.read();
        let mut summary = BatchSummary {
            total: ids.len(),
            ..BatchSummary::default()
        };
        for item in ids
            .iter()
            .filter_map(|id| inner.by_id.get(id).and_then(|o| inner.items.get(o)))
        {
            match item.status {
                ItemStatus::Done => summary.done += 1,
                ItemStatus::InProgress => summary.in_progress += 1,
                ItemStatus::Error => summary.errored += 1,
                ItemStatus::Ready => {}
            }
        }
        summary
    }

    #[cfg(test)]
    fn insert_unchecked(&self, mut item: Item) {
        let mut inner = self.inner.write();
        inner.next_order += 1;
        let order = inner.next_order;
        item.insertion_order = order;
        inner.items.insert(order, item);
    }
}
