//! # Category Store
//! Capacity-bounded, deduplicating collection of `NewsItem`s for one
//! category, ordered by `published_at` descending.
//!
//! Writes (insert, update, evict, remove) take the exclusive side of a
//! `tokio::sync::RwLock` and persist through the `ItemBackend` before the
//! in-memory view changes, so a failed backend write leaves both sides as
//! they were. Readers share the lock and never observe half an insert+evict.

pub mod backend;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::news::{Category, NewsItem};
pub use backend::{ItemBackend, JsonFileBackend, MemoryBackend};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{category} item already in store: {key}")]
    AlreadyInStore { category: Category, key: String },

    #[error("{category} item not in store: {key}")]
    NotInStore { category: Category, key: String },

    #[error("{category} store is full (capacity {capacity})")]
    CapacityExceeded { category: Category, capacity: usize },

    #[error("{category} store is full and {key} is not newer than anything in it")]
    Stale { category: Category, key: String },

    #[error("store backend error: {0:#}")]
    Backend(anyhow::Error),
}

impl StoreError {
    pub fn is_already_in_store(&self) -> bool {
        matches!(self, StoreError::AlreadyInStore { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::Stale { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// At capacity, drop the oldest stored item.
    Evict,
    /// Like `Evict`, but at capacity an item not newer than the oldest
    /// stored one fails with `Stale` and nothing is dropped.
    EvictOlder,
    /// At capacity, fail with `CapacityExceeded`.
    NoEvict,
}

#[derive(Debug, Clone)]
pub struct Inserted {
    pub evicted: Option<NewsItem>,
}

impl Inserted {
    pub fn evicted_key(&self) -> Option<&str> {
        self.evicted.as_ref().map(|i| i.source_key.as_str())
    }
}

pub struct CategoryStore {
    category: Category,
    capacity: usize,
    items: RwLock<Vec<NewsItem>>, // newest first
    backend: Arc<dyn ItemBackend>,
}

impl CategoryStore {
    /// `capacity` of 0 is treated as 1.
    pub fn new(category: Category, capacity: usize, backend: Arc<dyn ItemBackend>) -> Self {
        Self {
            category,
            capacity: capacity.max(1),
            items: RwLock::new(Vec::with_capacity(capacity.clamp(1, 1_000))),
            backend,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.items.read().await.iter().any(|i| i.source_key == key)
    }

    pub async fn get(&self, key: &str) -> Result<NewsItem, StoreError> {
        self.items
            .read()
            .await
            .iter()
            .find(|i| i.source_key == key)
            .cloned()
            .ok_or_else(|| self.not_in_store(key))
    }

    /// Read-only snapshot, newest first.
    pub async fn list_newest_first(&self) -> Vec<NewsItem> {
        self.items.read().await.clone()
    }

    pub async fn insert(&self, mut item: NewsItem, mode: InsertMode) -> Result<Inserted, StoreError> {
        debug_assert_eq!(item.category, self.category);
        let mut items = self.items.write().await;

        if items.iter().any(|i| i.source_key == item.source_key) {
            return Err(StoreError::AlreadyInStore {
                category: self.category,
                key: item.source_key,
            });
        }

        let evict_idx = if items.len() >= self.capacity {
            match mode {
                InsertMode::NoEvict => {
                    return Err(StoreError::CapacityExceeded {
                        category: self.category,
                        capacity: self.capacity,
                    })
                }
                InsertMode::Evict => Some(oldest_index(&items)),
                InsertMode::EvictOlder => {
                    let idx = oldest_index(&items);
                    if item.published_at <= items[idx].published_at {
                        return Err(StoreError::Stale {
                            category: self.category,
                            key: item.source_key,
                        });
                    }
                    Some(idx)
                }
            }
        } else {
            None
        };

        let now = Utc::now();
        item.created_at = now;
        item.updated_at = now;

        let evict_key = evict_idx.map(|i| items[i].source_key.clone());
        self.backend
            .insert(&item, evict_key.as_deref())
            .await?;

        let evicted = evict_idx.map(|i| items.remove(i));
        let pos = insert_position(&items, &item);
        items.insert(pos, item);

        Ok(Inserted { evicted })
    }

    /// Apply `mutator` to the stored item. The item is persisted (and
    /// `updated_at` bumped) only when the mutator actually changed it.
    pub async fn update<R, F>(&self, key: &str, mutator: F) -> Result<(R, NewsItem), StoreError>
    where
        F: FnOnce(&mut NewsItem) -> R,
    {
        let mut items = self.items.write().await;
        let idx = items
            .iter()
            .position(|i| i.source_key == key)
            .ok_or_else(|| self.not_in_store(key))?;

        let mut next = items[idx].clone();
        let out = mutator(&mut next);
        // identity is immutable
        next.category = self.category;
        next.source_key = items[idx].source_key.clone();

        if next != items[idx] {
            next.updated_at = Utc::now();
            self.backend.update(&next).await?;
            items.remove(idx);
            let pos = insert_position(&items, &next);
            items.insert(pos, next.clone());
        }

        Ok((out, next))
    }

    pub async fn remove(&self, key: &str) -> Result<NewsItem, StoreError> {
        let mut items = self.items.write().await;
        let idx = items
            .iter()
            .position(|i| i.source_key == key)
            .ok_or_else(|| self.not_in_store(key))?;
        self.backend.delete(self.category, key).await?;
        Ok(items.remove(idx))
    }

    /// Load persisted items into an empty store without evicting.
    ///
    /// Items are taken newest first; if the backend holds more than
    /// `capacity`, the surplus is pruned from the backend and
    /// `CapacityExceeded` is returned after the newest items were loaded.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let mut persisted = self
            .backend
            .load(self.category)
            .await
            .map_err(StoreError::Backend)?;
        persisted.retain(|i| i.category == self.category);
        persisted.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let mut items = self.items.write().await;
        let mut loaded = 0usize;
        let mut overflow = Vec::new();
        for item in persisted {
            if items.iter().any(|i| i.source_key == item.source_key) {
                continue;
            }
            if items.len() >= self.capacity {
                overflow.push(item.source_key);
                continue;
            }
            let pos = insert_position(&items, &item);
            items.insert(pos, item);
            loaded += 1;
        }

        if overflow.is_empty() {
            return Ok(loaded);
        }
        for key in &overflow {
            self.backend.delete(self.category, key).await?;
        }
        tracing::warn!(
            category = %self.category,
            loaded,
            pruned = overflow.len(),
            "persisted items exceed store capacity"
        );
        Err(StoreError::CapacityExceeded {
            category: self.category,
            capacity: self.capacity,
        })
    }

    fn not_in_store(&self, key: &str) -> StoreError {
        StoreError::NotInStore {
            category: self.category,
            key: key.to_string(),
        }
    }
}

/// One store per category, built once at startup and shared by the
/// ingestion engine, the tracker and the dispatcher.
pub struct Stores {
    stores: [Arc<CategoryStore>; 5],
}

impl Stores {
    pub fn new(capacity_for: impl Fn(Category) -> usize, backend: Arc<dyn ItemBackend>) -> Self {
        let stores = Category::ALL
            .map(|c| Arc::new(CategoryStore::new(c, capacity_for(c), backend.clone())));
        Self { stores }
    }

    /// Every category with the same capacity, backed by memory only.
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(|_| capacity, Arc::new(MemoryBackend::default()))
    }

    pub fn get(&self, category: Category) -> &Arc<CategoryStore> {
        &self.stores[category.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CategoryStore>> {
        self.stores.iter()
    }

    /// Restore every category; failures are reported per category.
    pub async fn restore_all(&self) -> Vec<(Category, Result<usize, StoreError>)> {
        let mut out = Vec::with_capacity(self.stores.len());
        for s in &self.stores {
            out.push((s.category(), s.restore().await));
        }
        out
    }
}

/// Index of the item with the oldest `published_at` (last, given ordering;
/// ties resolve to the entry stored longest).
fn oldest_index(items: &[NewsItem]) -> usize {
    let mut idx = 0;
    for (i, it) in items.iter().enumerate() {
        if it.published_at <= items[idx].published_at {
            idx = i;
        }
    }
    idx
}

/// Position keeping `items` sorted by `published_at` descending; equal
/// timestamps go in front of the existing ones.
fn insert_position(items: &[NewsItem], item: &NewsItem) -> usize {
    items.partition_point(|i| i.published_at > item.published_at)
}
