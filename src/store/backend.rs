// src/store/backend.rs
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use tokio::fs;

use super::StoreError;
use crate::news::{Category, NewsItem};

/// Keyed persistence behind a `CategoryStore`.
///
/// Every call is made while the owning store holds its write lock, so
/// implementations only need to be atomic per call, not across calls.
#[async_trait::async_trait]
pub trait ItemBackend: Send + Sync {
    async fn load(&self, category: Category) -> anyhow::Result<Vec<NewsItem>>;

    /// Insert `item`, deleting `evict` in the same write when given.
    async fn insert(&self, item: &NewsItem, evict: Option<&str>) -> Result<(), StoreError>;

    async fn update(&self, item: &NewsItem) -> Result<(), StoreError>;

    async fn delete(&self, category: Category, key: &str) -> Result<(), StoreError>;
}

/// Applies one insert(+evict) to a category's rows.
fn apply_insert(rows: &mut Vec<NewsItem>, item: &NewsItem, evict: Option<&str>) -> Result<(), StoreError> {
    if rows.iter().any(|r| r.source_key == item.source_key) {
        return Err(StoreError::AlreadyInStore {
            category: item.category,
            key: item.source_key.clone(),
        });
    }
    if let Some(k) = evict {
        rows.retain(|r| r.source_key != k);
    }
    rows.push(item.clone());
    Ok(())
}

fn apply_update(rows: &mut [NewsItem], item: &NewsItem) -> Result<(), StoreError> {
    let row = rows
        .iter_mut()
        .find(|r| r.source_key == item.source_key)
        .ok_or_else(|| StoreError::NotInStore {
            category: item.category,
            key: item.source_key.clone(),
        })?;
    *row = item.clone();
    Ok(())
}

fn apply_delete(rows: &mut Vec<NewsItem>, category: Category, key: &str) -> Result<(), StoreError> {
    let before = rows.len();
    rows.retain(|r| r.source_key != key);
    if rows.len() == before {
        return Err(StoreError::NotInStore {
            category,
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Volatile backend, used when `persist_items` is off and in tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: Mutex<HashMap<Category, Vec<NewsItem>>>,
}

impl MemoryBackend {
    pub fn with_items(items: Vec<NewsItem>) -> Self {
        let mut rows: HashMap<Category, Vec<NewsItem>> = HashMap::new();
        for it in items {
            rows.entry(it.category).or_default().push(it);
        }
        Self {
            rows: Mutex::new(rows),
        }
    }

    fn with_rows<R>(&self, category: Category, f: impl FnOnce(&mut Vec<NewsItem>) -> R) -> R {
        let mut map = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        f(map.entry(category).or_default())
    }
}

#[async_trait::async_trait]
impl ItemBackend for MemoryBackend {
    async fn load(&self, category: Category) -> anyhow::Result<Vec<NewsItem>> {
        Ok(self.with_rows(category, |rows| rows.clone()))
    }

    async fn insert(&self, item: &NewsItem, evict: Option<&str>) -> Result<(), StoreError> {
        self.with_rows(item.category, |rows| apply_insert(rows, item, evict))
    }

    async fn update(&self, item: &NewsItem) -> Result<(), StoreError> {
        self.with_rows(item.category, |rows| apply_update(rows, item))
    }

    async fn delete(&self, category: Category, key: &str) -> Result<(), StoreError> {
        self.with_rows(category, |rows| apply_delete(rows, category, key))
    }
}

/// One pretty-printed JSON array per category under `dir`
/// (`topic.json`, `maintenance.json`, ...). Each write goes to a temp file
/// which is then renamed over the old one.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, category: Category) -> PathBuf {
        self.dir.join(format!("{}.json", category.as_str()))
    }

    async fn read_rows(&self, category: Category) -> anyhow::Result<Vec<NewsItem>> {
        let path = self.path_for(category);
        match fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => Ok(Vec::new()),
            Ok(s) => serde_json::from_str(&s)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn write_rows(&self, category: Category, rows: &[NewsItem]) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating state dir {}", self.dir.display()))?;
        let path = self.path_for(category);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(rows).context("serializing items")?;
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming onto {}", path.display()))?;
        Ok(())
    }

    async fn modify(
        &self,
        category: Category,
        f: impl FnOnce(&mut Vec<NewsItem>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut rows = self.read_rows(category).await.map_err(StoreError::Backend)?;
        f(&mut rows)?;
        self.write_rows(category, &rows)
            .await
            .map_err(StoreError::Backend)
    }
}

#[async_trait::async_trait]
impl ItemBackend for JsonFileBackend {
    async fn load(&self, category: Category) -> anyhow::Result<Vec<NewsItem>> {
        self.read_rows(category).await
    }

    async fn insert(&self, item: &NewsItem, evict: Option<&str>) -> Result<(), StoreError> {
        self.modify(item.category, |rows| apply_insert(rows, item, evict))
            .await
    }

    async fn update(&self, item: &NewsItem) -> Result<(), StoreError> {
        self.modify(item.category, |rows| apply_update(rows, item))
            .await
    }

    async fn delete(&self, category: Category, key: &str) -> Result<(), StoreError> {
        self.modify(category, |rows| apply_delete(rows, category, key))
            .await
    }
}
