//! # Route Registry
//! `(guild, category) -> channel` lookup consulted at dispatch time.
//! The relay only reads routes; registering them is an admin concern
//! (`MemoryRoutes::upsert`, or editing the routes file).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::news::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub guild_id: u64,
    pub category: Category,
    pub channel_id: u64,
}

#[async_trait::async_trait]
pub trait RouteRegistry: Send + Sync {
    /// Snapshot of the routes for `category` as of this call, ordered by guild.
    async fn routes_for(&self, category: Category) -> Result<Vec<Route>>;
}

/// In-process table; at most one channel per (guild, category).
#[derive(Debug, Default)]
pub struct MemoryRoutes {
    table: RwLock<BTreeMap<(Category, u64), u64>>,
}

impl MemoryRoutes {
    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let t = Self::default();
        for r in routes {
            t.upsert(r);
        }
        t
    }

    /// Insert or replace the route for the pair; returns the previous channel.
    pub fn upsert(&self, route: Route) -> Option<u64> {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((route.category, route.guild_id), route.channel_id)
    }

    pub fn remove(&self, guild_id: u64, category: Category) -> Option<u64> {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(category, guild_id))
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, category: Category) -> Vec<Route> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .range((category, u64::MIN)..=(category, u64::MAX))
            .map(|(&(category, guild_id), &channel_id)| Route {
                guild_id,
                category,
                channel_id,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl RouteRegistry for MemoryRoutes {
    async fn routes_for(&self, category: Category) -> Result<Vec<Route>> {
        Ok(self.snapshot(category))
    }
}

/// Routes kept in a TOML (`[[route]]` tables) or JSON (array) file that is
/// re-read on every lookup, so edits apply from the next dispatch on.
/// A missing file means no routes.
#[derive(Debug, Clone)]
pub struct FileRoutes {
    path: PathBuf,
}

impl FileRoutes {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl RouteRegistry for FileRoutes {
    async fn routes_for(&self, category: Category) -> Result<Vec<Route>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading routes from {}", self.path.display()))
            }
        };
        let ext = self
            .path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let table = MemoryRoutes::from_routes(parse_routes(&content, &ext)?);
        Ok(table.snapshot(category))
    }
}

/// Later entries for the same (guild, category) replace earlier ones.
pub fn parse_routes(s: &str, hint_ext: &str) -> Result<Vec<Route>> {
    let try_toml = hint_ext == "toml" || s.contains("[[route]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = serde_json::from_str::<Vec<Route>>(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported routes format"))
}

fn parse_toml(s: &str) -> Result<Vec<Route>> {
    #[derive(Deserialize)]
    struct TomlRoutes {
        #[serde(default)]
        route: Vec<Route>,
    }
    let v: TomlRoutes = toml::from_str(s)?;
    Ok(v.route)
}
