// src/config/relay.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::news::Category;

pub const ENV_CONFIG_PATH: &str = "RELAY_CONFIG_PATH";
const ENV_POLL_INTERVAL: &str = "RELAY_POLL_INTERVAL_SECS";
const ENV_DISPATCH: &str = "RELAY_DISPATCH";
const ENV_PERSIST: &str = "RELAY_PERSIST";

/// Upper bound for the reminder lead and the broadcast grace (one year).
pub const MAX_SCHEDULE_OFFSET_SECS: u64 = 365 * 24 * 3600;

fn default_capacity() -> usize {
    20
}
fn default_poll_interval_secs() -> u64 {
    300
}
fn default_reminder_lead_secs() -> u64 {
    3600
}
fn default_broadcast_grace_secs() -> u64 {
    7200
}
fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_send_timeout_secs() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_routes_path() -> PathBuf {
    PathBuf::from("config/routes.toml")
}
fn default_source_url() -> String {
    "https://na.lodestonenews.com".to_string()
}
fn default_page_size() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Items kept per category unless overridden in `capacity_overrides`.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Per-category capacity, keyed by category name ("maintenance" = 30).
    #[serde(default)]
    pub capacity_overrides: BTreeMap<String, usize>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_reminder_lead_secs")]
    pub reminder_lead_secs: u64,
    /// How late a live-broadcast announcement may still go out.
    #[serde(default = "default_broadcast_grace_secs")]
    pub broadcast_grace_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub persist_items: bool,
    #[serde(default = "default_true")]
    pub dispatch_notifications: bool,
    /// Record, but do not announce, the first listing seen for an empty store.
    #[serde(default = "default_true")]
    pub seed_empty_stores: bool,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_routes_path")]
    pub routes_path: PathBuf,
    #[serde(default = "default_source_url")]
    pub source_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// e.g. "0.0.0.0:9100"; no metrics listener when absent.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            capacity_overrides: BTreeMap::new(),
            poll_interval_secs: default_poll_interval_secs(),
            reminder_lead_secs: default_reminder_lead_secs(),
            broadcast_grace_secs: default_broadcast_grace_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            persist_items: true,
            dispatch_notifications: true,
            seed_empty_stores: true,
            state_dir: default_state_dir(),
            routes_path: default_routes_path(),
            source_url: default_source_url(),
            page_size: default_page_size(),
            metrics_addr: None,
        }
    }
}

impl RelayConfig {
    pub fn capacity_for(&self, category: Category) -> usize {
        self.capacity_overrides
            .iter()
            .find(|(k, _)| k.parse::<Category>().ok() == Some(category))
            .map(|(_, v)| *v)
            .unwrap_or(self.capacity)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reminder_lead(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reminder_lead_secs.min(MAX_SCHEDULE_OFFSET_SECS) as i64)
    }

    pub fn broadcast_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.broadcast_grace_secs.min(MAX_SCHEDULE_OFFSET_SECS) as i64)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Clamp values that would stall or spin the scheduler.
    fn sanitize(mut self) -> Self {
        self.capacity = self.capacity.max(1);
        for v in self.capacity_overrides.values_mut() {
            *v = (*v).max(1);
        }
        self.poll_interval_secs = self.poll_interval_secs.max(1);
        self.fetch_timeout_secs = self.fetch_timeout_secs.max(1);
        self.send_timeout_secs = self.send_timeout_secs.max(1);
        self.page_size = self.page_size.max(1);
        self.reminder_lead_secs = self.reminder_lead_secs.min(MAX_SCHEDULE_OFFSET_SECS);
        self.broadcast_grace_secs = self.broadcast_grace_secs.min(MAX_SCHEDULE_OFFSET_SECS);
        self
    }

    /// `RELAY_POLL_INTERVAL_SECS`, `RELAY_DISPATCH`, `RELAY_PERSIST` win over the file.
    fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = std::env::var(ENV_POLL_INTERVAL)
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.poll_interval_secs = v;
        }
        if let Some(b) = env_flag(ENV_DISPATCH) {
            self.dispatch_notifications = b;
        }
        if let Some(b) = env_flag(ENV_PERSIST) {
            self.persist_items = b;
        }
        self
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let v = std::env::var(name).ok()?;
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<RelayConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading relay config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    Ok(parse_config(&content, &ext)?.sanitize())
}

/// Load config using env var + fallbacks:
/// 1) $RELAY_CONFIG_PATH
/// 2) config/relay.toml
/// 3) config/relay.json
/// 4) built-in defaults
///
/// Env overrides are applied on top in every case.
pub fn load_config_default() -> Result<RelayConfig> {
    let cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        load_config_from(&pb)?
    } else if Path::new("config/relay.toml").exists() {
        load_config_from(Path::new("config/relay.toml"))?
    } else if Path::new("config/relay.json").exists() {
        load_config_from(Path::new("config/relay.json"))?
    } else {
        RelayConfig::default()
    };
    Ok(cfg.apply_env_overrides().sanitize())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<RelayConfig> {
    if hint_ext == "json" || s.trim_start().starts_with('{') {
        return serde_json::from_str(s).context("parsing relay config json");
    }
    toml::from_str(s).context("parsing relay config toml")
}
