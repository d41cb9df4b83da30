//! Persisted dashboard preferences.
//!
//! Stored as one JSON document. Every field has a safe default so a missing,
//! partial or malformed file never blocks start-up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::aggregator::{BoardQuery, SortBy, SortOrder, ALL};
use crate::arbitrage::{StakeSheet, DEFAULT_TOTAL_STAKE};
use crate::config::MIN_REFRESH_DELAY_MS;
use crate::error::DashboardError;
use crate::feed::Mode;

/// Default board auto-refresh delay.
pub const DEFAULT_REFRESH_DELAY_MS: u64 = 5_000;

/// Default detail-view auto-refresh delay.
pub const DEFAULT_DETAIL_REFRESH_DELAY_MS: u64 = 2_000;

/// User preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub total_stake: Decimal,
    pub rounding: u32,
    pub mode: Mode,
    pub sport: String,
    pub date: String,
    pub sources: Vec<String>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub auto_refresh: bool,
    pub refresh_delay_ms: u64,
    pub detail_auto_refresh: bool,
    pub detail_refresh_delay_ms: u64,
    pub page: usize,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            total_stake: DEFAULT_TOTAL_STAKE,
            rounding: 1,
            mode: Mode::Live,
            sport: ALL.to_string(),
            date: ALL.to_string(),
            sources: Vec::new(),
            sort_by: SortBy::Profit,
            sort_order: SortOrder::Desc,
            auto_refresh: false,
            refresh_delay_ms: DEFAULT_REFRESH_DELAY_MS,
            detail_auto_refresh: false,
            detail_refresh_delay_ms: DEFAULT_DETAIL_REFRESH_DELAY_MS,
            page: 1,
        }
    }
}

impl Preferences {
    /// Board query described by these preferences.
    pub fn query(&self) -> BoardQuery {
        BoardQuery {
            mode: self.mode,
            sport: self.sport.clone(),
            date: self.date.clone(),
            sources: self.sources.clone(),
            sort_by: self.sort_by,
            sort_order: self.sort_order,
            page: self.page.max(1),
        }
    }

    /// Remember the filters and sort of `query`.
    pub fn remember_query(&mut self, query: &BoardQuery) {
        self.mode = query.mode;
        self.sport = query.sport.clone();
        self.date = query.date.clone();
        self.sources = query.sources.clone();
        self.sort_by = query.sort_by;
        self.sort_order = query.sort_order;
        self.page = query.page;
    }

    /// Stake sheet seeded with the stored total and rounding, unless overridden.
    pub fn stake_sheet(&self, total_stake: Option<Decimal>, rounding: Option<u32>) -> StakeSheet {
        StakeSheet::new(
            total_stake.unwrap_or(self.total_stake),
            rounding.unwrap_or(self.rounding),
        )
    }

    /// Remember the total and rounding of `sheet`.
    pub fn remember_stakes(&mut self, sheet: &StakeSheet) {
        self.total_stake = sheet.total_stake();
        self.rounding = sheet.rounding_preference();
    }

    /// Board auto-refresh period.
    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms.max(MIN_REFRESH_DELAY_MS))
    }

    /// Detail-view auto-refresh period.
    pub fn detail_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.detail_refresh_delay_ms.max(MIN_REFRESH_DELAY_MS))
    }
}

/// JSON file holding [`Preferences`].
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load preferences, falling back to defaults on any error.
    pub async fn load(&self) -> Preferences {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored preferences");
                return Preferences::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read preferences");
                return Preferences::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring malformed preferences");
                Preferences::default()
            }
        }
    }

    /// Write preferences, creating parent directories as needed.
    pub async fn save(&self, prefs: &Preferences) -> Result<(), DashboardError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(prefs)?;
        tokio::fs::write(&self.path, json).await?;
        debug!(path = %self.path.display(), "Saved preferences");
        Ok(())
    }
}

/// Preferences shared between requests, written through to a store.
#[derive(Debug)]
pub struct SharedPreferences {
    store: Option<PreferenceStore>,
    current: RwLock<Preferences>,
}

impl SharedPreferences {
    /// Load from `store`; later updates are saved back to it.
    pub async fn load(store: PreferenceStore) -> Self {
        let current = store.load().await;
        Self {
            store: Some(store),
            current: RwLock::new(current),
        }
    }

    /// Preferences that live only as long as this value.
    pub fn in_memory(prefs: Preferences) -> Self {
        Self {
            store: None,
            current: RwLock::new(prefs),
        }
    }

    pub async fn get(&self) -> Preferences {
        self.current.read().await.clone()
    }

    /// Apply `change` and save the result if anything changed.
    ///
    /// A failed save leaves the current preferences as they were.
    pub async fn update<F>(&self, change: F) -> Result<Preferences, DashboardError>
    where
        F: FnOnce(&mut Preferences),
    {
        let mut current = self.current.write().await;
        let mut next = current.clone();
        change(&mut next);
        if next != *current {
            if let Some(store) = &self.store {
                store.save(&next).await?;
            }
            *current = next.clone();
        }
        Ok(next)
    }
}
