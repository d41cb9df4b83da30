//! Discovery of available sports and countries, and the local filesystem feed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::client::{FeedSource, SliceKey, LABELS_PATH, OPPORTUNITIES_PATH};
use super::labels::Labels;
use super::types::{MatchGroup, Mode};
use crate::error::FeedError;
use crate::metrics;

/// Bookkeeping file written next to country files by the upstream detector.
pub const ACTIVITY_TRACKER_FILE: &str = "activity_tracker.json";

/// Sport → sorted country list, per mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailableCountries {
    /// Live sports and their countries.
    #[serde(default)]
    pub live: BTreeMap<String, Vec<String>>,
    /// Pre-match sports and their countries.
    #[serde(default)]
    pub prematch: BTreeMap<String, Vec<String>>,
}

impl AvailableCountries {
    /// Sports and countries of one mode.
    pub fn for_mode(&self, mode: Mode) -> &BTreeMap<String, Vec<String>> {
        match mode {
            Mode::Live => &self.live,
            Mode::Prematch => &self.prematch,
        }
    }

    fn for_mode_mut(&mut self, mode: Mode) -> &mut BTreeMap<String, Vec<String>> {
        match mode {
            Mode::Live => &mut self.live,
            Mode::Prematch => &mut self.prematch,
        }
    }

    /// Union of the sports of both modes, sorted.
    pub fn sports(&self) -> Vec<String> {
        self.live
            .keys()
            .chain(self.prematch.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether nothing was discovered at all.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.prematch.is_empty()
    }

    /// Slices to fetch for `mode`, restricted to `sport` unless it is `None`.
    pub fn slices(&self, mode: Mode, sport: Option<&str>) -> Vec<SliceKey> {
        self.for_mode(mode)
            .iter()
            .filter(|(name, _)| sport.map_or(true, |s| s == name.as_str()))
            .flat_map(|(name, countries)| {
                countries
                    .iter()
                    .map(move |country| SliceKey::new(mode, name.clone(), country.clone()))
            })
            .collect()
    }
}

/// Walk `<root>/<mode>/<sport>/<country>.json` for every mode.
///
/// Missing or unreadable directories contribute nothing instead of failing.
#[instrument]
pub async fn discover_countries(root: &Path) -> AvailableCountries {
    let mut result = AvailableCountries::default();

    for mode in Mode::ALL {
        let mode_dir = root.join(mode.to_string());
        let sports = match list_subdirectories(&mode_dir).await {
            Ok(sports) => sports,
            Err(e) => {
                warn!(error = %e, "Skipping mode");
                continue;
            }
        };

        for sport in sports {
            let sport_dir = mode_dir.join(&sport);
            match list_country_files(&sport_dir).await {
                Ok(countries) => {
                    result.for_mode_mut(mode).insert(sport, countries);
                }
                Err(e) => {
                    warn!(error = %e, "Skipping sport");
                }
            }
        }
    }

    info!(sports = ?result.sports(), "Discovered available sports");
    result
}

async fn list_subdirectories(dir: &Path) -> Result<Vec<String>, FeedError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| unavailable(dir, e))?;
    let mut names = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(|e| unavailable(dir, e))? {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }

    names.sort();
    Ok(names)
}

async fn list_country_files(dir: &Path) -> Result<Vec<String>, FeedError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| unavailable(dir, e))?;
    let mut countries = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(|e| unavailable(dir, e))? {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name == ACTIVITY_TRACKER_FILE {
            continue;
        }
        if let Some(stem) = name.strip_suffix(".json") {
            countries.push(stem.to_string());
        }
    }

    countries.sort();
    Ok(countries)
}

fn unavailable(dir: &Path, e: std::io::Error) -> FeedError {
    FeedError::DirectoryUnavailable {
        path: dir.display().to_string(),
        reason: e.to_string(),
    }
}

/// Feed read straight from a local data tree.
#[derive(Debug, Clone)]
pub struct LocalFeed {
    /// Data root (contains `arb_output/` and `data/`).
    root: PathBuf,
    /// Label dictionary override.
    labels_path: Option<PathBuf>,
}

impl LocalFeed {
    /// Create a feed over `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            labels_path: None,
        }
    }

    /// Read labels from `path` instead of `<root>/data/odds-display-names.json`.
    pub fn with_labels_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.labels_path = Some(path.into());
        self
    }

    /// Root of the opportunity tree.
    pub fn opportunities_dir(&self) -> PathBuf {
        self.root.join(OPPORTUNITIES_PATH)
    }
}

#[async_trait]
impl FeedSource for LocalFeed {
    async fn discover(&self) -> Result<AvailableCountries, FeedError> {
        Ok(discover_countries(&self.opportunities_dir()).await)
    }

    #[instrument(skip(self), fields(slice = %slice.relative_path()))]
    async fn fetch_slice(&self, slice: &SliceKey) -> Result<Vec<MatchGroup>, FeedError> {
        let _timer = metrics::timer_slice_fetch();
        let path = self.opportunities_dir().join(slice.relative_path());

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| slice.failure(e.to_string()))?;
        let groups: Vec<MatchGroup> =
            serde_json::from_slice(&bytes).map_err(|e| slice.failure(e.to_string()))?;

        debug!(groups = groups.len(), "Read slice");
        Ok(groups)
    }

    async fn fetch_labels(&self) -> Result<Labels, FeedError> {
        let path = self
            .labels_path
            .clone()
            .unwrap_or_else(|| self.root.join(LABELS_PATH));
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| unavailable(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| FeedError::ParseError(e.to_string()))
    }
}
