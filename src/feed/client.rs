//! Feed sources: the trait the board consumes and the HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::discovery::AvailableCountries;
use super::labels::Labels;
use super::types::{MatchGroup, Mode};
use crate::error::FeedError;
use crate::metrics;

/// Path of the opportunity tree below the data root.
pub const OPPORTUNITIES_PATH: &str = "arb_output/arb_opportunities";

/// Path of the label dictionary below the data root.
pub const LABELS_PATH: &str = "data/odds-display-names.json";

/// Path of the discovery endpoint on a remote feed.
pub const COUNTRIES_PATH: &str = "api/countries";

/// One `(mode, sport, country)` data slice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceKey {
    /// Feed mode.
    pub mode: Mode,
    /// Sport directory.
    pub sport: String,
    /// Country file stem.
    pub country: String,
}

impl SliceKey {
    /// Create a slice key.
    pub fn new(mode: Mode, sport: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            mode,
            sport: sport.into(),
            country: country.into(),
        }
    }

    /// Relative path of the slice document, e.g. `live/football/tunisia.json`.
    pub fn relative_path(&self) -> String {
        format!("{}/{}/{}.json", self.mode, self.sport, self.country)
    }

    pub(crate) fn failure(&self, reason: impl Into<String>) -> FeedError {
        FeedError::SliceFetchFailed {
            mode: self.mode,
            sport: self.sport.clone(),
            country: self.country.clone(),
            reason: reason.into(),
        }
    }
}

/// Source of opportunity data.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Available sports and countries per mode.
    async fn discover(&self) -> Result<AvailableCountries, FeedError>;

    /// Match groups of one slice.
    async fn fetch_slice(&self, slice: &SliceKey) -> Result<Vec<MatchGroup>, FeedError>;

    /// The label dictionary.
    async fn fetch_labels(&self) -> Result<Labels, FeedError>;
}

/// Load labels from `source`, falling back to the embedded dictionary.
pub async fn load_labels_or_default(source: &dyn FeedSource) -> Labels {
    match source.fetch_labels().await {
        Ok(labels) => labels,
        Err(e) => {
            warn!(error = %e, "Failed to load display labels, using defaults");
            Labels::default()
        }
    }
}

/// Feed served over HTTP with the same layout as the local tree.
#[derive(Debug, Clone)]
pub struct FeedClient {
    /// HTTP client for requests.
    http: reqwest::Client,
    /// Base URL of the feed (always ends with `/`).
    base_url: Url,
}

impl FeedClient {
    /// Create a client for `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FeedError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| FeedError::ParseError(format!("invalid feed url {}: {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(2))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(FeedError::ClientBuild)?;

        Ok(Self { http, base_url })
    }

    /// Absolute URL of a path below the base.
    pub fn url_for(&self, path: &str) -> Result<Url, FeedError> {
        self.base_url
            .join(path)
            .map_err(|e| FeedError::ParseError(format!("invalid path {}: {}", path, e)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, FeedError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FeedError::ParseError(format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(FeedError::ParseError(format!(
                "HTTP {} for {}",
                response.status(),
                url
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| FeedError::ParseError(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl FeedSource for FeedClient {
    #[instrument(skip(self))]
    async fn discover(&self) -> Result<AvailableCountries, FeedError> {
        let url = self.url_for(COUNTRIES_PATH)?;
        self.get_json(url)
            .await
            .map_err(|e| FeedError::DiscoveryFailed(e.to_string()))
    }

    #[instrument(skip(self), fields(slice = %slice.relative_path()))]
    async fn fetch_slice(&self, slice: &SliceKey) -> Result<Vec<MatchGroup>, FeedError> {
        let _timer = metrics::timer_slice_fetch();
        let url = self.url_for(&format!("{}/{}", OPPORTUNITIES_PATH, slice.relative_path()))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| slice.failure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(slice.failure(format!("HTTP {}", response.status())));
        }

        let groups: Vec<MatchGroup> = response
            .json()
            .await
            .map_err(|e| slice.failure(e.to_string()))?;

        debug!(groups = groups.len(), "Fetched slice");
        Ok(groups)
    }

    async fn fetch_labels(&self) -> Result<Labels, FeedError> {
        let url = self.url_for(LABELS_PATH)?;
        self.get_json(url).await
    }
}
