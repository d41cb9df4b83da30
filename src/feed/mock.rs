//! In-memory feed for unit testing.
//!
//! This module provides a feed source that can be used in tests
//! without touching the filesystem or the network.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::client::{FeedSource, SliceKey};
use super::discovery::AvailableCountries;
use super::labels::Labels;
use super::types::{MatchGroup, Mode};
use crate::error::FeedError;

/// In-memory feed with per-slice failure injection.
#[derive(Debug, Clone, Default)]
pub struct MockFeed {
    /// Slice contents.
    slices: Arc<Mutex<HashMap<SliceKey, Vec<MatchGroup>>>>,
    /// Slices that fail on fetch.
    failing: Arc<Mutex<HashSet<SliceKey>>>,
    /// Labels to serve; `None` fails the request.
    labels: Arc<Mutex<Option<Labels>>>,
}

impl MockFeed {
    /// Create an empty mock feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the contents of a slice.
    pub fn set_slice(&self, slice: SliceKey, groups: Vec<MatchGroup>) {
        self.failing.lock().unwrap().remove(&slice);
        self.slices.lock().unwrap().insert(slice, groups);
    }

    /// Make a discovered slice fail on fetch.
    pub fn fail_slice(&self, slice: SliceKey) {
        self.slices.lock().unwrap().entry(slice.clone()).or_default();
        self.failing.lock().unwrap().insert(slice);
    }

    /// Remove a slice entirely.
    pub fn remove_slice(&self, slice: &SliceKey) {
        self.slices.lock().unwrap().remove(slice);
        self.failing.lock().unwrap().remove(slice);
    }

    /// Serve `labels` from `fetch_labels`.
    pub fn set_labels(&self, labels: Labels) {
        *self.labels.lock().unwrap() = Some(labels);
    }
}

#[async_trait]
impl FeedSource for MockFeed {
    async fn discover(&self) -> Result<AvailableCountries, FeedError> {
        let slices = self.slices.lock().unwrap();
        let mut countries = AvailableCountries::default();
        for slice in slices.keys() {
            let by_sport = match slice.mode {
                Mode::Live => &mut countries.live,
                Mode::Prematch => &mut countries.prematch,
            };
            by_sport
                .entry(slice.sport.clone())
                .or_default()
                .push(slice.country.clone());
        }
        for list in countries.live.values_mut().chain(countries.prematch.values_mut()) {
            list.sort();
        }
        Ok(countries)
    }

    async fn fetch_slice(&self, slice: &SliceKey) -> Result<Vec<MatchGroup>, FeedError> {
        if self.failing.lock().unwrap().contains(slice) {
            return Err(slice.failure("mock failure"));
        }
        self.slices
            .lock()
            .unwrap()
            .get(slice)
            .cloned()
            .ok_or_else(|| slice.failure("no such slice"))
    }

    async fn fetch_labels(&self) -> Result<Labels, FeedError> {
        self.labels
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FeedError::ParseError("mock labels unavailable".to_string()))
    }
}
