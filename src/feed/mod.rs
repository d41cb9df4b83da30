//! Opportunity feed: data model, discovery and sources.
//!
//! This module handles:
//! - Match group / opportunity types
//! - Discovery of available sports and countries
//! - Local filesystem and HTTP feed sources
//! - Group identity reconciliation across refreshes
//! - Display labels

pub mod client;
pub mod discovery;
pub mod identity;
pub mod labels;
pub mod mock;
pub mod types;

pub use client::{load_labels_or_default, FeedClient, FeedSource, SliceKey};
pub use discovery::{discover_countries, AvailableCountries, LocalFeed};
pub use identity::{find_matching_group, share_group_id_number, GroupMatch};
pub use labels::Labels;
pub use mock::MockFeed;
pub use types::{BestOdds, ExtensionFields, MatchGroup, Mode, OddInfo, Opportunity, OutcomeOdds};
