//! Unified error types for the arbitrage dashboard.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::feed::Mode;

/// Unified error type for the arbitrage dashboard.
#[derive(Error, Debug)]
pub enum DashboardError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Feed discovery or fetch error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Stake calculation error.
    #[error("calculation error: {0}")]
    Calc(#[from] CalcError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opportunity feed errors.
#[derive(Error, Debug)]
pub enum FeedError {
    /// A directory of the data tree could not be listed.
    #[error("directory {path} unavailable: {reason}")]
    DirectoryUnavailable {
        /// The directory that failed.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// One `(mode, sport, country)` slice could not be fetched.
    #[error("failed to fetch {mode}/{sport}/{country}: {reason}")]
    SliceFetchFailed {
        /// Feed mode.
        mode: Mode,
        /// Sport directory.
        sport: String,
        /// Country file stem.
        country: String,
        /// Reason for failure.
        reason: String,
    },

    /// Every slice of a refresh failed.
    #[error("all {attempted} data slices failed to load")]
    AllSlicesFailed {
        /// Number of slices attempted.
        attempted: usize,
    },

    /// Discovery of the available sports/countries failed.
    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Failed to parse feed data.
    #[error("failed to parse feed data: {0}")]
    ParseError(String),

    /// The HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    ClientBuild(reqwest::Error),
}

/// Stake calculation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalcError {
    /// The opportunity carries no outcomes.
    #[error("opportunity has no outcomes")]
    NoOutcomes,

    /// Odds must be strictly positive.
    #[error("invalid odds for {key}: {value}")]
    InvalidOdds {
        /// Outcome key.
        key: String,
        /// Offending odds value.
        value: Decimal,
    },

    /// The referenced outcome key does not exist on the opportunity.
    #[error("unknown leg {key}")]
    UnknownLeg {
        /// Requested outcome key.
        key: String,
    },

    /// Stakes or odds too large to combine.
    #[error("stake arithmetic overflowed")]
    Overflow,

    /// A fixed leg needs a positive stake.
    #[error("invalid fixed stake: {0}")]
    InvalidFixedStake(Decimal),

    /// Stake vector length does not match the outcome count.
    #[error("expected {expected} stakes, got {actual}")]
    StakeCountMismatch {
        /// Number of outcomes.
        expected: usize,
        /// Number of stakes supplied.
        actual: usize,
    },

    /// No opportunity has been selected on the stake sheet.
    #[error("no opportunity selected")]
    NothingSelected,
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, DashboardError>;
