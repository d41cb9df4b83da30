//! Sports-betting arbitrage dashboard.
//!
//! Reads pre-computed arbitrage opportunities from a data tree (local or
//! over HTTP), merges them into a filterable board, tracks how long each
//! opportunity has been active, detects profit moves between refreshes and
//! sizes stakes for a chosen opportunity.
//!
//! # Arbitrage
//!
//! When the implied probabilities of mutually exclusive outcomes sum below
//! one, staking each leg in proportion to its implied probability pays the
//! same amount whichever outcome wins:
//!
//! ```text
//! 1 @ 2.10 (A)   X @ 3.90 (B)   2 @ 4.20 (A)
//! 1/2.10 + 1/3.90 + 1/4.20 = 0.9708 < 1
//! Profit: 3.01% of the total stake
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`feed`]: Data model, discovery and feed sources
//! - [`tracking`]: Duration and change tracking
//! - [`arbitrage`]: Stake calculator and stake sheet
//! - [`board`]: Aggregation, session state and preferences
//! - [`api`]: HTTP API for health, metrics and board views
//! - [`metrics`]: Prometheus metric recorders
//! - [`utils`]: Utility functions

pub mod api;
pub mod arbitrage;
pub mod board;
pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod tracking;
pub mod utils;

pub use config::Config;
pub use error::{DashboardError, Result};
