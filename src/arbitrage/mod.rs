//! Arbitrage stake calculations.
//!
//! This module handles:
//! - Equal-payout stake splits and profit figures
//! - Stake rounding and granularity downgrade
//! - Auto/manual stake sheet and fix-one-leg rebalancing

pub mod calculator;
pub mod stakes;

pub use calculator::{
    active_rounding, calculate_arbitrage, evaluate_stakes, implied_probability, optimal_stakes,
    rebalance_around, round_to_nearest, validate_odds, ArbitrageCalculation, OutcomeScenario,
    DOWNGRADE_CANDIDATES, ROUNDING_CHOICES,
};
pub use stakes::{parse_stake_input, StakeMode, StakeSheet, StakeSheetView, DEFAULT_TOTAL_STAKE};
