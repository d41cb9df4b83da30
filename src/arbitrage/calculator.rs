//! Stake split and profit calculations for arbitrage opportunities.
//!
//! All arithmetic is done in `Decimal`. A calculation is produced for any
//! valid odds set, including ones whose implied probability is at or above
//! one; callers decide how to surface a non-positive profit.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::error::CalcError;
use crate::feed::BestOdds;

/// Rounding granularities a user can pick.
pub const ROUNDING_CHOICES: [u32; 6] = [1, 5, 10, 20, 50, 100];

/// Granularities tried, in order, when the preferred one does not divide the total.
pub const DOWNGRADE_CANDIDATES: [u32; 4] = [10, 5, 2, 1];

/// What happens if one outcome wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeScenario {
    /// Outcome key (`1_odd`, `over_2.5_odd`, ...).
    pub key: String,
    /// Human readable outcome (`1`, `over 2.5`, ...).
    pub description: String,
    pub odds: Decimal,
    pub source: String,
    pub stake: Decimal,
    /// `stake * odds`.
    pub winnings: Decimal,
    /// `winnings - total_stake`.
    pub net_result: Decimal,
}

/// Stake split and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageCalculation {
    /// Sum of all leg stakes.
    pub total_stake: Decimal,
    /// Guaranteed profit: the worst net result across outcomes.
    pub profit: Decimal,
    /// `profit / total_stake * 100`, zero when nothing is staked.
    pub profit_percentage: Decimal,
    /// Sum of `1 / odds` over all outcomes.
    pub implied_probability: Decimal,
    pub outcomes: Vec<OutcomeScenario>,
}

impl ArbitrageCalculation {
    /// Whether the odds guarantee a profit at all.
    pub fn is_arbitrage(&self) -> bool {
        self.implied_probability < Decimal::ONE
    }

    /// Leg stakes in outcome order.
    pub fn stakes(&self) -> Vec<Decimal> {
        self.outcomes.iter().map(|o| o.stake).collect()
    }
}

/// `1_odd` → `1`, `under_2.5_odd` → `under 2.5`.
pub fn describe_outcome(key: &str) -> String {
    key.replacen("_odd", "", 1).replace('_', " ")
}

/// Reject empty outcome sets and non-positive odds.
pub fn validate_odds(odds: &BestOdds) -> Result<(), CalcError> {
    if odds.is_empty() {
        return Err(CalcError::NoOutcomes);
    }
    match odds.iter().find(|o| o.odds <= Decimal::ZERO) {
        Some(bad) => Err(CalcError::InvalidOdds {
            key: bad.key.clone(),
            value: bad.odds,
        }),
        None => Ok(()),
    }
}

fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Result<Decimal, CalcError> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
        .ok_or(CalcError::Overflow)
}

/// Sum of `1 / odds`.
pub fn implied_probability(odds: &BestOdds) -> Result<Decimal, CalcError> {
    validate_odds(odds)?;
    let inverses = odds
        .iter()
        .map(|o| Decimal::ONE.checked_div(o.odds).ok_or(CalcError::Overflow))
        .collect::<Result<Vec<_>, _>>()?;
    checked_sum(inverses)
}

/// Equal-payout stakes for `total_stake`: `total * (1 / odds_i) / P`.
///
/// A non-positive total yields all zeros.
pub fn optimal_stakes(odds: &BestOdds, total_stake: Decimal) -> Result<Vec<Decimal>, CalcError> {
    let implied = implied_probability(odds)?;
    if total_stake <= Decimal::ZERO {
        return Ok(vec![Decimal::ZERO; odds.len()]);
    }
    odds.iter()
        .map(|o| {
            o.odds
                .checked_mul(implied)
                .and_then(|weight| total_stake.checked_div(weight))
                .ok_or(CalcError::Overflow)
        })
        .collect()
}

/// Optimal split of `total_stake`, unrounded.
pub fn calculate_arbitrage(
    odds: &BestOdds,
    total_stake: Decimal,
) -> Result<ArbitrageCalculation, CalcError> {
    let stakes = optimal_stakes(odds, total_stake)?;
    evaluate_stakes(odds, &stakes)
}

/// Evaluate an arbitrary stake vector (one stake per outcome, in order).
///
/// The total is the sum of the stakes and the profit is the minimum net
/// result, so unequal splits are reported honestly.
pub fn evaluate_stakes(
    odds: &BestOdds,
    stakes: &[Decimal],
) -> Result<ArbitrageCalculation, CalcError> {
    let implied_probability = implied_probability(odds)?;
    if stakes.len() != odds.len() {
        return Err(CalcError::StakeCountMismatch {
            expected: odds.len(),
            actual: stakes.len(),
        });
    }

    let total_stake = checked_sum(stakes.iter().copied())?;
    let outcomes = odds
        .iter()
        .zip(stakes)
        .map(|(outcome, &stake)| {
            let winnings = stake.checked_mul(outcome.odds).ok_or(CalcError::Overflow)?;
            Ok(OutcomeScenario {
                key: outcome.key.clone(),
                description: describe_outcome(&outcome.key),
                odds: outcome.odds,
                source: outcome.source.clone(),
                stake,
                winnings,
                net_result: winnings.checked_sub(total_stake).ok_or(CalcError::Overflow)?,
            })
        })
        .collect::<Result<Vec<OutcomeScenario>, CalcError>>()?;

    let profit = outcomes
        .iter()
        .map(|o| o.net_result)
        .min()
        .unwrap_or(Decimal::ZERO);
    let profit_percentage = if total_stake.is_zero() {
        Decimal::ZERO
    } else {
        profit
            .checked_div(total_stake)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or(CalcError::Overflow)?
    };

    Ok(ArbitrageCalculation {
        total_stake,
        profit,
        profit_percentage,
        implied_probability,
        outcomes,
    })
}

/// Round to the nearest whole unit, halves away from zero.
pub fn round_whole(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to the nearest multiple of `granularity`; zero leaves the value as is.
///
/// Near the top of the `Decimal` range the value rounds toward zero instead.
pub fn round_to_nearest(value: Decimal, granularity: u32) -> Decimal {
    if granularity == 0 {
        return value;
    }
    let step = Decimal::from(granularity);
    let units = value / step;
    round_whole(units)
        .checked_mul(step)
        .unwrap_or_else(|| units.trunc() * step)
}

/// Round every stake to `granularity`.
pub fn round_stakes(stakes: &[Decimal], granularity: u32) -> Vec<Decimal> {
    stakes
        .iter()
        .map(|&s| round_to_nearest(s, granularity))
        .collect()
}

/// Granularity actually applied for a total stake.
///
/// Picks the first of [`DOWNGRADE_CANDIDATES`] not above `preferred` that
/// divides `total_stake`; falls back to 1, also for non-positive totals.
pub fn active_rounding(preferred: u32, total_stake: Decimal) -> u32 {
    if total_stake <= Decimal::ZERO {
        return 1;
    }
    DOWNGRADE_CANDIDATES
        .iter()
        .copied()
        .filter(|&c| c <= preferred)
        .find(|&c| (total_stake % Decimal::from(c)).is_zero())
        .unwrap_or(1)
}

/// Keep `fixed_key` at `fixed_stake` and size the other legs for equal payout,
/// rounded to whole units.
pub fn rebalance_around(
    odds: &BestOdds,
    fixed_key: &str,
    fixed_stake: Decimal,
) -> Result<Vec<Decimal>, CalcError> {
    validate_odds(odds)?;
    let fixed = odds.get(fixed_key).ok_or_else(|| CalcError::UnknownLeg {
        key: fixed_key.to_string(),
    })?;
    if fixed_stake <= Decimal::ZERO {
        return Err(CalcError::InvalidFixedStake(fixed_stake));
    }

    let payout = fixed_stake.checked_mul(fixed.odds).ok_or(CalcError::Overflow)?;
    odds.iter()
        .map(|o| {
            if o.key == fixed_key {
                Ok(fixed_stake)
            } else {
                payout
                    .checked_div(o.odds)
                    .map(round_whole)
                    .ok_or(CalcError::Overflow)
            }
        })
        .collect()
}
