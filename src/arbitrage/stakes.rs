//! Per-opportunity stake sheet with auto and manual modes.
//!
//! In auto mode the total stake is authoritative and legs are derived from
//! it. Editing a single leg (or fixing one) switches to manual mode, where the
//! legs are authoritative and the total is their sum. Editing the total,
//! resetting, or selecting a different opportunity returns to auto mode.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use super::calculator::{
    active_rounding, evaluate_stakes, optimal_stakes, rebalance_around, round_stakes,
    validate_odds, ArbitrageCalculation,
};
use crate::error::CalcError;
use crate::feed::{BestOdds, Opportunity};

/// Total stake used before any preference is loaded.
pub const DEFAULT_TOTAL_STAKE: Decimal = dec!(100);

/// Who owns the numbers on the sheet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StakeMode {
    /// Legs derived from the total.
    #[default]
    Auto,
    /// Legs entered by hand; total derived.
    Manual,
}

/// Parse a stake typed by a user. Anything unparseable is zero.
pub fn parse_stake_input(raw: &str) -> Decimal {
    Decimal::from_str(raw.trim()).unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Clone)]
struct Selection {
    unique_id: String,
    odds: BestOdds,
}

/// Read-only view of a stake sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakeSheetView {
    pub opportunity_id: Option<String>,
    pub mode: StakeMode,
    pub total_stake: Decimal,
    pub rounding_preference: u32,
    pub active_rounding: u32,
    pub calculation: Option<ArbitrageCalculation>,
}

/// Stake state for the opportunity being inspected.
#[derive(Debug, Clone)]
pub struct StakeSheet {
    total_stake: Decimal,
    rounding_preference: u32,
    active_rounding: u32,
    mode: StakeMode,
    selection: Option<Selection>,
    stakes: Vec<Decimal>,
    calculation: Option<ArbitrageCalculation>,
}

impl Default for StakeSheet {
    fn default() -> Self {
        Self::new(DEFAULT_TOTAL_STAKE, 1)
    }
}

impl StakeSheet {
    /// Sheet seeded with a stored total and rounding preference.
    pub fn new(total_stake: Decimal, rounding_preference: u32) -> Self {
        let rounding_preference = rounding_preference.max(1);
        Self {
            total_stake,
            rounding_preference,
            active_rounding: active_rounding(rounding_preference, total_stake),
            mode: StakeMode::Auto,
            selection: None,
            stakes: Vec::new(),
            calculation: None,
        }
    }

    /// Inspect `opportunity`.
    ///
    /// A different opportunity starts over in auto mode. Re-selecting the same
    /// one (e.g. with refreshed odds) keeps manual stakes as entered.
    pub fn select(&mut self, opportunity: &Opportunity) -> Result<(), CalcError> {
        validate_odds(&opportunity.best_odds)?;

        let same_id = self
            .selection
            .as_ref()
            .is_some_and(|s| s.unique_id == opportunity.unique_id);
        let same_legs = self.selection.as_ref().is_some_and(|s| {
            s.odds.len() == opportunity.best_odds.len()
                && s.odds
                    .iter()
                    .zip(opportunity.best_odds.iter())
                    .all(|(a, b)| a.key == b.key)
        });

        if !(same_id && same_legs) {
            self.mode = StakeMode::Auto;
            debug!(opportunity = %opportunity.unique_id, "Selected opportunity");
        }

        self.selection = Some(Selection {
            unique_id: opportunity.unique_id.clone(),
            odds: opportunity.best_odds.clone(),
        });
        self.recompute()
    }

    /// Type a new total stake. Returns to auto mode.
    pub fn set_total_stake(&mut self, total_stake: Decimal) -> Result<(), CalcError> {
        self.total_stake = total_stake;
        self.active_rounding = active_rounding(self.rounding_preference, total_stake);
        self.mode = StakeMode::Auto;
        self.recompute_if_selected()
    }

    /// [`Self::set_total_stake`] from raw text.
    pub fn set_total_stake_input(&mut self, raw: &str) -> Result<(), CalcError> {
        self.set_total_stake(parse_stake_input(raw))
    }

    /// Hand-edit one leg. Switches to manual mode.
    pub fn set_leg_stake(&mut self, key: &str, stake: Decimal) -> Result<(), CalcError> {
        let index = self.leg_index(key)?;
        self.stakes[index] = stake;
        self.mode = StakeMode::Manual;
        self.recompute()
    }

    /// [`Self::set_leg_stake`] from raw text.
    pub fn set_leg_stake_input(&mut self, key: &str, raw: &str) -> Result<(), CalcError> {
        self.set_leg_stake(key, parse_stake_input(raw))
    }

    /// Back to optimal stakes for the current total, rounded to the preference.
    ///
    /// The total becomes the sum of the rounded legs.
    pub fn reset(&mut self) -> Result<(), CalcError> {
        self.mode = StakeMode::Auto;
        self.active_rounding = self.rounding_preference;

        let Some(selection) = &self.selection else {
            return Ok(());
        };
        let optimal = optimal_stakes(&selection.odds, self.total_stake)?;
        let stakes = round_stakes(&optimal, self.rounding_preference);
        let calculation = evaluate_stakes(&selection.odds, &stakes)?;
        self.total_stake = calculation.total_stake;
        self.stakes = stakes;
        self.calculation = Some(calculation);
        Ok(())
    }

    /// Pick a new rounding preference and reset to it.
    pub fn set_rounding_preference(&mut self, granularity: u32) -> Result<(), CalcError> {
        self.rounding_preference = granularity.max(1);
        self.reset()
    }

    /// Keep `key` at `stake` and size the other legs for equal payout.
    ///
    /// Switches to manual mode with whole-unit rounding. Unknown legs and
    /// non-positive stakes leave the sheet untouched.
    pub fn fix_leg(&mut self, key: &str, stake: Decimal) -> Result<(), CalcError> {
        let result = self.try_fix_leg(key, stake);
        if let Err(e) = &result {
            warn!(leg = key, error = %e, "Ignoring fix-one-leg request");
        }
        result
    }

    fn try_fix_leg(&mut self, key: &str, stake: Decimal) -> Result<(), CalcError> {
        let selection = self.selection.as_ref().ok_or(CalcError::NothingSelected)?;
        let stakes = rebalance_around(&selection.odds, key, stake)?;
        let calculation = evaluate_stakes(&selection.odds, &stakes)?;

        self.total_stake = calculation.total_stake;
        self.stakes = stakes;
        self.calculation = Some(calculation);
        self.mode = StakeMode::Manual;
        self.active_rounding = 1;
        Ok(())
    }

    /// Fix a leg at whatever stake it currently holds.
    pub fn fix_current_leg(&mut self, key: &str) -> Result<(), CalcError> {
        let stake = match self.leg_index(key) {
            Ok(index) => self.stakes[index],
            Err(e) => {
                warn!(leg = key, error = %e, "Ignoring fix-one-leg request");
                return Err(e);
            }
        };
        self.fix_leg(key, stake)
    }

    pub fn mode(&self) -> StakeMode {
        self.mode
    }

    /// Authoritative total in auto mode; sum of legs in manual mode.
    pub fn total_stake(&self) -> Decimal {
        self.total_stake
    }

    pub fn rounding_preference(&self) -> u32 {
        self.rounding_preference
    }

    pub fn active_rounding(&self) -> u32 {
        self.active_rounding
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selection.as_ref().map(|s| s.unique_id.as_str())
    }

    /// `(key, stake)` per leg in outcome order.
    pub fn stakes(&self) -> Vec<(&str, Decimal)> {
        match &self.selection {
            Some(selection) => selection
                .odds
                .iter()
                .map(|o| o.key.as_str())
                .zip(self.stakes.iter().copied())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn calculation(&self) -> Option<&ArbitrageCalculation> {
        self.calculation.as_ref()
    }

    pub fn view(&self) -> StakeSheetView {
        StakeSheetView {
            opportunity_id: self.selected_id().map(str::to_string),
            mode: self.mode,
            total_stake: self.total_stake,
            rounding_preference: self.rounding_preference,
            active_rounding: self.active_rounding,
            calculation: self.calculation.clone(),
        }
    }

    fn leg_index(&self, key: &str) -> Result<usize, CalcError> {
        let selection = self.selection.as_ref().ok_or(CalcError::NothingSelected)?;
        selection.odds.position(key).ok_or_else(|| CalcError::UnknownLeg {
            key: key.to_string(),
        })
    }

    fn recompute_if_selected(&mut self) -> Result<(), CalcError> {
        if self.selection.is_some() {
            self.recompute()
        } else {
            Ok(())
        }
    }

    fn recompute(&mut self) -> Result<(), CalcError> {
        let selection = self.selection.as_ref().ok_or(CalcError::NothingSelected)?;

        if self.mode == StakeMode::Auto || self.stakes.len() != selection.odds.len() {
            let optimal = optimal_stakes(&selection.odds, self.total_stake)?;
            self.stakes = round_stakes(&optimal, self.active_rounding);
        }

        let calculation = evaluate_stakes(&selection.odds, &self.stakes)?;
        if self.mode == StakeMode::Manual {
            self.total_stake = calculation.total_stake;
        }
        self.calculation = Some(calculation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Opportunity;
    use pretty_assertions::assert_eq;

    fn opportunity(id: &str, odds: &[(&str, Decimal)]) -> Opportunity {
        serde_json::from_value(serde_json::json!({
            "unique_id": id,
            "complementary_set": "1x2",
            "best_odds": odds
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::json!({"value": v, "source": "book"})))
                .collect::<serde_json::Map<_, _>>(),
            "arbitrage_percentage": "0.97",
            "arbitrage_sources": "book",
        }))
        .unwrap()
    }

    fn two_way(id: &str) -> Opportunity {
        opportunity(id, &[("1_odd", dec!(2.10)), ("2_odd", dec!(2.10))])
    }

    #[test]
    fn parses_stake_input() {
        assert_eq!(parse_stake_input(" 150 "), dec!(150));
        assert_eq!(parse_stake_input("12.5"), dec!(12.5));
        assert_eq!(parse_stake_input("abc"), Decimal::ZERO);
        assert_eq!(parse_stake_input(""), Decimal::ZERO);
    }

    #[test]
    fn auto_mode_rounds_with_active_granularity() {
        let mut sheet = StakeSheet::new(dec!(150), 10);
        sheet.select(&opportunity("a", &[("1_odd", dec!(2.5)), ("2_odd", dec!(1.8))])).unwrap();

        assert_eq!(sheet.active_rounding(), 10);
        // Optimal split is 62.79 / 87.21.
        assert_eq!(sheet.stakes(), vec![("1_odd", dec!(60)), ("2_odd", dec!(90))]);
        assert_eq!(sheet.mode(), StakeMode::Auto);
        assert_eq!(sheet.total_stake(), dec!(150));
    }

    #[test]
    fn total_edit_downgrades_rounding_and_returns_to_auto() {
        let mut sheet = StakeSheet::new(dec!(100), 10);
        sheet.select(&two_way("a")).unwrap();
        sheet.set_leg_stake("1_odd", dec!(70)).unwrap();
        assert_eq!(sheet.mode(), StakeMode::Manual);

        sheet.set_total_stake_input("123").unwrap();
        assert_eq!(sheet.mode(), StakeMode::Auto);
        assert_eq!(sheet.active_rounding(), 1);
        assert_eq!(sheet.total_stake(), dec!(123));

        sheet.set_total_stake_input("oops").unwrap();
        assert_eq!(sheet.total_stake(), Decimal::ZERO);
        assert_eq!(sheet.active_rounding(), 1);
        assert_eq!(sheet.calculation().unwrap().profit, Decimal::ZERO);
    }

    #[test]
    fn leg_edit_derives_total_and_keeps_unequal_stakes() {
        let mut sheet = StakeSheet::new(dec!(100), 1);
        sheet.select(&two_way("a")).unwrap();

        sheet.set_leg_stake_input("1_odd", "70").unwrap();

        assert_eq!(sheet.mode(), StakeMode::Manual);
        assert_eq!(sheet.total_stake(), dec!(120));
        let calc = sheet.calculation().unwrap();
        assert_eq!(calc.total_stake, dec!(120));
        // 50 * 2.10 - 120
        assert_eq!(calc.profit, dec!(-15));
    }

    #[test]
    fn reselecting_same_opportunity_keeps_manual_stakes() {
        let mut sheet = StakeSheet::new(dec!(100), 1);
        sheet.select(&two_way("a")).unwrap();
        sheet.set_leg_stake("1_odd", dec!(70)).unwrap();

        sheet
            .select(&opportunity("a", &[("1_odd", dec!(2.2)), ("2_odd", dec!(2.1))]))
            .unwrap();
        assert_eq!(sheet.mode(), StakeMode::Manual);
        assert_eq!(sheet.stakes()[0], ("1_odd", dec!(70)));

        sheet.select(&two_way("b")).unwrap();
        assert_eq!(sheet.mode(), StakeMode::Auto);
        assert_eq!(sheet.stakes(), vec![("1_odd", dec!(60)), ("2_odd", dec!(60))]);
    }

    #[test]
    fn reset_rounds_with_preference_and_sums_total() {
        let mut sheet = StakeSheet::new(dec!(153), 10);
        sheet.select(&two_way("a")).unwrap();
        assert_eq!(sheet.active_rounding(), 1);

        sheet.reset().unwrap();

        assert_eq!(sheet.mode(), StakeMode::Auto);
        assert_eq!(sheet.active_rounding(), 10);
        // 76.5 rounds away from zero to 80 on both legs.
        assert_eq!(sheet.stakes(), vec![("1_odd", dec!(80)), ("2_odd", dec!(80))]);
        assert_eq!(sheet.total_stake(), dec!(160));
    }

    #[test]
    fn fix_leg_rebalances_and_forces_whole_units() {
        let mut sheet = StakeSheet::new(dec!(150), 10);
        sheet
            .select(&opportunity("a", &[("A", dec!(2.0)), ("B", dec!(2.0))]))
            .unwrap();

        sheet.fix_leg("A", dec!(100)).unwrap();

        assert_eq!(sheet.stakes(), vec![("A", dec!(100)), ("B", dec!(100))]);
        assert_eq!(sheet.total_stake(), dec!(200));
        assert_eq!(sheet.mode(), StakeMode::Manual);
        assert_eq!(sheet.active_rounding(), 1);
    }

    #[test]
    fn failed_fix_leaves_sheet_untouched() {
        let mut sheet = StakeSheet::new(dec!(100), 1);
        sheet.select(&two_way("a")).unwrap();
        let before = sheet.view();

        assert!(sheet.fix_leg("draw_odd", dec!(10)).is_err());
        assert!(sheet.fix_leg("1_odd", dec!(0)).is_err());
        assert!(sheet.fix_current_leg("nope").is_err());

        assert_eq!(sheet.view(), before);
    }

    #[test]
    fn nothing_selected_is_reported() {
        let mut sheet = StakeSheet::default();
        assert_eq!(
            sheet.set_leg_stake("1_odd", dec!(5)),
            Err(CalcError::NothingSelected)
        );
        assert!(sheet.set_total_stake(dec!(40)).is_ok());
        assert!(sheet.calculation().is_none());
    }

    #[test]
    fn rounding_preference_change_resets() {
        let mut sheet = StakeSheet::new(dec!(100), 1);
        sheet.select(&two_way("a")).unwrap();
        sheet.set_leg_stake("1_odd", dec!(33)).unwrap();

        sheet.set_rounding_preference(20).unwrap();
        assert_eq!(sheet.mode(), StakeMode::Auto);
        assert_eq!(sheet.rounding_preference(), 20);
        assert_eq!(sheet.active_rounding(), 20);
    }
}
