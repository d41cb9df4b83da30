//! Human readable labels for complementary sets, outcome keys and tournaments.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::ExtensionFields;

/// Placeholder substituted with the number extracted from a key.
const VALUE_PLACEHOLDER: &str = "{value}";

/// Shown when no tournament key is present.
pub const UNKNOWN_TOURNAMENT: &str = "Unknown Tournament";

static NUMERIC_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(-?\d+(?:\.\d+)?)").expect("valid regex"));

/// Label dictionary, normally loaded from `odds-display-names.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Labels {
    /// Complementary set key → label template.
    pub complementary_sets: HashMap<String, String>,
    /// Outcome key → label template.
    pub odd_keys: HashMap<String, String>,
    /// Tournament property keys, tried in order.
    pub tournament_keys: Vec<String>,
}

impl Default for Labels {
    fn default() -> Self {
        let complementary_sets = [
            ("three_way", "1 X 2"),
            ("one_vs_x2", "1 vs X2"),
            ("x_vs_12", "Draw vs 1 2"),
            ("two_vs_1x", "2 vs 1X"),
            ("both_score", "Both Teams score"),
            ("under_n_vs_over_n", "Total Under/Over {value}"),
            ("ah_n_home_vs_away", "Handicap {value}"),
            ("home_under_n_vs_home_over_n", "Home Total Under/Over {value}"),
            ("away_under_n_vs_away_over_n", "Away Total Under/Over {value}"),
        ];
        let odd_keys = [
            ("1_odd", "Home Wins"),
            ("draw_odd", "Draw"),
            ("2_odd", "Away Wins"),
            ("both_score_odd", "Both Teams Score"),
            ("both_noscore_odd", "Both Teams Don't Score"),
            ("12_odd", "Home or Away Wins"),
            ("X2_odd", "Draw or Away Wins"),
            ("under_n_odd", "Total Under {value}"),
            ("over_n_odd", "Total over {value}"),
            ("home_handicap_n_odd", "Home Handicap {value}"),
            ("away_handicap_n_odd", "Away Handicap {value}"),
            ("home_under_n_odd", "Home Total Under {value}"),
            ("home_over_n_odd", "Home Total Over {value}"),
            ("away_under_n_odd", "Away Total Under {value}"),
            ("away_over_n_odd", "Away Total Over {value}"),
        ];
        let tournament_keys = [
            "tournament_1xbet",
            "tournament_Tounesbet",
            "tournament_Asbet",
            "tournament_Clubx2",
        ];

        Self {
            complementary_sets: owned_pairs(&complementary_sets),
            odd_keys: owned_pairs(&odd_keys),
            tournament_keys: tournament_keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

fn owned_pairs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Split a key into its normalized template key and the first numeric value.
///
/// `under_2.5_odd` → (`under_n_odd`, `Some("2.5")`).
pub fn normalize_key(key: &str) -> (String, Option<String>) {
    let value = NUMERIC_PART
        .captures(key)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let normalized = NUMERIC_PART.replace_all(key, "_n").into_owned();
    (normalized, value)
}

fn resolve(
    dictionary: &HashMap<String, String>,
    key: &str,
    fallback: impl FnOnce() -> String,
) -> String {
    let (normalized, value) = normalize_key(key);

    if let (Some(template), Some(value)) = (dictionary.get(&normalized), value.as_deref()) {
        if template.contains(VALUE_PLACEHOLDER) {
            return template.replacen(VALUE_PLACEHOLDER, value, 1);
        }
    }

    dictionary.get(key).cloned().unwrap_or_else(fallback)
}

impl Labels {
    /// Label for a complementary set key.
    pub fn complementary_set_label(&self, set: &str) -> String {
        resolve(&self.complementary_sets, set, || set.replace('_', " "))
    }

    /// Label for an outcome key.
    pub fn odd_label(&self, odd_key: &str) -> String {
        resolve(&self.odd_keys, odd_key, || {
            odd_key.replacen("_odd", "", 1).replace('_', " ")
        })
    }

    /// Tournament name from the first object that carries one of the tournament keys.
    pub fn tournament_name(&self, candidates: &[&dyn ExtensionFields]) -> String {
        candidates
            .iter()
            .find_map(|c| c.lookup_tournament_name(&self.tournament_keys))
            .unwrap_or(UNKNOWN_TOURNAMENT)
            .to_string()
    }
}
