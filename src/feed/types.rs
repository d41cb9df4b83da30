//! Opportunity feed types: match groups, opportunities and their odds.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use smallvec::SmallVec;
use strum::{Display, EnumString};
use time::{Date, Month, PrimitiveDateTime, Time};

/// Feed mode: in-play or pre-match odds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Matches in progress.
    #[default]
    Live,
    /// Matches not started yet.
    Prematch,
}

impl Mode {
    /// Every mode, in discovery order.
    pub const ALL: [Mode; 2] = [Mode::Live, Mode::Prematch];
}

/// Odds and source for one outcome, as found in the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddInfo {
    /// Decimal odds.
    pub value: Decimal,
    /// Bookmaker offering these odds.
    pub source: String,
}

/// One outcome of an opportunity.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeOdds {
    /// Outcome key (e.g. `1_odd`, `under_2.5_odd`).
    pub key: String,
    /// Decimal odds.
    pub odds: Decimal,
    /// Bookmaker offering these odds.
    pub source: String,
}

/// Ordered outcome odds of one opportunity (2 or 3 entries in practice).
///
/// Order follows the feed document, which also fixes the leg order of the
/// stake calculator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BestOdds(SmallVec<[OutcomeOdds; 3]>);

impl BestOdds {
    /// Build from `(key, odds, source)` triples.
    pub fn from_entries<I, K, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Decimal, S)>,
        K: Into<String>,
        S: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(key, odds, source)| OutcomeOdds {
                    key: key.into(),
                    odds,
                    source: source.into(),
                })
                .collect(),
        )
    }

    /// Iterate outcomes in feed order.
    pub fn iter(&self) -> impl Iterator<Item = &OutcomeOdds> {
        self.0.iter()
    }

    /// Look up an outcome by key.
    pub fn get(&self, key: &str) -> Option<&OutcomeOdds> {
        self.0.iter().find(|o| o.key == key)
    }

    /// Position of an outcome key.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.0.iter().position(|o| o.key == key)
    }

    /// Number of outcomes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no outcomes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for BestOdds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for outcome in &self.0 {
            map.serialize_entry(
                &outcome.key,
                &OddInfo {
                    value: outcome.odds,
                    source: outcome.source.clone(),
                },
            )?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BestOdds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedOdds;

        impl<'de> Visitor<'de> for OrderedOdds {
            type Value = BestOdds;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of outcome key to {value, source}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<BestOdds, A::Error> {
                let mut outcomes = SmallVec::new();
                while let Some((key, info)) = access.next_entry::<String, OddInfo>()? {
                    outcomes.push(OutcomeOdds {
                        key,
                        odds: info.value,
                        source: info.source,
                    });
                }
                Ok(BestOdds(outcomes))
            }
        }

        deserializer.deserialize_map(OrderedOdds)
    }
}

/// Read access to the open-ended string fields a feed object may carry
/// (per-source match URLs, tournament names).
pub trait ExtensionFields {
    /// String value of an extension field, if present and non-empty.
    fn extension(&self, key: &str) -> Option<&str>;

    /// First present value among `candidate_keys`.
    fn lookup_tournament_name(&self, candidate_keys: &[String]) -> Option<&str> {
        candidate_keys.iter().find_map(|key| self.extension(key))
    }
}

fn string_field<'a>(extra: &'a BTreeMap<String, Value>, key: &str) -> Option<&'a str> {
    extra
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// An arbitrage opportunity as published by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Identifier, stable across refreshes.
    pub unique_id: String,
    /// Complementary outcome set (e.g. `three_way`, `under_2.5_vs_over_2.5`).
    pub complementary_set: String,
    /// Odds per outcome key.
    pub best_odds: BestOdds,
    /// Sum of implied probabilities; below 1.0 is a genuine arbitrage.
    pub arbitrage_percentage: Decimal,
    /// Comma separated contributing sources.
    pub arbitrage_sources: String,
    /// ISO timestamp of first detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Duration reported by the upstream detector (e.g. "34 seconds").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_duration: Option<String>,
    /// Source with the misvalued odds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misvalue_source: Option<String>,
    /// Per-source URLs, tournament names and other dynamic fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Opportunity {
    /// An opportunity built from odds alone, for calculations outside the feed.
    pub fn ad_hoc(unique_id: impl Into<String>, best_odds: BestOdds) -> Self {
        let sources = best_odds
            .iter()
            .map(|o| o.source.as_str())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        let arbitrage_percentage = best_odds
            .iter()
            .filter(|o| o.odds > Decimal::ZERO)
            .map(|o| Decimal::ONE / o.odds)
            .fold(Decimal::ZERO, Decimal::saturating_add);
        Self {
            unique_id: unique_id.into(),
            complementary_set: String::new(),
            best_odds,
            arbitrage_percentage,
            arbitrage_sources: sources,
            created_at: None,
            activity_duration: None,
            misvalue_source: None,
            extra: BTreeMap::new(),
        }
    }

    /// Guaranteed profit in percentage points: `(1 - arbitrage_percentage) * 100`.
    pub fn profit_percentage(&self) -> Decimal {
        Decimal::ONE
            .saturating_sub(self.arbitrage_percentage)
            .saturating_mul(Decimal::ONE_HUNDRED)
    }

    /// Contributing sources, split and trimmed.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.arbitrage_sources
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Reported activity duration, `"0s"` when absent.
    pub fn reported_duration(&self) -> &str {
        self.activity_duration.as_deref().unwrap_or("0s")
    }

    /// The `<source>_match_url` field, if published.
    pub fn lookup_match_url(&self, source: &str) -> Option<&str> {
        self.extension(&format!("{}_match_url", source))
    }
}

impl ExtensionFields for Opportunity {
    fn extension(&self, key: &str) -> Option<&str> {
        string_field(&self.extra, key)
    }
}

/// All opportunities found for one real-world match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchGroup {
    /// Composite, dash-delimited group identifier.
    pub group_id: String,
    /// Home team.
    pub home_team: String,
    /// Away team.
    pub away_team: String,
    /// Match date (`DD/MM/YYYY`).
    pub date: String,
    /// Kick-off time (`HH:MM`).
    pub time: String,
    /// Country file the group came from.
    #[serde(default)]
    pub country: String,
    /// Every source quoting this match.
    #[serde(default)]
    pub all_sources: Vec<String>,
    /// Opportunities, best first.
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
    /// Tournament names and other dynamic fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MatchGroup {
    /// Lowest arbitrage percentage among the group's opportunities.
    pub fn best_arbitrage_percentage(&self) -> Option<Decimal> {
        self.opportunities
            .iter()
            .map(|o| o.arbitrage_percentage)
            .min()
    }

    /// Kick-off parsed from `DD/MM/YYYY` and `HH:MM`.
    pub fn kickoff(&self) -> Option<PrimitiveDateTime> {
        parse_match_datetime(&self.date, &self.time)
    }

    /// Display title, e.g. "Arsenal vs Chelsea".
    pub fn title(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }

    /// Find an opportunity by id.
    pub fn opportunity(&self, unique_id: &str) -> Option<&Opportunity> {
        self.opportunities.iter().find(|o| o.unique_id == unique_id)
    }
}

impl ExtensionFields for MatchGroup {
    fn extension(&self, key: &str) -> Option<&str> {
        string_field(&self.extra, key)
    }
}

/// Parse a `DD/MM/YYYY` date and `HH:MM` time.
pub fn parse_match_datetime(date: &str, time: &str) -> Option<PrimitiveDateTime> {
    let mut date_parts = date.trim().split('/');
    let day: u8 = date_parts.next()?.parse().ok()?;
    let month: u8 = date_parts.next()?.parse().ok()?;
    let year: i32 = date_parts.next()?.parse().ok()?;
    if date_parts.next().is_some() {
        return None;
    }

    let mut time_parts = time.trim().split(':');
    let hour: u8 = time_parts.next()?.parse().ok()?;
    let minute: u8 = time_parts.next()?.parse().ok()?;
    if time_parts.next().is_some() {
        return None;
    }

    let date = Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()?;
    let time = Time::from_hms(hour, minute, 0).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}
