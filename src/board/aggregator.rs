//! Merging feed slices into a board and shaping it for display.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::FeedError;
use crate::feed::{AvailableCountries, FeedSource, MatchGroup, Mode, Opportunity, SliceKey};
use crate::metrics;
use crate::tracking::DurationTracker;

/// Matches every sport or date.
pub const ALL: &str = "all";

/// Board entries per page.
pub const PAGE_SIZE: usize = 20;

/// Sources never offered as a filter choice.
pub const EXCLUDED_SOURCES: [&str; 1] = ["Bet365"];

const SEARCH_URL: &str = "https://google.com/search";

/// Board sort key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortBy {
    /// Profit of the selected opportunity.
    #[default]
    Profit,
    /// Kick-off date and time.
    Time,
    /// How long the selected opportunity has been active.
    Duration,
}

/// Board sort direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// What to fetch and how to shape it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardQuery {
    pub mode: Mode,
    /// A sport, or `all`.
    pub sport: String,
    /// A `DD/MM/YYYY` date, or `all`.
    pub date: String,
    /// Selected sources; empty selects nothing in particular.
    pub sources: Vec<String>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    /// 1-based page.
    pub page: usize,
}

impl Default for BoardQuery {
    fn default() -> Self {
        Self {
            mode: Mode::Live,
            sport: ALL.to_string(),
            date: ALL.to_string(),
            sources: Vec::new(),
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
            page: 1,
        }
    }
}

impl BoardQuery {
    /// Sport to restrict fetching to, `None` for every sport.
    pub fn sport_filter(&self) -> Option<&str> {
        filter_value(&self.sport)
    }

    /// Date to restrict the board to, `None` for every date.
    pub fn date_filter(&self) -> Option<&str> {
        filter_value(&self.date)
    }

    /// Whether `other` needs different data from the feed.
    pub fn fetches_same_data(&self, other: &BoardQuery) -> bool {
        self.mode == other.mode && self.sport_filter() == other.sport_filter()
    }
}

fn filter_value(value: &str) -> Option<&str> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(ALL) {
        None
    } else {
        Some(value)
    }
}

/// Groups merged from every fetched slice.
#[derive(Debug, Clone, Default)]
pub struct CollectedGroups {
    /// Groups ordered by their best arbitrage percentage.
    pub groups: Vec<MatchGroup>,
    /// Slices requested.
    pub attempted: usize,
    /// Slices that failed and contributed nothing.
    pub failed: Vec<SliceKey>,
}

/// Fetch every slice of `mode` (optionally one sport) concurrently and merge them.
///
/// Failed slices are logged and skipped. Only when every slice fails is an
/// error returned.
#[instrument(skip(source, countries))]
pub async fn collect_groups(
    source: &dyn FeedSource,
    countries: &AvailableCountries,
    mode: Mode,
    sport: Option<&str>,
) -> Result<CollectedGroups, FeedError> {
    let slices = countries.slices(mode, sport);
    if slices.is_empty() {
        debug!("No slices to fetch");
        return Ok(CollectedGroups::default());
    }

    let results = join_all(slices.iter().map(|slice| source.fetch_slice(slice))).await;

    let mut collected = CollectedGroups {
        attempted: slices.len(),
        ..Default::default()
    };
    for (slice, result) in slices.into_iter().zip(results) {
        match result {
            Ok(groups) => {
                collected
                    .groups
                    .extend(groups.into_iter().map(|mut group| {
                        if group.country.is_empty() {
                            group.country = slice.country.clone();
                        }
                        group
                    }));
            }
            Err(e) => {
                warn!(
                    mode = %slice.mode,
                    sport = %slice.sport,
                    country = %slice.country,
                    error = %e,
                    "Skipping slice"
                );
                metrics::inc_slice_fetch_failures();
                collected.failed.push(slice);
            }
        }
    }

    if collected.failed.len() == collected.attempted {
        return Err(FeedError::AllSlicesFailed {
            attempted: collected.attempted,
        });
    }

    sort_by_best_arbitrage(&mut collected.groups);
    debug!(
        groups = collected.groups.len(),
        failed = collected.failed.len(),
        "Collected groups"
    );
    Ok(collected)
}

/// Order groups by their lowest arbitrage percentage; empty groups go last.
pub fn sort_by_best_arbitrage(groups: &mut [MatchGroup]) {
    groups.sort_by(|a, b| {
        match (a.best_arbitrage_percentage(), b.best_arbitrage_percentage()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

/// A group on the board together with the opportunity it shows.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardEntry {
    pub group: MatchGroup,
    selected: usize,
}

impl BoardEntry {
    /// The opportunity displayed for this group.
    pub fn selected(&self) -> &Opportunity {
        &self.group.opportunities[self.selected]
    }
}

/// Whether every source of `opportunity` is in `selected`.
pub fn opportunity_passes(opportunity: &Opportunity, selected: &[String]) -> bool {
    opportunity
        .sources()
        .all(|source| selected.iter().any(|s| s == source))
}

/// Apply the date and source filters and pick each group's opportunity.
pub fn select_entries(groups: &[MatchGroup], query: &BoardQuery) -> Vec<BoardEntry> {
    let date = query.date_filter();

    groups
        .iter()
        .filter(|group| date.map_or(true, |d| group.date == d))
        .filter_map(|group| {
            if group.opportunities.is_empty() {
                return None;
            }
            let passing = group
                .opportunities
                .iter()
                .position(|opp| opportunity_passes(opp, &query.sources));
            let selected = match passing {
                Some(index) => index,
                None if query.sources.is_empty() => 0,
                None => return None,
            };
            Some(BoardEntry {
                group: group.clone(),
                selected,
            })
        })
        .collect()
}

/// Stable sort of board entries.
pub fn sort_entries(
    entries: &mut [BoardEntry],
    sort_by: SortBy,
    order: SortOrder,
    tracker: &DurationTracker,
) {
    entries.sort_by(|a, b| {
        let ordering = match sort_by {
            SortBy::Profit => a
                .selected()
                .profit_percentage()
                .cmp(&b.selected().profit_percentage()),
            SortBy::Time => a.group.kickoff().cmp(&b.group.kickoff()),
            SortBy::Duration => {
                let elapsed = |e: &BoardEntry| tracker.elapsed_ms(&e.selected().unique_id).unwrap_or(0);
                elapsed(a).cmp(&elapsed(b))
            }
        };
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

/// One page of items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based, clamped to `1..=total_pages`.
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// Cut `items` into pages of `per_page` and return page `page`.
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Page<T> {
    let per_page = per_page.max(1);
    let total_pages = items.len().div_ceil(per_page).max(1);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * per_page;

    Page {
        items: items.iter().skip(start).take(per_page).cloned().collect(),
        page,
        total_pages,
        total_items: items.len(),
    }
}

/// Sources offered as filter choices: every group's sources, minus excluded ones, sorted.
pub fn available_sources(groups: &[MatchGroup]) -> Vec<String> {
    groups
        .iter()
        .flat_map(|g| g.all_sources.iter())
        .filter(|s| !EXCLUDED_SOURCES.contains(&s.as_str()))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct match dates, earliest first; unparseable dates last.
pub fn available_dates(groups: &[MatchGroup]) -> Vec<String> {
    let mut dates: Vec<String> = groups
        .iter()
        .map(|g| g.date.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    dates.sort_by_key(|d| {
        let parsed = crate::feed::types::parse_match_datetime(d, "00:00");
        (parsed.is_none(), parsed)
    });
    dates
}

/// Link to bet `source` on the group's match.
///
/// Uses the opportunity's `<source>_match_url` when published, otherwise a
/// web search for the match and source.
pub fn resolve_link(group: &MatchGroup, opportunity: &Opportunity, source: &str) -> String {
    if let Some(url) = opportunity.lookup_match_url(source) {
        return url.to_string();
    }
    let query = format!("{} vs {} {}", group.home_team, group.away_team, source);
    match Url::parse_with_params(SEARCH_URL, &[("q", query.as_str())]) {
        Ok(url) => url.to_string(),
        Err(_) => SEARCH_URL.to_string(),
    }
}

/// Record fetch timing for a whole refresh.
pub(crate) fn record_refresh(start: Instant) {
    metrics::record_refresh_latency(start);
    metrics::inc_refreshes();
}
