//! Dashboard session: owns the feed source, the trackers and the latest board.
//!
//! One session corresponds to one open dashboard. It is shared behind an
//! `Arc` by the HTTP handlers, the terminal watcher and the auto-refresh
//! tasks it spawns.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::aggregator::{
    available_dates, available_sources, collect_groups, paginate, record_refresh, resolve_link,
    select_entries, sort_entries, BoardEntry, BoardQuery, Page, PAGE_SIZE,
};
use crate::config::MIN_REFRESH_DELAY_MS;
use crate::error::FeedError;
use crate::feed::{
    find_matching_group, load_labels_or_default, AvailableCountries, ExtensionFields, FeedSource,
    GroupMatch, Labels, MatchGroup, Mode, Opportunity, SliceKey,
};
use crate::metrics;
use crate::tracking::{
    profit_moves, ChangeKind, ChangeTracker, Clock, DurationSnapshot, DurationTracker,
    OpportunityChange, ProfitSample, SystemClock, TrackerStats, CHANGE_DISPLAY_WINDOW,
};

/// Groups from one applied refresh.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: u64,
    pub mode: Mode,
    pub groups: Vec<MatchGroup>,
    pub attempted_slices: usize,
    pub failed_slices: Vec<SliceKey>,
    pub fetched_at: OffsetDateTime,
}

impl Snapshot {
    fn opportunities(&self) -> impl Iterator<Item = &Opportunity> {
        self.groups.iter().flat_map(|g| g.opportunities.iter())
    }
}

/// Result of a refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The refresh became the current board.
    Applied {
        generation: u64,
        changes: Vec<OpportunityChange>,
    },
    /// A newer refresh was applied first; this one was dropped.
    Stale { generation: u64 },
}

/// Changes kept visible for a short window after they were reported.
#[derive(Debug, Default)]
pub struct ChangeHighlights {
    active: HashMap<String, (ChangeKind, i64)>,
}

impl ChangeHighlights {
    fn window_ms() -> i64 {
        CHANGE_DISPLAY_WINDOW.as_millis() as i64
    }

    /// Remember `changes` as reported at `now_ms`.
    pub fn record(&mut self, changes: &[OpportunityChange], now_ms: i64) {
        self.prune(now_ms);
        for change in changes {
            self.active.insert(change.id.clone(), (change.kind, now_ms));
        }
    }

    /// Highlight for `id` if still inside the display window.
    pub fn active(&self, id: &str, now_ms: i64) -> Option<ChangeKind> {
        self.active
            .get(id)
            .filter(|(_, at)| now_ms - at < Self::window_ms())
            .map(|(kind, _)| *kind)
    }

    /// Drop expired highlights.
    pub fn prune(&mut self, now_ms: i64) {
        self.active.retain(|_, (_, at)| now_ms - *at < Self::window_ms());
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

/// One outcome of a displayed opportunity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeLink {
    pub key: String,
    pub label: String,
    pub odds: Decimal,
    pub source: String,
    pub url: String,
}

/// A board row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardEntryView {
    pub group_id: String,
    pub title: String,
    pub date: String,
    pub time: String,
    pub country: String,
    pub tournament: String,
    pub opportunity_id: String,
    pub complementary_set: String,
    pub profit_percentage: Decimal,
    pub arbitrage_percentage: Decimal,
    pub sources: String,
    pub opportunity_count: usize,
    pub duration: DurationSnapshot,
    pub highlight: Option<ChangeKind>,
    pub outcomes: Vec<OutcomeLink>,
}

/// The board as shown for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardView {
    /// Generation of the snapshot shown, zero before the first refresh.
    pub generation: u64,
    pub mode: Mode,
    pub fetched_at: Option<String>,
    pub page: Page<BoardEntryView>,
    pub available_sources: Vec<String>,
    pub available_dates: Vec<String>,
    pub attempted_slices: usize,
    pub failed_slices: usize,
}

/// One opportunity inside a detail view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailOpportunity {
    pub opportunity_id: String,
    pub complementary_set: String,
    pub profit_percentage: Decimal,
    pub duration: DurationSnapshot,
    pub outcomes: Vec<OutcomeLink>,
}

/// A match group re-located after a refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDetailView {
    /// Id that was asked for.
    pub requested_id: String,
    /// Whether the id matched exactly rather than through a shared sub-id.
    pub exact: bool,
    pub tournament: String,
    pub group: MatchGroup,
    pub opportunities: Vec<DetailOpportunity>,
    /// Profit moves since the previous detail refresh.
    pub changes: Vec<OpportunityChange>,
}

/// Detail lookup result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupDetail {
    Available(GroupDetailView),
    NoLongerAvailable { group_id: String },
}

impl GroupDetail {
    pub fn is_available(&self) -> bool {
        matches!(self, GroupDetail::Available(_))
    }
}

/// Session bookkeeping for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub generation: u64,
    pub applied_generation: u64,
    pub groups: usize,
    pub opportunities: usize,
    pub failed_slices: usize,
    pub last_refresh_at: Option<String>,
    pub tracker: TrackerStats,
}

#[derive(Debug)]
struct DetailState {
    group_id: String,
    previous: Vec<ProfitSample>,
}

/// Handle to a periodic refresh task; the task stops when this is dropped.
#[derive(Debug)]
pub struct RefreshHandle {
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stop refreshing.
    pub fn stop(self) {}

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Periodic detail refresh plus the stream of its results.
#[derive(Debug)]
pub struct GroupRefresh {
    pub handle: RefreshHandle,
    pub updates: watch::Receiver<Option<GroupDetail>>,
}

/// Dashboard state shared across views.
pub struct DashboardSession {
    source: Arc<dyn FeedSource>,
    clock: Arc<dyn Clock>,
    tracker: DurationTracker,
    changes: Mutex<ChangeTracker>,
    highlights: Mutex<ChangeHighlights>,
    detail: Mutex<Option<DetailState>>,
    labels: RwLock<Labels>,
    countries: RwLock<AvailableCountries>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    query: RwLock<BoardQuery>,
    next_generation: AtomicU64,
    applied_generation: AtomicU64,
    apply_lock: Mutex<()>,
}

impl std::fmt::Debug for DashboardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardSession")
            .field("tracker", &self.tracker)
            .field("next_generation", &self.next_generation)
            .field("applied_generation", &self.applied_generation)
            .finish()
    }
}

impl DashboardSession {
    /// Session on the system clock.
    pub fn new(source: Arc<dyn FeedSource>) -> Self {
        Self::with_clock(source, Arc::new(SystemClock))
    }

    /// Session on a custom clock.
    pub fn with_clock(source: Arc<dyn FeedSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracker: DurationTracker::with_clock(
                Arc::clone(&clock),
                crate::tracking::duration::DEFAULT_TICK,
            ),
            source,
            clock,
            changes: Mutex::new(ChangeTracker::new()),
            highlights: Mutex::new(ChangeHighlights::default()),
            detail: Mutex::new(None),
            labels: RwLock::new(Labels::default()),
            countries: RwLock::new(AvailableCountries::default()),
            snapshot: RwLock::new(None),
            query: RwLock::new(BoardQuery::default()),
            next_generation: AtomicU64::new(0),
            applied_generation: AtomicU64::new(0),
            apply_lock: Mutex::new(()),
        }
    }

    /// Shared duration tracker, for live subscriptions.
    pub fn tracker(&self) -> &DurationTracker {
        &self.tracker
    }

    /// Discover the structure and load labels.
    pub async fn initialize(&self) -> Result<AvailableCountries, FeedError> {
        self.load_labels().await;
        self.discover().await
    }

    /// Re-discover available sports and countries.
    pub async fn discover(&self) -> Result<AvailableCountries, FeedError> {
        let countries = self.source.discover().await?;
        *self.countries.write().await = countries.clone();
        Ok(countries)
    }

    /// Load labels, keeping the embedded dictionary on failure.
    pub async fn load_labels(&self) {
        let labels = load_labels_or_default(self.source.as_ref()).await;
        *self.labels.write().await = labels;
    }

    pub async fn labels(&self) -> Labels {
        self.labels.read().await.clone()
    }

    pub async fn countries(&self) -> AvailableCountries {
        self.countries.read().await.clone()
    }

    /// Query used by the last refresh.
    pub async fn current_query(&self) -> BoardQuery {
        self.query.read().await.clone()
    }

    /// Latest applied snapshot.
    pub async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Fetch the board for `query` and make it current.
    ///
    /// Trackers see the complete new snapshot in one step. A refresh that
    /// finishes after a newer one was applied is discarded.
    pub async fn refresh(&self, query: BoardQuery) -> Result<RefreshOutcome, FeedError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();
        *self.query.write().await = query.clone();

        let known = self.countries.read().await.clone();
        let countries = if known.is_empty() {
            self.discover().await?
        } else {
            known
        };

        let collected =
            collect_groups(self.source.as_ref(), &countries, query.mode, query.sport_filter())
                .await;
        record_refresh(start);
        let collected =
            collected.inspect_err(|e| warn!(generation, error = %e, "Refresh failed"))?;

        let _apply = self.apply_lock.lock().await;
        if generation < self.applied_generation.load(Ordering::SeqCst) {
            metrics::inc_stale_refreshes_discarded();
            debug!(generation, "Discarding stale refresh");
            return Ok(RefreshOutcome::Stale { generation });
        }

        let snapshot = Snapshot {
            generation,
            mode: query.mode,
            groups: collected.groups,
            attempted_slices: collected.attempted,
            failed_slices: collected.failed,
            fetched_at: OffsetDateTime::now_utc(),
        };

        let current_ids: HashSet<String> =
            snapshot.opportunities().map(|o| o.unique_id.clone()).collect();
        self.tracker.sync_batch(
            snapshot
                .opportunities()
                .map(|o| (o.unique_id.as_str(), o.reported_duration())),
        );
        self.tracker.purge_missing(&current_ids);
        metrics::set_tracked_opportunities(current_ids.len());

        let samples: Vec<ProfitSample> = select_entries(&snapshot.groups, &query)
            .iter()
            .map(|entry| {
                let selected = entry.selected();
                ProfitSample::new(selected.unique_id.clone(), selected.profit_percentage())
            })
            .collect();
        let changes = self.changes.lock().await.diff(&samples);
        metrics::record_opportunity_changes(&changes);
        self.highlights
            .lock()
            .await
            .record(&changes, self.clock.now_ms());

        info!(
            generation,
            groups = snapshot.groups.len(),
            opportunities = current_ids.len(),
            changes = changes.len(),
            failed_slices = snapshot.failed_slices.len(),
            "Applied refresh"
        );

        *self.snapshot.write().await = Some(Arc::new(snapshot));
        self.applied_generation.store(generation, Ordering::SeqCst);

        Ok(RefreshOutcome::Applied {
            generation,
            changes,
        })
    }

    /// Shape the current snapshot for `query` without fetching.
    pub async fn view(&self, query: &BoardQuery) -> BoardView {
        let snapshot = self.snapshot().await;
        let labels = self.labels.read().await;
        let highlights = self.highlights.lock().await;
        let now_ms = self.clock.now_ms();

        let Some(snapshot) = snapshot else {
            return BoardView {
                generation: 0,
                mode: query.mode,
                fetched_at: None,
                page: paginate::<BoardEntryView>(&[], query.page, PAGE_SIZE),
                available_sources: Vec::new(),
                available_dates: Vec::new(),
                attempted_slices: 0,
                failed_slices: 0,
            };
        };

        let mut entries = select_entries(&snapshot.groups, query);
        sort_entries(&mut entries, query.sort_by, query.sort_order, &self.tracker);
        let page = paginate(&entries, query.page, PAGE_SIZE);

        BoardView {
            generation: snapshot.generation,
            mode: snapshot.mode,
            fetched_at: snapshot.fetched_at.format(&Rfc3339).ok(),
            page: Page {
                items: page
                    .items
                    .iter()
                    .map(|entry| self.entry_view(entry, &labels, &highlights, now_ms))
                    .collect(),
                page: page.page,
                total_pages: page.total_pages,
                total_items: page.total_items,
            },
            available_sources: available_sources(&snapshot.groups),
            available_dates: available_dates(&snapshot.groups),
            attempted_slices: snapshot.attempted_slices,
            failed_slices: snapshot.failed_slices.len(),
        }
    }

    fn entry_view(
        &self,
        entry: &BoardEntry,
        labels: &Labels,
        highlights: &ChangeHighlights,
        now_ms: i64,
    ) -> BoardEntryView {
        let group = &entry.group;
        let selected = entry.selected();
        BoardEntryView {
            group_id: group.group_id.clone(),
            title: group.title(),
            date: group.date.clone(),
            time: group.time.clone(),
            country: group.country.clone(),
            tournament: labels.tournament_name(&[selected as &dyn ExtensionFields, group]),
            opportunity_id: selected.unique_id.clone(),
            complementary_set: labels.complementary_set_label(&selected.complementary_set),
            profit_percentage: selected.profit_percentage(),
            arbitrage_percentage: selected.arbitrage_percentage,
            sources: selected.arbitrage_sources.clone(),
            opportunity_count: group.opportunities.len(),
            duration: self.tracker.peek(&selected.unique_id),
            highlight: highlights.active(&selected.unique_id, now_ms),
            outcomes: outcome_links(group, selected, labels),
        }
    }

    /// Opportunity `unique_id` from the current snapshot.
    pub async fn find_opportunity(&self, unique_id: &str) -> Option<Opportunity> {
        let snapshot = self.snapshot().await?;
        snapshot
            .groups
            .iter()
            .find_map(|g| g.opportunity(unique_id))
            .cloned()
    }

    /// Re-locate a group in the current snapshot.
    pub async fn locate_group(&self, group_id: &str) -> GroupDetail {
        let snapshot = self.snapshot().await;
        let labels = self.labels.read().await;
        let groups = snapshot.as_deref().map(|s| s.groups.as_slice()).unwrap_or(&[]);
        self.detail_for(group_id, groups, &labels, Vec::new())
    }

    /// Refresh with the current query, then re-locate `group_id` and report
    /// profit moves since the previous detail refresh of the same group.
    pub async fn refresh_group(&self, group_id: &str) -> Result<GroupDetail, FeedError> {
        let query = self.current_query().await;
        if let RefreshOutcome::Stale { generation } = self.refresh(query).await? {
            debug!(generation, group_id, "Detail refresh raced a newer refresh");
        }

        let snapshot = self.snapshot().await;
        let groups = snapshot.as_deref().map(|s| s.groups.as_slice()).unwrap_or(&[]);
        let located = find_matching_group(group_id, groups).group();

        let mut detail = self.detail.lock().await;
        let previous = detail
            .as_ref()
            .filter(|d| d.group_id == group_id)
            .map(|d| d.previous.clone())
            .unwrap_or_default();
        let current = located
            .map(|g| ProfitSample::from_groups(std::slice::from_ref(g)))
            .unwrap_or_default();

        let emptied = located.is_some_and(|g| g.opportunities.is_empty()) && !previous.is_empty();
        *detail = Some(DetailState {
            group_id: group_id.to_string(),
            previous: current.clone(),
        });
        drop(detail);

        if emptied {
            return Ok(GroupDetail::NoLongerAvailable {
                group_id: group_id.to_string(),
            });
        }

        let changes = profit_moves(&previous, &current);
        if !changes.is_empty() {
            self.highlights
                .lock()
                .await
                .record(&changes, self.clock.now_ms());
        }

        let labels = self.labels.read().await;
        Ok(self.detail_for(group_id, groups, &labels, changes))
    }

    fn detail_for(
        &self,
        group_id: &str,
        groups: &[MatchGroup],
        labels: &Labels,
        changes: Vec<OpportunityChange>,
    ) -> GroupDetail {
        let (group, exact) = match find_matching_group(group_id, groups) {
            GroupMatch::Exact(group) => (group, true),
            GroupMatch::Related(group) => (group, false),
            GroupMatch::Vanished => {
                return GroupDetail::NoLongerAvailable {
                    group_id: group_id.to_string(),
                }
            }
        };

        let opportunities = group
            .opportunities
            .iter()
            .map(|opp| DetailOpportunity {
                opportunity_id: opp.unique_id.clone(),
                complementary_set: labels.complementary_set_label(&opp.complementary_set),
                profit_percentage: opp.profit_percentage(),
                duration: self.tracker.peek(&opp.unique_id),
                outcomes: outcome_links(group, opp, labels),
            })
            .collect();

        let tournament = match group.opportunities.first() {
            Some(first) => labels.tournament_name(&[first as &dyn ExtensionFields, group]),
            None => labels.tournament_name(&[group as &dyn ExtensionFields]),
        };

        GroupDetail::Available(GroupDetailView {
            requested_id: group_id.to_string(),
            exact,
            tournament,
            group: group.clone(),
            opportunities,
            changes,
        })
    }

    /// Refresh every `delay`, starting from `query`.
    ///
    /// Each tick uses whatever query is current, so later refreshes with a
    /// different query redirect the loop. Delays below the accepted minimum
    /// are raised to it.
    pub async fn start_auto_refresh(
        self: &Arc<Self>,
        query: BoardQuery,
        delay: Duration,
    ) -> RefreshHandle {
        *self.query.write().await = query;
        let delay = clamp_delay(delay);
        let session: Weak<Self> = Arc::downgrade(self);
        info!(delay_ms = delay.as_millis() as u64, "Starting auto-refresh");

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + delay, delay);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                let query = session.current_query().await;
                match session.refresh(query).await {
                    Ok(RefreshOutcome::Applied { generation, .. }) => {
                        debug!(generation, "Auto-refresh applied");
                    }
                    Ok(RefreshOutcome::Stale { generation }) => {
                        debug!(generation, "Auto-refresh superseded");
                    }
                    Err(e) => warn!(error = %e, "Auto-refresh failed"),
                }
            }
        });

        RefreshHandle { task }
    }

    /// Refresh one group's detail every `delay` and publish the results.
    pub fn start_group_refresh(self: &Arc<Self>, group_id: &str, delay: Duration) -> GroupRefresh {
        let delay = clamp_delay(delay);
        let session: Weak<Self> = Arc::downgrade(self);
        let group_id = group_id.to_string();
        let (tx, rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + delay, delay);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                match session.refresh_group(&group_id).await {
                    Ok(detail) => {
                        if tx.send(Some(detail)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(group_id = %group_id, error = %e, "Detail refresh failed"),
                }
            }
        });

        GroupRefresh {
            handle: RefreshHandle { task },
            updates: rx,
        }
    }

    /// Bookkeeping for status endpoints.
    pub async fn status(&self) -> SessionStatus {
        let snapshot = self.snapshot().await;
        SessionStatus {
            generation: self.next_generation.load(Ordering::SeqCst),
            applied_generation: self.applied_generation.load(Ordering::SeqCst),
            groups: snapshot.as_ref().map_or(0, |s| s.groups.len()),
            opportunities: snapshot.as_ref().map_or(0, |s| s.opportunities().count()),
            failed_slices: snapshot.as_ref().map_or(0, |s| s.failed_slices.len()),
            last_refresh_at: snapshot
                .as_ref()
                .and_then(|s| s.fetched_at.format(&Rfc3339).ok()),
            tracker: self.tracker.stats(),
        }
    }

    /// Forget everything tracked. Refresh handles should be dropped first.
    pub async fn teardown(&self) {
        self.tracker.reset_all();
        self.changes.lock().await.reset();
        self.highlights.lock().await.clear();
        *self.detail.lock().await = None;
        *self.snapshot.write().await = None;
        metrics::set_tracked_opportunities(0);
        info!("Session torn down");
    }
}

fn clamp_delay(delay: Duration) -> Duration {
    delay.max(Duration::from_millis(MIN_REFRESH_DELAY_MS))
}

fn outcome_links(group: &MatchGroup, opportunity: &Opportunity, labels: &Labels) -> Vec<OutcomeLink> {
    opportunity
        .best_odds
        .iter()
        .map(|outcome| OutcomeLink {
            key: outcome.key.clone(),
            label: labels.odd_label(&outcome.key),
            odds: outcome.odds,
            source: outcome.source.clone(),
            url: resolve_link(group, opportunity, &outcome.source),
        })
        .collect()
}
