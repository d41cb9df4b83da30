//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::arbitrage::StakeSheet;
use crate::board::{
    BoardQuery, DashboardSession, GroupDetail, Preferences, RefreshHandle, SessionStatus,
    SharedPreferences, SortBy, SortOrder, ALL,
};
use crate::error::CalcError;
use crate::feed::{BestOdds, Mode, Opportunity};

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Whether the first refresh has been applied.
    pub ready: Arc<AtomicBool>,
    /// The dashboard session every view reads from.
    pub session: Arc<DashboardSession>,
    /// Renders `/metrics`; absent when no recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
    /// Stored user choices, updated by board and calculation requests.
    pub preferences: Arc<SharedPreferences>,
    /// Background board refresh, running while auto-refresh is enabled.
    auto_refresh: Arc<Mutex<Option<RefreshHandle>>>,
}

impl AppState {
    /// State with default, unsaved preferences.
    pub fn new(session: Arc<DashboardSession>) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            session,
            prometheus: None,
            preferences: Arc::new(SharedPreferences::in_memory(Preferences::default())),
            auto_refresh: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    pub fn with_preferences(mut self, preferences: Arc<SharedPreferences>) -> Self {
        self.preferences = preferences;
        self
    }

    /// Start, restart or stop the background board refresh to match `prefs`.
    pub async fn apply_auto_refresh(&self, prefs: &Preferences) {
        let mut slot = self.auto_refresh.lock().await;
        slot.take();
        if prefs.auto_refresh {
            let query = self.session.current_query().await;
            *slot = Some(
                self.session
                    .start_auto_refresh(query, prefs.refresh_delay())
                    .await,
            );
        } else {
            info!("Auto-refresh disabled");
        }
    }

    pub async fn auto_refresh_running(&self) -> bool {
        self.auto_refresh
            .lock()
            .await
            .as_ref()
            .is_some_and(RefreshHandle::is_running)
    }

    /// Stop the background refresh, if any.
    pub async fn stop_auto_refresh(&self) {
        self.auto_refresh.lock().await.take();
    }

    /// Update stored preferences; a failed save is logged, not surfaced.
    async fn remember(&self, change: impl FnOnce(&mut Preferences)) {
        if let Err(e) = self.preferences.update(change).await {
            warn!(error = %e, "Failed to save preferences");
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    /// Generation of the board currently served.
    pub generation: u64,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub session: SessionStatus,
}

/// Error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let response = ReadyResponse {
        ready: is_ready,
        generation: state.session.status().await.applied_generation,
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Session status.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.is_ready() { "running" } else { "starting" };
    Json(StatusResponse {
        status,
        session: state.session.status().await,
    })
}

/// Discovered sports and countries, per mode.
pub async fn countries(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.countries().await)
}

/// The label dictionary in use.
pub async fn labels(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.labels().await)
}

/// Board query string. `sources` is comma separated.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BoardParams {
    pub mode: Option<Mode>,
    pub sport: Option<String>,
    pub date: Option<String>,
    pub sources: Option<String>,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
    pub page: Option<usize>,
    /// Fetch before answering even when the current board would do.
    pub refresh: bool,
}

impl BoardParams {
    pub fn into_query(self) -> BoardQuery {
        let defaults = BoardQuery::default();
        BoardQuery {
            mode: self.mode.unwrap_or(defaults.mode),
            sport: self.sport.unwrap_or_else(|| ALL.to_string()),
            date: self.date.unwrap_or_else(|| ALL.to_string()),
            sources: self
                .sources
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            sort_by: self.sort_by.unwrap_or(defaults.sort_by),
            sort_order: self.sort_order.unwrap_or(defaults.sort_order),
            page: self.page.unwrap_or(1).max(1),
        }
    }
}

/// The board for a query. Fetches first when the current board was built
/// from different data or when asked to.
pub async fn board(
    State(state): State<AppState>,
    Query(params): Query<BoardParams>,
) -> Result<impl IntoResponse, ApiError> {
    let force = params.refresh;
    let query = params.into_query();

    let stale = match state.session.snapshot().await {
        Some(_) => !state.session.current_query().await.fetches_same_data(&query),
        None => true,
    };
    if force || stale {
        state.session.refresh(query.clone()).await.map_err(|e| {
            warn!(error = %e, "Board refresh failed");
            api_error(StatusCode::BAD_GATEWAY, e)
        })?;
        state.set_ready(true);
    }

    let view = state.session.view(&query).await;
    state.remember(|prefs| prefs.remember_query(&query)).await;
    Ok(Json(view))
}

/// Detail query string.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GroupParams {
    /// Fetch before answering; defaults to the detail auto-refresh preference.
    pub refresh: Option<bool>,
}

/// One match group, re-located by shared sub-id when its id mutated.
pub async fn group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(params): Query<GroupParams>,
) -> Result<impl IntoResponse, ApiError> {
    let refresh = match params.refresh {
        Some(refresh) => refresh,
        None => state.preferences.get().await.detail_auto_refresh,
    };
    let detail = if refresh {
        state
            .session
            .refresh_group(&group_id)
            .await
            .map_err(|e| api_error(StatusCode::BAD_GATEWAY, e))?
    } else {
        state.session.locate_group(&group_id).await
    };

    let status = match &detail {
        GroupDetail::Available(_) => StatusCode::OK,
        GroupDetail::NoLongerAvailable { .. } => StatusCode::NOT_FOUND,
    };
    Ok((status, Json(detail)))
}

/// One outcome of a calculation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CalcLeg {
    pub key: String,
    pub odds: Decimal,
    #[serde(default)]
    pub source: String,
}

/// A leg to hold fixed while the others are rebalanced.
#[derive(Debug, Clone, Deserialize)]
pub struct FixedLeg {
    pub key: String,
    pub stake: Decimal,
}

/// Stake calculation request.
///
/// Either `opportunity_id` (looked up on the current board) or `legs` is
/// required. `stakes` switches to manual mode; `fixed` rebalances around one
/// leg after that.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CalculateRequest {
    pub opportunity_id: Option<String>,
    pub legs: Vec<CalcLeg>,
    pub total_stake: Option<Decimal>,
    pub rounding: Option<u32>,
    pub stakes: Vec<FixedLeg>,
    pub fixed: Option<FixedLeg>,
}

fn ad_hoc_opportunity(legs: &[CalcLeg]) -> Opportunity {
    Opportunity::ad_hoc(
        "ad-hoc",
        BestOdds::from_entries(
            legs.iter()
                .map(|leg| (leg.key.clone(), leg.odds, leg.source.clone())),
        ),
    )
}

fn run_calculation(
    mut sheet: StakeSheet,
    opportunity: &Opportunity,
    request: &CalculateRequest,
) -> Result<StakeSheet, CalcError> {
    sheet.select(opportunity)?;
    for leg in &request.stakes {
        sheet.set_leg_stake(&leg.key, leg.stake)?;
    }
    if let Some(fixed) = &request.fixed {
        sheet.fix_leg(&fixed.key, fixed.stake)?;
    }
    Ok(sheet)
}

/// Compute a stake split. Missing totals and rounding come from the stored
/// preferences, and the outcome is remembered for the next request.
pub async fn calculate(
    State(state): State<AppState>,
    Json(request): Json<CalculateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let opportunity = match &request.opportunity_id {
        Some(id) => state.session.find_opportunity(id).await.ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("opportunity {} is not on the current board", id),
            )
        })?,
        None => ad_hoc_opportunity(&request.legs),
    };

    let seed = state
        .preferences
        .get()
        .await
        .stake_sheet(request.total_stake, request.rounding);
    let sheet = run_calculation(seed, &opportunity, &request)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    state.remember(|prefs| prefs.remember_stakes(&sheet)).await;
    debug!(
        opportunity = %opportunity.unique_id,
        total = %sheet.total_stake(),
        "Calculated stakes"
    );
    Ok(Json(sheet.view()))
}

/// Stored preferences.
pub async fn get_preferences(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.preferences.get().await)
}

/// Replace stored preferences and apply the auto-refresh settings.
pub async fn put_preferences(
    State(state): State<AppState>,
    Json(prefs): Json<Preferences>,
) -> Result<impl IntoResponse, ApiError> {
    let previous = state.preferences.get().await;
    let saved = state
        .preferences
        .update(|current| *current = prefs)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    if saved.auto_refresh != previous.auto_refresh
        || saved.refresh_delay_ms != previous.refresh_delay_ms
    {
        state.apply_auto_refresh(&saved).await;
    }
    Ok(Json(saved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::StakeMode;
    use crate::feed::MockFeed;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn state() -> AppState {
        AppState::new(Arc::new(DashboardSession::new(Arc::new(MockFeed::new()))))
    }

    #[test]
    fn app_state_ready_toggle() {
        let state = state();
        assert!(!state.is_ready());

        state.set_ready(true);
        assert!(state.is_ready());

        state.set_ready(false);
        assert!(!state.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_refresh_follows_preferences() {
        let state = state();
        assert!(!state.auto_refresh_running().await);

        let mut prefs = Preferences {
            auto_refresh: true,
            ..Preferences::default()
        };
        state.apply_auto_refresh(&prefs).await;
        assert!(state.auto_refresh_running().await);

        prefs.auto_refresh = false;
        state.apply_auto_refresh(&prefs).await;
        assert!(!state.auto_refresh_running().await);
    }

    #[test]
    fn board_params_split_sources() {
        let params = BoardParams {
            sources: Some("1xbet, Betway,,".to_string()),
            page: Some(0),
            ..Default::default()
        };
        let query = params.into_query();
        assert_eq!(query.sources, vec!["1xbet".to_string(), "Betway".to_string()]);
        assert_eq!(query.page, 1);
        assert_eq!(query.sport, "all");
    }

    #[test]
    fn calculation_applies_manual_stakes_then_fixed_leg() {
        let legs = vec![
            CalcLeg {
                key: "1_odd".to_string(),
                odds: dec!(2),
                source: "A".to_string(),
            },
            CalcLeg {
                key: "2_odd".to_string(),
                odds: dec!(2.5),
                source: "B".to_string(),
            },
        ];
        let request = CalculateRequest {
            legs: legs.clone(),
            fixed: Some(FixedLeg {
                key: "1_odd".to_string(),
                stake: dec!(50),
            }),
            ..Default::default()
        };

        let sheet =
            run_calculation(StakeSheet::default(), &ad_hoc_opportunity(&legs), &request).unwrap();
        assert_eq!(sheet.mode(), StakeMode::Manual);
        assert_eq!(sheet.stakes(), vec![("1_odd", dec!(50)), ("2_odd", dec!(40))]);
        assert_eq!(sheet.total_stake(), dec!(90));
    }

    #[test]
    fn calculation_reports_overflow_for_huge_stake() {
        let legs = vec![
            CalcLeg {
                key: "1_odd".to_string(),
                odds: dec!(2.1),
                source: "A".to_string(),
            },
            CalcLeg {
                key: "2_odd".to_string(),
                odds: dec!(2.1),
                source: "B".to_string(),
            },
        ];
        let request = CalculateRequest {
            legs: legs.clone(),
            total_stake: Some(Decimal::MAX),
            ..Default::default()
        };
        assert_eq!(
            run_calculation(
                StakeSheet::new(Decimal::MAX, 1),
                &ad_hoc_opportunity(&legs),
                &request
            )
            .map(|s| s.view()),
            Err(CalcError::Overflow)
        );
    }

    #[test]
    fn calculation_rejects_bad_odds() {
        let legs = vec![CalcLeg {
            key: "1_odd".to_string(),
            odds: dec!(0),
            source: String::new(),
        }];
        let request = CalculateRequest {
            legs: legs.clone(),
            ..Default::default()
        };
        assert!(matches!(
            run_calculation(StakeSheet::default(), &ad_hoc_opportunity(&legs), &request),
            Err(CalcError::InvalidOdds { .. })
        ));
    }
}
