//! Integration tests for the arbitrage dashboard.
//!
//! Each test builds its own data tree under the system temp directory and
//! drives a `DashboardSession` over a `LocalFeed`, the same way the binary does.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tempfile::TempDir;
use tower::ServiceExt;

use arb_dashboard::api::{create_router, AppState};
use arb_dashboard::arbitrage::{StakeMode, StakeSheet};
use arb_dashboard::board::{
    BoardQuery, DashboardSession, GroupDetail, PreferenceStore, RefreshOutcome, SharedPreferences,
    SortBy, SortOrder,
};
use arb_dashboard::error::FeedError;
use arb_dashboard::feed::{
    AvailableCountries, FeedSource, Labels, LocalFeed, MatchGroup, Mode, SliceKey,
};
use arb_dashboard::tracking::ChangeKind;

/// A fresh data root for one test, removed when dropped.
fn data_root() -> TempDir {
    TempDir::new().unwrap()
}

fn write_slice(root: &Path, mode: &str, sport: &str, country: &str, groups: Value) {
    let dir = root
        .join("arb_output/arb_opportunities")
        .join(mode)
        .join(sport);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(format!("{}.json", country)),
        serde_json::to_vec_pretty(&groups).unwrap(),
    )
    .unwrap();
}

fn opportunity(id: &str, arbitrage: &str, sources: &str, duration: &str) -> Value {
    json!({
        "unique_id": id,
        "complementary_set": "three_way",
        "best_odds": {
            "1_odd": {"value": 2.1, "source": "1xbet"},
            "draw_odd": {"value": 3.9, "source": "Tounesbet"},
            "2_odd": {"value": 4.2, "source": "1xbet"}
        },
        "arbitrage_percentage": arbitrage,
        "arbitrage_sources": sources,
        "activity_duration": duration,
        "tournament_1xbet": "Ligue Professionnelle 1"
    })
}

fn match_group(id: &str, home: &str, date: &str, opportunities: Vec<Value>) -> Value {
    json!({
        "group_id": id,
        "home_team": home,
        "away_team": "Visitors",
        "date": date,
        "time": "18:30",
        "all_sources": ["1xbet", "Tounesbet", "Bet365"],
        "opportunities": opportunities
    })
}

fn seed_tree(root: &Path) {
    write_slice(
        root,
        "live",
        "football",
        "tunisia",
        json!([
            match_group(
                "321516-7168655",
                "Esperance",
                "23/06/2025",
                vec![opportunity("t-1", "0.97", "1xbet, Tounesbet", "34 seconds")]
            ),
            match_group(
                "400100-400200",
                "Etoile",
                "24/06/2025",
                vec![opportunity("t-2", "0.99", "1xbet", "5m")]
            ),
        ]),
    );
    write_slice(
        root,
        "live",
        "football",
        "england",
        json!([match_group(
            "500-600",
            "Arsenal",
            "23/06/2025",
            vec![opportunity("e-1", "0.95", "Tounesbet", "2 hours")]
        )]),
    );
    write_slice(
        root,
        "live",
        "football",
        "activity_tracker",
        json!({"ignored": true}),
    );
}

fn session_over(root: &Path) -> Arc<DashboardSession> {
    Arc::new(DashboardSession::new(Arc::new(LocalFeed::new(root))))
}

fn applied_changes(outcome: RefreshOutcome) -> Vec<arb_dashboard::tracking::OpportunityChange> {
    match outcome {
        RefreshOutcome::Applied { changes, .. } => changes,
        RefreshOutcome::Stale { generation } => panic!("refresh {} was discarded", generation),
    }
}

#[tokio::test]
async fn board_is_merged_filtered_and_sorted() {
    let tmp = data_root();
    let root = tmp.path().to_path_buf();
    seed_tree(&root);
    let session = session_over(&root);

    let countries = session.initialize().await.unwrap();
    assert_eq!(
        countries.live.get("football"),
        Some(&vec!["england".to_string(), "tunisia".to_string()])
    );

    let query = BoardQuery::default();
    let changes = applied_changes(session.refresh(query.clone()).await.unwrap());
    assert_eq!(changes.len(), 3);
    assert!(changes.iter().all(|c| c.kind == ChangeKind::Added));

    let view = session.view(&query).await;
    let ids: Vec<&str> = view
        .page
        .items
        .iter()
        .map(|e| e.opportunity_id.as_str())
        .collect();
    assert_eq!(ids, vec!["e-1", "t-1", "t-2"]);
    assert_eq!(
        view.available_sources,
        vec!["1xbet".to_string(), "Tounesbet".to_string()]
    );
    assert_eq!(
        view.available_dates,
        vec!["23/06/2025".to_string(), "24/06/2025".to_string()]
    );
    assert_eq!(view.page.items[1].tournament, "Ligue Professionnelle 1");
    assert_eq!(view.page.items[1].country, "tunisia");
    assert_eq!(view.page.items[0].duration.label, "Active for 2h");

    let filtered = BoardQuery {
        sources: vec!["1xbet".to_string()],
        sort_order: SortOrder::Asc,
        ..BoardQuery::default()
    };
    let view = session.view(&filtered).await;
    let ids: Vec<&str> = view
        .page
        .items
        .iter()
        .map(|e| e.opportunity_id.as_str())
        .collect();
    assert_eq!(ids, vec!["t-2"]);

    let by_duration = BoardQuery {
        sort_by: SortBy::Duration,
        ..BoardQuery::default()
    };
    let view = session.view(&by_duration).await;
    assert_eq!(view.page.items[2].opportunity_id, "t-1");
}

#[tokio::test]
async fn refreshes_report_changes_and_purge_vanished_opportunities() {
    let tmp = data_root();
    let root = tmp.path().to_path_buf();
    seed_tree(&root);
    let session = session_over(&root);
    session.initialize().await.unwrap();
    session.refresh(BoardQuery::default()).await.unwrap();

    write_slice(
        &root,
        "live",
        "football",
        "tunisia",
        json!([match_group(
            "321516-7168655",
            "Esperance",
            "23/06/2025",
            vec![opportunity("t-1", "0.96", "1xbet, Tounesbet", "40 seconds")]
        )]),
    );
    write_slice(
        &root,
        "live",
        "football",
        "england",
        json!([match_group(
            "500-600",
            "Arsenal",
            "23/06/2025",
            vec![opportunity("e-1", "0.955", "Tounesbet", "2 hours")]
        )]),
    );

    let changes = applied_changes(session.refresh(BoardQuery::default()).await.unwrap());
    assert_eq!(changes.len(), 2);
    let kinds: Vec<(&str, ChangeKind)> = changes.iter().map(|c| (c.id.as_str(), c.kind)).collect();
    assert!(kinds.contains(&("t-1", ChangeKind::ProfitIncrease)));
    assert!(kinds.contains(&("e-1", ChangeKind::ProfitDecrease)));

    assert!(!session.tracker().contains("t-2"));
    assert_eq!(session.tracker().peek("t-1").label, "Active for 40s");
    assert_eq!(session.status().await.tracker.tracked, 2);

    let view = session.view(&BoardQuery::default()).await;
    assert_eq!(
        view.page.items[0].highlight,
        Some(ChangeKind::ProfitDecrease)
    );
}

#[tokio::test]
async fn malformed_slice_is_isolated() {
    let tmp = data_root();
    let root = tmp.path().to_path_buf();
    seed_tree(&root);
    let broken = root.join("arb_output/arb_opportunities/live/football/algeria.json");
    std::fs::write(&broken, "{ not json").unwrap();

    let session = session_over(&root);
    session.initialize().await.unwrap();
    session.refresh(BoardQuery::default()).await.unwrap();

    let view = session.view(&BoardQuery::default()).await;
    assert_eq!(view.attempted_slices, 3);
    assert_eq!(view.failed_slices, 1);
    assert_eq!(view.page.total_items, 3);
}

#[tokio::test]
async fn empty_tree_yields_empty_board() {
    let tmp = data_root();
    let root = tmp.path().to_path_buf();
    let session = session_over(&root);

    assert!(session.initialize().await.unwrap().is_empty());
    let changes = applied_changes(session.refresh(BoardQuery::default()).await.unwrap());
    assert!(changes.is_empty());
    assert_eq!(session.view(&BoardQuery::default()).await.page.total_pages, 1);
}

#[tokio::test]
async fn detail_view_follows_group_id_mutation_until_it_vanishes() {
    let tmp = data_root();
    let root = tmp.path().to_path_buf();
    seed_tree(&root);
    let session = session_over(&root);
    session.initialize().await.unwrap();
    session.refresh(BoardQuery::default()).await.unwrap();

    assert!(session
        .refresh_group("321516-7168655")
        .await
        .unwrap()
        .is_available());

    write_slice(
        &root,
        "live",
        "football",
        "tunisia",
        json!([match_group(
            "116811-321516-5489987",
            "Esperance",
            "23/06/2025",
            vec![opportunity("t-1", "0.98", "1xbet, Tounesbet", "50 seconds")]
        )]),
    );
    let GroupDetail::Available(detail) = session.refresh_group("321516-7168655").await.unwrap()
    else {
        panic!("mutated group should be found through its shared sub-id");
    };
    assert!(!detail.exact);
    assert_eq!(detail.group.group_id, "116811-321516-5489987");
    assert_eq!(detail.changes.len(), 1);
    assert_eq!(detail.changes[0].kind, ChangeKind::ProfitDecrease);
    assert_eq!(detail.opportunities[0].complementary_set, "1 X 2");

    write_slice(
        &root,
        "live",
        "football",
        "tunisia",
        json!([match_group("777-888", "Other", "23/06/2025", vec![])]),
    );
    assert_eq!(
        session.refresh_group("321516-7168655").await.unwrap(),
        GroupDetail::NoLongerAvailable {
            group_id: "321516-7168655".to_string()
        }
    );
}

#[tokio::test]
async fn board_opportunity_feeds_the_stake_sheet() {
    let tmp = data_root();
    let root = tmp.path().to_path_buf();
    seed_tree(&root);
    let session = session_over(&root);
    session.initialize().await.unwrap();
    session.refresh(BoardQuery::default()).await.unwrap();

    let opportunity = session.find_opportunity("t-1").await.unwrap();
    let mut sheet = StakeSheet::new(dec!(100), 1);
    sheet.select(&opportunity).unwrap();

    let calculation = sheet.calculation().unwrap();
    assert!(calculation.is_arbitrage());
    assert!(calculation.profit > dec!(0));
    assert_eq!(sheet.stakes().len(), 3);

    sheet.fix_leg("1_odd", dec!(50)).unwrap();
    assert_eq!(sheet.mode(), StakeMode::Manual);
    let stakes: Vec<_> = sheet.stakes().into_iter().map(|(_, s)| s).collect();
    // 50 * 2.1 = 105 payout: 105 / 3.9 = 26.92 -> 27, 105 / 4.2 = 25
    assert_eq!(stakes, vec![dec!(50), dec!(27), dec!(25)]);
    assert_eq!(sheet.total_stake(), dec!(102));

    assert!(sheet.fix_leg("over_2.5_odd", dec!(10)).is_err());
    assert_eq!(sheet.total_stake(), dec!(102));
}

#[tokio::test]
async fn preferences_survive_a_restart() {
    let tmp = data_root();
    let root = tmp.path().to_path_buf();
    let store = PreferenceStore::new(root.join("nested/prefs.json"));

    let mut prefs = store.load().await;
    prefs.remember_query(&BoardQuery {
        mode: Mode::Prematch,
        sort_by: SortBy::Time,
        sources: vec!["1xbet".to_string()],
        ..BoardQuery::default()
    });
    prefs.detail_auto_refresh = true;
    tokio_test::assert_ok!(store.save(&prefs).await);

    let reloaded = PreferenceStore::new(store.path()).load().await;
    assert_eq!(reloaded.query().mode, Mode::Prematch);
    assert_eq!(reloaded.query().sort_by, SortBy::Time);
    assert!(reloaded.detail_auto_refresh);
}

/// Source whose first slice fetch blocks until released.
struct GatedFeed {
    inner: LocalFeed,
    calls: AtomicUsize,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl FeedSource for GatedFeed {
    async fn discover(&self) -> Result<AvailableCountries, FeedError> {
        self.inner.discover().await
    }

    async fn fetch_slice(&self, slice: &SliceKey) -> Result<Vec<MatchGroup>, FeedError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch_slice(slice).await
    }

    async fn fetch_labels(&self) -> Result<Labels, FeedError> {
        self.inner.fetch_labels().await
    }
}

#[tokio::test]
async fn late_refresh_is_discarded() {
    let tmp = data_root();
    let root = tmp.path().to_path_buf();
    write_slice(
        &root,
        "live",
        "football",
        "tunisia",
        json!([match_group(
            "1-2",
            "Esperance",
            "23/06/2025",
            vec![opportunity("t-1", "0.97", "1xbet", "1s")]
        )]),
    );
    let feed = Arc::new(GatedFeed {
        inner: LocalFeed::new(&root),
        calls: AtomicUsize::new(0),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let session = Arc::new(DashboardSession::new(feed.clone()));
    session.discover().await.unwrap();

    let slow = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.refresh(BoardQuery::default()).await })
    };
    feed.entered.notified().await;

    let fast = session.refresh(BoardQuery::default()).await.unwrap();
    assert!(matches!(fast, RefreshOutcome::Applied { generation: 2, .. }));

    feed.release.notify_one();
    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow, RefreshOutcome::Stale { generation: 1 });

    let status = session.status().await;
    assert_eq!(status.generation, 2);
    assert_eq!(status.applied_generation, 2);
}

#[tokio::test]
async fn http_surface_serves_discovery_and_board() {
    let tmp = data_root();
    let root = tmp.path().to_path_buf();
    seed_tree(&root);
    let session = session_over(&root);
    session.initialize().await.unwrap();
    let app = create_router(AppState::new(session));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/countries")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let countries: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(countries["live"]["football"], json!(["england", "tunisia"]));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/board?date=24/06/2025")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let board: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(board["page"]["total_items"], 1);
    assert_eq!(board["page"]["items"][0]["opportunity_id"], "t-2");
}

#[tokio::test]
async fn http_requests_persist_preferences() {
    let tmp = data_root();
    let root = tmp.path().to_path_buf();
    seed_tree(&root);
    let store = PreferenceStore::new(root.join("prefs.json"));
    let session = session_over(&root);
    let state = AppState::new(session)
        .with_preferences(Arc::new(SharedPreferences::load(store.clone()).await));
    let app = create_router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/board?sort_by=duration&sort_order=asc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/calculate")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"opportunity_id": "t-2", "total_stake": "250", "rounding": 5})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = store.load().await;
    assert_eq!(stored.sort_by, SortBy::Duration);
    assert_eq!(stored.sort_order, SortOrder::Asc);
    assert_eq!(stored.total_stake, dec!(250));
    assert_eq!(stored.rounding, 5);
}
