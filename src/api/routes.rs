//! HTTP API route definitions.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    board, calculate, countries, get_preferences, group, health, labels, metrics,
    put_preferences, ready, status, AppState,
};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        // Discovery contract consumed by the dashboard front-end
        .route("/api/countries", get(countries))
        // Board and detail views
        .route("/api/v1/status", get(status))
        .route("/api/v1/board", get(board))
        .route("/api/v1/groups/:group_id", get(group))
        .route("/api/v1/labels", get(labels))
        .route("/api/v1/calculate", post(calculate))
        .route(
            "/api/v1/preferences",
            get(get_preferences).put(put_preferences),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::board::{DashboardSession, SortBy};
    use crate::feed::{MatchGroup, MockFeed, Mode, SliceKey};

    fn group(id: &str) -> MatchGroup {
        serde_json::from_value(json!({
            "group_id": id,
            "home_team": "Esperance",
            "away_team": "Club Africain",
            "date": "02/03/2025",
            "time": "18:00",
            "all_sources": ["A", "B"],
            "opportunities": [{
                "unique_id": "opp-1",
                "complementary_set": "three_way",
                "best_odds": {
                    "1_odd": {"value": "2.1", "source": "A"},
                    "draw_odd": {"value": "3.9", "source": "B"},
                    "2_odd": {"value": "4.2", "source": "A"}
                },
                "arbitrage_percentage": "0.97",
                "arbitrage_sources": "A, B",
                "activity_duration": "12 seconds"
            }]
        }))
        .unwrap()
    }

    fn app_with(feed: MockFeed) -> (Router, AppState) {
        let state = AppState::new(Arc::new(DashboardSession::new(Arc::new(feed))));
        (create_router(state.clone()), state)
    }

    fn populated() -> (Router, AppState) {
        let feed = MockFeed::new();
        feed.set_slice(
            SliceKey::new(Mode::Live, "football", "tunisia"),
            vec![group("111-222")],
        );
        app_with(feed)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (app, _) = app_with(MockFeed::new());
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_503_when_not_ready() {
        let (app, _) = app_with(MockFeed::new());
        let response = app.oneshot(get_request("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let (app, _) = app_with(MockFeed::new());
        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn board_fetches_on_first_request_and_becomes_ready() {
        let (app, state) = populated();

        let response = app
            .clone()
            .oneshot(get_request("/api/v1/board?mode=live&sort_by=profit"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["generation"], 1);
        assert_eq!(body["page"]["total_items"], 1);
        assert_eq!(body["page"]["items"][0]["title"], "Esperance vs Club Africain");
        assert_eq!(body["page"]["items"][0]["duration"]["label"], "Active for 12s");
        assert!(state.is_ready());

        let response = app.oneshot(get_request("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn board_reports_total_feed_failure() {
        let feed = MockFeed::new();
        feed.fail_slice(SliceKey::new(Mode::Live, "football", "tunisia"));
        let (app, _) = app_with(feed);

        let response = app.oneshot(get_request("/api/v1/board")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"], "all 1 data slices failed to load");
    }

    #[tokio::test]
    async fn group_detail_uses_related_ids() {
        let (app, _) = populated();
        app.clone()
            .oneshot(get_request("/api/v1/board"))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(get_request("/api/v1/groups/999-222"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "available");
        assert_eq!(body["exact"], false);
        assert_eq!(body["group"]["group_id"], "111-222");

        let response = app
            .oneshot(get_request("/api/v1/groups/333-444"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["status"], "no_longer_available");
    }

    #[tokio::test]
    async fn calculate_ad_hoc_legs() {
        let (app, _) = app_with(MockFeed::new());
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/calculate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "legs": [
                        {"key": "1_odd", "odds": "2"},
                        {"key": "2_odd", "odds": "2"}
                    ],
                    "total_stake": "150",
                    "rounding": 10
                })
                .to_string(),
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["mode"], "auto");
        assert_eq!(body["active_rounding"], 10);
        let stake: rust_decimal::Decimal =
            serde_json::from_value(body["calculation"]["outcomes"][0]["stake"].clone()).unwrap();
        assert_eq!(stake, dec!(80));
    }

    #[tokio::test]
    async fn board_requests_are_remembered() {
        let (app, state) = populated();

        let response = app
            .oneshot(get_request("/api/v1/board?sort_by=time&sources=A"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let prefs = state.preferences.get().await;
        assert_eq!(prefs.sort_by, SortBy::Time);
        assert_eq!(prefs.sources, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn calculate_seeds_from_and_updates_stored_stakes() {
        let (app, state) = app_with(MockFeed::new());
        let legs = json!([{"key": "1_odd", "odds": "2"}, {"key": "2_odd", "odds": "2"}]);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/calculate",
                json!({"legs": legs.clone(), "total_stake": "150", "rounding": 10}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let prefs = state.preferences.get().await;
        assert_eq!(prefs.total_stake, dec!(150));
        assert_eq!(prefs.rounding, 10);

        let response = app
            .oneshot(json_request("POST", "/api/v1/calculate", json!({"legs": legs})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["rounding_preference"], 10);
        let total: rust_decimal::Decimal =
            serde_json::from_value(body["total_stake"].clone()).unwrap();
        assert_eq!(total, dec!(150));
    }

    #[tokio::test]
    async fn preferences_round_trip_and_toggle_auto_refresh() {
        let (app, state) = app_with(MockFeed::new());

        let response = app
            .clone()
            .oneshot(get_request("/api/v1/preferences"))
            .await
            .unwrap();
        let mut prefs = body_json(response).await;
        assert_eq!(prefs["auto_refresh"], false);

        prefs["auto_refresh"] = json!(true);
        prefs["detail_auto_refresh"] = json!(true);
        let response = app
            .oneshot(json_request("PUT", "/api/v1/preferences", prefs))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.auto_refresh_running().await);
        assert!(state.preferences.get().await.detail_auto_refresh);

        state.stop_auto_refresh().await;
        assert!(!state.auto_refresh_running().await);
    }

    #[tokio::test]
    async fn calculate_rejects_unknown_fixed_leg() {
        let (app, _) = app_with(MockFeed::new());
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/calculate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "legs": [{"key": "1_odd", "odds": "2"}, {"key": "2_odd", "odds": "2"}],
                    "fixed": {"key": "draw_odd", "stake": "10"}
                })
                .to_string(),
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
