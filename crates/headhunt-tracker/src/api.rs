//! HTTP read API: JSON projections over the snapshot store plus an on-demand refresh.

use crate::error::TrackerError;
use crate::model::{BannerSnapshot, Metrics, Snapshot};
use crate::scheduler::{Scheduler, Trigger};
use crate::store::SnapshotStore;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SnapshotStore>,
    pub scheduler: Scheduler,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(all_stats))
        .route("/stats/global", get(global_stats))
        .route("/stats/banners", get(all_banners))
        .route("/stats/banner/:name", get(one_banner))
        .route("/stats/refresh", get(refresh))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Read-path error mapped to a JSON response.
pub struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            TrackerError::StoreUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Data not yet available, scrape in progress. Try again in a moment."
                })),
            )
                .into_response(),
            TrackerError::UnknownBanner { name, available } => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": format!("Banner \"{name}\" not found"),
                    "available": available,
                })),
            )
                .into_response(),
            other => {
                error!("read failed: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal error", "details": other.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

/// A metric triple with its capture time.
#[derive(Debug, Serialize)]
pub struct MetricsView {
    #[serde(flatten)]
    pub metrics: Metrics,
    pub last_updated: String,
}

impl From<&BannerSnapshot> for MetricsView {
    fn from(banner: &BannerSnapshot) -> Self {
        Self {
            metrics: banner.metrics.clone(),
            last_updated: timestamp(&banner.captured_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsView {
    pub global: Metrics,
    pub banners: BTreeMap<String, MetricsView>,
    pub last_updated: String,
}

impl From<&Snapshot> for StatsView {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            global: snapshot.global.metrics.clone(),
            banners: banner_views(snapshot),
            last_updated: timestamp(&snapshot.captured_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BannerView {
    pub banner: String,
    #[serde(flatten)]
    pub metrics: Metrics,
    pub last_updated: String,
}

fn banner_views(snapshot: &Snapshot) -> BTreeMap<String, MetricsView> {
    snapshot
        .banners
        .iter()
        .map(|(name, banner)| (name.clone(), MetricsView::from(banner)))
        .collect()
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "scheduler": state.scheduler.state().as_str(),
        "populated": state.store.read().is_ok(),
    }))
}

async fn all_stats(State(state): State<AppState>) -> Result<Json<StatsView>, ApiError> {
    let snapshot = state.store.read()?;
    Ok(Json(StatsView::from(snapshot.as_ref())))
}

async fn global_stats(State(state): State<AppState>) -> Result<Json<MetricsView>, ApiError> {
    let snapshot = state.store.read()?;
    Ok(Json(MetricsView {
        metrics: snapshot.global.metrics.clone(),
        last_updated: timestamp(&snapshot.captured_at),
    }))
}

async fn all_banners(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, MetricsView>>, ApiError> {
    let snapshot = state.store.read()?;
    if snapshot.banners.is_empty() {
        return Err(TrackerError::StoreUnavailable.into());
    }
    Ok(Json(banner_views(&snapshot)))
}

async fn one_banner(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BannerView>, ApiError> {
    let banner = state.store.read_banner(&name)?;
    Ok(Json(BannerView {
        last_updated: timestamp(&banner.captured_at),
        banner: banner.name,
        metrics: banner.metrics,
    }))
}

async fn refresh(State(state): State<AppState>) -> Response {
    match state.scheduler.trigger(Trigger::OnDemand).await {
        Ok(snapshot) => Json(json!({
            "message": "Scrape successful",
            "scraped_at": timestamp(&snapshot.captured_at),
            "data": StatsView::from(snapshot.as_ref()),
        }))
        .into_response(),
        Err(e) => {
            error!("manual refresh failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Scrape failed", "details": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::extraction::MarkerExtractor;
    use crate::harvest::{HarvestSettings, Harvester};
    use crate::renderer::testing::{FakeRenderer, SAMPLE_PAGE};
    use crate::store::MemoryStore;
    use assert_json_diff::{assert_json_eq, assert_json_include};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state(renderer: Arc<FakeRenderer>) -> AppState {
        let config = Config::default();
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
        let harvester = Harvester::new(
            renderer,
            Arc::new(MarkerExtractor::from_config(&config).unwrap()),
            HarvestSettings::from_config(&config),
        );
        AppState {
            scheduler: Scheduler::new(harvester, store.clone()),
            store,
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_empty_store_is_503() {
        let app = router(state(Arc::new(FakeRenderer::new(SAMPLE_PAGE))));

        for uri in [
            "/stats",
            "/stats/global",
            "/stats/banners",
            "/stats/banner/Basic%20Headhunting",
        ] {
            let (status, body) = get_json(app.clone(), uri).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{uri}");
            assert!(body["error"].is_string());
        }

        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_json_eq!(body, json!({"status": "ok", "scheduler": "idle", "populated": false}));
    }

    #[tokio::test]
    async fn test_refresh_then_read() {
        let state = state(Arc::new(FakeRenderer::new(SAMPLE_PAGE)));
        let app = router(state.clone());

        let (status, body) = get_json(app.clone(), "/stats/refresh").await;
        assert_eq!(status, StatusCode::OK);
        assert_json_include!(
            actual: body,
            expected: json!({
                "message": "Scrape successful",
                "data": {"global": {"pulls": "1,234,567", "six_star_rate": "0.80%", "users": "12,345"}}
            })
        );

        let (status, body) = get_json(app.clone(), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_json_include!(
            actual: body,
            expected: json!({
                "global": {"pulls": "1,234,567", "six_star_rate": "0.80%", "users": "12,345"},
                "banners": {
                    "Basic Headhunting": {"pulls": "98,765", "six_star_rate": null, "users": null}
                }
            })
        );
        assert!(body["last_updated"].is_string());

        let (status, body) = get_json(app.clone(), "/stats/global").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"], "12,345");
        assert!(body["last_updated"].is_string());

        let (status, body) = get_json(app.clone(), "/stats/banners").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Basic Headhunting"]["pulls"], "98,765");

        let (status, body) = get_json(app, "/stats/banner/Basic%20Headhunting").await;
        assert_eq!(status, StatusCode::OK);
        assert_json_include!(
            actual: body,
            expected: json!({"banner": "Basic Headhunting", "pulls": "98,765", "users": null})
        );
    }

    #[tokio::test]
    async fn test_unknown_banner_lists_available() {
        let state = state(Arc::new(FakeRenderer::new(SAMPLE_PAGE)));
        state.scheduler.trigger(Trigger::OnDemand).await.unwrap();
        let app = router(state.clone());

        let (status, body) = get_json(app, "/stats/banner/Hues%20of%20Passion").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["available"], json!(state.store.banner_names().unwrap()));
        assert_eq!(body["available"], json!(["Basic Headhunting"]));
    }

    #[tokio::test]
    async fn test_failed_refresh_is_500_with_detail() {
        let renderer = Arc::new(FakeRenderer {
            navigate_error: Some(TrackerError::TransientNetwork("net::ERR_CONNECTION_RESET".into())),
            ..FakeRenderer::new(SAMPLE_PAGE)
        });
        let app = router(state(renderer));

        let (status, body) = get_json(app.clone(), "/stats/refresh").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Scrape failed");
        assert!(body["details"]
            .as_str()
            .unwrap()
            .contains("ERR_CONNECTION_RESET"));

        let (status, _) = get_json(app, "/stats").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
