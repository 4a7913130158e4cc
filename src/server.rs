use crate::config::AppConfig;
use crate::dashboard::{BrandHealthView, CompetitiveIntelOptions, CompetitiveIntelView, Dashboards};
use crate::error::PipelineError;
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

pub struct AppState {
    pub dashboards: Dashboards,
}

/// Surfaces pipeline failures as a visible error body instead of an empty chart.
#[derive(Debug)]
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::Retrieval { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::Parse { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(kind = self.0.kind(), error = %self.0, "render failed");
        let body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
pub struct BrandParams {
    brand: Option<String>,
}

#[derive(Deserialize)]
pub struct MarketParams {
    market: Option<String>,
    /// Comma-separated competitor columns; absent means the defaults.
    competitors: Option<String>,
}

impl MarketParams {
    fn competitor_list(&self) -> Option<Vec<String>> {
        self.competitors.as_ref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

pub fn router(state: Arc<AppState>, config: &AppConfig) -> Router {
    let mut app = Router::new()
        .route("/api/brand-health", get(brand_health_handler))
        .route("/api/brand-health/options", get(brand_options_handler))
        .route("/api/competitive-intel", get(competitive_intel_handler))
        .route("/api/competitive-intel/options", get(market_options_handler));

    if let Some(dir) = &config.server.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

pub async fn start_server(config: AppConfig, dashboards: Dashboards) -> Result<()> {
    let state = Arc::new(AppState { dashboards });
    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    let app = router(state, &config);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn brand_health_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BrandParams>,
) -> Result<Json<BrandHealthView>, ApiError> {
    let view = state
        .dashboards
        .brand_health
        .render(params.brand.as_deref())
        .await?;
    Ok(Json(view))
}

async fn brand_options_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.dashboards.brand_health.options().await?))
}

async fn competitive_intel_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MarketParams>,
) -> Result<Json<CompetitiveIntelView>, ApiError> {
    let competitors = params.competitor_list();
    let view = state
        .dashboards
        .competitive_intel
        .render(params.market.as_deref(), competitors.as_deref())
        .await?;
    Ok(Json(view))
}

async fn market_options_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CompetitiveIntelOptions>, ApiError> {
    Ok(Json(state.dashboards.competitive_intel.options().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::tests::dashboards_over;
    use crate::processing::tests::{brand_table, location_table};
    use polars::prelude::DataFrame;

    fn state() -> Arc<AppState> {
        let (dashboards, _) = dashboards_over(brand_table(), location_table());
        Arc::new(AppState { dashboards })
    }

    fn params(market: Option<&str>, competitors: Option<&str>) -> MarketParams {
        MarketParams {
            market: market.map(str::to_string),
            competitors: competitors.map(str::to_string),
        }
    }

    #[test]
    fn competitor_param_splits_on_commas() {
        assert_eq!(params(None, None).competitor_list(), None);
        assert_eq!(
            params(None, Some("Target, Lowe's,,")).competitor_list(),
            Some(vec!["Target".to_string(), "Lowe's".to_string()])
        );
        assert_eq!(params(None, Some("")).competitor_list(), Some(vec![]));
    }

    #[tokio::test]
    async fn brand_health_handler_renders_selection() {
        let Json(view) = brand_health_handler(
            State(state()),
            Query(BrandParams { brand: Some("Y".into()) }),
        )
        .await
        .unwrap();
        assert_eq!(view.brand, "Y");
        assert_eq!(view.rows.len(), 1);
    }

    #[tokio::test]
    async fn competitive_intel_handler_honours_explicit_empty_selection() {
        let Json(view) = competitive_intel_handler(State(state()), Query(params(Some("Springfield"), Some(""))))
            .await
            .unwrap();
        assert!(view.competitors.is_empty());
        assert!(view.shares.is_empty());
        assert_eq!(view.location_count, 3);
    }

    #[tokio::test]
    async fn retrieval_failures_surface_as_bad_gateway() {
        let (dashboards, source) = dashboards_over(brand_table(), DataFrame::empty());
        source
            .unreachable
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let state = Arc::new(AppState { dashboards });

        let response = match brand_options_handler(State(state)).await {
            Ok(_) => panic!("expected failure"),
            Err(err) => err.into_response(),
        };
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn parse_failures_surface_as_server_error() {
        let response = ApiError(PipelineError::parse("s3://b/k", "missing columns")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
