use crate::config::AppConfig;
use crate::view::{self, AgeBreakdown, MapView, Options, TownHit};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::Json,
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
    pub config: AppConfig,
}

#[derive(Deserialize)]
pub struct MapParams {
    #[serde(default)]
    city: String,
    #[serde(default)]
    variable: String,
}

#[derive(Deserialize)]
pub struct BarParams {
    #[serde(default)]
    city: String,
    #[serde(default)]
    town: String,
}

#[derive(Deserialize)]
pub struct QueryParams {
    city: String,
    lat: f64,
    lon: f64,
}

pub fn router(config: AppConfig) -> Router {
    let static_dir = config.server.static_dir.clone();
    let state = Arc::new(AppState { config });

    let mut app = Router::new()
        .route("/api/options", get(options_handler))
        .route("/api/map", get(map_handler))
        .route("/api/bar", get(bar_handler))
        .route("/api/query", get(query_handler));
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    let port = config.server.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(config);

    info!("Serving on http://{}", addr);
    println!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn options_handler(State(state): State<Arc<AppState>>) -> Json<Options> {
    Json(view::options(&state.config))
}

// Loading reads files synchronously, so it runs on the blocking pool

async fn map_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MapParams>,
) -> Json<MapView> {
    let city = params.city.clone();
    let result = tokio::task::spawn_blocking(move || {
        view::choropleth(&state.config, &params.city, &params.variable)
    })
    .await;
    Json(result.unwrap_or_else(|e| {
        error!("Map task for {} failed: {}", city, e);
        MapView::empty(&city)
    }))
}

async fn bar_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BarParams>,
) -> Json<Option<AgeBreakdown>> {
    let result = tokio::task::spawn_blocking(move || {
        view::age_breakdown(&state.config, &params.city, &params.town)
    })
    .await;
    Json(result.unwrap_or_else(|e| {
        error!("Bar chart task failed: {}", e);
        None
    }))
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<TownHit>> {
    let result = tokio::task::spawn_blocking(move || {
        view::query_town(&state.config, &params.city, params.lon, params.lat)
    })
    .await;
    Json(result.unwrap_or_else(|e| {
        error!("Point query task failed: {}", e);
        None
    }))
}
