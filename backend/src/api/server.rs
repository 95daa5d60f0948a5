//! HTTP Server for the dietdata API.
//!
//! A thin adapter over [`Engine`]; every handler is one engine call.
//!
//! # API Endpoints
//!
//! | Method | Path             | Description                               |
//! |--------|------------------|-------------------------------------------|
//! | GET    | `/FetchDataset`  | Filtered, sorted, paginated recipes       |
//! | GET    | `/statistics`    | Cached aggregate statistics               |
//! | GET    | `/diet-types`    | Distinct diet types                       |
//! | GET    | `/cuisine-types` | Distinct cuisine types                    |
//! | GET    | `/health`        | Source and cache backend status           |
//! | POST   | `/clear-cache`   | Drop cached snapshots and rebuild         |
//! | GET    | `/api/logs`      | SSE stream for real-time engine logs      |

use axum::{
    extract::{Query, State},
    http::{header, Method},
    response::{sse::Event, Json, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use std::collections::HashMap;
use std::sync::Arc;
use std::{convert::Infallible, net::SocketAddr, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::LOG_BROADCASTER;
use super::types::{api_error, ApiError, ClearCacheResponse, CuisineTypesResponse, DietTypesResponse};
use crate::engine::{Engine, HealthReport};
use crate::error::{ServerError, ServerResult};
use crate::models::StatisticsSnapshot;
use crate::query::DatasetPage;

type AppState = Arc<Engine>;

/// Build the router over a shared engine.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/FetchDataset", get(fetch_dataset))
        .route("/statistics", get(statistics))
        .route("/diet-types", get(diet_types))
        .route("/cuisine-types", get(cuisine_types))
        .route("/health", get(health))
        .route("/clear-cache", post(clear_cache))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(engine)
}

/// Start the engine's watcher and serve HTTP until Ctrl-C.
pub async fn start_server(engine: Arc<Engine>, port: u16) -> ServerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = bind(addr).await?;

    engine.start();
    tracing::info!(%addr, source = %engine.config().source.display(), "dietdata server listening");

    let served = axum::serve(listener, router(engine.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    engine.shutdown();
    served.map_err(|e| ServerError::Internal(format!("server error: {}", e)))?;
    tracing::info!("server stopped");
    Ok(())
}

async fn bind(addr: SocketAddr) -> ServerResult<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Internal(format!("cannot bind {}: {}", addr, e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn fetch_dataset(
    State(engine): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<DatasetPage>, ApiError> {
    engine.fetch_dataset(&params).await.map(Json).map_err(api_error)
}

async fn statistics(State(engine): State<AppState>) -> Result<Json<StatisticsSnapshot>, ApiError> {
    let stats = engine.get_statistics().await.map_err(api_error)?;
    Ok(Json(StatisticsSnapshot::clone(&stats)))
}

async fn diet_types(State(engine): State<AppState>) -> Result<Json<DietTypesResponse>, ApiError> {
    let diet_types = engine.list_diet_types().await.map_err(api_error)?;
    Ok(Json(DietTypesResponse { diet_types }))
}

async fn cuisine_types(State(engine): State<AppState>) -> Result<Json<CuisineTypesResponse>, ApiError> {
    let cuisine_types = engine.list_cuisine_types().await.map_err(api_error)?;
    Ok(Json(CuisineTypesResponse { cuisine_types }))
}

async fn health(State(engine): State<AppState>) -> Json<HealthReport> {
    Json(engine.health())
}

async fn clear_cache(State(engine): State<AppState>) -> Result<Json<ClearCacheResponse>, ApiError> {
    let outcome = engine.clear_cache().await.map_err(api_error)?;
    Ok(Json(ClearCacheResponse::from(outcome)))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    // Lagged receivers skip the entries they missed
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let entry = result.ok()?;
        let json = serde_json::to_string(&entry).ok()?;
        Some(Ok(Event::default().data(json)))
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
