//! HTTP ingestion surface for the aggregation service
//!
//! A thin axum layer: handlers parse paths and bodies, call the
//! [`AggregationService`](crate::service::AggregationService) and map its
//! errors to status codes. No business logic lives here.
//!
//! ## Endpoints
//!
//! - `POST /update/` - Apply one JSON record
//! - `POST /updates/` - Apply a JSON array of records
//! - `POST /update/{type}/{id}/{value}` - Apply one record given in the path
//! - `POST /value/` - Look up `{id, type}`
//! - `GET /value/{type}/{id}` - Plain-text value of one metric
//! - `GET /` - HTML list of every metric
//! - `GET /ping` - Storage health probe
//!
//! When a key is configured, requests carrying a `HashSHA256` header are
//! verified against their body and every response is signed.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{BatchResponse, HealthResponse, ValueQuery};

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "localhost:8080")
    pub bind_addr: String,
}

/// Build the router with every route and layer
pub fn router(state: ApiState) -> Router {
    let signer = state.signer.clone();

    let mut app = Router::new()
        .route("/", get(routes::values::list_all))
        .route("/ping", get(routes::health::ping))
        .route("/update/", post(routes::updates::update_one))
        .route("/updates/", post(routes::updates::update_batch))
        .route(
            "/update/:type/:id/:value",
            post(routes::updates::update_from_path),
        )
        .route("/value/", post(routes::values::value_json))
        .route("/value/:type/:id", get(routes::values::value_from_path))
        .with_state(state);

    if let Some(signer) = signer {
        app = app.layer(axum::middleware::from_fn_with_state(
            signer,
            middleware::signature::signature_middleware,
        ));
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task that drains and
/// exits once `shutdown` completes. Returns the server's local address and
/// the task handle.
pub async fn spawn_api_server<F>(
    config: ApiConfig,
    state: ApiState,
    shutdown: F,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("starting API server on {}", config.bind_addr);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok((addr, server))
}
