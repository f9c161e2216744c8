//! # scanrelay: image upload and OCR extraction relay
//!
//! `scanrelay` is a thin HTTP relay in front of two managed services: a blob
//! store and a document intelligence (OCR) service. A client POSTs an image
//! to `/upload/`; the relay writes the image to blob storage, submits it for
//! analysis, polls the asynchronous operation to a terminal state with
//! bounded exponential backoff, and answers with the storage URL plus the
//! recognized text.
//!
//! ## Request flow
//!
//! The single endpoint orchestrates four stages strictly in sequence:
//!
//! 1. **Upload** ([`storage::BlobStore`]) - a block-blob PUT, idempotent by
//!    name. Failures here are logged and absorbed; the response then carries
//!    a null `image_url`.
//! 2. **Submit** ([`ocr::OcrClient`]) - the image is base64-inlined into an
//!    analyze request; the 202-style acknowledgment's `operation-location`
//!    header is the job handle.
//! 3. **Poll** ([`ocr::poller`]) - the handle is queried until the job
//!    reports a terminal status, waiting `min(base * 2^attempt, cap)` between
//!    attempts with a fixed attempt budget. Success, remote-reported failure,
//!    and exhausted-budget timeout are distinct outcomes.
//! 4. **Extract** ([`ocr::extract`]) - the structured result is flattened to
//!    plain text, page order then line order, newline-separated.
//!
//! OCR stage failures are deliberately reported as descriptive strings inside
//! a 200 response rather than as HTTP error statuses - that is the contract
//! the original deployment shipped and its frontend depends on. Only a
//! missing `image` field (400) and unexpected errors (500) map to error
//! statuses.
//!
//! ## Quick start
//!
//! ```no_run
//! use clap::Parser;
//! use scanrelay::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = scanrelay::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     scanrelay::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod config;
pub mod errors;
pub mod ocr;
mod openapi;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub mod test_utils;

use crate::api::handlers;
use crate::ocr::OcrClient;
use crate::openapi::ApiDoc;
use crate::storage::BlobStore;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::{
    Router,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Outbound HTTP timeout for both the blob store and the OCR service.
/// Generous because analyze submissions can carry multi-megabyte payloads.
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(60);

/// Application state shared across all request handlers.
///
/// Holds only immutable configuration and cloneable service clients - no
/// mutable state is shared between requests.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    /// Absent when no connection string is configured; uploads are then
    /// skipped and responses carry a null `image_url`
    pub storage: Option<Arc<BlobStore>>,
    pub ocr: Arc<OcrClient>,
}

/// Build the application router with all endpoints and middleware.
///
/// - `POST /upload/` - the upload-and-extract endpoint
/// - `/docs` - OpenAPI documentation (Scalar)
/// - `/internal/metrics` - Prometheus metrics, when enabled
/// - CORS, body-size limit, and tracing middleware
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cors_layer = create_cors_layer(&state.config)?;
    let enable_metrics = state.config.enable_metrics;
    let max_upload_bytes = state.config.limits.max_upload_bytes;

    let mut router = Router::new()
        .route("/upload/", post(handlers::upload::upload_and_process_image))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(cors_layer)
        .with_state(state);

    // Add Prometheus metrics if enabled
    if enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Create CORS layer from config
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    if config.cors.allowed_origins.iter().any(|origin| origin == "*") {
        return Ok(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
    }

    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        origins.push(origin.parse::<HeaderValue>()?);
    }

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::POST])
        .allow_headers(Any))
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] loads clients from config and builds
///    the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles
///    requests until the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting scanrelay with configuration: {:#?}", config);

        let http_client = reqwest::Client::builder().timeout(OUTBOUND_TIMEOUT).build()?;

        let storage = BlobStore::from_config(http_client.clone(), &config.storage)?;
        if storage.is_none() {
            info!("Blob storage is not configured; uploads will report a null image_url");
        }

        let ocr = OcrClient::new(http_client, config.ocr.clone());
        if config.ocr.endpoint.is_none() || config.ocr.api_key.is_none() {
            info!("OCR credentials are not configured; requests will report a credentials error");
        }

        let state = AppState::builder()
            .config(config.clone())
            .maybe_storage(storage.map(Arc::new))
            .ocr(Arc::new(ocr))
            .build();

        let router = build_router(state)?;

        Ok(Self { router, config })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "scanrelay listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Server stopped");

        Ok(())
    }
}
