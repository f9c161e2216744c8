//! Helpers for constructing a test application.

use crate::ocr::OcrClient;
use crate::storage::BlobStore;
use crate::{AppState, Config, build_router};
use std::sync::Arc;

/// Build a `TestServer` around the full router for the given config.
pub fn create_test_app(config: Config) -> axum_test::TestServer {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let http_client = reqwest::Client::new();

    let storage = BlobStore::from_config(http_client.clone(), &config.storage)
        .expect("test storage config should parse")
        .map(Arc::new);
    let ocr = Arc::new(OcrClient::new(http_client, config.ocr.clone()));

    let state = AppState::builder().config(config).maybe_storage(storage).ocr(ocr).build();

    let router = build_router(state).expect("router should build");
    axum_test::TestServer::new(router).expect("Failed to create test server")
}
