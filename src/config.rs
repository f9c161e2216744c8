//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `SCANRELAY_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `SCANRELAY_` override YAML values
//! 3. **AZURE_* variables** - The raw variable names the original deployment used, mapped onto
//!    their nested config keys (e.g. `AZURE_STORAGE_CONNECTION_STRING` sets
//!    `storage.connection_string`)
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `SCANRELAY_OCR__MODEL=prebuilt-layout` sets the `ocr.model` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! SCANRELAY_PORT=8080
//!
//! # Point at the blob store (preferred method)
//! AZURE_STORAGE_CONNECTION_STRING="BlobEndpoint=https://acct.blob.core.windows.net;SharedAccessSignature=sv=..."
//! AZURE_CONTAINER_NAME=uploads
//!
//! # OCR service credentials
//! AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT="https://myocr.cognitiveservices.azure.com"
//! AZURE_DOCUMENT_INTELLIGENCE_KEY="..."
//!
//! # Override nested values
//! SCANRELAY_POLLING__MAX_ATTEMPTS=10
//! SCANRELAY_ENABLE_METRICS=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Error;
use crate::storage::ConnectionString;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "SCANRELAY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation. Loaded once
/// at process start, immutable thereafter, and injected into each component.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Blob storage connection settings
    pub storage: StorageConfig,
    /// OCR (document intelligence) service settings
    pub ocr: OcrConfig,
    /// Backoff policy for polling asynchronous analysis operations
    pub polling: PollingConfig,
    /// Resource limits for protecting system capacity
    pub limits: LimitsConfig,
    /// CORS configuration for the browser frontend
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            storage: StorageConfig::default(),
            ocr: OcrConfig::default(),
            polling: PollingConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: false,
        }
    }
}

/// Blob store connection settings.
///
/// The connection string uses the Azure format and must carry a SAS token:
/// either `BlobEndpoint=...;SharedAccessSignature=...` or
/// `AccountName=...;SharedAccessSignature=...[;EndpointSuffix=...]`.
/// Account-key (HMAC-signed) authentication is not supported.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Azure-style connection string for the blob service.
    /// Unset means uploads are skipped and responses carry a null `image_url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    /// Container uploaded blobs are written into
    pub container: String,
}

/// Document intelligence service settings.
///
/// Endpoint and API key are optional at startup: requests made without them
/// report a credentials error in the response body rather than failing boot.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    /// Base URL of the document intelligence service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Subscription key sent as `Ocp-Apim-Subscription-Key`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// API version query parameter on analyze requests
    pub api_version: String,
    /// Model identifier, e.g. "prebuilt-read" or "prebuilt-layout"
    pub model: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_version: "2024-11-30".to_string(),
            model: "prebuilt-read".to_string(),
        }
    }
}

/// Backoff policy settings for the analysis poller.
///
/// The wait after attempt `n` (0-based) is `min(base * 2^n, cap)`; polling
/// gives up after `max_attempts` queries without a terminal status.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    /// Base wait duration (doubled after each attempt)
    #[serde(with = "humantime_serde")]
    pub base: Duration,
    /// Ceiling on the per-attempt wait
    #[serde(with = "humantime_serde")]
    pub cap: Duration,
    /// Maximum number of status queries before reporting a timeout
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(15),
            max_attempts: 20,
        }
    }
}

/// Resource limits for incoming requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum accepted request body size in bytes
    pub max_upload_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            // Matches the document intelligence service's 50 MB payload ceiling
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// CORS settings for the upload endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins; "*" allows any origin
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("SCANRELAY_").split("__"))
            // The raw variable names the original deployment exported
            .merge(
                Env::raw()
                    .only(&[
                        "AZURE_STORAGE_CONNECTION_STRING",
                        "AZURE_CONTAINER_NAME",
                        "AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT",
                        "AZURE_DOCUMENT_INTELLIGENCE_KEY",
                        "AZURE_API_VERSION",
                        "AZURE_MODEL",
                    ])
                    .map(|key| match key.as_str() {
                        "AZURE_STORAGE_CONNECTION_STRING" => "storage.connection_string".into(),
                        "AZURE_CONTAINER_NAME" => "storage.container".into(),
                        "AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT" => "ocr.endpoint".into(),
                        "AZURE_DOCUMENT_INTELLIGENCE_KEY" => "ocr.api_key".into(),
                        "AZURE_API_VERSION" => "ocr.api_version".into(),
                        "AZURE_MODEL" => "ocr.model".into(),
                        other => other.to_string().into(),
                    })
                    .split("."),
            )
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.polling.max_attempts == 0 {
            return Err(Error::Internal {
                operation: "Config validation: polling.max_attempts must be at least 1".to_string(),
            });
        }

        if self.polling.cap < self.polling.base {
            return Err(Error::Internal {
                operation: "Config validation: polling.cap must be >= polling.base".to_string(),
            });
        }

        // A connection string without a SAS token cannot authenticate requests
        if let Some(raw) = &self.storage.connection_string {
            ConnectionString::parse(raw).map_err(|e| Error::Internal {
                operation: format!("Config validation: invalid storage.connection_string: {e}"),
            })?;

            if self.storage.container.is_empty() {
                return Err(Error::Internal {
                    operation: "Config validation: storage.container is required when a connection string is set. \
                     Please set AZURE_CONTAINER_NAME or add storage.container to the config file."
                        .to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
