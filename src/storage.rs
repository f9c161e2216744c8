//! Blob store client: writes uploaded images to an Azure-style blob container.
//!
//! Uploads are a single block-blob PUT, idempotent by name (same-name uploads
//! overwrite). Authentication is SAS-token only: the connection string must
//! carry a `SharedAccessSignature`, account-key signing is not supported.
//! Upload failures are typed and left to the caller to absorb - the request
//! handler logs them and continues with a null URL.

use bytes::Bytes;
use thiserror::Error as ThisError;
use url::Url;

use crate::config::StorageConfig;

/// Service version sent with every blob request.
const BLOB_API_VERSION: &str = "2021-08-06";

/// A parsed blob service connection string.
///
/// Accepted forms:
/// - `BlobEndpoint=https://acct.blob.core.windows.net;SharedAccessSignature=sv=...`
/// - `AccountName=acct;SharedAccessSignature=sv=...[;EndpointSuffix=core.windows.net]`
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionString {
    pub endpoint: Url,
    pub sas_token: String,
}

#[derive(ThisError, Debug)]
pub enum ConnectionStringError {
    #[error("connection string has neither BlobEndpoint nor AccountName")]
    MissingEndpoint,

    #[error("connection string has no SharedAccessSignature (account-key auth is not supported)")]
    MissingSas,

    #[error("blob endpoint is not a valid URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, ConnectionStringError> {
        let mut blob_endpoint = None;
        let mut account_name = None;
        let mut endpoint_suffix = None;
        let mut sas_token = None;

        for pair in raw.split(';') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key.trim() {
                k if k.eq_ignore_ascii_case("BlobEndpoint") => blob_endpoint = Some(value.to_string()),
                k if k.eq_ignore_ascii_case("AccountName") => account_name = Some(value.to_string()),
                k if k.eq_ignore_ascii_case("EndpointSuffix") => endpoint_suffix = Some(value.to_string()),
                k if k.eq_ignore_ascii_case("SharedAccessSignature") => sas_token = Some(value.to_string()),
                _ => {}
            }
        }

        let endpoint = match (blob_endpoint, account_name) {
            (Some(endpoint), _) => endpoint,
            (None, Some(account)) => {
                let suffix = endpoint_suffix.unwrap_or_else(|| "core.windows.net".to_string());
                format!("https://{account}.blob.{suffix}")
            }
            (None, None) => return Err(ConnectionStringError::MissingEndpoint),
        };

        let sas_token = sas_token.ok_or(ConnectionStringError::MissingSas)?;
        let sas_token = sas_token.trim_start_matches('?').to_string();

        Ok(Self {
            endpoint: Url::parse(&endpoint)?,
            sas_token,
        })
    }
}

#[derive(ThisError, Debug)]
pub enum StorageError {
    /// Network-level failure reaching the blob service
    #[error("blob store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The blob service answered with a non-success status
    #[error("blob store rejected upload with HTTP {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

/// Client for writing blobs into a single container.
///
/// Cheap to clone via the shared `reqwest::Client`; holds no per-request state.
#[derive(Debug, Clone)]
pub struct BlobStore {
    client: reqwest::Client,
    connection: ConnectionString,
    container: String,
}

impl BlobStore {
    /// Build a store from config. Returns `None` when no connection string is
    /// configured - the caller then skips uploads and reports a null URL.
    pub fn from_config(client: reqwest::Client, config: &StorageConfig) -> Result<Option<Self>, ConnectionStringError> {
        let Some(raw) = &config.connection_string else {
            return Ok(None);
        };

        let connection = ConnectionString::parse(raw)?;

        Ok(Some(Self {
            client,
            connection,
            container: config.container.clone(),
        }))
    }

    /// URL the blob will be retrievable at, without the SAS query.
    fn blob_url(&self, name: &str) -> Url {
        let mut url = self.connection.endpoint.clone();
        // Endpoint URL validity is checked at parse time; http(s) URLs always
        // have mutable path segments.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.container).push(name);
        }
        url
    }

    /// Upload `content` as a block blob named `name`, overwriting any
    /// existing blob with that name. Returns the blob's retrieval URL.
    pub async fn upload(&self, name: &str, content: Bytes) -> Result<String, StorageError> {
        let blob_url = self.blob_url(name);

        let mut put_url = blob_url.clone();
        put_url.set_query(Some(&self.connection.sas_token));

        tracing::debug!(blob = %blob_url, bytes = content.len(), "Uploading blob");

        let response = self
            .client
            .put(put_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", BLOB_API_VERSION)
            .body(content)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        tracing::info!(blob = %blob_url, "Blob uploaded");

        Ok(blob_url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(uri: &str, container: &str) -> BlobStore {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let config = StorageConfig {
            connection_string: Some(format!("BlobEndpoint={uri};SharedAccessSignature=sv=2022&sig=abc")),
            container: container.to_string(),
        };
        BlobStore::from_config(reqwest::Client::new(), &config)
            .expect("valid connection string")
            .expect("connection string present")
    }

    #[test]
    fn parses_blob_endpoint_form() {
        let conn = ConnectionString::parse("BlobEndpoint=https://acct.blob.core.windows.net;SharedAccessSignature=?sv=2022&sig=abc")
            .expect("should parse");
        assert_eq!(conn.endpoint.as_str(), "https://acct.blob.core.windows.net/");
        // Leading '?' is stripped so the token can be used as a query string directly
        assert_eq!(conn.sas_token, "sv=2022&sig=abc");
    }

    #[test]
    fn parses_account_name_form() {
        let conn =
            ConnectionString::parse("AccountName=acct;SharedAccessSignature=sv=2022&sig=abc;EndpointSuffix=core.chinacloudapi.cn")
                .expect("should parse");
        assert_eq!(conn.endpoint.as_str(), "https://acct.blob.core.chinacloudapi.cn/");
    }

    #[test]
    fn rejects_missing_sas() {
        let err = ConnectionString::parse("AccountName=acct;AccountKey=deadbeef").unwrap_err();
        assert!(matches!(err, ConnectionStringError::MissingSas));
    }

    #[test]
    fn rejects_missing_endpoint() {
        let err = ConnectionString::parse("SharedAccessSignature=sv=2022").unwrap_err();
        assert!(matches!(err, ConnectionStringError::MissingEndpoint));
    }

    #[test]
    fn unconfigured_storage_yields_none() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let config = StorageConfig::default();
        let store = BlobStore::from_config(reqwest::Client::new(), &config).expect("no parse error");
        assert!(store.is_none());
    }

    #[tokio::test]
    async fn upload_returns_url_without_sas() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/uploads/receipt.png"))
            .and(header("x-ms-blob-type", "BlockBlob"))
            .and(query_param("sig", "abc"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = store_for(&mock_server.uri(), "uploads");
        let url = store
            .upload("receipt.png", Bytes::from_static(b"fake image bytes"))
            .await
            .expect("upload should succeed");

        assert_eq!(url, format!("{}/uploads/receipt.png", mock_server.uri()));
        assert!(!url.contains("sig="));
    }

    #[tokio::test]
    async fn upload_percent_encodes_blob_names() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = store_for(&mock_server.uri(), "uploads");
        let url = store
            .upload("my scan.png", Bytes::from_static(b"bytes"))
            .await
            .expect("upload should succeed");

        assert_eq!(url, format!("{}/uploads/my%20scan.png", mock_server.uri()));
    }

    #[tokio::test]
    async fn upload_rejection_is_typed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("signature mismatch"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = store_for(&mock_server.uri(), "uploads");
        let err = store.upload("receipt.png", Bytes::from_static(b"bytes")).await.unwrap_err();

        assert!(matches!(err, StorageError::Rejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn upload_transport_failure_is_typed() {
        // Point to a port that's not listening
        let store = store_for("http://127.0.0.1:1", "uploads");
        let err = store.upload("receipt.png", Bytes::from_static(b"bytes")).await.unwrap_err();

        assert!(matches!(err, StorageError::Transport(_)));
    }
}
