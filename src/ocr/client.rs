//! HTTP client for the document intelligence service.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;

use super::{AnalysisJob, AnalysisSource, JobStatus, OcrError};
use crate::config::OcrConfig;
use crate::ocr::extract::{AnalyzeOutcome, AnalyzeResult};

/// Header carrying the service subscription key on every OCR call.
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Header on the submit acknowledgment naming the operation-status URL.
const OPERATION_LOCATION_HEADER: &str = "operation-location";

/// Wire shape of an operation-status response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollResponse {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl RemoteError {
    fn into_message(self) -> String {
        if !self.message.is_empty() {
            self.message
        } else if !self.code.is_empty() {
            self.code
        } else {
            "analysis failed without detail".to_string()
        }
    }
}

/// Client for submitting analyze requests and polling their status.
///
/// Stateless besides the shared `reqwest::Client`; safe to share across
/// requests.
#[derive(Debug, Clone)]
pub struct OcrClient {
    client: reqwest::Client,
    config: OcrConfig,
}

impl OcrClient {
    pub fn new(client: reqwest::Client, config: OcrConfig) -> Self {
        Self { client, config }
    }

    /// Endpoint and key, or `MissingCredentials` when either is unset.
    fn credentials(&self) -> Result<(&str, &str), OcrError> {
        match (self.config.endpoint.as_deref(), self.config.api_key.as_deref()) {
            (Some(endpoint), Some(key)) => Ok((endpoint, key)),
            _ => Err(OcrError::MissingCredentials),
        }
    }

    /// Submit image bytes for analysis.
    ///
    /// The image is inlined into the request body base64-encoded. An
    /// acknowledgment must carry an `operation-location` header naming the
    /// status URL; anything else is a rejection.
    pub async fn submit(&self, image: &[u8]) -> Result<AnalysisJob, OcrError> {
        let (endpoint, key) = self.credentials()?;

        let url = format!(
            "{}/formrecognizer/documentModels/{}:analyze?api-version={}",
            endpoint.trim_end_matches('/'),
            self.config.model,
            self.config.api_version,
        );

        tracing::debug!(model = %self.config.model, bytes = image.len(), "Submitting analyze request");

        let response = self
            .client
            .post(&url)
            .header(SUBSCRIPTION_KEY_HEADER, key)
            .json(&json!({ "base64Source": BASE64.encode(image) }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OcrError::SubmissionRejected {
                status: status.as_u16(),
                detail,
            });
        }

        let operation_url = response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| OcrError::SubmissionRejected {
                status: status.as_u16(),
                detail: "acknowledgment carried no operation-location header".to_string(),
            })?;

        tracing::debug!(operation_url = %operation_url, "Analyze request accepted");

        Ok(AnalysisJob { operation_url })
    }
}

#[async_trait]
impl AnalysisSource for OcrClient {
    async fn fetch_status(&self, job: &AnalysisJob) -> Result<JobStatus, OcrError> {
        let (_, key) = self.credentials()?;

        let body: PollResponse = self
            .client
            .get(&job.operation_url)
            .header(SUBSCRIPTION_KEY_HEADER, key)
            .send()
            .await?
            .json()
            .await?;

        tracing::debug!(status = %body.status, "Polled analysis operation");

        match body.status.as_str() {
            "succeeded" => Ok(JobStatus::Succeeded(AnalyzeOutcome {
                analyze_result: body.analyze_result,
            })),
            "failed" => Ok(JobStatus::Failed(
                body.error
                    .map(RemoteError::into_message)
                    .unwrap_or_else(|| "analysis failed without detail".to_string()),
            )),
            // "notStarted", "running", and anything unrecognized: keep polling
            _ => Ok(JobStatus::Pending),
        }
    }
}
