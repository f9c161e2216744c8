//! Document intelligence (OCR) integration.
//!
//! The remote service exposes an asynchronous submit-then-poll API: a POST of
//! the image yields a 202 acknowledgment whose `operation-location` header is
//! the job handle, and repeated GETs of that handle report the job status
//! until it reaches a terminal state.
//!
//! Exactly one job is created per request; the handle is discarded once a
//! terminal state is reached.

pub mod client;
pub mod extract;
pub mod poller;

use async_trait::async_trait;
use thiserror::Error as ThisError;

pub use client::OcrClient;
pub use extract::{AnalyzeOutcome, extract_text};
pub use poller::{BackoffPolicy, poll_until_terminal};

/// Handle to an in-progress analysis operation: the URL the service told us
/// to poll for status.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisJob {
    pub operation_url: String,
}

/// Status reported by a single poll of the job handle.
#[derive(Debug)]
pub enum JobStatus {
    /// Not a terminal state yet ("notStarted", "running", ...)
    Pending,
    /// Terminal success, carrying the full analysis payload
    Succeeded(AnalyzeOutcome),
    /// Terminal failure reported by the service
    Failed(String),
}

/// Where poll attempts get their status from.
///
/// The production implementation is [`OcrClient`]; tests substitute scripted
/// sources so the poller's timing can be verified without a network.
#[async_trait]
pub trait AnalysisSource: Send + Sync {
    async fn fetch_status(&self, job: &AnalysisJob) -> Result<JobStatus, OcrError>;
}

/// Terminal failures of the OCR pipeline.
///
/// Every variant is terminal - there is no retry beyond the poller's own
/// attempt budget. The handler renders these into the response's
/// `extracted_text` field via [`OcrError::report_text`] instead of mapping
/// them to HTTP error statuses (the contract the original service shipped).
#[derive(ThisError, Debug)]
pub enum OcrError {
    /// Service endpoint or API key not configured
    #[error("OCR service credentials are not configured")]
    MissingCredentials,

    /// The service did not acknowledge the analyze request
    #[error("OCR submission rejected with HTTP {status}: {detail}")]
    SubmissionRejected { status: u16, detail: String },

    /// Network-level failure on submission or polling
    #[error("OCR service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service reported the analysis job as failed
    #[error("OCR processing failed remotely: {message}")]
    RemoteFailed { message: String },

    /// The job never reached a terminal state within the attempt budget
    #[error("OCR polling timed out after {attempts} attempts")]
    TimedOut { attempts: u32 },

    /// Terminal success but the expected analysis payload was absent
    #[error("Text extraction failed")]
    ExtractionFailed,
}

impl OcrError {
    /// Text placed in the `extracted_text` response field when a stage fails.
    pub fn report_text(&self) -> String {
        match self {
            // The original service's sentinel string, matched by its frontend
            OcrError::ExtractionFailed => "Text extraction failed".to_string(),
            other => other.to_string(),
        }
    }
}
