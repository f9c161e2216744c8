//! Wire types for the upload API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response to a processed upload.
///
/// Always returned with status 200 once orchestration completes, even when a
/// stage failed: `image_url` is null if the blob upload failed, and stage
/// failures are rendered as descriptive text in `extracted_text`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Retrieval URL of the stored image; null when the upload failed or
    /// storage is not configured
    pub image_url: Option<String>,
    /// Recognized text, newline-separated in page-then-line order, or a
    /// descriptive error string when an OCR stage failed
    pub extracted_text: String,
}

/// Error body for 4xx/5xx responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
