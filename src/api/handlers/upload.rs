use axum::{Json, extract::Multipart, extract::State};
use bytes::Bytes;
use uuid::Uuid;

use crate::AppState;
use crate::api::models::UploadResponse;
use crate::errors::{Error, Result};
use crate::ocr::{self, BackoffPolicy, OcrError};

#[utoipa::path(
    post,
    path = "/upload/",
    tag = "upload",
    summary = "Upload an image and extract its text",
    description = "Stores the uploaded image in blob storage and runs it through the document \
                   intelligence service. Stage failures after the upload are reported as text in \
                   `extracted_text` with status 200.",
    request_body(
        content_type = "multipart/form-data",
        description = "Multipart form with the binary image in an `image` field"
    ),
    responses(
        (status = 200, description = "Processing completed", body = UploadResponse),
        (status = 400, description = "No image file provided", body = crate::api::models::ErrorResponse),
        (status = 500, description = "OCR processing failed", body = crate::api::models::ErrorResponse)
    )
)]
pub async fn upload_and_process_image(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadResponse>> {
    let mut image: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {}", e),
    })? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "image" => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("upload_{}", Uuid::new_v4()));

                let content = field.bytes().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read image field: {}", e),
                })?;

                image = Some((file_name, content));
            }
            _ => {
                // Ignore unknown fields (forward compatibility)
            }
        }
    }

    let Some((file_name, content)) = image else {
        return Err(Error::NoImageProvided);
    };

    if content.is_empty() {
        return Err(Error::BadRequest {
            message: "Image file is empty".to_string(),
        });
    }

    tracing::info!(file_name = %file_name, bytes = content.len(), "Processing uploaded image");

    // Upload failures are logged and absorbed: the response carries a null URL
    let image_url = match &state.storage {
        Some(store) => match store.upload(&file_name, content.clone()).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::error!(error = %e, file_name = %file_name, "Blob upload failed, continuing without a storage URL");
                None
            }
        },
        None => {
            tracing::warn!("Blob storage is not configured, skipping upload");
            None
        }
    };

    // OCR stage failures are rendered into the text field, not HTTP statuses
    let extracted_text = match run_analysis(&state, &content).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, file_name = %file_name, "OCR stage failed, reporting in response body");
            e.report_text()
        }
    };

    Ok(Json(UploadResponse {
        image_url,
        extracted_text,
    }))
}

/// Submit the image, poll the operation to a terminal state, flatten the result.
async fn run_analysis(state: &AppState, image: &[u8]) -> std::result::Result<String, OcrError> {
    let job = state.ocr.submit(image).await?;
    let policy = BackoffPolicy::from(&state.config.polling);
    let outcome = ocr::poll_until_terminal(state.ocr.as_ref(), &job, &policy).await?;
    ocr::extract_text(&outcome)
}

#[cfg(test)]
mod tests {
    use crate::config::{Config, StorageConfig};
    use crate::test_utils::create_test_app;
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn image_form() -> MultipartForm {
        MultipartForm::new().add_part(
            "image",
            Part::bytes(b"fake image bytes".to_vec())
                .file_name("scan.png")
                .mime_type("image/png"),
        )
    }

    fn test_config(storage_uri: Option<&str>, ocr_uri: Option<&str>) -> Config {
        let mut config = Config::default();
        if let Some(uri) = storage_uri {
            config.storage = StorageConfig {
                connection_string: Some(format!("BlobEndpoint={uri};SharedAccessSignature=sv=2022&sig=test")),
                container: "uploads".to_string(),
            };
        }
        config.ocr.endpoint = ocr_uri.map(str::to_string);
        config.ocr.api_key = ocr_uri.map(|_| "test-key".to_string());
        // Keep polling fast in tests that exercise a pending round
        config.polling.base = Duration::from_millis(10);
        config.polling.cap = Duration::from_millis(50);
        config
    }

    /// Mounts an analyze endpoint that acknowledges with an operation URL,
    /// and a status endpoint that replays `statuses` in order.
    async fn mount_ocr(mock_server: &MockServer, statuses: Vec<serde_json::Value>) {
        let operation_url = format!("{}/operations/1", mock_server.uri());

        Mock::given(method("POST"))
            .and(path_regex(r"^/formrecognizer/documentModels/.*:analyze$"))
            .and(header("Ocp-Apim-Subscription-Key", "test-key"))
            .respond_with(ResponseTemplate::new(202).insert_header("operation-location", operation_url.as_str()))
            .expect(1)
            .mount(mock_server)
            .await;

        let last = statuses.len();
        for (i, status) in statuses.into_iter().enumerate() {
            let mut mock = Mock::given(method("GET"))
                .and(path("/operations/1"))
                .respond_with(ResponseTemplate::new(200).set_body_json(status));
            if i + 1 < last {
                mock = mock.up_to_n_times(1);
            }
            mock.mount(mock_server).await;
        }
    }

    fn ten_line_result() -> serde_json::Value {
        let lines: Vec<serde_json::Value> = (1..=10).map(|i| serde_json::json!({"content": format!("line {i}")})).collect();
        serde_json::json!({
            "status": "succeeded",
            "analyzeResult": {"pages": [{"lines": lines}]}
        })
    }

    #[test_log::test(tokio::test)]
    async fn missing_image_field_is_rejected_without_network_calls() {
        let storage = MockServer::start().await;
        let ocr = MockServer::start().await;
        // Any outbound call fails the test
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(201)).expect(0).mount(&storage).await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(202)).expect(0).mount(&ocr).await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&ocr).await;

        let server = create_test_app(test_config(Some(&storage.uri()), Some(&ocr.uri())));

        let form = MultipartForm::new().add_part("file", Part::bytes(b"bytes".to_vec()).file_name("scan.png"));
        let response = server.post("/upload/").multipart(form).await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json();
        assert_eq!(body, serde_json::json!({"error": "No image file provided"}));
    }

    #[test_log::test(tokio::test)]
    async fn empty_image_field_is_rejected() {
        let server = create_test_app(test_config(None, None));

        let form = MultipartForm::new().add_part("image", Part::bytes(Vec::new()).file_name("scan.png"));
        let response = server.post("/upload/").multipart(form).await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test_log::test(tokio::test)]
    async fn end_to_end_upload_extracts_ten_lines() {
        let storage = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/uploads/scan.png"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&storage)
            .await;

        let ocr = MockServer::start().await;
        mount_ocr(&ocr, vec![ten_line_result()]).await;

        let server = create_test_app(test_config(Some(&storage.uri()), Some(&ocr.uri())));
        let response = server.post("/upload/").multipart(image_form()).await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert_eq!(
            body["image_url"].as_str(),
            Some(format!("{}/uploads/scan.png", storage.uri()).as_str())
        );
        let expected: Vec<String> = (1..=10).map(|i| format!("line {i}")).collect();
        assert_eq!(body["extracted_text"].as_str(), Some(expected.join("\n").as_str()));
    }

    #[test_log::test(tokio::test)]
    async fn pending_rounds_are_polled_through() {
        let storage = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(201)).mount(&storage).await;

        let ocr = MockServer::start().await;
        mount_ocr(
            &ocr,
            vec![
                serde_json::json!({"status": "notStarted"}),
                serde_json::json!({"status": "running"}),
                ten_line_result(),
            ],
        )
        .await;

        let server = create_test_app(test_config(Some(&storage.uri()), Some(&ocr.uri())));
        let response = server.post("/upload/").multipart(image_form()).await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert!(body["extracted_text"].as_str().unwrap().starts_with("line 1\n"));
    }

    #[test_log::test(tokio::test)]
    async fn storage_failure_yields_null_url_but_text_still_extracted() {
        let storage = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("signature mismatch"))
            .expect(1)
            .mount(&storage)
            .await;

        let ocr = MockServer::start().await;
        mount_ocr(&ocr, vec![ten_line_result()]).await;

        let server = create_test_app(test_config(Some(&storage.uri()), Some(&ocr.uri())));
        let response = server.post("/upload/").multipart(image_form()).await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert!(body["image_url"].is_null());
        assert!(body["extracted_text"].as_str().unwrap().starts_with("line 1"));
    }

    #[test_log::test(tokio::test)]
    async fn missing_credentials_are_reported_in_the_text_field() {
        let storage = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(201)).expect(1).mount(&storage).await;

        let server = create_test_app(test_config(Some(&storage.uri()), None));
        let response = server.post("/upload/").multipart(image_form()).await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert!(body["image_url"].as_str().is_some());
        assert_eq!(
            body["extracted_text"].as_str(),
            Some("OCR service credentials are not configured")
        );
    }

    #[test_log::test(tokio::test)]
    async fn remote_failure_is_reported_distinctly_from_timeout() {
        let ocr = MockServer::start().await;
        mount_ocr(
            &ocr,
            vec![serde_json::json!({
                "status": "failed",
                "error": {"code": "InvalidImage", "message": "image too small"}
            })],
        )
        .await;

        let server = create_test_app(test_config(None, Some(&ocr.uri())));
        let response = server.post("/upload/").multipart(image_form()).await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        let text = body["extracted_text"].as_str().unwrap();
        assert!(text.contains("image too small"));
        assert!(!text.contains("timed out"));
    }

    #[test_log::test(tokio::test)]
    async fn succeeded_status_without_payload_reports_extraction_failed() {
        let ocr = MockServer::start().await;
        mount_ocr(&ocr, vec![serde_json::json!({"status": "succeeded"})]).await;

        let server = create_test_app(test_config(None, Some(&ocr.uri())));
        let response = server.post("/upload/").multipart(image_form()).await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert_eq!(body["extracted_text"].as_str(), Some("Text extraction failed"));
    }
}
