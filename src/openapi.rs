//! OpenAPI documentation, served with Scalar at `/docs`.

use utoipa::OpenApi;

use crate::api;
use crate::api::models::{ErrorResponse, UploadResponse};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "scanrelay",
        description = "Image upload relay: stores uploads in blob storage and extracts text via a document intelligence service"
    ),
    paths(api::handlers::upload::upload_and_process_image),
    components(schemas(UploadResponse, ErrorResponse)),
    tags(
        (name = "upload", description = "Image upload and OCR extraction")
    )
)]
pub struct ApiDoc;
