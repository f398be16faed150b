//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3.0 document served at `/api-docs/openapi.json`.

use axum::Json;
use utoipa::OpenApi;

use crate::handlers::{
    Base64File, CancelResponse, DebugResponse, HealthResponse, InitResponse, ProgressResponse,
    ReadyResponse, RowResponse, SummaryResponse, UploadBatchRequest,
};

/// VK Batch Uploader API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "VK Batch Uploader API",
        version = "0.1.0",
        description = r#"
## Batch photo publishing to VK albums

A job pairs a `config` (access token, album, optional group) with a delimited
manifest. Each manifest row names a main photo, its caption and any number of
comment photos.

### How It Works

1. **Create** a job via `POST /api/jobs` with the config, manifest and photos
2. **Process** rows one at a time via `POST /api/jobs/{session_id}/rows/{row_index}`
3. The main photo is saved to the album; comment photos are attached to it in
   groups as wall photos
4. **Finalize** via `POST /api/jobs/{session_id}/finalize` to get the summary

Row-level failures never fail the request: they are reported in the row
result with `success = false`.
"#
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Jobs", description = "Batch job lifecycle"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::jobs::create_job_handler,
        crate::handlers::jobs::process_row_handler,
        crate::handlers::jobs::upload_batch_handler,
        crate::handlers::jobs::progress_handler,
        crate::handlers::jobs::finalize_handler,
        crate::handlers::jobs::cancel_handler,
        crate::handlers::jobs::debug_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            InitResponse,
            ProgressResponse,
            RowResponse,
            SummaryResponse,
            DebugResponse,
            CancelResponse,
            UploadBatchRequest,
            Base64File,
        )
    )
)]
pub struct ApiDoc;

/// GET /api-docs/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
