//! Batch job handlers
//!
//! One handler per job lifecycle operation. Caller errors surface as 4xx via
//! [`ApiError`]; row-level failures are reported in a 200 body with
//! `success = false`.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use vkbatch_core::{FileEntry, InitReport, JobSummary, Progress, RowOutcome, RowResult, SessionDebug};

use crate::error::ApiError;
use crate::multipart::MultipartFields;
use crate::state::AppState;
use crate::validation::{normalize_file_name, validate_file_size};

/// Response for a newly created job
#[derive(Serialize, ToSchema)]
pub struct InitResponse {
    /// Session identifier for all later calls
    #[schema(example = "3f2c6a0e9b1d4e7a8c5b2d1f0e9a8b7c")]
    pub session_id: String,
    /// Number of manifest rows
    #[schema(example = 12)]
    pub row_count: usize,
    /// Number of distinct uploaded files
    pub file_count: usize,
    /// Manifest names with no uploaded file
    pub missing_files: Vec<String>,
    /// Uploaded files the manifest never mentions
    pub extra_files: Vec<String>,
    /// Whether every referenced file was uploaded
    pub complete: bool,
    /// Encoding the manifest was decoded with
    #[schema(example = "UTF-8")]
    pub encoding: String,
    #[schema(example = "|")]
    pub delimiter: String,
    pub header_skipped: bool,
}

impl From<InitReport> for InitResponse {
    fn from(report: InitReport) -> Self {
        Self {
            complete: report.file_diff.is_complete(),
            session_id: report.session_id,
            row_count: report.row_count,
            file_count: report.file_count,
            missing_files: report.file_diff.missing,
            extra_files: report.file_diff.extra,
            encoding: report.encoding,
            delimiter: report.delimiter.to_string(),
            header_skipped: report.header_skipped,
        }
    }
}

/// Job progress
#[derive(Serialize, ToSchema)]
pub struct ProgressResponse {
    /// One past the last processed row index
    pub current: usize,
    pub total: usize,
    /// Number of results recorded, reprocessed rows included
    pub processed: usize,
    /// `current / total` as a percentage
    #[schema(example = 50.0)]
    pub percent: f64,
}

impl From<Progress> for ProgressResponse {
    fn from(progress: Progress) -> Self {
        let percent = if progress.total == 0 {
            0.0
        } else {
            (progress.current as f64 / progress.total as f64 * 100.0).min(100.0)
        };
        Self {
            current: progress.current,
            total: progress.total,
            processed: progress.processed,
            percent,
        }
    }
}

/// Result of processing one row
#[derive(Serialize, ToSchema)]
pub struct RowResponse {
    /// Per-row report: main photo outcome, comment groups, skipped photos and errors
    #[schema(value_type = Object)]
    pub result: RowResult,
    pub progress: ProgressResponse,
}

impl From<RowOutcome> for RowResponse {
    fn from(outcome: RowOutcome) -> Self {
        Self {
            result: outcome.result,
            progress: outcome.progress.into(),
        }
    }
}

/// Final job report
#[derive(Serialize, ToSchema)]
pub struct SummaryResponse {
    /// Totals, failed rows and elapsed time
    #[schema(value_type = Object)]
    pub summary: JobSummary,
}

/// Session snapshot for troubleshooting
#[derive(Serialize, ToSchema)]
pub struct DebugResponse {
    #[schema(value_type = Object)]
    pub debug: SessionDebug,
}

#[derive(Serialize, ToSchema)]
pub struct CancelResponse {
    pub session_id: String,
    pub cancelled: bool,
}

/// A base64-encoded file in an upload batch
#[derive(Deserialize, ToSchema)]
pub struct Base64File {
    #[schema(example = "photo.jpg")]
    pub filename: Option<String>,
    /// Base64 payload, optionally prefixed with `data:<mime>;base64,`
    pub data: Option<String>,
}

/// JSON row request carrying its files inline
#[derive(Deserialize, ToSchema)]
pub struct UploadBatchRequest {
    pub session_id: String,
    pub row_index: usize,
    #[serde(default)]
    pub files: Vec<Base64File>,
}

/// Create a batch job
///
/// Accepts multipart/form-data with:
/// - **config** (required): `KEY=VALUE` lines with `ACCESS_TOKEN` and `ALBUM_ID`
/// - **manifest** (required): delimited rows `main_photo|description|comment_photos`
/// - **files** (repeatable): the photos the manifest refers to
///
/// `config` and `manifest` may be sent as plain fields or as file parts.
#[utoipa::path(
    post,
    path = "/api/jobs",
    tag = "Jobs",
    request_body(
        content_type = "multipart/form-data",
        description = "Job config, manifest and photos"
    ),
    responses(
        (status = 201, description = "Job created", body = InitResponse),
        (status = 400, description = "Malformed config or manifest, or invalid upload"),
        (status = 413, description = "Request body too large")
    )
)]
pub async fn create_job_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<InitResponse>), ApiError> {
    let form = MultipartFields::parse(&mut multipart, state.max_file_size).await?;

    form.require_bytes("config")?;
    let manifest = form.require_bytes("manifest")?.to_vec();
    let config = form
        .get_text("config")
        .map(|text| text.into_owned())
        .unwrap_or_default();

    let report = state.jobs.init(&config, &manifest, form.into_files())?;
    Ok((StatusCode::CREATED, Json(report.into())))
}

/// Process one manifest row
///
/// Optional **files** parts overlay the job's uploaded photos for this row only.
#[utoipa::path(
    post,
    path = "/api/jobs/{session_id}/rows/{row_index}",
    tag = "Jobs",
    params(
        ("session_id" = String, Path, description = "Job session id"),
        ("row_index" = usize, Path, description = "Zero-based manifest row")
    ),
    request_body(
        content_type = "multipart/form-data",
        description = "Optional photos for this row"
    ),
    responses(
        (status = 200, description = "Row processed; check `result.success`", body = RowResponse),
        (status = 400, description = "Row index out of range"),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Row already processed and reprocessing is disabled")
    )
)]
pub async fn process_row_handler(
    State(state): State<AppState>,
    Path((session_id, row_index)): Path<(String, usize)>,
    mut multipart: Multipart,
) -> Result<Json<RowResponse>, ApiError> {
    let form = MultipartFields::parse(&mut multipart, state.max_file_size).await?;
    let outcome = state
        .jobs
        .process_row(&session_id, row_index, form.into_files())
        .await?;
    Ok(Json(outcome.into()))
}

/// Process one row with base64-encoded files
///
/// Entries without a name or data, or whose payload does not decode, are
/// skipped with a warning.
#[utoipa::path(
    post,
    path = "/api/upload-batch",
    tag = "Jobs",
    request_body = UploadBatchRequest,
    responses(
        (status = 200, description = "Row processed; check `result.success`", body = RowResponse),
        (status = 400, description = "Invalid JSON or row index out of range"),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Row already processed and reprocessing is disabled")
    )
)]
pub async fn upload_batch_handler(
    State(state): State<AppState>,
    Json(request): Json<UploadBatchRequest>,
) -> Result<Json<RowResponse>, ApiError> {
    let mut files = Vec::with_capacity(request.files.len());
    for (position, file) in request.files.into_iter().enumerate() {
        match decode_base64_file(file) {
            Ok(entry) => {
                validate_file_size(entry.size(), state.max_file_size)?;
                files.push(entry);
            }
            Err(reason) => {
                tracing::warn!(
                    session_id = %request.session_id,
                    position,
                    reason,
                    "Skipping batch file"
                );
            }
        }
    }

    let outcome = state
        .jobs
        .process_row(&request.session_id, request.row_index, files)
        .await?;
    Ok(Json(outcome.into()))
}

/// Get job progress
#[utoipa::path(
    get,
    path = "/api/jobs/{session_id}/progress",
    tag = "Jobs",
    params(("session_id" = String, Path, description = "Job session id")),
    responses(
        (status = 200, description = "Current progress", body = ProgressResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn progress_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    Ok(Json(state.jobs.progress(&session_id)?.into()))
}

/// Summarize the job
///
/// The session is kept; finalize may be called again.
#[utoipa::path(
    post,
    path = "/api/jobs/{session_id}/finalize",
    tag = "Jobs",
    params(("session_id" = String, Path, description = "Job session id")),
    responses(
        (status = 200, description = "Job summary", body = SummaryResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn finalize_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let summary = state.jobs.finalize(&session_id)?;
    Ok(Json(SummaryResponse { summary }))
}

/// Cancel the job and drop its session
#[utoipa::path(
    delete,
    path = "/api/jobs/{session_id}",
    tag = "Jobs",
    params(("session_id" = String, Path, description = "Job session id")),
    responses(
        (status = 200, description = "Session removed", body = CancelResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn cancel_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    state.jobs.cancel(&session_id)?;
    Ok(Json(CancelResponse {
        session_id,
        cancelled: true,
    }))
}

/// Inspect a session without exposing config values
#[utoipa::path(
    get,
    path = "/api/jobs/{session_id}/debug",
    tag = "Jobs",
    params(("session_id" = String, Path, description = "Job session id")),
    responses(
        (status = 200, description = "Session snapshot", body = DebugResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn debug_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DebugResponse>, ApiError> {
    let debug = state.jobs.debug_view(&session_id)?;
    Ok(Json(DebugResponse { debug }))
}

fn decode_base64_file(file: Base64File) -> Result<FileEntry, &'static str> {
    let name = file
        .filename
        .as_deref()
        .and_then(normalize_file_name)
        .ok_or("missing filename")?;
    let data = file
        .data
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or("missing data")?;

    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, p)| p).ok_or("malformed data URL")?,
        None => data,
    };

    let bytes = BASE64.decode(payload).map_err(|_| "invalid base64")?;
    Ok(FileEntry::new(name, bytes))
}
