//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod health;
pub mod jobs;

pub use crate::state::AppState;
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use jobs::{
    cancel_handler, create_job_handler, debug_handler, finalize_handler, process_row_handler,
    progress_handler, upload_batch_handler, Base64File, CancelResponse, DebugResponse,
    InitResponse, ProgressResponse, RowResponse, SummaryResponse, UploadBatchRequest,
};
