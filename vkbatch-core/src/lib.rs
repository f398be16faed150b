//! VK Batch Core - session-scoped batch uploads to VK photo albums
//!
//! This crate turns a manifest of photos into VK album uploads, each with an
//! optional thread of comments carrying further photos. It is transport
//! agnostic: the HTTP server drives it through [`JobManager`].
//!
//! # Features
//!
//! - Manifest parsing with `sep=` directives, header detection and
//!   windows-1251 fallback
//! - Case-insensitive file resolution with per-row overrides
//! - Upload URL caching with a TTL
//! - Bounded concurrent uploads per row
//! - Comment photos grouped into threaded comments under the main photo
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkbatch_core::{FileEntry, JobManager, MemorySessionStore, MockPhotoHost, OrchestratorSettings};
//!
//! # async fn example() -> vkbatch_core::Result<()> {
//! let jobs = JobManager::new(
//!     Arc::new(MemorySessionStore::new()),
//!     Arc::new(MockPhotoHost::new()),
//!     OrchestratorSettings::default(),
//! );
//!
//! let files = vec![
//!     FileEntry::new("a.jpg", b"...".to_vec()),
//!     FileEntry::new("b.jpg", b"...".to_vec()),
//! ];
//! let init = jobs.init("ACCESS_TOKEN=token\nALBUM_ID=1", b"a.jpg|Sunset|b.jpg", files)?;
//!
//! let outcome = jobs.process_row(&init.session_id, 0, Vec::new()).await?;
//! assert!(outcome.result.success);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod files;
pub mod groups;
pub mod host;
pub mod job;
pub mod manifest;
pub mod orchestrator;
pub mod report;
pub mod session;

// Re-export main types for convenience
pub use config::{JobConfig, DEFAULT_API_VERSION};
pub use endpoint::{EndpointCache, DEFAULT_ENDPOINT_TTL};
pub use error::{Result, VkBatchError};
pub use files::{FileDiff, FileEntry, FileTable};
pub use groups::{split_into_groups, DEFAULT_COMMENT_GROUP_SIZE};
pub use host::{
    EndpointKind, HostCall, MockPhotoHost, PhotoHost, SavedPhoto, UploadToken, VkClient,
    VkClientConfig, DEFAULT_API_URL,
};
pub use job::{InitReport, JobManager, RowOutcome, RowPreview, SessionDebug};
pub use manifest::{decode_text, Manifest, ManifestRow};
pub use orchestrator::{
    Orchestrator, OrchestratorSettings, RowJob, DEFAULT_SAVE_DELAY, DEFAULT_UPLOAD_WORKERS,
};
pub use report::{
    CommentGroupResult, FailedRow, FailureStage, JobSummary, MainPhotoOutcome, NamedPhoto,
    PhotoFailure, Progress, RowResult, UploadStats,
};
pub use session::{JobState, MemorySessionStore, SessionStore};
