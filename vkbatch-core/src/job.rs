//! Job lifecycle: init, per-row processing, progress, finalize and cancel.
//!
//! [`JobManager`] is the transport-agnostic surface the HTTP layer calls. It
//! owns no state of its own; sessions live in the injected [`SessionStore`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::JobConfig;
use crate::endpoint::EndpointCache;
use crate::error::{Result, VkBatchError};
use crate::files::{FileDiff, FileEntry, FileTable};
use crate::host::{EndpointKind, PhotoHost};
use crate::manifest::Manifest;
use crate::orchestrator::{Orchestrator, OrchestratorSettings, RowJob};
use crate::report::{JobSummary, Progress, RowResult};
use crate::session::{JobState, SessionStore};

/// Descriptions in the debug view are cut to this many characters.
const DEBUG_DESCRIPTION_CHARS: usize = 30;

/// Rows shown in the debug view.
const DEBUG_PREVIEW_ROWS: usize = 3;

/// What `init` reports back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub session_id: String,
    pub row_count: usize,
    pub file_diff: FileDiff,
    pub file_count: usize,
    /// Encoding the manifest was decoded with
    pub encoding: String,
    pub delimiter: char,
    pub header_skipped: bool,
}

/// A processed row together with the job's progress after recording it.
#[derive(Debug, Clone, Serialize)]
pub struct RowOutcome {
    pub result: RowResult,
    pub progress: Progress,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowPreview {
    pub main_photo: String,
    pub description: String,
    pub comment_photos: usize,
}

/// Snapshot of a session for troubleshooting. Never includes secrets.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDebug {
    pub session_id: String,
    pub total_rows: usize,
    pub processed_rows: usize,
    pub cursor: usize,
    pub first_rows: Vec<RowPreview>,
    pub cached_endpoints: Vec<EndpointKind>,
    pub file_count: usize,
    pub total_bytes: usize,
    pub case_sensitive: bool,
    /// Names of unrecognised config keys
    pub extra_config_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Drives batch jobs against a session store and a photo host.
#[derive(Clone)]
pub struct JobManager {
    store: Arc<dyn SessionStore>,
    orchestrator: Orchestrator,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        host: Arc<dyn PhotoHost>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            orchestrator: Orchestrator::new(host, settings),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        self.orchestrator.settings()
    }

    /// Parse config and manifest, index the files and open a session.
    pub fn init<I>(&self, config_text: &str, manifest_bytes: &[u8], files: I) -> Result<InitReport>
    where
        I: IntoIterator<Item = FileEntry>,
    {
        let config = JobConfig::parse(config_text)?;
        let manifest = Manifest::parse_bytes(manifest_bytes)?;

        let settings = self.settings();
        let mut table = FileTable::new(settings.case_sensitive_resolution);
        for file in files {
            table.insert(file);
        }

        let file_diff = table.diff(&manifest.required_names());
        if !file_diff.missing.is_empty() {
            warn!(missing = file_diff.missing.len(), "Manifest references files that were not uploaded");
        }

        let row_count = manifest.len();
        let file_count = table.len();
        let encoding = manifest.encoding.to_string();
        let delimiter = manifest.delimiter;
        let header_skipped = manifest.header_skipped;

        let state = JobState::new(
            config,
            manifest.rows,
            table,
            EndpointCache::new(settings.endpoint_ttl),
        );
        let session_id = self.store.create(state)?;

        info!(
            session_id = %session_id,
            rows = row_count,
            files = file_count,
            encoding = %encoding,
            "Job initialized"
        );

        Ok(InitReport {
            session_id,
            row_count,
            file_diff,
            file_count,
            encoding,
            delimiter,
            header_skipped,
        })
    }

    /// Process one manifest row.
    ///
    /// `row_files` overlay the session's files for this row only. Only caller
    /// errors are returned as `Err`; every remote failure lands in the result.
    /// Once validated, the row runs on its own task, so dropping the returned
    /// future does not interrupt it.
    pub async fn process_row<I>(
        &self,
        session_id: &str,
        row_index: usize,
        row_files: I,
    ) -> Result<RowOutcome>
    where
        I: IntoIterator<Item = FileEntry>,
    {
        let state = self.load(session_id)?;

        let total = state.total_rows();
        let row = state
            .manifest
            .get(row_index)
            .cloned()
            .ok_or(VkBatchError::RowOutOfRange {
                index: row_index,
                total,
            })?;

        if !self.settings().allow_reprocess && state.has_succeeded(row_index) {
            return Err(VkBatchError::RowAlreadyProcessed(row_index));
        }

        let mut overrides = FileTable::new(state.files.is_case_sensitive());
        for file in row_files {
            overrides.insert(file);
        }
        let files = if overrides.is_empty() {
            state.files
        } else {
            state.files.overlay(&overrides)
        };

        let job = RowJob {
            row_index,
            row: row.clone(),
            config: state.config,
            files,
            endpoints: state.endpoints,
        };
        let orchestrator = self.orchestrator.clone();
        let store = Arc::clone(&self.store);
        let id = session_id.to_string();

        // Runs detached: if the caller stops waiting, the row still finishes
        // and its result is recorded.
        let handle = tokio::spawn(async move {
            let result = orchestrator.process_row(job).await;
            let recorded = store.record_result(&id, result.clone());
            (result, recorded)
        });

        let (result, recorded) = match handle.await {
            Ok(done) => done,
            Err(e) => {
                error!(session_id = %session_id, row = row_index, error = %e, "Row task aborted");
                let result =
                    RowResult::aborted(row_index, &row, format!("row processing aborted: {}", e));
                let recorded = self.store.record_result(session_id, result.clone());
                (result, recorded)
            }
        };

        let progress = match recorded? {
            Some(progress) => progress,
            None => {
                warn!(session_id = %session_id, row = row_index, "Session removed while row was processing");
                Progress {
                    current: row_index + 1,
                    total,
                    processed: 0,
                }
            }
        };

        Ok(RowOutcome { result, progress })
    }

    pub fn progress(&self, session_id: &str) -> Result<Progress> {
        Ok(self.load(session_id)?.progress())
    }

    /// Summarize the job. The session is kept so the summary can be fetched again.
    pub fn finalize(&self, session_id: &str) -> Result<JobSummary> {
        let state = self.load(session_id)?;
        let summary = JobSummary::from_results(
            session_id,
            state.total_rows(),
            &state.results,
            state.created_at,
        );
        info!(
            session_id = %session_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            comments = summary.comments_created,
            "Job finalized"
        );
        Ok(summary)
    }

    /// Drop the session. Rows still in flight finish but their results are discarded.
    pub fn cancel(&self, session_id: &str) -> Result<()> {
        if self.store.delete(session_id)? {
            info!(session_id = %session_id, "Job cancelled");
            Ok(())
        } else {
            Err(VkBatchError::SessionNotFound(session_id.to_string()))
        }
    }

    pub fn debug_view(&self, session_id: &str) -> Result<SessionDebug> {
        let state = self.load(session_id)?;
        let first_rows = state
            .manifest
            .iter()
            .take(DEBUG_PREVIEW_ROWS)
            .map(|row| RowPreview {
                main_photo: row.main_photo.clone(),
                description: row.description.chars().take(DEBUG_DESCRIPTION_CHARS).collect(),
                comment_photos: row.comment_photos.len(),
            })
            .collect();

        Ok(SessionDebug {
            session_id: state.session_id.clone(),
            total_rows: state.total_rows(),
            processed_rows: state.results.len(),
            cursor: state.cursor,
            first_rows,
            cached_endpoints: state.endpoints.cached_kinds(),
            file_count: state.files.len(),
            total_bytes: state.files.total_bytes(),
            case_sensitive: state.files.is_case_sensitive(),
            extra_config_keys: state.config.extra.keys().cloned().collect(),
            created_at: state.created_at,
        })
    }

    /// Remove sessions older than `max_age`.
    pub fn sweep(&self, max_age: Duration) -> Result<usize> {
        self.store.sweep(max_age)
    }

    pub fn active_sessions(&self) -> Result<usize> {
        self.store.len()
    }

    fn load(&self, session_id: &str) -> Result<JobState> {
        self.store
            .get(session_id)?
            .ok_or_else(|| VkBatchError::SessionNotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostCall, MockPhotoHost, SavedPhoto, UploadToken};
    use crate::session::MemorySessionStore;
    use async_trait::async_trait;

    const CONFIG: &str = "ACCESS_TOKEN=secret\nALBUM_ID=10\nTHEME=dark";

    fn manager(settings: OrchestratorSettings) -> JobManager {
        JobManager::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(MockPhotoHost::new()),
            OrchestratorSettings {
                save_delay: Duration::ZERO,
                ..settings
            },
        )
    }

    fn files(names: &[&str]) -> Vec<FileEntry> {
        names
            .iter()
            .map(|n| FileEntry::new(*n, n.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_init_reports_file_diff() {
        let jobs = manager(OrchestratorSettings::default());
        let report = jobs
            .init(
                CONFIG,
                b"a.jpg|A|b.jpg\nc.jpg|C",
                files(&["A.JPG", "b.jpg", "unused.png"]),
            )
            .unwrap();

        assert_eq!(report.row_count, 2);
        assert_eq!(report.file_diff.missing, vec!["c.jpg"]);
        assert_eq!(report.file_diff.extra, vec!["unused.png"]);
        assert_eq!(report.file_count, 3);
        assert_eq!(jobs.active_sessions().unwrap(), 1);
    }

    #[test]
    fn test_init_rejects_bad_config() {
        let jobs = manager(OrchestratorSettings::default());
        let err = jobs.init("ALBUM_ID=1", b"a.jpg", files(&[])).unwrap_err();
        assert!(matches!(err, VkBatchError::InvalidConfig(_)));
        assert_eq!(jobs.active_sessions().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_row_is_caller_error() {
        let jobs = manager(OrchestratorSettings::default());
        let id = jobs.init(CONFIG, b"a.jpg", files(&["a.jpg"])).unwrap().session_id;

        let err = jobs.process_row(&id, 5, Vec::new()).await.unwrap_err();
        assert!(matches!(err, VkBatchError::RowOutOfRange { index: 5, total: 1 }));
        assert_eq!(jobs.progress(&id).unwrap().processed, 0);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let jobs = manager(OrchestratorSettings::default());
        let err = jobs.process_row("missing", 0, Vec::new()).await.unwrap_err();
        assert!(matches!(err, VkBatchError::SessionNotFound(_)));
        assert!(jobs.cancel("missing").is_err());
    }

    #[tokio::test]
    async fn test_row_files_overlay_session_files() {
        let jobs = manager(OrchestratorSettings::default());
        let id = jobs.init(CONFIG, b"late.jpg|L", files(&[])).unwrap().session_id;

        let outcome = jobs
            .process_row(&id, 0, files(&["late.jpg"]))
            .await
            .unwrap();
        assert!(outcome.result.success);
        assert_eq!(outcome.progress.current, 1);
        assert_eq!(outcome.progress.total, 1);
    }

    #[tokio::test]
    async fn test_reprocess_guard() {
        let jobs = manager(OrchestratorSettings {
            allow_reprocess: false,
            ..Default::default()
        });
        let id = jobs.init(CONFIG, b"a.jpg", files(&["a.jpg"])).unwrap().session_id;

        jobs.process_row(&id, 0, Vec::new()).await.unwrap();
        let err = jobs.process_row(&id, 0, Vec::new()).await.unwrap_err();
        assert!(matches!(err, VkBatchError::RowAlreadyProcessed(0)));
    }

    #[tokio::test]
    async fn test_failed_row_may_be_retried_with_guard() {
        let jobs = manager(OrchestratorSettings {
            allow_reprocess: false,
            ..Default::default()
        });
        let id = jobs.init(CONFIG, b"a.jpg", files(&[])).unwrap().session_id;

        let first = jobs.process_row(&id, 0, Vec::new()).await.unwrap();
        assert!(!first.result.success);
        let second = jobs.process_row(&id, 0, files(&["a.jpg"])).await.unwrap();
        assert!(second.result.success);
    }

    #[tokio::test]
    async fn test_finalize_and_cancel() {
        let jobs = manager(OrchestratorSettings::default());
        let id = jobs
            .init(CONFIG, b"a.jpg|A|b.jpg\nmissing.jpg", files(&["a.jpg", "b.jpg"]))
            .unwrap()
            .session_id;

        jobs.process_row(&id, 0, Vec::new()).await.unwrap();
        jobs.process_row(&id, 1, Vec::new()).await.unwrap();

        let summary = jobs.finalize(&id).unwrap();
        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.photos_saved, 2);
        assert_eq!(summary.comments_created, 1);
        assert_eq!(summary.failed_rows[0].main_photo, "missing.jpg");

        jobs.cancel(&id).unwrap();
        assert!(matches!(
            jobs.progress(&id),
            Err(VkBatchError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_debug_view_hides_config_values() {
        let jobs = manager(OrchestratorSettings::default());
        let long = "x".repeat(40);
        let manifest = format!("a.jpg|{long}|b.jpg;c.jpg");
        let id = jobs
            .init(CONFIG, manifest.as_bytes(), files(&["a.jpg", "b.jpg", "c.jpg"]))
            .unwrap()
            .session_id;
        jobs.process_row(&id, 0, Vec::new()).await.unwrap();

        let view = jobs.debug_view(&id).unwrap();
        assert_eq!(view.first_rows[0].description.chars().count(), 30);
        assert_eq!(view.first_rows[0].comment_photos, 2);
        assert_eq!(
            view.cached_endpoints,
            vec![EndpointKind::Album, EndpointKind::Wall]
        );
        assert_eq!(view.extra_config_keys, vec!["THEME"]);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("secret"));
    }

    /// Holds every persist call for `delay` before delegating.
    struct SlowPersistHost {
        inner: MockPhotoHost,
        delay: Duration,
    }

    #[async_trait]
    impl PhotoHost for SlowPersistHost {
        async fn get_upload_endpoint(&self, kind: EndpointKind, job: &JobConfig) -> Result<String> {
            self.inner.get_upload_endpoint(kind, job).await
        }

        async fn upload_bytes(
            &self,
            kind: EndpointKind,
            endpoint: &str,
            file: &FileEntry,
        ) -> Result<UploadToken> {
            self.inner.upload_bytes(kind, endpoint, file).await
        }

        async fn persist_photo(
            &self,
            token: &UploadToken,
            job: &JobConfig,
            caption: Option<&str>,
        ) -> Result<SavedPhoto> {
            tokio::time::sleep(self.delay).await;
            self.inner.persist_photo(token, job, caption).await
        }

        async fn create_comment(
            &self,
            owner_id: i64,
            photo_id: i64,
            attachments: &[String],
            job: &JobConfig,
        ) -> Result<i64> {
            self.inner
                .create_comment(owner_id, photo_id, attachments, job)
                .await
        }
    }

    #[tokio::test]
    async fn test_row_completes_after_caller_gives_up() {
        let host = Arc::new(SlowPersistHost {
            inner: MockPhotoHost::new(),
            delay: Duration::from_millis(50),
        });
        let jobs = JobManager::new(
            Arc::new(MemorySessionStore::new()),
            host.clone(),
            OrchestratorSettings {
                save_delay: Duration::ZERO,
                ..Default::default()
            },
        );
        let id = jobs
            .init(CONFIG, b"a.jpg|A|b.jpg", files(&["a.jpg", "b.jpg"]))
            .unwrap()
            .session_id;

        let waited = tokio::time::timeout(
            Duration::from_millis(10),
            jobs.process_row(&id, 0, Vec::new()),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(jobs.progress(&id).unwrap().processed, 0);

        for _ in 0..100 {
            if jobs.progress(&id).unwrap().processed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let summary = jobs.finalize(&id).unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.comments_created, 1);
        assert!(matches!(
            host.inner.comments().as_slice(),
            [HostCall::Comment { .. }]
        ));
    }
}
