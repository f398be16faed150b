//! Row processing pipeline.
//!
//! One call to [`Orchestrator::process_row`] takes a manifest row from file
//! resolution to threaded comments:
//!
//! 1. resolve the main photo (absent is fatal for the row)
//! 2. resolve comment photos (absent ones are skipped)
//! 3. obtain album and wall upload URLs (failure is fatal for the row)
//! 4. upload every resolved file on a bounded task pool
//! 5. save the main photo to the album with the row description as caption
//! 6. save comment photos to the wall, one at a time
//! 7. attach saved comment photos to comments under the main photo in groups
//!
//! Row-level failures never surface as `Err`; they are collected into the
//! returned [`RowResult`]. Nothing is retried here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::JobConfig;
use crate::endpoint::{EndpointCache, DEFAULT_ENDPOINT_TTL};
use crate::error::{Result, VkBatchError};
use crate::files::{FileEntry, FileTable};
use crate::groups::{split_into_groups, DEFAULT_COMMENT_GROUP_SIZE};
use crate::host::{EndpointKind, PhotoHost, SavedPhoto, UploadToken};
use crate::manifest::ManifestRow;
use crate::report::{
    description_preview, CommentGroupResult, FailureStage, MainPhotoOutcome, NamedPhoto,
    PhotoFailure, RowResult, UploadStats,
};

/// Default upper bound on concurrent uploads per row.
pub const DEFAULT_UPLOAD_WORKERS: usize = 10;

/// Default pause between consecutive wall-photo saves.
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(300);

/// Tunables for row processing.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Effective pool size is `min(max_upload_workers, task count)`
    pub max_upload_workers: usize,
    /// Photos per comment; 0 is treated as 1
    pub comment_group_size: usize,
    /// Pause between wall-photo saves to stay under VK rate limits
    pub save_delay: Duration,
    /// Lifetime of cached upload URLs; `None` never expires
    pub endpoint_ttl: Option<Duration>,
    pub case_sensitive_resolution: bool,
    /// Allow a row with a recorded successful result to be processed again
    pub allow_reprocess: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_upload_workers: DEFAULT_UPLOAD_WORKERS,
            comment_group_size: DEFAULT_COMMENT_GROUP_SIZE,
            save_delay: DEFAULT_SAVE_DELAY,
            endpoint_ttl: Some(DEFAULT_ENDPOINT_TTL),
            case_sensitive_resolution: false,
            allow_reprocess: true,
        }
    }
}

/// Everything needed to process one row, detached from the session store.
#[derive(Debug, Clone)]
pub struct RowJob {
    pub row_index: usize,
    pub row: ManifestRow,
    pub config: JobConfig,
    pub files: FileTable,
    pub endpoints: Arc<EndpointCache>,
}

/// A resolved comment photo waiting for upload.
struct PendingPhoto {
    name: String,
    file: FileEntry,
}

struct UploadTask {
    slot: usize,
    kind: EndpointKind,
    endpoint: String,
    file: FileEntry,
}

/// Accumulates the pieces of a [`RowResult`] as the pipeline advances.
struct RowReport {
    row_index: usize,
    main_photo: String,
    description: String,
    main: Option<MainPhotoOutcome>,
    comment_groups: Vec<CommentGroupResult>,
    skipped: Vec<PhotoFailure>,
    errors: Vec<String>,
    stats: UploadStats,
}

impl RowReport {
    fn new(row_index: usize, row: &ManifestRow) -> Self {
        Self {
            row_index,
            main_photo: row.main_photo.clone(),
            description: description_preview(&row.description),
            main: None,
            comment_groups: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            stats: UploadStats::default(),
        }
    }

    fn fail_main(&mut self, reason: String) {
        warn!(row = self.row_index, reason = %reason, "Main photo failed");
        self.errors.push(reason.clone());
        self.main = Some(MainPhotoOutcome::Failed { reason });
    }

    fn skip(&mut self, name: &str, stage: FailureStage, reason: String) {
        warn!(row = self.row_index, file = %name, ?stage, reason = %reason, "Comment photo skipped");
        self.skipped.push(PhotoFailure {
            name: name.to_string(),
            stage,
            reason,
        });
    }

    fn finish(self) -> RowResult {
        let main_photo_outcome = self.main.unwrap_or_else(|| MainPhotoOutcome::Failed {
            reason: "main photo was not processed".to_string(),
        });
        let success = self.errors.is_empty() && main_photo_outcome.saved().is_some();
        RowResult {
            row_index: self.row_index,
            main_photo: self.main_photo,
            description: self.description,
            success,
            main_photo_outcome,
            comment_groups: self.comment_groups,
            skipped_photos: self.skipped,
            errors: self.errors,
            upload_stats: self.stats,
            processed_at: Utc::now(),
        }
    }
}

/// Runs rows against a [`PhotoHost`].
#[derive(Clone)]
pub struct Orchestrator {
    host: Arc<dyn PhotoHost>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(host: Arc<dyn PhotoHost>, settings: OrchestratorSettings) -> Self {
        Self { host, settings }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Process one row to completion and describe what happened.
    #[instrument(skip_all, fields(row = job.row_index, main_photo = %job.row.main_photo))]
    pub async fn process_row(&self, job: RowJob) -> RowResult {
        let RowJob {
            row_index,
            row,
            config,
            files,
            endpoints,
        } = job;
        let mut report = RowReport::new(row_index, &row);

        let Some(main_file) = files.resolve(&row.main_photo).cloned() else {
            report.fail_main(format!("main photo not found: {}", row.main_photo));
            return report.finish();
        };

        let mut comments = Vec::with_capacity(row.comment_photos.len());
        for name in &row.comment_photos {
            match files.resolve(name) {
                Some(file) => comments.push(PendingPhoto {
                    name: name.clone(),
                    file: file.clone(),
                }),
                None => report.skip(
                    name,
                    FailureStage::Resolve,
                    format!("comment photo not found: {name}"),
                ),
            }
        }

        let album_url = match endpoints
            .get_upload_endpoint(self.host.as_ref(), EndpointKind::Album, &config)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                report.fail_main(e.to_string());
                return report.finish();
            }
        };
        let wall_url = if comments.is_empty() {
            None
        } else {
            match endpoints
                .get_upload_endpoint(self.host.as_ref(), EndpointKind::Wall, &config)
                .await
            {
                Ok(url) => Some(url),
                Err(e) => {
                    report.fail_main(e.to_string());
                    return report.finish();
                }
            }
        };

        let mut tasks = Vec::with_capacity(comments.len() + 1);
        tasks.push(UploadTask {
            slot: 0,
            kind: EndpointKind::Album,
            endpoint: album_url,
            file: main_file,
        });
        if let Some(wall_url) = wall_url {
            for (i, pending) in comments.iter().enumerate() {
                tasks.push(UploadTask {
                    slot: i + 1,
                    kind: EndpointKind::Wall,
                    endpoint: wall_url.clone(),
                    file: pending.file.clone(),
                });
            }
        }

        let mut uploads = self.upload_all(tasks).await.into_iter();
        report.stats.total_files = uploads.len();

        let main_upload = uploads.next().unwrap_or_else(|| {
            Err(VkBatchError::UploadFailed(format!(
                "{}: upload task did not complete",
                row.main_photo
            )))
        });
        let mut comment_tokens = Vec::with_capacity(comments.len());
        let mut wall_failed = false;
        for (pending, upload) in comments.iter().zip(uploads) {
            match upload {
                Ok(token) => comment_tokens.push((pending.name.as_str(), token)),
                Err(e) => {
                    wall_failed = true;
                    report.skip(&pending.name, FailureStage::Upload, e.to_string());
                }
            }
        }

        // A rejected upload may mean the URL expired; later rows fetch a new one
        if main_upload.is_err() {
            endpoints.invalidate(EndpointKind::Album, &config);
        }
        if wall_failed {
            endpoints.invalidate(EndpointKind::Wall, &config);
        }
        report.stats.uploaded = comment_tokens.len() + usize::from(main_upload.is_ok());
        report.stats.failed = report.stats.total_files - report.stats.uploaded;

        let main_token = match main_upload {
            Ok(token) => token,
            Err(e) => {
                report.fail_main(format!("main photo upload failed: {e}"));
                self.skip_unanchored(&mut report, &comment_tokens);
                return report.finish();
            }
        };

        let caption = Some(row.description.as_str()).filter(|d| !d.is_empty());
        let main = match self.host.persist_photo(&main_token, &config, caption).await {
            Ok(photo) => photo,
            Err(e) => {
                report.fail_main(format!("main photo persist failed: {e}"));
                self.skip_unanchored(&mut report, &comment_tokens);
                return report.finish();
            }
        };
        debug!(owner_id = main.owner_id, photo_id = main.id, "Main photo saved");
        report.main = Some(MainPhotoOutcome::Saved { photo: main });

        let persisted = self
            .persist_comment_photos(&mut report, &config, comment_tokens)
            .await;
        self.create_comments(&mut report, &config, main, persisted)
            .await;

        let result = report.finish();
        info!(
            success = result.success,
            comments = result.comments_created(),
            skipped = result.skipped_photos.len(),
            "Row processed"
        );
        result
    }

    /// Upload every task, at most `max_upload_workers` at a time.
    ///
    /// Results are returned in slot order; a failing upload never cancels its siblings.
    async fn upload_all(&self, tasks: Vec<UploadTask>) -> Vec<Result<UploadToken>> {
        let workers = self.settings.max_upload_workers.clamp(1, tasks.len().max(1));
        let semaphore = Arc::new(Semaphore::new(workers));
        debug!(tasks = tasks.len(), workers, "Starting uploads");

        let mut outcomes: Vec<Result<UploadToken>> = tasks
            .iter()
            .map(|t| {
                Err(VkBatchError::UploadFailed(format!(
                    "{}: upload task did not complete",
                    t.file.original_name
                )))
            })
            .collect();

        let mut set = JoinSet::new();
        for task in tasks {
            let host = Arc::clone(&self.host);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = host
                    .upload_bytes(task.kind, &task.endpoint, &task.file)
                    .await;
                (task.slot, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, result)) => {
                    if let Some(outcome) = outcomes.get_mut(slot) {
                        *outcome = result;
                    }
                }
                Err(e) => warn!(error = %e, "Upload task aborted"),
            }
        }
        outcomes
    }

    /// Save uploaded comment photos to the wall one by one, pausing between calls.
    async fn persist_comment_photos(
        &self,
        report: &mut RowReport,
        config: &JobConfig,
        tokens: Vec<(&str, UploadToken)>,
    ) -> Vec<NamedPhoto> {
        let mut persisted = Vec::with_capacity(tokens.len());
        for (i, (name, token)) in tokens.into_iter().enumerate() {
            if i > 0 && !self.settings.save_delay.is_zero() {
                tokio::time::sleep(self.settings.save_delay).await;
            }
            match self.host.persist_photo(&token, config, None).await {
                Ok(photo) => persisted.push(NamedPhoto {
                    name: name.to_string(),
                    photo,
                }),
                Err(e) => report.skip(name, FailureStage::Persist, e.to_string()),
            }
        }
        persisted
    }

    /// One comment per group of saved photos, threaded under the main photo.
    async fn create_comments(
        &self,
        report: &mut RowReport,
        config: &JobConfig,
        main: SavedPhoto,
        persisted: Vec<NamedPhoto>,
    ) {
        let owner_id = config.group_owner_id().unwrap_or(main.owner_id);
        let groups = split_into_groups(&persisted, self.settings.comment_group_size);

        for (n, photos) in groups.into_iter().enumerate() {
            let attachments: Vec<String> =
                photos.iter().map(|p| p.photo.attachment_ref()).collect();
            let (comment_id, error) = match self
                .host
                .create_comment(owner_id, main.id, &attachments, config)
                .await
            {
                Ok(id) => {
                    debug!(comment_id = id, photos = photos.len(), "Comment created");
                    (Some(id), None)
                }
                Err(e) => {
                    let reason = format!("comment {} failed: {e}", n + 1);
                    warn!(reason = %reason, "Comment creation failed");
                    report.errors.push(reason.clone());
                    (None, Some(reason))
                }
            };
            report.comment_groups.push(CommentGroupResult {
                photos,
                comment_id,
                error,
            });
        }
    }

    fn skip_unanchored(&self, report: &mut RowReport, tokens: &[(&str, UploadToken)]) {
        for (name, _) in tokens {
            report.skip(
                name,
                FailureStage::Persist,
                "main photo was not saved".to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::host::{HostCall, MockPhotoHost};
    use async_trait::async_trait;

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            save_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn job(config: &str, row: &str, names: &[&str]) -> RowJob {
        let manifest = crate::manifest::Manifest::parse(row).unwrap();
        let files = FileTable::build(names.iter().map(|n| (*n, n.as_bytes().to_vec())), false);
        RowJob {
            row_index: 0,
            row: manifest.rows[0].clone(),
            config: JobConfig::parse(config).unwrap(),
            files,
            endpoints: Arc::new(EndpointCache::default()),
        }
    }

    #[tokio::test]
    async fn test_main_persist_failure_skips_comments() {
        let host = Arc::new(MockPhotoHost::new().fail_persist("a.jpg"));
        let orchestrator = Orchestrator::new(host.clone(), settings());

        let result = orchestrator
            .process_row(job(
                "ACCESS_TOKEN=t\nALBUM_ID=1",
                "a.jpg|A|b.jpg",
                &["a.jpg", "b.jpg"],
            ))
            .await;

        assert!(!result.success);
        assert!(result.comment_groups.is_empty());
        assert_eq!(result.skipped_photos.len(), 1);
        assert_eq!(result.skipped_photos[0].stage, FailureStage::Persist);
        assert!(host.comments().is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("main photo persist failed"));
    }

    #[tokio::test]
    async fn test_group_owner_used_for_comments() {
        let host = Arc::new(MockPhotoHost::new());
        let orchestrator = Orchestrator::new(host.clone(), settings());

        let result = orchestrator
            .process_row(job(
                "ACCESS_TOKEN=t\nALBUM_ID=1\nGROUP_ID=77",
                "a.jpg|A|b.jpg",
                &["a.jpg", "b.jpg"],
            ))
            .await;

        assert!(result.success);
        match &host.comments()[0] {
            HostCall::Comment { owner_id, .. } => assert_eq!(*owner_id, -77),
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_comment_photos_skips_wall_endpoint() {
        let host = Arc::new(MockPhotoHost::new().fail_endpoint(EndpointKind::Wall));
        let orchestrator = Orchestrator::new(host.clone(), settings());

        let result = orchestrator
            .process_row(job("ACCESS_TOKEN=t\nALBUM_ID=1", "a.jpg|caption", &["a.jpg"]))
            .await;

        assert!(result.success);
        assert!(!host
            .calls()
            .contains(&HostCall::GetEndpoint(EndpointKind::Wall)));
        assert_eq!(result.upload_stats.total_files, 1);
    }

    #[tokio::test]
    async fn test_wall_endpoint_failure_is_fatal() {
        let host = Arc::new(MockPhotoHost::new().fail_endpoint(EndpointKind::Wall));
        let orchestrator = Orchestrator::new(host.clone(), settings());

        let result = orchestrator
            .process_row(job(
                "ACCESS_TOKEN=t\nALBUM_ID=1",
                "a.jpg|A|b.jpg",
                &["a.jpg", "b.jpg"],
            ))
            .await;

        assert!(!result.success);
        assert!(result.errors[0].starts_with("Upload endpoint unavailable"));
        assert!(!host
            .calls()
            .iter()
            .any(|c| matches!(c, HostCall::Upload { .. })));
    }

    #[tokio::test]
    async fn test_caption_comes_from_description() {
        let host = Arc::new(MockPhotoHost::new());
        let orchestrator = Orchestrator::new(host.clone(), settings());

        orchestrator
            .process_row(job("ACCESS_TOKEN=t\nALBUM_ID=1", "a.jpg|Hello", &["a.jpg"]))
            .await;

        assert!(host.calls().contains(&HostCall::Persist {
            kind: EndpointKind::Album,
            file_name: "a.jpg".into(),
            caption: Some("Hello".into()),
        }));
    }

    #[tokio::test]
    async fn test_comment_failure_fails_row_but_keeps_photos() {
        let host = Arc::new(MockPhotoHost::new().fail_comments());
        let orchestrator = Orchestrator::new(host.clone(), settings());

        let result = orchestrator
            .process_row(job(
                "ACCESS_TOKEN=t\nALBUM_ID=1",
                "a.jpg|A|b.jpg;c.jpg;d.jpg",
                &["a.jpg", "b.jpg", "c.jpg", "d.jpg"],
            ))
            .await;

        assert!(!result.success);
        assert_eq!(result.comment_groups.len(), 2);
        assert!(result.comment_groups.iter().all(|g| g.comment_id.is_none()));
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.photos_saved(), 4);
    }

    #[tokio::test]
    async fn test_failed_upload_drops_cached_endpoint() {
        let host = Arc::new(MockPhotoHost::new().fail_upload("b.jpg"));
        let orchestrator = Orchestrator::new(host.clone(), settings());
        let config = "ACCESS_TOKEN=t\nALBUM_ID=1";
        let names = ["a.jpg", "b.jpg"];

        let first = job(config, "a.jpg|A|b.jpg", &names);
        let endpoints = Arc::clone(&first.endpoints);
        let result = orchestrator.process_row(first).await;
        assert!(result.success);
        assert_eq!(result.skipped_photos[0].stage, FailureStage::Upload);
        assert_eq!(endpoints.cached_kinds(), vec![EndpointKind::Album]);

        let mut second = job(config, "a.jpg|A|b.jpg", &names);
        second.endpoints = endpoints;
        orchestrator.process_row(second).await;

        let fetches = |kind| {
            host.calls()
                .iter()
                .filter(|c| **c == HostCall::GetEndpoint(kind))
                .count()
        };
        assert_eq!(fetches(EndpointKind::Album), 1);
        assert_eq!(fetches(EndpointKind::Wall), 2);
    }

    /// Tracks how many uploads are running at once.
    struct CountingHost {
        inner: MockPhotoHost,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingHost {
        fn new() -> Self {
            Self {
                inner: MockPhotoHost::new(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PhotoHost for CountingHost {
        async fn get_upload_endpoint(&self, kind: EndpointKind, job: &JobConfig) -> Result<String> {
            self.inner.get_upload_endpoint(kind, job).await
        }

        async fn upload_bytes(
            &self,
            kind: EndpointKind,
            endpoint: &str,
            file: &FileEntry,
        ) -> Result<UploadToken> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = self.inner.upload_bytes(kind, endpoint, file).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn persist_photo(
            &self,
            token: &UploadToken,
            job: &JobConfig,
            caption: Option<&str>,
        ) -> Result<SavedPhoto> {
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

    fn wide_row(comment_photos: usize) -> (String, Vec<String>) {
        let comments: Vec<String> = (0..comment_photos).map(|i| format!("c{i}.jpg")).collect();
        let row = format!("main.jpg|M|{}", comments.join(";"));
        let mut names = comments;
        names.push("main.jpg".to_string());
        (row, names)
    }

    async fn peak_uploads(workers: usize, comment_photos: usize) -> (usize, RowResult) {
        let host = Arc::new(CountingHost::new());
        let orchestrator = Orchestrator::new(
            host.clone(),
            OrchestratorSettings {
                max_upload_workers: workers,
                ..settings()
            },
        );
        let (row, names) = wide_row(comment_photos);
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let result = orchestrator
            .process_row(job("ACCESS_TOKEN=t\nALBUM_ID=1", &row, &names))
            .await;
        (host.peak.load(Ordering::SeqCst), result)
    }

    #[tokio::test]
    async fn test_uploads_are_bounded_by_worker_count() {
        let (peak, result) = peak_uploads(10, 15).await;
        assert!(result.success);
        assert_eq!(result.upload_stats.total_files, 16);
        assert_eq!(result.upload_stats.uploaded, 16);
        assert_eq!(peak, 10);
    }

    #[tokio::test]
    async fn test_single_worker_uploads_sequentially() {
        let (peak, result) = peak_uploads(1, 5).await;
        assert!(result.success);
        assert_eq!(peak, 1);
    }

    #[tokio::test]
    async fn test_pool_shrinks_to_task_count() {
        let (peak, result) = peak_uploads(10, 2).await;
        assert!(result.success);
        assert_eq!(peak, 3);
    }
}
