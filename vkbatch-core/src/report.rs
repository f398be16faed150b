//! Per-row results and job-level summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::host::SavedPhoto;
use crate::manifest::ManifestRow;

/// Descriptions longer than this are shortened in row results.
const DESCRIPTION_PREVIEW_CHARS: usize = 50;

/// Outcome of the main photo of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MainPhotoOutcome {
    Saved { photo: SavedPhoto },
    Failed { reason: String },
}

impl MainPhotoOutcome {
    pub fn saved(&self) -> Option<SavedPhoto> {
        match self {
            Self::Saved { photo } => Some(*photo),
            Self::Failed { .. } => None,
        }
    }
}

/// Pipeline stage at which a comment photo dropped out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Resolve,
    Upload,
    Persist,
}

/// A comment photo that did not make it into a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoFailure {
    pub name: String,
    pub stage: FailureStage,
    pub reason: String,
}

/// A persisted photo together with the manifest name it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPhoto {
    pub name: String,
    pub photo: SavedPhoto,
}

/// One comment and the photos attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentGroupResult {
    pub photos: Vec<NamedPhoto>,
    pub comment_id: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStats {
    pub total_files: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Result of processing one manifest row. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowResult {
    pub row_index: usize,
    pub main_photo: String,
    pub description: String,
    pub success: bool,
    pub main_photo_outcome: MainPhotoOutcome,
    pub comment_groups: Vec<CommentGroupResult>,
    /// Comment photos that were left out; these do not fail the row
    pub skipped_photos: Vec<PhotoFailure>,
    /// Failures that make the row unsuccessful
    pub errors: Vec<String>,
    pub upload_stats: UploadStats,
    pub processed_at: DateTime<Utc>,
}

impl RowResult {
    /// A failed result for a row whose processing never produced one.
    pub fn aborted(row_index: usize, row: &ManifestRow, reason: String) -> Self {
        Self {
            row_index,
            main_photo: row.main_photo.clone(),
            description: description_preview(&row.description),
            success: false,
            main_photo_outcome: MainPhotoOutcome::Failed {
                reason: reason.clone(),
            },
            comment_groups: Vec::new(),
            skipped_photos: Vec::new(),
            errors: vec![reason],
            upload_stats: UploadStats::default(),
            processed_at: Utc::now(),
        }
    }

    /// Number of comments that were actually created.
    pub fn comments_created(&self) -> usize {
        self.comment_groups
            .iter()
            .filter(|g| g.comment_id.is_some())
            .count()
    }

    /// Photos saved by this row, main photo included.
    pub fn photos_saved(&self) -> usize {
        let main = usize::from(self.main_photo_outcome.saved().is_some());
        main + self
            .comment_groups
            .iter()
            .map(|g| g.photos.len())
            .sum::<usize>()
    }
}

/// Shorten a description for display, appending `...` when cut.
pub fn description_preview(description: &str) -> String {
    if description.chars().count() > DESCRIPTION_PREVIEW_CHARS {
        let cut: String = description.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        description.to_string()
    }
}

/// Progress of a job as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Index of the next row the caller is expected to send
    pub current: usize,
    pub total: usize,
    /// Number of recorded row results
    pub processed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRow {
    pub row_index: usize,
    pub main_photo: String,
    pub errors: Vec<String>,
}

/// Final report for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub session_id: String,
    pub total_rows: usize,
    pub processed_rows: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub photos_saved: usize,
    pub comments_created: usize,
    pub skipped_photos: usize,
    pub failed_rows: Vec<FailedRow>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
    pub elapsed_secs: i64,
}

impl JobSummary {
    /// Build a summary from the recorded results.
    ///
    /// When a row was processed more than once only its latest result counts.
    pub fn from_results(
        session_id: &str,
        total_rows: usize,
        results: &[RowResult],
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut latest: Vec<&RowResult> = Vec::new();
        for result in results {
            match latest.iter_mut().find(|r| r.row_index == result.row_index) {
                Some(slot) => *slot = result,
                None => latest.push(result),
            }
        }
        latest.sort_by_key(|r| r.row_index);

        let succeeded = latest.iter().filter(|r| r.success).count();
        let failed_rows: Vec<FailedRow> = latest
            .iter()
            .filter(|r| !r.success)
            .map(|r| FailedRow {
                row_index: r.row_index,
                main_photo: r.main_photo.clone(),
                errors: r.errors.clone(),
            })
            .collect();

        let finalized_at = Utc::now();
        Self {
            session_id: session_id.to_string(),
            total_rows,
            processed_rows: latest.len(),
            succeeded,
            failed: failed_rows.len(),
            photos_saved: latest.iter().map(|r| r.photos_saved()).sum(),
            comments_created: latest.iter().map(|r| r.comments_created()).sum(),
            skipped_photos: latest.iter().map(|r| r.skipped_photos.len()).sum(),
            failed_rows,
            created_at,
            finalized_at,
            elapsed_secs: (finalized_at - created_at).num_seconds(),
        }
    }
}
