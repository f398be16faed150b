//! Job sessions and their storage.
//!
//! A session holds everything one batch run needs between HTTP requests: the
//! parsed config and manifest, the uploaded files, the endpoint cache and the
//! append-only log of row results. Stores hand out clones; locks are only held
//! for the duration of a map operation, never across a network call.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::endpoint::EndpointCache;
use crate::error::{Result, VkBatchError};
use crate::files::FileTable;
use crate::manifest::ManifestRow;
use crate::report::{Progress, RowResult};

/// State of one batch job.
#[derive(Debug, Clone)]
pub struct JobState {
    /// Assigned by the store on `create`
    pub session_id: String,
    pub config: JobConfig,
    pub manifest: Arc<[ManifestRow]>,
    pub files: FileTable,
    /// Shared between clones so cached URLs survive read-modify-write cycles
    pub endpoints: Arc<EndpointCache>,
    /// Index of the row after the most recently recorded one
    pub cursor: usize,
    pub results: Vec<RowResult>,
    pub created_at: DateTime<Utc>,
}

impl JobState {
    pub fn new(
        config: JobConfig,
        manifest: Vec<ManifestRow>,
        files: FileTable,
        endpoints: EndpointCache,
    ) -> Self {
        Self {
            session_id: String::new(),
            config,
            manifest: manifest.into(),
            files,
            endpoints: Arc::new(endpoints),
            cursor: 0,
            results: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn total_rows(&self) -> usize {
        self.manifest.len()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            current: self.cursor,
            total: self.total_rows(),
            processed: self.results.len(),
        }
    }

    /// Append a row result and move the cursor past it.
    pub fn record(&mut self, result: RowResult) {
        self.cursor = result.row_index + 1;
        self.results.push(result);
    }

    /// Whether a successful result for `row_index` is already recorded.
    pub fn has_succeeded(&self, row_index: usize) -> bool {
        self.results
            .iter()
            .any(|r| r.row_index == row_index && r.success)
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }
}

/// Storage backend for job sessions.
///
/// `get` returns a snapshot; `record_result` is the only mutation that runs
/// concurrently with row processing and must be atomic per session.
pub trait SessionStore: Send + Sync {
    /// Store a new session and return its id.
    fn create(&self, state: JobState) -> Result<String>;

    fn get(&self, session_id: &str) -> Result<Option<JobState>>;

    /// Replace a session wholesale.
    fn put(&self, session_id: &str, state: JobState) -> Result<()>;

    /// Append a row result and advance the cursor in one critical section.
    ///
    /// Returns `None` when the session no longer exists; the result is dropped.
    fn record_result(&self, session_id: &str, result: RowResult) -> Result<Option<Progress>>;

    /// Remove a session, returning whether it existed.
    fn delete(&self, session_id: &str) -> Result<bool>;

    /// Remove sessions older than `max_age`, returning how many were removed.
    fn sweep(&self, max_age: Duration) -> Result<usize>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Single-instance in-memory session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, JobState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, mut state: JobState) -> Result<String> {
        let session_id = Uuid::new_v4().simple().to_string();
        state.session_id = session_id.clone();
        self.sessions.insert(session_id.clone(), state);
        debug!(session_id = %session_id, "Session created");
        Ok(session_id)
    }

    fn get(&self, session_id: &str) -> Result<Option<JobState>> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    fn put(&self, session_id: &str, mut state: JobState) -> Result<()> {
        if !self.sessions.contains_key(session_id) {
            return Err(VkBatchError::SessionNotFound(session_id.to_string()));
        }
        state.session_id = session_id.to_string();
        self.sessions.insert(session_id.to_string(), state);
        Ok(())
    }

    fn record_result(&self, session_id: &str, result: RowResult) -> Result<Option<Progress>> {
        Ok(self.sessions.get_mut(session_id).map(|mut state| {
            state.record(result);
            state.progress()
        }))
    }

    fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    fn sweep(&self, max_age: Duration) -> Result<usize> {
        let before = self.sessions.len();
        self.sessions.retain(|_, state| state.age() <= max_age);
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.sessions.len())
    }
}
