//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use vkbatch_core::{JobManager, MemorySessionStore, PhotoHost, SessionStore};

use crate::config::Config;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Job lifecycle operations over the session store
    pub jobs: JobManager,
    /// Maximum size of one uploaded photo in bytes
    pub max_file_size: usize,
}

impl AppState {
    /// Build state around an in-memory session store.
    pub fn new(host: Arc<dyn PhotoHost>, config: &Config) -> Self {
        Self::with_store(Arc::new(MemorySessionStore::new()), host, config)
    }

    pub fn with_store(
        store: Arc<dyn SessionStore>,
        host: Arc<dyn PhotoHost>,
        config: &Config,
    ) -> Self {
        Self {
            jobs: JobManager::new(store, host, config.orchestrator.clone()),
            max_file_size: config.max_file_size(),
        }
    }
}
