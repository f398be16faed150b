//! Short-lived cache of upload URLs.
//!
//! VK hands out a fresh upload URL per album/wall context and a stale one is
//! eventually rejected, so entries expire after a TTL. Concurrent misses may
//! each fetch a URL; the last write wins.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::config::JobConfig;
use crate::error::{Result, VkBatchError};
use crate::host::{EndpointKind, PhotoHost};

/// Default lifetime of a cached upload URL (5 minutes).
pub const DEFAULT_ENDPOINT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CachedEndpoint {
    kind: EndpointKind,
    url: String,
    obtained_at: Instant,
}

/// Upload URL cache keyed by kind and upload context.
#[derive(Debug)]
pub struct EndpointCache {
    entries: DashMap<String, CachedEndpoint>,
    /// `None` keeps entries forever
    ttl: Option<Duration>,
}

impl Default for EndpointCache {
    fn default() -> Self {
        Self::new(Some(DEFAULT_ENDPOINT_TTL))
    }
}

impl EndpointCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cache key for `kind` within the job's upload context.
    pub fn cache_key(kind: EndpointKind, job: &JobConfig) -> String {
        let group = job.group_id.map(|g| g.to_string()).unwrap_or_default();
        match kind {
            EndpointKind::Album => format!(
                "album_{}_{}_{}",
                job.token_fingerprint(),
                job.album_id,
                group
            ),
            EndpointKind::Wall => format!("wall_{}_{}", job.token_fingerprint(), group),
        }
    }

    /// Return a cached upload URL, fetching a new one when absent or stale.
    ///
    /// Any failure of the remote call is reported as `EndpointUnavailable`.
    pub async fn get_upload_endpoint(
        &self,
        host: &dyn PhotoHost,
        kind: EndpointKind,
        job: &JobConfig,
    ) -> Result<String> {
        let key = Self::cache_key(kind, job);

        if let Some(url) = self.lookup(&key) {
            debug!(kind = %kind, "Upload endpoint cache hit");
            return Ok(url);
        }

        let url = host
            .get_upload_endpoint(kind, job)
            .await
            .map_err(|e| VkBatchError::EndpointUnavailable(format!("{kind}: {e}")))?;

        debug!(kind = %kind, "Upload endpoint fetched");
        self.entries.insert(
            key,
            CachedEndpoint {
                kind,
                url: url.clone(),
                obtained_at: Instant::now(),
            },
        );
        Ok(url)
    }

    /// Drop the cached URL for `kind`.
    pub fn invalidate(&self, kind: EndpointKind, job: &JobConfig) {
        self.entries.remove(&Self::cache_key(kind, job));
    }

    /// Kinds that currently have a fresh entry.
    pub fn cached_kinds(&self) -> Vec<EndpointKind> {
        let mut kinds: Vec<EndpointKind> = self
            .entries
            .iter()
            .filter(|e| self.is_fresh(e.value()))
            .map(|e| e.value().kind)
            .collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds.dedup();
        kinds
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        if self.is_fresh(entry.value()) {
            Some(entry.url.clone())
        } else {
            None
        }
    }

    fn is_fresh(&self, entry: &CachedEndpoint) -> bool {
        match self.ttl {
            Some(ttl) => entry.obtained_at.elapsed() < ttl,
            None => true,
        }
    }
}
