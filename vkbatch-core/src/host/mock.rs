//! Mock photo host for testing.
//!
//! Records every call and issues increasing photo ids. Individual operations
//! can be made to fail by file name.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{EndpointKind, PhotoHost, SavedPhoto, UploadToken};
use crate::config::JobConfig;
use crate::error::{Result, VkBatchError};
use crate::files::FileEntry;

/// Owner id used for photos saved outside a group.
const MOCK_USER_ID: i64 = 1000;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    GetEndpoint(EndpointKind),
    Upload {
        kind: EndpointKind,
        file_name: String,
    },
    Persist {
        kind: EndpointKind,
        file_name: String,
        caption: Option<String>,
    },
    Comment {
        owner_id: i64,
        photo_id: i64,
        attachments: Vec<String>,
    },
}

/// In-process [`PhotoHost`] double.
/// WARNING: never talks to VK - for tests and local dry runs only!
#[derive(Debug)]
pub struct MockPhotoHost {
    calls: Mutex<Vec<HostCall>>,
    next_id: AtomicI64,
    fail_endpoints: HashSet<EndpointKind>,
    fail_uploads: HashSet<String>,
    fail_persists: HashSet<String>,
    fail_comments: bool,
}

impl MockPhotoHost {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            fail_endpoints: HashSet::new(),
            fail_uploads: HashSet::new(),
            fail_persists: HashSet::new(),
            fail_comments: false,
        }
    }

    /// Make `get_upload_endpoint` fail for `kind`.
    pub fn fail_endpoint(mut self, kind: EndpointKind) -> Self {
        self.fail_endpoints.insert(kind);
        self
    }

    /// Make the upload of `file_name` fail.
    pub fn fail_upload(mut self, file_name: &str) -> Self {
        self.fail_uploads.insert(file_name.to_lowercase());
        self
    }

    /// Make persisting the upload of `file_name` fail.
    pub fn fail_persist(mut self, file_name: &str) -> Self {
        self.fail_persists.insert(file_name.to_lowercase());
        self
    }

    /// Make every `create_comment` call fail.
    pub fn fail_comments(mut self) -> Self {
        self.fail_comments = true;
        self
    }

    /// Snapshot of all calls recorded so far.
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Recorded comment calls only.
    pub fn comments(&self) -> Vec<HostCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, HostCall::Comment { .. }))
            .collect()
    }

    fn record(&self, call: HostCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn next_photo_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MockPhotoHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PhotoHost for MockPhotoHost {
    async fn get_upload_endpoint(&self, kind: EndpointKind, _job: &JobConfig) -> Result<String> {
        self.record(HostCall::GetEndpoint(kind));
        if self.fail_endpoints.contains(&kind) {
            return Err(VkBatchError::VkApi {
                code: 5,
                message: "User authorization failed".into(),
            });
        }
        Ok(format!("mock://upload/{kind}/{}", self.call_count()))
    }

    async fn upload_bytes(
        &self,
        kind: EndpointKind,
        endpoint: &str,
        file: &FileEntry,
    ) -> Result<UploadToken> {
        self.record(HostCall::Upload {
            kind,
            file_name: file.original_name.clone(),
        });
        if self.fail_uploads.contains(&file.original_name.to_lowercase()) {
            return Err(VkBatchError::UploadFailed(format!(
                "{}: simulated upload failure",
                file.original_name
            )));
        }
        Ok(UploadToken {
            kind,
            file_name: file.original_name.clone(),
            server: 1,
            payload: format!("{endpoint}#{}", file.original_name),
            hash: format!("{:x}", file.size()),
        })
    }

    async fn persist_photo(
        &self,
        token: &UploadToken,
        job: &JobConfig,
        caption: Option<&str>,
    ) -> Result<SavedPhoto> {
        self.record(HostCall::Persist {
            kind: token.kind,
            file_name: token.file_name.clone(),
            caption: caption.map(str::to_string),
        });
        if self.fail_persists.contains(&token.file_name.to_lowercase()) {
            return Err(VkBatchError::PersistFailed(format!(
                "{}: simulated persist failure",
                token.file_name
            )));
        }
        Ok(SavedPhoto {
            owner_id: job.group_owner_id().unwrap_or(MOCK_USER_ID),
            id: self.next_photo_id(),
        })
    }

    async fn create_comment(
        &self,
        owner_id: i64,
        photo_id: i64,
        attachments: &[String],
        _job: &JobConfig,
    ) -> Result<i64> {
        self.record(HostCall::Comment {
            owner_id,
            photo_id,
            attachments: attachments.to_vec(),
        });
        if self.fail_comments {
            return Err(VkBatchError::VkApi {
                code: 15,
                message: "Access denied".into(),
            });
        }
        Ok(self.next_photo_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobConfig {
        JobConfig::parse("ACCESS_TOKEN=t\nALBUM_ID=1").unwrap()
    }

    #[tokio::test]
    async fn test_records_calls_and_issues_distinct_ids() {
        let host = MockPhotoHost::new();
        let file = FileEntry::new("a.jpg", b"abc".to_vec());

        let url = host.get_upload_endpoint(EndpointKind::Album, &job()).await.unwrap();
        let token = host.upload_bytes(EndpointKind::Album, &url, &file).await.unwrap();
        let first = host.persist_photo(&token, &job(), Some("cap")).await.unwrap();
        let second = host.persist_photo(&token, &job(), None).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.owner_id, MOCK_USER_ID);
        assert_eq!(host.call_count(), 4);
        assert_eq!(host.calls()[0], HostCall::GetEndpoint(EndpointKind::Album));
    }

    #[tokio::test]
    async fn test_configured_failures() {
        let host = MockPhotoHost::new()
            .fail_endpoint(EndpointKind::Wall)
            .fail_upload("B.jpg");
        let file = FileEntry::new("b.jpg", b"x".to_vec());

        assert!(host.get_upload_endpoint(EndpointKind::Wall, &job()).await.is_err());
        assert!(host.upload_bytes(EndpointKind::Wall, "u", &file).await.is_err());
    }

    #[tokio::test]
    async fn test_group_owner() {
        let host = MockPhotoHost::new();
        let job = JobConfig::parse("ACCESS_TOKEN=t\nALBUM_ID=1\nGROUP_ID=55").unwrap();
        let file = FileEntry::new("a.jpg", b"x".to_vec());
        let token = host.upload_bytes(EndpointKind::Album, "u", &file).await.unwrap();
        let saved = host.persist_photo(&token, &job, None).await.unwrap();
        assert_eq!(saved.owner_id, -55);
    }
}
