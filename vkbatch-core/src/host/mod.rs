//! Remote photo host abstraction.
//!
//! The orchestrator talks to VK only through [`PhotoHost`], which covers the
//! four operations an upload needs:
//!
//! 1. obtain a one-time upload URL for an album or for the wall
//! 2. POST raw image bytes to that URL, receiving an ephemeral token
//! 3. persist the token as a permanent photo
//! 4. attach persisted photos to a comment under another photo
//!
//! ## Implementations
//!
//! - [`VkClient`] - reqwest client for `api.vk.com`
//! - [`MockPhotoHost`] - in-process double that records every call

mod mock;
mod vk;

pub use mock::{HostCall, MockPhotoHost};
pub use vk::{VkClient, VkClientConfig, DEFAULT_API_URL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::JobConfig;
use crate::error::Result;
use crate::files::FileEntry;

/// Which upload context an endpoint or token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Album upload (`photos.getUploadServer` / `photos.save`)
    Album,
    /// Wall upload (`photos.getWallUploadServer` / `photos.saveWallPhoto`)
    Wall,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Album => write!(f, "album"),
            Self::Wall => write!(f, "wall"),
        }
    }
}

/// Ephemeral result of posting bytes to an upload URL.
///
/// Must be exchanged for a [`SavedPhoto`] before the upload server forgets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadToken {
    pub kind: EndpointKind,
    /// Name of the file the token was produced for
    pub file_name: String,
    pub server: i64,
    /// `photos_list` for album uploads, `photo` for wall uploads
    pub payload: String,
    pub hash: String,
}

/// Permanent photo identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SavedPhoto {
    pub owner_id: i64,
    pub id: i64,
}

impl SavedPhoto {
    /// Attachment reference in VK's `photo{owner}_{id}` form.
    pub fn attachment_ref(&self) -> String {
        format!("photo{}_{}", self.owner_id, self.id)
    }
}

/// Remote API collaborator used by the orchestrator.
///
/// Implementations must be thread-safe (`Send + Sync`); upload calls for one
/// row run concurrently.
#[async_trait]
pub trait PhotoHost: Send + Sync {
    /// Fetch a fresh upload URL for `kind`.
    async fn get_upload_endpoint(&self, kind: EndpointKind, job: &JobConfig) -> Result<String>;

    /// POST one file to an upload URL obtained for `kind`.
    async fn upload_bytes(
        &self,
        kind: EndpointKind,
        endpoint: &str,
        file: &FileEntry,
    ) -> Result<UploadToken>;

    /// Exchange an upload token for a permanent photo.
    ///
    /// `caption` is only meaningful for album photos.
    async fn persist_photo(
        &self,
        token: &UploadToken,
        job: &JobConfig,
        caption: Option<&str>,
    ) -> Result<SavedPhoto>;

    /// Create a comment under `photo` attaching `attachments`, returning the comment id.
    async fn create_comment(
        &self,
        owner_id: i64,
        photo_id: i64,
        attachments: &[String],
        job: &JobConfig,
    ) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_ref() {
        let photo = SavedPhoto {
            owner_id: -42,
            id: 1001,
        };
        assert_eq!(photo.attachment_ref(), "photo-42_1001");
    }

    #[test]
    fn test_endpoint_kind_display() {
        assert_eq!(EndpointKind::Album.to_string(), "album");
        assert_eq!(EndpointKind::Wall.to_string(), "wall");
    }
}
