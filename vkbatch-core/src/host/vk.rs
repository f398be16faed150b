//! VK API client.
//!
//! Method calls are form-encoded POSTs to `{api_url}/{method}` carrying the
//! job's `access_token` and API version. VK reports failures inside a 200
//! response as `{"error": {"error_code", "error_msg"}}`; those become
//! [`VkBatchError::VkApi`].
//!
//! No call is retried here. A failed row is retried by the caller as a whole.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{EndpointKind, PhotoHost, SavedPhoto, UploadToken};
use crate::config::JobConfig;
use crate::error::{Result, VkBatchError};
use crate::files::FileEntry;

/// Default VK API base URL.
pub const DEFAULT_API_URL: &str = "https://api.vk.com/method/";

/// Default timeout for API and upload requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for the VK client.
#[derive(Debug, Clone)]
pub struct VkClientConfig {
    /// Method base URL
    pub api_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for VkClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VkEnvelope<T> {
    response: Option<T>,
    error: Option<VkErrorBody>,
}

#[derive(Debug, Deserialize)]
struct VkErrorBody {
    error_code: i64,
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct UploadServerResponse {
    upload_url: String,
}

/// Body returned by the upload server itself (not wrapped in an envelope).
#[derive(Debug, Deserialize)]
struct RawUploadResponse {
    server: Option<i64>,
    photos_list: Option<String>,
    photo: Option<String>,
    hash: Option<String>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SavedPhotoResponse {
    id: i64,
    owner_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommentResponse {
    Id(i64),
    Object { comment_id: i64 },
}

/// reqwest-backed [`PhotoHost`] for the VK API.
pub struct VkClient {
    client: Client,
    api_url: Url,
}

impl VkClient {
    /// Create a client with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(VkClientConfig::default())
    }

    /// Create a client with custom configuration.
    #[instrument(level = "debug", skip_all, fields(
        api_url = %config.api_url,
        timeout_ms = config.timeout.as_millis() as u64
    ))]
    pub fn with_config(config: VkClientConfig) -> Result<Self> {
        let mut base = config.api_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let api_url = Url::parse(&base).map_err(|e| {
            VkBatchError::InvalidConfig(format!("Invalid VK API URL '{}': {e}", config.api_url))
        })?;

        let client = Client::builder().timeout(config.timeout).build()?;

        info!("VK client created");
        Ok(Self { client, api_url })
    }

    /// Call a VK API method and unwrap its response envelope.
    async fn call_method<T: DeserializeOwned>(
        &self,
        method: &str,
        job: &JobConfig,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = self.api_url.join(method).map_err(|e| {
            VkBatchError::InvalidConfig(format!("Invalid VK method '{method}': {e}"))
        })?;

        let mut form: Vec<(&str, String)> = params.to_vec();
        form.push(("access_token", job.access_token.clone()));
        form.push(("v", job.api_version.clone()));

        let start = Instant::now();
        let response = self.client.post(url).form(&form).send().await?;
        let status = response.status();
        debug!(
            method,
            status = %status,
            latency_ms = start.elapsed().as_millis() as u64,
            "VK method responded"
        );

        if !status.is_success() {
            return Err(VkBatchError::VkApi {
                code: i64::from(status.as_u16()),
                message: format!("{method} returned HTTP {status}"),
            });
        }

        let envelope: VkEnvelope<T> = response.json().await?;
        if let Some(err) = envelope.error {
            warn!(method, code = err.error_code, error = %err.error_msg, "VK method failed");
            return Err(VkBatchError::VkApi {
                code: err.error_code,
                message: err.error_msg,
            });
        }

        envelope.response.ok_or_else(|| VkBatchError::VkApi {
            code: 0,
            message: format!("{method} returned neither response nor error"),
        })
    }

    fn group_param(job: &JobConfig) -> Option<(&'static str, String)> {
        job.group_id.map(|id| ("group_id", id.to_string()))
    }
}

#[async_trait]
impl PhotoHost for VkClient {
    #[instrument(level = "debug", skip(self, job), fields(album_id = %job.album_id))]
    async fn get_upload_endpoint(&self, kind: EndpointKind, job: &JobConfig) -> Result<String> {
        let mut params = Vec::new();
        let method = match kind {
            EndpointKind::Album => {
                params.push(("album_id", job.album_id.clone()));
                "photos.getUploadServer"
            }
            EndpointKind::Wall => "photos.getWallUploadServer",
        };
        params.extend(Self::group_param(job));

        let server: UploadServerResponse = self.call_method(method, job, &params).await?;
        Ok(server.upload_url)
    }

    #[instrument(level = "debug", skip(self, endpoint, file), fields(
        file = %file.original_name,
        size = file.size()
    ))]
    async fn upload_bytes(
        &self,
        kind: EndpointKind,
        endpoint: &str,
        file: &FileEntry,
    ) -> Result<UploadToken> {
        let field_name = match kind {
            EndpointKind::Album => "file1",
            EndpointKind::Wall => "photo",
        };

        let part = multipart::Part::bytes(file.bytes.to_vec())
            .file_name(file.original_name.clone())
            .mime_str(mime_for(&file.original_name))?;
        let form = multipart::Form::new().part(field_name, part);

        let start = Instant::now();
        let response = self.client.post(endpoint).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VkBatchError::UploadFailed(format!(
                "{}: upload server returned HTTP {status}",
                file.original_name
            )));
        }

        let raw: RawUploadResponse = response.json().await?;
        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            "Upload server responded"
        );

        if let Some(err) = raw.error {
            return Err(VkBatchError::UploadFailed(format!(
                "{}: {err}",
                file.original_name
            )));
        }

        let payload = match kind {
            EndpointKind::Album => raw.photos_list,
            EndpointKind::Wall => raw.photo,
        }
        .filter(|p| !p.is_empty() && p != "[]");

        match (raw.server, payload, raw.hash) {
            (Some(server), Some(payload), Some(hash)) => Ok(UploadToken {
                kind,
                file_name: file.original_name.clone(),
                server,
                payload,
                hash,
            }),
            _ => Err(VkBatchError::UploadFailed(format!(
                "{}: upload server accepted no photo",
                file.original_name
            ))),
        }
    }

    #[instrument(level = "debug", skip(self, token, job, caption), fields(
        kind = %token.kind,
        file = %token.file_name
    ))]
    async fn persist_photo(
        &self,
        token: &UploadToken,
        job: &JobConfig,
        caption: Option<&str>,
    ) -> Result<SavedPhoto> {
        let mut params = vec![("server", token.server.to_string()), ("hash", token.hash.clone())];
        let method = match token.kind {
            EndpointKind::Album => {
                params.push(("photos_list", token.payload.clone()));
                params.push(("album_id", job.album_id.clone()));
                if let Some(caption) = caption.filter(|c| !c.is_empty()) {
                    params.push(("caption", caption.to_string()));
                }
                "photos.save"
            }
            EndpointKind::Wall => {
                params.push(("photo", token.payload.clone()));
                "photos.saveWallPhoto"
            }
        };
        params.extend(Self::group_param(job));

        let saved: Vec<SavedPhotoResponse> = self
            .call_method(method, job, &params)
            .await
            .map_err(|e| VkBatchError::PersistFailed(format!("{}: {e}", token.file_name)))?;

        saved
            .into_iter()
            .next()
            .map(|p| SavedPhoto {
                owner_id: p.owner_id,
                id: p.id,
            })
            .ok_or_else(|| {
                VkBatchError::PersistFailed(format!("{}: {method} saved nothing", token.file_name))
            })
    }

    #[instrument(level = "debug", skip(self, job), fields(attachments = attachments.len()))]
    async fn create_comment(
        &self,
        owner_id: i64,
        photo_id: i64,
        attachments: &[String],
        job: &JobConfig,
    ) -> Result<i64> {
        let mut params = vec![
            ("owner_id", owner_id.to_string()),
            ("photo_id", photo_id.to_string()),
            ("attachments", attachments.join(",")),
        ];
        if job.group_id.is_some() {
            params.push(("from_group", "1".to_string()));
        }

        let response: CommentResponse = self
            .call_method("photos.createComment", job, &params)
            .await?;
        Ok(match response {
            CommentResponse::Id(id) => id,
            CommentResponse::Object { comment_id } => comment_id,
        })
    }
}

/// MIME type for an upload, guessed from the file extension.
fn mime_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}
