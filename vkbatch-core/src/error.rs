use thiserror::Error;

#[derive(Error, Debug)]
pub enum VkBatchError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Row index {index} out of range (manifest has {total} rows)")]
    RowOutOfRange { index: usize, total: usize },

    #[error("Row {0} has already been processed")]
    RowAlreadyProcessed(usize),

    #[error("Upload endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Persist failed: {0}")]
    PersistFailed(String),

    #[error("VK API error {code}: {message}")]
    VkApi { code: i64, message: String },

    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl VkBatchError {
    /// Errors caused by the caller's request rather than by the remote API.
    ///
    /// These are rejected before any work begins and never mutate session state.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_)
                | Self::RowOutOfRange { .. }
                | Self::RowAlreadyProcessed(_)
                | Self::InvalidConfig(_)
                | Self::InvalidManifest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VkBatchError>;
