//! Multipart form parsing helpers
//!
//! Job uploads carry any number of photo parts plus `config` and `manifest`,
//! which may arrive either as text fields or as file parts.

use std::borrow::Cow;
use std::collections::HashMap;

use axum::extract::Multipart;
use vkbatch_core::{decode_text, FileEntry};

use crate::error::ApiError;
use crate::validation::{normalize_file_name, validate_content_type, validate_file_size};

/// Field names treated as photo uploads
const PHOTO_FIELD_NAMES: &[&str] = &["file", "files", "files[]", "photos", "photos[]"];

/// A photo uploaded via multipart form
#[derive(Debug, Clone)]
pub struct FileField {
    /// File data bytes
    pub data: Vec<u8>,
    /// File name with any directory part removed
    pub file_name: String,
}

/// Parsed multipart form fields
#[derive(Debug)]
pub struct MultipartFields {
    files: Vec<FileField>,
    /// Non-photo fields as raw bytes, so legacy-encoded manifests survive intact
    fields: HashMap<String, Vec<u8>>,
}

impl MultipartFields {
    /// Parse all fields from a multipart request
    ///
    /// Photo parts without a usable file name or with a non-image content
    /// type are rejected, as is any photo larger than `max_file_size`.
    pub async fn parse(multipart: &mut Multipart, max_file_size: usize) -> Result<Self, ApiError> {
        let mut files = Vec::new();
        let mut fields = HashMap::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to parse multipart: {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();

            if PHOTO_FIELD_NAMES.contains(&name.as_str()) {
                validate_content_type(field.content_type())?;
                let file_name = field
                    .file_name()
                    .and_then(normalize_file_name)
                    .ok_or_else(|| {
                        ApiError::bad_request(format!("Photo part '{}' has no file name", name))
                    })?;

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| {
                        ApiError::bad_request(format!("Failed to read file '{}': {}", file_name, e))
                    })?
                    .to_vec();

                validate_file_size(data.len(), max_file_size)?;

                files.push(FileField { data, file_name });
            } else {
                let value = field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read field '{}': {}", name, e))
                })?;
                fields.insert(name, value.to_vec());
            }
        }

        Ok(Self { files, fields })
    }

    /// Raw bytes of a required field
    pub fn require_bytes(&self, name: &str) -> Result<&[u8], ApiError> {
        self.fields
            .get(name)
            .map(Vec::as_slice)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ApiError::bad_request(format!("Missing '{}' field", name)))
    }

    /// A field decoded as text (UTF-8, falling back to windows-1251)
    pub fn get_text(&self, name: &str) -> Option<Cow<'_, str>> {
        self.fields.get(name).map(|b| decode_text(b).0)
    }

    /// Consume the form, yielding the uploaded photos
    pub fn into_files(self) -> Vec<FileEntry> {
        self.files
            .into_iter()
            .map(|f| FileEntry::new(f.file_name, f.data))
            .collect()
    }
}
