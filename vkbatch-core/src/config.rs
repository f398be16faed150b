//! Job configuration parsed from `config.txt`.
//!
//! The file is a list of `KEY=VALUE` lines. Keys are case-insensitive and
//! stored upper-cased; blank lines and `#` comments are ignored.

use std::collections::BTreeMap;

use crate::error::{Result, VkBatchError};

/// Default VK API version sent with every method call.
pub const DEFAULT_API_VERSION: &str = "5.131";

/// Credentials and upload target for one job.
#[derive(Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// User or community access token
    pub access_token: String,
    /// Target album for main photos
    pub album_id: String,
    /// Community id (absolute value) when uploading on behalf of a group
    pub group_id: Option<u64>,
    /// VK API version
    pub api_version: String,
    /// Any other keys found in the file
    pub extra: BTreeMap<String, String>,
}

impl std::fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobConfig")
            .field("access_token", &"[REDACTED]")
            .field("album_id", &self.album_id)
            .field("group_id", &self.group_id)
            .field("api_version", &self.api_version)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobConfig {
    /// Parse the `KEY=VALUE` text of a config file.
    pub fn parse(text: &str) -> Result<Self> {
        let mut values = BTreeMap::new();

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim().trim_start_matches('\u{feff}');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                VkBatchError::InvalidConfig(format!(
                    "line {} is not KEY=VALUE: '{}'",
                    line_no + 1,
                    line
                ))
            })?;

            let key = key.trim().to_uppercase();
            if key.is_empty() {
                return Err(VkBatchError::InvalidConfig(format!(
                    "line {} has an empty key",
                    line_no + 1
                )));
            }

            values.insert(key, strip_quotes(value.trim()).to_string());
        }

        Self::from_map(values)
    }

    /// Build a config from already-split key/value pairs.
    pub fn from_map(mut values: BTreeMap<String, String>) -> Result<Self> {
        let access_token = take_required(&mut values, "ACCESS_TOKEN")?;
        let album_id = take_required(&mut values, "ALBUM_ID")?;

        let group_id = match values.remove("GROUP_ID") {
            Some(raw) if !raw.is_empty() => Some(parse_group_id(&raw)?),
            _ => None,
        };

        let api_version = values
            .remove("API_VERSION")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        Ok(Self {
            access_token,
            album_id,
            group_id,
            api_version,
            extra: values,
        })
    }

    /// Owner id for objects created on behalf of the configured group.
    ///
    /// VK addresses communities with a negated numeric id.
    pub fn group_owner_id(&self) -> Option<i64> {
        self.group_id.map(|id| -(id as i64))
    }

    /// Short, non-secret fingerprint of the credentials used in cache keys.
    pub fn token_fingerprint(&self) -> &str {
        let end = self
            .access_token
            .char_indices()
            .nth(10)
            .map(|(i, _)| i)
            .unwrap_or(self.access_token.len());
        &self.access_token[..end]
    }
}

fn take_required(values: &mut BTreeMap<String, String>, key: &str) -> Result<String> {
    match values.remove(key) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(VkBatchError::InvalidConfig(format!(
            "missing required key {}",
            key
        ))),
    }
}

/// Accepts `123` or `-123`; the magnitude must fit a positive `i64`.
fn parse_group_id(raw: &str) -> Result<u64> {
    let id = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| VkBatchError::InvalidConfig(format!("GROUP_ID is not numeric: '{}'", raw)))?;
    id.checked_abs()
        .map(|id| id as u64)
        .ok_or_else(|| VkBatchError::InvalidConfig(format!("GROUP_ID is out of range: '{}'", raw)))
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = JobConfig::parse("ACCESS_TOKEN=abc\nALBUM_ID=123\n").unwrap();
        assert_eq!(config.access_token, "abc");
        assert_eq!(config.album_id, "123");
        assert_eq!(config.group_id, None);
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert!(config.extra.is_empty());
    }

    #[test]
    fn test_keys_are_case_insensitive_and_comments_skipped() {
        let text = "# credentials\n\naccess_token = \"tok en\"\nAlbum_Id=42\nnote=hello\n";
        let config = JobConfig::parse(text).unwrap();
        assert_eq!(config.access_token, "tok en");
        assert_eq!(config.album_id, "42");
        assert_eq!(config.extra.get("NOTE").map(String::as_str), Some("hello"));
    }

    #[test]
    fn test_group_id_is_normalized() {
        let config = JobConfig::parse("ACCESS_TOKEN=a\nALBUM_ID=1\nGROUP_ID=-777").unwrap();
        assert_eq!(config.group_id, Some(777));
        assert_eq!(config.group_owner_id(), Some(-777));
    }

    #[test]
    fn test_missing_required_key() {
        let err = JobConfig::parse("ACCESS_TOKEN=a").unwrap_err();
        assert!(err.to_string().contains("ALBUM_ID"));
    }

    #[test]
    fn test_line_without_separator_is_rejected() {
        let err = JobConfig::parse("ACCESS_TOKEN=a\nALBUM_ID=1\ngarbage").unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_group_id_out_of_range() {
        let err = JobConfig::parse("ACCESS_TOKEN=a\nALBUM_ID=1\nGROUP_ID=-9223372036854775808")
            .unwrap_err();
        assert!(matches!(err, VkBatchError::InvalidConfig(_)));

        let max = JobConfig::parse("ACCESS_TOKEN=a\nALBUM_ID=1\nGROUP_ID=-9223372036854775807")
            .unwrap();
        assert_eq!(max.group_owner_id(), Some(-i64::MAX));
    }

    #[test]
    fn test_non_numeric_group_id() {
        assert!(JobConfig::parse("ACCESS_TOKEN=a\nALBUM_ID=1\nGROUP_ID=club1").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = JobConfig::parse("ACCESS_TOKEN=secret-token\nALBUM_ID=1").unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_token_fingerprint() {
        let config = JobConfig::parse("ACCESS_TOKEN=0123456789abcdef\nALBUM_ID=1").unwrap();
        assert_eq!(config.token_fingerprint(), "0123456789");

        let short = JobConfig::parse("ACCESS_TOKEN=abc\nALBUM_ID=1").unwrap();
        assert_eq!(short.token_fingerprint(), "abc");
    }
}
