//! Upload manifest parsing.
//!
//! A manifest is delimiter-separated text with one row per album entry:
//!
//! ```text
//! sep=|
//! main_photo|description|comment_photos
//! a.jpg|First photo|b.jpg;c.jpg
//! d.jpg|Second photo|
//! ```
//!
//! The `sep=` line and the header row are both optional. Files exported by
//! older spreadsheet tools are often windows-1251 encoded; those are decoded
//! transparently.

use std::borrow::Cow;

use encoding_rs::{UTF_8, WINDOWS_1251};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VkBatchError};

/// Default field delimiter.
pub const DEFAULT_DELIMITER: char = '|';

/// First-column values that mark a header row.
const HEADER_MARKERS: &[&str] = &[
    "main_photo",
    "main photo",
    "photo",
    "filename",
    "file",
    "фото",
    "главное фото",
];

/// One album entry: a main photo plus the photos attached in follow-up comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub main_photo: String,
    pub description: String,
    pub comment_photos: Vec<String>,
}

/// Parsed manifest with the parameters that were detected while reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub rows: Vec<ManifestRow>,
    pub delimiter: char,
    pub encoding: &'static str,
    pub header_skipped: bool,
}

impl Manifest {
    /// Decode and parse raw manifest bytes.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self> {
        let (text, encoding) = decode_text(bytes);
        let mut manifest = Self::parse(&text)?;
        manifest.encoding = encoding;
        Ok(manifest)
    }

    /// Parse already-decoded manifest text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .map(|l| l.trim_start_matches('\u{feff}').trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .peekable();

        let mut delimiter = DEFAULT_DELIMITER;
        if let Some(first) = lines.peek() {
            if let Some(sep) = parse_sep_directive(first) {
                delimiter = sep;
                lines.next();
            }
        }

        let mut rows = Vec::new();
        let mut header_skipped = false;

        for (i, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split(delimiter).map(clean_field).collect();

            if i == 0 && is_header(&fields) {
                header_skipped = true;
                continue;
            }

            let main_photo = fields.first().copied().unwrap_or_default();
            if main_photo.is_empty() {
                tracing::debug!(line = %line, "Skipping manifest line without a main photo");
                continue;
            }

            let description = fields.get(1).copied().unwrap_or_default().to_string();
            let comment_photos = fields
                .iter()
                .skip(2)
                .flat_map(|field| split_photo_list(field, delimiter))
                .collect();

            rows.push(ManifestRow {
                main_photo: main_photo.to_string(),
                description,
                comment_photos,
            });
        }

        if rows.is_empty() {
            return Err(VkBatchError::InvalidManifest(
                "manifest contains no rows".into(),
            ));
        }

        Ok(Self {
            rows,
            delimiter,
            encoding: UTF_8.name(),
            header_skipped,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every file name the manifest references, main photos first, in order.
    pub fn required_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rows.iter().map(|r| r.main_photo.clone()).collect();
        names.extend(
            self.rows
                .iter()
                .flat_map(|r| r.comment_photos.iter().cloned()),
        );
        names
    }
}

/// Decode manifest bytes, preferring UTF-8 and falling back to windows-1251.
pub fn decode_text(bytes: &[u8]) -> (Cow<'_, str>, &'static str) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    if let Some(text) = UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
        return (text, UTF_8.name());
    }

    let (text, _) = WINDOWS_1251.decode_without_bom_handling(bytes);
    tracing::debug!("Manifest is not valid UTF-8, decoded as windows-1251");
    (text, WINDOWS_1251.name())
}

fn parse_sep_directive(line: &str) -> Option<char> {
    let line = line.trim();
    let rest = line
        .get(..4)
        .filter(|p| p.eq_ignore_ascii_case("sep="))
        .map(|_| &line[4..])?;
    rest.chars().next()
}

fn clean_field(field: &str) -> &str {
    let field = field.trim();
    let field = if field.len() >= 2 && field.starts_with('"') && field.ends_with('"') {
        &field[1..field.len() - 1]
    } else {
        field
    };
    field.trim()
}

fn is_header(fields: &[&str]) -> bool {
    fields
        .first()
        .map(|f| HEADER_MARKERS.contains(&f.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn split_photo_list(field: &str, delimiter: char) -> Vec<String> {
    field
        .split(|c| c == ';' || (c == ',' && delimiter != ','))
        .map(|name| name.trim().trim_matches('"').trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_row() {
        let manifest = Manifest::parse("a.jpg|desc A|b.jpg;c.jpg").unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(
            manifest.rows[0],
            ManifestRow {
                main_photo: "a.jpg".into(),
                description: "desc A".into(),
                comment_photos: vec!["b.jpg".into(), "c.jpg".into()],
            }
        );
        assert!(!manifest.header_skipped);
    }

    #[test]
    fn test_sep_directive_and_header() {
        let text = "sep=;\nmain_photo;description;comments\n\"x.png\";\"Hello\";\"y.png,z.png\"\n";
        let manifest = Manifest::parse(text).unwrap();
        assert_eq!(manifest.delimiter, ';');
        assert!(manifest.header_skipped);
        assert_eq!(manifest.rows[0].main_photo, "x.png");
        assert_eq!(manifest.rows[0].description, "Hello");
        assert_eq!(manifest.rows[0].comment_photos, vec!["y.png", "z.png"]);
    }

    #[test]
    fn test_row_without_comments_and_blank_lines() {
        let manifest = Manifest::parse("\n a.jpg | only main \n\n b.jpg\n").unwrap();
        assert_eq!(manifest.len(), 2);
        assert!(manifest.rows[0].comment_photos.is_empty());
        assert_eq!(manifest.rows[0].description, "only main");
        assert_eq!(manifest.rows[1].description, "");
    }

    #[test]
    fn test_rows_with_empty_main_photo_are_skipped() {
        let manifest = Manifest::parse("|orphan|b.jpg\na.jpg|kept|").unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.rows[0].main_photo, "a.jpg");
    }

    #[test]
    fn test_empty_manifest_is_rejected() {
        assert!(matches!(
            Manifest::parse("\n\n"),
            Err(VkBatchError::InvalidManifest(_))
        ));
        assert!(Manifest::parse("main_photo|description|comments\n").is_err());
    }

    #[test]
    fn test_windows_1251_fallback() {
        // "фото.jpg|Привет|" encoded as windows-1251
        let (encoded, _, _) = WINDOWS_1251.encode("фото.jpg|Привет|");
        let manifest = Manifest::parse_bytes(&encoded).unwrap();
        assert_eq!(manifest.encoding, "windows-1251");
        assert_eq!(manifest.rows[0].main_photo, "фото.jpg");
        assert_eq!(manifest.rows[0].description, "Привет");
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice("a.jpg|Описание|".as_bytes());
        let manifest = Manifest::parse_bytes(&bytes).unwrap();
        assert_eq!(manifest.encoding, "UTF-8");
        assert_eq!(manifest.rows[0].main_photo, "a.jpg");
        assert_eq!(manifest.rows[0].description, "Описание");
    }

    #[test]
    fn test_cyrillic_header_is_detected() {
        let manifest = Manifest::parse("Фото|Описание|Комментарии\na.jpg|x|").unwrap();
        assert!(manifest.header_skipped);
        assert_eq!(manifest.len(), 1);
    }

    #[test]
    fn test_required_names_order() {
        let manifest = Manifest::parse("a.jpg||b.jpg;c.jpg\nd.jpg||e.jpg").unwrap();
        assert_eq!(
            manifest.required_names(),
            vec!["a.jpg", "d.jpg", "b.jpg", "c.jpg", "e.jpg"]
        );
    }
}
