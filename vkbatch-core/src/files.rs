//! File resolution table.
//!
//! Maps the names used in a manifest to the uploaded payloads. Matching is
//! case-insensitive unless the table is built case-sensitive; either way the
//! original spelling is kept for display and for the outbound multipart field.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

/// One uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub original_name: String,
    pub bytes: Arc<[u8]>,
}

impl FileEntry {
    pub fn new(original_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            original_name: original_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Names a manifest requires that are absent, and uploads nothing refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl FileDiff {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Lookup table from folded file name to payload.
#[derive(Debug, Clone, Default)]
pub struct FileTable {
    entries: HashMap<String, FileEntry>,
    case_sensitive: bool,
}

impl FileTable {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            entries: HashMap::new(),
            case_sensitive,
        }
    }

    /// Build a table from `(name, bytes)` pairs.
    ///
    /// When two names fold to the same key, the first one wins.
    pub fn build<I, N, B>(files: I, case_sensitive: bool) -> Self
    where
        I: IntoIterator<Item = (N, B)>,
        N: Into<String>,
        B: Into<Arc<[u8]>>,
    {
        let mut table = Self::new(case_sensitive);
        for (name, bytes) in files {
            table.insert(FileEntry::new(name, bytes));
        }
        table
    }

    /// Insert an entry unless its folded name is already present.
    ///
    /// Returns `false` when the entry was dropped as a duplicate.
    pub fn insert(&mut self, entry: FileEntry) -> bool {
        let key = self.fold(&entry.original_name);
        if self.entries.contains_key(&key) {
            tracing::warn!(
                name = %entry.original_name,
                "Duplicate file name after case folding, keeping first upload"
            );
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    /// Look up a manifest name.
    pub fn resolve(&self, logical_name: &str) -> Option<&FileEntry> {
        self.entries.get(&self.fold(logical_name))
    }

    /// Compare the names a manifest needs against what was uploaded.
    ///
    /// `missing` keeps the manifest spelling in first-seen order; `extra` is sorted.
    pub fn diff<S: AsRef<str>>(&self, required_names: &[S]) -> FileDiff {
        let mut required = BTreeSet::new();
        let mut missing = Vec::new();

        for name in required_names {
            let key = self.fold(name.as_ref());
            if required.insert(key.clone()) && !self.entries.contains_key(&key) {
                missing.push(name.as_ref().to_string());
            }
        }

        let mut extra: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| !required.contains(*key))
            .map(|(_, entry)| entry.original_name.clone())
            .collect();
        extra.sort();

        FileDiff { missing, extra }
    }

    /// Layer `overrides` on top of this table; entries in `overrides` win.
    pub fn overlay(&self, overrides: &FileTable) -> FileTable {
        let mut merged = self.clone();
        for entry in overrides.entries.values() {
            let key = merged.fold(&entry.original_name);
            merged.entries.insert(key, entry.clone());
        }
        merged
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.values().map(FileEntry::size).sum()
    }

    fn fold(&self, name: &str) -> String {
        let name = name.trim();
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(names: &[&str], case_sensitive: bool) -> FileTable {
        FileTable::build(
            names.iter().map(|n| (n.to_string(), n.as_bytes().to_vec())),
            case_sensitive,
        )
    }

    #[test]
    fn test_resolve_is_case_insensitive_by_default() {
        let table = table(&["Photo.JPG"], false);
        let entry = table.resolve("photo.jpg").unwrap();
        assert_eq!(entry.original_name, "Photo.JPG");
        assert_eq!(entry.size(), 9);
        assert!(table.resolve("other.jpg").is_none());
    }

    #[test]
    fn test_case_sensitive_resolution() {
        let table = table(&["Photo.JPG"], true);
        assert!(table.resolve("photo.jpg").is_none());
        assert!(table.resolve("Photo.JPG").is_some());
    }

    #[test]
    fn test_duplicate_after_folding_keeps_first() {
        let table = FileTable::build(
            vec![
                ("a.jpg".to_string(), b"first".to_vec()),
                ("A.JPG".to_string(), b"second".to_vec()),
            ],
            false,
        );
        assert_eq!(table.len(), 1);
        assert_eq!(&*table.resolve("a.jpg").unwrap().bytes, b"first");
    }

    #[test]
    fn test_diff_reports_missing_and_extra() {
        let table = table(&["a.jpg", "B.jpg", "unused.png"], false);
        let diff = table.diff(&["a.jpg", "b.JPG", "c.jpg", "C.jpg"]);
        assert_eq!(diff.missing, vec!["c.jpg"]);
        assert_eq!(diff.extra, vec!["unused.png"]);
        assert!(!diff.is_complete());
    }

    #[test]
    fn test_missing_union_keys_reproduces_required() {
        let required = ["A.jpg", "b.jpg", "c.jpg", "d.JPG"];
        let table = table(&["a.jpg", "D.jpg", "zzz.jpg"], false);
        let diff = table.diff(&required);

        let mut reconstructed: BTreeSet<String> =
            diff.missing.iter().map(|n| n.to_lowercase()).collect();
        reconstructed.extend(
            table
                .keys()
                .map(str::to_string)
                .filter(|k| !diff.extra.iter().any(|e| e.to_lowercase() == *k)),
        );
        let expected: BTreeSet<String> = required.iter().map(|n| n.to_lowercase()).collect();
        assert_eq!(reconstructed, expected);
    }

    #[test]
    fn test_overlay_prefers_overrides() {
        let base = FileTable::build(vec![("a.jpg", b"old".to_vec())], false);
        let row = FileTable::build(vec![("A.jpg", b"new".to_vec())], false);
        let merged = base.overlay(&row);
        assert_eq!(merged.len(), 1);
        assert_eq!(&*merged.resolve("a.jpg").unwrap().bytes, b"new");
        assert_eq!(merged.total_bytes(), 3);
    }
}
