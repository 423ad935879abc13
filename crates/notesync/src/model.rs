//! # Domain Model
//!
//! A note exists in up to three places at once: the remote store (raw text,
//! authoritative), the compiled snapshot (metadata only, fast to list), and
//! the local drafts/edit cache (full text, not yet durable). This module
//! defines the shapes shared by all of them.
//!
//! ## Identity
//!
//! A note's id is the file stem of its path: `notes/groceries.md` → `groceries`.
//! The snapshot index is keyed by filename, drafts by id, and the remote store
//! by path; [`id_from_path`] and [`path_for_id`] translate between them.
//!
//! ## Version Tokens
//!
//! Every committed revision carries an opaque version token (a content hash).
//! Writes against the remote store must present the last token seen, which is
//! how concurrent modification is detected. A note with `version == None` has
//! not been committed yet.

use crate::parser::{parse_content, ParsedContent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl Visibility {
    pub fn from_public(public: bool) -> Self {
        if public {
            Self::Public
        } else {
            Self::Private
        }
    }

    pub fn is_public(self) -> bool {
        self == Self::Public
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub path: String,
    pub title: String,
    /// Raw note text. Empty for notes that came from the snapshot index.
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub size: u64,
}

impl Note {
    /// Builds a note from raw text. Timestamps missing from the frontmatter
    /// fall back to `now`.
    pub fn from_raw(path: &str, raw: &str, preview_length: usize, now: DateTime<Utc>) -> Self {
        let parsed = parse_content(raw, preview_length);
        Self::from_parsed(path, raw, parsed, now)
    }

    pub fn from_parsed(path: &str, raw: &str, parsed: ParsedContent, now: DateTime<Utc>) -> Self {
        let id = id_from_path(path);
        let created_at = parsed.created_at.unwrap_or(now);
        Self {
            title: parsed.title.unwrap_or_else(|| id.clone()),
            id,
            path: path.to_string(),
            body: raw.to_string(),
            preview: parsed.preview,
            created_at,
            updated_at: parsed.updated_at.unwrap_or(now).max(created_at),
            visibility: parsed.visibility,
            tags: parsed.tags,
            version: None,
            size: raw.len() as u64,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Key used by the edit cache: version token, else path, else id.
    pub fn cache_key(&self) -> String {
        match &self.version {
            Some(version) if !version.is_empty() => version.clone(),
            _ if !self.path.is_empty() => self.path.clone(),
            _ => self.id.clone(),
        }
    }

    /// True when `other` names the same note, by id or by version token.
    pub fn same_note(&self, other: &Note) -> bool {
        self.id == other.id
            || matches!((&self.version, &other.version), (Some(a), Some(b)) if a == b)
    }
}

/// Snapshot index entry: a note without its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteMetadata {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, alias = "version")]
    pub sha: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub compiled_at: Option<DateTime<Utc>>,
}

impl NoteMetadata {
    /// Converts to a body-less [`Note`]. `filename` wins over the entry's own
    /// field because the index key is the authoritative name.
    pub fn to_note(&self, filename: &str, notes_dir: &str) -> Note {
        let filename = if filename.is_empty() {
            self.filename.as_str()
        } else {
            filename
        };
        let id = id_from_path(filename);
        let path = if notes_dir.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", notes_dir.trim_end_matches('/'), filename)
        };
        Note {
            title: if self.title.is_empty() {
                id.clone()
            } else {
                self.title.clone()
            },
            id,
            path,
            body: String::new(),
            preview: self.preview.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            visibility: self.visibility,
            tags: crate::tags::normalize_tags(&self.tags),
            version: self.sha.clone(),
            size: self.size,
        }
    }
}

/// Remote store directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub sha: String,
}

/// File stem of the last path segment.
pub fn id_from_path(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(dot) if dot > 0 => name[..dot].to_string(),
        _ => name.to_string(),
    }
}

pub fn path_for_id(notes_dir: &str, id: &str, ext: &str) -> String {
    let dir = notes_dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("{}{}", id, ext)
    } else {
        format!("{}/{}{}", dir, id, ext)
    }
}

/// Content-hash version token (hex SHA-256).
pub fn content_version(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Fresh identifier for a note that has no file yet.
pub fn new_note_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_id_from_path() {
        assert_eq!(id_from_path("notes/groceries.md"), "groceries");
        assert_eq!(id_from_path("groceries.md"), "groceries");
        assert_eq!(id_from_path("notes/archive.2024.md"), "archive.2024");
        assert_eq!(id_from_path(".hidden"), ".hidden");
        assert_eq!(id_from_path("plain"), "plain");
    }

    #[test]
    fn test_path_for_id() {
        assert_eq!(path_for_id("notes", "n1", ".md"), "notes/n1.md");
        assert_eq!(path_for_id("notes/", "n1", ".md"), "notes/n1.md");
        assert_eq!(path_for_id("", "n1", ".md"), "n1.md");
    }

    #[test]
    fn test_from_raw_uses_frontmatter_and_falls_back_to_now() {
        let raw = "---\ncreated: 2024-05-01T12:00:00Z\ntags: [x, y]\n---\nHello";
        let note = Note::from_raw("notes/n1.md", raw, 200, at(3));

        assert_eq!(note.id, "n1");
        assert_eq!(note.title, "Hello");
        assert_eq!(note.created_at, at(1));
        assert_eq!(note.updated_at, at(3));
        assert_eq!(note.tags.iter().cloned().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(note.size, raw.len() as u64);
        assert!(note.version.is_none());
    }

    #[test]
    fn test_updated_never_precedes_created() {
        let raw = "---\ncreated: 2024-05-04T12:00:00Z\nupdated: 2024-05-02T12:00:00Z\n---\nx";
        let note = Note::from_raw("n.md", raw, 200, at(3));
        assert_eq!(note.updated_at, at(4));
    }

    #[test]
    fn test_cache_key_preference() {
        let note = Note::from_raw("notes/a.md", "a", 200, at(1));
        assert_eq!(note.cache_key(), "notes/a.md");
        assert_eq!(note.clone().with_version("abc").cache_key(), "abc");

        let mut bare = note;
        bare.path.clear();
        assert_eq!(bare.cache_key(), "a");
    }

    #[test]
    fn test_same_note_by_id_or_version() {
        let a = Note::from_raw("notes/a.md", "a", 200, at(1)).with_version("v1");
        let renamed = Note::from_raw("notes/b.md", "a", 200, at(1)).with_version("v1");
        let other = Note::from_raw("notes/c.md", "c", 200, at(1)).with_version("v2");
        assert!(a.same_note(&renamed));
        assert!(!a.same_note(&other));
    }

    #[test]
    fn test_metadata_deserializes_snapshot_json() {
        let json = r#"{
            "title": "Groceries",
            "preview": "Milk",
            "createdAt": "2024-05-01T12:00:00Z",
            "updatedAt": "2024-05-02T12:00:00Z",
            "visibility": "public",
            "tags": ["Home"],
            "sha": "abc",
            "size": 12
        }"#;
        let meta: NoteMetadata = serde_json::from_str(json).unwrap();
        let note = meta.to_note("groceries.md", "notes");

        assert_eq!(note.id, "groceries");
        assert_eq!(note.path, "notes/groceries.md");
        assert_eq!(note.version.as_deref(), Some("abc"));
        assert!(note.visibility.is_public());
        assert!(note.tags.contains("Home"));
        assert!(note.body.is_empty());
        assert!(meta.compiled_at.is_none());
    }

    #[test]
    fn test_content_version_is_stable() {
        assert_eq!(content_version(b"hello"), content_version(b"hello"));
        assert_ne!(content_version(b"hello"), content_version(b"hello!"));
        assert_eq!(content_version(b"").len(), 64);
    }

    #[test]
    fn test_new_note_ids_are_unique() {
        assert_ne!(new_note_id(), new_note_id());
    }
}
