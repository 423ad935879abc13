//! # Snapshot Client
//!
//! Read side of the compiled snapshot that the build pipeline publishes.
//! The snapshot lags the remote store by a build cycle (or more, behind a
//! CDN), so everything here answers "what does the snapshot currently say",
//! never "what is true".
//!
//! ## Contract
//!
//! - `GET index` → `{ version, compiledAt, totalNotes, publicNotes, notes: { filename: meta } }`
//! - `GET <id>`  → a single [`NoteMetadata`] including `compiledAt`
//!
//! A 404, or a response that is not JSON (static hosts often answer missing
//! files with an HTML page), means "not available" and maps to `Ok(None)`.
//! Transport failures and other HTTP errors are `Err`: callers must not read
//! an outage as "the note is gone".

use crate::error::{NoteSyncError, Result};
use crate::model::{Note, NoteMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;

pub const INDEX_PATH: &str = "index";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl SnapshotResponse {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: Some("text/html".to_string()),
            body: String::new(),
        }
    }

    fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false)
    }
}

/// Public read endpoint serving the compiled snapshot.
#[async_trait(?Send)]
pub trait SnapshotTransport {
    /// GET `path` relative to the snapshot root. `Err` only for transport failures.
    async fn fetch(&self, path: &str) -> Result<SnapshotResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotIndex {
    #[serde(default)]
    pub version: u32,
    pub compiled_at: DateTime<Utc>,
    #[serde(default)]
    pub total_notes: usize,
    #[serde(default)]
    pub public_notes: usize,
    #[serde(default)]
    pub notes: BTreeMap<String, NoteMetadata>,
}

impl SnapshotIndex {
    pub fn contains_id(&self, id: &str) -> bool {
        self.notes
            .keys()
            .any(|filename| crate::model::id_from_path(filename) == id)
    }
}

pub struct SnapshotClient<T: SnapshotTransport> {
    transport: T,
    notes_dir: String,
    last_index: RefCell<Option<SnapshotIndex>>,
}

impl<T: SnapshotTransport> SnapshotClient<T> {
    pub fn new(transport: T, notes_dir: impl Into<String>) -> Self {
        Self {
            transport,
            notes_dir: notes_dir.into(),
            last_index: RefCell::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current index, or `None` when no snapshot has been built yet.
    pub async fn get_index(&self) -> Result<Option<SnapshotIndex>> {
        let index: Option<SnapshotIndex> = self.fetch_json(INDEX_PATH).await?;
        if let Some(index) = &index {
            tracing::debug!(
                compiled_at = %index.compiled_at,
                total = index.total_notes,
                "snapshot index loaded"
            );
            *self.last_index.borrow_mut() = Some(index.clone());
        }
        Ok(index)
    }

    /// Like [`get_index`](Self::get_index), but falls back to the last index
    /// seen when the snapshot is unavailable or unreachable.
    pub async fn get_index_or_last(&self) -> Option<SnapshotIndex> {
        match self.get_index().await {
            Ok(Some(index)) => Some(index),
            Ok(None) => {
                tracing::debug!("snapshot not available, using last known index");
                self.last_index()
            }
            Err(err) => {
                tracing::warn!(%err, "snapshot index read failed, using last known index");
                self.last_index()
            }
        }
    }

    pub fn last_index(&self) -> Option<SnapshotIndex> {
        self.last_index.borrow().clone()
    }

    pub async fn get_note(&self, id: &str) -> Result<Option<NoteMetadata>> {
        self.fetch_json(id).await
    }

    /// Has the snapshot compiled `id` strictly after `instant`?
    /// A note without a compiled timestamp has not been compiled.
    pub async fn note_compiled_after(&self, id: &str, instant: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .get_note(id)
            .await?
            .and_then(|meta| meta.compiled_at)
            .map(|compiled| compiled > instant)
            .unwrap_or(false))
    }

    /// Has `id` disappeared from the index? An unavailable index proves nothing.
    pub async fn note_missing(&self, id: &str) -> Result<bool> {
        Ok(self
            .get_index()
            .await?
            .map(|index| !index.contains_id(id))
            .unwrap_or(false))
    }

    /// Body-less notes from an index, most recently updated first.
    pub fn notes_from_index(&self, index: &SnapshotIndex) -> Vec<Note> {
        let mut notes: Vec<Note> = index
            .notes
            .iter()
            .map(|(filename, meta)| meta.to_note(filename, &self.notes_dir))
            .collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        notes
    }

    async fn fetch_json<D: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<D>> {
        let response = self.transport.fetch(path).await?;
        if response.status == 404 {
            return Ok(None);
        }
        if !(200..300).contains(&response.status) {
            return Err(NoteSyncError::Snapshot(format!(
                "GET {} returned HTTP {}",
                path, response.status
            )));
        }
        if !response.is_json() {
            tracing::debug!(path, content_type = ?response.content_type, "non-JSON snapshot response");
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&response.body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSnapshot;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    fn client() -> SnapshotClient<FakeSnapshot> {
        SnapshotClient::new(FakeSnapshot::new(), "notes")
    }

    #[tokio::test]
    async fn missing_index_is_none_not_error() {
        let client = client();
        assert!(client.get_index().await.unwrap().is_none());
        assert!(client.get_index_or_last().await.is_none());
    }

    #[tokio::test]
    async fn html_response_is_not_available() {
        let client = client();
        client.transport().respond(
            INDEX_PATH,
            SnapshotResponse {
                status: 200,
                content_type: Some("text/html; charset=utf-8".to_string()),
                body: "<html></html>".to_string(),
            },
        );
        assert!(client.get_index().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_error_is_an_error() {
        let client = client();
        client.transport().respond(
            INDEX_PATH,
            SnapshotResponse {
                status: 503,
                content_type: None,
                body: String::new(),
            },
        );
        assert!(client.get_index().await.is_err());
    }

    #[tokio::test]
    async fn parses_index_and_lists_newest_first() {
        let client = client();
        client.transport().publish_note("old", "Old", at(1), Some(at(5)));
        client.transport().publish_note("new", "New", at(3), Some(at(5)));

        let index = client.get_index().await.unwrap().unwrap();
        assert_eq!(index.total_notes, 2);
        assert!(index.contains_id("old"));

        let notes = client.notes_from_index(&index);
        let ids: Vec<&str> = notes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(notes[0].path, "notes/new.md");
    }

    #[tokio::test]
    async fn falls_back_to_last_index_when_unavailable() {
        let client = client();
        client.transport().publish_note("a", "A", at(1), Some(at(2)));
        client.get_index().await.unwrap();

        client.transport().set_failing(true);
        let index = client.get_index_or_last().await.unwrap();
        assert!(index.contains_id("a"));
    }

    #[tokio::test]
    async fn compiled_after_is_strict() {
        let client = client();
        client.transport().publish_note("a", "A", at(1), Some(at(2)));

        assert!(client.note_compiled_after("a", at(1)).await.unwrap());
        assert!(!client.note_compiled_after("a", at(2)).await.unwrap());
        assert!(!client
            .note_compiled_after("a", at(2) + Duration::milliseconds(1))
            .await
            .unwrap());
        assert!(!client.note_compiled_after("absent", at(0)).await.unwrap());
    }

    #[tokio::test]
    async fn note_missing_needs_an_index() {
        let client = client();
        assert!(!client.note_missing("a").await.unwrap());

        client.transport().publish_note("b", "B", at(1), Some(at(2)));
        assert!(client.note_missing("a").await.unwrap());
        assert!(!client.note_missing("b").await.unwrap());
    }
}
