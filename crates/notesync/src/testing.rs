//! In-memory stand-ins for the remote store, the snapshot endpoint and the
//! build pipeline. Compiled for tests and behind the `test_utils` feature.

use crate::build::{BuildPipeline, BuildStatus};
use crate::error::{NoteSyncError, Result};
use crate::model::{content_version, FileMeta, NoteMetadata, Visibility};
use crate::remote::{FetchResponse, RemoteTransport};
use crate::snapshot::{SnapshotIndex, SnapshotResponse, SnapshotTransport, INDEX_PATH};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

// --- Remote store ---

/// Remote store whose version tokens are content hashes.
#[derive(Default)]
pub struct FakeRemote {
    files: RefCell<BTreeMap<String, Vec<u8>>>,
    full_transfers: Cell<usize>,
    not_modified_hits: Cell<usize>,
    in_flight: Cell<usize>,
    max_in_flight: Cell<usize>,
    rate_limited: Cell<bool>,
    failing: Cell<bool>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a file directly, as another client would. Returns its token.
    pub fn seed(&self, path: &str, content: &str) -> String {
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.as_bytes().to_vec());
        content_version(content.as_bytes())
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .borrow()
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn token(&self, path: &str) -> Option<String> {
        self.files.borrow().get(path).map(|b| content_version(b))
    }

    pub fn full_transfers(&self) -> usize {
        self.full_transfers.get()
    }

    pub fn not_modified_hits(&self) -> usize {
        self.not_modified_hits.get()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.get()
    }

    pub fn set_rate_limited(&self, limited: bool) {
        self.rate_limited.set(limited);
    }

    /// Make every call fail as if the network were down.
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.failing.get() {
            return Err(NoteSyncError::Remote("connection refused".to_string()));
        }
        if self.rate_limited.get() {
            return Err(NoteSyncError::RateLimited);
        }
        Ok(())
    }

    fn check_version(&self, path: &str, version: Option<&str>) -> Result<()> {
        let current = self.token(path);
        match (current.as_deref(), version) {
            (None, None) => Ok(()),
            (Some(current), Some(given)) if current == given => Ok(()),
            (None, Some(_)) => Err(NoteSyncError::NotFound(path.to_string())),
            (Some(_), given) => Err(NoteSyncError::Conflict {
                path: path.to_string(),
                expected: given.unwrap_or("<new file>").to_string(),
            }),
        }
    }
}

#[async_trait(?Send)]
impl RemoteTransport for FakeRemote {
    async fn list(&self, directory: &str) -> Result<Vec<FileMeta>> {
        self.check_reachable()?;
        let prefix = format!("{}/", directory.trim_end_matches('/'));
        Ok(self
            .files
            .borrow()
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, bytes)| FileMeta {
                path: path.clone(),
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                size: bytes.len() as u64,
                sha: content_version(bytes),
            })
            .collect())
    }

    async fn get(&self, path: &str, validator: Option<&str>) -> Result<FetchResponse> {
        self.in_flight.set(self.in_flight.get() + 1);
        self.max_in_flight
            .set(self.max_in_flight.get().max(self.in_flight.get()));
        tokio::task::yield_now().await;
        self.in_flight.set(self.in_flight.get() - 1);

        self.check_reachable()?;
        let bytes = self
            .files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| NoteSyncError::NotFound(path.to_string()))?;
        let etag = content_version(&bytes);

        if validator == Some(etag.as_str()) {
            self.not_modified_hits.set(self.not_modified_hits.get() + 1);
            return Ok(FetchResponse::NotModified);
        }
        self.full_transfers.set(self.full_transfers.get() + 1);
        Ok(FetchResponse::Content {
            bytes,
            validator: Some(etag),
        })
    }

    async fn put(&self, path: &str, bytes: &[u8], version: Option<&str>) -> Result<String> {
        self.check_reachable()?;
        self.check_version(path, version)?;
        self.files
            .borrow_mut()
            .insert(path.to_string(), bytes.to_vec());
        Ok(content_version(bytes))
    }

    async fn delete(&self, path: &str, version: &str) -> Result<()> {
        self.check_reachable()?;
        self.check_version(path, Some(version))?;
        self.files.borrow_mut().remove(path);
        Ok(())
    }
}

// --- Snapshot endpoint ---

/// Snapshot endpoint backed by a mutable index.
#[derive(Default)]
pub struct FakeSnapshot {
    notes: RefCell<BTreeMap<String, NoteMetadata>>,
    compiled_at: Cell<Option<DateTime<Utc>>>,
    overrides: RefCell<HashMap<String, SnapshotResponse>>,
    failing: Cell<bool>,
    fetches: Cell<usize>,
}

impl FakeSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish (or replace) `<id>.md` in the index. Publishing anything makes
    /// the index available.
    pub fn publish_note(
        &self,
        id: &str,
        title: &str,
        updated_at: DateTime<Utc>,
        compiled_at: Option<DateTime<Utc>>,
    ) {
        self.publish(
            id,
            NoteMetadata {
                filename: format!("{}.md", id),
                title: title.to_string(),
                preview: String::new(),
                created_at: updated_at,
                updated_at,
                visibility: Visibility::Private,
                tags: Vec::new(),
                sha: None,
                size: 0,
                compiled_at,
            },
        );
    }

    pub fn publish(&self, id: &str, meta: NoteMetadata) {
        let compiled = meta.compiled_at.unwrap_or(meta.updated_at);
        let latest = self.compiled_at.get().map_or(compiled, |c| c.max(compiled));
        self.compiled_at.set(Some(latest));
        self.notes.borrow_mut().insert(format!("{}.md", id), meta);
    }

    /// Publish an index with no notes in it.
    pub fn publish_empty(&self, compiled_at: DateTime<Utc>) {
        self.compiled_at.set(Some(compiled_at));
    }

    pub fn unpublish(&self, id: &str) {
        self.notes.borrow_mut().remove(&format!("{}.md", id));
    }

    /// Serve a canned response for `path`, bypassing the index.
    pub fn respond(&self, path: &str, response: SnapshotResponse) {
        self.overrides
            .borrow_mut()
            .insert(path.to_string(), response);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.get()
    }

    fn index(&self) -> Option<SnapshotIndex> {
        let compiled_at = self.compiled_at.get()?;
        let notes = self.notes.borrow().clone();
        Some(SnapshotIndex {
            version: 1,
            compiled_at,
            total_notes: notes.len(),
            public_notes: notes.values().filter(|m| m.visibility.is_public()).count(),
            notes,
        })
    }
}

#[async_trait(?Send)]
impl SnapshotTransport for FakeSnapshot {
    async fn fetch(&self, path: &str) -> Result<SnapshotResponse> {
        self.fetches.set(self.fetches.get() + 1);
        if self.failing.get() {
            return Err(NoteSyncError::Snapshot("connection reset".to_string()));
        }
        if let Some(response) = self.overrides.borrow().get(path) {
            return Ok(response.clone());
        }

        if path == INDEX_PATH {
            return Ok(match self.index() {
                Some(index) => SnapshotResponse::json(serde_json::to_string(&index)?),
                None => SnapshotResponse::not_found(),
            });
        }

        let notes = self.notes.borrow();
        Ok(match notes.get(&format!("{}.md", path)) {
            Some(meta) => SnapshotResponse::json(serde_json::to_string(meta)?),
            None => SnapshotResponse::not_found(),
        })
    }
}

// --- Build pipeline ---

#[derive(Default)]
pub struct FakeBuilds {
    triggers: Cell<usize>,
    status_queries: Cell<usize>,
    status: Cell<BuildStatus>,
    fail_trigger: Cell<bool>,
}

impl FakeBuilds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triggers(&self) -> usize {
        self.triggers.get()
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.get()
    }

    pub fn set_status(&self, status: BuildStatus) {
        self.status.set(status);
    }

    pub fn set_fail_trigger(&self, fail: bool) {
        self.fail_trigger.set(fail);
    }
}

#[async_trait(?Send)]
impl BuildPipeline for FakeBuilds {
    async fn trigger(&self) -> Result<()> {
        if self.fail_trigger.get() {
            return Err(NoteSyncError::Build("dispatch rejected".to_string()));
        }
        self.triggers.set(self.triggers.get() + 1);
        self.status.set(BuildStatus {
            running: true,
            ..self.status.get()
        });
        Ok(())
    }

    async fn status(&self) -> Result<BuildStatus> {
        self.status_queries.set(self.status_queries.get() + 1);
        Ok(self.status.get())
    }
}
