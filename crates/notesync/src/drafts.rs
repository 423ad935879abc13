//! # Draft Log
//!
//! A durable, per-note record of mutations the user made locally that the
//! snapshot has not yet caught up with. It is what lets a freshly saved note
//! show up in the list immediately, and a freshly deleted one disappear,
//! while the build pipeline is still catching up.
//!
//! ## Lifecycle
//!
//! ```text
//! save_draft ──► pending ──► snapshot caught up ──► removed
//!                   │
//!                   └──────► older than TTL ──────► removed
//! ```
//!
//! - At most one entry per note id; saving again replaces it.
//! - "Caught up" means: for create/update, the snapshot has the note with a
//!   compiled timestamp strictly after the draft; for delete, the snapshot no
//!   longer has the note.
//! - Expired entries are removed lazily, whenever a read touches them.
//!
//! ## Failure Model
//!
//! The draft log must never take the app down. Writes report
//! [`SaveOutcome::PersistenceFailed`] instead of erroring, reads treat
//! unreadable or corrupt entries as absent, and all of it is logged.
//!
//! ## Catch-up Backoff
//!
//! A catch-up check that fails to reach the snapshot puts the note into
//! exponential backoff (`base * 2^(failures - 1)`, capped). Until the retry
//! instant passes, checks answer "not caught up" without a request.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::{id_from_path, path_for_id, Note};
use crate::snapshot::{SnapshotClient, SnapshotTransport};
use crate::store::KvStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

pub const DRAFT_PREFIX: &str = "draft_";
pub const STATUS_KEY: &str = "draft_status";

pub fn draft_key(id: &str) -> String {
    format!("{}{}", DRAFT_PREFIX, id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftEntry {
    pub id: String,
    pub operation: DraftOperation,
    /// Remote path of the note.
    #[serde(default)]
    pub path: String,
    /// Raw note text; empty for deletes.
    #[serde(default)]
    pub body: String,
    /// The body parsed into a note. Always present for creates and updates,
    /// even when the body is empty.
    #[serde(default)]
    pub note: Option<Note>,
    /// Token of the revision this draft mutates.
    #[serde(default)]
    pub version_token: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub compiled: bool,
    /// Token the remote store returned once the mutation was committed.
    #[serde(default)]
    pub committed_token: Option<String>,
}

impl DraftEntry {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.timestamp > ttl
    }

    /// The note this draft wants displayed, carrying the freshest known token.
    pub fn to_note(&self) -> Option<Note> {
        let mut note = self.note.clone()?;
        note.version = self
            .committed_token
            .clone()
            .or_else(|| self.version_token.clone());
        Some(note)
    }
}

/// Side-index entry kept under [`STATUS_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftStatus {
    pub operation: DraftOperation,
    pub timestamp: DateTime<Utc>,
    pub compiled: bool,
}

impl From<&DraftEntry> for DraftStatus {
    fn from(entry: &DraftEntry) -> Self {
        Self {
            operation: entry.operation,
            timestamp: entry.timestamp,
            compiled: entry.compiled,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DraftStats {
    pub total: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub compiled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    PersistenceFailed(String),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved)
    }
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    retry_at: DateTime<Utc>,
}

pub struct DraftLog<K: KvStore> {
    store: K,
    clock: Rc<dyn Clock>,
    ttl: Duration,
    preview_length: usize,
    notes_dir: String,
    note_ext: String,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    backoff: RefCell<HashMap<String, Backoff>>,
}

impl<K: KvStore> DraftLog<K> {
    pub fn new(store: K, clock: Rc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            store,
            clock,
            ttl: config.draft_ttl(),
            preview_length: config.preview_length,
            notes_dir: config.notes_dir.clone(),
            note_ext: config.note_ext(),
            backoff_base_ms: config.catch_up_backoff_base_ms,
            backoff_max_ms: config.catch_up_backoff_max_ms,
            backoff: RefCell::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &K {
        &self.store
    }

    /// Record a pending mutation for `id`, replacing any earlier one. The
    /// note is assumed to live in the configured notes directory.
    pub fn save_draft(
        &self,
        id: &str,
        body: &str,
        operation: DraftOperation,
        version_token: Option<&str>,
    ) -> SaveOutcome {
        let path = path_for_id(&self.notes_dir, id, &self.note_ext);
        self.record(id, &path, body, operation, version_token)
    }

    /// Like [`save_draft`](Self::save_draft) for a note whose path is known.
    /// The id is the file stem of `path`.
    pub fn save_draft_at(
        &self,
        path: &str,
        body: &str,
        operation: DraftOperation,
        version_token: Option<&str>,
    ) -> SaveOutcome {
        self.record(&id_from_path(path), path, body, operation, version_token)
    }

    fn record(
        &self,
        id: &str,
        path: &str,
        body: &str,
        operation: DraftOperation,
        version_token: Option<&str>,
    ) -> SaveOutcome {
        let now = self.clock.now();
        let (body, note) = match operation {
            DraftOperation::Delete => (String::new(), None),
            DraftOperation::Create | DraftOperation::Update => {
                let mut note = Note::from_raw(path, body, self.preview_length, now);
                note.id = id.to_string();
                (body.to_string(), Some(note))
            }
        };

        let entry = DraftEntry {
            id: id.to_string(),
            operation,
            path: path.to_string(),
            body,
            note,
            version_token: version_token.map(str::to_string),
            timestamp: now,
            compiled: false,
            committed_token: None,
        };

        match self.persist(&entry) {
            Ok(()) => {
                self.backoff.borrow_mut().remove(id);
                tracing::debug!(id, ?operation, "draft saved");
                SaveOutcome::Saved
            }
            Err(err) => {
                tracing::warn!(id, ?operation, %err, "failed to persist draft");
                SaveOutcome::PersistenceFailed(err.to_string())
            }
        }
    }

    pub fn get_draft(&self, id: &str) -> Option<DraftEntry> {
        let entry = self.read_entry(id)?;
        if entry.is_expired(self.clock.now(), self.ttl) {
            tracing::debug!(id, "draft expired");
            self.remove_draft(id);
            return None;
        }
        Some(entry)
    }

    /// Every live draft, newest first. Expired entries are removed on the way.
    pub fn get_all_drafts(&self) -> Vec<DraftEntry> {
        let (live, expired) = self.scan();
        for id in &expired {
            self.remove_draft(id);
        }
        live
    }

    /// Drop every expired draft. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let (_, expired) = self.scan();
        for id in &expired {
            self.remove_draft(id);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "purged expired drafts");
        }
        expired.len()
    }

    pub fn remove_draft(&self, id: &str) {
        if let Err(err) = self.store.remove(&draft_key(id)) {
            tracing::warn!(id, %err, "failed to remove draft");
        }
        let mut status = self.load_status();
        if status.remove(id).is_some() {
            self.save_status(&status);
        }
        self.backoff.borrow_mut().remove(id);
    }

    pub fn has_draft(&self, id: &str) -> bool {
        self.get_draft(id).is_some()
    }

    pub fn get_draft_operation(&self, id: &str) -> Option<DraftOperation> {
        self.get_draft(id).map(|entry| entry.operation)
    }

    /// Flag the draft as seen by a finished build, keeping it in the log.
    pub fn mark_compiled(&self, id: &str) -> bool {
        self.modify(id, |entry| entry.compiled = true)
    }

    pub fn mark_committed(&self, id: &str, token: &str) -> bool {
        self.modify(id, |entry| entry.committed_token = Some(token.to_string()))
    }

    /// Counts answered from the side index alone.
    pub fn stats(&self) -> DraftStats {
        let now = self.clock.now();
        let mut stats = DraftStats::default();
        for status in self.load_status().values() {
            if now - status.timestamp > self.ttl {
                continue;
            }
            stats.total += 1;
            match status.operation {
                DraftOperation::Create => stats.creates += 1,
                DraftOperation::Update => stats.updates += 1,
                DraftOperation::Delete => stats.deletes += 1,
            }
            if status.compiled {
                stats.compiled += 1;
            }
        }
        stats
    }

    /// Ask the snapshot whether it has absorbed the draft for `id`, retiring
    /// the draft when it has.
    pub async fn check_snapshot_caught_up<T: SnapshotTransport>(
        &self,
        snapshot: &SnapshotClient<T>,
        id: &str,
        draft_timestamp: DateTime<Utc>,
    ) -> bool {
        let now = self.clock.now();
        let retry_at = self.backoff.borrow().get(id).map(|b| b.retry_at);
        if let Some(retry_at) = retry_at {
            if now < retry_at {
                tracing::debug!(id, %retry_at, "catch-up check backing off");
                return false;
            }
        }

        let operation = self
            .get_draft_operation(id)
            .unwrap_or(DraftOperation::Update);
        let result = match operation {
            DraftOperation::Delete => snapshot.get_note(id).await.map(|meta| meta.is_none()),
            DraftOperation::Create | DraftOperation::Update => {
                snapshot.note_compiled_after(id, draft_timestamp).await
            }
        };

        match result {
            Ok(caught_up) => {
                self.backoff.borrow_mut().remove(id);
                if caught_up {
                    tracing::info!(id, ?operation, "snapshot caught up, retiring draft");
                    self.remove_draft(id);
                }
                caught_up
            }
            Err(err) => {
                let backoff = self.record_failure(id, now);
                tracing::warn!(
                    id,
                    %err,
                    failures = backoff.failures,
                    retry_at = %backoff.retry_at,
                    "catch-up check failed"
                );
                false
            }
        }
    }

    fn record_failure(&self, id: &str, now: DateTime<Utc>) -> Backoff {
        let mut backoffs = self.backoff.borrow_mut();
        let failures = backoffs.get(id).map_or(0, |b| b.failures) + 1;
        let factor = 1u64.checked_shl(failures - 1).unwrap_or(u64::MAX);
        let delay_ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        let backoff = Backoff {
            failures,
            retry_at: now
                .checked_add_signed(Duration::milliseconds(
                    i64::try_from(delay_ms).unwrap_or(i64::MAX),
                ))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        backoffs.insert(id.to_string(), backoff);
        backoff
    }

    fn modify(&self, id: &str, change: impl FnOnce(&mut DraftEntry)) -> bool {
        let Some(mut entry) = self.get_draft(id) else {
            return false;
        };
        change(&mut entry);
        match self.persist(&entry) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(id, %err, "failed to update draft");
                false
            }
        }
    }

    fn scan(&self) -> (Vec<DraftEntry>, Vec<String>) {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(%err, "failed to enumerate drafts");
                return (Vec::new(), Vec::new());
            }
        };

        let now = self.clock.now();
        let mut live = Vec::new();
        let mut expired = Vec::new();
        for key in keys {
            if key == STATUS_KEY {
                continue;
            }
            let Some(id) = key.strip_prefix(DRAFT_PREFIX) else {
                continue;
            };
            let Some(entry) = self.read_entry(id) else {
                continue;
            };
            if entry.is_expired(now, self.ttl) {
                expired.push(entry.id);
            } else {
                live.push(entry);
            }
        }

        live.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
        (live, expired)
    }

    fn read_entry(&self, id: &str) -> Option<DraftEntry> {
        let raw = match self.store.get(&draft_key(id)) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(id, %err, "failed to read draft");
                return None;
            }
        };
        match serde_json::from_str::<DraftEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(id, %err, "skipping malformed draft");
                None
            }
        }
    }

    fn persist(&self, entry: &DraftEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        self.store.set(&draft_key(&entry.id), &json)?;

        let mut status = self.load_status();
        status.insert(entry.id.clone(), DraftStatus::from(entry));
        self.save_status(&status);
        Ok(())
    }

    fn load_status(&self) -> BTreeMap<String, DraftStatus> {
        match self.store.get(STATUS_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(%err, "draft status index is corrupt, rebuilding");
                BTreeMap::new()
            }),
            Ok(None) => BTreeMap::new(),
            Err(err) => {
                tracing::warn!(%err, "failed to read draft status index");
                BTreeMap::new()
            }
        }
    }

    // The side index only feeds statistics; losing a write is logged, not fatal.
    fn save_status(&self, status: &BTreeMap<String, DraftStatus>) {
        let result = serde_json::to_string(status)
            .map_err(Into::into)
            .and_then(|json| self.store.set(STATUS_KEY, &json));
        if let Err(err) = result {
            tracing::warn!(%err, "failed to write draft status index");
        }
    }
}
