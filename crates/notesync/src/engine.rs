//! # Engine Facade
//!
//! [`NoteEngine`] is the single entry point a client talks to. It owns one of
//! each service and sequences them:
//!
//! - **Reads** go snapshot → drafts → edit cache. The snapshot gives the
//!   bulk of the list cheaply, [`merge_with_snapshot`] folds in pending
//!   mutations, and the edit cache overlays what was saved moments ago.
//! - **Writes** record a draft first, then go to the remote store. A remote
//!   failure is returned to the caller and the draft stays pending, so the
//!   list keeps showing the user's change until it either lands or expires.
//!   After a successful write the build pipeline is kicked.
//!
//! ## Generic Over Capabilities
//!
//! `NoteEngine<K, R, S, B>` is generic over the key-value store, the remote
//! transport, the snapshot transport and the build pipeline:
//! - Production: `FsStore` plus real HTTP transports
//! - Testing: `MemStore` with the fakes in [`crate::testing`]
//!
//! ## Scheduling
//!
//! The engine never starts timers. The host calls [`NoteEngine::tick`]
//! every `sweep_interval_secs`.

use crate::build::{BuildOutcome, BuildPipeline};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::drafts::{DraftLog, DraftOperation, SaveOutcome};
use crate::edit_cache::{EditCache, SweepReport};
use crate::error::{NoteSyncError, Result};
use crate::model::{id_from_path, new_note_id, path_for_id, Note};
use crate::parser::parse_content;
use crate::reconcile::merge_with_snapshot;
use crate::remote::{RemoteStoreClient, RemoteTransport};
use crate::snapshot::{SnapshotClient, SnapshotTransport};
use crate::store::KvStore;
use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::rc::Rc;

/// What one [`NoteEngine::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sweep: SweepReport,
    pub purged_drafts: usize,
    pub build: Option<BuildOutcome>,
}

pub struct NoteEngine<K, R, S, B>
where
    K: KvStore,
    R: RemoteTransport,
    S: SnapshotTransport,
    B: BuildPipeline,
{
    config: EngineConfig,
    clock: Rc<dyn Clock>,
    drafts: DraftLog<K>,
    edits: EditCache,
    snapshot: SnapshotClient<S>,
    remote: RemoteStoreClient<R>,
    builds: B,
    last_trigger: Cell<Option<DateTime<Utc>>>,
}

impl<K, R, S, B> NoteEngine<K, R, S, B>
where
    K: KvStore,
    R: RemoteTransport,
    S: SnapshotTransport,
    B: BuildPipeline,
{
    pub fn new(
        config: EngineConfig,
        clock: Rc<dyn Clock>,
        store: K,
        remote: R,
        snapshot: S,
        builds: B,
    ) -> Self {
        Self {
            drafts: DraftLog::new(store, clock.clone(), &config),
            edits: EditCache::new(clock.clone(), &config),
            snapshot: SnapshotClient::new(snapshot, config.notes_dir.clone()),
            remote: RemoteStoreClient::new(remote, &config),
            builds,
            last_trigger: Cell::new(None),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn drafts(&self) -> &DraftLog<K> {
        &self.drafts
    }

    pub fn edits(&self) -> &EditCache {
        &self.edits
    }

    pub fn snapshot(&self) -> &SnapshotClient<S> {
        &self.snapshot
    }

    pub fn remote(&self) -> &RemoteStoreClient<R> {
        &self.remote
    }

    pub fn builds(&self) -> &B {
        &self.builds
    }

    /// The reconciled note list. Never fails: with no snapshot at all the
    /// list is built from local state alone.
    pub async fn list_notes(&self) -> Vec<Note> {
        let base = match self.snapshot.get_index_or_last().await {
            Some(index) => self.snapshot.notes_from_index(&index),
            None => Vec::new(),
        };
        let merged = merge_with_snapshot(&self.drafts, &self.snapshot, base).await;
        self.edits.merge_with_notes(merged)
    }

    /// Read every note in `directory` straight from the remote store.
    pub async fn list_from_remote(&self, directory: &str) -> Result<Vec<Note>> {
        let ext = self.config.note_ext();
        let files: Vec<_> = self
            .remote
            .list_files(directory)
            .await?
            .into_iter()
            .filter(|file| file.path.ends_with(&ext))
            .collect();
        let paths: Vec<String> = files.iter().map(|file| file.path.clone()).collect();
        let contents = self.remote.batch_get_content(&paths).await?;

        let now = self.clock.now();
        let mut notes: Vec<Note> = files
            .into_iter()
            .filter_map(|file| {
                let bytes = contents.get(&file.path)?;
                let raw = String::from_utf8_lossy(bytes);
                Some(
                    Note::from_raw(&file.path, &raw, self.config.preview_length, now)
                        .with_version(file.sha),
                )
            })
            .collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));

        tracing::debug!(directory, count = notes.len(), "listed notes from remote");
        Ok(notes)
    }

    /// Save `raw` at `path`. With an `original` carrying a version token this
    /// is an update against that token, otherwise a create.
    pub async fn save_note(&self, path: &str, raw: &str, original: Option<&Note>) -> Result<Note> {
        let id = id_from_path(path);
        let token = original.and_then(|note| note.version.as_deref());
        let operation = match token {
            Some(_) => DraftOperation::Update,
            None => DraftOperation::Create,
        };

        self.record_draft(path, raw, operation, token);

        let bytes = raw.as_bytes();
        let committed = match token {
            Some(token) => self.remote.update(path, bytes, token).await?,
            None => self.remote.create(path, bytes).await?,
        };
        self.drafts.mark_committed(&id, &committed);

        let mut parsed = parse_content(raw, self.config.preview_length);
        if parsed.created_at.is_none() {
            parsed.created_at = original.map(|note| note.created_at);
        }
        let note =
            Note::from_parsed(path, raw, parsed, self.clock.now()).with_version(committed);

        self.edits.cache_edit(note.clone(), original.cloned());
        self.trigger_build().await;

        tracing::info!(id = %note.id, ?operation, "note saved");
        Ok(note)
    }

    /// Create a note under a fresh id in the notes directory.
    pub async fn create_note(&self, raw: &str) -> Result<Note> {
        let path = path_for_id(&self.config.notes_dir, &new_note_id(), &self.config.note_ext());
        self.save_note(&path, raw, None).await
    }

    pub async fn delete_note(&self, note: &Note) -> Result<()> {
        let token = note.version.as_deref().ok_or_else(|| {
            NoteSyncError::Api(format!("{} has no version token, save it first", note.path))
        })?;

        self.record_draft(&note.path, "", DraftOperation::Delete, Some(token));
        self.edits.remove_note(&note.id);

        self.remote.delete(&note.path, token).await?;
        self.trigger_build().await;

        tracing::info!(id = %note.id, "note deleted");
        Ok(())
    }

    /// Periodic housekeeping: edit-cache sweep, draft expiry and build polling.
    pub async fn tick(&self) -> TickReport {
        let sweep = self.edits.tick();
        let purged_drafts = self.drafts.purge_expired();

        let build = match self.edits.refresh_build_status(&self.builds).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(%err, "build status poll failed");
                None
            }
        };
        if build == Some(BuildOutcome::Success) {
            self.mark_built_drafts();
        }

        TickReport {
            sweep,
            purged_drafts,
            build,
        }
    }

    /// Drafts recorded after the last trigger were not part of that build.
    fn mark_built_drafts(&self) {
        let Some(triggered_at) = self.last_trigger.get() else {
            return;
        };
        for draft in self.drafts.get_all_drafts() {
            if !draft.compiled && draft.timestamp <= triggered_at {
                self.drafts.mark_compiled(&draft.id);
            }
        }
    }

    fn record_draft(&self, path: &str, raw: &str, operation: DraftOperation, token: Option<&str>) {
        if let SaveOutcome::PersistenceFailed(reason) =
            self.drafts.save_draft_at(path, raw, operation, token)
        {
            tracing::warn!(path, %reason, "continuing without a durable draft");
        }
    }

    async fn trigger_build(&self) {
        let now = self.clock.now();
        match self.builds.trigger().await {
            Ok(()) => self.last_trigger.set(Some(now)),
            Err(err) => tracing::warn!(%err, "build trigger failed"),
        }
    }
}
