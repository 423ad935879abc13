//! # Edit Cache
//!
//! In-memory staging area for notes the user just saved. The snapshot only
//! reflects a save after the build pipeline has run, so for that window the
//! cached copy is what gets shown, flagged as `building`.
//!
//! ## Keys
//!
//! Entries are keyed by [`Note::cache_key`]: the version token when the note
//! has one, otherwise its path, otherwise its id.
//!
//! ## Sweeping
//!
//! Nothing here runs on its own. The host calls [`EditCache::tick`] on its
//! own schedule, which drops entries older than the cache TTL and entries
//! that have been `building` longer than the build timeout. A build that
//! never reports back is treated as abandoned.

use crate::build::{BuildOutcome, BuildPipeline};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::Note;
use chrono::{DateTime, Duration, Utc};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEdit {
    pub note: Note,
    /// The note as it was before the edit.
    pub original: Option<Note>,
    pub building: bool,
    pub build_started_at: Option<DateTime<Utc>>,
    pub cached_at: DateTime<Utc>,
}

impl CachedEdit {
    /// Does this entry stand in for `base` in a merged list?
    fn covers(&self, key: &str, base: &Note) -> bool {
        base.cache_key() == key
            || base.same_note(&self.note)
            || self
                .original
                .as_ref()
                .is_some_and(|original| base.same_note(original))
    }

    fn build_timed_out(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.building
            && self
                .build_started_at
                .is_some_and(|started| now - started > timeout)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub timed_out: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.timed_out
    }
}

pub struct EditCache {
    entries: RefCell<HashMap<String, CachedEdit>>,
    clock: Rc<dyn Clock>,
    cache_ttl: Duration,
    build_timeout: Duration,
}

impl EditCache {
    pub fn new(clock: Rc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            clock,
            cache_ttl: config.cache_ttl(),
            build_timeout: config.build_timeout(),
        }
    }

    /// Stage `edited`, replacing any entry under the same key. Returns the key.
    pub fn cache_edit(&self, edited: Note, original: Option<Note>) -> String {
        let now = self.clock.now();
        let key = edited.cache_key();
        tracing::debug!(key = %key, id = %edited.id, "caching edit");
        self.entries.borrow_mut().insert(
            key.clone(),
            CachedEdit {
                note: edited,
                original,
                building: true,
                build_started_at: Some(now),
                cached_at: now,
            },
        );
        key
    }

    pub fn mark_build_completed(&self, key: &str, final_note: Note) -> bool {
        match self.entries.borrow_mut().get_mut(key) {
            Some(entry) => {
                entry.note = final_note;
                entry.building = false;
                true
            }
            None => false,
        }
    }

    pub fn update_build_status(&self, key: &str, building: bool) -> bool {
        let now = self.clock.now();
        match self.entries.borrow_mut().get_mut(key) {
            Some(entry) => {
                if building && !entry.building {
                    entry.build_started_at = Some(now);
                }
                entry.building = building;
                true
            }
            None => false,
        }
    }

    /// Overlay cached edits on `base`, newest update first.
    pub fn merge_with_notes(&self, base: Vec<Note>) -> Vec<Note> {
        let entries = self.entries.borrow();

        let mut cached: Vec<(&String, &CachedEdit)> = entries.iter().collect();
        cached.sort_by(|(ka, a), (kb, b)| b.cached_at.cmp(&a.cached_at).then(ka.cmp(kb)));

        let mut merged: Vec<Note> = Vec::with_capacity(cached.len() + base.len());
        for (_, entry) in &cached {
            if !merged.iter().any(|note| note.same_note(&entry.note)) {
                merged.push(entry.note.clone());
            }
        }
        merged.extend(
            base.into_iter()
                .filter(|note| !cached.iter().any(|(key, entry)| entry.covers(key, note))),
        );

        merged.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        merged
    }

    pub fn is_building(&self, key: &str) -> bool {
        self.entries
            .borrow()
            .get(key)
            .is_some_and(|entry| entry.building)
    }

    pub fn has_building_entries(&self) -> bool {
        self.entries.borrow().values().any(|entry| entry.building)
    }

    pub fn get(&self, key: &str) -> Option<CachedEdit> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<CachedEdit> {
        self.entries.borrow_mut().remove(key)
    }

    /// Drop every entry for note `id`, whatever key it sits under.
    pub fn remove_note(&self, id: &str) -> usize {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, entry| entry.note.id != id);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn tick(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        self.entries.borrow_mut().retain(|key, entry| {
            if now - entry.cached_at > self.cache_ttl {
                tracing::debug!(key = %key, "edit cache entry expired");
                report.expired += 1;
                return false;
            }
            if entry.build_timed_out(now, self.build_timeout) {
                tracing::warn!(key = %key, id = %entry.note.id, "build timed out, dropping cached edit");
                report.timed_out += 1;
                return false;
            }
            true
        });

        if report.removed() > 0 {
            tracing::info!(
                expired = report.expired,
                timed_out = report.timed_out,
                "edit cache sweep"
            );
        }
        report
    }

    /// Ask the pipeline how the build is going while anything is building.
    /// Once no build is running every entry is released and the last outcome
    /// returned; otherwise `None`.
    pub async fn refresh_build_status<P: BuildPipeline + ?Sized>(
        &self,
        pipeline: &P,
    ) -> Result<Option<BuildOutcome>> {
        if !self.has_building_entries() {
            return Ok(None);
        }

        let status = pipeline.status().await?;
        if status.running {
            tracing::debug!("build still running");
            return Ok(None);
        }

        let mut released = 0;
        for entry in self.entries.borrow_mut().values_mut() {
            if entry.building {
                entry.building = false;
                released += 1;
            }
        }
        tracing::info!(outcome = ?status.last_outcome, released, "build finished");
        Ok(Some(status.last_outcome))
    }
}
