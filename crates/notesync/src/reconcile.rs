//! # Reconciliation
//!
//! Folds the Draft Log into a list of notes read from the snapshot, so the
//! user always sees their own pending mutations:
//!
//! - a draft whose change the snapshot has absorbed is retired and the
//!   snapshot's copy is kept;
//! - a `create` replaces the same id, or is inserted at the front;
//! - an `update` replaces the entry with the same id or the same version
//!   token, or is inserted at the front;
//! - a `delete` removes every entry with the same id or version token.
//!
//! Drafts are applied newest first, and front insertions keep that order. For
//! a fixed snapshot and draft set the result is always the same.

use crate::drafts::{DraftEntry, DraftLog, DraftOperation};
use crate::model::Note;
use crate::snapshot::{SnapshotClient, SnapshotTransport};
use crate::store::KvStore;

pub async fn merge_with_snapshot<K: KvStore, T: SnapshotTransport>(
    drafts: &DraftLog<K>,
    snapshot: &SnapshotClient<T>,
    snapshot_notes: Vec<Note>,
) -> Vec<Note> {
    let mut notes = snapshot_notes;
    let mut inserted = 0;

    for draft in drafts.get_all_drafts() {
        if drafts
            .check_snapshot_caught_up(snapshot, &draft.id, draft.timestamp)
            .await
        {
            continue;
        }

        match draft.operation {
            DraftOperation::Create | DraftOperation::Update => {
                let Some(note) = draft.to_note() else {
                    tracing::warn!(id = %draft.id, "draft has no parsed note, skipping");
                    continue;
                };
                let position = if draft.operation == DraftOperation::Create {
                    notes.iter().position(|n| n.id == draft.id)
                } else {
                    notes.iter().position(|n| matches_draft(n, &draft))
                };
                match position {
                    Some(index) => notes[index] = note,
                    None => {
                        notes.insert(inserted, note);
                        inserted += 1;
                    }
                }
            }
            DraftOperation::Delete => {
                let mut index = 0;
                let mut removed_front = 0;
                notes.retain(|n| {
                    let keep = !matches_draft(n, &draft);
                    if !keep && index < inserted {
                        removed_front += 1;
                    }
                    index += 1;
                    keep
                });
                inserted -= removed_front;
            }
        }
    }

    notes
}

fn matches_draft(note: &Note, draft: &DraftEntry) -> bool {
    note.id == draft.id
        || matches!(
            (&note.version, &draft.version_token),
            (Some(a), Some(b)) if a == b
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::store::memory::MemStore;
    use crate::testing::FakeSnapshot;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::rc::Rc;

    struct Fixture {
        clock: Rc<ManualClock>,
        drafts: DraftLog<MemStore>,
        snapshot: SnapshotClient<FakeSnapshot>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let clock = Rc::new(ManualClock::new(t0()));
        Fixture {
            drafts: DraftLog::new(MemStore::new(), clock.clone(), &EngineConfig::default()),
            snapshot: SnapshotClient::new(FakeSnapshot::new(), "notes"),
            clock,
        }
    }

    fn snapshot_note(id: &str, body: &str, version: &str) -> Note {
        Note::from_raw(&format!("notes/{}.md", id), body, 200, t0() - Duration::days(1))
            .with_version(version)
    }

    async fn merge(f: &Fixture, notes: Vec<Note>) -> Vec<Note> {
        merge_with_snapshot(&f.drafts, &f.snapshot, notes).await
    }

    #[tokio::test]
    async fn merging_twice_gives_the_same_list() {
        let f = fixture();
        f.drafts.save_draft("a", "new a", DraftOperation::Update, Some("va"));
        f.clock.advance(Duration::seconds(1));
        f.drafts.save_draft("c", "brand new", DraftOperation::Create, None);
        let base = vec![snapshot_note("a", "old a", "va"), snapshot_note("b", "b", "vb")];

        let first = merge(&f, base.clone()).await;
        let second = merge(&f, base).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn pending_update_wins_over_snapshot() {
        let f = fixture();
        f.drafts.save_draft("a", "new", DraftOperation::Update, Some("va"));

        let merged = merge(&f, vec![snapshot_note("a", "old", "va")]).await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[0].body, "new");
    }

    #[tokio::test]
    async fn update_matches_by_version_token() {
        let f = fixture();
        f.drafts.save_draft("renamed", "new", DraftOperation::Update, Some("va"));

        let merged = merge(&f, vec![snapshot_note("a", "old", "va")]).await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "renamed");
    }

    #[tokio::test]
    async fn clearing_a_note_replaces_the_snapshot_copy() {
        let f = fixture();
        f.drafts.save_draft("a", "", DraftOperation::Update, Some("va"));

        let merged = merge(&f, vec![snapshot_note("a", "old text", "va")]).await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "a");
        assert!(merged[0].body.is_empty());
        assert!(merged[0].preview.is_empty());
    }

    #[tokio::test]
    async fn unmatched_update_goes_to_the_front() {
        let f = fixture();
        f.drafts.save_draft("c", "fresh", DraftOperation::Update, Some("vc"));

        let base = vec![snapshot_note("a", "a", "va"), snapshot_note("b", "b", "vb")];
        let merged = merge(&f, base).await;
        let ids: Vec<&str> = merged.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(merged[0].body, "fresh");
    }

    #[tokio::test]
    async fn delete_matches_by_version_token() {
        let f = fixture();
        // Still in the snapshot, so the delete has not caught up.
        f.snapshot
            .transport()
            .publish_note("renamed", "a", t0() - Duration::days(1), Some(t0() - Duration::days(1)));
        f.drafts.save_draft("renamed", "", DraftOperation::Delete, Some("va"));

        let base = vec![snapshot_note("a", "a", "va"), snapshot_note("b", "b", "vb")];
        let merged = merge(&f, base).await;
        let ids: Vec<&str> = merged.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn pending_delete_hides_note() {
        let f = fixture();
        f.snapshot
            .transport()
            .publish_note("a", "a", t0() - Duration::days(1), Some(t0() - Duration::days(1)));
        f.drafts.save_draft("a", "", DraftOperation::Delete, Some("va"));

        let merged = merge(&f, vec![snapshot_note("a", "a", "va"), snapshot_note("b", "b", "vb")]).await;
        let ids: Vec<&str> = merged.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        assert!(f.drafts.has_draft("a"));
    }

    #[tokio::test]
    async fn creates_go_to_the_front_newest_first() {
        let f = fixture();
        f.drafts.save_draft("first", "1", DraftOperation::Create, None);
        f.clock.advance(Duration::seconds(1));
        f.drafts.save_draft("second", "2", DraftOperation::Create, None);

        let merged = merge(&f, vec![snapshot_note("old", "o", "vo")]).await;
        let ids: Vec<&str> = merged.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["second", "first", "old"]);
    }

    #[tokio::test]
    async fn caught_up_draft_is_retired() {
        let f = fixture();
        f.drafts.save_draft("a", "new", DraftOperation::Update, Some("va"));
        f.snapshot
            .transport()
            .publish_note("a", "a", t0(), Some(t0() + Duration::seconds(30)));

        let from_snapshot = snapshot_note("a", "compiled", "vb");
        let merged = merge(&f, vec![from_snapshot.clone()]).await;
        assert_eq!(merged, vec![from_snapshot]);
        assert!(f.drafts.get_all_drafts().is_empty());
    }

    #[tokio::test]
    async fn create_then_catch_up_end_to_end() {
        let f = fixture();
        f.drafts.save_draft(
            "n1",
            "---\ntags: [x, y]\n---\nShopping list",
            DraftOperation::Create,
            None,
        );

        let merged = merge(&f, Vec::new()).await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "n1");
        assert_eq!(merged[0].tags.iter().cloned().collect::<Vec<_>>(), vec!["x", "y"]);

        let draft_ts = f.drafts.get_draft("n1").unwrap().timestamp;
        f.snapshot
            .transport()
            .publish_note("n1", "Shopping list", draft_ts, Some(draft_ts + Duration::seconds(5)));
        assert!(
            f.drafts
                .check_snapshot_caught_up(&f.snapshot, "n1", draft_ts)
                .await
        );

        let index = f.snapshot.get_index().await.unwrap().unwrap();
        let from_snapshot = f.snapshot.notes_from_index(&index);
        let merged = merge(&f, from_snapshot.clone()).await;
        assert_eq!(merged, from_snapshot);
        assert!(!f.drafts.has_draft("n1"));
    }
}
