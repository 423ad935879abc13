//! # Notesync Architecture
//!
//! Notesync is the **reconciliation engine** of a note-taking client whose
//! documents live in three tiers at once:
//!
//! 1. an authoritative remote store (slow, rate limited, version controlled),
//! 2. a compiled snapshot rebuilt by an external build pipeline (fast, stale),
//! 3. local edits that have not reached either of them yet.
//!
//! The engine turns those into one list the user can trust: their own changes
//! are always visible, and every local trace of a change is retired once the
//! snapshot shows it.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Engine (engine.rs)                                         │
//! │  - Single entry point: list, save, delete, tick             │
//! │  - Sequences drafts, remote writes and build triggers       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Local state (drafts.rs, edit_cache.rs, reconcile.rs)       │
//! │  - Durable draft log with TTL and catch-up retirement       │
//! │  - In-memory edit cache with build flags                    │
//! │  - The merge of drafts into snapshot lists                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Capabilities (store/, remote.rs, snapshot.rs, build.rs)    │
//! │  - KvStore: MemStore (testing), FsStore (production)        │
//! │  - Remote, snapshot and build transports supplied by host   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Principle: The Host Owns I/O and Time
//!
//! Nothing in this crate opens sockets, spawns tasks or starts timers.
//! Transports come in through traits, time through [`clock::Clock`], and
//! periodic work runs when the host calls [`engine::NoteEngine::tick`].
//! Everything is single-threaded: services use `RefCell` and are not `Sync`.
//!
//! ## Logging
//!
//! Events are emitted through `tracing`. The crate never installs a
//! subscriber; that is the host's call.
//!
//! ## Module Overview
//!
//! - [`engine`]: The facade, entry point for all operations
//! - [`drafts`]: Pending mutations, persisted through a [`store::KvStore`]
//! - [`edit_cache`]: Freshly saved notes awaiting a build
//! - [`reconcile`]: Folding drafts into a snapshot list
//! - [`snapshot`]: Reads from the compiled snapshot
//! - [`remote`]: Reads and writes against the authoritative store
//! - [`build`]: The build pipeline capability
//! - [`store`]: Key-value persistence and implementations
//! - [`model`]: Core data types (`Note`, `NoteMetadata`, `Visibility`)
//! - [`parser`]: Frontmatter, title and preview extraction
//! - [`tags`]: Tag normalization
//! - [`config`]: Configuration management
//! - [`clock`]: Time source
//! - [`error`]: Error types

pub mod build;
pub mod clock;
pub mod config;
pub mod drafts;
pub mod edit_cache;
pub mod engine;
pub mod error;
pub mod model;
pub mod parser;
pub mod reconcile;
pub mod remote;
pub mod snapshot;
pub mod store;
pub mod tags;

#[cfg(any(test, feature = "test_utils"))]
pub mod testing;
