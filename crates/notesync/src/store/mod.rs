//! # Local Persistence
//!
//! Drafts must survive a restart, so the draft log writes through a small
//! key-value capability, [`KvStore`]. The engine never assumes anything about
//! where the bytes land beyond get/set/remove/enumerate.
//!
//! ## Implementations
//!
//! - [`fs::FsStore`]: one file per key under a directory, atomic writes.
//! - [`memory::MemStore`]: in-process map for tests, with write-failure simulation.
//!
//! ## Layout used by the draft log
//!
//! ```text
//! draft_<noteId>   # JSON DraftEntry
//! draft_status     # JSON map: id -> {operation, timestamp, compiled}
//! ```

use crate::error::Result;

pub mod fs;
pub mod memory;

/// Abstract interface for raw key-value I/O.
///
/// Methods take `&self`: implementations handle their own interior
/// mutability, like the rest of the single-threaded engine.
pub trait KvStore {
    /// Returns `Ok(None)` when the key does not exist.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value under `key`. Must not leave a partial value behind.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored, in no particular order.
    fn keys(&self) -> Result<Vec<String>>;
}

impl<T: KvStore + ?Sized> KvStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }
}
