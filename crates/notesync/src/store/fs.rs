use super::KvStore;
use crate::error::{NoteSyncError, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const VALUE_EXT: &str = ".json";

/// File-backed key-value store: one `<key>.json` file per key.
///
/// Keys are percent-encoded into file names so note ids containing path
/// separators cannot escape the root directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// OS-appropriate data directory, e.g. `~/.local/share/notesync/drafts`.
    pub fn default_location() -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "notesync").ok_or_else(|| {
            NoteSyncError::Store("No home directory to place local drafts in".to_string())
        })?;
        Ok(Self::new(dirs.data_dir().join("drafts")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
        }
        Ok(())
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", encode_key(key), VALUE_EXT))
    }
}

impl KvStore for FsStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_dir()?;

        // Atomic write
        let tmp_path = self.root.join(format!(".kv-{}.tmp", Uuid::new_v4()));
        fs::write(&tmp_path, value)?;
        fs::rename(&tmp_path, self.key_path(key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(encoded) = name.strip_suffix(VALUE_EXT) {
                if let Some(key) = decode_key(encoded) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

/// Percent-encodes `key` into a file stem. A leading `.` is escaped too so
/// no key turns into a dotfile that `keys()` would skip.
fn encode_key(key: &str) -> String {
    let encoded = urlencoding::encode(key);
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    }
}

fn decode_key(encoded: &str) -> Option<String> {
    urlencoding::decode(encoded).ok().map(|key| key.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_values_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("drafts"));

        assert!(store.get("draft_n1").unwrap().is_none());
        store.set("draft_n1", "{\"a\":1}").unwrap();
        assert_eq!(store.get("draft_n1").unwrap().as_deref(), Some("{\"a\":1}"));

        store.set("draft_n1", "{\"a\":2}").unwrap();
        assert_eq!(store.get("draft_n1").unwrap().as_deref(), Some("{\"a\":2}"));

        store.remove("draft_n1").unwrap();
        assert!(store.get("draft_n1").unwrap().is_none());
    }

    #[test]
    fn keys_survive_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store.set("draft_a/b c.md", "1").unwrap();
        store.set("draft_status", "{}").unwrap();

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["draft_a/b c.md", "draft_status"]);
        assert!(!dir.path().join("b c.md.json").exists());
    }

    #[test]
    fn dotted_keys_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store.set(".profile", "1").unwrap();
        store.set("v1.2", "2").unwrap();

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec![".profile", "v1.2"]);
        assert_eq!(store.get(".profile").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn keys_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("never-created"));
        assert!(store.keys().unwrap().is_empty());
        store.remove("anything").unwrap();
    }

    #[test]
    fn key_encoding_roundtrip() {
        for key in ["plain", "draft_n1", "a/b", "ünï", "50%", ".hidden", "a.b"] {
            assert_eq!(decode_key(&encode_key(key)).as_deref(), Some(key));
        }
    }
}
