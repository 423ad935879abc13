//! # Remote Store Client
//!
//! The authoritative, version-controlled store. It is slow and rate limited,
//! so this client does two things on top of the raw [`RemoteTransport`]:
//!
//! - **Conditional reads**: the validator of every body it has seen is kept
//!   per path and sent back on the next read. A "not modified" answer reuses
//!   the cached body instead of transferring it again.
//! - **Bounded batch reads**: [`RemoteStoreClient::batch_get_content`] fetches
//!   in rounds of `fetch_concurrency` requests with a fixed pause between
//!   rounds. This is the only intentional parallelism in the engine.
//!
//! ## Optimistic Concurrency
//!
//! Updates and deletes must carry the version token the caller last saw. The
//! store answers a stale token with [`NoteSyncError::Conflict`], which is
//! passed straight back to the caller.

use crate::config::EngineConfig;
use crate::error::{NoteSyncError, Result};
use crate::model::FileMeta;
use async_trait::async_trait;
use futures::future::join_all;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    NotModified,
    Content {
        bytes: Vec<u8>,
        validator: Option<String>,
    },
}

/// HTTP-level access to the remote store. Signing, auth and retries live
/// below this trait.
#[async_trait(?Send)]
pub trait RemoteTransport {
    async fn list(&self, directory: &str) -> Result<Vec<FileMeta>>;

    /// Conditional GET. A missing file is `Err(NotFound)`.
    async fn get(&self, path: &str, validator: Option<&str>) -> Result<FetchResponse>;

    /// Create (`version == None`) or replace a file. Returns the new version token.
    async fn put(&self, path: &str, bytes: &[u8], version: Option<&str>) -> Result<String>;

    async fn delete(&self, path: &str, version: &str) -> Result<()>;
}

struct CachedBody {
    validator: String,
    bytes: Vec<u8>,
}

pub struct RemoteStoreClient<T: RemoteTransport> {
    transport: T,
    bodies: RefCell<HashMap<String, CachedBody>>,
    concurrency: usize,
    batch_delay: Duration,
}

impl<T: RemoteTransport> RemoteStoreClient<T> {
    pub fn new(transport: T, config: &EngineConfig) -> Self {
        Self {
            transport,
            bodies: RefCell::new(HashMap::new()),
            concurrency: config.fetch_concurrency(),
            batch_delay: config.inter_batch_delay(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn list_files(&self, directory: &str) -> Result<Vec<FileMeta>> {
        self.transport.list(directory).await
    }

    pub async fn get_content(&self, path: &str) -> Result<Vec<u8>> {
        let validator = self
            .bodies
            .borrow()
            .get(path)
            .map(|cached| cached.validator.clone());

        match self.transport.get(path, validator.as_deref()).await? {
            FetchResponse::NotModified => self
                .bodies
                .borrow()
                .get(path)
                .map(|cached| cached.bytes.clone())
                .ok_or_else(|| {
                    NoteSyncError::Remote(format!("{} not modified but no cached body", path))
                }),
            FetchResponse::Content { bytes, validator } => {
                match validator {
                    Some(validator) => {
                        self.bodies.borrow_mut().insert(
                            path.to_string(),
                            CachedBody {
                                validator,
                                bytes: bytes.clone(),
                            },
                        );
                    }
                    None => {
                        self.bodies.borrow_mut().remove(path);
                    }
                }
                Ok(bytes)
            }
        }
    }

    /// Fetches many files in bounded rounds.
    ///
    /// Files that fail individually are logged and left out of the result;
    /// a rate-limit answer aborts the whole batch.
    pub async fn batch_get_content(&self, paths: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut contents = HashMap::with_capacity(paths.len());

        for (round, chunk) in paths.chunks(self.concurrency).enumerate() {
            if round > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }

            let results = join_all(
                chunk
                    .iter()
                    .map(|path| async move { (path, self.get_content(path).await) }),
            )
            .await;

            for (path, result) in results {
                match result {
                    Ok(bytes) => {
                        contents.insert(path.clone(), bytes);
                    }
                    Err(NoteSyncError::RateLimited) => {
                        tracing::warn!(path = %path, round, "rate limited, aborting batch fetch");
                        return Err(NoteSyncError::RateLimited);
                    }
                    Err(err) => {
                        tracing::warn!(path = %path, %err, "skipping file in batch fetch");
                    }
                }
            }
        }

        tracing::debug!(requested = paths.len(), fetched = contents.len(), "batch fetch done");
        Ok(contents)
    }

    pub async fn create(&self, path: &str, bytes: &[u8]) -> Result<String> {
        let token = self.transport.put(path, bytes, None).await?;
        self.bodies.borrow_mut().remove(path);
        tracing::info!(path, "created remote file");
        Ok(token)
    }

    pub async fn update(&self, path: &str, bytes: &[u8], version: &str) -> Result<String> {
        let token = self
            .transport
            .put(path, bytes, Some(version))
            .await
            .inspect_err(|err| log_write_failure(path, err))?;
        self.bodies.borrow_mut().remove(path);
        tracing::info!(path, "updated remote file");
        Ok(token)
    }

    pub async fn delete(&self, path: &str, version: &str) -> Result<()> {
        self.transport
            .delete(path, version)
            .await
            .inspect_err(|err| log_write_failure(path, err))?;
        self.bodies.borrow_mut().remove(path);
        tracing::info!(path, "deleted remote file");
        Ok(())
    }
}

fn log_write_failure(path: &str, err: &NoteSyncError) {
    if matches!(err, NoteSyncError::Conflict { .. }) {
        tracing::warn!(path, %err, "remote write rejected, version token is stale");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;

    fn client_with(concurrency: usize) -> RemoteStoreClient<FakeRemote> {
        let config = EngineConfig {
            fetch_concurrency: concurrency,
            inter_batch_delay_ms: 0,
            ..Default::default()
        };
        RemoteStoreClient::new(FakeRemote::new(), &config)
    }

    #[tokio::test]
    async fn repeated_reads_reuse_cached_body() {
        let client = client_with(5);
        client.transport().seed("notes/a.md", "alpha");

        assert_eq!(client.get_content("notes/a.md").await.unwrap(), b"alpha");
        assert_eq!(client.get_content("notes/a.md").await.unwrap(), b"alpha");

        assert_eq!(client.transport().full_transfers(), 1);
        assert_eq!(client.transport().not_modified_hits(), 1);
    }

    #[tokio::test]
    async fn changed_file_is_transferred_again() {
        let client = client_with(5);
        client.transport().seed("notes/a.md", "alpha");
        client.get_content("notes/a.md").await.unwrap();

        client.transport().seed("notes/a.md", "beta");
        assert_eq!(client.get_content("notes/a.md").await.unwrap(), b"beta");
        assert_eq!(client.transport().full_transfers(), 2);
    }

    #[tokio::test]
    async fn batch_respects_concurrency_limit() {
        let client = client_with(2);
        let mut paths = Vec::new();
        for i in 0..5 {
            let path = format!("notes/{}.md", i);
            client.transport().seed(&path, &format!("body {}", i));
            paths.push(path);
        }

        let contents = client.batch_get_content(&paths).await.unwrap();
        assert_eq!(contents.len(), 5);
        assert_eq!(contents["notes/3.md"], b"body 3");
        assert_eq!(client.transport().max_in_flight(), 2);
    }

    #[tokio::test]
    async fn batch_skips_individual_failures() {
        let client = client_with(5);
        client.transport().seed("notes/a.md", "alpha");

        let paths = vec!["notes/a.md".to_string(), "notes/missing.md".to_string()];
        let contents = client.batch_get_content(&paths).await.unwrap();
        assert_eq!(contents.len(), 1);
        assert!(contents.contains_key("notes/a.md"));
    }

    #[tokio::test]
    async fn batch_aborts_when_rate_limited() {
        let client = client_with(1);
        client.transport().seed("notes/a.md", "alpha");
        client.transport().seed("notes/b.md", "beta");
        client.transport().set_rate_limited(true);

        let paths = vec!["notes/a.md".to_string(), "notes/b.md".to_string()];
        let err = client.batch_get_content(&paths).await.unwrap_err();
        assert!(matches!(err, NoteSyncError::RateLimited));
    }

    #[tokio::test]
    async fn stale_token_is_a_conflict() {
        let client = client_with(5);
        let first = client.create("notes/a.md", b"one").await.unwrap();
        let second = client.update("notes/a.md", b"two", &first).await.unwrap();
        assert_ne!(first, second);

        let err = client.update("notes/a.md", b"three", &first).await.unwrap_err();
        assert!(matches!(err, NoteSyncError::Conflict { .. }));

        let err = client.delete("notes/a.md", &first).await.unwrap_err();
        assert!(matches!(err, NoteSyncError::Conflict { .. }));

        client.delete("notes/a.md", &second).await.unwrap();
        assert!(client.get_content("notes/a.md").await.is_err());
    }

    #[tokio::test]
    async fn create_over_existing_file_conflicts() {
        let client = client_with(5);
        client.transport().seed("notes/a.md", "alpha");
        let err = client.create("notes/a.md", b"again").await.unwrap_err();
        assert!(matches!(err, NoteSyncError::Conflict { .. }));
    }
}
