use thiserror::Error;

#[derive(Error, Debug)]
pub enum NoteSyncError {
    #[error("Note not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frontmatter error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Store error: {0}")]
    Store(String),

    /// The remote store rejected a write because the supplied version token
    /// no longer matches the stored revision.
    #[error("Version conflict on {path}: expected {expected}")]
    Conflict { path: String, expected: String },

    #[error("Rate limited by remote store")]
    RateLimited,

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Build pipeline error: {0}")]
    Build(String),

    #[error("Config error: {0}")]
    Config(#[from] confique::Error),

    #[error("Api Error: {0}")]
    Api(String),
}

pub type Result<T> = std::result::Result<T, NoteSyncError>;
