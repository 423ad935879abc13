//! The external pipeline that compiles the remote store into the snapshot.
//! The engine only ever kicks it and asks how it is doing.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildOutcome {
    Success,
    Failure,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildStatus {
    pub running: bool,
    pub last_outcome: BuildOutcome,
}

#[async_trait(?Send)]
pub trait BuildPipeline {
    /// Request a rebuild. Returns once the request is accepted, not when the build ends.
    async fn trigger(&self) -> Result<()>;

    async fn status(&self) -> Result<BuildStatus>;
}
