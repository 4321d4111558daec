// src/error.rs
use thiserror::Error;

/// Conditions that abort a run. Everything else (failed sources, dropped
/// records, validation issues) is reported as data.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no active sources configured")]
    NoSources,
    #[error("nothing to merge: {0}")]
    NothingToMerge(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
