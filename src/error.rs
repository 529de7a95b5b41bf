//! Error types for profile capture, persistence and rendering

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Errors that can occur while recording or post-processing profiles
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to create output directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profile data in {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported profile format version in {path}: expected {expected}, found {found}")]
    UnsupportedVersion {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("Failed to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Render pipeline stage `{stage}` failed with {status}")]
    PipelineFailed { stage: String, status: ExitStatus },

    #[error("Cannot merge an empty list of profiles")]
    NothingToMerge,
}

/// Result type for profiling operations
pub type Result<T> = std::result::Result<T, ProfileError>;

impl ProfileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
