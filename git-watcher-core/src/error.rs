//! Error type for the synchronisation and publication engine.
//!
//! Every failure of the external `git` program carries the program's
//! combined output, since that output is the only diagnostic available.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, WatcherError>;

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("failed to spawn `{operation}`: {source}")]
    Spawn {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{operation}` failed with exit code {code:?}: {output}")]
    CommandFailed {
        operation: String,
        code: Option<i32>,
        output: String,
    },

    /// Both merge attempts failed. `first` is the output of the initial attempt.
    #[error("merging `{feature_branch}` into `{target_branch}` failed: {first} (retry: {retry})")]
    MergeFailed {
        feature_branch: String,
        target_branch: String,
        first: String,
        retry: String,
    },

    #[error("`{operation}` produced unexpected output: {output}")]
    UnexpectedOutput { operation: String, output: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact document {path} is not valid JSON: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("working copy {0} does not exist")]
    MissingWorkingCopy(PathBuf),

    #[error("invalid artifact reference: {0}")]
    InvalidArtifact(String),

    #[error("no artifacts repository is configured")]
    ArtifactsNotConfigured,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WatcherError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        WatcherError::Io {
            context: context.into(),
            source,
        }
    }

    /// Combined output of the failed git invocation, if this error came from one.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            WatcherError::CommandFailed { output, .. } => Some(output),
            WatcherError::MergeFailed { first, .. } => Some(first),
            _ => None,
        }
    }
}
