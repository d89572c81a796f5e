use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the download watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to trigger download: {0}")]
    Launch(#[source] io::Error),
    #[error("download wait cancelled")]
    Cancelled,
    #[error("no completed download appeared within {waited:?}")]
    TimedOut { waited: Duration },
}

impl WatchError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        WatchError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Failures of an external step tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("'{program}' exited with {}: {stderr}", exit_label(*code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("tool reported success but produced no file at {}", path.display())]
    MissingOutput { path: PathBuf },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Failures resolving a catalogued episode.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no catalog is configured")]
    NotConfigured,
    #[error("invalid catalog pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("no file in the catalog matches '{pattern}'")]
    NotFound { pattern: String },
}
