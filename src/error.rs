//! Error types shared by the extractor backends, the orchestrator and the
//! media library.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phrases in delegate output that point at network or IP blocking.
const BLOCKED_MARKERS: &[&str] = &["blocked", "timed out", "timeout", "403", "404"];

/// Errors raised by an [`Extractor`](crate::extractor::Extractor)
/// implementation.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("required program {program} is not available: {detail}")]
    DependencyMissing { program: String, detail: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),

    #[error("extractor returned unreadable output: {0}")]
    InvalidOutput(String),
}

/// Rejected [`DownloadRequest`](crate::model::DownloadRequest) input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("URL must not be empty")]
    EmptyUrl,

    #[error("URL must not start with '-': {0}")]
    OptionLikeUrl(String),

    #[error("item limit must be a positive integer")]
    ZeroLimit,
}

/// Errors from file-management operations on the downloads directory.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("building archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl LibraryError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Caller-facing classification of a failed operation. Only `Blocked`
/// suggests retrying through a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Blocked,
    DependencyMissing,
    Unexpected,
}

/// Phase of an orchestrated call in which an extractor error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Materialize,
}

/// Returns true when `message` looks like network or IP blocking.
pub fn is_blocked_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    BLOCKED_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Maps an extractor error onto the caller-facing taxonomy.
pub fn classify(error: &ExtractorError, phase: Phase) -> FailureKind {
    match error {
        ExtractorError::DependencyMissing { .. } => FailureKind::DependencyMissing,
        ExtractorError::Spawn { source, .. }
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            FailureKind::DependencyMissing
        }
        other => {
            if is_blocked_message(&other.to_string()) {
                FailureKind::Blocked
            } else {
                match phase {
                    Phase::Resolve => FailureKind::NotFound,
                    Phase::Materialize => FailureKind::Unexpected,
                }
            }
        }
    }
}
