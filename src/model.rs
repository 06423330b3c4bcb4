//! Request and outcome types passed between the delivery surfaces and the
//! orchestrator.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::{FailureKind, RequestError};
use crate::extractor::MediaInfo;
use crate::reconcile::ReconcileReport;

/// Directory used when a caller does not pick one.
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";

/// A single download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    url: String,
    proxy: Option<String>,
    output_dir: PathBuf,
    limit: Option<NonZeroUsize>,
}

impl DownloadRequest {
    pub fn new(url: impl AsRef<str>, output_dir: impl Into<PathBuf>) -> Result<Self, RequestError> {
        let url = validate_url(url.as_ref())?;
        Ok(Self {
            url: url.to_owned(),
            proxy: None,
            output_dir: output_dir.into(),
            limit: None,
        })
    }

    /// Blank proxy strings are treated as "no proxy".
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = normalize_proxy(proxy);
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Result<Self, RequestError> {
        self.limit = match limit {
            Some(value) => Some(NonZeroUsize::new(value).ok_or(RequestError::ZeroLimit)?),
            None => None,
        };
        Ok(self)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn limit(&self) -> Option<NonZeroUsize> {
        self.limit
    }
}

/// Trims `url` and rejects blank input or anything the extractor could read
/// as a command-line option.
pub fn validate_url(url: &str) -> Result<&str, RequestError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(RequestError::EmptyUrl);
    }
    if url.starts_with('-') {
        return Err(RequestError::OptionLikeUrl(url.to_owned()));
    }
    Ok(url)
}

pub fn normalize_proxy(proxy: Option<String>) -> Option<String> {
    proxy
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Result of one orchestrated download call.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReconcileReport>,
}

impl DownloadOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            kind: Some(kind),
            title: None,
            files: None,
            output_dir: None,
            report: None,
        }
    }

    pub fn succeeded(message: impl Into<String>, files: Vec<String>, output_dir: &Path) -> Self {
        Self {
            success: true,
            message: message.into(),
            kind: None,
            title: None,
            files: Some(files),
            output_dir: Some(output_dir.to_path_buf()),
            report: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_output_dir(mut self, output_dir: &Path) -> Self {
        self.output_dir = Some(output_dir.to_path_buf());
        self
    }

    pub fn with_report(mut self, report: ReconcileReport) -> Self {
        self.report = Some(report);
        self
    }

    /// First reported file, used by surfaces that show a single result.
    pub fn primary_file(&self) -> Option<&str> {
        self.files
            .as_ref()
            .and_then(|files| files.first())
            .map(String::as_str)
    }
}

/// Result of a metadata-only lookup.
#[derive(Debug, Clone, Serialize)]
pub struct InfoOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<MediaInfo>,
}

/// A file in the downloads directory.
#[derive(Debug, Clone, Serialize)]
pub struct MediaFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Local>,
    pub canonical: bool,
}

impl MediaFile {
    /// Size rendered the way the web listing shows it.
    pub fn size_label(&self) -> String {
        format!("{:.2} MB", self.size as f64 / (1024.0 * 1024.0))
    }

    pub fn date_label(&self) -> String {
        self.modified.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
