//! Abstraction over the third-party media extractor.
//!
//! The orchestrator only ever talks to [`Extractor`]; the yt-dlp backend in
//! [`crate::ytdlp`] is one implementation and tests substitute an in-memory
//! fake.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ExtractorError;

/// How many items a call should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// A single video; playlist expansion is disabled.
    #[default]
    Single,
    /// A user feed or playlist, optionally capped to the first `limit` items.
    Many { limit: Option<NonZeroUsize> },
}

/// Options shared by both extractor operations.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub proxy: Option<String>,
    pub output_dir: PathBuf,
    pub scope: Scope,
}

impl ExtractOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_proxy(mut self, proxy: Option<&str>) -> Self {
        self.proxy = proxy.map(str::to_owned);
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn limit(&self) -> Option<NonZeroUsize> {
        match self.scope {
            Scope::Single => None,
            Scope::Many { limit } => limit,
        }
    }
}

/// Metadata resolved for a target before anything is downloaded.
///
/// Every field is optional because TikTok omits different pieces depending
/// on the target and region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpage_url: Option<String>,
    /// Number of entries when the target is a feed or playlist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<usize>,
}

impl MediaInfo {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|title| !title.is_empty())
            .unwrap_or("Unknown")
    }

    /// Multi-line summary shown by `info` on the CLI and the web UI.
    pub fn describe(&self) -> String {
        fn field<T: ToString>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "N/A".to_string())
        }

        [
            format!("Title: {}", field(&self.title)),
            format!("Author: {}", field(&self.uploader)),
            format!("Upload date: {}", field(&self.upload_date)),
            format!("Duration: {}", field(&self.duration_string)),
            format!("Views: {}", field(&self.view_count)),
            format!("Likes: {}", field(&self.like_count)),
            format!("Comments: {}", field(&self.comment_count)),
            format!("URL: {}", field(&self.webpage_url)),
        ]
        .join("\n")
    }
}

/// An external capability that resolves and downloads media.
pub trait Extractor: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Resolves metadata without writing media. `Ok(None)` means the
    /// extractor ran but found nothing for the URL.
    fn resolve(&self, url: &str, options: &ExtractOptions)
    -> Result<Option<MediaInfo>, ExtractorError>;

    /// Downloads media for `url` into `options.output_dir`.
    fn materialize(&self, url: &str, options: &ExtractOptions) -> Result<(), ExtractorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_fills_missing_fields() {
        let info = MediaInfo {
            title: Some("Morning routine".into()),
            view_count: Some(1200),
            ..MediaInfo::default()
        };
        let text = info.describe();
        assert!(text.starts_with("Title: Morning routine\nAuthor: N/A\n"));
        assert!(text.contains("Views: 1200"));
        assert!(text.ends_with("URL: N/A"));
    }

    #[test]
    fn display_title_falls_back() {
        let info = MediaInfo {
            title: Some(String::new()),
            ..MediaInfo::default()
        };
        assert_eq!(info.display_title(), "Unknown");
    }

    #[test]
    fn limit_only_applies_to_many_scope() {
        let limit = NonZeroUsize::new(3);
        let single = ExtractOptions::new("out");
        assert_eq!(single.limit(), None);
        let many = ExtractOptions::new("out").with_scope(Scope::Many { limit });
        assert_eq!(many.limit(), limit);
    }
}
