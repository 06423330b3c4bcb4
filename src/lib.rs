#![forbid(unsafe_code)]

//! Library side of the TikTok crawler.
//!
//! Downloads are delegated to yt-dlp through the [`extractor::Extractor`]
//! trait. This crate owns the surrounding plumbing: output directories, the
//! post-download [`reconcile`] pass that leaves only MP4 files behind, the
//! [`orchestrator`] that judges success from the files on disk, and the
//! [`library`] helpers the web UI uses to browse results.

pub mod config;
pub mod error;
pub mod extractor;
pub mod library;
pub mod model;
pub mod orchestrator;
pub mod reconcile;
pub mod tools;
pub mod ytdlp;

pub use error::FailureKind;
pub use extractor::{Extractor, MediaInfo};
pub use model::{DownloadOutcome, DownloadRequest, InfoOutcome, MediaFile};
pub use orchestrator::Orchestrator;
pub use ytdlp::YtDlp;

/// Orchestrator wired to the yt-dlp backend described by `settings`.
pub fn orchestrator_from(settings: &config::Settings) -> Orchestrator<YtDlp> {
    Orchestrator::new(
        YtDlp::new(&settings.ytdlp_path).with_ffmpeg(settings.ffmpeg_path.clone()),
    )
}
