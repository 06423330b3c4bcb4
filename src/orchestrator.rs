//! Sequences extractor calls and the reconciler for one request and turns
//! the result into a [`DownloadOutcome`].
//!
//! Success is judged from the files on disk after reconciliation, never from
//! the extractor's own return value alone: yt-dlp happily exits non-zero
//! after a partial feed download and, with `--ignore-errors`, can exit zero
//! without writing anything.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use tracing::{info, warn};

use crate::error::{ExtractorError, FailureKind, Phase, classify};
use crate::extractor::{ExtractOptions, Extractor, MediaInfo, Scope};
use crate::model::{DownloadOutcome, DownloadRequest, InfoOutcome};
use crate::reconcile::{self, is_canonical};

const PROXY_HINT: &str = "The target may be blocked for this IP address. Try again with a proxy.";

pub struct Orchestrator<E> {
    extractor: E,
}

impl<E: Extractor> Orchestrator<E> {
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Downloads one video into the request's output directory.
    pub fn download_single(&self, request: &DownloadRequest) -> DownloadOutcome {
        let dir = request.output_dir();
        info!(url = request.url(), dir = %dir.display(), extractor = self.extractor.name(), "downloading video");
        if let Err(outcome) = prepare_dir(dir) {
            return outcome;
        }

        let options = ExtractOptions::new(dir)
            .with_proxy(request.proxy())
            .with_scope(Scope::Single);

        let media = match self.resolve(request.url(), &options) {
            Ok(media) => media,
            Err(outcome) => return outcome.with_output_dir(dir),
        };
        let title = media.display_title().to_owned();
        info!(title = %title, "resolved video");

        let before = canonical_files(dir);
        let materialized = self.extractor.materialize(request.url(), &options);
        if let Err(err) = &materialized {
            warn!(error = %err, "extractor reported a failure, checking output directory");
        }

        let report = reconcile::reconcile(dir);
        let after = canonical_files(dir);

        let mut new_files: Vec<String> = after.difference(&before).cloned().collect();
        new_files.sort();
        let files = if new_files.is_empty() {
            latest_file(dir, &after).into_iter().collect()
        } else {
            new_files
        };

        let outcome = if after.is_empty() {
            match materialized {
                Err(err) => failure_from(&err, Phase::Materialize),
                Ok(()) => DownloadOutcome::failure(
                    FailureKind::Unexpected,
                    "No MP4 file was found after the download finished",
                ),
            }
        } else {
            let shown = files.first().map(String::as_str).unwrap_or_default();
            info!(file = shown, "download complete");
            DownloadOutcome::succeeded(format!("Downloaded \"{title}\": {shown}"), files, dir)
        };

        outcome
            .with_title(Some(title))
            .with_output_dir(dir)
            .with_report(report)
    }

    /// Downloads a user feed or playlist, capped to the request's limit.
    pub fn download_many(&self, request: &DownloadRequest) -> DownloadOutcome {
        let dir = request.output_dir();
        info!(
            url = request.url(),
            dir = %dir.display(),
            limit = request.limit().map(|limit| limit.get()),
            "downloading feed"
        );
        if let Err(outcome) = prepare_dir(dir) {
            return outcome;
        }

        let options = ExtractOptions::new(dir)
            .with_proxy(request.proxy())
            .with_scope(Scope::Many {
                limit: request.limit(),
            });

        let listing = match self.resolve(request.url(), &options) {
            Ok(listing) => listing,
            Err(outcome) => return outcome.with_output_dir(dir),
        };
        let total = listing.entry_count.unwrap_or(0);
        if total == 0 {
            return DownloadOutcome::failure(FailureKind::NotFound, "No videos found for this user")
                .with_title(listing.title.clone())
                .with_output_dir(dir);
        }
        let planned = request
            .limit()
            .map_or(total, |limit| limit.get().min(total));
        info!(
            total,
            planned,
            uploader = listing.uploader.as_deref().unwrap_or("N/A"),
            "resolved feed"
        );

        let before = canonical_files(dir);
        let materialized = self.extractor.materialize(request.url(), &options);
        if let Err(err) = &materialized {
            warn!(error = %err, "extractor reported a failure, checking output directory");
        }

        let report = reconcile::reconcile(dir);
        let after = canonical_files(dir);

        let mut new_files: Vec<String> = after.difference(&before).cloned().collect();
        new_files.sort();
        let downloaded = after.len().saturating_sub(before.len());

        let outcome = if downloaded > 0 {
            info!(downloaded, "feed download complete");
            DownloadOutcome::succeeded(
                format!("Downloaded {downloaded} MP4 video(s)"),
                new_files,
                dir,
            )
        } else {
            match materialized {
                Err(err) => failure_from(&err, Phase::Materialize),
                Ok(()) => DownloadOutcome::failure(
                    FailureKind::Unexpected,
                    "No MP4 videos were downloaded",
                ),
            }
        };

        outcome
            .with_title(listing.uploader.or(listing.title))
            .with_output_dir(dir)
            .with_report(report)
    }

    /// Resolves metadata only, nothing is written.
    pub fn video_info(&self, url: &str, proxy: Option<&str>) -> InfoOutcome {
        info!(url, "fetching video info");
        let options = ExtractOptions::new(".").with_proxy(proxy);
        match self.resolve(url, &options) {
            Ok(media) => InfoOutcome {
                success: true,
                message: media.describe(),
                kind: None,
                info: Some(media),
            },
            Err(outcome) => InfoOutcome {
                success: false,
                message: outcome.message,
                kind: outcome.kind,
                info: None,
            },
        }
    }

    fn resolve(&self, url: &str, options: &ExtractOptions) -> Result<MediaInfo, DownloadOutcome> {
        match self.extractor.resolve(url, options) {
            Ok(Some(media)) => Ok(media),
            Ok(None) => Err(DownloadOutcome::failure(
                FailureKind::NotFound,
                "Could not retrieve video information",
            )),
            Err(err) => {
                warn!(url, error = %err, "metadata resolution failed");
                Err(failure_from(&err, Phase::Resolve))
            }
        }
    }
}

fn failure_from(err: &ExtractorError, phase: Phase) -> DownloadOutcome {
    let kind = classify(err, phase);
    let message = match kind {
        FailureKind::Blocked => format!("{PROXY_HINT} ({err})"),
        FailureKind::DependencyMissing => format!("Missing dependency: {err}"),
        FailureKind::NotFound => format!("Could not retrieve video information: {err}"),
        FailureKind::Unexpected => format!("Download failed: {err}"),
    };
    DownloadOutcome::failure(kind, message)
}

fn prepare_dir(dir: &Path) -> Result<(), DownloadOutcome> {
    fs::create_dir_all(dir).map_err(|err| {
        warn!(dir = %dir.display(), error = %err, "cannot create output directory");
        DownloadOutcome::failure(
            FailureKind::Unexpected,
            format!("Cannot create output directory {}: {err}", dir.display()),
        )
    })
}

/// Canonical file names currently in `dir`; empty when it cannot be read.
pub fn canonical_files(dir: &Path) -> HashSet<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return HashSet::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|ty| ty.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_canonical(name))
        .collect()
}

fn latest_file(dir: &Path, names: &HashSet<String>) -> Option<String> {
    names
        .iter()
        .map(|name| {
            let modified = fs::metadata(dir.join(name))
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, name)
        })
        .max()
        .map(|(_, name)| name.clone())
}
