//! [`Extractor`] backend that drives the `yt-dlp` executable.
//!
//! Metadata comes from `--dump-single-json`; downloads prefer MP4 streams and
//! remux to MP4 when the container differs.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ExtractorError;
use crate::extractor::{ExtractOptions, Extractor, MediaInfo, Scope};
use crate::tools;

pub const DEFAULT_PROGRAM: &str = "yt-dlp";

/// Prefer MP4/M4A streams, fall back to anything muxable.
const FORMAT_SELECTOR: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo+bestaudio/best";

/// `<title truncated to 50 chars>_<id>.<ext>` inside the output directory.
const OUTPUT_TEMPLATE: &str = "%(title).50s_%(id)s.%(ext)s";

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    ffmpeg_override: Option<PathBuf>,
}

/// Subset of the `--dump-single-json` payload we surface.
#[derive(Debug, Deserialize)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    upload_date: Option<String>,
    duration: Option<f64>,
    duration_string: Option<String>,
    view_count: Option<u64>,
    like_count: Option<u64>,
    comment_count: Option<u64>,
    webpage_url: Option<String>,
    #[serde(default)]
    entries: Option<Vec<Value>>,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ffmpeg_override: None,
        }
    }

    pub fn with_ffmpeg(mut self, ffmpeg: Option<PathBuf>) -> Self {
        self.ffmpeg_override = ffmpeg;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, args: &[OsString]) -> Result<Output, ExtractorError> {
        debug!(program = %self.program.display(), ?args, "running extractor");
        Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| ExtractorError::Spawn {
                program: self.program.display().to_string(),
                source,
            })
    }

    fn require_ffmpeg(&self) -> Result<PathBuf, ExtractorError> {
        tools::locate_ffmpeg(self.ffmpeg_override.as_deref()).ok_or_else(|| {
            ExtractorError::DependencyMissing {
                program: "ffmpeg".into(),
                detail: tools::ffmpeg_install_hint().into(),
            }
        })
    }
}

impl Extractor for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn resolve(
        &self,
        url: &str,
        options: &ExtractOptions,
    ) -> Result<Option<MediaInfo>, ExtractorError> {
        let output = self.run(&resolve_args(url, options))?;
        if !output.status.success() {
            return Err(ExtractorError::Failed(failure_message(&output)));
        }
        let stdout = String::from_utf8(output.stdout)
            .map_err(|err| ExtractorError::InvalidOutput(err.to_string()))?;
        parse_info(&stdout)
    }

    fn materialize(&self, url: &str, options: &ExtractOptions) -> Result<(), ExtractorError> {
        let ffmpeg = self.require_ffmpeg()?;
        let output = self.run(&download_args(url, options, &ffmpeg))?;
        if !output.status.success() {
            return Err(ExtractorError::Failed(failure_message(&output)));
        }
        info!(url, dir = %options.output_dir().display(), "extractor finished");
        Ok(())
    }
}

fn common_args(options: &ExtractOptions, args: &mut Vec<OsString>) {
    args.push("--no-warnings".into());
    args.push("--no-progress".into());
    match options.scope {
        Scope::Single => args.push("--no-playlist".into()),
        Scope::Many { limit } => {
            args.push("--yes-playlist".into());
            if let Some(limit) = limit {
                args.push("--playlist-end".into());
                args.push(limit.get().to_string().into());
            }
        }
    }
    if let Some(proxy) = &options.proxy {
        args.push("--proxy".into());
        args.push(proxy.into());
    }
}

/// Arguments for a metadata-only run. Feeds are listed flat so resolving a
/// user does not fetch every video page.
pub fn resolve_args(url: &str, options: &ExtractOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--dump-single-json".into(), "--skip-download".into()];
    if matches!(options.scope, Scope::Many { .. }) {
        args.push("--flat-playlist".into());
    }
    common_args(options, &mut args);
    args.push("--".into());
    args.push(url.into());
    args
}

pub fn download_args(url: &str, options: &ExtractOptions, ffmpeg: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--format".into(),
        FORMAT_SELECTOR.into(),
        "--merge-output-format".into(),
        "mp4".into(),
        "--remux-video".into(),
        "mp4".into(),
        "--embed-metadata".into(),
        "--no-keep-video".into(),
        "--no-write-description".into(),
        "--no-write-info-json".into(),
        "--no-write-subs".into(),
        "--no-write-thumbnail".into(),
        "--ignore-errors".into(),
        "--ffmpeg-location".into(),
        ffmpeg.as_os_str().to_owned(),
        "--output".into(),
        options.output_dir().join(OUTPUT_TEMPLATE).into_os_string(),
    ];
    common_args(options, &mut args);
    args.push("--".into());
    args.push(url.into());
    args
}

/// Parses `--dump-single-json` output. Blank output or a JSON `null` means
/// the extractor found nothing.
fn parse_info(stdout: &str) -> Result<Option<MediaInfo>, ExtractorError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    let raw: RawInfo = serde_json::from_str(trimmed)
        .map_err(|err| ExtractorError::InvalidOutput(err.to_string()))?;

    let duration_string = raw.duration_string.or_else(|| {
        raw.duration
            .filter(|seconds| *seconds >= 0.0)
            .map(|seconds| format_duration(seconds.round() as u64))
    });

    Ok(Some(MediaInfo {
        id: raw.id,
        title: raw.title,
        uploader: raw.uploader,
        upload_date: raw.upload_date,
        duration_string,
        view_count: raw.view_count,
        like_count: raw.like_count,
        comment_count: raw.comment_count,
        webpage_url: raw.webpage_url,
        entry_count: raw
            .entries
            .map(|entries| entries.iter().filter(|entry| !entry.is_null()).count()),
    }))
}

/// Picks the most useful line of a failed run: the last `ERROR:` line, then
/// any stderr text, then the exit status.
fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if let Some(line) = stderr
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with("ERROR:"))
    {
        return line.trim().to_owned();
    }
    let trimmed = stderr.trim();
    if !trimmed.is_empty() {
        return trimmed.to_owned();
    }
    format!("extractor exited with {}", output.status)
}

fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use std::num::NonZeroUsize;
    use tempfile::tempdir;

    fn as_strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn resolve_args_for_single_video() {
        let options = ExtractOptions::new("out").with_proxy(Some("http://proxy:8080"));
        let args = as_strings(&resolve_args("https://www.tiktok.com/@u/video/1", &options));
        assert_eq!(
            args,
            vec![
                "--dump-single-json",
                "--skip-download",
                "--no-warnings",
                "--no-progress",
                "--no-playlist",
                "--proxy",
                "http://proxy:8080",
                "--",
                "https://www.tiktok.com/@u/video/1",
            ]
        );
    }

    #[test]
    fn resolve_args_for_feed_are_flat_and_capped() {
        let options = ExtractOptions::new("out").with_scope(Scope::Many {
            limit: NonZeroUsize::new(4),
        });
        let args = as_strings(&resolve_args("https://www.tiktok.com/@u", &options));
        assert!(args.contains(&"--flat-playlist".to_string()));
        assert!(args.contains(&"--yes-playlist".to_string()));
        let pos = args.iter().position(|a| a == "--playlist-end").unwrap();
        assert_eq!(args[pos + 1], "4");
    }

    #[test]
    fn download_args_target_output_dir_and_mp4() {
        let options = ExtractOptions::new("/data/out");
        let args = as_strings(&download_args(
            "https://www.tiktok.com/@u/video/1",
            &options,
            Path::new("/usr/bin/ffmpeg"),
        ));
        let pos = args.iter().position(|a| a == "--output").unwrap();
        assert_eq!(
            PathBuf::from(&args[pos + 1]),
            Path::new("/data/out").join(OUTPUT_TEMPLATE)
        );
        let pos = args.iter().position(|a| a == "--ffmpeg-location").unwrap();
        assert_eq!(args[pos + 1], "/usr/bin/ffmpeg");
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(!args.contains(&"--proxy".to_string()));
        assert_eq!(args.last().unwrap(), "https://www.tiktok.com/@u/video/1");
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn url_is_never_read_as_an_option() {
        let url = "--exec=touch /tmp/owned";
        for args in [
            resolve_args(url, &ExtractOptions::new("out")),
            download_args(url, &ExtractOptions::new("out"), Path::new("/usr/bin/ffmpeg")),
        ] {
            let args = as_strings(&args);
            assert_eq!(args[args.len() - 2], "--");
            assert_eq!(args.last().unwrap(), url);
            assert_eq!(args.iter().filter(|arg| arg.as_str() == url).count(), 1);
        }
    }

    #[test]
    fn parse_info_reads_feed_entries() -> Result<()> {
        let json = serde_json::json!({
            "id": "someone",
            "title": "someone",
            "uploader": "Some One",
            "entries": [{"id": "1"}, {"id": "2"}, null]
        });
        let info = parse_info(&json.to_string())?.unwrap();
        assert_eq!(info.entry_count, Some(2));
        assert_eq!(info.uploader.as_deref(), Some("Some One"));
        Ok(())
    }

    #[test]
    fn parse_info_derives_duration_string() -> Result<()> {
        let info = parse_info(r#"{"id":"1","title":"t","duration":3725.4}"#)?.unwrap();
        assert_eq!(info.duration_string.as_deref(), Some("1:02:05"));
        assert_eq!(info.entry_count, None);
        assert!(parse_info("null\n")?.is_none());
        assert!(parse_info("")?.is_none());
        assert!(matches!(
            parse_info("{not json"),
            Err(ExtractorError::InvalidOutput(_))
        ));
        Ok(())
    }

    #[cfg(unix)]
    fn install_ytdlp_stub(dir: &Path) -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let script_path = dir.join("yt-dlp");
        let script = r#"#!/usr/bin/env bash
set -euo pipefail
prev=""
output=""
url=""
for arg in "$@"; do
    if [[ "$prev" == "--output" ]]; then
        output="$arg"
    fi
    prev="$arg"
    url="$arg"
done
if [[ "$url" == *"missing"* ]]; then
    echo "WARNING: retrying" >&2
    echo "ERROR: [TikTok] 404: Unable to find video" >&2
    exit 1
fi
if [[ " $* " == *" --dump-single-json "* ]]; then
cat <<'JSON'
{"id": "7001", "title": "Stub dance", "uploader": "stub", "view_count": 42}
JSON
exit 0
fi
dir="$(dirname "$output")"
printf 'video' > "$dir/Stub dance_7001.webm"
printf 'subs' > "$dir/Stub dance_7001.en.vtt"
exit 0
"#;
        fs::write(&script_path, script)?;
        let mut perms = fs::metadata(&script_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms)?;
        Ok(script_path)
    }

    #[cfg(unix)]
    #[test]
    fn stub_backend_resolves_and_downloads() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_ytdlp_stub(temp.path())?;
        let ffmpeg = temp.path().join("ffmpeg");
        fs::write(&ffmpeg, "")?;
        let out = temp.path().join("out");
        fs::create_dir(&out)?;

        let backend = YtDlp::new(&stub).with_ffmpeg(Some(ffmpeg));
        let options = ExtractOptions::new(&out);
        let info = backend
            .resolve("https://www.tiktok.com/@stub/video/7001", &options)?
            .unwrap();
        assert_eq!(info.title.as_deref(), Some("Stub dance"));
        assert_eq!(info.view_count, Some(42));

        backend.materialize("https://www.tiktok.com/@stub/video/7001", &options)?;
        assert!(out.join("Stub dance_7001.webm").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn stub_backend_surfaces_error_line() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_ytdlp_stub(temp.path())?;
        let backend = YtDlp::new(&stub);
        let err = backend
            .resolve("https://www.tiktok.com/@stub/video/missing", &ExtractOptions::new("out"))
            .unwrap_err();
        assert_eq!(err.to_string(), "ERROR: [TikTok] 404: Unable to find video");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn option_like_url_reaches_extractor_as_operand() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir()?;
        let script_path = temp.path().join("yt-dlp");
        let script = r#"#!/usr/bin/env bash
operands=0
for arg in "$@"; do
    if [[ $operands == 0 && "$arg" == "--" ]]; then
        operands=1
        continue
    fi
    if [[ $operands == 0 && "$arg" == --exec* ]]; then
        echo "ERROR: unexpected option $arg" >&2
        exit 2
    fi
done
echo null
"#;
        fs::write(&script_path, script)?;
        let mut perms = fs::metadata(&script_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms)?;

        let backend = YtDlp::new(&script_path);
        let resolved = backend.resolve("--exec=touch owned", &ExtractOptions::new("out"))?;
        assert!(resolved.is_none());
        Ok(())
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let backend = YtDlp::new("/definitely/not/yt-dlp");
        let err = backend
            .resolve("https://www.tiktok.com/@u/video/1", &ExtractOptions::new("out"))
            .unwrap_err();
        assert!(matches!(err, ExtractorError::Spawn { .. }));
    }
}
