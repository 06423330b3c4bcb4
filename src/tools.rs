//! Discovery of the external programs the yt-dlp backend depends on.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::ExtractorError;

#[cfg(windows)]
const FFMPEG_BINARY: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BINARY: &str = "ffmpeg";

/// Locates ffmpeg in priority order: explicit override, `PATH`, then a list
/// of well-known install locations relative to the working directory and the
/// home directory.
pub fn locate_ffmpeg(override_path: Option<&Path>) -> Option<PathBuf> {
    let path_var = env::var_os("PATH");
    locate_ffmpeg_in(override_path, path_var.as_deref(), &ffmpeg_candidates())
}

fn locate_ffmpeg_in(
    override_path: Option<&Path>,
    path_var: Option<&OsStr>,
    candidates: &[PathBuf],
) -> Option<PathBuf> {
    if let Some(path) = override_path
        && path.is_file()
    {
        return Some(path.to_path_buf());
    }

    if let Some(found) = path_var.and_then(|value| find_in_path(FFMPEG_BINARY, value)) {
        return Some(found);
    }

    let found = candidates.iter().find(|candidate| candidate.is_file()).cloned();
    debug!(?found, "searched well-known ffmpeg locations");
    found
}

/// Searches a `PATH`-style list for an executable file named `binary`.
pub fn find_in_path(binary: &str, path_var: &OsStr) -> Option<PathBuf> {
    env::split_paths(path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

fn ffmpeg_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd.join(FFMPEG_BINARY));
        candidates.push(cwd.join("ffmpeg").join("bin").join(FFMPEG_BINARY));
        candidates.push(cwd.join("bin").join(FFMPEG_BINARY));
    }
    if let Some(exe_dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(FFMPEG_BINARY));
        candidates.push(exe_dir.join("ffmpeg").join("bin").join(FFMPEG_BINARY));
    }

    if cfg!(windows) {
        candidates.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin\ffmpeg.exe"));
        candidates.push(PathBuf::from(r"C:\Program Files (x86)\ffmpeg\bin\ffmpeg.exe"));
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join("ffmpeg").join("bin").join(FFMPEG_BINARY));
            candidates.push(
                home.join("Downloads")
                    .join("ffmpeg")
                    .join("bin")
                    .join(FFMPEG_BINARY),
            );
        }
    } else {
        for fixed in [
            "/usr/bin/ffmpeg",
            "/usr/local/bin/ffmpeg",
            "/opt/homebrew/bin/ffmpeg",
            "/usr/local/ffmpeg/bin/ffmpeg",
        ] {
            candidates.push(PathBuf::from(fixed));
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join("ffmpeg").join(FFMPEG_BINARY));
            candidates.push(home.join(".local").join("bin").join(FFMPEG_BINARY));
        }
    }
    candidates
}

/// Runs `<program> --version` and fails when the program cannot be started
/// or reports an error.
pub fn ensure_program_available(program: &Path) -> Result<(), ExtractorError> {
    let status = Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(ExtractorError::DependencyMissing {
            program: program.display().to_string(),
            detail: format!("installed but returned {status}"),
        }),
        Err(err) => Err(ExtractorError::DependencyMissing {
            program: program.display().to_string(),
            detail: format!("not installed or not in PATH: {err}"),
        }),
    }
}

/// Install hint shown next to a missing-ffmpeg failure.
pub fn ffmpeg_install_hint() -> &'static str {
    if cfg!(windows) {
        "Download ffmpeg from https://www.gyan.dev/ffmpeg/builds/ and place the 'ffmpeg' folder next to the program, or add it to PATH."
    } else if cfg!(target_os = "macos") {
        "Install ffmpeg with: brew install ffmpeg"
    } else {
        "Install ffmpeg with: sudo apt-get install ffmpeg"
    }
}
