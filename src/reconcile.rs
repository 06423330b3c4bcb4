//! Post-download cleanup of an output directory.
//!
//! After the extractor runs, the directory may hold container variants that
//! were not remuxed (`.webm`, `.mkv`, ...) and stray artifacts such as
//! subtitles, thumbnails or partial merges. [`reconcile`] promotes the former
//! to `.mp4` and removes the latter, leaving only canonical media behind.
//!
//! The pass is best effort: every per-file failure is recorded in the
//! [`ReconcileReport`] and the scan moves on to the next entry.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

/// Extension every retained file must carry.
pub const CANONICAL_EXTENSION: &str = "mp4";

/// Containers that are renamed to the canonical extension instead of deleted.
pub const EQUIVALENT_EXTENSIONS: &[&str] = &["webm", "mkv", "m4v", "mov"];

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub renamed: Vec<(String, String)>,
    pub deleted: Vec<String>,
    pub conflicts: Vec<String>,
    pub failures: Vec<FileFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub name: String,
    pub action: FileAction,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Scan,
    Rename,
    Delete,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.renamed.is_empty()
            && self.deleted.is_empty()
            && self.conflicts.is_empty()
            && self.failures.is_empty()
    }

    /// Records a failure unless the same name and action are already listed.
    /// The directory is listed once per step, so scan problems recur.
    fn fail_once(&mut self, name: &str, action: FileAction, err: &io::Error) {
        let seen = self
            .failures
            .iter()
            .any(|failure| failure.name == name && failure.action == action);
        if !seen {
            self.fail(name, action, err);
        }
    }

    fn fail(&mut self, name: &str, action: FileAction, err: &io::Error) {
        warn!(file = name, ?action, error = %err, "reconcile step failed");
        self.failures.push(FileFailure {
            name: name.to_owned(),
            action,
            message: err.to_string(),
        });
    }
}

/// Returns true when `name` carries the canonical extension, ignoring case.
pub fn is_canonical(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| ext.eq_ignore_ascii_case(CANONICAL_EXTENSION))
}

/// Canonicalizes container extensions, then purges every other
/// non-canonical file. A missing directory yields an empty report.
pub fn reconcile(dir: &Path) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "skipping reconcile, directory does not exist");
        return report;
    }

    // Renames must run first, otherwise promotable files would be purged.
    canonicalize_extensions(dir, &mut report);
    purge_residue(dir, &mut report);

    if !report.is_empty() {
        debug!(
            dir = %dir.display(),
            renamed = report.renamed.len(),
            deleted = report.deleted.len(),
            conflicts = report.conflicts.len(),
            failures = report.failures.len(),
            "reconciled output directory"
        );
    }
    report
}

/// `<stem>.mp4` with the extension case folded, so `clip.MP4` and `clip.mp4`
/// claim the same slot.
fn canonical_slot(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    ext.eq_ignore_ascii_case(CANONICAL_EXTENSION)
        .then(|| format!("{stem}.{CANONICAL_EXTENSION}"))
}

fn canonicalize_extensions(dir: &Path, report: &mut ReconcileReport) {
    let names = regular_files(dir, report);
    let mut taken: HashSet<String> = names.iter().filter_map(|name| canonical_slot(name)).collect();
    for name in names {
        let Some((stem, ext)) = name.rsplit_once('.') else {
            continue;
        };
        if !EQUIVALENT_EXTENSIONS
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known))
        {
            continue;
        }

        let target_name = format!("{stem}.{CANONICAL_EXTENSION}");
        let target = dir.join(&target_name);
        if taken.contains(&target_name) || target.exists() {
            warn!(file = %name, target = %target_name, "rename target already exists, leaving file in place");
            report.conflicts.push(name);
            continue;
        }

        match fs::rename(dir.join(&name), &target) {
            Ok(()) => {
                debug!(from = %name, to = %target_name, "renamed to canonical extension");
                taken.insert(target_name.clone());
                report.renamed.push((name, target_name));
            }
            Err(err) => report.fail(&name, FileAction::Rename, &err),
        }
    }
}

fn purge_residue(dir: &Path, report: &mut ReconcileReport) {
    let conflicts: HashSet<String> = report.conflicts.iter().cloned().collect();
    for name in regular_files(dir, report) {
        if is_canonical(&name) || conflicts.contains(&name) {
            continue;
        }
        match fs::remove_file(dir.join(&name)) {
            Ok(()) => {
                debug!(file = %name, "removed non-canonical file");
                report.deleted.push(name);
            }
            // Another writer may have moved it already.
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => report.fail(&name, FileAction::Delete, &err),
        }
    }
}

/// Names of the regular files directly inside `dir`, sorted for stable
/// reports. Unreadable entries are logged into the report and skipped.
fn regular_files(dir: &Path, report: &mut ReconcileReport) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            report.fail_once(&dir.display().to_string(), FileAction::Scan, &err);
            return Vec::new();
        }
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                report.fail_once(&dir.display().to_string(), FileAction::Scan, &err);
                continue;
            }
        };
        let is_file = entry
            .file_type()
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => {
                let err = io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8");
                report.fail_once(&raw.to_string_lossy(), FileAction::Scan, &err);
            }
        }
    }
    names.sort();
    names
}

fn extension_of(name: &str) -> Option<&str> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn names_in(dir: &Path) -> Result<Vec<String>> {
        let mut names = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    #[test]
    fn mixed_directory_keeps_only_mp4() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("dance_1.mp4"), "a")?;
        fs::write(dir.path().join("cat_2.webm"), "b")?;
        fs::write(dir.path().join("cat_2.en.srt"), "c")?;
        fs::write(dir.path().join("dog_3.srt"), "d")?;

        let report = reconcile(dir.path());

        assert_eq!(names_in(dir.path())?, vec!["cat_2.mp4", "dance_1.mp4"]);
        assert_eq!(
            report.renamed,
            vec![("cat_2.webm".to_string(), "cat_2.mp4".to_string())]
        );
        assert_eq!(report.deleted, vec!["cat_2.en.srt", "dog_3.srt"]);
        assert!(report.conflicts.is_empty());
        assert!(report.failures.is_empty());
        Ok(())
    }

    #[test]
    fn missing_directory_is_a_noop() -> Result<()> {
        let dir = tempdir()?;
        let report = reconcile(&dir.path().join("never-created"));
        assert!(report.is_empty());
        assert_eq!(report, ReconcileReport::default());
        Ok(())
    }

    #[test]
    fn existing_target_is_reported_as_conflict() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("clip.mp4"), "original")?;
        fs::write(dir.path().join("clip.mkv"), "variant")?;

        let report = reconcile(dir.path());

        assert_eq!(report.conflicts, vec!["clip.mkv"]);
        assert!(report.renamed.is_empty());
        assert!(report.deleted.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("clip.mp4"))?, "original");
        assert_eq!(fs::read_to_string(dir.path().join("clip.mkv"))?, "variant");
        Ok(())
    }

    #[test]
    fn uppercase_canonical_file_blocks_rename() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("clip.MP4"), "kept")?;
        fs::write(dir.path().join("clip.webm"), "other")?;

        let report = reconcile(dir.path());

        assert_eq!(names_in(dir.path())?, vec!["clip.MP4", "clip.webm"]);
        assert_eq!(report.conflicts, vec!["clip.webm"]);
        assert!(report.renamed.is_empty());
        assert!(report.deleted.is_empty());
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unreadable_name_is_reported_and_scan_continues() -> Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir()?;
        fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.webm")), "x")?;
        fs::write(dir.path().join("good.webm"), "v")?;
        fs::write(dir.path().join("good.en.vtt"), "s")?;

        let report = reconcile(dir.path());

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].action, FileAction::Scan);
        assert!(report.failures[0].name.starts_with("bad"));
        assert_eq!(
            report.renamed,
            vec![("good.webm".to_string(), "good.mp4".to_string())]
        );
        assert_eq!(report.deleted, vec!["good.en.vtt"]);
        assert!(dir.path().join(OsStr::from_bytes(b"bad\xff.webm")).exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn read_only_directory_records_every_failure() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        fs::write(dir.path().join("a.webm"), "v")?;
        fs::write(dir.path().join("b.srt"), "s")?;
        fs::write(dir.path().join("c.mp4"), "m")?;
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o555))?;

        // Privileged users ignore directory permissions.
        if fs::write(dir.path().join("writable"), "").is_ok() {
            fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755))?;
            return Ok(());
        }

        let report = reconcile(dir.path());
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755))?;

        let failed: Vec<(&str, FileAction)> = report
            .failures
            .iter()
            .map(|failure| (failure.name.as_str(), failure.action))
            .collect();
        assert_eq!(
            failed,
            vec![
                ("a.webm", FileAction::Rename),
                ("a.webm", FileAction::Delete),
                ("b.srt", FileAction::Delete),
            ]
        );
        assert!(report.renamed.is_empty());
        assert!(report.deleted.is_empty());
        assert_eq!(names_in(dir.path())?, vec!["a.webm", "b.srt", "c.mp4"]);
        Ok(())
    }

    #[test]
    fn extensions_match_case_insensitively() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("LOUD.MOV"), "x")?;
        fs::write(dir.path().join("upper.MP4"), "y")?;
        fs::write(dir.path().join("cover.JPG"), "z")?;

        let report = reconcile(dir.path());

        assert_eq!(names_in(dir.path())?, vec!["LOUD.mp4", "upper.MP4"]);
        assert_eq!(report.deleted, vec!["cover.JPG"]);
        Ok(())
    }

    #[test]
    fn subdirectories_and_extensionless_files() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("nested.webm"))?;
        fs::write(dir.path().join("README"), "x")?;

        let report = reconcile(dir.path());

        assert!(dir.path().join("nested.webm").is_dir());
        assert!(!dir.path().join("README").exists());
        assert_eq!(report.deleted, vec!["README"]);
        Ok(())
    }

    #[test]
    fn canonical_detection() {
        assert!(is_canonical("a.mp4"));
        assert!(is_canonical("a.b.Mp4"));
        assert!(!is_canonical("mp4"));
        assert!(!is_canonical("a.mp4.part"));
        assert!(!is_canonical("a."));
    }
}
