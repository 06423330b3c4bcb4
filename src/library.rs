//! File management on the downloads directory for the web surface:
//! listing, deletion and ZIP export of canonical media.

use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::error::LibraryError;
use crate::model::MediaFile;
use crate::reconcile::{self, ReconcileReport, is_canonical};

/// Canonical files directly inside `dir`, newest first. A missing directory
/// lists as empty.
pub fn list_media(dir: &Path) -> Result<Vec<MediaFile>, LibraryError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(dir).to_path_buf();
            LibraryError::io("listing", path, err.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_canonical(&name) {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|err| LibraryError::io("reading metadata of", entry.path(), err.into()))?;
        let modified = metadata
            .modified()
            .map_err(|err| LibraryError::io("reading mtime of", entry.path(), err))?;
        files.push(MediaFile {
            name,
            size: metadata.len(),
            modified: DateTime::<Local>::from(modified),
            canonical: true,
        });
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Resolves `name` inside `dir`, rejecting anything that is not a plain file
/// name (separators, `..`, empty).
pub fn resolve_file(dir: &Path, name: &str) -> Result<PathBuf, LibraryError> {
    let trimmed = name.trim();
    let plain = !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !trimmed.contains(['/', '\\'])
        && !trimmed.contains('\0');
    if !plain {
        return Err(LibraryError::InvalidName(name.to_owned()));
    }
    let path = dir.join(trimmed);
    if !path.is_file() {
        return Err(LibraryError::NotFound(trimmed.to_owned()));
    }
    Ok(path)
}

pub fn delete_file(dir: &Path, name: &str) -> Result<(), LibraryError> {
    let path = resolve_file(dir, name)?;
    fs::remove_file(&path).map_err(|err| LibraryError::io("removing", &path, err))?;
    info!(file = name, "deleted download");
    Ok(())
}

/// Deletes every canonical file and returns how many were removed.
pub fn delete_all(dir: &Path) -> Result<usize, LibraryError> {
    let mut removed = 0;
    for file in list_media(dir)? {
        let path = dir.join(&file.name);
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(LibraryError::io("removing", path, err)),
        }
    }
    info!(removed, dir = %dir.display(), "cleared downloads");
    Ok(removed)
}

/// Runs the reconciler on demand for the web "cleanup" action.
pub fn cleanup(dir: &Path) -> ReconcileReport {
    let report = reconcile::reconcile(dir);
    if !report.failures.is_empty() {
        warn!(failures = report.failures.len(), "cleanup finished with failures");
    }
    report
}

/// Writes every canonical file in `dir` into a ZIP archive and returns the
/// writer together with the number of archived files.
pub fn write_archive<W: Write + Seek>(dir: &Path, writer: W) -> Result<(W, usize), LibraryError> {
    let files = list_media(dir)?;
    let mut zip = zip::ZipWriter::new(writer);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for file in &files {
        let path = dir.join(&file.name);
        let mut source = File::open(&path).map_err(|err| LibraryError::io("opening", &path, err))?;
        zip.start_file(file.name.as_str(), options)?;
        io::copy(&mut source, &mut zip).map_err(|err| LibraryError::io("archiving", &path, err))?;
    }

    let writer = zip.finish()?;
    info!(count = files.len(), "built downloads archive");
    Ok((writer, files.len()))
}

/// Builds the archive in an anonymous temporary file, rewound and ready to
/// be streamed. The file disappears once dropped.
pub fn archive_to_tempfile(dir: &Path) -> Result<(File, usize), LibraryError> {
    let scratch = tempfile::tempfile()
        .map_err(|err| LibraryError::io("creating archive in", std::env::temp_dir(), err))?;
    let (mut file, count) = write_archive(dir, scratch)?;
    file.seek(SeekFrom::Start(0))
        .map_err(|err| LibraryError::io("rewinding archive in", std::env::temp_dir(), err))?;
    Ok((file, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::{Cursor, Read};
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn touch(path: &Path, contents: &str, age: Duration) -> Result<()> {
        fs::write(path, contents)?;
        let file = File::options().write(true).open(path)?;
        file.set_modified(SystemTime::now() - age)?;
        Ok(())
    }

    #[test]
    fn listing_is_newest_first_and_mp4_only() -> Result<()> {
        let dir = tempdir()?;
        touch(&dir.path().join("old.mp4"), "aa", Duration::from_secs(3600))?;
        touch(&dir.path().join("new.mp4"), "bbbb", Duration::from_secs(10))?;
        touch(&dir.path().join("notes.txt"), "x", Duration::from_secs(1))?;
        fs::create_dir(dir.path().join("folder.mp4"))?;

        let files = list_media(dir.path())?;

        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["new.mp4", "old.mp4"]);
        assert_eq!(files[0].size, 4);
        Ok(())
    }

    #[test]
    fn listing_missing_directory_is_empty() -> Result<()> {
        let dir = tempdir()?;
        assert!(list_media(&dir.path().join("missing"))?.is_empty());
        Ok(())
    }

    #[test]
    fn delete_rejects_traversal() -> Result<()> {
        let dir = tempdir()?;
        let inner = dir.path().join("downloads");
        fs::create_dir(&inner)?;
        fs::write(dir.path().join("secret.mp4"), "x")?;

        for name in ["../secret.mp4", "..", "", "a/b.mp4", "a\\b.mp4"] {
            assert!(matches!(
                delete_file(&inner, name),
                Err(LibraryError::InvalidName(_))
            ));
        }
        assert!(dir.path().join("secret.mp4").exists());
        assert!(matches!(
            delete_file(&inner, "absent.mp4"),
            Err(LibraryError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn delete_all_keeps_non_canonical_files() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.mp4"), "x")?;
        fs::write(dir.path().join("b.MP4"), "x")?;
        fs::write(dir.path().join("c.part"), "x")?;

        assert_eq!(delete_all(dir.path())?, 2);
        assert!(dir.path().join("c.part").exists());
        Ok(())
    }

    #[test]
    fn archive_contains_every_canonical_file() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("one.mp4"), "first")?;
        fs::write(dir.path().join("two.mp4"), "second")?;
        fs::write(dir.path().join("skip.json"), "{}")?;

        let (cursor, count) = write_archive(dir.path(), Cursor::new(Vec::new()))?;
        assert_eq!(count, 2);

        let mut archive = zip::ZipArchive::new(Cursor::new(cursor.into_inner()))?;
        let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        names.sort();
        assert_eq!(names, vec!["one.mp4", "two.mp4"]);

        let mut contents = String::new();
        archive.by_name("two.mp4")?.read_to_string(&mut contents)?;
        assert_eq!(contents, "second");
        Ok(())
    }

    #[test]
    fn tempfile_archive_is_rewound() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("clip.mp4"), "data")?;

        let (file, count) = archive_to_tempfile(dir.path())?;
        assert_eq!(count, 1);
        let mut archive = zip::ZipArchive::new(file)?;
        assert_eq!(archive.by_index(0)?.name(), "clip.mp4");
        Ok(())
    }
}
