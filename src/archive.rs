//! Archive collaborator (C9): zip a build context for upload, unzip one into
//! a scratch directory on receipt.
//!
//! Kept behind narrow traits so the wire/runner code never touches the `zip`
//! crate directly — a test can swap in a fake without touching a real
//! filesystem.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive entry {0:?} escapes the extraction root")]
    PathTraversal(String),
    #[error("archive entry has no valid file name: {0:?}")]
    BadEntryName(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Builds a zip archive from a directory tree.
pub trait ArchiveWriter {
    /// Write `dir`'s contents (recursively, paths relative to `dir`) into a
    /// new zip file at `dest`.
    fn write_dir(&self, dir: &Path, dest: &Path) -> Result<()>;
}

/// Extracts a zip archive into a directory.
pub trait ArchiveExtractor {
    /// Extract the zip file at `src` into `dest`, which must already exist.
    fn extract(&self, src: &Path, dest: &Path) -> Result<()>;
}

/// Default `ArchiveWriter`/`ArchiveExtractor` backed by the `zip` crate.
pub struct ZipArchive;

impl ArchiveWriter for ZipArchive {
    fn write_dir(&self, dir: &Path, dest: &Path) -> Result<()> {
        let file = File::create(dest)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let relative = path.strip_prefix(dir).expect("walkdir yields children of dir");
            if relative.as_os_str().is_empty() {
                continue;
            }
            let name = relative
                .to_str()
                .ok_or_else(|| ArchiveError::BadEntryName(relative.to_string_lossy().into_owned()))?;

            if entry.file_type().is_dir() {
                zip.add_directory(format!("{name}/"), options)?;
            } else if entry.file_type().is_file() {
                zip.start_file(name, options)?;
                let mut f = File::open(path)?;
                std::io::copy(&mut f, &mut zip)?;
            }
            // symlinks and other special files are skipped
        }

        zip.finish()?;
        Ok(())
    }
}

impl ArchiveExtractor for ZipArchive {
    fn extract(&self, src: &Path, dest: &Path) -> Result<()> {
        let file = File::open(src)?;
        let mut archive = zip::ZipArchive::new(file)?;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            let out_path = safe_join(dest, &name)?;

            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out_file = File::create(&out_path)?;
            copy_entry(&mut entry, &mut out_file)?;
        }
        Ok(())
    }
}

fn copy_entry<R: Read>(entry: &mut R, out: &mut File) -> Result<()> {
    std::io::copy(entry, out)?;
    Ok(())
}

/// Resolve `name` against `root`, rejecting any entry whose path (after
/// normalizing `..` components) would land outside of `root` — the
/// "zip-slip" path traversal hardening.
fn safe_join(root: &Path, name: &str) -> Result<std::path::PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(name).components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::PathTraversal(name.to_string()));
            }
        }
    }
    if !resolved.starts_with(root) {
        return Err(ArchiveError::PathTraversal(name.to_string()));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_file(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut f = File::create(path).unwrap();
        f.write_all(contents).unwrap();
    }

    #[test]
    fn round_trips_a_directory_tree() {
        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("Dockerfile"), b"FROM scratch\n");
        write_file(&src.path().join("nested/app.py"), b"print('hi')\n");

        let archive_file = tempfile::NamedTempFile::new().unwrap();
        let archiver = ZipArchive;
        archiver.write_dir(src.path(), archive_file.path()).unwrap();

        let dest = tempfile::tempdir().unwrap();
        archiver.extract(archive_file.path(), dest.path()).unwrap();

        let dockerfile = std::fs::read(dest.path().join("Dockerfile")).unwrap();
        assert_eq!(dockerfile, b"FROM scratch\n");
        let nested = std::fs::read(dest.path().join("nested/app.py")).unwrap();
        assert_eq!(nested, b"print('hi')\n");
    }

    #[test]
    fn rejects_entries_that_escape_the_extraction_root() {
        let dest = tempfile::tempdir().unwrap();
        let err = safe_join(dest.path(), "../../etc/passwd").unwrap_err();
        assert!(matches!(err, ArchiveError::PathTraversal(_)));
    }

    #[test]
    fn rejects_absolute_entry_paths() {
        let dest = tempfile::tempdir().unwrap();
        let err = safe_join(dest.path(), "/etc/passwd").unwrap_err();
        assert!(matches!(err, ArchiveError::PathTraversal(_)));
    }

    #[test]
    fn allows_plain_relative_entries() {
        let dest = tempfile::tempdir().unwrap();
        let resolved = safe_join(dest.path(), "a/b/c.txt").unwrap();
        assert_eq!(resolved, dest.path().join("a/b/c.txt"));
    }
}
