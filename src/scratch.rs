//! Scratch-directory lifecycle: one directory per build, guaranteed to be
//! gone when the build is over regardless of how it ended.

use std::path::Path;

use tempfile::TempDir;

use crate::config::SCRATCH_ROOT;

/// Create a fresh scratch directory under `SCRATCH_ROOT`. The directory and
/// everything under it is removed when the returned guard is dropped.
pub fn create() -> std::io::Result<TempDir> {
    tempfile::Builder::new()
        .prefix("drydock-build-")
        .tempdir_in(SCRATCH_ROOT.as_path())
}

/// Create a scratch directory nested under an arbitrary parent, mainly for
/// tests that want to point at a throwaway `tempfile::tempdir()` instead of
/// the process-wide `SCRATCH_ROOT`.
pub fn create_in(parent: &Path) -> std::io::Result<TempDir> {
    tempfile::Builder::new().prefix("drydock-build-").tempdir_in(parent)
}
