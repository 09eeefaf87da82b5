//! Configuration & environment (C12).
//!
//! Everything here is resolved lazily from the environment the first time
//! it's touched, so a unit test can set `std::env::set_var` before calling
//! in and get a deterministic value instead of whatever the process's real
//! environment happens to contain.

use once_cell::sync::Lazy;

/// Path to (or bare name of) the `docker` executable used for builds,
/// pushes and preexec commands. Defaults to `"docker"`, resolved via `PATH`.
pub static DOCKER_BIN: Lazy<String> =
    Lazy::new(|| std::env::var("DRYDOCK_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()));

/// Root directory under which per-build scratch directories are created.
/// Defaults to the OS temp dir.
pub static SCRATCH_ROOT: Lazy<std::path::PathBuf> = Lazy::new(|| {
    std::env::var("DRYDOCK_SCRATCH_ROOT")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
});
