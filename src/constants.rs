//! Protocol-wide constants shared by the client and server halves.

/// Version string exchanged as the very first message of a connection.
pub const PROTOCOL_VERSION: &str = "0.2";

/// Maximum payload size accepted by the framing codec, in bytes.
pub const MAX_MESSAGE_LENGTH: usize = 130 * 1024;

/// Number of random bytes drawn for an auth challenge.
pub const CHALLENGE_LENGTH: usize = 16;

/// Size of the SHA-256 digest sent back in response to a challenge.
pub const AUTH_RESPONSE_LENGTH: usize = 32;

/// Chunk size used when streaming a zip file to the server.
pub const READ_CHUNK_SIZE: usize = 8192;

/// File-chunk prefix meaning "more data follows".
pub const CHUNK_CONTINUE: u8 = 0x00;

/// File-chunk prefix meaning "this is the final chunk".
pub const CHUNK_END: u8 = 0x01;

/// Default TCP port for a build-server.
pub const DEFAULT_PORT: u16 = 28847;

/// Name of the file written inside the scratch directory while a zip is streamed in.
pub const UPLOAD_ZIP_NAME: &str = "upload.zip";

/// Default dockerfile name, relative to an image's `path`.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Exit code recorded for an image slot whose build process was killed by a
/// signal rather than exiting normally.
pub const TERMINATED_EXIT_CODE: i32 = 137;

/// Exit code recorded for an image slot whose builder process could not be
/// spawned at all (missing executable, bad cwd, ...).
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;
