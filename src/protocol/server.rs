//! Server protocol FSM (C4).
//!
//! One call to [`serve_connection`] owns a socket end to end: version
//! handshake, optional auth challenge, then any number of build commands
//! until the peer disconnects or commits a protocol violation.

use std::path::Path;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::archive::{ArchiveExtractor, ZipArchive};
use crate::auth;
use crate::constants::{PROTOCOL_VERSION, UPLOAD_ZIP_NAME};
use crate::framing::{self, FramingError};
use crate::model::Project;
use crate::orchestrator::{self, OrchestratorError};
use crate::protocol::message::{
    AuthResult, BuildCommand, BuildCommandTag, FileChunk, MessageError, ServerHandshake, ServerMessage,
};
use crate::scratch;

#[derive(Debug, Error)]
pub enum ServerProtocolError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("message error: {0}")]
    Message(#[from] MessageError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerProtocolError>;

/// Drive one connection through the full server FSM. Returns `Ok(())` on a
/// clean peer disconnect and on every protocol violation (violations close
/// the connection rather than propagating as an error to the caller); only
/// genuine I/O failures are surfaced.
pub async fn serve_connection<S>(mut stream: S, password: Option<&str>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !wait_version(&mut stream).await? {
        return Ok(());
    }

    if let Some(password) = password {
        if !authenticate(&mut stream, password).await? {
            return Ok(());
        }
    } else {
        framing::write_frame(&mut stream, &ServerHandshake::Ready.encode()).await?;
    }

    loop {
        let frame = match framing::read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(FramingError::Closed) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let command = match BuildCommand::decode(&frame) {
            Ok(command) => command,
            Err(_) => {
                warn!("protocol violation: malformed build command");
                return Ok(());
            }
        };
        if command.command != BuildCommandTag::Build {
            return Ok(());
        }

        if !handle_build(&mut stream, command).await? {
            return Ok(());
        }
    }
}

async fn wait_version<S>(stream: &mut S) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = match framing::read_frame(stream).await {
        Ok(frame) => frame,
        Err(FramingError::Closed) => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    if frame != PROTOCOL_VERSION.as_bytes() {
        debug!("version mismatch, got {:?}", String::from_utf8_lossy(&frame));
        framing::write_frame(stream, &ServerHandshake::VersionMismatch.encode()).await?;
        return Ok(false);
    }
    Ok(true)
}

/// Returns `Ok(true)` if authentication succeeded and the connection should
/// continue into the command loop.
async fn authenticate<S>(stream: &mut S, password: &str) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let challenge = auth::generate_challenge();
    framing::write_frame(stream, &ServerHandshake::AuthRequired(challenge.clone()).encode()).await?;

    let response = match framing::read_frame(stream).await {
        Ok(frame) => frame,
        Err(FramingError::Closed) => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    if auth::verify(&challenge, password, &response) {
        framing::write_frame(stream, &AuthResult::Ok.encode()).await?;
        Ok(true)
    } else {
        warn!("auth failure");
        framing::write_frame(stream, &AuthResult::Fail.encode()).await?;
        Ok(false)
    }
}

/// Receive the project zip, run the orchestrator, and report results.
/// Returns `Ok(true)` to keep serving further commands on this connection.
async fn handle_build<S>(stream: &mut S, command: BuildCommand) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let project = match Project::deserialize(command.project.as_bytes()) {
        Ok(project) => project,
        Err(_) => {
            warn!("protocol violation: malformed project payload");
            return Ok(false);
        }
    };
    let only = command.only_set();

    let scratch = scratch::create()?;
    let zip_path = scratch.path().join(UPLOAD_ZIP_NAME);

    if !receive_file(stream, &zip_path).await? {
        return Ok(false);
    }

    info!("building project {:?} ({} images)", project.name, project.images.len());
    match run_build(scratch.path(), &project, only.as_ref(), command.push, stream).await? {
        Some(exitcodes) => {
            framing::write_frame(stream, &ServerMessage::Finish(exitcodes).encode()?).await?;
            Ok(true)
        }
        None => {
            // Push failed: per the documented resolution, this is a
            // protocol-level BUILDING failure, not per-image data, so the
            // connection drops instead of a finish frame being sent.
            Ok(false)
        }
    }
}

async fn receive_file<S>(stream: &mut S, dest: &Path) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt as _;

    let mut file = tokio::fs::File::create(dest).await?;
    loop {
        let frame = match framing::read_frame(stream).await {
            Ok(frame) => frame,
            Err(FramingError::Closed) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let chunk = match FileChunk::decode(&frame) {
            Ok(chunk) => chunk,
            Err(_) => {
                warn!("protocol violation: bad file-chunk prefix");
                return Ok(false);
            }
        };
        match chunk {
            FileChunk::Continue(data) => {
                file.write_all(&data).await?;
            }
            FileChunk::End(data) => {
                if !data.is_empty() {
                    file.write_all(&data).await?;
                }
                file.flush().await?;
                return Ok(true);
            }
        }
    }
}

/// Which phase of the build a spawned build task failed in, so the caller
/// can tell a hard orchestrator error (e.g. a bad tag template) apart from a
/// push failure, which gets different wire-level treatment.
enum BuildTaskError {
    Build(OrchestratorError),
    Push(OrchestratorError),
}

/// Extract the uploaded zip, then run the build (and optional push) on a
/// spawned task while this function drains its output channel and forwards
/// each chunk to `stream` as a `msg` frame as soon as it arrives — output
/// reaches the client while the build is still running, not after.
///
/// Returns `Ok(Some(exitcodes))` on a successful build (push included, if
/// requested); `Ok(None)` if the push step failed, signaling the caller to
/// drop the connection without sending a `finish` frame.
async fn run_build<S>(
    scratch_path: &Path,
    project: &Project,
    only: Option<&std::collections::HashSet<String>>,
    push: bool,
    stream: &mut S,
) -> Result<Option<Vec<i32>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let extract_dir = scratch_path.join("project");
    tokio::fs::create_dir_all(&extract_dir).await?;
    let zip_path = scratch_path.join(UPLOAD_ZIP_NAME);

    let extractor = ZipArchive;
    let extract_dir_clone = extract_dir.clone();
    tokio::task::spawn_blocking(move || extractor.extract(&zip_path, &extract_dir_clone))
        .await
        .expect("extraction task panicked")
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let project_owned = project.clone();
    let only_owned = only.cloned();
    let extract_dir_for_build = extract_dir.clone();
    let build_task = tokio::spawn(async move {
        let exitcodes = orchestrator::build_images(
            &extract_dir_for_build,
            &project_owned,
            only_owned.as_ref(),
            tx.clone(),
        )
        .await
        .map_err(BuildTaskError::Build)?;

        if push {
            orchestrator::push_images(&extract_dir_for_build, &project_owned, only_owned.as_ref(), tx.clone())
                .await
                .map_err(BuildTaskError::Push)?;
        }

        Ok::<Vec<i32>, BuildTaskError>(exitcodes)
    });

    while let Some(chunk) = rx.recv().await {
        let text = String::from_utf8_lossy(&chunk).into_owned();
        framing::write_frame(stream, &ServerMessage::Msg(text).encode()?).await?;
    }

    match build_task.await.expect("build task panicked") {
        Ok(exitcodes) => Ok(Some(exitcodes)),
        Err(BuildTaskError::Push(err)) => {
            warn!("push failed, dropping connection: {err}");
            Ok(None)
        }
        Err(BuildTaskError::Build(err)) => {
            Err(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()).into())
        }
    }
}
