//! Client protocol FSM (C5).
//!
//! [`handshake`] drives a freshly connected socket through version and
//! (optional) auth exchange. [`remote_build`] then runs exactly one build on
//! an already-`Ready` connection, streaming a zip upload and forwarding
//! console chunks to a caller-supplied sink until the finish frame arrives.

use std::collections::HashSet;
use std::path::Path;

use log::debug;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::auth;
use crate::constants::{PROTOCOL_VERSION, READ_CHUNK_SIZE};
use crate::framing::{self, FramingError};
use crate::model::Project;
use crate::protocol::message::{
    AuthResult, BuildCommand, BuildCommandTag, FileChunk, MessageError, OnlyField, ServerHandshake,
    ServerMessage,
};

#[derive(Debug, Error)]
pub enum ClientProtocolError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("message error: {0}")]
    Message(#[from] MessageError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server's protocol version doesn't match ours ({PROTOCOL_VERSION})")]
    VersionMismatch,
    #[error("server requires a password but none was configured")]
    PasswordRequired,
    #[error("server rejected the configured password")]
    InvalidPassword,
    #[error("unexpected message for the current state")]
    ProtocolViolation,
}

pub type Result<T> = std::result::Result<T, ClientProtocolError>;

/// Send the version string, and if the server challenges for auth, answer
/// it. Resolves once the connection is `Ready` to accept a build command.
pub async fn handshake<S>(stream: &mut S, password: Option<&str>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framing::write_frame(stream, PROTOCOL_VERSION.as_bytes()).await?;
    let response = framing::read_frame(stream).await?;

    match ServerHandshake::decode(&response)? {
        ServerHandshake::VersionMismatch => Err(ClientProtocolError::VersionMismatch),
        ServerHandshake::Ready => Ok(()),
        ServerHandshake::AuthRequired(challenge) => {
            let password = password.ok_or(ClientProtocolError::PasswordRequired)?;
            let answer = auth::respond(&challenge, password);
            framing::write_frame(stream, &answer).await?;

            let response = framing::read_frame(stream).await?;
            match AuthResult::decode(&response)? {
                AuthResult::Ok => Ok(()),
                AuthResult::Fail => Err(ClientProtocolError::InvalidPassword),
            }
        }
    }
}

/// Run one remote build on an already-`Ready` connection: send the command,
/// stream `zip_path` in 8 KiB chunks, then forward `msg` frames to
/// `on_message` until the `finish` frame resolves with the exit-code vector.
pub async fn remote_build<S>(
    stream: &mut S,
    project: &Project,
    zip_path: &Path,
    only: Option<&HashSet<String>>,
    push: bool,
    mut on_message: impl FnMut(&str),
) -> Result<Vec<i32>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let command = BuildCommand {
        command: BuildCommandTag::Build,
        project: project.serialize().map_err(|_| ClientProtocolError::ProtocolViolation)?,
        only: only.map(|names| OnlyField::from_names(names.iter().cloned().collect())),
        push,
    };
    framing::write_frame(stream, &command.encode()?).await?;

    send_zip(stream, zip_path).await?;

    loop {
        let frame = framing::read_frame(stream).await?;
        match ServerMessage::decode(&frame)? {
            ServerMessage::Msg(message) => on_message(&message),
            ServerMessage::Finish(exitcodes) => return Ok(exitcodes),
        }
    }
}

async fn send_zip<S>(stream: &mut S, zip_path: &Path) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut file = tokio::fs::File::open(zip_path).await?;
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            framing::write_frame(stream, &FileChunk::End(Vec::new()).encode()).await?;
            debug!("finished streaming {}", zip_path.display());
            return Ok(());
        }
        framing::write_frame(stream, &FileChunk::Continue(buf[..n].to_vec()).encode()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn handshake_succeeds_without_password() {
        let (mut client, mut server) = duplex(64 * 1024);
        let server_task = tokio::spawn(async move {
            let version = framing::read_frame(&mut server).await.unwrap();
            assert_eq!(version, PROTOCOL_VERSION.as_bytes());
            framing::write_frame(&mut server, &ServerHandshake::Ready.encode()).await.unwrap();
        });

        handshake(&mut client, None).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_reports_version_mismatch() {
        let (mut client, mut server) = duplex(64 * 1024);
        let server_task = tokio::spawn(async move {
            let _ = framing::read_frame(&mut server).await.unwrap();
            framing::write_frame(&mut server, &ServerHandshake::VersionMismatch.encode())
                .await
                .unwrap();
        });

        let err = handshake(&mut client, None).await.unwrap_err();
        assert!(matches!(err, ClientProtocolError::VersionMismatch));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_without_password_fails_on_challenge() {
        let (mut client, mut server) = duplex(64 * 1024);
        let server_task = tokio::spawn(async move {
            let _ = framing::read_frame(&mut server).await.unwrap();
            framing::write_frame(&mut server, &ServerHandshake::AuthRequired(vec![1; 16]).encode())
                .await
                .unwrap();
        });

        let err = handshake(&mut client, None).await.unwrap_err();
        assert!(matches!(err, ClientProtocolError::PasswordRequired));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_answers_challenge_and_succeeds() {
        let (mut client, mut server) = duplex(64 * 1024);
        let challenge = vec![7u8; 16];
        let challenge_clone = challenge.clone();
        let server_task = tokio::spawn(async move {
            let _ = framing::read_frame(&mut server).await.unwrap();
            framing::write_frame(&mut server, &ServerHandshake::AuthRequired(challenge_clone).encode())
                .await
                .unwrap();
            let response = framing::read_frame(&mut server).await.unwrap();
            assert_eq!(response, auth::respond(&challenge, "hunter2"));
            framing::write_frame(&mut server, &AuthResult::Ok.encode()).await.unwrap();
        });

        handshake(&mut client, Some("hunter2")).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_surfaces_invalid_password() {
        let (mut client, mut server) = duplex(64 * 1024);
        let server_task = tokio::spawn(async move {
            let _ = framing::read_frame(&mut server).await.unwrap();
            framing::write_frame(&mut server, &ServerHandshake::AuthRequired(vec![1; 16]).encode())
                .await
                .unwrap();
            let _ = framing::read_frame(&mut server).await.unwrap();
            framing::write_frame(&mut server, &AuthResult::Fail.encode()).await.unwrap();
        });

        let err = handshake(&mut client, Some("wrong")).await.unwrap_err();
        assert!(matches!(err, ClientProtocolError::InvalidPassword));
        server_task.await.unwrap();
    }
}
