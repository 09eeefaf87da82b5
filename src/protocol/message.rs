//! Wire message shapes exchanged over a framed connection (C4/C5).
//!
//! Handshake and file-chunk messages are small enough to hand-encode as raw
//! bytes; build commands and in-build server chatter are JSON. Keeping both
//! styles mirrors the two halves of the original protocol rather than
//! flattening everything into one JSON envelope.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{CHUNK_CONTINUE, CHUNK_END};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("empty message")]
    Empty,
    #[error("malformed auth-required message: missing challenge bytes")]
    MissingChallenge,
    #[error("unrecognized handshake tag {0:?}")]
    UnknownHandshakeTag(u8),
    #[error("unrecognized file-chunk prefix {0:#x}")]
    UnknownChunkPrefix(u8),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MessageError>;

/// What the server says immediately after receiving the client's version
/// string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerHandshake {
    /// `E`: the client's protocol version doesn't match. Connection closes.
    VersionMismatch,
    /// `O`: version ok, no password configured, straight to ready.
    Ready,
    /// `A` + challenge bytes: version ok, answer the challenge to proceed.
    AuthRequired(Vec<u8>),
}

impl ServerHandshake {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ServerHandshake::VersionMismatch => b"E".to_vec(),
            ServerHandshake::Ready => b"O".to_vec(),
            ServerHandshake::AuthRequired(challenge) => {
                let mut out = Vec::with_capacity(1 + challenge.len());
                out.push(b'A');
                out.extend_from_slice(challenge);
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, rest) = bytes.split_first().ok_or(MessageError::Empty)?;
        match tag {
            b'E' => Ok(ServerHandshake::VersionMismatch),
            b'O' => Ok(ServerHandshake::Ready),
            b'A' => {
                if rest.is_empty() {
                    Err(MessageError::MissingChallenge)
                } else {
                    Ok(ServerHandshake::AuthRequired(rest.to_vec()))
                }
            }
            other => Err(MessageError::UnknownHandshakeTag(other)),
        }
    }
}

/// The server's verdict on a client's auth response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Ok,
    Fail,
}

impl AuthResult {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            AuthResult::Ok => b"O".to_vec(),
            AuthResult::Fail => b"F".to_vec(),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"O" => Ok(AuthResult::Ok),
            b"F" => Ok(AuthResult::Fail),
            _ => Err(MessageError::UnknownHandshakeTag(*bytes.first().unwrap_or(&0))),
        }
    }
}

/// One chunk of the zipped project upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChunk {
    Continue(Vec<u8>),
    End(Vec<u8>),
}

impl FileChunk {
    pub fn encode(&self) -> Vec<u8> {
        let (prefix, data) = match self {
            FileChunk::Continue(data) => (CHUNK_CONTINUE, data),
            FileChunk::End(data) => (CHUNK_END, data),
        };
        let mut out = Vec::with_capacity(1 + data.len());
        out.push(prefix);
        out.extend_from_slice(data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&prefix, data) = bytes.split_first().ok_or(MessageError::Empty)?;
        match prefix {
            CHUNK_CONTINUE => Ok(FileChunk::Continue(data.to_vec())),
            CHUNK_END => Ok(FileChunk::End(data.to_vec())),
            other => Err(MessageError::UnknownChunkPrefix(other)),
        }
    }
}

/// The `only` field accepts `null`, a single image name, or a list of
/// names on the wire — normalized to a set once decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OnlyField {
    Single(String),
    Many(Vec<String>),
}

impl OnlyField {
    pub fn into_set(self) -> HashSet<String> {
        match self {
            OnlyField::Single(name) => HashSet::from([name]),
            OnlyField::Many(names) => names.into_iter().collect(),
        }
    }

    pub fn from_names(names: Vec<String>) -> Self {
        OnlyField::Many(names)
    }
}

/// The build command a client sends once in the `Ready` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildCommand {
    pub command: BuildCommandTag,
    /// The project, pre-serialized via `Project::serialize` (nested JSON string).
    pub project: String,
    pub only: Option<OnlyField>,
    #[serde(default)]
    pub push: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildCommandTag {
    Build,
}

impl BuildCommand {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Normalize `only` to the set the orchestrator filters against.
    /// `None` means "build everything".
    pub fn only_set(&self) -> Option<HashSet<String>> {
        self.only.clone().map(OnlyField::into_set)
    }
}

/// Server-to-client chatter while a build is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// A chunk of subprocess output to print.
    Msg(String),
    /// The build finished; one exit code per image that was attempted.
    Finish(Vec<i32>),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireServerMessage {
    Msg { message: String },
    Finish { exitcodes: Vec<i32> },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = match self {
            ServerMessage::Msg(message) => WireServerMessage::Msg {
                message: message.clone(),
            },
            ServerMessage::Finish(exitcodes) => WireServerMessage::Finish {
                exitcodes: exitcodes.clone(),
            },
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: WireServerMessage = serde_json::from_slice(bytes)?;
        Ok(match wire {
            WireServerMessage::Msg { message } => ServerMessage::Msg(message),
            WireServerMessage::Finish { exitcodes } => ServerMessage::Finish(exitcodes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips() {
        for hs in [
            ServerHandshake::VersionMismatch,
            ServerHandshake::Ready,
            ServerHandshake::AuthRequired(vec![1, 2, 3, 4]),
        ] {
            let bytes = hs.encode();
            assert_eq!(ServerHandshake::decode(&bytes).unwrap(), hs);
        }
    }

    #[test]
    fn auth_required_rejects_missing_challenge() {
        let err = ServerHandshake::decode(b"A").unwrap_err();
        assert!(matches!(err, MessageError::MissingChallenge));
    }

    #[test]
    fn auth_result_round_trips() {
        assert_eq!(AuthResult::decode(&AuthResult::Ok.encode()).unwrap(), AuthResult::Ok);
        assert_eq!(AuthResult::decode(&AuthResult::Fail.encode()).unwrap(), AuthResult::Fail);
    }

    #[test]
    fn file_chunk_round_trips() {
        let chunk = FileChunk::Continue(vec![9, 9, 9]);
        assert_eq!(FileChunk::decode(&chunk.encode()).unwrap(), chunk);
        let end = FileChunk::End(vec![]);
        assert_eq!(FileChunk::decode(&end.encode()).unwrap(), end);
    }

    #[test]
    fn build_command_round_trips_with_only_and_push() {
        let cmd = BuildCommand {
            command: BuildCommandTag::Build,
            project: "{\"name\":\"demo\"}".to_string(),
            only: Some(OnlyField::from_names(vec!["api".to_string()])),
            push: true,
        };
        let bytes = cmd.encode().unwrap();
        let back = BuildCommand::decode(&bytes).unwrap();
        assert_eq!(back.project, cmd.project);
        assert_eq!(back.only_set(), Some(HashSet::from(["api".to_string()])));
        assert!(back.push);
    }

    #[test]
    fn build_command_defaults_push_to_false() {
        let bytes = br#"{"command":"build","project":"{}","only":null}"#;
        let cmd = BuildCommand::decode(bytes).unwrap();
        assert!(!cmd.push);
        assert_eq!(cmd.only_set(), None);
    }

    #[test]
    fn build_command_accepts_a_single_only_string() {
        let bytes = br#"{"command":"build","project":"{}","only":"api"}"#;
        let cmd = BuildCommand::decode(bytes).unwrap();
        assert_eq!(cmd.only_set(), Some(HashSet::from(["api".to_string()])));
    }

    #[test]
    fn build_command_rejects_a_non_string_non_array_only() {
        let bytes = br#"{"command":"build","project":"{}","only":42}"#;
        let err = BuildCommand::decode(bytes).unwrap_err();
        assert!(matches!(err, MessageError::Json(_)));
    }

    #[test]
    fn server_message_round_trips() {
        let msg = ServerMessage::Msg("building...".to_string());
        assert_eq!(ServerMessage::decode(&msg.encode().unwrap()).unwrap(), msg);

        let finish = ServerMessage::Finish(vec![0, 1, 137]);
        assert_eq!(ServerMessage::decode(&finish.encode().unwrap()).unwrap(), finish);
    }
}
