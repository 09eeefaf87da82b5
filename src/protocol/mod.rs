//! Wire messages and the two connection FSMs built on top of them (C4/C5).

pub mod client;
pub mod message;
pub mod server;

pub use client::{ClientProtocolError, remote_build, handshake};
pub use server::{ServerProtocolError, serve_connection};
