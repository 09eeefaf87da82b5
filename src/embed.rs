//! Embedded server bootstrap (C8).
//!
//! When the dispatch coordinator is given no remote hosts, it starts a
//! server in-process on loopback and connects to itself — the rest of the
//! flow is identical to talking to a real remote build-server.

use std::net::SocketAddr;

use log::{info, warn};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::protocol;

/// Accept connections on `listener` forever, spawning one task per
/// connection to run the server FSM. Runs until the listener errors or the
/// task is aborted by its caller.
pub async fn run_listener(listener: TcpListener, password: Option<String>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!("accept failed: {err}");
                return;
            }
        };
        let password = password.clone();
        tokio::spawn(async move {
            info!("connection from {addr}");
            if let Err(err) = protocol::serve_connection(stream, password.as_deref()).await {
                warn!("connection {addr} ended with error: {err}");
            }
        });
    }
}

/// Bind a loopback listener on `port` and spawn it in the background.
/// Returns the address actually bound (useful when `port == 0`) and a
/// handle the caller can abort when the embedded server is no longer
/// needed.
pub async fn spawn_local_server(
    port: u16,
    password: Option<String>,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(run_listener(listener, password));
    Ok((addr, handle))
}
