//! Dispatch coordinator (C7), client side.
//!
//! Turns one logical "build this project" request into one or more remote
//! builds, fans them out according to the chosen mode, and concatenates the
//! resulting exit-code vectors.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use futures::future::join_all;
use log::warn;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;

use crate::model::Project;
use crate::protocol::{self, client::ClientProtocolError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("connecting to {addr}: {source}")]
    Connect { addr: String, source: std::io::Error },
    #[error("build against {addr} failed: {source}")]
    Protocol { addr: String, source: ClientProtocolError },
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// A build-server to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn display(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for Target {
    fn from(addr: SocketAddr) -> Self {
        Target {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

/// How a project is distributed across more than one build-server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Full build replicated to every server (wire name: `"multi"`).
    Mirror,
    /// Images round-robined across servers (wire name: `"parallel"`).
    Partition,
}

/// Run the whole dispatch: pick single/mirror/partition behavior based on
/// how many targets there are and the requested mode, and return the
/// concatenated exit-code vector across every remote build attempted.
pub async fn run(
    targets: &[Target],
    project: &Project,
    only: Option<&HashSet<String>>,
    password: Option<&str>,
    push: bool,
    mode: BuildMode,
    zip_path: &Path,
    output_tx: UnboundedSender<(Target, String)>,
) -> Result<Vec<i32>> {
    if targets.len() == 1 {
        return run_single(&targets[0], project, only, password, push, zip_path, &output_tx).await;
    }

    match mode {
        BuildMode::Mirror => run_mirror(targets, project, only, password, push, zip_path, &output_tx).await,
        BuildMode::Partition => {
            run_partition(targets, project, only, password, push, zip_path, &output_tx).await
        }
    }
}

async fn run_single(
    target: &Target,
    project: &Project,
    only: Option<&HashSet<String>>,
    password: Option<&str>,
    push: bool,
    zip_path: &Path,
    output_tx: &UnboundedSender<(Target, String)>,
) -> Result<Vec<i32>> {
    let addr = target.display();
    let mut stream = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .map_err(|source| DispatchError::Connect { addr: addr.clone(), source })?;

    protocol::handshake(&mut stream, password)
        .await
        .map_err(|source| DispatchError::Protocol { addr: addr.clone(), source })?;

    let target_for_cb = target.clone();
    let tx = output_tx.clone();
    let exitcodes = protocol::remote_build(&mut stream, project, zip_path, only, push, |message| {
        if tx.send((target_for_cb.clone(), message.to_string())).is_err() {
            warn!("output receiver dropped while build against {addr} was in progress");
        }
    })
    .await
    .map_err(|source| DispatchError::Protocol { addr: addr.clone(), source })?;

    Ok(exitcodes)
}

async fn run_mirror(
    targets: &[Target],
    project: &Project,
    only: Option<&HashSet<String>>,
    password: Option<&str>,
    push: bool,
    zip_path: &Path,
    output_tx: &UnboundedSender<(Target, String)>,
) -> Result<Vec<i32>> {
    let futures = targets.iter().map(|target| {
        run_single(target, project, only, password, push, zip_path, output_tx)
    });
    let results = join_all(futures).await;

    let mut exitcodes = Vec::new();
    for result in results {
        exitcodes.extend(result?);
    }
    Ok(exitcodes)
}

async fn run_partition(
    targets: &[Target],
    project: &Project,
    only: Option<&HashSet<String>>,
    password: Option<&str>,
    push: bool,
    zip_path: &Path,
    output_tx: &UnboundedSender<(Target, String)>,
) -> Result<Vec<i32>> {
    let names: Vec<String> = match only {
        Some(names) => names.iter().cloned().collect(),
        None => project.image_names(),
    };

    let futures = names.iter().enumerate().map(|(i, name)| {
        let target = &targets[i % targets.len()];
        let single_only: HashSet<String> = HashSet::from([name.clone()]);
        async move {
            run_single(target, project, Some(&single_only), password, push, zip_path, output_tx).await
        }
    });
    let results = join_all(futures).await;

    let mut exitcodes = Vec::new();
    for result in results {
        exitcodes.extend(result?);
    }
    Ok(exitcodes)
}

/// Parse a `host` or `host:port` CLI value, falling back to `default_port`.
pub fn parse_target(spec: &str, default_port: u16) -> Target {
    match spec.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => Target { host: host.to_string(), port },
            Err(_) => Target { host: spec.to_string(), port: default_port },
        },
        None => Target { host: spec.to_string(), port: default_port },
    }
}

/// Fold a collected exit-code vector into a process exit status: `1` if no
/// image was built at all, otherwise the maximum exit code observed.
pub fn final_exit_code(exitcodes: &[i32]) -> i32 {
    match exitcodes.iter().max() {
        Some(&code) => code,
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let t = parse_target("example.com:9000", 28847);
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, 9000);
    }

    #[test]
    fn parses_host_only_using_default_port() {
        let t = parse_target("example.com", 28847);
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, 28847);
    }

    #[test]
    fn final_exit_code_is_one_when_nothing_built() {
        assert_eq!(final_exit_code(&[]), 1);
    }

    #[test]
    fn final_exit_code_is_the_max_of_the_vector() {
        assert_eq!(final_exit_code(&[0, 3, 1]), 3);
    }
}
