//! Build orchestrator (C6), server side.
//!
//! Builds every image in a project against an already-extracted scratch
//! directory, then optionally pushes them. Subprocess output is relayed
//! verbatim through `output_tx`; the orchestrator never interprets it.

use std::collections::HashSet;
use std::path::Path;

use log::{info, warn};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::DOCKER_BIN;
use crate::constants::SPAWN_FAILURE_EXIT_CODE;
use crate::model::{HostIdentity, ModelError, Project};
use crate::runner::{self, RunnerError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("expanding tag for image {name:?}: {source}")]
    BadTag { name: String, source: ModelError },
    #[error("push of image {name:?} exited with code {code}")]
    PushFailed { name: String, code: i32 },
    #[error("spawning push for image {name:?}: {source}")]
    PushSpawn { name: String, source: RunnerError },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Build every image in `project` not excluded by `only`, in declaration
/// order, returning one exit code per image attempted.
///
/// A non-zero `preexec_command` exit code short-circuits that image's
/// `docker build` invocation and is recorded as its exit code; a failure to
/// even spawn either step is recorded as `SPAWN_FAILURE_EXIT_CODE` rather
/// than aborting the whole project.
pub async fn build_images(
    workdir: &Path,
    project: &Project,
    only: Option<&HashSet<String>>,
    output_tx: UnboundedSender<Vec<u8>>,
) -> Result<Vec<i32>> {
    let host = HostIdentity::current();
    let mut exitcodes = Vec::new();

    for image in &project.images {
        if let Some(only) = only {
            if !only.contains(&image.name) {
                continue;
            }
        }

        let buildpath = workdir.join(&image.buildpath);
        info!("building image {:?} in {}", image.name, buildpath.display());

        if let Some(preexec) = &image.preexec_command {
            if let Some((executable, argv)) = split_argv(preexec) {
                let code = run_to_code(&buildpath, executable, argv, output_tx.clone()).await;
                if code != 0 {
                    warn!("preexec_command for {:?} exited {code}, skipping build", image.name);
                    exitcodes.push(code);
                    continue;
                }
            }
        }

        let tag = image.expand_tag(&host).map_err(|source| OrchestratorError::BadTag {
            name: image.name.clone(),
            source,
        })?;
        let dockerfile_path = workdir.join(&image.path).join(&image.dockerfile);
        let argv = [
            "build".to_string(),
            "-t".to_string(),
            tag,
            "-f".to_string(),
            dockerfile_path.to_string_lossy().into_owned(),
            ".".to_string(),
        ];
        let code = run_to_code(&buildpath, &DOCKER_BIN, &argv, output_tx.clone()).await;
        info!("image {:?} build exited {code}", image.name);
        exitcodes.push(code);
    }

    Ok(exitcodes)
}

/// Push every image in `project` not excluded by `only`, in declaration
/// order. Stops and reports the first non-zero or unspawnable push, since a
/// half-pushed project is a connection-level failure rather than
/// per-image data.
pub async fn push_images(
    workdir: &Path,
    project: &Project,
    only: Option<&HashSet<String>>,
    output_tx: UnboundedSender<Vec<u8>>,
) -> Result<()> {
    let host = HostIdentity::current();

    for image in &project.images {
        if let Some(only) = only {
            if !only.contains(&image.name) {
                continue;
            }
        }

        let tag = image.expand_tag(&host).map_err(|source| OrchestratorError::BadTag {
            name: image.name.clone(),
            source,
        })?;
        let argv = ["push".to_string(), tag];
        let outcome = runner::run(workdir, &DOCKER_BIN, &argv, output_tx.clone())
            .await
            .map_err(|source| OrchestratorError::PushSpawn {
                name: image.name.clone(),
                source,
            })?;
        let code = outcome.as_code();
        if code != 0 {
            return Err(OrchestratorError::PushFailed {
                name: image.name.clone(),
                code,
            });
        }
        info!("pushed image {:?}", image.name);
    }

    Ok(())
}

fn split_argv(preexec: &[String]) -> Option<(&str, &[String])> {
    preexec.split_first().map(|(exe, rest)| (exe.as_str(), rest))
}

async fn run_to_code(
    cwd: &Path,
    executable: &str,
    argv: &[String],
    output_tx: UnboundedSender<Vec<u8>>,
) -> i32 {
    match runner::run(cwd, executable, argv, output_tx).await {
        Ok(outcome) => outcome.as_code(),
        Err(err) => {
            warn!("failed to run {executable:?}: {err}");
            SPAWN_FAILURE_EXIT_CODE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Image;
    use tokio::sync::mpsc;

    async fn drain(mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend(chunk);
        }
        out
    }

    fn project_with_true_and_false(tmp: &std::path::Path) -> Project {
        std::fs::create_dir_all(tmp.join("ok")).unwrap();
        std::fs::write(tmp.join("ok/Dockerfile"), b"FROM scratch\n").unwrap();
        std::fs::create_dir_all(tmp.join("bad")).unwrap();
        std::fs::write(tmp.join("bad/Dockerfile"), b"FROM scratch\n").unwrap();

        Project::new(
            "demo",
            vec![
                Image::new(
                    "ok",
                    None,
                    None,
                    None,
                    None,
                    Some(vec!["true".to_string()]),
                )
                .unwrap(),
                Image::new(
                    "bad",
                    None,
                    None,
                    None,
                    None,
                    Some(vec!["false".to_string()]),
                )
                .unwrap(),
            ],
        )
    }

    #[tokio::test]
    async fn preexec_failure_skips_build_and_records_its_code() {
        let dir = tempfile::tempdir().unwrap();
        let project = project_with_true_and_false(dir.path());
        let (tx, rx) = mpsc::unbounded_channel();

        // This exercises real `docker` invocations for the "ok" image, which
        // isn't available in a sandboxed test runner; restrict to the
        // preexec-only path by filtering to just the failing image.
        let only: HashSet<String> = ["bad".to_string()].into_iter().collect();
        let codes = build_images(dir.path(), &project, Some(&only), tx)
            .await
            .unwrap();
        drop(drain(rx).await);

        assert_eq!(codes.len(), 1);
        assert_ne!(codes[0], 0);
    }

    #[tokio::test]
    async fn only_filter_selects_a_subset_of_images() {
        let dir = tempfile::tempdir().unwrap();
        let project = project_with_true_and_false(dir.path());
        let (tx, rx) = mpsc::unbounded_channel();

        let only: HashSet<String> = ["bad".to_string()].into_iter().collect();
        let codes = build_images(dir.path(), &project, Some(&only), tx)
            .await
            .unwrap();
        drop(drain(rx).await);

        assert_eq!(codes.len(), 1);
    }

    #[tokio::test]
    async fn empty_project_yields_empty_exit_code_vector() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("empty", vec![]);
        let (tx, rx) = mpsc::unbounded_channel();

        let codes = build_images(dir.path(), &project, None, tx).await.unwrap();
        drop(drain(rx).await);

        assert!(codes.is_empty());
    }
}
