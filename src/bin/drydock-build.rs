//! Build client entry point: reads a project descriptor, zips it, and
//! drives one or more build-servers (or an embedded local one).

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;

use drydock::archive::{ArchiveWriter, ZipArchive};
use drydock::config::SCRATCH_ROOT;
use drydock::constants::DEFAULT_PORT;
use drydock::dispatch::{self, BuildMode, Target};
use drydock::embed::spawn_local_server;
use drydock::model::Project;

/// Build (and optionally push) a project's Docker images on a remote
/// build-server.
#[derive(Debug, Parser)]
#[command(name = "drydock-build", about = "Dispatch a Docker image build to one or more build-servers")]
struct Args {
    /// Directory containing drydock.json. Defaults to the current directory.
    project_dir: Option<PathBuf>,

    /// Override the project name from drydock.json.
    #[arg(long)]
    name: Option<String>,

    /// Build on this server (host or host:port). May be repeated; if
    /// omitted, a local server is started in-process.
    #[arg(short = 's', long = "buildserver")]
    buildserver: Vec<String>,

    /// How to distribute images across more than one build-server.
    #[arg(short = 'm', long = "buildmode", value_enum, default_value_t = CliBuildMode::Parallel)]
    buildmode: CliBuildMode,

    /// Port to use for servers specified without one, and for the embedded
    /// server.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Password to authenticate with.
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Only build images with this name. May be repeated.
    #[arg(short, long = "only")]
    only: Vec<String>,

    /// Push built images to their registries after a successful build.
    #[arg(long)]
    push: bool,

    /// Raise the log level from info to debug.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliBuildMode {
    Parallel,
    Multi,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let project_dir = args.project_dir.unwrap_or_else(|| PathBuf::from("."));
    let descriptor_path = project_dir.join("drydock.json");
    let descriptor = std::fs::read(&descriptor_path)
        .map_err(|source| anyhow::anyhow!("reading {}: {source}", descriptor_path.display()))?;
    let mut project = Project::deserialize(&descriptor)
        .map_err(|source| anyhow::anyhow!("parsing {}: {source}", descriptor_path.display()))?;
    if let Some(name) = args.name {
        project.name = name;
    }

    let only: Option<HashSet<String>> = if args.only.is_empty() {
        None
    } else {
        Some(args.only.into_iter().collect())
    };

    let scratch = tempfile::Builder::new()
        .prefix("drydock-build-")
        .tempdir_in(SCRATCH_ROOT.as_path())?;
    let zip_path = scratch.path().join("upload.zip");
    info!("zipping {} into {}", project_dir.display(), zip_path.display());
    ZipArchive.write_dir(&project_dir, &zip_path)?;

    let mut embedded_handle = None;
    let targets: Vec<Target> = if args.buildserver.is_empty() {
        let (addr, handle) = spawn_local_server(args.port, args.password.clone()).await?;
        embedded_handle = Some(handle);
        vec![addr.into()]
    } else {
        args.buildserver
            .iter()
            .map(|spec| dispatch::parse_target(spec, args.port))
            .collect()
    };

    let mode = match args.buildmode {
        CliBuildMode::Parallel => BuildMode::Partition,
        CliBuildMode::Multi => BuildMode::Mirror,
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some((target, message)) = rx.recv().await {
            print!("[{}] {message}", target.display());
        }
    });

    let result = dispatch::run(
        &targets,
        &project,
        only.as_ref(),
        args.password.as_deref(),
        args.push,
        mode,
        &zip_path,
        tx,
    )
    .await;

    let _ = printer.await;
    if let Some(handle) = embedded_handle {
        handle.abort();
    }

    match result {
        Ok(exitcodes) => {
            if exitcodes.is_empty() {
                eprintln!("error: no images built!");
            } else {
                println!("exitcodes: {exitcodes:?}");
            }
            Ok(ExitCode::from(dispatch::final_exit_code(&exitcodes) as u8))
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
