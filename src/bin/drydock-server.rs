//! Build-server entry point: listens for connections and serves builds
//! until killed.

use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use drydock::constants::DEFAULT_PORT;
use drydock::embed::run_listener;

/// Run a drydock build-server.
#[derive(Debug, Parser)]
#[command(name = "drydock-server", about = "Accept and run remote Docker image builds")]
struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value = "0.0.0.0")]
    interface: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Require this password for authentication. If unset, clients connect
    /// without a challenge.
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Raise the log level from info to debug.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let listener = TcpListener::bind((args.interface.as_str(), args.port)).await?;
    info!("listening on {}:{}", args.interface, args.port);

    run_listener(listener, args.password).await;
    Ok(())
}
