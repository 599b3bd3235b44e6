//! The CLI application: a thin demonstration harness over `mapper-core`/`mapper-schema`.
//!
//! It is deliberately small — the core contract (§1 of the design) is a library; this binary
//! exists so a mapping configuration can be validated and a query planned from a shell without
//! writing a Rust program to do it.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mapper_cli::*;
use mapper_schema::environment::ProcessEnvironment;

/// The command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about = "Query compiler + SQL projection planner for a declarative mapping")]
pub struct Args {
    /// Path to the mapping configuration (YAML or JSON). Defaults to `./mapping.yaml`.
    #[arg(long = "config", env = "MAPPER_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,
    /// The command to invoke.
    #[command(subcommand)]
    pub subcommand: Command,
}

#[tokio::main]
pub async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = try_main().await {
        eprintln!("ERROR: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// The application entrypoint. It pulls information from the environment and then calls
/// [`run`]. The library remains unaware of the environment, so that we can more easily test it.
async fn try_main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = match args.config_path {
        Some(path) => path,
        None => env::current_dir()?.join("mapping.yaml"),
    };
    let context = Context {
        config_path,
        environment: ProcessEnvironment,
    };
    run(args.subcommand, context).await?;
    Ok(())
}
