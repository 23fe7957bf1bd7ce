//! `membox` application entry point.
//!
//! This binary drives an interactive compile-and-memory-check session against
//! a replica toolchain container. It uses `eyre` for opaque error handling at
//! the application boundary, converting domain-specific errors into
//! human-readable reports.
//!
//! Configuration is loaded with layered precedence via `OrthoConfig`:
//! 1. Application defaults
//! 2. Configuration file (`~/.config/membox/config.toml` or path from `MEMBOX_CONFIG_PATH`)
//! 3. Environment variables (`MEMBOX_*`)
//! 4. Command-line arguments

use clap::Parser;
use eyre::{Report, Result as EyreResult};
use membox::config::{AppConfig, CheckArgs, Cli, Commands, load_config};
use membox::engine::{EngineConnector, SocketResolver};
use membox::error::Result as MemboxResult;
use membox::session::{Session, TerminalPrompter};
use mockable::DefaultEnv;
use tracing::debug;

/// Application entry point.
///
/// Initialises logging, loads configuration with layered precedence, and
/// dispatches to the appropriate subcommand handler.
///
/// Uses `eyre::Result` as the return type to provide human-readable error
/// reports with backtraces when available.
#[tokio::main]
async fn main() -> EyreResult<()> {
    init_tracing();

    // Parse CLI first (for subcommand dispatch and global options).
    let cli = Cli::parse();

    // Load configuration with layered precedence: defaults < file < env < CLI.
    // The CLI is passed to extract --config, --engine-socket, and --image.
    let config = load_config(&cli).map_err(Report::from)?;

    run(&cli, &config).await.map_err(Report::from)
}

/// Initialise the tracing subscriber from `RUST_LOG`, defaulting to warnings.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Execute the CLI command, returning domain-specific errors.
///
/// Keeps semantic errors inside the run loop so the CLI boundary owns
/// conversion to `eyre::Report`.
async fn run(cli: &Cli, config: &AppConfig) -> MemboxResult<()> {
    match &cli.command {
        Commands::Check(args) => check(config, args).await,
    }
}

/// Run the interactive compile-and-analyze session.
///
/// Resolves the engine socket, connects and verifies the engine responds,
/// then hands control to the session loop. The session owns environment
/// acquisition and teardown; this function owns the connection.
async fn check(config: &AppConfig, args: &CheckArgs) -> MemboxResult<()> {
    let env = DefaultEnv::new();
    let resolver = SocketResolver::new(&env);
    let socket = EngineConnector::resolve_socket(config.engine_socket.as_deref(), &resolver);
    debug!(socket = %socket, "resolved engine socket");

    let docker = EngineConnector::connect_and_verify(&socket).await?;

    let mut prompter = TerminalPrompter::new();
    let mut stdout = std::io::stdout();
    let mut session = Session::new(&docker, config);
    session
        .run(args.source.clone(), &mut prompter, &mut stdout)
        .await
}
