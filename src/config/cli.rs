//! Command-line argument definitions for membox.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Command-line interface for membox.
#[derive(Debug, Parser)]
#[command(name = "membox")]
#[command(
    author,
    version,
    about = "Compile and memory-check C/C++ sources inside a replica toolchain container"
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Container engine socket path or URL.
    #[arg(long, global = true)]
    pub engine_socket: Option<String>,

    /// Replica toolchain image to use.
    #[arg(long, global = true)]
    pub image: Option<String>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start an interactive compile-and-memory-check session.
    Check(CheckArgs),
}

/// Arguments for the `check` subcommand.
#[derive(Debug, Parser)]
pub struct CheckArgs {
    /// Source file for the first attempt. Prompted for when omitted.
    pub source: Option<Utf8PathBuf>,
}
