//! Configuration system for membox.
//!
//! This module provides the configuration structures and CLI definitions for
//! the membox application. Configuration loading and precedence merging is
//! handled by the `ortho_config` crate. Intended precedence: CLI flags
//! override environment variables, which override configuration files, which
//! override defaults.
//!
//! The configuration file is expected at `~/.config/membox/config.toml` by
//! default.
//!
//! # Example Configuration
//!
//! ```toml
//! engine_socket = "unix:///run/user/1000/podman/podman.sock"
//! image = "ghcr.io/membox/toolchain:gcc-13-valgrind"
//!
//! [toolchain]
//! cc = "gcc"
//! cxx = "g++"
//! flags = ["-Wall", "-Wextra", "-g", "-O0"]
//! output_name = "program"
//!
//! [analyzer]
//! command = "valgrind"
//! flags = ["--leak-check=full", "--show-leak-kinds=definite"]
//!
//! [limits]
//! compile_timeout_secs = 60
//! analyze_timeout_secs = 120
//!
//! [workspace]
//! staging_dir = "/workspace"
//! ```

mod cli;
mod loader;
mod types;

#[cfg(test)]
mod tests;

pub use cli::{CheckArgs, Cli, Commands};
pub use loader::{env_var_names, load_config};
pub use types::{
    AnalyzerConfig, AppConfig, DEFAULT_IMAGE, LimitsConfig, SourceLanguage, ToolchainConfig,
    WorkspaceConfig,
};
