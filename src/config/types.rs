//! Configuration data types for membox.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};

/// The pinned replica toolchain image.
///
/// This identity is what makes local findings reproduce the remote grader's:
/// same distribution, same compiler package, same Valgrind build. Overridable
/// through configuration for forks of the image, but the default is the
/// supported contract.
pub const DEFAULT_IMAGE: &str = "ghcr.io/membox/toolchain:gcc-13-valgrind";

/// Source language of a staged file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    /// A C translation unit (`.c`).
    C,
    /// A C++ translation unit (`.cpp`, `.cc`, `.cxx`).
    Cpp,
}

impl SourceLanguage {
    /// Determine the language from a source path's extension.
    ///
    /// Returns `None` for extensions neither compiler accepts; callers reject
    /// those before staging anything.
    #[must_use]
    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        match path.extension() {
            Some("c") => Some(Self::C),
            Some("cpp" | "cc" | "cxx") => Some(Self::Cpp),
            _ => None,
        }
    }
}

/// Compiler invocation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler command for C sources.
    pub cc: String,

    /// Compiler command for C++ sources.
    pub cxx: String,

    /// Flags passed to every compile. Must keep debug symbols on (`-g`) for
    /// the analyzer to attribute findings to source lines.
    pub flags: Vec<String>,

    /// Name of the produced executable inside the staging directory.
    pub output_name: String,
}

impl ToolchainConfig {
    /// Return the compiler command for the given source language.
    #[must_use]
    pub fn compiler_for(&self, language: SourceLanguage) -> &str {
        match language {
            SourceLanguage::C => &self.cc,
            SourceLanguage::Cpp => &self.cxx,
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            cc: String::from("gcc"),
            cxx: String::from("g++"),
            flags: vec![
                String::from("-Wall"),
                String::from("-Wextra"),
                String::from("-g"),
                String::from("-O0"),
            ],
            output_name: String::from("program"),
        }
    }
}

/// Memory analyzer invocation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Analyzer command.
    pub command: String,

    /// Flags passed to every analysis run. The defaults enable full
    /// leak-checking; the classifier reads the findings out of the output
    /// text rather than trusting the exit code.
    pub flags: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: String::from("valgrind"),
            flags: vec![String::from("--leak-check=full")],
        }
    }
}

/// Wall-clock limits for in-environment processes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Timeout for the compile step, in seconds.
    pub compile_timeout_secs: u64,

    /// Timeout for the memory-analysis step, in seconds. Valgrind slows the
    /// target by an order of magnitude, so this default is deliberately
    /// larger than the compile limit.
    pub analyze_timeout_secs: u64,
}

impl LimitsConfig {
    /// The compile timeout as a [`Duration`].
    #[must_use]
    pub const fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    /// The analysis timeout as a [`Duration`].
    #[must_use]
    pub const fn analyze_timeout(&self) -> Duration {
        Duration::from_secs(self.analyze_timeout_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            compile_timeout_secs: 60,
            analyze_timeout_secs: 120,
        }
    }
}

/// Workspace configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// The single staging directory inside the environment. Source files are
    /// uploaded here and the compiled binary is produced here.
    pub staging_dir: Utf8PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            staging_dir: Utf8PathBuf::from("/workspace"),
        }
    }
}

/// Root application configuration.
///
/// This structure is loaded from configuration files, environment variables,
/// and command-line arguments with layered precedence. The precedence order
/// (lowest to highest) is: defaults, configuration file, environment
/// variables, command-line arguments.
///
/// Configuration files are discovered in this order:
/// 1. Path specified via `MEMBOX_CONFIG_PATH` environment variable
/// 2. `.membox.toml` in the current working directory
/// 3. `.membox.toml` in the home directory
/// 4. `~/.config/membox/config.toml` (XDG default)
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(
    prefix = "MEMBOX",
    post_merge_hook,
    discovery(
        app_name = "membox",
        env_var = "MEMBOX_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".membox.toml",
        config_cli_long = "config",
        config_cli_visible = true,
    )
)]
pub struct AppConfig {
    /// The container engine socket path or URL.
    pub engine_socket: Option<String>,

    /// The replica toolchain image. Falls back to [`DEFAULT_IMAGE`].
    pub image: Option<String>,

    /// Compiler invocation configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub toolchain: ToolchainConfig,

    /// Memory analyzer invocation configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub analyzer: AnalyzerConfig,

    /// Process wall-clock limits.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub limits: LimitsConfig,

    /// Workspace configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub workspace: WorkspaceConfig,
}

impl AppConfig {
    /// The effective environment image: the configured one, or the pinned
    /// default.
    #[must_use]
    pub fn image_or_default(&self) -> &str {
        self.image
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_IMAGE)
    }
}

impl PostMergeHook for AppConfig {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        validate_nonzero("limits.compile_timeout_secs", self.limits.compile_timeout_secs)?;
        validate_nonzero("limits.analyze_timeout_secs", self.limits.analyze_timeout_secs)?;
        validate_nonempty("toolchain.cc", &self.toolchain.cc)?;
        validate_nonempty("toolchain.cxx", &self.toolchain.cxx)?;
        validate_nonempty("toolchain.output_name", &self.toolchain.output_name)?;
        validate_nonempty("analyzer.command", &self.analyzer.command)?;

        if !self.workspace.staging_dir.is_absolute() {
            return Err(validation_error(
                "workspace.staging_dir",
                "must be an absolute container path",
            ));
        }

        Ok(())
    }
}

fn validate_nonzero(key: &str, value: u64) -> OrthoResult<()> {
    if value == 0 {
        return Err(validation_error(key, "must be a positive integer"));
    }
    Ok(())
}

fn validate_nonempty(key: &str, value: &str) -> OrthoResult<()> {
    if value.trim().is_empty() {
        return Err(validation_error(key, "must not be empty"));
    }
    Ok(())
}

fn validation_error(key: &str, message: &str) -> Arc<ortho_config::OrthoError> {
    Arc::new(ortho_config::OrthoError::Validation {
        key: String::from(key),
        message: String::from(message),
    })
}
