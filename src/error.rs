//! Semantic error types for the membox application.
//!
//! This module defines the error hierarchy for membox, following the principle
//! of using semantic error enums (via `thiserror`) for conditions the caller
//! might inspect or map to user-facing reporting, while reserving opaque errors
//! (`eyre::Report`) for the application boundary.
//!
//! Every variant here is an *orchestration fault*: a failure of the harness
//! itself, never a finding about the user's code. Findings (compile errors,
//! leaks) travel as [`crate::classify::Diagnostic`] values and are not errors.

use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found at the expected path.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// The path where the configuration file was expected.
        path: Utf8PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A required configuration value is missing.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// The `OrthoConfig` library returned an error during configuration loading.
    ///
    /// This wraps errors from the layered configuration system, including
    /// file, environment, and CLI layer parsing as well as missing required
    /// fields after layer merging.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(Arc<ortho_config::OrthoError>),
}

/// Errors that can occur while managing the replica toolchain environment.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// Failed to connect to the container engine socket.
    #[error("failed to connect to container engine: {message}")]
    ConnectionFailed {
        /// A description of the connection failure.
        message: String,
    },

    /// The container engine socket was not found.
    #[error("container engine socket not found: {path}")]
    SocketNotFound {
        /// The path where the socket was expected.
        path: Utf8PathBuf,
    },

    /// Permission denied when accessing the container engine socket.
    #[error("permission denied accessing container socket: {path}")]
    PermissionDenied {
        /// The path to the socket.
        path: Utf8PathBuf,
    },

    /// Health check failed - engine did not respond correctly.
    #[error("container engine health check failed: {message}")]
    HealthCheckFailed {
        /// A description of the health check failure.
        message: String,
    },

    /// Health check timed out.
    #[error("container engine health check timed out after {seconds} seconds")]
    HealthCheckTimeout {
        /// The timeout duration in seconds.
        seconds: u64,
    },

    /// The replica environment could not be created or started.
    ///
    /// Raised when the configured image cannot be resolved (pulling images is
    /// the installer's job, not the orchestrator's) or when the engine rejects
    /// the create or start request.
    #[error("replica environment unavailable (image '{image}'): {message}")]
    Unavailable {
        /// The image the environment was to be created from.
        image: String,
        /// A description of the failure.
        message: String,
    },

    /// An operation required a running environment, but the handle is not
    /// running.
    #[error("environment '{container_id}' is not running")]
    NotRunning {
        /// The container ID of the stale handle.
        container_id: String,
    },

    /// Stopping or removing the environment failed.
    #[error("failed to tear down environment '{container_id}': {message}")]
    TeardownFailed {
        /// The container ID that could not be removed.
        container_id: String,
        /// A description of the teardown failure.
        message: String,
    },
}

/// Errors that can occur while moving files between host and environment.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The host source file does not exist or cannot be read.
    #[error("source file not found or unreadable: {path}")]
    SourceNotFound {
        /// The host path that could not be read.
        path: Utf8PathBuf,
    },

    /// The host source file has an extension no configured compiler accepts.
    #[error("unsupported source file extension: {path}")]
    UnsupportedSource {
        /// The offending host path.
        path: Utf8PathBuf,
    },

    /// Copying the source file into the environment failed.
    #[error("failed to stage file into environment '{container_id}': {message}")]
    StagingFailed {
        /// The target container ID.
        container_id: String,
        /// A description of the staging failure.
        message: String,
    },

    /// A requested artifact does not exist inside the environment.
    ///
    /// Typically the compiled binary after a failed compile.
    #[error("artifact not found in environment '{container_id}': {path}")]
    ArtifactNotFound {
        /// The container-internal path that was requested.
        path: Utf8PathBuf,
        /// The container ID that was searched.
        container_id: String,
    },

    /// Downloading an artifact out of the environment failed for a reason
    /// other than the path being absent.
    #[error("failed to retrieve artifact from environment '{container_id}': {message}")]
    RetrievalFailed {
        /// The source container ID.
        container_id: String,
        /// A description of the retrieval failure.
        message: String,
    },
}

/// Errors that can occur while launching a process inside the environment.
///
/// These cover execution-layer faults only. A launched program's own nonzero
/// exit is *not* an error; it is reported through
/// [`crate::engine::ExecutionResult`].
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The exec session could not be created, started, or observed.
    ///
    /// Covers command-not-found, resource exhaustion, and engine API faults.
    #[error("failed to launch '{command}' in environment: {message}")]
    LaunchFailed {
        /// The program that was being launched.
        command: String,
        /// A description of the launch failure.
        message: String,
    },

    /// The exec session completed but the engine reported no exit code.
    #[error("process '{command}' completed without an exit code")]
    MissingExitCode {
        /// The program whose exit code is missing.
        command: String,
    },
}

/// Top-level error type for the membox application.
///
/// This enum aggregates all domain-specific errors into a single type that can
/// be used throughout the application. At the application boundary (main.rs),
/// these errors are typically converted to `eyre::Report` for human-readable
/// error reporting.
#[derive(Debug, Error)]
pub enum MemboxError {
    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred while managing the environment.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    /// An error occurred while bridging files in or out.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// An error occurred while launching a process.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Terminal input or output failed during the interactive session.
    #[error("terminal I/O failed: {0}")]
    Terminal(#[from] std::io::Error),
}

/// A specialised `Result` type for membox operations.
pub type Result<T> = std::result::Result<T, MemboxError>;
