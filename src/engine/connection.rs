//! Socket resolution and container engine connection.
//!
//! This module provides functionality to resolve container engine socket
//! endpoints from multiple sources (environment variables, configuration,
//! platform defaults) and establish connections using the Bollard library.

use std::time::Duration;

use bollard::Docker;
use camino::Utf8PathBuf;

use crate::error::{EnvironmentError, MemboxError};

/// Environment variable names checked in fallback order after configuration
/// sources.
const FALLBACK_ENV_VARS: &[&str] = &["DOCKER_HOST", "CONTAINER_HOST", "PODMAN_HOST"];

/// Connection timeout in seconds for Docker/Podman API connections.
const CONNECTION_TIMEOUT_SECS: u64 = 120;

/// Timeout in seconds for health check operations.
const HEALTH_CHECK_TIMEOUT_SECS: u64 = 10;

/// Default socket path for Unix platforms.
#[cfg(unix)]
const DEFAULT_SOCKET: &str = "unix:///var/run/docker.sock";

/// Default socket path for Windows platforms.
#[cfg(windows)]
const DEFAULT_SOCKET: &str = "npipe:////./pipe/docker_engine";

/// Resolves container engine socket endpoints from environment variables.
///
/// The resolver checks a prioritized list of environment variables to find
/// the socket endpoint when no explicit configuration is provided.
///
/// # Type Parameters
///
/// * `E` - An environment provider implementing the `mockable::Env` trait,
///   allowing for testable environment variable access.
pub struct SocketResolver<'a, E: mockable::Env> {
    env: &'a E,
}

impl<'a, E: mockable::Env> SocketResolver<'a, E> {
    /// Creates a new socket resolver with the given environment provider.
    #[must_use]
    pub const fn new(env: &'a E) -> Self {
        Self { env }
    }

    /// Resolves the socket endpoint from fallback environment variables.
    ///
    /// Checks `DOCKER_HOST`, `CONTAINER_HOST`, then `PODMAN_HOST`, returning
    /// `None` if no fallback variable is set or all are empty.
    #[must_use]
    pub fn resolve_from_env(&self) -> Option<String> {
        FALLBACK_ENV_VARS
            .iter()
            .filter_map(|var_name| self.env.string(var_name))
            .find(|value| !value.is_empty())
    }

    /// Returns the platform default socket path.
    ///
    /// On Unix systems, this is `unix:///var/run/docker.sock`.
    /// On Windows systems, this is `npipe:////./pipe/docker_engine`.
    #[must_use]
    pub const fn default_socket() -> &'static str {
        DEFAULT_SOCKET
    }
}

/// Classifies socket endpoint types for connection handling.
enum SocketType {
    /// Unix socket or Windows named pipe with explicit scheme.
    Socket,
    /// HTTP, HTTPS, or TCP endpoint (TCP is rewritten to HTTP).
    Http,
    /// Bare path without scheme prefix.
    BarePath,
}

impl SocketType {
    fn is_socket_scheme(socket: &str) -> bool {
        socket.starts_with("unix://") || socket.starts_with("npipe://")
    }

    fn is_http_scheme(socket: &str) -> bool {
        socket.starts_with("tcp://")
            || socket.starts_with("http://")
            || socket.starts_with("https://")
    }

    /// Classify a socket string by its scheme prefix.
    fn classify(socket: &str) -> Self {
        match (Self::is_socket_scheme(socket), Self::is_http_scheme(socket)) {
            (true, _) => Self::Socket,
            (_, true) => Self::Http,
            _ => Self::BarePath,
        }
    }
}

/// Provides methods to connect to Docker or Podman container engines.
///
/// The connector supports Unix sockets, Windows named pipes, HTTP, and HTTPS
/// endpoints.
pub struct EngineConnector;

impl EngineConnector {
    /// Connect to the container engine at the specified socket path.
    ///
    /// Supports the following endpoint formats:
    /// - Unix sockets: `unix:///path/to/socket`
    /// - Windows named pipes: `npipe:////./pipe/name`
    /// - TCP: `tcp://host:port` (treated as HTTP connection)
    /// - HTTP/HTTPS: `http://host:port`, `https://host:port`
    /// - Bare paths: paths starting with `\\` or `//` are treated as Windows
    ///   named pipes; all other paths are treated as Unix sockets. Detection
    ///   is syntax-based, not platform-based.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentError::ConnectionFailed`, `SocketNotFound`, or
    /// `PermissionDenied` depending on the underlying failure.
    pub fn connect(socket: &str) -> Result<Docker, MemboxError> {
        let docker = match SocketType::classify(socket) {
            SocketType::Socket => Docker::connect_with_socket(
                socket,
                CONNECTION_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            SocketType::Http => {
                // Rewrite tcp:// to http:// for Bollard compatibility
                let http_socket = if socket.starts_with("tcp://") {
                    socket.replacen("tcp://", "http://", 1)
                } else {
                    socket.to_owned()
                };
                Docker::connect_with_http(
                    &http_socket,
                    CONNECTION_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
            }
            SocketType::BarePath => {
                let socket_uri = Self::normalize_bare_path(socket);
                Docker::connect_with_socket(
                    &socket_uri,
                    CONNECTION_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
            }
        }
        .map_err(|e| MemboxError::from(classify_connection_error(&e, socket)))?;

        Ok(docker)
    }

    /// Normalize a bare socket path to a URI with the appropriate scheme.
    ///
    /// Paths starting with `\\` or `//` are assumed to be Windows named pipe
    /// paths and are prefixed with `npipe://`. All other paths are assumed to
    /// be Unix socket paths and are prefixed with `unix://`.
    fn normalize_bare_path(path: &str) -> String {
        // Named pipes typically start with \\ or // (e.g., \\.\pipe\docker_engine)
        if path.starts_with("\\\\") || path.starts_with("//") {
            format!("npipe://{path}")
        } else {
            format!("unix://{path}")
        }
    }

    /// Resolves the socket endpoint without establishing a connection.
    ///
    /// Resolution order:
    /// 1. `config_socket` (from CLI, config file, or `MEMBOX_ENGINE_SOCKET`)
    /// 2. `DOCKER_HOST`, `CONTAINER_HOST`, `PODMAN_HOST` (via resolver)
    /// 3. Platform default socket
    #[must_use]
    pub fn resolve_socket<E: mockable::Env>(
        config_socket: Option<&str>,
        resolver: &SocketResolver<'_, E>,
    ) -> String {
        config_socket
            .filter(|s| !s.is_empty())
            .map(String::from)
            .or_else(|| resolver.resolve_from_env())
            .unwrap_or_else(|| SocketResolver::<E>::default_socket().to_owned())
    }

    /// Verify the container engine is responsive.
    ///
    /// Sends a ping request to the engine and waits for a response. This
    /// confirms the engine is operational, not just that the socket is
    /// reachable.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentError::HealthCheckFailed` if the engine does not
    /// respond correctly.
    ///
    /// Returns `EnvironmentError::HealthCheckTimeout` if the check times out.
    pub async fn health_check(docker: &Docker) -> Result<(), MemboxError> {
        let timeout = Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS);

        tokio::time::timeout(timeout, docker.ping())
            .await
            .map_err(|_| {
                MemboxError::from(EnvironmentError::HealthCheckTimeout {
                    seconds: HEALTH_CHECK_TIMEOUT_SECS,
                })
            })?
            .map_err(|e| {
                MemboxError::from(EnvironmentError::HealthCheckFailed {
                    message: e.to_string(),
                })
            })?;
        Ok(())
    }

    /// Connect to the container engine and verify it responds.
    ///
    /// Combines [`Self::connect`] with [`Self::health_check`] in a single
    /// operation, so callers know the engine is fully operational before
    /// proceeding.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::connect`] and [`Self::health_check`].
    pub async fn connect_and_verify(socket: &str) -> Result<Docker, MemboxError> {
        let docker = Self::connect(socket)?;
        Self::health_check(&docker).await?;
        Ok(docker)
    }
}

/// Extract the filesystem path from a socket URI.
///
/// Strips the scheme prefix (`unix://`, `npipe://`) to get the raw path. For
/// HTTP endpoints or bare paths, returns `None` as they either do not have
/// filesystem paths or lack the scheme prefix needed for reliable extraction.
fn extract_socket_path(socket_uri: &str) -> Option<Utf8PathBuf> {
    socket_uri
        .strip_prefix("unix://")
        .or_else(|| socket_uri.strip_prefix("npipe://"))
        .map(Utf8PathBuf::from)
}

/// Classify a `Bollard` connection error into a semantic `EnvironmentError`.
///
/// Inspects the error type and underlying cause chain to determine the most
/// specific error variant. Falls back to `ConnectionFailed` for errors that
/// do not match known patterns or for endpoints without filesystem paths.
fn classify_connection_error(
    bollard_error: &bollard::errors::Error,
    socket_uri: &str,
) -> EnvironmentError {
    let socket_path = extract_socket_path(socket_uri);
    let error_msg = bollard_error.to_string();

    if let bollard::errors::Error::SocketNotFoundError(_) = bollard_error {
        if let Some(path) = socket_path {
            return EnvironmentError::SocketNotFound { path };
        }
    }

    if let Some(kind) = io_error_kind_in_chain(bollard_error) {
        return classify_io_error_kind(kind, socket_path, &error_msg);
    }

    EnvironmentError::ConnectionFailed { message: error_msg }
}

/// Classify an I/O error kind into a semantic `EnvironmentError`.
fn classify_io_error_kind(
    kind: std::io::ErrorKind,
    socket_path: Option<Utf8PathBuf>,
    error_msg: &str,
) -> EnvironmentError {
    match (kind, socket_path) {
        (std::io::ErrorKind::PermissionDenied, Some(path)) => {
            EnvironmentError::PermissionDenied { path }
        }
        (std::io::ErrorKind::NotFound, Some(path)) => EnvironmentError::SocketNotFound { path },
        _ => EnvironmentError::ConnectionFailed {
            message: error_msg.to_owned(),
        },
    }
}

/// Walk the error source chain looking for an `io::Error` kind.
fn io_error_kind_in_chain(error: &dyn std::error::Error) -> Option<std::io::ErrorKind> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = error.source();
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Some(io_err.kind());
        }
        current = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use mockable::MockEnv;
    use rstest::rstest;

    use super::*;

    fn env_with(values: &'static [(&'static str, Option<&'static str>)]) -> MockEnv {
        let mut env = MockEnv::new();
        env.expect_string().returning(move |name| {
            values
                .iter()
                .find(|(var, _)| *var == name)
                .and_then(|(_, value)| value.map(String::from))
        });
        env
    }

    #[rstest]
    fn resolve_from_env_prefers_docker_host() {
        let env = env_with(&[
            ("DOCKER_HOST", Some("unix:///docker.sock")),
            ("CONTAINER_HOST", Some("unix:///container.sock")),
            ("PODMAN_HOST", None),
        ]);
        let resolver = SocketResolver::new(&env);
        assert_eq!(
            resolver.resolve_from_env().as_deref(),
            Some("unix:///docker.sock")
        );
    }

    #[rstest]
    fn resolve_from_env_skips_empty_values() {
        let env = env_with(&[
            ("DOCKER_HOST", Some("")),
            ("CONTAINER_HOST", Some("unix:///container.sock")),
            ("PODMAN_HOST", None),
        ]);
        let resolver = SocketResolver::new(&env);
        assert_eq!(
            resolver.resolve_from_env().as_deref(),
            Some("unix:///container.sock")
        );
    }

    #[rstest]
    fn resolve_socket_prefers_configured_value() {
        let env = env_with(&[("DOCKER_HOST", Some("unix:///env.sock"))]);
        let resolver = SocketResolver::new(&env);
        let socket = EngineConnector::resolve_socket(Some("unix:///config.sock"), &resolver);
        assert_eq!(socket, "unix:///config.sock");
    }

    #[rstest]
    fn resolve_socket_falls_back_to_platform_default() {
        let env = env_with(&[
            ("DOCKER_HOST", None),
            ("CONTAINER_HOST", None),
            ("PODMAN_HOST", None),
        ]);
        let resolver = SocketResolver::new(&env);
        let socket = EngineConnector::resolve_socket(None, &resolver);
        assert_eq!(socket, SocketResolver::<MockEnv>::default_socket());
    }

    #[rstest]
    #[case("unix:///var/run/docker.sock", Some("/var/run/docker.sock"))]
    #[case("npipe:////./pipe/docker_engine", Some("//./pipe/docker_engine"))]
    #[case("http://localhost:2375", None)]
    #[case("/bare/path.sock", None)]
    fn extract_socket_path_strips_known_schemes(
        #[case] uri: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(
            extract_socket_path(uri),
            expected.map(Utf8PathBuf::from)
        );
    }

    #[rstest]
    fn io_error_chain_classification_finds_permission_denied() {
        let classified = classify_io_error_kind(
            std::io::ErrorKind::PermissionDenied,
            Some(Utf8PathBuf::from("/run/docker.sock")),
            "denied",
        );
        match classified {
            EnvironmentError::PermissionDenied { path } => {
                assert_eq!(path, Utf8PathBuf::from("/run/docker.sock"));
            }
            other => panic!("expected PermissionDenied, got {other:?}"),
        }
    }

    #[rstest]
    fn io_error_chain_classification_falls_back_without_path() {
        let classified =
            classify_io_error_kind(std::io::ErrorKind::NotFound, None, "socket missing");
        match classified {
            EnvironmentError::ConnectionFailed { message } => {
                assert_eq!(message, "socket missing");
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
    }
}
