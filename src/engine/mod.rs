//! Container engine access for the replica toolchain environment.
//!
//! This module groups the four engine-facing concerns:
//!
//! - [`connection`]: socket resolution and engine connection. The socket
//!   endpoint is resolved through a priority-based fallback chain:
//!   1. CLI argument (`--engine-socket`)
//!   2. Config file (`engine_socket` in TOML)
//!   3. `MEMBOX_ENGINE_SOCKET` environment variable
//!   4. `DOCKER_HOST`, `CONTAINER_HOST`, `PODMAN_HOST` environment variables
//!   5. Platform default (`/var/run/docker.sock` on Unix)
//! - [`environment`]: lifecycle of the single environment container
//! - [`bridge`]: staging source files in, retrieving artifacts out
//! - [`runner`]: executing commands with captured streams and timeouts

mod bridge;
mod connection;
mod environment;
mod runner;

pub use bridge::{
    DownloadFromContainerFuture, SourceArtifact, UploadToContainerFuture, WorkspaceClient,
    retrieve_artifact, stage_source,
};
pub use connection::{EngineConnector, SocketResolver};
pub use environment::{
    ContainerActionFuture, CreateContainerFuture, EnvironmentClient, EnvironmentHandle,
    EnvironmentManager, EnvironmentState, InspectImageFuture,
};
pub use runner::{
    CreateExecFuture, ExecutionResult, InspectExecFuture, ProcessClient, RunRequest,
    StartExecFuture, TIMEOUT_EXIT_CODE, run,
};
