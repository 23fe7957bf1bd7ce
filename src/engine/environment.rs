//! Replica environment lifecycle: create, reuse, tear down.
//!
//! This module owns the single container that replicates the remote
//! toolchain. Lifecycle operations go through the [`EnvironmentClient`] trait
//! so they can be unit-tested without a live daemon.

use std::future::Future;
use std::pin::Pin;

use bollard::Docker;
use bollard::models::{ContainerCreateBody, ContainerCreateResponse, ImageInspect};
use bollard::query_parameters::{
    CreateContainerOptions, RemoveContainerOptionsBuilder, StartContainerOptions,
};
use camino::Utf8PathBuf;
use tracing::{debug, warn};

use crate::error::{EnvironmentError, MemboxError, Result};

/// Idle keeper command for the environment container.
///
/// The container must outlive individual compile/analyze execs, so its main
/// process just sleeps until teardown.
const KEEPER_COMMAND: &[&str] = &["sleep", "infinity"];

/// Boxed future type returned by [`EnvironmentClient::inspect_image`].
pub type InspectImageFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<ImageInspect, bollard::errors::Error>> + Send + 'a>>;

/// Boxed future type returned by [`EnvironmentClient::create_container`].
pub type CreateContainerFuture<'a> = Pin<
    Box<
        dyn Future<Output = std::result::Result<ContainerCreateResponse, bollard::errors::Error>>
            + Send
            + 'a,
    >,
>;

/// Boxed future type returned by [`EnvironmentClient::start_container`] and
/// [`EnvironmentClient::remove_container`].
pub type ContainerActionFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<(), bollard::errors::Error>> + Send + 'a>>;

/// Behaviour required to manage the environment container's lifecycle.
///
/// This abstraction exists to keep lifecycle logic testable without a running
/// daemon.
pub trait EnvironmentClient {
    /// Resolve an image identity, failing when the image is absent.
    fn inspect_image(&self, image: &str) -> InspectImageFuture<'_>;

    /// Create a container from `Bollard` options and body payload.
    fn create_container(
        &self,
        options: Option<CreateContainerOptions>,
        config: ContainerCreateBody,
    ) -> CreateContainerFuture<'_>;

    /// Start a created container.
    fn start_container(&self, container_id: &str) -> ContainerActionFuture<'_>;

    /// Force-remove a container and its anonymous volumes.
    fn remove_container(&self, container_id: &str) -> ContainerActionFuture<'_>;
}

impl EnvironmentClient for Docker {
    fn inspect_image(&self, image: &str) -> InspectImageFuture<'_> {
        let image_owned = String::from(image);
        Box::pin(async move { Self::inspect_image(self, &image_owned).await })
    }

    fn create_container(
        &self,
        options: Option<CreateContainerOptions>,
        config: ContainerCreateBody,
    ) -> CreateContainerFuture<'_> {
        Box::pin(async move { Self::create_container(self, options, config).await })
    }

    fn start_container(&self, container_id: &str) -> ContainerActionFuture<'_> {
        let container_id_owned = String::from(container_id);
        Box::pin(async move {
            Self::start_container(self, &container_id_owned, None::<StartContainerOptions>).await
        })
    }

    fn remove_container(&self, container_id: &str) -> ContainerActionFuture<'_> {
        let container_id_owned = String::from(container_id);
        let options = RemoveContainerOptionsBuilder::default()
            .force(true)
            .v(true)
            .build();
        Box::pin(async move {
            Self::remove_container(self, &container_id_owned, Some(options)).await
        })
    }
}

/// Lifecycle state of an environment handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvironmentState {
    /// No container exists yet.
    #[default]
    NotCreated,
    /// The container is running and accepting execs.
    Running,
    /// The container has been torn down. Terminal for this handle instance.
    Stopped,
}

/// One running instance of the replica toolchain environment.
///
/// Handles are created by [`EnvironmentManager::acquire`] and invalidated by
/// [`EnvironmentManager::release`]; `Stopped` is terminal, a fresh `acquire`
/// yields a new, independent handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    container_id: String,
    image: String,
    state: EnvironmentState,
}

impl EnvironmentHandle {
    /// The engine-assigned container identifier.
    #[must_use]
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// The image this environment was created from.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// The current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> EnvironmentState {
        self.state
    }

    /// Whether the environment accepts staging and exec operations.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == EnvironmentState::Running
    }

    /// Fail with `EnvironmentNotRunning` unless the handle is running.
    ///
    /// Bridge and runner operations call this before touching the engine; they
    /// never create an environment themselves.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentError::NotRunning` when the handle is not running.
    pub fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        Err(MemboxError::from(EnvironmentError::NotRunning {
            container_id: self.container_id.clone(),
        }))
    }
}

#[cfg(test)]
impl EnvironmentHandle {
    /// Construct a running handle without touching an engine. Test-only.
    pub(crate) fn running_for_tests(container_id: &str) -> Self {
        Self {
            container_id: String::from(container_id),
            image: String::from("test-image"),
            state: EnvironmentState::Running,
        }
    }

    /// Construct a stopped handle without touching an engine. Test-only.
    pub(crate) fn stopped_for_tests(container_id: &str) -> Self {
        Self {
            container_id: String::from(container_id),
            image: String::from("test-image"),
            state: EnvironmentState::Stopped,
        }
    }
}

/// Owns the session's single environment handle.
///
/// Exactly one handle is active at a time; `acquire` is idempotent while the
/// handle is running, and `release` tears the container down. Only the
/// session loop calls these.
pub struct EnvironmentManager<'a, C: EnvironmentClient> {
    client: &'a C,
    image: String,
    staging_dir: Utf8PathBuf,
    handle: Option<EnvironmentHandle>,
}

impl<'a, C: EnvironmentClient> EnvironmentManager<'a, C> {
    /// Create a manager for the given image and in-container staging
    /// directory. No container is created until [`Self::acquire`].
    #[must_use]
    pub fn new(client: &'a C, image: impl Into<String>, staging_dir: Utf8PathBuf) -> Self {
        Self {
            client,
            image: image.into(),
            staging_dir,
            handle: None,
        }
    }

    /// The current handle, if any.
    #[must_use]
    pub const fn handle(&self) -> Option<&EnvironmentHandle> {
        self.handle.as_ref()
    }

    /// Return a running environment handle, creating one if necessary.
    ///
    /// Idempotent: while the current handle is running it is returned as-is.
    /// After a `release` (or on first use) a fresh container is created from
    /// the configured image and started. The image must already be present;
    /// fetching it is the installer's job.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentError::Unavailable` when the image cannot be
    /// resolved or the engine rejects the create/start request.
    pub async fn acquire(&mut self) -> Result<&EnvironmentHandle> {
        let reusable = self
            .handle
            .as_ref()
            .is_some_and(EnvironmentHandle::is_running);

        if !reusable {
            self.client
                .inspect_image(&self.image)
                .await
                .map_err(|error| unavailable(&self.image, error.to_string()))?;

            let body = ContainerCreateBody {
                image: Some(self.image.clone()),
                cmd: Some(KEEPER_COMMAND.iter().map(|s| String::from(*s)).collect()),
                working_dir: Some(self.staging_dir.as_str().to_owned()),
                ..ContainerCreateBody::default()
            };

            let created = self
                .client
                .create_container(None, body)
                .await
                .map_err(|error| unavailable(&self.image, error.to_string()))?;

            if let Err(error) = self.client.start_container(&created.id).await {
                // The created-but-unstartable container must not linger.
                if let Err(cleanup_error) = self.client.remove_container(&created.id).await {
                    warn!(
                        container_id = %created.id,
                        error = %cleanup_error,
                        "failed to remove unstartable environment container"
                    );
                }
                return Err(unavailable(&self.image, error.to_string()));
            }

            debug!(container_id = %created.id, image = %self.image, "environment started");

            self.handle = Some(EnvironmentHandle {
                container_id: created.id,
                image: self.image.clone(),
                state: EnvironmentState::Running,
            });
        }

        self.handle
            .as_ref()
            .ok_or_else(|| unavailable(&self.image, "environment handle missing after acquire"))
    }

    /// Stop and remove the environment.
    ///
    /// Safe to call when no environment exists or the handle is already
    /// stopped (no-op). Any staged file inside the container becomes
    /// unreachable.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentError::TeardownFailed` when the engine rejects the
    /// removal; the handle is still marked stopped so a later `acquire`
    /// starts fresh.
    pub async fn release(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        if handle.state != EnvironmentState::Running {
            return Ok(());
        }

        handle.state = EnvironmentState::Stopped;
        let container_id = handle.container_id.clone();

        self.client
            .remove_container(&container_id)
            .await
            .map_err(|error| {
                MemboxError::from(EnvironmentError::TeardownFailed {
                    container_id: container_id.clone(),
                    message: error.to_string(),
                })
            })?;

        debug!(container_id = %container_id, "environment removed");
        Ok(())
    }
}

fn unavailable(image: &str, message: impl Into<String>) -> MemboxError {
    MemboxError::from(EnvironmentError::Unavailable {
        image: String::from(image),
        message: message.into(),
    })
}
