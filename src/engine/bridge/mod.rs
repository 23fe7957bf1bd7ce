//! File bridge between the host and the environment staging directory.
//!
//! This module copies a host source file into the running environment as a
//! single-file tar payload and retrieves artifacts (the compiled binary,
//! logs) back out. Transfers go through the [`WorkspaceClient`] trait so the
//! bridge can be unit-tested without a live daemon.

use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use bollard::query_parameters::{
    DownloadFromContainerOptions, DownloadFromContainerOptionsBuilder, UploadToContainerOptions,
    UploadToContainerOptionsBuilder,
};
use bollard::{Docker, body_full};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use futures_util::StreamExt;
use tracing::debug;

mod archive;

use super::environment::EnvironmentHandle;
use crate::error::{BridgeError, MemboxError, Result};
use archive::{build_file_archive, extract_file};

/// Mode bits applied to staged source files inside the environment.
const STAGED_FILE_MODE: u32 = 0o644;

/// Boxed future type returned by [`WorkspaceClient::upload_to_container`].
pub type UploadToContainerFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<(), bollard::errors::Error>> + Send + 'a>>;

/// Boxed future type returned by [`WorkspaceClient::download_from_container`].
///
/// The implementation collects the engine's chunked tar stream into a single
/// buffer; artifacts here are a lone source file or binary, not a filesystem
/// tree.
pub type DownloadFromContainerFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<Vec<u8>, bollard::errors::Error>> + Send + 'a>>;

/// Behaviour required to move archive payloads in and out of a container.
///
/// This abstraction keeps the file bridge testable without a live daemon.
pub trait WorkspaceClient {
    /// Upload a tar archive payload into `container_id`.
    fn upload_to_container(
        &self,
        container_id: &str,
        options: Option<UploadToContainerOptions>,
        archive_bytes: Vec<u8>,
    ) -> UploadToContainerFuture<'_>;

    /// Download a path from `container_id` as a tar archive payload.
    fn download_from_container(
        &self,
        container_id: &str,
        options: Option<DownloadFromContainerOptions>,
    ) -> DownloadFromContainerFuture<'_>;
}

impl WorkspaceClient for Docker {
    fn upload_to_container(
        &self,
        container_id: &str,
        options: Option<UploadToContainerOptions>,
        archive_bytes: Vec<u8>,
    ) -> UploadToContainerFuture<'_> {
        let container_id_owned = String::from(container_id);

        Box::pin(async move {
            Self::upload_to_container(
                self,
                &container_id_owned,
                options,
                body_full(archive_bytes.into()),
            )
            .await
        })
    }

    fn download_from_container(
        &self,
        container_id: &str,
        options: Option<DownloadFromContainerOptions>,
    ) -> DownloadFromContainerFuture<'_> {
        let container_id_owned = String::from(container_id);

        Box::pin(async move {
            let mut stream = std::pin::pin!(Self::download_from_container(
                self,
                &container_id_owned,
                options,
            ));

            let mut archive_bytes = vec![];
            while let Some(chunk) = stream.next().await {
                archive_bytes.extend_from_slice(&chunk?);
            }
            Ok(archive_bytes)
        })
    }
}

/// A host source file staged into the environment.
///
/// One artifact is created per compile attempt; a new attempt supersedes the
/// previous artifact rather than mutating it. The size and modification time
/// captured at staging allow staleness checks against the host file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceArtifact {
    host_path: Utf8PathBuf,
    staged_path: Utf8PathBuf,
    size_bytes: u64,
    modified: Option<SystemTime>,
}

impl SourceArtifact {
    /// The host path the artifact was staged from.
    #[must_use]
    pub fn host_path(&self) -> &Utf8Path {
        &self.host_path
    }

    /// The container-internal path of the staged copy.
    #[must_use]
    pub fn staged_path(&self) -> &Utf8Path {
        &self.staged_path
    }

    /// The file name shared by host and staged copies.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.staged_path.file_name().unwrap_or_default()
    }

    /// Size of the staged contents in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Host modification time captured at staging, when available.
    #[must_use]
    pub const fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

/// Stage a host source file into the environment's staging directory.
///
/// The file is read on the host, packed as a single-file tar archive, and
/// uploaded into `staging_dir`. A previously staged file with the same name
/// is overwritten.
///
/// # Errors
///
/// Returns `EnvironmentError::NotRunning` when the handle is not running,
/// `BridgeError::SourceNotFound` when the host file does not exist or cannot
/// be read, and `BridgeError::StagingFailed` when the upload is rejected.
pub async fn stage_source<W: WorkspaceClient>(
    client: &W,
    handle: &EnvironmentHandle,
    host_path: &Utf8Path,
    staging_dir: &Utf8Path,
) -> Result<SourceArtifact> {
    handle.ensure_running()?;

    let (file_name, contents, metadata) = read_host_source(host_path)?;

    let archive_bytes = build_file_archive(&file_name, &contents, STAGED_FILE_MODE)
        .map_err(|error| staging_failed(handle, error.to_string()))?;

    let options = UploadToContainerOptionsBuilder::default()
        .path(staging_dir.as_str())
        .build();

    client
        .upload_to_container(handle.container_id(), Some(options), archive_bytes)
        .await
        .map_err(|error| staging_failed(handle, error.to_string()))?;

    let staged_path = staging_dir.join(&file_name);
    debug!(host = %host_path, staged = %staged_path, "source staged");

    Ok(SourceArtifact {
        host_path: host_path.to_owned(),
        staged_path,
        size_bytes: metadata.len(),
        modified: metadata.modified().ok().map(|time| time.into_std()),
    })
}

/// Retrieve a file from inside the environment.
///
/// # Errors
///
/// Returns `EnvironmentError::NotRunning` when the handle is not running,
/// `BridgeError::ArtifactNotFound` when the path does not exist inside the
/// environment (e.g., the compile failed before producing a binary), and
/// `BridgeError::RetrievalFailed` for other engine faults.
pub async fn retrieve_artifact<W: WorkspaceClient>(
    client: &W,
    handle: &EnvironmentHandle,
    container_path: &Utf8Path,
) -> Result<Vec<u8>> {
    handle.ensure_running()?;

    let file_name = container_path
        .file_name()
        .ok_or_else(|| artifact_not_found(handle, container_path))?;

    let options = DownloadFromContainerOptionsBuilder::default()
        .path(container_path.as_str())
        .build();

    let archive_bytes = client
        .download_from_container(handle.container_id(), Some(options))
        .await
        .map_err(|error| classify_download_error(handle, container_path, &error))?;

    let extracted = extract_file(&archive_bytes, file_name)
        .map_err(|error| retrieval_failed(handle, error.to_string()))?;

    extracted.ok_or_else(|| artifact_not_found(handle, container_path))
}

/// Read a host source file through a capability-scoped directory handle.
fn read_host_source(host_path: &Utf8Path) -> Result<(String, Vec<u8>, cap_std::fs::Metadata)> {
    let parent = host_path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = host_path
        .file_name()
        .ok_or_else(|| source_not_found(host_path))?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|_| source_not_found(host_path))?;

    let metadata = dir
        .metadata(file_name)
        .map_err(|_| source_not_found(host_path))?;
    if !metadata.is_file() {
        return Err(source_not_found(host_path));
    }

    let contents = dir.read(file_name).map_err(|_| source_not_found(host_path))?;

    Ok((String::from(file_name), contents, metadata))
}

fn classify_download_error(
    handle: &EnvironmentHandle,
    container_path: &Utf8Path,
    error: &bollard::errors::Error,
) -> MemboxError {
    if let bollard::errors::Error::DockerResponseServerError {
        status_code: 404, ..
    } = error
    {
        return artifact_not_found(handle, container_path);
    }

    retrieval_failed(handle, error.to_string())
}

fn source_not_found(path: &Utf8Path) -> MemboxError {
    MemboxError::from(BridgeError::SourceNotFound {
        path: path.to_owned(),
    })
}

fn staging_failed(handle: &EnvironmentHandle, message: impl Into<String>) -> MemboxError {
    MemboxError::from(BridgeError::StagingFailed {
        container_id: String::from(handle.container_id()),
        message: message.into(),
    })
}

fn retrieval_failed(handle: &EnvironmentHandle, message: impl Into<String>) -> MemboxError {
    MemboxError::from(BridgeError::RetrievalFailed {
        container_id: String::from(handle.container_id()),
        message: message.into(),
    })
}

fn artifact_not_found(handle: &EnvironmentHandle, path: &Utf8Path) -> MemboxError {
    MemboxError::from(BridgeError::ArtifactNotFound {
        path: path.to_owned(),
        container_id: String::from(handle.container_id()),
    })
}

#[cfg(test)]
mod tests {
    use mockall::mock;
    use rstest::rstest;

    use super::*;

    mock! {
        #[derive(Debug)]
        Workspace {}

        impl WorkspaceClient for Workspace {
            fn upload_to_container(
                &self,
                container_id: &str,
                options: Option<UploadToContainerOptions>,
                archive_bytes: Vec<u8>,
            ) -> UploadToContainerFuture<'_>;
            fn download_from_container(
                &self,
                container_id: &str,
                options: Option<DownloadFromContainerOptions>,
            ) -> DownloadFromContainerFuture<'_>;
        }
    }

    fn write_host_source(dir: &tempfile::TempDir, name: &str, contents: &str) -> Utf8PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).expect("writing fixture source should succeed");
        Utf8PathBuf::from_path_buf(path).expect("tempdir paths are UTF-8")
    }

    #[rstest]
    #[tokio::test]
    async fn stage_source_uploads_single_file_archive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let host_path = write_host_source(&temp, "main.c", "int main(){return 0;}");

        let mut client = MockWorkspace::new();
        client
            .expect_upload_to_container()
            .times(1)
            .withf(|container_id, _, archive_bytes| {
                let extracted = extract_file(archive_bytes, "main.c")
                    .expect("uploaded payload should be a valid archive");
                container_id == "env-1"
                    && extracted.as_deref() == Some(b"int main(){return 0;}".as_slice())
            })
            .returning(|_, _, _| Box::pin(async { Ok(()) }));

        let handle = EnvironmentHandle::running_for_tests("env-1");
        let artifact = stage_source(&client, &handle, &host_path, Utf8Path::new("/workspace"))
            .await
            .expect("staging should succeed");

        assert_eq!(artifact.staged_path(), Utf8Path::new("/workspace/main.c"));
        assert_eq!(artifact.file_name(), "main.c");
        assert_eq!(artifact.size_bytes(), 21);
        assert_eq!(artifact.host_path(), host_path.as_path());
    }

    #[rstest]
    #[tokio::test]
    async fn stage_source_rejects_missing_host_file() {
        let client = MockWorkspace::new();
        let handle = EnvironmentHandle::running_for_tests("env-1");

        let error = stage_source(
            &client,
            &handle,
            Utf8Path::new("/definitely/not/here.c"),
            Utf8Path::new("/workspace"),
        )
        .await
        .expect_err("missing source should fail");

        assert!(matches!(
            error,
            MemboxError::Bridge(BridgeError::SourceNotFound { .. })
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn stage_source_requires_running_environment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let host_path = write_host_source(&temp, "main.c", "int main(){return 0;}");

        let client = MockWorkspace::new();
        let handle = EnvironmentHandle::stopped_for_tests("env-1");

        let error = stage_source(&client, &handle, &host_path, Utf8Path::new("/workspace"))
            .await
            .expect_err("stopped environment should fail");

        assert!(matches!(
            error,
            MemboxError::Environment(crate::error::EnvironmentError::NotRunning { .. })
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn stage_source_maps_upload_rejection_to_staging_failed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let host_path = write_host_source(&temp, "main.c", "int main(){return 0;}");

        let mut client = MockWorkspace::new();
        client.expect_upload_to_container().returning(|_, _, _| {
            Box::pin(async {
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 500,
                    message: String::from("no space left on device"),
                })
            })
        });

        let handle = EnvironmentHandle::running_for_tests("env-1");
        let error = stage_source(&client, &handle, &host_path, Utf8Path::new("/workspace"))
            .await
            .expect_err("upload rejection should fail");

        assert!(matches!(
            error,
            MemboxError::Bridge(BridgeError::StagingFailed { .. })
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn retrieve_artifact_extracts_file_from_archive() {
        let mut client = MockWorkspace::new();
        client
            .expect_download_from_container()
            .times(1)
            .returning(|_, _| {
                Box::pin(async {
                    build_file_archive("program", b"\x7fELF binary", 0o755)
                        .map_err(|e| bollard::errors::Error::IOError { err: e })
                })
            });

        let handle = EnvironmentHandle::running_for_tests("env-1");
        let bytes = retrieve_artifact(&client, &handle, Utf8Path::new("/workspace/program"))
            .await
            .expect("retrieval should succeed");

        assert_eq!(bytes, b"\x7fELF binary");
    }

    #[rstest]
    #[tokio::test]
    async fn retrieve_artifact_maps_missing_path_to_artifact_not_found() {
        let mut client = MockWorkspace::new();
        client.expect_download_from_container().returning(|_, _| {
            Box::pin(async {
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message: String::from("no such file"),
                })
            })
        });

        let handle = EnvironmentHandle::running_for_tests("env-1");
        let error = retrieve_artifact(&client, &handle, Utf8Path::new("/workspace/program"))
            .await
            .expect_err("missing artifact should fail");

        match error {
            MemboxError::Bridge(BridgeError::ArtifactNotFound { path, container_id }) => {
                assert_eq!(path, Utf8PathBuf::from("/workspace/program"));
                assert_eq!(container_id, "env-1");
            }
            other => panic!("expected ArtifactNotFound, got {other:?}"),
        }
    }
}
