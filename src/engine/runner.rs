//! Process execution inside the environment with independent stream capture.
//!
//! This module runs a single command inside the running environment, captures
//! stdout and stderr separately (the compiler and the analyzer are parsed as
//! distinct diagnostic sources), enforces a wall-clock timeout, and reports
//! the exit code. Engine interactions go through the [`ProcessClient`] trait
//! so execution behaviour can be unit-tested without a live daemon.
//!
//! Execution-layer faults (exec rejected, stream broken) are errors; the
//! launched program's own nonzero exit is data in the [`ExecutionResult`].
//! The session loop relies on this split to never present a harness fault as
//! a problem in the user's code.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, CreateExecResults, StartExecOptions, StartExecResults};
use bollard::models::ExecInspectResponse;
use camino::{Utf8Path, Utf8PathBuf};
use futures_util::{Stream, StreamExt};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::environment::EnvironmentHandle;
use crate::error::{ConfigError, MemboxError, Result, RunnerError};

/// Sentinel exit code reported when a process is terminated on timeout.
///
/// Real exit codes from the engine are non-negative, so the sentinel can
/// never collide with a program's own exit status.
pub const TIMEOUT_EXIT_CODE: i64 = -1;

/// Poll interval while waiting for an exec session to report its exit code.
const EXEC_INSPECT_POLL_INTERVAL_MS: u64 = 100;

/// Boxed future type returned by [`ProcessClient::create_exec`].
pub type CreateExecFuture<'a> = Pin<
    Box<
        dyn Future<Output = std::result::Result<CreateExecResults, bollard::errors::Error>>
            + Send
            + 'a,
    >,
>;

/// Boxed future type returned by [`ProcessClient::start_exec`].
pub type StartExecFuture<'a> = Pin<
    Box<
        dyn Future<Output = std::result::Result<StartExecResults, bollard::errors::Error>>
            + Send
            + 'a,
    >,
>;

/// Boxed future type returned by [`ProcessClient::inspect_exec`].
pub type InspectExecFuture<'a> = Pin<
    Box<
        dyn Future<Output = std::result::Result<ExecInspectResponse, bollard::errors::Error>>
            + Send
            + 'a,
    >,
>;

/// Behaviour required to run and inspect exec sessions.
///
/// This abstraction keeps command execution testable without a live daemon.
pub trait ProcessClient {
    /// Create an exec session in a running container.
    fn create_exec(
        &self,
        container_id: &str,
        options: CreateExecOptions<String>,
    ) -> CreateExecFuture<'_>;

    /// Start a previously created exec session.
    fn start_exec(&self, exec_id: &str, options: Option<StartExecOptions>) -> StartExecFuture<'_>;

    /// Inspect an exec session for running status, pid, and exit code.
    fn inspect_exec(&self, exec_id: &str) -> InspectExecFuture<'_>;
}

impl ProcessClient for Docker {
    fn create_exec(
        &self,
        container_id: &str,
        options: CreateExecOptions<String>,
    ) -> CreateExecFuture<'_> {
        let container_id_owned = String::from(container_id);
        Box::pin(async move { Self::create_exec(self, &container_id_owned, options).await })
    }

    fn start_exec(&self, exec_id: &str, options: Option<StartExecOptions>) -> StartExecFuture<'_> {
        let exec_id_owned = String::from(exec_id);
        Box::pin(async move { Self::start_exec(self, &exec_id_owned, options).await })
    }

    fn inspect_exec(&self, exec_id: &str) -> InspectExecFuture<'_> {
        let exec_id_owned = String::from(exec_id);
        Box::pin(async move { Self::inspect_exec(self, &exec_id_owned).await })
    }
}

/// Parameters required to run a command inside the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    program: String,
    args: Vec<String>,
    working_dir: Option<Utf8PathBuf>,
    timeout: Duration,
}

impl RunRequest {
    /// Create a new run request.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingRequired` when `program` is empty or
    /// whitespace-only.
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let program_value = program.into();
        if program_value.trim().is_empty() {
            return Err(MemboxError::from(ConfigError::MissingRequired {
                field: String::from("program"),
            }));
        }

        Ok(Self {
            program: program_value,
            args,
            working_dir: None,
            timeout,
        })
    }

    /// Set the working directory for the process.
    #[must_use]
    pub fn with_working_dir(mut self, working_dir: Option<Utf8PathBuf>) -> Self {
        self.working_dir = working_dir;
        self
    }

    /// Return the program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Return the program arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Return the configured working directory.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Utf8Path> {
        self.working_dir.as_deref()
    }

    /// Return the wall-clock timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Outcome of one command execution inside the environment.
///
/// Immutable once produced; one instance per [`run`] invocation. The output
/// streams are captured independently, never interleaved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    program: String,
    args: Vec<String>,
    exit_code: i64,
    stdout: String,
    stderr: String,
    duration: Duration,
    timed_out: bool,
}

impl ExecutionResult {
    /// The program that was executed.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments the program was executed with.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The full command line, for logging and fault reporting.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// The process exit code, or [`TIMEOUT_EXIT_CODE`] after a timeout.
    #[must_use]
    pub const fn exit_code(&self) -> i64 {
        self.exit_code
    }

    /// Captured standard output.
    #[must_use]
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Captured standard error.
    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Wall-clock duration of the execution.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether the process was forcibly terminated on timeout.
    #[must_use]
    pub const fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Whether the process completed with exit code zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

#[cfg(test)]
impl ExecutionResult {
    /// Construct a result without running anything. Test-only.
    pub(crate) fn fixture(
        program: &str,
        exit_code: i64,
        stdout: &str,
        stderr: &str,
        timed_out: bool,
    ) -> Self {
        Self {
            program: String::from(program),
            args: vec![],
            exit_code,
            stdout: String::from(stdout),
            stderr: String::from(stderr),
            duration: Duration::from_millis(10),
            timed_out,
        }
    }
}

/// Execute a command inside the running environment.
///
/// Captures stdout and stderr independently and enforces the request's
/// timeout. On expiry the in-container process is forcibly terminated (so
/// the environment is never left with an orphaned process) and the result
/// carries `timed_out = true` with the [`TIMEOUT_EXIT_CODE`] sentinel and any
/// partial output.
///
/// # Errors
///
/// Returns `EnvironmentError::NotRunning` when the handle is not running and
/// `RunnerError::LaunchFailed` for execution-layer faults (exec rejected,
/// stream broken, inspect failed) - distinct from the launched program's own
/// nonzero exit, which is reported through the result.
pub async fn run<C: ProcessClient>(
    client: &C,
    handle: &EnvironmentHandle,
    request: &RunRequest,
) -> Result<ExecutionResult> {
    handle.ensure_running()?;

    let started = Instant::now();

    let create_result = client
        .create_exec(handle.container_id(), build_create_exec_options(request))
        .await
        .map_err(|error| launch_failed(request, format!("create exec failed: {error}")))?;
    let exec_id = create_result.id;

    let start_result = client
        .start_exec(&exec_id, Some(build_start_exec_options()))
        .await
        .map_err(|error| launch_failed(request, format!("start exec failed: {error}")))?;

    let mut stdout = vec![];
    let mut stderr = vec![];

    match start_result {
        StartExecResults::Attached { output, .. } => {
            let drained = tokio::time::timeout(
                request.timeout(),
                drain_output(output, &mut stdout, &mut stderr),
            )
            .await;

            match drained {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    return Err(launch_failed(
                        request,
                        format!("exec stream failed: {error}"),
                    ));
                }
                Err(_elapsed) => {
                    force_terminate(client, handle, &exec_id).await;
                    debug!(
                        program = %request.program(),
                        timeout_secs = request.timeout().as_secs(),
                        "process timed out and was terminated"
                    );
                    return Ok(ExecutionResult {
                        program: request.program.clone(),
                        args: request.args.clone(),
                        exit_code: TIMEOUT_EXIT_CODE,
                        stdout: String::from_utf8_lossy(&stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&stderr).into_owned(),
                        duration: started.elapsed(),
                        timed_out: true,
                    });
                }
            }
        }
        StartExecResults::Detached => {
            return Err(launch_failed(
                request,
                "daemon returned detached start result for attached exec",
            ));
        }
    }

    let exit_code = wait_for_exit_code(client, request, &exec_id).await?;

    Ok(ExecutionResult {
        program: request.program.clone(),
        args: request.args.clone(),
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        duration: started.elapsed(),
        timed_out: false,
    })
}

fn build_create_exec_options(request: &RunRequest) -> CreateExecOptions<String> {
    CreateExecOptions::<String> {
        attach_stdin: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        // No tty: the engine multiplexes the streams so stdout and stderr
        // arrive tagged and can be captured independently.
        tty: Some(false),
        cmd: Some(request.argv()),
        working_dir: request.working_dir().map(|dir| dir.as_str().to_owned()),
        ..CreateExecOptions::default()
    }
}

const fn build_start_exec_options() -> StartExecOptions {
    StartExecOptions {
        detach: false,
        tty: false,
        output_capacity: None,
    }
}

/// Fold the multiplexed exec stream into independent stdout/stderr buffers.
async fn drain_output(
    mut output: Pin<
        Box<dyn Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Send>,
    >,
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
) -> std::result::Result<(), bollard::errors::Error> {
    while let Some(chunk_result) = output.next().await {
        match chunk_result? {
            LogOutput::StdErr { message } => stderr.extend_from_slice(message.as_ref()),
            LogOutput::StdOut { message }
            | LogOutput::Console { message }
            | LogOutput::StdIn { message } => stdout.extend_from_slice(message.as_ref()),
        }
    }
    Ok(())
}

/// Poll exec inspect until the session reports completion.
async fn wait_for_exit_code<C: ProcessClient>(
    client: &C,
    request: &RunRequest,
    exec_id: &str,
) -> Result<i64> {
    loop {
        let inspect = client.inspect_exec(exec_id).await.map_err(|error| {
            launch_failed(request, format!("inspect exec failed: {error}"))
        })?;

        if inspect.running.unwrap_or(false) {
            sleep(Duration::from_millis(EXEC_INSPECT_POLL_INTERVAL_MS)).await;
            continue;
        }

        return inspect.exit_code.ok_or_else(|| {
            MemboxError::from(RunnerError::MissingExitCode {
                command: request.program.clone(),
            })
        });
    }
}

/// Forcibly terminate a timed-out exec process.
///
/// The engine offers no kill API for exec sessions, so the runner looks up
/// the process pid via inspect and issues `kill -KILL <pid>` as a second,
/// detached exec. Best effort: failures are logged, not surfaced, since the
/// timeout result is already on its way to the caller.
async fn force_terminate<C: ProcessClient>(
    client: &C,
    handle: &EnvironmentHandle,
    exec_id: &str,
) {
    let pid = match client.inspect_exec(exec_id).await {
        Ok(inspect) => inspect.pid,
        Err(error) => {
            warn!(exec_id = %exec_id, error = %error, "could not inspect timed-out exec");
            None
        }
    };

    let Some(pid) = pid else {
        return;
    };

    let kill_options = CreateExecOptions::<String> {
        cmd: Some(vec![
            String::from("kill"),
            String::from("-KILL"),
            pid.to_string(),
        ]),
        ..CreateExecOptions::default()
    };

    let kill_exec = match client.create_exec(handle.container_id(), kill_options).await {
        Ok(created) => created.id,
        Err(error) => {
            warn!(pid, error = %error, "could not create kill exec for timed-out process");
            return;
        }
    };

    let start_options = StartExecOptions {
        detach: true,
        tty: false,
        output_capacity: None,
    };
    if let Err(error) = client.start_exec(&kill_exec, Some(start_options)).await {
        warn!(pid, error = %error, "could not start kill exec for timed-out process");
    }
}

fn launch_failed(request: &RunRequest, message: impl Into<String>) -> MemboxError {
    MemboxError::from(RunnerError::LaunchFailed {
        command: request.program.clone(),
        message: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use mockall::mock;
    use rstest::rstest;

    use super::*;
    use crate::error::EnvironmentError;

    mock! {
        #[derive(Debug)]
        ExecClient {}

        impl ProcessClient for ExecClient {
            fn create_exec(
                &self,
                container_id: &str,
                options: CreateExecOptions<String>,
            ) -> CreateExecFuture<'_>;
            fn start_exec(
                &self,
                exec_id: &str,
                options: Option<StartExecOptions>,
            ) -> StartExecFuture<'_>;
            fn inspect_exec(&self, exec_id: &str) -> InspectExecFuture<'_>;
        }
    }

    fn request(timeout: Duration) -> RunRequest {
        RunRequest::new("gcc", vec![String::from("-Wall"), String::from("main.c")], timeout)
            .expect("request should validate")
    }

    fn expect_create_exec(client: &mut MockExecClient, exec_id: &'static str) {
        client
            .expect_create_exec()
            .times(1)
            .returning(move |_, options| {
                assert_eq!(options.attach_stdout, Some(true));
                assert_eq!(options.attach_stderr, Some(true));
                assert_eq!(options.tty, Some(false));
                Box::pin(async move {
                    Ok(CreateExecResults {
                        id: String::from(exec_id),
                    })
                })
            });
    }

    fn attached_output(
        chunks: Vec<LogOutput>,
    ) -> StartExecResults {
        let output_chunks = chunks
            .into_iter()
            .map(Ok)
            .collect::<Vec<std::result::Result<LogOutput, bollard::errors::Error>>>();
        StartExecResults::Attached {
            output: Box::pin(stream::iter(output_chunks)),
            input: Box::pin(tokio::io::sink()),
        }
    }

    fn expect_start_exec_with_output(client: &mut MockExecClient, chunks: Vec<LogOutput>) {
        let mut chunks = Some(chunks);
        client.expect_start_exec().times(1).returning(move |_, _| {
            let output = attached_output(chunks.take().unwrap_or_default());
            Box::pin(async move { Ok(output) })
        });
    }

    fn expect_inspect_completed(client: &mut MockExecClient, exit_code: i64) {
        client.expect_inspect_exec().returning(move |_| {
            Box::pin(async move {
                Ok(ExecInspectResponse {
                    running: Some(false),
                    exit_code: Some(exit_code),
                    ..ExecInspectResponse::default()
                })
            })
        });
    }

    #[rstest]
    fn run_request_rejects_empty_program() {
        let error = RunRequest::new("  ", vec![], Duration::from_secs(1))
            .expect_err("empty program should be rejected");
        assert!(matches!(
            error,
            MemboxError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn run_captures_streams_independently() {
        let mut client = MockExecClient::new();
        expect_create_exec(&mut client, "exec-1");
        expect_start_exec_with_output(
            &mut client,
            vec![
                LogOutput::StdOut {
                    message: Vec::from(b"compiled ok\n".as_slice()).into(),
                },
                LogOutput::StdErr {
                    message: Vec::from(b"main.c:3:5: warning: unused variable\n".as_slice())
                        .into(),
                },
                LogOutput::StdOut {
                    message: Vec::from(b"done\n".as_slice()).into(),
                },
            ],
        );
        expect_inspect_completed(&mut client, 0);

        let handle = EnvironmentHandle::running_for_tests("env-1");
        let result = run(&client, &handle, &request(Duration::from_secs(5)))
            .await
            .expect("run should succeed");

        assert_eq!(result.stdout(), "compiled ok\ndone\n");
        assert_eq!(result.stderr(), "main.c:3:5: warning: unused variable\n");
        assert_eq!(result.exit_code(), 0);
        assert!(result.is_success());
        assert!(!result.timed_out());
    }

    #[rstest]
    #[tokio::test]
    async fn run_reports_nonzero_exit_as_result_not_error() {
        let mut client = MockExecClient::new();
        expect_create_exec(&mut client, "exec-1");
        expect_start_exec_with_output(
            &mut client,
            vec![LogOutput::StdErr {
                message: Vec::from(b"main.c:1:1: error: expected declaration\n".as_slice())
                    .into(),
            }],
        );
        expect_inspect_completed(&mut client, 1);

        let handle = EnvironmentHandle::running_for_tests("env-1");
        let result = run(&client, &handle, &request(Duration::from_secs(5)))
            .await
            .expect("nonzero exit is still a successful run");

        assert_eq!(result.exit_code(), 1);
        assert!(!result.is_success());
    }

    #[rstest]
    #[tokio::test]
    async fn run_requires_running_environment() {
        let client = MockExecClient::new();
        let handle = EnvironmentHandle::stopped_for_tests("env-1");

        let error = run(&client, &handle, &request(Duration::from_secs(5)))
            .await
            .expect_err("stopped environment should fail");

        assert!(matches!(
            error,
            MemboxError::Environment(EnvironmentError::NotRunning { .. })
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn run_maps_create_exec_rejection_to_launch_failed() {
        let mut client = MockExecClient::new();
        client.expect_create_exec().returning(|_, _| {
            Box::pin(async {
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message: String::from("no such container"),
                })
            })
        });

        let handle = EnvironmentHandle::running_for_tests("env-1");
        let error = run(&client, &handle, &request(Duration::from_secs(5)))
            .await
            .expect_err("create rejection should fail");

        match error {
            MemboxError::Runner(RunnerError::LaunchFailed { command, message }) => {
                assert_eq!(command, "gcc");
                assert!(message.contains("create exec failed"));
            }
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn run_times_out_and_terminates_the_process() {
        let mut client = MockExecClient::new();
        expect_create_exec(&mut client, "exec-1");

        // An output stream that never completes keeps the drain pending until
        // the timeout fires.
        client.expect_start_exec().times(1).returning(|_, _| {
            Box::pin(async {
                Ok(StartExecResults::Attached {
                    output: Box::pin(stream::pending()),
                    input: Box::pin(tokio::io::sink()),
                })
            })
        });

        client.expect_inspect_exec().times(1).returning(|_| {
            Box::pin(async {
                Ok(ExecInspectResponse {
                    running: Some(true),
                    pid: Some(4242),
                    ..ExecInspectResponse::default()
                })
            })
        });

        // force_terminate creates the kill exec.
        client
            .expect_create_exec()
            .times(1)
            .withf(|_, options| {
                options.cmd.as_deref()
                    == Some(
                        &[
                            String::from("kill"),
                            String::from("-KILL"),
                            String::from("4242"),
                        ][..],
                    )
            })
            .returning(|_, _| {
                Box::pin(async {
                    Ok(CreateExecResults {
                        id: String::from("exec-kill"),
                    })
                })
            });
        client
            .expect_start_exec()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(StartExecResults::Detached) }));

        let handle = EnvironmentHandle::running_for_tests("env-1");
        let result = run(&client, &handle, &request(Duration::from_millis(50)))
            .await
            .expect("timeout still yields a result");

        assert!(result.timed_out());
        assert_eq!(result.exit_code(), TIMEOUT_EXIT_CODE);
        assert!(!result.is_success());
    }
}
