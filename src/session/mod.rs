//! Interactive compile-then-analyze session loop.
//!
//! The session is a finite state machine
//! (`Idle -> Compiling -> (CompileFailed | Analyzing) ->
//! (AnalysisClean | AnalysisFlagged) -> Idle`) with pure transition decisions
//! and side-effecting boundary calls kept apart, so the machine can be
//! unit-tested without a real environment or subprocess.
//!
//! The loop owns the one [`EnvironmentManager`] of the process: it alone
//! calls `acquire`/`release`, reusing the same environment across attempts
//! and tearing it down on exit. Orchestration faults abort the current
//! attempt, return the machine to `Idle`, and are rendered distinctly from
//! code findings. The memory analyzer is never invoked unless the compile
//! step exited zero.

mod prompt;
mod render;

pub use prompt::{Prompter, TerminalPrompter};
pub use render::{render_attempt, render_fault};

use camino::Utf8Path;
use tracing::debug;

use crate::classify::{Diagnostic, classify_compile, classify_memory};
use crate::config::{AppConfig, SourceLanguage};
use crate::engine::{
    EnvironmentClient, EnvironmentManager, ExecutionResult, ProcessClient, RunRequest,
    SourceArtifact, WorkspaceClient, run, stage_source,
};
use crate::error::{BridgeError, MemboxError, Result};

/// Phase of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Waiting for the next compile request.
    #[default]
    Idle,
    /// Staging and compiling the current source.
    Compiling,
    /// The compiler exited nonzero; analysis was not attempted.
    CompileFailed,
    /// The compile succeeded; the memory analyzer is running.
    Analyzing,
    /// Analysis completed with no memory findings.
    AnalysisClean,
    /// Analysis reported at least one leak or memory error.
    AnalysisFlagged,
}

/// Per-attempt state owned exclusively by the session loop.
///
/// Reset at the start of each new compile request; the diagnostic sequence
/// always belongs to the most recent attempt.
#[derive(Debug, Default)]
pub struct SessionState {
    phase: SessionPhase,
    artifact: Option<SourceArtifact>,
    diagnostics: Vec<Diagnostic>,
}

impl SessionState {
    /// The current phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// The artifact staged by the most recent attempt, if any.
    #[must_use]
    pub const fn artifact(&self) -> Option<&SourceArtifact> {
        self.artifact.as_ref()
    }

    /// Ordered diagnostics from the most recent attempt.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn reset(&mut self) {
        self.phase = SessionPhase::Idle;
        self.artifact = None;
        self.diagnostics.clear();
    }
}

#[cfg(test)]
impl SessionState {
    /// Force a phase for rendering tests.
    pub(crate) const fn set_phase_for_tests(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    /// Force a diagnostic sequence for rendering tests.
    pub(crate) fn set_diagnostics_for_tests(&mut self, diagnostics: Vec<Diagnostic>) {
        self.diagnostics = diagnostics;
    }
}

/// Pure transition out of `Compiling`.
///
/// A timed-out compile is a failed compile: analysis must never run against
/// a binary that was not produced.
#[must_use]
pub const fn phase_after_compile(result: &ExecutionResult) -> SessionPhase {
    if result.is_success() {
        SessionPhase::Analyzing
    } else {
        SessionPhase::CompileFailed
    }
}

/// Pure transition out of `Analyzing`.
///
/// Only memory findings flag the binary; tooling-ambiguity diagnostics
/// (timeout, internal failure) are rendered but do not change the phase.
#[must_use]
pub fn phase_after_analysis(diagnostics: &[Diagnostic]) -> SessionPhase {
    if diagnostics
        .iter()
        .any(|diagnostic| diagnostic.kind().is_memory_finding())
    {
        SessionPhase::AnalysisFlagged
    } else {
        SessionPhase::AnalysisClean
    }
}

/// The interactive session driver.
///
/// Generic over the engine client seams so the whole loop runs against mocks
/// in tests; in production `C` is `bollard::Docker`.
pub struct Session<'a, C>
where
    C: EnvironmentClient + WorkspaceClient + ProcessClient,
{
    client: &'a C,
    config: &'a AppConfig,
    environment: EnvironmentManager<'a, C>,
    state: SessionState,
}

impl<'a, C> Session<'a, C>
where
    C: EnvironmentClient + WorkspaceClient + ProcessClient,
{
    /// Create a session over the given client and configuration.
    #[must_use]
    pub fn new(client: &'a C, config: &'a AppConfig) -> Self {
        let environment = EnvironmentManager::new(
            client,
            config.image_or_default(),
            config.workspace.staging_dir.clone(),
        );
        Self {
            client,
            config,
            environment,
            state: SessionState::default(),
        }
    }

    /// The state of the most recent attempt.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run the interactive loop until the user exits, then release the
    /// environment.
    ///
    /// `seed` preloads the first attempt's source path; afterwards the
    /// prompter is asked. Orchestration faults are rendered and the loop
    /// continues - the user decides whether to retry.
    ///
    /// # Errors
    ///
    /// Returns terminal I/O errors and environment teardown failures. Faults
    /// of individual attempts are rendered, not returned.
    pub async fn run<P, W>(
        &mut self,
        seed: Option<camino::Utf8PathBuf>,
        prompter: &mut P,
        out: &mut W,
    ) -> Result<()>
    where
        P: Prompter,
        W: std::io::Write,
    {
        let mut pending = seed;
        loop {
            let source = match pending.take() {
                Some(path) => path,
                None => match prompter.read_source_path()? {
                    Some(path) => path,
                    None => break,
                },
            };

            match self.attempt(&source).await {
                Ok(()) => render_attempt(out, &self.state)?,
                Err(fault) => {
                    // Orchestration faults are not findings; the attempt is
                    // abandoned and the machine returns to Idle.
                    self.state.reset();
                    render_fault(out, &fault)?;
                }
            }

            if !prompter.confirm_retry()? {
                break;
            }
        }

        self.environment.release().await
    }

    /// Run one compile-then-analyze attempt against the shared environment.
    async fn attempt(&mut self, source: &Utf8Path) -> Result<()> {
        self.state.reset();

        let language = SourceLanguage::from_path(source).ok_or_else(|| {
            MemboxError::from(BridgeError::UnsupportedSource {
                path: source.to_owned(),
            })
        })?;

        self.state.phase = SessionPhase::Compiling;
        let handle = self.environment.acquire().await?.clone();

        let artifact = stage_source(
            self.client,
            &handle,
            source,
            &self.config.workspace.staging_dir,
        )
        .await?;
        let file_name = String::from(artifact.file_name());
        self.state.artifact = Some(artifact);

        let compile_result = run(
            self.client,
            &handle,
            &self.compile_request(language, &file_name)?,
        )
        .await?;
        debug!(
            exit_code = compile_result.exit_code(),
            duration = ?compile_result.duration(),
            "compile step finished"
        );

        let mut diagnostics = classify_compile(&compile_result);
        self.state.phase = phase_after_compile(&compile_result);
        if self.state.phase == SessionPhase::CompileFailed {
            self.state.diagnostics = diagnostics;
            return Ok(());
        }

        let analysis_result = run(self.client, &handle, &self.analyze_request()?).await?;
        debug!(
            exit_code = analysis_result.exit_code(),
            duration = ?analysis_result.duration(),
            "analysis step finished"
        );

        let memory_diagnostics = classify_memory(&analysis_result);
        self.state.phase = phase_after_analysis(&memory_diagnostics);
        diagnostics.extend(memory_diagnostics);
        self.state.diagnostics = diagnostics;
        Ok(())
    }

    /// Compiler invocation: configured flags, then `-o <output> <source>`.
    fn compile_request(&self, language: SourceLanguage, file_name: &str) -> Result<RunRequest> {
        let toolchain = &self.config.toolchain;
        let mut args = toolchain.flags.clone();
        args.push(String::from("-o"));
        args.push(toolchain.output_name.clone());
        args.push(String::from(file_name));

        Ok(RunRequest::new(
            toolchain.compiler_for(language),
            args,
            self.config.limits.compile_timeout(),
        )?
        .with_working_dir(Some(self.config.workspace.staging_dir.clone())))
    }

    /// Analyzer invocation: configured flags, then the produced binary.
    fn analyze_request(&self) -> Result<RunRequest> {
        let analyzer = &self.config.analyzer;
        let mut args = analyzer.flags.clone();
        args.push(format!("./{}", self.config.toolchain.output_name));

        Ok(RunRequest::new(
            analyzer.command.clone(),
            args,
            self.config.limits.analyze_timeout(),
        )?
        .with_working_dir(Some(self.config.workspace.staging_dir.clone())))
    }
}
