//! Classification of raw tool output into structured diagnostics.
//!
//! Compiler and memory-analyzer output is line-oriented text; parsing it is
//! inherently fragile, so the strategy lives entirely behind this module
//! boundary. Orchestration code only ever sees ordered [`Diagnostic`]
//! sequences.
//!
//! Diagnostics preserve the order they appeared in the raw stream; later
//! tooling relies on this for deterministic comparison. Unrecognizable output
//! from a failed run is never silently dropped - it is carried verbatim in an
//! [`DiagnosticKind::InternalFailure`] diagnostic.

mod compile;
mod memory;

pub use compile::classify_compile;
pub use memory::classify_memory;

use crate::engine::ExecutionResult;

/// The kind of a classified diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A compiler error; the source does not build.
    CompileError,
    /// A compiler warning; the source builds anyway.
    CompileWarning,
    /// A leak record reported by the memory analyzer.
    MemoryLeak,
    /// An invalid-access or uninitialised-value event reported by the memory
    /// analyzer.
    MemoryError,
    /// The tool exceeded its wall-clock limit and was terminated.
    Timeout,
    /// The tool failed in a way the classifier could not interpret; the
    /// message carries the raw captured text.
    InternalFailure,
}

impl DiagnosticKind {
    /// Whether this kind is a finding about the user's code (as opposed to
    /// tooling ambiguity).
    #[must_use]
    pub const fn is_code_finding(self) -> bool {
        matches!(
            self,
            Self::CompileError | Self::CompileWarning | Self::MemoryLeak | Self::MemoryError
        )
    }

    /// Whether this kind flags the analysed binary as unhealthy.
    #[must_use]
    pub const fn is_memory_finding(self) -> bool {
        matches!(self, Self::MemoryLeak | Self::MemoryError)
    }

    /// Short human-readable label used when rendering.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CompileError => "error",
            Self::CompileWarning => "warning",
            Self::MemoryLeak => "leak",
            Self::MemoryError => "memory error",
            Self::Timeout => "timeout",
            Self::InternalFailure => "internal failure",
        }
    }
}

/// A source position attributed to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    file: String,
    line: u32,
    column: Option<u32>,
}

impl SourceLocation {
    /// Create a location with an optional column.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, column: Option<u32>) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// The source file name as reported by the tool.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The 1-based source line.
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    /// The 1-based source column, when the tool reported one.
    #[must_use]
    pub const fn column(&self) -> Option<u32> {
        self.column
    }
}

/// One classified finding, attributed to exactly one [`ExecutionResult`].
///
/// Immutable once produced by the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    kind: DiagnosticKind,
    message: String,
    location: Option<SourceLocation>,
    bytes_lost: Option<u64>,
    blocks_lost: Option<u64>,
}

impl Diagnostic {
    /// Create a diagnostic with no source attribution or counts.
    #[must_use]
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            bytes_lost: None,
            blocks_lost: None,
        }
    }

    /// Attach a source location.
    #[must_use]
    pub fn with_location(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }

    /// Attach leaked byte/block counts (leak diagnostics only).
    #[must_use]
    pub const fn with_leak_counts(mut self, bytes: u64, blocks: u64) -> Self {
        self.bytes_lost = Some(bytes);
        self.blocks_lost = Some(blocks);
        self
    }

    /// The diagnostic kind.
    #[must_use]
    pub const fn kind(&self) -> DiagnosticKind {
        self.kind
    }

    /// The diagnostic message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The attributed source position, when the tool reported one.
    #[must_use]
    pub const fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// Leaked bytes, for leak diagnostics.
    #[must_use]
    pub const fn bytes_lost(&self) -> Option<u64> {
        self.bytes_lost
    }

    /// Leaked allocation count, for leak diagnostics.
    #[must_use]
    pub const fn blocks_lost(&self) -> Option<u64> {
        self.blocks_lost
    }
}

/// Build the `Timeout` diagnostic for a timed-out execution.
///
/// Carries any partial stderr so the user is never left with no information.
fn timeout_diagnostic(result: &ExecutionResult) -> Diagnostic {
    let mut message = format!(
        "'{}' exceeded its time limit after {}s and was terminated",
        result.command_line(),
        result.duration().as_secs()
    );
    let partial = result.stderr().trim();
    if !partial.is_empty() {
        message.push_str("; partial output:\n");
        message.push_str(partial);
    }
    Diagnostic::new(DiagnosticKind::Timeout, message)
}

/// Build the `InternalFailure` diagnostic for unrecognizable failed output.
fn internal_failure_diagnostic(result: &ExecutionResult) -> Diagnostic {
    let mut message = format!(
        "'{}' exited with code {} but produced no recognizable diagnostics",
        result.command_line(),
        result.exit_code()
    );
    let raw = [result.stderr().trim(), result.stdout().trim()]
        .iter()
        .filter(|text| !text.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    if raw.is_empty() {
        message.push_str(" (no output captured)");
    } else {
        message.push_str(":\n");
        message.push_str(&raw);
    }
    Diagnostic::new(DiagnosticKind::InternalFailure, message)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DiagnosticKind::CompileError, true, false)]
    #[case(DiagnosticKind::CompileWarning, true, false)]
    #[case(DiagnosticKind::MemoryLeak, true, true)]
    #[case(DiagnosticKind::MemoryError, true, true)]
    #[case(DiagnosticKind::Timeout, false, false)]
    #[case(DiagnosticKind::InternalFailure, false, false)]
    fn kind_taxonomy_is_stable(
        #[case] kind: DiagnosticKind,
        #[case] code_finding: bool,
        #[case] memory_finding: bool,
    ) {
        assert_eq!(kind.is_code_finding(), code_finding);
        assert_eq!(kind.is_memory_finding(), memory_finding);
    }

    #[rstest]
    fn timeout_diagnostic_carries_partial_output() {
        let result = crate::engine::ExecutionResult::fixture(
            "valgrind",
            crate::engine::TIMEOUT_EXIT_CODE,
            "",
            "==1== still scanning\n",
            true,
        );
        let diagnostic = timeout_diagnostic(&result);
        assert_eq!(diagnostic.kind(), DiagnosticKind::Timeout);
        assert!(diagnostic.message().contains("exceeded its time limit"));
        assert!(diagnostic.message().contains("still scanning"));
    }

    #[rstest]
    fn internal_failure_diagnostic_notes_missing_output() {
        let result = crate::engine::ExecutionResult::fixture("gcc", 4, "", "", false);
        let diagnostic = internal_failure_diagnostic(&result);
        assert_eq!(diagnostic.kind(), DiagnosticKind::InternalFailure);
        assert!(diagnostic.message().contains("no output captured"));
    }
}
