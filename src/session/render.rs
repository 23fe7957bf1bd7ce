//! Rendering of attempt results and orchestration faults.
//!
//! Output goes to a caller-supplied writer so rendering is testable and the
//! binary decides where it lands. Findings are always fully enumerated with a
//! closing count line; orchestration faults are rendered distinctly so they
//! are never mistaken for problems in the checked code.

use std::io::{self, Write};

use crate::classify::{Diagnostic, DiagnosticKind};
use crate::error::MemboxError;

use super::{SessionPhase, SessionState};

/// Render the outcome of one attempt: a phase headline, every diagnostic in
/// stream order, and a count summary.
///
/// # Errors
///
/// Returns an `io::Error` when the writer fails.
pub fn render_attempt<W: Write>(out: &mut W, state: &SessionState) -> io::Result<()> {
    match state.phase() {
        SessionPhase::CompileFailed => writeln!(out, "Compilation failed.")?,
        SessionPhase::AnalysisClean => {
            writeln!(out, "Compilation succeeded.")?;
            writeln!(out, "No memory leaks or errors detected.")?;
        }
        SessionPhase::AnalysisFlagged => {
            writeln!(out, "Compilation succeeded.")?;
            writeln!(out, "The memory analyzer flagged this binary.")?;
        }
        SessionPhase::Idle | SessionPhase::Compiling | SessionPhase::Analyzing => {}
    }

    for diagnostic in state.diagnostics() {
        writeln!(out, "  {}", format_diagnostic(diagnostic))?;
    }

    if !state.diagnostics().is_empty() {
        writeln!(out, "{}", summarize_counts(state.diagnostics()))?;
    }

    Ok(())
}

/// Render an orchestration fault.
///
/// Faults abort the attempt and are reported in the harness's voice, clearly
/// separated from code findings.
///
/// # Errors
///
/// Returns an `io::Error` when the writer fails.
pub fn render_fault<W: Write>(out: &mut W, fault: &MemboxError) -> io::Result<()> {
    writeln!(out, "membox fault (not a finding in your code): {fault}")
}

/// One line per diagnostic: label, location when attributed, message.
fn format_diagnostic(diagnostic: &Diagnostic) -> String {
    let label = diagnostic.kind().label();
    diagnostic.location().map_or_else(
        || format!("{label}: {}", diagnostic.message()),
        |location| {
            location.column().map_or_else(
                || {
                    format!(
                        "{label}: {}:{}: {}",
                        location.file(),
                        location.line(),
                        diagnostic.message()
                    )
                },
                |column| {
                    format!(
                        "{label}: {}:{}:{}: {}",
                        location.file(),
                        location.line(),
                        column,
                        diagnostic.message()
                    )
                },
            )
        },
    )
}

/// Aggregate counts across the diagnostic sequence.
fn summarize_counts(diagnostics: &[Diagnostic]) -> String {
    let count_of = |kind: DiagnosticKind| {
        diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.kind() == kind)
            .count()
    };

    let mut parts = vec![];
    for (kind, noun) in [
        (DiagnosticKind::CompileError, "error(s)"),
        (DiagnosticKind::CompileWarning, "warning(s)"),
        (DiagnosticKind::MemoryError, "memory error(s)"),
        (DiagnosticKind::Timeout, "timeout(s)"),
        (DiagnosticKind::InternalFailure, "internal failure(s)"),
    ] {
        let count = count_of(kind);
        if count > 0 {
            parts.push(format!("{count} {noun}"));
        }
    }

    let leaks = count_of(DiagnosticKind::MemoryLeak);
    if leaks > 0 {
        let bytes: u64 = diagnostics.iter().filter_map(Diagnostic::bytes_lost).sum();
        let blocks: u64 = diagnostics.iter().filter_map(Diagnostic::blocks_lost).sum();
        parts.push(format!(
            "{leaks} leak record(s), {bytes} bytes in {blocks} blocks"
        ));
    }

    format!("Summary: {}", parts.join(", "))
}
