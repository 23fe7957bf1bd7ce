//! Compiler output classification.

use std::sync::LazyLock;

use regex::Regex;

use super::{
    Diagnostic, DiagnosticKind, SourceLocation, internal_failure_diagnostic, timeout_diagnostic,
};
use crate::engine::ExecutionResult;

/// GCC-style diagnostic line: `<file>:<line>:<col>: <severity>: <message>`.
#[expect(
    clippy::expect_used,
    reason = "pattern is a compile-time constant exercised by unit tests"
)]
static DIAGNOSTIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>[^:\s][^:]*?):(?P<line>\d+):(?P<column>\d+):\s*(?P<severity>fatal error|error|warning):\s*(?P<message>.*)$",
    )
    .expect("compiler diagnostic pattern must compile")
});

/// Classify compiler output into an ordered diagnostic sequence.
///
/// Diagnostic lines are parsed from stderr first (where GCC writes them),
/// then stdout, preserving the order within each stream. `error` and
/// `fatal error` severities become [`DiagnosticKind::CompileError`],
/// `warning` becomes [`DiagnosticKind::CompileWarning`].
///
/// A timed-out execution yields a single `Timeout` diagnostic - never a
/// compile error. A nonzero exit whose output matched nothing recognizable
/// yields a single `InternalFailure` carrying the raw text. Exit code 0 with
/// only warnings still counts as compile success downstream.
#[must_use]
pub fn classify_compile(result: &ExecutionResult) -> Vec<Diagnostic> {
    if result.timed_out() {
        return vec![timeout_diagnostic(result)];
    }

    let diagnostics: Vec<Diagnostic> = result
        .stderr()
        .lines()
        .chain(result.stdout().lines())
        .filter_map(parse_diagnostic_line)
        .collect();

    if diagnostics.is_empty() && result.exit_code() != 0 {
        return vec![internal_failure_diagnostic(result)];
    }

    diagnostics
}

fn parse_diagnostic_line(line: &str) -> Option<Diagnostic> {
    let captures = DIAGNOSTIC_LINE.captures(line)?;

    let file = captures.name("file")?.as_str();
    let line_number: u32 = captures.name("line")?.as_str().parse().ok()?;
    let column: Option<u32> = captures
        .name("column")
        .and_then(|m| m.as_str().parse().ok());
    let severity = captures.name("severity")?.as_str();
    let message = captures.name("message")?.as_str();

    let kind = match severity {
        "error" | "fatal error" => DiagnosticKind::CompileError,
        "warning" => DiagnosticKind::CompileWarning,
        _ => return None,
    };

    Some(
        Diagnostic::new(kind, message)
            .with_location(Some(SourceLocation::new(file, line_number, column))),
    )
}
