//! Memory analyzer (Valgrind) output classification.

use std::sync::LazyLock;

use regex::Regex;

use super::{
    Diagnostic, DiagnosticKind, SourceLocation, internal_failure_diagnostic, timeout_diagnostic,
};
use crate::engine::ExecutionResult;

#[expect(
    clippy::expect_used,
    reason = "patterns are compile-time constants exercised by unit tests"
)]
fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("analyzer output pattern must compile")
}

/// Valgrind prefixes every line of its own output with `==<pid>==`; anything
/// else on stderr is the program's output and is not analyzer data.
static MARKER: LazyLock<Regex> = LazyLock::new(|| pattern(r"^==\d+==\s?(?P<content>.*)$"));

/// One leak record, e.g.
/// `100 bytes in 1 blocks are definitely lost in loss record 1 of 2`.
static LEAK_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"^\s*(?P<bytes>[\d,]+)(?: \([^)]+\))? bytes in (?P<blocks>[\d,]+) blocks are (?:definitely|indirectly|possibly) lost in loss record",
    )
});

/// A stack frame carrying source attribution, e.g.
/// `   by 0x108668: main (main.c:5)`.
static FRAME: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^\s*(?:at|by) 0x[0-9A-Fa-f]+: .+ \((?P<file>[^:()]+):(?P<line>\d+)\)$")
});

/// Any stack frame line, with or without source attribution.
static FRAME_CONTINUATION: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^\s*(?:at|by) 0x[0-9A-Fa-f]+: "));

/// The definitely-lost entry of the `LEAK SUMMARY` block.
static LEAK_SUMMARY_DEFINITE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^\s*definitely lost: (?P<bytes>[\d,]+) bytes in (?P<blocks>[\d,]+) blocks")
});

/// The closing `ERROR SUMMARY` line.
static ERROR_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^\s*ERROR SUMMARY: (?P<count>[\d,]+) errors?"));

/// Invalid-access and uninitialised-value events.
static MEMORY_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"^\s*(?:Invalid (?:read|write) of size \d+|Invalid free\(\)|Mismatched free\(\)|Use of uninitiali[sz]ed value|Conditional jump or move depends on uninitiali[sz]ed value)",
    )
});

/// Clean-run marker printed when nothing was ever leaked.
const NO_LEAKS_POSSIBLE: &str = "All heap blocks were freed";

/// Classify memory analyzer output into an ordered diagnostic sequence.
///
/// Each leak record becomes one [`DiagnosticKind::MemoryLeak`] carrying the
/// record's byte/block counts; invalid-access events become
/// [`DiagnosticKind::MemoryError`]. Both take source attribution from the
/// first stack frame that names a `(file:line)`. Zero leaks and zero errors
/// yield an empty sequence.
///
/// The analyzer's exit code is not trusted to distinguish findings from tool
/// failure: a nonzero exit whose output matches neither findings nor a clean
/// summary is classified as [`DiagnosticKind::InternalFailure`] carrying the
/// raw text (this covers the analyzer crashing outright).
#[must_use]
pub fn classify_memory(result: &ExecutionResult) -> Vec<Diagnostic> {
    if result.timed_out() {
        return vec![timeout_diagnostic(result)];
    }

    let analyzer_lines: Vec<&str> = result
        .stderr()
        .lines()
        .filter_map(|line| {
            MARKER
                .captures(line)
                .and_then(|captures| captures.name("content"))
                .map(|content| content.as_str())
        })
        .collect();

    let mut diagnostics = vec![];
    let mut saw_leak_record = false;
    let mut saw_clean_marker = false;
    let mut reported_errors: Option<u64> = None;

    for (index, content) in analyzer_lines.iter().enumerate() {
        let following = analyzer_lines.get(index + 1..).unwrap_or(&[]);

        if let Some(captures) = LEAK_RECORD.captures(content) {
            let bytes = parse_count(captures.name("bytes").map(|m| m.as_str()));
            let blocks = parse_count(captures.name("blocks").map(|m| m.as_str()));
            let mut diagnostic = Diagnostic::new(DiagnosticKind::MemoryLeak, content.trim())
                .with_location(frame_location(following));
            if let (Some(bytes), Some(blocks)) = (bytes, blocks) {
                diagnostic = diagnostic.with_leak_counts(bytes, blocks);
            }
            diagnostics.push(diagnostic);
            saw_leak_record = true;
        } else if MEMORY_ERROR.is_match(content) {
            diagnostics.push(
                Diagnostic::new(DiagnosticKind::MemoryError, content.trim())
                    .with_location(frame_location(following)),
            );
        } else if let Some(captures) = LEAK_SUMMARY_DEFINITE.captures(content) {
            // Individual records normally precede the summary; the summary is
            // only a fallback so counts survive when records were suppressed.
            let bytes = parse_count(captures.name("bytes").map(|m| m.as_str()));
            let blocks = parse_count(captures.name("blocks").map(|m| m.as_str()));
            if !saw_leak_record && bytes.is_some_and(|value| value > 0) {
                let mut diagnostic =
                    Diagnostic::new(DiagnosticKind::MemoryLeak, content.trim());
                if let (Some(bytes), Some(blocks)) = (bytes, blocks) {
                    diagnostic = diagnostic.with_leak_counts(bytes, blocks);
                }
                diagnostics.push(diagnostic);
            }
        } else if content.contains(NO_LEAKS_POSSIBLE) {
            saw_clean_marker = true;
        } else if let Some(captures) = ERROR_SUMMARY.captures(content) {
            reported_errors = parse_count(captures.name("count").map(|m| m.as_str()));
        }
    }

    if diagnostics.is_empty() {
        let clean = saw_clean_marker
            || reported_errors == Some(0)
            || (result.exit_code() == 0 && reported_errors.is_none());
        if !clean {
            return vec![internal_failure_diagnostic(result)];
        }
    }

    diagnostics
}

/// Source attribution from the first stack frame naming a `(file:line)`.
///
/// Frames follow their event line until the first non-frame line; frames in
/// system libraries carry no `(file:line)` and are skipped.
fn frame_location(following: &[&str]) -> Option<SourceLocation> {
    following
        .iter()
        .take_while(|line| FRAME_CONTINUATION.is_match(line))
        .find_map(|line| {
            let captures = FRAME.captures(line)?;
            let file = captures.name("file")?.as_str();
            let line_number: u32 = captures.name("line")?.as_str().parse().ok()?;
            Some(SourceLocation::new(file, line_number, None))
        })
}

fn parse_count(raw: Option<&str>) -> Option<u64> {
    raw?.replace(',', "").parse().ok()
}
