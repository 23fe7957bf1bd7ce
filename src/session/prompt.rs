//! Interactive prompt seam for the session loop.
//!
//! The session never reads the terminal directly; it goes through the
//! [`Prompter`] trait so the loop can be driven by a scripted implementation
//! in tests.

use std::io::{self, BufRead, Write};

use camino::Utf8PathBuf;

/// Behaviour required to ask the user for the next action.
pub trait Prompter {
    /// Ask for the next source file to check.
    ///
    /// Returns `None` when the user wants to end the session.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` when the terminal cannot be read or written.
    fn read_source_path(&mut self) -> io::Result<Option<Utf8PathBuf>>;

    /// Ask whether to run another attempt after results were shown.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` when the terminal cannot be read or written.
    fn confirm_retry(&mut self) -> io::Result<bool>;
}

/// Prompter reading stdin and writing prompts to stdout.
#[derive(Debug, Default)]
pub struct TerminalPrompter {
    _private: (),
}

impl TerminalPrompter {
    /// Create a terminal-backed prompter.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    fn read_line(prompt: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;

        let mut line = String::new();
        let bytes_read = io::stdin().lock().read_line(&mut line)?;
        if bytes_read == 0 {
            // EOF behaves like an explicit exit.
            return Ok(None);
        }
        Ok(Some(String::from(line.trim())))
    }
}

impl Prompter for TerminalPrompter {
    fn read_source_path(&mut self) -> io::Result<Option<Utf8PathBuf>> {
        let answer = Self::read_line("Source file to check (empty to exit): ")?;
        Ok(answer
            .filter(|value| !value.is_empty())
            .map(Utf8PathBuf::from))
    }

    fn confirm_retry(&mut self) -> io::Result<bool> {
        let answer = Self::read_line("Check another file? [y/N]: ")?;
        Ok(answer.is_some_and(|value| {
            let lowered = value.to_lowercase();
            lowered == "y" || lowered == "yes"
        }))
    }
}
