//! Diagnostics: collected errors/warnings and the fatal escape path
//!
//! Two error channels exist, mirroring the library's two error modes:
//!
//! - Recoverable diagnostics are pushed into a session-scoped [`DiagSink`].
//!   The producing stage substitutes a sentinel (an error-typed node or a
//!   replacement token) and keeps going, so one bad declaration does not
//!   hide every later one.
//! - Unrecoverable conditions (I/O failure, error count past the bound,
//!   collection disabled) return [`Fatal`], which unwinds to the public API
//!   call via ordinary `?` propagation. No panics, no global state.

use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

use thiserror::Error;

/// Diagnostic severity. Warnings never abort a stage on their own, but
/// count as errors under `-Werror`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single collected diagnostic with its source position.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub file: Rc<str>,
    pub line: u32,
    pub col: u32,
    pub severity: Severity,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file, self.line, self.col, self.severity, self.message
        )
    }
}

/// Marker for the non-local escape. The diagnostic that triggered the
/// abort has already been recorded in the sink by the time this value is
/// constructed, so it carries no payload of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fatal;

/// Error type returned by the public `Session` entry points.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compilation failed with {errors} error(s)")]
    Failed { errors: usize },
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Session-scoped diagnostic collector.
///
/// `error()` returns `Err(Fatal)` once the error budget is spent (or
/// immediately when collection is disabled); callers propagate with `?`.
#[derive(Debug)]
pub struct DiagSink {
    pub(crate) diags: Vec<Diagnostic>,
    pub(crate) error_count: usize,
    pub(crate) warning_count: usize,
    pub max_errors: usize,
    pub collect: bool,
    pub warnings_as_errors: bool,
}

impl Default for DiagSink {
    fn default() -> Self {
        DiagSink {
            diags: Vec::new(),
            error_count: 0,
            warning_count: 0,
            max_errors: 20,
            collect: false,
            warnings_as_errors: false,
        }
    }
}

impl DiagSink {
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    /// Record an error. Returns `Err(Fatal)` when the stage must abort:
    /// collection disabled, or the collected count exceeds `max_errors`.
    pub fn error(&mut self, file: Rc<str>, line: u32, col: u32, message: String) -> Result<(), Fatal> {
        self.error_count += 1;
        self.diags.push(Diagnostic {
            message,
            file,
            line,
            col,
            severity: Severity::Error,
        });
        if !self.collect || self.error_count > self.max_errors {
            return Err(Fatal);
        }
        Ok(())
    }

    /// Record a warning. Under `-Werror` this is an error in disguise.
    pub fn warn(&mut self, file: Rc<str>, line: u32, col: u32, message: String) -> Result<(), Fatal> {
        if self.warnings_as_errors {
            return self.error(file, line, col, message);
        }
        self.warning_count += 1;
        self.diags.push(Diagnostic {
            message,
            file,
            line,
            col,
            severity: Severity::Warning,
        });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.diags.clear();
        self.error_count = 0;
        self.warning_count = 0;
    }

    /// Print every collected diagnostic, sorted by file then line.
    pub fn print_all(&self, w: &mut dyn Write) -> io::Result<()> {
        let mut sorted: Vec<&Diagnostic> = self.diags.iter().collect();
        sorted.sort_by(|a, b| (&a.file, a.line, a.col).cmp(&(&b.file, b.line, b.col)));
        for d in sorted {
            writeln!(w, "{}", d)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> Rc<str> {
        Rc::from("t.c")
    }

    #[test]
    fn collection_disabled_aborts_on_first_error() {
        let mut sink = DiagSink::default();
        assert_eq!(sink.error(file(), 1, 1, "boom".into()), Err(Fatal));
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn collection_bounded_by_max_errors() {
        let mut sink = DiagSink {
            collect: true,
            max_errors: 2,
            ..DiagSink::default()
        };
        assert!(sink.error(file(), 1, 1, "a".into()).is_ok());
        assert!(sink.error(file(), 2, 1, "b".into()).is_ok());
        assert_eq!(sink.error(file(), 3, 1, "c".into()), Err(Fatal));
    }

    #[test]
    fn werror_promotes_warnings() {
        let mut sink = DiagSink {
            warnings_as_errors: true,
            ..DiagSink::default()
        };
        assert_eq!(sink.warn(file(), 1, 1, "w".into()), Err(Fatal));
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.warning_count(), 0);
    }

    #[test]
    fn print_all_sorts_by_file_then_line() {
        let mut sink = DiagSink {
            collect: true,
            ..DiagSink::default()
        };
        sink.error(Rc::from("b.c"), 2, 1, "second".into()).unwrap();
        sink.error(Rc::from("a.c"), 9, 1, "first".into()).unwrap();
        let mut out = Vec::new();
        sink.print_all(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let a = text.find("a.c:9:1: error: first").unwrap();
        let b = text.find("b.c:2:1: error: second").unwrap();
        assert!(a < b);
    }
}
