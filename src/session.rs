//! Compiler session: all state for one front-end instance
//!
//! A [`Session`] owns everything the pipeline touches: diagnostics, the
//! macro table, include search state, loaded files, the tag registry and
//! the unique-name counters. There is no process-wide state: callers that
//! want parallelism create one session per thread. Dropping the session
//! releases every token, type and AST node it produced.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::ObjRef;
use crate::ctype::TagRegistry;
use crate::diag::{CompileError, DiagSink, Fatal};
use crate::lexer;
use crate::linker;
use crate::parser;
use crate::preprocess;
use crate::preprocess::macros::Macro;
use crate::source::{read_input, FileId, SourceFile};
use crate::token::Token;

/// Tunable options; all have useful defaults.
#[derive(Debug, Clone)]
pub struct Options {
    /// Skip the preprocessor: tokenize and promote keywords only.
    pub skip_preprocess: bool,
    /// Resolve well-known `<...>` headers from the embedded stdlib.
    pub use_embedded_stdlib: bool,
    /// Soft size cap for `#embed`, in bytes.
    pub embed_limit: u64,
    /// Exceeding the cap is an error rather than a warning.
    pub embed_hard_error: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            skip_preprocess: false,
            use_embedded_stdlib: true,
            embed_limit: 10 * 1024 * 1024,
            embed_hard_error: false,
        }
    }
}

pub struct Session {
    pub opts: Options,
    pub(crate) diags: DiagSink,
    pub(crate) files: Vec<Rc<SourceFile>>,
    pub(crate) tags: TagRegistry,
    pub(crate) macros: FxHashMap<Rc<str>, Macro>,
    pub(crate) include_paths: Vec<PathBuf>,
    pub(crate) system_include_paths: Vec<PathBuf>,
    /// Cache of include resolution keyed by (spelling, is_system).
    pub(crate) include_cache: FxHashMap<(String, bool), Option<PathBuf>>,
    /// Files that contained `#pragma once`.
    pub(crate) pragma_once: FxHashSet<String>,
    /// For `#include_next`: the search-path index each included file was
    /// found at.
    pub(crate) include_found_idx: FxHashMap<String, usize>,
    /// `__COUNTER__` state.
    pub(crate) counter: i64,
    unique_id: u64,
    pub(crate) date_str: String,
    pub(crate) time_str: String,
}

impl Default for Session {
    fn default() -> Session {
        Session::new()
    }
}

impl Session {
    pub fn new() -> Session {
        let (date_str, time_str) = timestamp_strings();
        let mut sess = Session {
            opts: Options::default(),
            diags: DiagSink::default(),
            files: Vec::new(),
            tags: TagRegistry::default(),
            macros: FxHashMap::default(),
            include_paths: Vec::new(),
            system_include_paths: Vec::new(),
            include_cache: FxHashMap::default(),
            pragma_once: FxHashSet::default(),
            include_found_idx: FxHashMap::default(),
            counter: 0,
            unique_id: 0,
            date_str,
            time_str,
        };
        preprocess::macros::init_builtin_macros(&mut sess);
        sess
    }

    // ----- configuration -----

    pub fn add_include_path(&mut self, path: impl Into<PathBuf>) {
        self.include_paths.push(path.into());
    }

    pub fn add_system_include_path(&mut self, path: impl Into<PathBuf>) {
        self.system_include_paths.push(path.into());
    }

    /// Define an object-like macro from source text, as `-D name=body`.
    pub fn define(&mut self, name: &str, body: &str) {
        preprocess::macros::define_macro(self, name, body);
    }

    pub fn undef(&mut self, name: &str) {
        self.macros.remove(name);
    }

    // ----- error-mode controls -----

    pub fn set_collect_errors(&mut self, on: bool) {
        self.diags.collect = on;
    }

    pub fn set_max_errors(&mut self, n: usize) {
        self.diags.max_errors = n;
    }

    pub fn set_warnings_as_errors(&mut self, on: bool) {
        self.diags.warnings_as_errors = on;
    }

    pub fn has_errors(&self) -> bool {
        self.diags.has_errors()
    }

    pub fn error_count(&self) -> usize {
        self.diags.error_count()
    }

    pub fn warning_count(&self) -> usize {
        self.diags.warning_count()
    }

    pub fn clear_errors(&mut self) {
        self.diags.clear();
    }

    pub fn print_all_errors(&self, w: &mut dyn std::io::Write) -> std::io::Result<()> {
        self.diags.print_all(w)
    }

    // ----- pipeline -----

    /// Tokenize and preprocess one input file (`-` reads stdin).
    pub fn preprocess(&mut self, path: &str) -> Result<Vec<Token>, CompileError> {
        let raw = read_input(path).map_err(|source| CompileError::Io {
            path: path.to_string(),
            source,
        })?;
        let name = if path == "-" { "<stdin>" } else { path };
        self.preprocess_bytes(name, &raw)
    }

    /// Tokenize and preprocess in-memory source text.
    pub fn preprocess_source(&mut self, name: &str, text: &str) -> Result<Vec<Token>, CompileError> {
        self.preprocess_bytes(name, text.as_bytes())
    }

    fn preprocess_bytes(&mut self, name: &str, raw: &[u8]) -> Result<Vec<Token>, CompileError> {
        let result = (|| {
            let file = self.register_file(name, raw);
            let toks = lexer::tokenize(&file, &mut self.diags)?;
            let toks = if self.opts.skip_preprocess {
                toks
            } else {
                preprocess::preprocess(self, toks)?
            };
            lexer::convert_pp_tokens(toks, &mut self.diags)
        })();
        result.map_err(|_| self.failed())
    }

    /// Parse a preprocessed token stream into a list of top-level
    /// declarations.
    pub fn parse(&mut self, toks: &[Token]) -> Result<Vec<ObjRef>, CompileError> {
        parser::parse(self, toks).map_err(|_| self.failed())
    }

    /// Merge several parsed translation units into one program.
    pub fn link(&mut self, progs: Vec<Vec<ObjRef>>) -> Result<Vec<ObjRef>, CompileError> {
        linker::link_progs(self, progs).map_err(|_| self.failed())
    }

    fn failed(&self) -> CompileError {
        CompileError::Failed {
            errors: self.error_count().max(1),
        }
    }

    // ----- internals shared by the pipeline stages -----

    pub(crate) fn register_file(&mut self, name: &str, raw: &[u8]) -> Rc<SourceFile> {
        let id = self.files.len() as FileId;
        let file = Rc::new(SourceFile::new(name, id, raw));
        self.files.push(file.clone());
        file
    }

    pub(crate) fn error_tok(&mut self, tok: &Token, msg: String) -> Result<(), Fatal> {
        // Report macro-expanded tokens at their expansion origin.
        let mut t = tok;
        while let Some(origin) = &t.origin {
            t = origin;
        }
        self.diags
            .error(t.filename.clone(), t.display_line(), t.col, msg)
    }

    pub(crate) fn warn_tok(&mut self, tok: &Token, msg: String) -> Result<(), Fatal> {
        let mut t = tok;
        while let Some(origin) = &t.origin {
            t = origin;
        }
        self.diags
            .warn(t.filename.clone(), t.display_line(), t.col, msg)
    }

    /// Counter-based hidden name for hoisted statics, string literals and
    /// synthesized tags.
    pub(crate) fn new_unique_name(&mut self) -> Rc<str> {
        let id = self.unique_id;
        self.unique_id += 1;
        Rc::from(format!(".L..{}", id))
    }
}

/// `__DATE__`/`__TIME__` strings for the process start time, formatted
/// like the C originals: "Mmm dd yyyy" and "hh:mm:ss" (UTC).
fn timestamp_strings() -> (String, String) {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (y, m, d) = civil_from_days(days);
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let date = format!("{} {:2} {}", MONTHS[(m - 1) as usize], d, y);
    let time = format!(
        "{:02}:{:02}:{:02}",
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    );
    (date, time)
}

/// Days-since-epoch to (year, month, day), proleptic Gregorian.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_epoch_and_known_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
    }

    #[test]
    fn unique_names_are_distinct() {
        let mut sess = Session::new();
        let a = sess.new_unique_name();
        let b = sess.new_unique_name();
        assert_ne!(a, b);
        assert!(a.starts_with(".L.."));
    }
}
