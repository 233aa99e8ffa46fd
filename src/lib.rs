//! # Introduction
//!
//! cfront is a standalone front end for the C programming language: it
//! takes C source or header files and produces a preprocessed token
//! stream, an abstract syntax tree of declarations, and derived
//! artifacts (a pretty-printed AST and a JSON symbol dump). It is meant
//! to be embedded as a library so that tooling (FFI wrapper generators,
//! static analyzers, documentation extractors) can consume structured C
//! declarations without linking a full compiler.
//!
//! ## Pipeline
//!
//! ```text
//! Source → Tokenizer → Preprocessor → Parser → AST → Printers
//! ```
//!
//! 1. [`lexer`] tokenizes a source buffer into preprocessor-oriented
//!    tokens with full provenance (file, 1-based line/column,
//!    beginning-of-line and leading-space flags).
//! 2. [`preprocess`] evaluates directives, expands macros with the
//!    standard hide-set algorithm, resolves `#include` (with an embedded
//!    [`stdlib`] so common system headers need no host toolchain), and
//!    filters conditional groups.
//! 3. [`parser`] runs recursive descent over the expanded stream with
//!    typedef-aware scope resolution, producing typed [`ast`] nodes with
//!    explicit conversion casts and parse-time constant folding.
//! 4. [`linker`] merges several parsed units, preferring definitions
//!    and deduplicating by name.
//! 5. [`output`] writes token listings, preprocessed re-emission, an
//!    S-expression AST dump and a JSON declaration summary.
//!
//! ## Usage
//!
//! ```no_run
//! use cfront::Session;
//!
//! let mut sess = Session::new();
//! sess.set_collect_errors(true);
//! let toks = sess.preprocess("header.h").unwrap();
//! let objs = sess.parse(&toks).unwrap();
//! cfront::output::output_json(&mut std::io::stdout(), &sess, &objs).unwrap();
//! ```
//!
//! A session is single-threaded and owns every token, type and node it
//! produces; drop it to release them all. Create one session per thread
//! for parallel use.

pub mod ast;
pub mod ctype;
pub mod diag;
pub mod eval;
pub mod lexer;
pub mod linker;
pub mod output;
pub mod parser;
pub mod preprocess;
pub mod session;
pub mod source;
pub mod stdlib;
pub mod token;
pub mod unicode;

pub use diag::{CompileError, Diagnostic, Severity};
pub use session::{Options, Session};
