//! `#include` resolution: search paths, cache, `#pragma once`,
//! `include_next`, embedded stdlib headers
//!
//! Quoted includes try the including file's directory first, then user
//! paths (`-I`), then system paths (`--isystem`). Angle includes consult
//! the embedded stdlib (when enabled), then the same path lists.
//! Resolution results are cached by (spelling, is_system) to avoid
//! repeated stat calls; `include_next` resumes the search after the path
//! entry that produced the current file.

use std::path::{Path, PathBuf};

use crate::diag::Fatal;
use crate::lexer;
use crate::stdlib;
use crate::token::{Token, TokenKind};

use super::{macros, Preprocessor};

enum IncludeName {
    Quoted(String),
    Angled(String),
}

pub fn do_include(pp: &mut Preprocessor, tok: &Token, is_next: bool) -> Result<(), Fatal> {
    let Some(name) = read_include_name(pp, tok)? else {
        return Ok(());
    };

    let current_file = pp.sess.files[tok.file as usize].name.to_string();
    let current_dir = Path::new(&current_file)
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();

    let (spelling, is_system) = match &name {
        IncludeName::Quoted(s) => (s.clone(), false),
        IncludeName::Angled(s) => (s.clone(), true),
    };

    // `include_next` resumes after the path entry that found the file
    // currently being processed.
    let start_idx = if is_next {
        pp.sess
            .include_found_idx
            .get(&current_file)
            .map(|i| i + 1)
            .unwrap_or(0)
    } else {
        0
    };

    // Embedded stdlib serves angle includes of the well-known names.
    if is_system && !is_next && pp.sess.opts.use_embedded_stdlib {
        if let Some(text) = stdlib::get_std_header(&spelling) {
            return push_source(pp, &spelling, text.as_bytes());
        }
    }

    // Quoted form: the including file's directory comes first.
    if !is_system && !is_next {
        let local = current_dir.join(&spelling);
        if local.is_file() {
            return push_file(pp, tok, &local, None);
        }
    }

    match search_include_paths(pp, &spelling, is_system, start_idx) {
        Some((path, idx)) => push_file(pp, tok, &path, Some(idx)),
        None => {
            pp.sess
                .error_tok(tok, format!("'{}': file not found", spelling))?;
            Ok(())
        }
    }
}

/// Resolve the filename operand, handling the macro-expanded form.
fn read_include_name(pp: &mut Preprocessor, tok: &Token) -> Result<Option<IncludeName>, Fatal> {
    let line = {
        let mut toks = Vec::new();
        loop {
            match pp.peek() {
                Some(t) if !t.at_bol && !t.is_eof() => toks.push(pp.next().unwrap()),
                _ => break,
            }
        }
        toks
    };
    let Some(first) = line.first() else {
        pp.sess
            .error_tok(tok, "expected a filename after #include".to_string())?;
        return Ok(None);
    };

    // "file.h": the literal spelling is used, escapes are not processed.
    if let TokenKind::Str(lit) = &first.kind {
        return Ok(Some(IncludeName::Quoted(lit.raw.to_string())));
    }

    // <file.h>: join spellings up to '>'.
    if first.is("<") {
        let mut name = String::new();
        let mut closed = false;
        for t in &line[1..] {
            if t.is(">") {
                closed = true;
                break;
            }
            name.push_str(&t.text);
        }
        if !closed {
            pp.sess
                .error_tok(first, "expected '>' to close include filename".to_string())?;
            return Ok(None);
        }
        return Ok(Some(IncludeName::Angled(name)));
    }

    // Macro-expanded form: `#include FOO` where FOO yields one of the
    // two spellings above.
    if first.is_ident() {
        let expanded = macros::expand_all(pp, line)?;
        if let Some(first) = expanded.first() {
            if let TokenKind::Str(lit) = &first.kind {
                return Ok(Some(IncludeName::Quoted(lit.raw.to_string())));
            }
            if first.is("<") {
                let name: String = expanded[1..]
                    .iter()
                    .take_while(|t| !t.is(">"))
                    .map(|t| t.text.to_string())
                    .collect();
                return Ok(Some(IncludeName::Angled(name)));
            }
        }
    }

    pp.sess
        .error_tok(tok, "expected a filename after #include".to_string())?;
    Ok(None)
}

/// Walk the user then system search paths from `start_idx`, consulting
/// the session cache for fresh searches.
fn search_include_paths(
    pp: &mut Preprocessor,
    spelling: &str,
    is_system: bool,
    start_idx: usize,
) -> Option<(PathBuf, usize)> {
    if Path::new(spelling).is_absolute() {
        let p = PathBuf::from(spelling);
        return p.is_file().then_some((p, 0));
    }

    let key = (spelling.to_string(), is_system);
    if start_idx == 0 {
        if let Some(cached) = pp.sess.include_cache.get(&key) {
            return cached.clone().map(|p| {
                let idx = pp
                    .sess
                    .include_found_idx
                    .get(&p.to_string_lossy().to_string())
                    .copied()
                    .unwrap_or(0);
                (p, idx)
            });
        }
    }

    let paths: Vec<PathBuf> = pp
        .sess
        .include_paths
        .iter()
        .chain(pp.sess.system_include_paths.iter())
        .cloned()
        .collect();

    for (idx, dir) in paths.iter().enumerate().skip(start_idx) {
        let candidate = dir.join(spelling);
        if candidate.is_file() {
            if start_idx == 0 {
                pp.sess.include_cache.insert(key, Some(candidate.clone()));
            }
            return Some((candidate, idx));
        }
    }
    if start_idx == 0 {
        pp.sess.include_cache.insert(key, None);
    }
    None
}

/// Resolve the operand of `#embed` like a quoted include.
pub fn resolve_embed(
    pp: &mut Preprocessor,
    spelling: &str,
    tok: &Token,
) -> Result<Option<PathBuf>, Fatal> {
    let current_file = pp.sess.files[tok.file as usize].name.to_string();
    let local = Path::new(&current_file)
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default()
        .join(spelling);
    if local.is_file() {
        return Ok(Some(local));
    }
    match search_include_paths(pp, spelling, false, 0) {
        Some((path, _)) => Ok(Some(path)),
        None => {
            pp.sess
                .error_tok(tok, format!("#embed: '{}': file not found", spelling))?;
            Ok(None)
        }
    }
}

fn push_file(
    pp: &mut Preprocessor,
    tok: &Token,
    path: &Path,
    found_idx: Option<usize>,
) -> Result<(), Fatal> {
    let name = path.to_string_lossy().to_string();

    if pp.sess.pragma_once.contains(&name) {
        return Ok(());
    }
    if let Some(idx) = found_idx {
        pp.sess.include_found_idx.insert(name.clone(), idx);
    }

    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            pp.sess
                .error_tok(tok, format!("cannot open {}: {}", name, e))?;
            return Ok(());
        }
    };
    push_source(pp, &name, &raw)
}

/// Tokenize an included source and splice its tokens (sans EOF) before
/// the remaining input.
fn push_source(pp: &mut Preprocessor, name: &str, raw: &[u8]) -> Result<(), Fatal> {
    let file = pp.sess.register_file(name, raw);
    let mut toks = lexer::tokenize(&file, &mut pp.sess.diags)?;
    toks.retain(|t| !t.is_eof());
    toks.reverse();
    pp.stack.append(&mut toks);
    Ok(())
}
