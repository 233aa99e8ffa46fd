//! Preprocessor: directives, conditional inclusion, macro expansion
//!
//! Consumes a raw token list and produces the expanded stream with
//! directives removed. The preprocessor works off an explicit token stack
//! (next token = pop): `#include` pushes the included file's tokens,
//! macro expansion pushes replacement tokens, and rescanning falls out of
//! the pop loop. Submodules:
//!
//! - [`macros`]: macro table, hide-set expansion, stringify/paste
//! - [`include`]: header search, cache, `#pragma once`, `include_next`
//! - [`expr`]: `#if`/`#elif` constant-expression evaluation
//!
//! `#pragma pack` is not consumed here; it is forwarded to the parser as
//! a synthetic token in the output stream.

pub mod expr;
pub mod include;
pub mod macros;

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::diag::Fatal;
use crate::session::Session;
use crate::source::FileId;
use crate::token::{PackDirective, Token, TokenKind};

/// State of one `#if`/`#elif`/`#else` nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CondCtx {
    InThen,
    InElif,
    InElse,
}

#[derive(Debug)]
struct CondIncl {
    ctx: CondCtx,
    tok: Token,
    /// Whether any branch of this conditional has been taken.
    included: bool,
}

pub struct Preprocessor<'s> {
    pub(crate) sess: &'s mut Session,
    /// Remaining input, reversed so the next token is `stack.pop()`.
    pub(crate) stack: Vec<Token>,
    out: Vec<Token>,
    cond_stack: Vec<CondIncl>,
    /// `#line` overrides per file: (line delta, display name).
    line_overrides: FxHashMap<FileId, (i32, Rc<str>)>,
}

/// Run the preprocessor over a tokenized file.
pub fn preprocess(sess: &mut Session, toks: Vec<Token>) -> Result<Vec<Token>, Fatal> {
    let mut stack = toks;
    stack.reverse();
    let mut pp = Preprocessor {
        sess,
        stack,
        out: Vec::new(),
        cond_stack: Vec::new(),
        line_overrides: FxHashMap::default(),
    };
    pp.run()?;

    let mut out = pp.out;
    if !out.last().map(|t| t.is_eof()).unwrap_or(false) {
        let (file, name, line) = out
            .last()
            .map(|t| (t.file, t.filename.clone(), t.line))
            .unwrap_or((0, Rc::from("<input>"), 1));
        out.push(Token::eof(file, name, line));
    }
    Ok(out)
}

impl<'s> Preprocessor<'s> {
    /// Pop the next token, applying any active `#line` override.
    pub(crate) fn next(&mut self) -> Option<Token> {
        let mut tok = self.stack.pop()?;
        if let Some((delta, name)) = self.line_overrides.get(&tok.file) {
            tok.line_delta = *delta;
            tok.filename = name.clone();
        }
        Some(tok)
    }

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.stack.last()
    }

    /// True when the next token begins a new line (or input is over), so
    /// the current directive's argument list has ended.
    fn at_line_end(&self) -> bool {
        match self.peek() {
            Some(tok) => tok.at_bol || tok.is_eof(),
            None => true,
        }
    }

    /// Collect the rest of the current directive line.
    fn read_line(&mut self) -> Vec<Token> {
        let mut toks = Vec::new();
        while !self.at_line_end() {
            toks.push(self.next().unwrap());
        }
        toks
    }

    fn skip_line(&mut self, directive: &str) -> Result<(), Fatal> {
        let extra = self.read_line();
        if let Some(tok) = extra.first() {
            self.sess
                .warn_tok(tok, format!("extra tokens after #{}", directive))?;
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), Fatal> {
        while let Some(tok) = self.next() {
            if tok.is_eof() {
                // EOFs of included files were stripped when splicing, so
                // this is the end of the main file.
                self.out.push(tok);
                break;
            }

            if macros::try_expand(self, &tok)? {
                continue;
            }

            if tok.is("#") && tok.at_bol {
                self.directive(&tok)?;
                continue;
            }

            self.out.push(tok);
        }

        if let Some(cond) = self.cond_stack.pop() {
            self.sess
                .error_tok(&cond.tok, "unterminated conditional directive".to_string())?;
        }
        Ok(())
    }

    fn directive(&mut self, hash: &Token) -> Result<(), Fatal> {
        // Null directive: `#` on a line of its own.
        if self.at_line_end() {
            return Ok(());
        }
        let tok = self.next().unwrap();
        let name = tok.text.clone();

        match &*name {
            "include" => self.do_include(&tok, false),
            "include_next" => self.do_include(&tok, true),
            "define" => macros::read_macro_definition(self, &tok),
            "undef" => {
                if self.at_line_end() {
                    self.sess.error_tok(&tok, "macro name missing".to_string())?;
                    return Ok(());
                }
                let name_tok = self.next().unwrap();
                if !name_tok.is_ident() {
                    self.sess
                        .error_tok(&name_tok, "macro name must be an identifier".to_string())?;
                } else {
                    self.sess.macros.remove(&name_tok.text);
                }
                self.skip_line("undef")
            }
            "if" => {
                let val = self.eval_cond(&tok)?;
                self.cond_stack.push(CondIncl {
                    ctx: CondCtx::InThen,
                    tok: tok.clone(),
                    included: val != 0,
                });
                if val == 0 {
                    self.skip_cond_group()?;
                }
                Ok(())
            }
            "ifdef" | "ifndef" => {
                let negate = &*name == "ifndef";
                let defined = if self.at_line_end() {
                    self.sess.error_tok(&tok, "macro name missing".to_string())?;
                    false
                } else {
                    let name_tok = self.next().unwrap();
                    let hit = self.sess.macros.contains_key(&name_tok.text);
                    self.skip_line(&name)?;
                    hit
                };
                let included = defined != negate;
                self.cond_stack.push(CondIncl {
                    ctx: CondCtx::InThen,
                    tok: tok.clone(),
                    included,
                });
                if !included {
                    self.skip_cond_group()?;
                }
                Ok(())
            }
            "elif" => {
                match self.cond_stack.last().map(|c| c.ctx) {
                    None => {
                        self.sess.error_tok(&tok, "stray #elif".to_string())?;
                        self.read_line();
                        Ok(())
                    }
                    Some(CondCtx::InElse) => {
                        self.sess
                            .error_tok(&tok, "#elif after #else".to_string())?;
                        self.read_line();
                        Ok(())
                    }
                    Some(_) => {
                        // The active branch was just processed; everything
                        // until #endif is skipped.
                        self.read_line();
                        self.skip_to_endif()
                    }
                }
            }
            "else" => {
                match self.cond_stack.last().map(|c| c.ctx) {
                    None => {
                        self.sess.error_tok(&tok, "stray #else".to_string())?;
                        Ok(())
                    }
                    Some(CondCtx::InElse) => {
                        self.sess
                            .error_tok(&tok, "duplicate #else".to_string())?;
                        self.skip_to_endif()
                    }
                    Some(_) => {
                        if let Some(cond) = self.cond_stack.last_mut() {
                            cond.ctx = CondCtx::InElse;
                        }
                        self.skip_line("else")?;
                        self.skip_to_endif()
                    }
                }
            }
            "endif" => {
                if self.cond_stack.pop().is_none() {
                    self.sess.error_tok(&tok, "stray #endif".to_string())?;
                }
                self.skip_line("endif")
            }
            "line" => self.do_line(&tok),
            "pragma" => self.do_pragma(hash),
            "error" => {
                let msg = join_tokens(&self.read_line());
                self.sess.error_tok(&tok, format!("#error {}", msg).trim_end().to_string())?;
                Ok(())
            }
            "warning" => {
                let msg = join_tokens(&self.read_line());
                self.sess
                    .warn_tok(&tok, format!("#warning {}", msg).trim_end().to_string())?;
                Ok(())
            }
            "embed" => self.do_embed(&tok),
            _ => {
                self.sess
                    .error_tok(&tok, format!("invalid preprocessor directive #{}", name))?;
                self.read_line();
                Ok(())
            }
        }
    }

    /// Evaluate the controlling expression of `#if`/`#elif`.
    fn eval_cond(&mut self, tok: &Token) -> Result<i64, Fatal> {
        let line = self.read_line();
        if line.is_empty() {
            self.sess
                .error_tok(tok, "no expression after #if".to_string())?;
            return Ok(0);
        }
        expr::eval_if_expr(self, line, tok)
    }

    /// Inside a group whose branch was taken: skip everything up to the
    /// matching `#endif`.
    fn skip_to_endif(&mut self) -> Result<(), Fatal> {
        let mut depth = 0usize;
        while let Some(tok) = self.next() {
            if tok.is_eof() {
                self.stack.push(tok);
                return Ok(()); // unterminated; reported by run()
            }
            if !(tok.is("#") && tok.at_bol) || self.at_line_end() {
                continue;
            }
            let dir = self.next().unwrap();
            match &*dir.text {
                "if" | "ifdef" | "ifndef" => depth += 1,
                "endif" if depth == 0 => {
                    self.cond_stack.pop();
                    return self.skip_line("endif");
                }
                "endif" => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// Inside a group whose condition was false: skip until a directive
    /// that could open a live branch, and handle it.
    fn skip_cond_group(&mut self) -> Result<(), Fatal> {
        let mut depth = 0usize;
        while let Some(tok) = self.next() {
            if tok.is_eof() {
                self.stack.push(tok);
                return Ok(());
            }
            if !(tok.is("#") && tok.at_bol) || self.at_line_end() {
                continue;
            }
            let dir = self.next().unwrap();
            match &*dir.text {
                "if" | "ifdef" | "ifndef" => depth += 1,
                "endif" if depth == 0 => {
                    self.cond_stack.pop();
                    return self.skip_line("endif");
                }
                "endif" => depth -= 1,
                "elif" if depth == 0 => {
                    let taken = self.cond_stack.last().map(|c| c.included).unwrap_or(true);
                    if taken {
                        self.read_line();
                        continue;
                    }
                    let val = self.eval_cond(&dir)?;
                    if let Some(cond) = self.cond_stack.last_mut() {
                        cond.ctx = CondCtx::InElif;
                        cond.included = val != 0;
                    }
                    if val != 0 {
                        return Ok(());
                    }
                }
                "else" if depth == 0 => {
                    let taken = self.cond_stack.last().map(|c| c.included).unwrap_or(true);
                    if let Some(cond) = self.cond_stack.last_mut() {
                        cond.ctx = CondCtx::InElse;
                    }
                    self.skip_line("else")?;
                    if !taken {
                        if let Some(cond) = self.cond_stack.last_mut() {
                            cond.included = true;
                        }
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// `#line NUM ["file"]`: adjust line numbers and the display filename
    /// of every following token from the same physical file.
    fn do_line(&mut self, tok: &Token) -> Result<(), Fatal> {
        let mut line = self.read_line();
        line = macros::expand_all(self, line)?;
        let mut iter = line.into_iter();

        let Some(num_tok) = iter.next() else {
            self.sess
                .error_tok(tok, "invalid line marker".to_string())?;
            return Ok(());
        };
        let Ok(target) = num_tok.text.parse::<i64>() else {
            self.sess
                .error_tok(&num_tok, "invalid line marker".to_string())?;
            return Ok(());
        };

        let display = match iter.next() {
            Some(t) => match &t.kind {
                TokenKind::Str(lit) => Some(Rc::from(lit.raw.as_ref())),
                _ => {
                    self.sess
                        .error_tok(&t, "filename expected".to_string())?;
                    None
                }
            },
            None => None,
        };

        // The line after the directive displays as `target`.
        let delta = (target - (tok.line as i64 + 1)) as i32;
        let name = display.unwrap_or_else(|| {
            self.line_overrides
                .get(&tok.file)
                .map(|(_, n)| n.clone())
                .unwrap_or_else(|| tok.filename.clone())
        });
        self.line_overrides.insert(tok.file, (delta, name));
        Ok(())
    }

    fn do_pragma(&mut self, hash: &Token) -> Result<(), Fatal> {
        if self.at_line_end() {
            return Ok(());
        }
        let tok = self.next().unwrap();
        match &*tok.text {
            "once" => {
                let file = self.sess.files[tok.file as usize].name.to_string();
                self.sess.pragma_once.insert(file);
                self.skip_line("pragma once")
            }
            "pack" => self.do_pragma_pack(hash, &tok),
            _ => {
                // Unknown pragmas are ignored wholesale.
                self.read_line();
                Ok(())
            }
        }
    }

    /// `#pragma pack([push|pop][, n]|[n])` becomes one synthetic token the
    /// parser interprets when laying out aggregates.
    fn do_pragma_pack(&mut self, hash: &Token, pack_tok: &Token) -> Result<(), Fatal> {
        let line = self.read_line();
        let inner: Vec<&Token> = line
            .iter()
            .filter(|t| !t.is("(") && !t.is(")") && !t.is(","))
            .collect();

        let parse_n = |t: &Token| -> Option<u32> { t.text.parse::<u32>().ok() };
        let directive = match inner.as_slice() {
            [] => Some(PackDirective::Set(None)),
            [t] if t.is("push") => Some(PackDirective::Push(None)),
            [t] if t.is("pop") => Some(PackDirective::Pop),
            [t] => parse_n(t).map(|n| PackDirective::Set(Some(n))),
            [t, n] if t.is("push") => parse_n(n).map(|n| PackDirective::Push(Some(n))),
            _ => None,
        };

        match directive {
            Some(d) => {
                let mut tok = hash.clone();
                tok.kind = TokenKind::PragmaPack(d);
                tok.text = Rc::from("#pragma pack");
                self.out.push(tok);
            }
            None => {
                self.sess
                    .warn_tok(pack_tok, "malformed #pragma pack, ignored".to_string())?;
            }
        }
        Ok(())
    }

    /// `#embed "file" [limit(N)] [prefix(...)] [suffix(...)] [if_empty(...)]`
    fn do_embed(&mut self, tok: &Token) -> Result<(), Fatal> {
        let line = self.read_line();
        let mut iter = line.into_iter().peekable();

        let Some(name_tok) = iter.next() else {
            self.sess
                .error_tok(tok, "expected a filename after #embed".to_string())?;
            return Ok(());
        };
        let filename = match &name_tok.kind {
            TokenKind::Str(lit) => lit.raw.to_string(),
            _ if name_tok.is("<") => {
                let mut name = String::new();
                for t in iter.by_ref() {
                    if t.is(">") {
                        break;
                    }
                    name.push_str(&t.text);
                }
                name
            }
            _ => {
                self.sess
                    .error_tok(&name_tok, "expected a filename after #embed".to_string())?;
                return Ok(());
            }
        };

        // Optional parameter clauses.
        let mut limit: Option<u64> = None;
        let mut prefix: Vec<Token> = Vec::new();
        let mut suffix: Vec<Token> = Vec::new();
        let mut if_empty: Vec<Token> = Vec::new();
        while let Some(param) = iter.next() {
            let read_group = |iter: &mut std::iter::Peekable<std::vec::IntoIter<Token>>| {
                let mut group = Vec::new();
                if iter.peek().map(|t| t.is("(")).unwrap_or(false) {
                    iter.next();
                    let mut depth = 0;
                    for t in iter.by_ref() {
                        if t.is("(") {
                            depth += 1;
                        } else if t.is(")") {
                            if depth == 0 {
                                break;
                            }
                            depth -= 1;
                        }
                        group.push(t);
                    }
                }
                group
            };
            match &*param.text {
                "limit" => {
                    let group = read_group(&mut iter);
                    let group = macros::expand_all(self, group)?;
                    limit = Some(expr::eval_if_expr(self, group, &param)?.max(0) as u64);
                }
                "prefix" => prefix = read_group(&mut iter),
                "suffix" => suffix = read_group(&mut iter),
                "if_empty" => if_empty = read_group(&mut iter),
                _ => {
                    self.sess
                        .error_tok(&param, format!("unknown #embed parameter '{}'", param.text))?;
                    read_group(&mut iter);
                }
            }
        }

        let Some(path) = include::resolve_embed(self, &filename, &name_tok)? else {
            return Ok(());
        };
        let mut data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                self.sess
                    .error_tok(&name_tok, format!("#embed: {}: {}", filename, e))?;
                return Ok(());
            }
        };
        if let Some(limit) = limit {
            data.truncate(limit as usize);
        }

        if data.len() as u64 > self.sess.opts.embed_limit {
            let msg = format!(
                "#embed file size {} exceeds limit of {} bytes",
                data.len(),
                self.sess.opts.embed_limit
            );
            if self.sess.opts.embed_hard_error {
                self.sess.error_tok(&name_tok, msg)?;
                return Ok(());
            }
            self.sess.warn_tok(&name_tok, msg)?;
        }

        if data.is_empty() {
            self.out.extend(if_empty);
            return Ok(());
        }

        self.out.extend(prefix);
        for (i, byte) in data.iter().enumerate() {
            if i > 0 {
                let mut comma = name_tok.clone();
                comma.kind = TokenKind::Punct;
                comma.text = Rc::from(",");
                comma.at_bol = false;
                comma.has_space = false;
                self.out.push(comma);
            }
            let mut num = name_tok.clone();
            num.kind = TokenKind::PpNum;
            num.text = Rc::from(byte.to_string());
            num.at_bol = false;
            num.has_space = i > 0;
            self.out.push(num);
        }
        self.out.extend(suffix);
        Ok(())
    }

    fn do_include(&mut self, tok: &Token, is_next: bool) -> Result<(), Fatal> {
        include::do_include(self, tok, is_next)
    }
}

/// Join token spellings for `#error`/`#warning` messages, restoring
/// single spaces.
fn join_tokens(toks: &[Token]) -> String {
    let mut out = String::new();
    for (i, tok) in toks.iter().enumerate() {
        if i > 0 && tok.has_space {
            out.push(' ');
        }
        out.push_str(&tok.text);
    }
    out
}
