//! Macro definition and hide-set expansion
//!
//! Implements the standard hide-set algorithm: a token refuses to expand
//! to any macro name in its hide-set, which is what makes self-referential
//! macros terminate. Object-like expansion unions `{name}` into each
//! replacement token; function-like expansion unions the intersection of
//! the name token's and closing-paren's hide-sets plus `{name}`. The
//! spliced replacement is pushed back onto the preprocessor stack, so
//! rescanning is just the main pop loop continuing.

use std::rc::Rc;

use crate::diag::{DiagSink, Fatal};
use crate::lexer;
use crate::session::Session;
use crate::source::SourceFile;
use crate::token::{StrKind, StrLit, Token, TokenKind};

use super::Preprocessor;

/// Builtin macros realized by handlers rather than token bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    File,
    Line,
    Counter,
    Date,
    Time,
    Timestamp,
    BaseFile,
}

#[derive(Debug, Clone)]
pub struct Macro {
    pub name: Rc<str>,
    pub is_objlike: bool,
    pub params: Vec<Rc<str>>,
    /// Name bound to the trailing arguments of a variadic macro
    /// (`__VA_ARGS__`, or the identifier of a GNU `args...` parameter).
    pub va_args_name: Option<Rc<str>>,
    pub body: Vec<Token>,
    pub handler: Option<BuiltinKind>,
}

struct MacroArg {
    name: Rc<str>,
    toks: Vec<Token>,
    is_va: bool,
}

/// Define an object-like macro from plain text (`-D`, builtins).
pub fn define_macro(sess: &mut Session, name: &str, body: &str) {
    let body = tokenize_text(sess, "<built-in>", body);
    sess.macros.insert(
        Rc::from(name),
        Macro {
            name: Rc::from(name),
            is_objlike: true,
            params: Vec::new(),
            va_args_name: None,
            body,
            handler: None,
        },
    );
}

fn add_builtin(sess: &mut Session, name: &str, handler: BuiltinKind) {
    sess.macros.insert(
        Rc::from(name),
        Macro {
            name: Rc::from(name),
            is_objlike: true,
            params: Vec::new(),
            va_args_name: None,
            body: Vec::new(),
            handler: Some(handler),
        },
    );
}

/// Predefined macros for a hosted C23 environment on the 64-bit model.
pub fn init_builtin_macros(sess: &mut Session) {
    add_builtin(sess, "__FILE__", BuiltinKind::File);
    add_builtin(sess, "__LINE__", BuiltinKind::Line);
    add_builtin(sess, "__COUNTER__", BuiltinKind::Counter);
    add_builtin(sess, "__DATE__", BuiltinKind::Date);
    add_builtin(sess, "__TIME__", BuiltinKind::Time);
    add_builtin(sess, "__TIMESTAMP__", BuiltinKind::Timestamp);
    add_builtin(sess, "__BASE_FILE__", BuiltinKind::BaseFile);

    define_macro(sess, "__STDC__", "1");
    define_macro(sess, "__STDC_HOSTED__", "1");
    define_macro(sess, "__STDC_VERSION__", "202311L");
    define_macro(sess, "__STDC_UTF_16__", "1");
    define_macro(sess, "__STDC_UTF_32__", "1");
    define_macro(sess, "__LP64__", "1");
    define_macro(sess, "_LP64", "1");
    define_macro(sess, "__SIZEOF_POINTER__", "8");
    define_macro(sess, "__SIZEOF_INT__", "4");
    define_macro(sess, "__SIZEOF_LONG__", "8");

    #[cfg(target_arch = "x86_64")]
    define_macro(sess, "__x86_64__", "1");
    #[cfg(target_arch = "aarch64")]
    define_macro(sess, "__aarch64__", "1");
    #[cfg(target_os = "linux")]
    {
        define_macro(sess, "__linux__", "1");
        define_macro(sess, "__unix__", "1");
    }
    #[cfg(target_os = "macos")]
    define_macro(sess, "__APPLE__", "1");
}

/// Tokenize detached text (macro bodies from `-D`, paste results).
fn tokenize_text(sess: &mut Session, name: &str, text: &str) -> Vec<Token> {
    let file = sess.register_file(name, text.as_bytes());
    let mut scratch = DiagSink {
        collect: true,
        max_errors: usize::MAX,
        ..DiagSink::default()
    };
    let mut toks = lexer::tokenize(&file, &mut scratch).unwrap_or_default();
    toks.retain(|t| !t.is_eof());
    toks
}

/// Handle `#define`.
pub fn read_macro_definition(pp: &mut Preprocessor, define_tok: &Token) -> Result<(), Fatal> {
    let line = read_definition_line(pp);
    let mut iter = line.into_iter().peekable();

    let Some(name_tok) = iter.next() else {
        pp.sess
            .error_tok(define_tok, "macro name missing".to_string())?;
        return Ok(());
    };
    if !name_tok.is_ident() {
        pp.sess
            .error_tok(&name_tok, "macro name must be an identifier".to_string())?;
        return Ok(());
    }
    let name = name_tok.text.clone();

    // A '(' with no preceding space makes the macro function-like.
    let funclike = iter
        .peek()
        .map(|t| t.is("(") && !t.has_space)
        .unwrap_or(false);

    let mac = if funclike {
        iter.next(); // consume '('
        let mut params: Vec<Rc<str>> = Vec::new();
        let mut va_args_name: Option<Rc<str>> = None;
        loop {
            let Some(t) = iter.next() else {
                pp.sess
                    .error_tok(&name_tok, "unterminated macro parameter list".to_string())?;
                break;
            };
            if t.is(")") {
                break;
            }
            if t.is(",") {
                continue;
            }
            if t.is("...") {
                va_args_name = Some(Rc::from("__VA_ARGS__"));
                continue;
            }
            if !t.is_ident() {
                pp.sess
                    .error_tok(&t, "expected a macro parameter name".to_string())?;
                continue;
            }
            // [GNU] `args...` names the variadic parameter.
            if iter.peek().map(|n| n.is("...")).unwrap_or(false) {
                iter.next();
                va_args_name = Some(t.text.clone());
            } else {
                params.push(t.text.clone());
            }
        }
        Macro {
            name: name.clone(),
            is_objlike: false,
            params,
            va_args_name,
            body: iter.collect(),
            handler: None,
        }
    } else {
        Macro {
            name: name.clone(),
            is_objlike: true,
            params: Vec::new(),
            va_args_name: None,
            body: iter.collect(),
            handler: None,
        }
    };

    if let Some(old) = pp.sess.macros.get(&name) {
        if old.handler.is_some() || !same_body(old, &mac) {
            pp.sess
                .error_tok(&name_tok, format!("macro '{}' redefined with a different body", name))?;
        }
    }
    pp.sess.macros.insert(name, mac);
    Ok(())
}

/// Read the rest of the `#define` line without applying line overrides
/// or expansion.
fn read_definition_line(pp: &mut Preprocessor) -> Vec<Token> {
    let mut toks = Vec::new();
    loop {
        match pp.peek() {
            Some(t) if !t.at_bol && !t.is_eof() => toks.push(pp.next().unwrap()),
            _ => break,
        }
    }
    toks
}

fn same_body(a: &Macro, b: &Macro) -> bool {
    a.is_objlike == b.is_objlike
        && a.params == b.params
        && a.va_args_name == b.va_args_name
        && a.body.len() == b.body.len()
        && a.body
            .iter()
            .zip(&b.body)
            .all(|(x, y)| x.text == y.text && x.has_space == y.has_space)
}

/// If `tok` names a macro that is allowed to expand here, expand it onto
/// the stack and return true.
pub fn try_expand(pp: &mut Preprocessor, tok: &Token) -> Result<bool, Fatal> {
    if !tok.is_ident() || tok.hideset.contains(&tok.text) {
        return Ok(false);
    }
    let Some(mac) = pp.sess.macros.get(&tok.text) else {
        return Ok(false);
    };
    let mac = mac.clone();

    if let Some(kind) = mac.handler {
        let new_tok = expand_builtin(pp, tok, kind);
        pp.stack.push(new_tok);
        return Ok(true);
    }

    if mac.is_objlike {
        let hs = tok.hideset.insert(tok.text.clone());
        let origin = Rc::new(tok.clone());
        let mut body: Vec<Token> = mac
            .body
            .iter()
            .map(|t| {
                let mut t = t.clone();
                t.hideset = t.hideset.union(&hs);
                t.origin = Some(origin.clone());
                t
            })
            .collect();
        splice_expansion(pp, tok, &mut body);
        return Ok(true);
    }

    // A function-like macro name not followed by '(' is an ordinary
    // identifier.
    if !pp.peek().map(|t| t.is("(")).unwrap_or(false) {
        return Ok(false);
    }
    pp.next(); // consume '('

    let (args, rparen) = read_macro_args(pp, &mac, tok)?;
    let mut body = subst(pp, &mac, &args, tok)?;
    let hs = tok
        .hideset
        .intersect(&rparen.hideset)
        .insert(tok.text.clone());
    let origin = Rc::new(tok.clone());
    for t in body.iter_mut() {
        t.hideset = t.hideset.union(&hs);
        t.origin = Some(origin.clone());
    }
    splice_expansion(pp, tok, &mut body);
    Ok(true)
}

/// Push a replacement list, transferring the macro token's line-position
/// flags to the first replacement token (or the following token when the
/// expansion is empty).
fn splice_expansion(pp: &mut Preprocessor, tok: &Token, body: &mut Vec<Token>) {
    match body.first_mut() {
        Some(first) => {
            first.at_bol = tok.at_bol;
            first.has_space = tok.has_space;
        }
        None => {
            if let Some(next) = pp.stack.last_mut() {
                if !next.at_bol {
                    next.at_bol = tok.at_bol;
                    next.has_space |= tok.has_space;
                }
            }
        }
    }
    body.reverse();
    pp.stack.append(body);
}

fn expand_builtin(pp: &mut Preprocessor, tok: &Token, kind: BuiltinKind) -> Token {
    match kind {
        BuiltinKind::File => str_token(tok, &tok.filename),
        BuiltinKind::Line => num_token(tok, tok.display_line() as i64),
        BuiltinKind::Counter => {
            let n = pp.sess.counter;
            pp.sess.counter += 1;
            num_token(tok, n)
        }
        BuiltinKind::Date => str_token(tok, &pp.sess.date_str.clone()),
        BuiltinKind::Time => str_token(tok, &pp.sess.time_str.clone()),
        BuiltinKind::Timestamp => {
            let text = format!("{} {}", pp.sess.date_str, pp.sess.time_str);
            str_token(tok, &text)
        }
        BuiltinKind::BaseFile => {
            // The primary source file: the first one that is not a
            // synthetic "<built-in>" buffer.
            let name = pp
                .sess
                .files
                .iter()
                .find(|f| &*f.name != "<built-in>")
                .map(|f| f.name.clone())
                .unwrap_or_else(|| tok.filename.clone());
            str_token(tok, &name)
        }
    }
}

fn num_token(at: &Token, val: i64) -> Token {
    let mut tok = at.clone();
    tok.kind = TokenKind::PpNum;
    tok.text = Rc::from(val.to_string());
    tok.hideset = at.hideset.insert(at.text.clone());
    tok.origin = Some(Rc::new(at.clone()));
    tok
}

fn str_token(at: &Token, contents: &str) -> Token {
    let escaped = escape_string(contents);
    let mut bytes = contents.as_bytes().to_vec();
    bytes.push(0);
    let mut tok = at.clone();
    tok.text = Rc::from(format!("\"{}\"", escaped));
    tok.kind = TokenKind::Str(StrLit {
        raw: Rc::from(escaped),
        bytes: Rc::from(bytes),
        kind: StrKind::Char,
    });
    tok.hideset = at.hideset.insert(at.text.clone());
    tok.origin = Some(Rc::new(at.clone()));
    tok
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Read a parenthesized argument list. The opening paren has already been
/// consumed; returns the arguments and the closing-paren token.
fn read_macro_args(
    pp: &mut Preprocessor,
    mac: &Macro,
    macro_tok: &Token,
) -> Result<(Vec<MacroArg>, Token), Fatal> {
    let mut args: Vec<MacroArg> = Vec::new();

    for (i, param) in mac.params.iter().enumerate() {
        if i > 0 {
            match pp.peek() {
                Some(t) if t.is(",") => {
                    pp.next();
                }
                _ => {
                    pp.sess
                        .error_tok(macro_tok, format!("too few arguments to macro '{}'", mac.name))?;
                    break;
                }
            }
        }
        let toks = read_one_arg(pp, true);
        args.push(MacroArg {
            name: param.clone(),
            toks,
            is_va: false,
        });
    }

    if let Some(va_name) = &mac.va_args_name {
        let toks = if pp.peek().map(|t| t.is(")")).unwrap_or(true) {
            Vec::new()
        } else {
            if !mac.params.is_empty() {
                if pp.peek().map(|t| t.is(",")).unwrap_or(false) {
                    pp.next();
                }
            }
            read_one_arg(pp, false)
        };
        args.push(MacroArg {
            name: va_name.clone(),
            toks,
            is_va: true,
        });
    }

    // Recover from surplus arguments by consuming up to the paren.
    if !pp.peek().map(|t| t.is(")")).unwrap_or(false) {
        if pp.peek().map(|t| !t.is_eof()).unwrap_or(false) {
            pp.sess
                .error_tok(macro_tok, format!("too many arguments to macro '{}'", mac.name))?;
        }
        read_one_arg(pp, false);
    }

    let rparen = match pp.peek() {
        Some(t) if t.is(")") => pp.next().unwrap(),
        _ => {
            pp.sess.error_tok(
                macro_tok,
                "unterminated macro argument list".to_string(),
            )?;
            macro_tok.clone()
        }
    };
    Ok((args, rparen))
}

/// One macro argument: tokens up to an unparenthesized `,` (when
/// `stop_at_comma`) or the closing `)`, which is left in place.
fn read_one_arg(pp: &mut Preprocessor, stop_at_comma: bool) -> Vec<Token> {
    let mut toks = Vec::new();
    let mut depth = 0usize;
    loop {
        let Some(t) = pp.peek() else { break };
        if t.is_eof() {
            break;
        }
        if depth == 0 && t.is(")") {
            break;
        }
        if depth == 0 && stop_at_comma && t.is(",") {
            break;
        }
        let t = pp.next().unwrap();
        if t.is("(") {
            depth += 1;
        } else if t.is(")") {
            depth -= 1;
        }
        toks.push(t);
    }
    toks
}

fn find_arg<'a>(args: &'a [MacroArg], tok: &Token) -> Option<&'a MacroArg> {
    if !tok.is_ident() {
        return None;
    }
    args.iter().find(|a| a.name == tok.text)
}

/// Substitute parameters into a macro body per the standard rules:
/// `#P` stringifies the unexpanded argument, operands of `##` are used
/// unexpanded, everything else is macro-expanded before insertion.
fn subst(
    pp: &mut Preprocessor,
    mac: &Macro,
    args: &[MacroArg],
    macro_tok: &Token,
) -> Result<Vec<Token>, Fatal> {
    let body = &mac.body;
    let mut out: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < body.len() {
        let t = &body[i];

        // "#" param => stringified argument.
        if t.is("#") {
            if let Some(arg) = body.get(i + 1).and_then(|n| find_arg(args, n)) {
                out.push(stringize(t, &arg.toks));
                i += 2;
                continue;
            }
            pp.sess.error_tok(
                t,
                "'#' is not followed by a macro parameter".to_string(),
            )?;
            i += 1;
            continue;
        }

        // [GNU] `, ## __VA_ARGS__` deletes the comma when empty.
        if t.is(",") && body.get(i + 1).map(|n| n.is("##")).unwrap_or(false) {
            if let Some(arg) = body.get(i + 2).and_then(|n| find_arg(args, n)) {
                if arg.is_va {
                    if arg.toks.is_empty() {
                        i += 3;
                    } else {
                        out.push(t.clone());
                        i += 2;
                    }
                    continue;
                }
            }
        }

        if t.is("##") {
            if out.is_empty() {
                pp.sess.error_tok(
                    t,
                    "'##' cannot appear at the start of a macro expansion".to_string(),
                )?;
                i += 1;
                continue;
            }
            if let Some(arg) = body.get(i + 1).and_then(|n| find_arg(args, n)) {
                if !arg.toks.is_empty() {
                    let last = out.pop().unwrap();
                    out.push(paste(pp, &last, &arg.toks[0])?);
                    out.extend(arg.toks[1..].iter().cloned());
                }
                i += 2;
                continue;
            }
            if let Some(rhs) = body.get(i + 1) {
                let last = out.pop().unwrap();
                out.push(paste(pp, &last, rhs)?);
                i += 2;
                continue;
            }
            pp.sess.error_tok(
                t,
                "'##' cannot appear at the end of a macro expansion".to_string(),
            )?;
            i += 1;
            continue;
        }

        // `__VA_OPT__(x)` expands to x iff the variadic args are present.
        if t.is_ident() && &*t.text == "__VA_OPT__" {
            if body.get(i + 1).map(|n| n.is("(")).unwrap_or(false) {
                let (group, next) = read_paren_group(body, i + 1);
                let has_va = args.iter().any(|a| a.is_va && !a.toks.is_empty());
                if has_va {
                    let inner = Macro {
                        body: group,
                        ..mac.clone()
                    };
                    out.extend(subst(pp, &inner, args, macro_tok)?);
                }
                i = next;
                continue;
            }
            pp.sess
                .error_tok(t, "expected '(' after __VA_OPT__".to_string())?;
            i += 1;
            continue;
        }

        if let Some(arg) = find_arg(args, t) {
            // An argument adjacent to `##` is inserted unexpanded.
            if body.get(i + 1).map(|n| n.is("##")).unwrap_or(false) {
                if arg.toks.is_empty() {
                    // Empty argument: `##` is a no-op. If the right-hand
                    // side is also a parameter, insert it raw.
                    let rhs = body.get(i + 2);
                    if let Some(arg2) = rhs.and_then(|n| find_arg(args, n)) {
                        out.extend(arg2.toks.iter().cloned());
                        i += 3;
                    } else {
                        i += 2;
                    }
                } else {
                    out.extend(arg.toks.iter().cloned());
                    i += 1;
                }
                continue;
            }
            // Ordinary occurrence: fully macro-expand the argument first.
            let mut expanded = expand_all(pp, arg.toks.clone())?;
            if let Some(first) = expanded.first_mut() {
                first.at_bol = false;
                first.has_space = t.has_space;
            }
            out.extend(expanded);
            i += 1;
            continue;
        }

        out.push(t.clone());
        i += 1;
    }
    Ok(out)
}

fn read_paren_group(body: &[Token], open: usize) -> (Vec<Token>, usize) {
    debug_assert!(body[open].is("("));
    let mut group = Vec::new();
    let mut depth = 0usize;
    let mut i = open + 1;
    while i < body.len() {
        let t = &body[i];
        if t.is("(") {
            depth += 1;
        } else if t.is(")") {
            if depth == 0 {
                return (group, i + 1);
            }
            depth -= 1;
        }
        group.push(t.clone());
        i += 1;
    }
    (group, i)
}

/// `#P`: quote the argument's spelling, escaping `\` and `"`.
fn stringize(hash: &Token, toks: &[Token]) -> Token {
    let mut text = String::new();
    for (i, t) in toks.iter().enumerate() {
        if i > 0 && t.has_space {
            text.push(' ');
        }
        text.push_str(&t.text);
    }
    let escaped = escape_string(&text);
    let mut bytes = text.into_bytes();
    bytes.push(0);
    let raw: Rc<str> = Rc::from(escaped);
    let mut tok = hash.clone();
    tok.text = Rc::from(format!("\"{}\"", raw));
    tok.kind = TokenKind::Str(StrLit {
        raw,
        bytes: Rc::from(bytes),
        kind: StrKind::Char,
    });
    tok
}

/// `A ## B`: concatenate spellings and re-tokenize the result.
fn paste(pp: &mut Preprocessor, a: &Token, b: &Token) -> Result<Token, Fatal> {
    let text = format!("{}{}", a.text, b.text);
    let file = SourceFile::new(&a.filename, a.file, text.as_bytes());
    let mut scratch = DiagSink {
        collect: true,
        max_errors: usize::MAX,
        ..DiagSink::default()
    };
    let mut toks = lexer::tokenize(&file, &mut scratch).unwrap_or_default();
    toks.retain(|t| !t.is_eof());

    if toks.len() != 1 || scratch.has_errors() {
        pp.sess
            .error_tok(a, format!("pasting forms '{}', an invalid token", text))?;
    }
    let mut tok = match toks.into_iter().next() {
        Some(t) => t,
        None => a.clone(),
    };
    tok.file = a.file;
    tok.filename = a.filename.clone();
    tok.line = a.line;
    tok.col = a.col;
    tok.line_delta = a.line_delta;
    tok.at_bol = a.at_bol;
    tok.has_space = a.has_space;
    tok.hideset = a.hideset.intersect(&b.hideset);
    tok.origin = a.origin.clone();
    Ok(tok)
}

/// Fully macro-expand a detached token list (macro arguments, `#if`
/// lines, `#line` arguments). Runs the main loop over a private stack.
pub fn expand_all(pp: &mut Preprocessor, toks: Vec<Token>) -> Result<Vec<Token>, Fatal> {
    let saved = std::mem::take(&mut pp.stack);
    pp.stack = toks;
    pp.stack.reverse();

    let mut out = Vec::new();
    let result = (|| -> Result<(), Fatal> {
        while let Some(t) = pp.next() {
            if t.is_eof() {
                break;
            }
            if try_expand(pp, &t)? {
                continue;
            }
            out.push(t);
        }
        Ok(())
    })();
    pp.stack = saved;
    result?;
    Ok(out)
}
