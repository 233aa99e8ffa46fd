//! Tokenizer for C source code
//!
//! Converts a [`SourceFile`] into a flat `Vec<Token>` ending in an EOF
//! token. Raw tokenization is preprocessor-oriented: numbers are collected
//! as permissive preprocessing numbers and keywords are left as plain
//! identifiers, so that macros named like keywords behave. After
//! preprocessing, [`convert_pp_tokens`] promotes keywords, converts
//! pp-numbers into typed literals, and concatenates adjacent string
//! literals.
//!
//! Recovery policy: an unterminated literal or malformed escape reports an
//! error at the offending offset and substitutes a best-effort token so the
//! rest of the file still tokenizes.

use std::rc::Rc;

use crate::diag::{DiagSink, Fatal};
use crate::source::SourceFile;
use crate::token::{Hideset, NumLit, NumType, StrKind, StrLit, Token, TokenKind};
use crate::unicode::{decode_utf8, encode_utf8, is_ident_continue, is_ident_start};

// Multi-byte punctuators, longest first so that `>>=` wins over `>>`.
// Digraph spellings are canonicalized to their primary form.
const PUNCTS: &[(&str, &str)] = &[
    ("%:%:", "##"),
    ("<<=", "<<="),
    (">>=", ">>="),
    ("...", "..."),
    ("==", "=="),
    ("!=", "!="),
    ("<=", "<="),
    (">=", ">="),
    ("->", "->"),
    ("+=", "+="),
    ("-=", "-="),
    ("*=", "*="),
    ("/=", "/="),
    ("++", "++"),
    ("--", "--"),
    ("%=", "%="),
    ("&=", "&="),
    ("|=", "|="),
    ("^=", "^="),
    ("&&", "&&"),
    ("||", "||"),
    ("<<", "<<"),
    (">>", ">>"),
    ("##", "##"),
    ("<:", "["),
    (":>", "]"),
    ("<%", "{"),
    ("%>", "}"),
    ("%:", "#"),
];

// Keyword spellings promoted after preprocessing. Sorted for binary search.
const KEYWORDS: &[&str] = &[
    "_Alignas",
    "_Alignof",
    "_Atomic",
    "_Bool",
    "_Noreturn",
    "_Static_assert",
    "_Thread_local",
    "__asm",
    "__asm__",
    "__attribute__",
    "__restrict",
    "__restrict__",
    "__thread",
    "alignas",
    "alignof",
    "asm",
    "auto",
    "bool",
    "break",
    "case",
    "char",
    "const",
    "constexpr",
    "continue",
    "default",
    "do",
    "double",
    "else",
    "enum",
    "extern",
    "false",
    "float",
    "for",
    "goto",
    "if",
    "inline",
    "int",
    "long",
    "register",
    "restrict",
    "return",
    "short",
    "signed",
    "sizeof",
    "static",
    "static_assert",
    "struct",
    "switch",
    "thread_local",
    "true",
    "typedef",
    "union",
    "unsigned",
    "void",
    "volatile",
    "while",
];

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.binary_search(&name).is_ok()
}

struct Lexer<'a> {
    file: &'a SourceFile,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    line_start: usize,
    at_bol: bool,
    has_space: bool,
    diags: &'a mut DiagSink,
    out: Vec<Token>,
}

/// Tokenize one source file into a token list ending in EOF.
pub fn tokenize(file: &SourceFile, diags: &mut DiagSink) -> Result<Vec<Token>, Fatal> {
    let bytes = file.contents.clone();
    let mut lx = Lexer {
        file,
        bytes: &bytes,
        pos: 0,
        line: 1,
        line_start: 0,
        at_bol: true,
        has_space: false,
        diags,
        out: Vec::new(),
    };
    lx.run()?;
    Ok(lx.out)
}

impl<'a> Lexer<'a> {
    fn col(&self, pos: usize) -> u32 {
        (pos - self.line_start + 1) as u32
    }

    fn error_at(&mut self, pos: usize, msg: String) -> Result<(), Fatal> {
        let line = self.line;
        let col = self.col(pos);
        self.diags.error(self.file.name.clone(), line, col, msg)
    }

    fn peek(&self, off: usize) -> u8 {
        *self.bytes.get(self.pos + off).unwrap_or(&0)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.bytes[self.pos..].starts_with(s.as_bytes())
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        let text: Rc<str> = Rc::from(String::from_utf8_lossy(&self.bytes[start..end]).into_owned());
        self.push_text(kind, start, text);
    }

    fn push_text(&mut self, kind: TokenKind, start: usize, text: Rc<str>) {
        self.out.push(Token {
            kind,
            text,
            file: self.file.id,
            filename: self.file.name.clone(),
            line: self.line,
            col: self.col(start),
            line_delta: 0,
            at_bol: self.at_bol,
            has_space: self.has_space,
            hideset: Hideset::default(),
            origin: None,
        });
        self.at_bol = false;
        self.has_space = false;
    }

    fn run(&mut self) -> Result<(), Fatal> {
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];

            if b == b'\n' {
                self.pos += 1;
                self.line += 1;
                self.line_start = self.pos;
                self.at_bol = true;
                self.has_space = false;
                continue;
            }
            if b == b' ' || b == b'\t' || b == 0x0B || b == 0x0C {
                self.pos += 1;
                self.has_space = true;
                continue;
            }
            if self.starts_with("//") {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
                self.has_space = true;
                continue;
            }
            if self.starts_with("/*") {
                self.block_comment()?;
                continue;
            }

            // String and character literals, including encoding prefixes.
            // Checked before the identifier path so `u8"x"` is one token.
            if let Some((prefix_len, kind)) = self.string_prefix() {
                self.string_literal(prefix_len, kind)?;
                continue;
            }
            if let Some(prefix_len) = self.char_prefix() {
                self.char_literal(prefix_len)?;
                continue;
            }

            // Preprocessing number: [0-9] or '.' followed by a digit.
            if b.is_ascii_digit() || (b == b'.' && self.peek(1).is_ascii_digit()) {
                self.pp_number();
                continue;
            }

            // Identifier (UTF-8 aware).
            if let Some((c, len)) = decode_utf8(self.bytes, self.pos) {
                if is_ident_start(c) {
                    self.identifier(len);
                    continue;
                }
            }

            if self.punctuator() {
                continue;
            }

            self.error_at(self.pos, format!("stray '\\x{:02x}' in program", b))?;
            self.pos += 1;
        }

        let mut eof = Token::eof(self.file.id, self.file.name.clone(), self.line);
        eof.at_bol = self.at_bol;
        self.out.push(eof);
        Ok(())
    }

    fn block_comment(&mut self) -> Result<(), Fatal> {
        let start = self.pos;
        self.pos += 2;
        loop {
            if self.pos + 1 >= self.bytes.len() {
                self.error_at(start, "unterminated block comment".to_string())?;
                self.pos = self.bytes.len();
                return Ok(());
            }
            if self.bytes[self.pos] == b'\n' {
                self.line += 1;
                self.line_start = self.pos + 1;
            }
            if self.starts_with("*/") {
                self.pos += 2;
                self.has_space = true;
                return Ok(());
            }
            self.pos += 1;
        }
    }

    fn string_prefix(&self) -> Option<(usize, StrKind)> {
        if self.starts_with("u8\"") {
            Some((2, StrKind::Char))
        } else if self.starts_with("u\"") {
            Some((1, StrKind::Utf16))
        } else if self.starts_with("U\"") || self.starts_with("L\"") {
            Some((1, StrKind::Utf32))
        } else if self.peek(0) == b'"' {
            Some((0, StrKind::Char))
        } else {
            None
        }
    }

    fn char_prefix(&self) -> Option<usize> {
        if self.starts_with("u'") || self.starts_with("U'") || self.starts_with("L'") {
            Some(1)
        } else if self.peek(0) == b'\'' {
            Some(0)
        } else {
            None
        }
    }

    /// Find the closing quote of a literal body, honoring escapes.
    /// Returns the body range, or None if the literal runs off the line.
    fn literal_body(&mut self, open: usize) -> Option<(usize, usize)> {
        let quote = self.bytes[open];
        let mut i = open + 1;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\n' => return None,
                b'\\' if i + 1 < self.bytes.len() => i += 2,
                b if b == quote => return Some((open + 1, i)),
                _ => i += 1,
            }
        }
        None
    }

    fn string_literal(&mut self, prefix_len: usize, kind: StrKind) -> Result<(), Fatal> {
        let start = self.pos;
        let open = start + prefix_len;
        let Some((body_start, body_end)) = self.literal_body(open) else {
            self.error_at(start, "unterminated string literal".to_string())?;
            // Best-effort replacement: an empty string, then resync at
            // the end of the line.
            let lit = StrLit {
                raw: Rc::from(""),
                bytes: Rc::from(vec![0u8; kind.width()]),
                kind,
            };
            self.push_text(TokenKind::Str(lit), start, Rc::from("\"\""));
            while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                self.pos += 1;
            }
            return Ok(());
        };

        let raw: Rc<str> =
            Rc::from(String::from_utf8_lossy(&self.bytes[body_start..body_end]).into_owned());
        let (bytes, errs) = decode_string_body(&raw, kind);
        for (off, msg) in errs {
            self.error_at(body_start + off, msg)?;
        }
        let lit = StrLit {
            raw,
            bytes: Rc::from(bytes),
            kind,
        };
        let end = body_end + 1;
        self.push(TokenKind::Str(lit), start, end);
        self.pos = end;
        Ok(())
    }

    fn char_literal(&mut self, prefix_len: usize) -> Result<(), Fatal> {
        let start = self.pos;
        let open = start + prefix_len;
        let Some((body_start, body_end)) = self.literal_body(open) else {
            self.error_at(start, "unterminated character literal".to_string())?;
            let num = NumLit {
                ival: 0,
                fval: 0.0,
                ty: NumType::Int,
            };
            self.push_text(TokenKind::Num(num), start, Rc::from("''"));
            while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                self.pos += 1;
            }
            return Ok(());
        };

        let body = &self.bytes[body_start..body_end];
        let (val, consumed, err) = decode_char(body);
        if let Some(msg) = err {
            self.error_at(body_start, msg)?;
        } else if body.is_empty() {
            self.error_at(start, "empty character literal".to_string())?;
        } else if consumed < body.len() {
            self.error_at(start, "multi-character literal".to_string())?;
        }

        // A plain char literal is sign-extended from `char`; prefixed
        // forms keep the full code point.
        let ival = match prefix_len {
            0 => val as u8 as i8 as i64,
            _ => val as i64,
        };
        let ty = if prefix_len != 0 && self.bytes[start] != b'u' {
            NumType::UInt
        } else {
            NumType::Int
        };
        let num = NumLit {
            ival,
            fval: 0.0,
            ty,
        };
        let end = body_end + 1;
        self.push(TokenKind::Num(num), start, end);
        self.pos = end;
        Ok(())
    }

    fn pp_number(&mut self) {
        let start = self.pos;
        self.pos += 1;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            let next = self.peek(1);
            if (b == b'e' || b == b'E' || b == b'p' || b == b'P')
                && (next == b'+' || next == b'-')
            {
                self.pos += 2;
            } else if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' {
                self.pos += 1;
            } else if b == b'\'' && next.is_ascii_alphanumeric() {
                // C23 digit separator.
                self.pos += 2;
            } else {
                break;
            }
        }
        self.push(TokenKind::PpNum, start, self.pos);
    }

    fn identifier(&mut self, first_len: usize) {
        let start = self.pos;
        self.pos += first_len;
        while let Some((c, len)) = decode_utf8(self.bytes, self.pos) {
            if !is_ident_continue(c) {
                break;
            }
            self.pos += len;
        }
        self.push(TokenKind::Ident, start, self.pos);
    }

    fn punctuator(&mut self) -> bool {
        for &(spelling, canonical) in PUNCTS {
            if self.starts_with(spelling) {
                let start = self.pos;
                self.pos += spelling.len();
                self.push_text(TokenKind::Punct, start, Rc::from(canonical));
                return true;
            }
        }
        let b = self.peek(0);
        if b.is_ascii_punctuation() {
            let start = self.pos;
            self.pos += 1;
            self.push(TokenKind::Punct, start, start + 1);
            return true;
        }
        false
    }
}

/// Decode the body of a string literal (between the quotes) into element
/// bytes at the given width, appending the terminating NUL. Escape errors
/// are returned as (byte offset within body, message) pairs.
pub fn decode_string_body(raw: &str, kind: StrKind) -> (Vec<u8>, Vec<(usize, String)>) {
    let bytes = raw.as_bytes();
    // Code points plus whether each came from an escape sequence: `\xff`
    // must emit the raw byte 0xFF, while a source `ÿ` re-encodes as UTF-8.
    let mut cps: Vec<(u32, bool)> = Vec::new();
    let mut errs = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let (c, len, err) = decode_escape(&bytes[i..]);
            if let Some(msg) = err {
                errs.push((i, msg));
            }
            cps.push((c, true));
            i += len;
        } else {
            match decode_utf8(bytes, i) {
                Some((c, len)) => {
                    cps.push((c, false));
                    i += len;
                }
                None => {
                    errs.push((i, "invalid UTF-8 sequence".to_string()));
                    cps.push((bytes[i] as u32, true));
                    i += 1;
                }
            }
        }
    }
    cps.push((0, true));

    let mut out = Vec::new();
    match kind {
        StrKind::Char => {
            for &(c, escaped) in &cps {
                if escaped && c <= 0xFF {
                    out.push(c as u8);
                } else {
                    encode_utf8(&mut out, c);
                }
            }
        }
        StrKind::Utf16 => {
            for &(c, _) in &cps {
                if c < 0x10000 {
                    out.extend_from_slice(&(c as u16).to_le_bytes());
                } else {
                    let v = c - 0x10000;
                    let hi = 0xD800 + (v >> 10) as u16;
                    let lo = 0xDC00 + (v & 0x3FF) as u16;
                    out.extend_from_slice(&hi.to_le_bytes());
                    out.extend_from_slice(&lo.to_le_bytes());
                }
            }
        }
        StrKind::Utf32 => {
            for &(c, _) in &cps {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
    }
    (out, errs)
}

/// Decode one escape sequence starting at a backslash. Returns the code
/// point, bytes consumed, and an error message for malformed forms.
fn decode_escape(bytes: &[u8]) -> (u32, usize, Option<String>) {
    debug_assert_eq!(bytes[0], b'\\');
    let Some(&b) = bytes.get(1) else {
        return (b'\\' as u32, 1, Some("stray backslash".to_string()));
    };
    match b {
        b'0'..=b'7' => {
            let mut c = 0u32;
            let mut i = 1;
            while i < bytes.len() && i <= 3 && bytes[i].is_ascii_digit() && bytes[i] < b'8' {
                c = c * 8 + (bytes[i] - b'0') as u32;
                i += 1;
            }
            (c, i, None)
        }
        b'x' => {
            let mut c = 0u32;
            let mut i = 2;
            let mut digits = 0;
            while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                c = c.wrapping_mul(16) + (bytes[i] as char).to_digit(16).unwrap();
                i += 1;
                digits += 1;
            }
            if digits == 0 {
                (b'x' as u32, 2, Some("invalid hex escape sequence".to_string()))
            } else {
                (c, i, None)
            }
        }
        b'u' | b'U' => {
            let want = if b == b'u' { 4 } else { 8 };
            let mut c = 0u32;
            for k in 0..want {
                match bytes.get(2 + k).filter(|b| b.is_ascii_hexdigit()) {
                    Some(&d) => c = c * 16 + (d as char).to_digit(16).unwrap(),
                    None => {
                        return (
                            b as u32,
                            2,
                            Some("incomplete universal character name".to_string()),
                        )
                    }
                }
            }
            (c, 2 + want, None)
        }
        b'a' => (0x07, 2, None),
        b'b' => (0x08, 2, None),
        b't' => (0x09, 2, None),
        b'n' => (0x0A, 2, None),
        b'v' => (0x0B, 2, None),
        b'f' => (0x0C, 2, None),
        b'r' => (0x0D, 2, None),
        // [GNU] \e for ESC.
        b'e' => (0x1B, 2, None),
        b'\'' | b'"' | b'?' | b'\\' => (b as u32, 2, None),
        _ => (b as u32, 2, None),
    }
}

fn decode_char(body: &[u8]) -> (u32, usize, Option<String>) {
    if body.is_empty() {
        return (0, 0, None);
    }
    if body[0] == b'\\' {
        let (c, len, err) = decode_escape(body);
        return (c, len, err);
    }
    match decode_utf8(body, 0) {
        Some((c, len)) => (c, len, None),
        None => (body[0] as u32, 1, Some("invalid UTF-8 sequence".to_string())),
    }
}

/// Post-preprocessing conversion: promote keywords, convert pp-numbers to
/// typed literals, and concatenate adjacent string literals (widening to
/// the widest element type among the pieces).
pub fn convert_pp_tokens(toks: Vec<Token>, diags: &mut DiagSink) -> Result<Vec<Token>, Fatal> {
    let mut out: Vec<Token> = Vec::with_capacity(toks.len());
    let mut iter = toks.into_iter().peekable();
    while let Some(mut tok) = iter.next() {
        match &tok.kind {
            TokenKind::Ident if is_keyword(&tok.text) => {
                tok.kind = TokenKind::Keyword;
                out.push(tok);
            }
            TokenKind::PpNum => {
                match convert_pp_number(&tok.text) {
                    Some(num) => tok.kind = TokenKind::Num(num),
                    None => {
                        diags.error(
                            tok.filename.clone(),
                            tok.display_line(),
                            tok.col,
                            format!("invalid numeric constant '{}'", tok.text),
                        )?;
                        tok.kind = TokenKind::Num(NumLit {
                            ival: 0,
                            fval: 0.0,
                            ty: NumType::Int,
                        });
                    }
                }
                out.push(tok);
            }
            TokenKind::Str(first) => {
                let first = first.clone();
                let mut pieces = vec![first.clone()];
                let mut widest = first.kind;
                while let Some(next) = iter.peek() {
                    let TokenKind::Str(lit) = &next.kind else { break };
                    if lit.kind != widest && lit.kind != StrKind::Char && widest != StrKind::Char {
                        diags.warn(
                            tok.filename.clone(),
                            tok.display_line(),
                            tok.col,
                            "concatenation of string literals with different encodings"
                                .to_string(),
                        )?;
                    }
                    widest = widest.max(lit.kind);
                    pieces.push(lit.clone());
                    iter.next();
                }
                if pieces.len() > 1 || first.kind != widest {
                    let mut joined_raw = String::new();
                    let mut bytes: Vec<u8> = Vec::new();
                    for piece in &pieces {
                        joined_raw.push_str(&piece.raw);
                        let (decoded, _) = decode_string_body(&piece.raw, widest);
                        // Drop each piece's NUL; one goes back at the end.
                        bytes.extend_from_slice(&decoded[..decoded.len() - widest.width()]);
                    }
                    bytes.extend(std::iter::repeat(0).take(widest.width()));
                    tok.kind = TokenKind::Str(StrLit {
                        raw: Rc::from(joined_raw),
                        bytes: Rc::from(bytes),
                        kind: widest,
                    });
                }
                out.push(tok);
            }
            _ => out.push(tok),
        }
    }
    Ok(out)
}

/// Convert a preprocessing number into a typed literal, or None when the
/// spelling is not a valid C numeric constant.
pub fn convert_pp_number(text: &str) -> Option<NumLit> {
    let cleaned: String = text.chars().filter(|&c| c != '\'').collect();
    let s = cleaned.as_str();

    if let Some(num) = convert_int(s) {
        return Some(num);
    }
    convert_float(s)
}

fn convert_int(s: &str) -> Option<NumLit> {
    let bytes = s.as_bytes();
    let (base, digits_start) = if s.len() > 2 && (s.starts_with("0x") || s.starts_with("0X")) {
        (16u32, 2)
    } else if s.len() > 2 && (s.starts_with("0b") || s.starts_with("0B")) {
        (2, 2)
    } else if s.starts_with('0') {
        (8, 1)
    } else {
        (10, 0)
    };

    let mut val: u64 = 0;
    let mut i = digits_start;
    let mut ndigits = 0;
    while i < bytes.len() {
        match (bytes[i] as char).to_digit(base) {
            Some(d) => {
                val = val.wrapping_mul(base as u64).wrapping_add(d as u64);
                ndigits += 1;
                i += 1;
            }
            None => break,
        }
    }
    // A lone "0" is an octal constant with no further digits.
    if ndigits == 0 && base != 8 {
        return None;
    }

    // Suffix: u/U and l/L/ll/LL in either order.
    let mut has_u = false;
    let mut has_l = false;
    let mut r = &s[i..];
    for _ in 0..2 {
        if r.starts_with('u') || r.starts_with('U') {
            if has_u {
                return None;
            }
            has_u = true;
            r = &r[1..];
        } else if r.starts_with("ll") || r.starts_with("LL") {
            if has_l {
                return None;
            }
            has_l = true;
            r = &r[2..];
        } else if r.starts_with('l') || r.starts_with('L') {
            if has_l {
                return None;
            }
            has_l = true;
            r = &r[1..];
        }
    }
    if !r.is_empty() {
        return None;
    }

    let ty = if base == 10 {
        match (has_u, has_l) {
            (true, true) => NumType::ULong,
            (false, true) => NumType::Long,
            (true, false) => {
                if val >> 32 != 0 {
                    NumType::ULong
                } else {
                    NumType::UInt
                }
            }
            (false, false) => {
                if val >> 31 != 0 {
                    NumType::Long
                } else {
                    NumType::Int
                }
            }
        }
    } else {
        match (has_u, has_l) {
            (true, true) => NumType::ULong,
            (true, false) => {
                if val >> 32 != 0 {
                    NumType::ULong
                } else {
                    NumType::UInt
                }
            }
            (false, true) => {
                if val >> 63 != 0 {
                    NumType::ULong
                } else {
                    NumType::Long
                }
            }
            (false, false) => {
                if val >> 63 != 0 {
                    NumType::ULong
                } else if val >> 32 != 0 {
                    NumType::Long
                } else if val >> 31 != 0 {
                    NumType::UInt
                } else {
                    NumType::Int
                }
            }
        }
    };

    Some(NumLit {
        ival: val as i64,
        fval: 0.0,
        ty,
    })
}

fn convert_float(s: &str) -> Option<NumLit> {
    let (body, ty) = match s.as_bytes().last()? {
        b'f' | b'F' => (&s[..s.len() - 1], NumType::Float),
        b'l' | b'L' => (&s[..s.len() - 1], NumType::LDouble),
        _ => (s, NumType::Double),
    };

    let fval = if body.starts_with("0x") || body.starts_with("0X") {
        parse_hex_float(&body[2..])?
    } else {
        // Reject spellings Rust would accept but C would not ("inf",
        // "08"): require float syntax and float characters only.
        if !body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
            || !body.contains(['.', 'e', 'E'])
        {
            return None;
        }
        body.parse::<f64>().ok()?
    };
    Some(NumLit {
        ival: 0,
        fval,
        ty,
    })
}

/// C99 hexadecimal floating constant: hex mantissa with optional point,
/// mandatory binary exponent `p`/`P`.
fn parse_hex_float(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut mantissa = 0f64;
    let mut i = 0;
    let mut any = false;
    while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
        mantissa = mantissa * 16.0 + (bytes[i] as char).to_digit(16).unwrap() as f64;
        i += 1;
        any = true;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let mut scale = 1.0 / 16.0;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
            mantissa += (bytes[i] as char).to_digit(16).unwrap() as f64 * scale;
            scale /= 16.0;
            i += 1;
            any = true;
        }
    }
    if !any || i >= bytes.len() || (bytes[i] != b'p' && bytes[i] != b'P') {
        return None;
    }
    i += 1;
    let mut sign = 1i32;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        sign = if bytes[i] == b'-' { -1 } else { 1 };
        i += 1;
    }
    let mut exp = 0i32;
    let mut any_exp = false;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        exp = exp.saturating_mul(10).saturating_add((bytes[i] - b'0') as i32);
        i += 1;
        any_exp = true;
    }
    if !any_exp || i != bytes.len() {
        return None;
    }
    Some(mantissa * 2f64.powi(sign * exp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFile;

    fn lex(src: &str) -> Vec<Token> {
        let file = SourceFile::new("test.c", 0, src.as_bytes());
        let mut diags = DiagSink {
            collect: true,
            max_errors: 100,
            ..DiagSink::default()
        };
        tokenize(&file, &mut diags).unwrap()
    }

    fn texts(toks: &[Token]) -> Vec<String> {
        toks.iter()
            .filter(|t| !t.is_eof())
            .map(|t| t.text.to_string())
            .collect()
    }

    #[test]
    fn basic_tokens() {
        let toks = lex("int main(void) { return 0; }");
        assert_eq!(
            texts(&toks),
            vec!["int", "main", "(", "void", ")", "{", "return", "0", ";", "}"]
        );
    }

    #[test]
    fn bol_and_space_flags() {
        let toks = lex("a b\nc");
        assert!(toks[0].at_bol);
        assert!(!toks[0].has_space);
        assert!(!toks[1].at_bol);
        assert!(toks[1].has_space);
        assert!(toks[2].at_bol);
    }

    #[test]
    fn longest_match_punctuators() {
        let toks = lex("a <<= b >> c ... ##");
        let t = texts(&toks);
        assert!(t.contains(&"<<=".to_string()));
        assert!(t.contains(&">>".to_string()));
        assert!(t.contains(&"...".to_string()));
        assert!(t.contains(&"##".to_string()));
    }

    #[test]
    fn digraphs_are_canonicalized() {
        let toks = lex("<% %> <: :> %: %:%:");
        assert_eq!(texts(&toks), vec!["{", "}", "[", "]", "#", "##"]);
    }

    #[test]
    fn line_and_column_are_one_based() {
        let toks = lex("a\n  b");
        assert_eq!((toks[0].line, toks[0].col), (1, 1));
        assert_eq!((toks[1].line, toks[1].col), (2, 3));
    }

    #[test]
    fn comments_are_skipped() {
        let toks = lex("a // comment\nb /* block\nstill */ c");
        assert_eq!(texts(&toks), vec!["a", "b", "c"]);
    }

    #[test]
    fn pp_number_is_permissive() {
        let toks = lex("1.0e+5 0x1f 3abc");
        assert!(matches!(toks[0].kind, TokenKind::PpNum));
        assert_eq!(toks[0].text.as_ref(), "1.0e+5");
        assert_eq!(toks[2].text.as_ref(), "3abc");
    }

    #[test]
    fn string_escapes_decode() {
        let toks = lex(r#""a\n\x41\0""#);
        let TokenKind::Str(lit) = &toks[0].kind else {
            panic!("expected string")
        };
        assert_eq!(&*lit.bytes, b"a\n\x41\0\0");
    }

    #[test]
    fn wide_string_element_width() {
        let toks = lex(r#"u"ab" U"a""#);
        let TokenKind::Str(a) = &toks[0].kind else { panic!() };
        assert_eq!(a.kind, StrKind::Utf16);
        assert_eq!(a.bytes.len(), 6);
        let TokenKind::Str(b) = &toks[1].kind else { panic!() };
        assert_eq!(b.kind, StrKind::Utf32);
        assert_eq!(b.bytes.len(), 8);
    }

    #[test]
    fn char_literal_values() {
        let toks = lex(r"'a' '\n' '\xff'");
        let vals: Vec<i64> = toks
            .iter()
            .filter_map(|t| match t.kind {
                TokenKind::Num(n) => Some(n.ival),
                _ => None,
            })
            .collect();
        assert_eq!(vals, vec![97, 10, -1]);
    }

    #[test]
    fn unterminated_string_recovers() {
        let file = SourceFile::new("test.c", 0, b"\"abc\nint x;");
        let mut diags = DiagSink {
            collect: true,
            ..DiagSink::default()
        };
        let toks = tokenize(&file, &mut diags).unwrap();
        assert_eq!(diags.error_count(), 1);
        // Lexing continued on the next line.
        assert!(toks.iter().any(|t| t.is("int")));
    }

    #[test]
    fn unicode_identifiers() {
        let toks = lex("int π = 3;");
        assert_eq!(toks[1].text.as_ref(), "π");
        assert!(toks[1].is_ident());
    }

    #[test]
    fn keywords_stay_idents_until_conversion() {
        let toks = lex("return");
        assert!(matches!(toks[0].kind, TokenKind::Ident));
        let mut diags = DiagSink::default();
        let conv = convert_pp_tokens(toks, &mut diags).unwrap();
        assert!(matches!(conv[0].kind, TokenKind::Keyword));
    }

    #[test]
    fn pp_number_conversion() {
        let cases: &[(&str, i64, NumType)] = &[
            ("0", 0, NumType::Int),
            ("42", 42, NumType::Int),
            ("0x1f", 31, NumType::Int),
            ("0b101", 5, NumType::Int),
            ("010", 8, NumType::Int),
            ("4294967295", 4294967295, NumType::Long),
            ("4294967295u", 4294967295, NumType::UInt),
            ("1ull", 1, NumType::ULong),
            ("1'000'000", 1_000_000, NumType::Int),
            ("0xffffffffffffffff", -1, NumType::ULong),
        ];
        for &(text, ival, ty) in cases {
            let n = convert_pp_number(text).unwrap_or_else(|| panic!("failed: {}", text));
            assert_eq!((n.ival, n.ty), (ival, ty), "case {}", text);
        }
    }

    #[test]
    fn float_conversion() {
        let n = convert_pp_number("1.5").unwrap();
        assert_eq!((n.fval, n.ty), (1.5, NumType::Double));
        let n = convert_pp_number("1e3f").unwrap();
        assert_eq!((n.fval, n.ty), (1000.0, NumType::Float));
        let n = convert_pp_number("0x1p4").unwrap();
        assert_eq!(n.fval, 16.0);
        let n = convert_pp_number("0x1.8p1").unwrap();
        assert_eq!(n.fval, 3.0);
        assert!(convert_pp_number("3abc").is_none());
    }

    #[test]
    fn adjacent_strings_concatenate() {
        let toks = lex(r#""foo" "bar""#);
        let mut diags = DiagSink::default();
        let conv = convert_pp_tokens(toks, &mut diags).unwrap();
        let TokenKind::Str(lit) = &conv[0].kind else { panic!() };
        assert_eq!(&*lit.bytes, b"foobar\0");
        assert!(matches!(conv[1].kind, TokenKind::Eof));
    }

    #[test]
    fn concat_mixed_prefix_widens() {
        let toks = lex(r#""a" u"b""#);
        let mut diags = DiagSink::default();
        let conv = convert_pp_tokens(toks, &mut diags).unwrap();
        let TokenKind::Str(lit) = &conv[0].kind else { panic!() };
        assert_eq!(lit.kind, StrKind::Utf16);
        assert_eq!(lit.len(), 3);
    }
}
