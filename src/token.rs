//! Token definitions and hide-sets
//!
//! Every token carries full provenance (file id, 1-based line and column,
//! beginning-of-line and leading-space flags) so that the preprocessor can
//! detect directives and restore whitespace, and diagnostics can point at
//! the exact source position even through macro expansion (`origin` links
//! back to the token a macro-produced token came from).

use std::rc::Rc;

use crate::source::FileId;

/// Element width of a string literal, chosen by its encoding prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrKind {
    /// `"..."` and `u8"..."`: one byte per element.
    Char,
    /// `u"..."`: UTF-16 elements.
    Utf16,
    /// `U"..."` and `L"..."`: UTF-32 elements.
    Utf32,
}

impl StrKind {
    pub fn width(self) -> usize {
        match self {
            StrKind::Char => 1,
            StrKind::Utf16 => 2,
            StrKind::Utf32 => 4,
        }
    }
}

/// Decoded string-literal payload. `raw` keeps the body as written
/// (without quotes or prefix) so adjacent-literal concatenation can
/// re-decode at a wider element type; `bytes` is the decoded contents
/// including the terminating NUL, `width()` bytes per element.
#[derive(Debug, Clone, PartialEq)]
pub struct StrLit {
    pub raw: Rc<str>,
    pub bytes: Rc<[u8]>,
    pub kind: StrKind,
}

impl StrLit {
    /// Number of elements including the terminating NUL.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.kind.width()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

/// The C type a numeric literal resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumType {
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    LDouble,
}

impl NumType {
    pub fn is_float(self) -> bool {
        matches!(self, NumType::Float | NumType::Double | NumType::LDouble)
    }
}

/// Converted numeric payload. `long double` is evaluated at `f64`
/// precision, the widest float the host model supports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumLit {
    pub ival: i64,
    pub fval: f64,
    pub ty: NumType,
}

/// Argument of a `#pragma pack` directive, forwarded to the parser as a
/// synthetic token in the preprocessed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackDirective {
    Push(Option<u32>),
    Pop,
    Set(Option<u32>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident,
    Punct,
    Keyword,
    Str(StrLit),
    Num(NumLit),
    /// Permissive preprocessing number; converted to `Num` after
    /// preprocessing.
    PpNum,
    PragmaPack(PackDirective),
    Eof,
}

/// Immutable set of macro names a token refuses to re-expand to.
///
/// Shared persistent list: `insert` conses a new head, so tokens cloned
/// during expansion share their tails. Sets stay tiny (bounded by macro
/// nesting depth), so linear union/intersection is fine.
#[derive(Debug, Clone, Default)]
pub struct Hideset {
    head: Option<Rc<HideNode>>,
}

#[derive(Debug)]
struct HideNode {
    name: Rc<str>,
    next: Option<Rc<HideNode>>,
}

impl Hideset {
    pub fn contains(&self, name: &str) -> bool {
        let mut cur = &self.head;
        while let Some(node) = cur {
            if &*node.name == name {
                return true;
            }
            cur = &node.next;
        }
        false
    }

    pub fn insert(&self, name: Rc<str>) -> Hideset {
        if self.contains(&name) {
            return self.clone();
        }
        Hideset {
            head: Some(Rc::new(HideNode {
                name,
                next: self.head.clone(),
            })),
        }
    }

    pub fn union(&self, other: &Hideset) -> Hideset {
        let mut out = self.clone();
        let mut cur = &other.head;
        while let Some(node) = cur {
            out = out.insert(node.name.clone());
            cur = &node.next;
        }
        out
    }

    pub fn intersect(&self, other: &Hideset) -> Hideset {
        let mut out = Hideset::default();
        let mut cur = &self.head;
        while let Some(node) = cur {
            if other.contains(&node.name) {
                out = out.insert(node.name.clone());
            }
            cur = &node.next;
        }
        out
    }
}

/// One lexical token.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Spelling as written (digraphs canonicalized).
    pub text: Rc<str>,
    pub file: FileId,
    /// Display filename; starts as the owning file's name and may be
    /// overridden by `#line`.
    pub filename: Rc<str>,
    /// Physical 1-based line; add `line_delta` for the displayed line.
    pub line: u32,
    pub col: u32,
    pub line_delta: i32,
    pub at_bol: bool,
    pub has_space: bool,
    pub hideset: Hideset,
    pub origin: Option<Rc<Token>>,
}

impl Token {
    pub fn eof(file: FileId, filename: Rc<str>, line: u32) -> Token {
        Token {
            kind: TokenKind::Eof,
            text: Rc::from(""),
            file,
            filename,
            line,
            col: 1,
            line_delta: 0,
            at_bol: true,
            has_space: false,
            hideset: Hideset::default(),
            origin: None,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    /// Spelling test for punctuators, keywords and identifiers.
    pub fn is(&self, s: &str) -> bool {
        matches!(
            self.kind,
            TokenKind::Punct | TokenKind::Keyword | TokenKind::Ident
        ) && &*self.text == s
    }

    pub fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Ident)
    }

    pub fn is_keyword(&self, s: &str) -> bool {
        matches!(self.kind, TokenKind::Keyword) && &*self.text == s
    }

    /// Line number as displayed in diagnostics (`#line`-adjusted).
    pub fn display_line(&self) -> u32 {
        let line = self.line as i64 + self.line_delta as i64;
        if line < 1 {
            1
        } else {
            line as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(set: &Hideset, candidates: &[&str]) -> Vec<&'static str> {
        let mut out = Vec::new();
        for &c in candidates {
            if set.contains(c) {
                out.push(match c {
                    "a" => "a",
                    "b" => "b",
                    "c" => "c",
                    _ => unreachable!(),
                });
            }
        }
        out
    }

    #[test]
    fn hideset_insert_and_contains() {
        let s = Hideset::default().insert(Rc::from("a")).insert(Rc::from("b"));
        assert!(s.contains("a"));
        assert!(s.contains("b"));
        assert!(!s.contains("c"));
    }

    #[test]
    fn hideset_insert_is_idempotent() {
        let s = Hideset::default().insert(Rc::from("a"));
        let t = s.insert(Rc::from("a"));
        assert!(t.contains("a"));
        assert_eq!(names(&t, &["a", "b", "c"]), vec!["a"]);
    }

    #[test]
    fn hideset_union_and_intersect() {
        let ab = Hideset::default().insert(Rc::from("a")).insert(Rc::from("b"));
        let bc = Hideset::default().insert(Rc::from("b")).insert(Rc::from("c"));
        let u = ab.union(&bc);
        assert_eq!(names(&u, &["a", "b", "c"]), vec!["a", "b", "c"]);
        let i = ab.intersect(&bc);
        assert_eq!(names(&i, &["a", "b", "c"]), vec!["b"]);
    }

    #[test]
    fn display_line_applies_delta() {
        let mut tok = Token::eof(0, Rc::from("t.c"), 10);
        tok.line_delta = 90;
        assert_eq!(tok.display_line(), 100);
        tok.line_delta = -100;
        assert_eq!(tok.display_line(), 1);
    }
}
