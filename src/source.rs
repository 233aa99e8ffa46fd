//! Source files: loading, newline canonicalization, line splicing
//!
//! Each input (file, stdin, or in-memory text) becomes an immutable
//! [`SourceFile`] with a monotonically assigned id. The stored contents
//! have already had `\r\n`/`\r` canonicalized to `\n` and backslash-newline
//! splices removed; splicing preserves the total newline count so line
//! numbers computed from the transformed buffer match the on-disk file.

use std::fs;
use std::io::{self, Read};
use std::rc::Rc;

/// Index into the session's file table.
pub type FileId = u32;

/// An immutable source buffer plus its `#line`-override state.
#[derive(Debug)]
pub struct SourceFile {
    pub name: Rc<str>,
    pub id: FileId,
    pub contents: Rc<[u8]>,
}

impl SourceFile {
    pub fn new(name: &str, id: FileId, raw: &[u8]) -> SourceFile {
        let contents = splice_lines(&canonicalize_newlines(raw));
        SourceFile {
            name: Rc::from(name),
            id,
            contents: Rc::from(contents),
        }
    }
}

/// Read a file, or stdin when `path` is `-`.
pub fn read_input(path: &str) -> io::Result<Vec<u8>> {
    if path == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        fs::read(path)
    }
}

fn canonicalize_newlines(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\r' {
            out.push(b'\n');
            i += if raw.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

/// Remove backslash-newline pairs. Each removed newline is re-emitted
/// after the next hard newline, keeping every subsequent line number
/// identical to the untransformed file.
fn splice_lines(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut pending = 0usize;
    let mut i = 0;
    while i < src.len() {
        if src[i] == b'\\' && src.get(i + 1) == Some(&b'\n') {
            pending += 1;
            i += 2;
        } else if src[i] == b'\n' {
            out.push(b'\n');
            for _ in 0..pending {
                out.push(b'\n');
            }
            pending = 0;
            i += 1;
        } else {
            out.push(src[i]);
            i += 1;
        }
    }
    // A splice on the final line with no trailing newline still owes its
    // deferred newlines.
    for _ in 0..pending {
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(bytes: &[u8]) -> usize {
        bytes.iter().filter(|&&b| b == b'\n').count()
    }

    #[test]
    fn crlf_becomes_lf() {
        let f = SourceFile::new("t.c", 0, b"a\r\nb\rc\n");
        assert_eq!(&*f.contents, b"a\nb\nc\n");
    }

    #[test]
    fn splice_joins_lines() {
        let f = SourceFile::new("t.c", 0, b"#define X \\\n 1\nint y;\n");
        let text = String::from_utf8(f.contents.to_vec()).unwrap();
        assert!(text.contains("#define X  1"));
    }

    #[test]
    fn splice_preserves_line_count() {
        let raw = b"a\\\nb\\\nc\nrest\n";
        let f = SourceFile::new("t.c", 0, raw);
        assert_eq!(lines(raw), lines(&f.contents));
    }

    #[test]
    fn trailing_splice_without_newline() {
        let f = SourceFile::new("t.c", 0, b"x\\\ny");
        assert_eq!(&*f.contents, b"xy\n");
    }
}
