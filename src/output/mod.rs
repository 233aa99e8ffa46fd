//! Output writers: token listings, preprocessed source, AST, JSON
//!
//! All writers take a `&mut dyn Write` so the driver can point them at
//! stdout or a file without the library caring.

mod ast_print;
mod json;

pub use ast_print::print_ast;
pub use json::output_json;

use std::io::{self, Write};

use crate::token::{Token, TokenKind};

/// Debug listing: one token per line with provenance and kind.
pub fn print_tokens(w: &mut dyn Write, toks: &[Token]) -> io::Result<()> {
    for tok in toks {
        if tok.is_eof() {
            break;
        }
        let kind = match &tok.kind {
            TokenKind::Ident => "ident",
            TokenKind::Punct => "punct",
            TokenKind::Keyword => "keyword",
            TokenKind::Str(_) => "string",
            TokenKind::Num(_) => "number",
            TokenKind::PpNum => "pp-number",
            TokenKind::PragmaPack(_) => "pragma-pack",
            TokenKind::Eof => "eof",
        };
        writeln!(
            w,
            "{}:{}:{}: {:<10} {}",
            tok.filename,
            tok.display_line(),
            tok.col,
            kind,
            tok.text
        )?;
    }
    Ok(())
}

/// Re-emit tokens as compilable source: a newline before a token at the
/// beginning of a line, a space where the source had whitespace, nothing
/// otherwise.
pub fn output_preprocessed(w: &mut dyn Write, toks: &[Token]) -> io::Result<()> {
    let mut first = true;
    for tok in toks {
        if tok.is_eof() {
            break;
        }
        if matches!(tok.kind, TokenKind::PragmaPack(_)) {
            continue;
        }
        if !first && tok.at_bol {
            writeln!(w)?;
        }
        if tok.has_space && !tok.at_bol && !first {
            write!(w, " ")?;
        }
        write!(w, "{}", tok.text)?;
        first = false;
    }
    writeln!(w)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    #[test]
    fn preprocessed_output_restores_whitespace() {
        let mut sess = Session::new();
        let toks = sess
            .preprocess_source("t.c", "int  x;\nint y ;\n")
            .unwrap();
        let mut out = Vec::new();
        output_preprocessed(&mut out, &toks).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "int x;\nint y ;\n");
    }

    #[test]
    fn macro_expansion_keeps_line_structure() {
        let mut sess = Session::new();
        let toks = sess
            .preprocess_source("t.c", "#define X 42\nint a = X;\n")
            .unwrap();
        let mut out = Vec::new();
        output_preprocessed(&mut out, &toks).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "int a = 42;\n");
    }
}
