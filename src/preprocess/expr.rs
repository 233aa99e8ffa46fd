//! Constant-expression evaluation for `#if`/`#elif`
//!
//! The controlling expression is processed in three steps: `defined`
//! operators are resolved before macro expansion, the remaining tokens
//! are fully expanded, and the result is parsed by a recursive-descent
//! evaluator. Identifiers that survive expansion evaluate to 0, values
//! are 64-bit, and the unsigned interpretation is used as soon as either
//! operand is unsigned. The arithmetic itself is shared with the
//! parser's constant folder through [`crate::eval`].

use crate::diag::Fatal;
use crate::eval::{int_binary, int_neg, ArithError, BinOp};
use crate::lexer::convert_pp_number;
use crate::token::{Token, TokenKind};

use super::{macros, Preprocessor};

/// Evaluate the controlling expression of `#if`/`#elif` (or an `#embed`
/// `limit(...)` clause). Zero means false.
pub fn eval_if_expr(pp: &mut Preprocessor, line: Vec<Token>, ctx: &Token) -> Result<i64, Fatal> {
    let line = resolve_defined(pp, line, ctx)?;
    let line = macros::expand_all(pp, line)?;

    let mut ev = Evaluator {
        pp,
        toks: line,
        pos: 0,
        ctx,
        failed: false,
    };
    let val = ev.ternary()?;
    if !ev.failed && ev.pos < ev.toks.len() {
        let tok = ev.toks[ev.pos].clone();
        ev.pp
            .sess
            .error_tok(&tok, "extra tokens in preprocessor expression".to_string())?;
    }
    Ok(val.v)
}

/// Replace `defined X` and `defined(X)` with 1 or 0 before expansion.
fn resolve_defined(
    pp: &mut Preprocessor,
    line: Vec<Token>,
    ctx: &Token,
) -> Result<Vec<Token>, Fatal> {
    let mut out = Vec::with_capacity(line.len());
    let mut iter = line.into_iter().peekable();
    while let Some(tok) = iter.next() {
        if !(tok.is_ident() && &*tok.text == "defined") {
            out.push(tok);
            continue;
        }
        let parens = iter.peek().map(|t| t.is("(")).unwrap_or(false);
        if parens {
            iter.next();
        }
        let Some(name) = iter.next().filter(|t| t.is_ident()) else {
            pp.sess.error_tok(
                ctx,
                "macro name missing after 'defined'".to_string(),
            )?;
            continue;
        };
        if parens && !iter.next().map(|t| t.is(")")).unwrap_or(false) {
            pp.sess
                .error_tok(&name, "expected ')' after 'defined'".to_string())?;
        }
        let defined = pp.sess.macros.contains_key(&name.text);
        let mut num = tok.clone();
        num.kind = TokenKind::PpNum;
        num.text = std::rc::Rc::from(if defined { "1" } else { "0" });
        out.push(num);
    }
    Ok(out)
}

/// Value plus the signedness it carries through the expression.
#[derive(Clone, Copy)]
struct Val {
    v: i64,
    unsigned: bool,
}

impl Val {
    fn new(v: i64) -> Val {
        Val { v, unsigned: false }
    }
}

struct Evaluator<'a, 'b, 's> {
    pp: &'a mut Preprocessor<'s>,
    toks: Vec<Token>,
    pos: usize,
    ctx: &'b Token,
    failed: bool,
}

impl Evaluator<'_, '_, '_> {
    fn peek_is(&self, s: &str) -> bool {
        self.toks.get(self.pos).map(|t| t.is(s)).unwrap_or(false)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.peek_is(s) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn fail(&mut self, msg: String) -> Result<Val, Fatal> {
        if !self.failed {
            self.failed = true;
            let tok = self
                .toks
                .get(self.pos)
                .cloned()
                .unwrap_or_else(|| self.ctx.clone());
            self.pp.sess.error_tok(&tok, msg)?;
        }
        self.pos = self.toks.len();
        Ok(Val::new(0))
    }

    fn arith(&mut self, op: BinOp, lhs: Val, rhs: Val) -> Result<Val, Fatal> {
        let unsigned = lhs.unsigned || rhs.unsigned;
        match int_binary(op, lhs.v, rhs.v, unsigned) {
            Ok(v) => Ok(Val {
                v,
                unsigned: unsigned
                    && !matches!(
                        op,
                        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
                    ),
            }),
            Err(ArithError::DivByZero) => self.fail("division by zero in #if".to_string()),
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn ternary(&mut self) -> Result<Val, Fatal> {
        let cond = self.logor()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.ternary()?;
        if !self.eat(":") {
            return self.fail("expected ':' in conditional expression".to_string());
        }
        let els = self.ternary()?;
        Ok(if cond.v != 0 { then } else { els })
    }

    fn logor(&mut self) -> Result<Val, Fatal> {
        let mut lhs = self.logand()?;
        while self.eat("||") {
            let rhs = self.logand()?;
            lhs = Val::new(((lhs.v != 0) || (rhs.v != 0)) as i64);
        }
        Ok(lhs)
    }

    fn logand(&mut self) -> Result<Val, Fatal> {
        let mut lhs = self.bitor()?;
        while self.eat("&&") {
            let rhs = self.bitor()?;
            lhs = Val::new(((lhs.v != 0) && (rhs.v != 0)) as i64);
        }
        Ok(lhs)
    }

    fn bitor(&mut self) -> Result<Val, Fatal> {
        let mut lhs = self.bitxor()?;
        while self.eat("|") {
            let rhs = self.bitxor()?;
            lhs = self.arith(BinOp::Or, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn bitxor(&mut self) -> Result<Val, Fatal> {
        let mut lhs = self.bitand()?;
        while self.eat("^") {
            let rhs = self.bitand()?;
            lhs = self.arith(BinOp::Xor, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn bitand(&mut self) -> Result<Val, Fatal> {
        let mut lhs = self.equality()?;
        while self.eat("&") {
            let rhs = self.equality()?;
            lhs = self.arith(BinOp::And, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Val, Fatal> {
        let mut lhs = self.relational()?;
        loop {
            if self.eat("==") {
                let rhs = self.relational()?;
                lhs = self.arith(BinOp::Eq, lhs, rhs)?;
            } else if self.eat("!=") {
                let rhs = self.relational()?;
                lhs = self.arith(BinOp::Ne, lhs, rhs)?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn relational(&mut self) -> Result<Val, Fatal> {
        let mut lhs = self.shift()?;
        loop {
            if self.eat("<=") {
                let rhs = self.shift()?;
                lhs = self.arith(BinOp::Le, lhs, rhs)?;
            } else if self.eat(">=") {
                let rhs = self.shift()?;
                lhs = self.arith(BinOp::Ge, lhs, rhs)?;
            } else if self.eat("<") {
                let rhs = self.shift()?;
                lhs = self.arith(BinOp::Lt, lhs, rhs)?;
            } else if self.eat(">") {
                let rhs = self.shift()?;
                lhs = self.arith(BinOp::Gt, lhs, rhs)?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn shift(&mut self) -> Result<Val, Fatal> {
        let mut lhs = self.additive()?;
        loop {
            if self.eat("<<") {
                let rhs = self.additive()?;
                lhs = self.arith(BinOp::Shl, lhs, rhs)?;
            } else if self.eat(">>") {
                let rhs = self.additive()?;
                lhs = self.arith(BinOp::Shr, lhs, rhs)?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn additive(&mut self) -> Result<Val, Fatal> {
        let mut lhs = self.multiplicative()?;
        loop {
            if self.eat("+") {
                let rhs = self.multiplicative()?;
                lhs = self.arith(BinOp::Add, lhs, rhs)?;
            } else if self.eat("-") {
                let rhs = self.multiplicative()?;
                lhs = self.arith(BinOp::Sub, lhs, rhs)?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn multiplicative(&mut self) -> Result<Val, Fatal> {
        let mut lhs = self.unary()?;
        loop {
            if self.eat("*") {
                let rhs = self.unary()?;
                lhs = self.arith(BinOp::Mul, lhs, rhs)?;
            } else if self.eat("/") {
                let rhs = self.unary()?;
                lhs = self.arith(BinOp::Div, lhs, rhs)?;
            } else if self.eat("%") {
                let rhs = self.unary()?;
                lhs = self.arith(BinOp::Rem, lhs, rhs)?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary(&mut self) -> Result<Val, Fatal> {
        if self.eat("+") {
            return self.unary();
        }
        if self.eat("-") {
            let v = self.unary()?;
            return match int_neg(v.v, v.unsigned) {
                Ok(n) => Ok(Val {
                    v: n,
                    unsigned: v.unsigned,
                }),
                Err(e) => self.fail(e.to_string()),
            };
        }
        if self.eat("!") {
            let v = self.unary()?;
            return Ok(Val::new((v.v == 0) as i64));
        }
        if self.eat("~") {
            let v = self.unary()?;
            return Ok(Val {
                v: !v.v,
                unsigned: v.unsigned,
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Val, Fatal> {
        if self.eat("(") {
            let v = self.ternary()?;
            if !self.eat(")") {
                return self.fail("expected ')'".to_string());
            }
            return Ok(v);
        }

        let Some(tok) = self.toks.get(self.pos).cloned() else {
            return self.fail("expected an expression".to_string());
        };
        match &tok.kind {
            TokenKind::PpNum => {
                self.pos += 1;
                match convert_pp_number(&tok.text) {
                    Some(n) if !n.ty.is_float() => Ok(Val {
                        v: n.ival,
                        unsigned: matches!(
                            n.ty,
                            crate::token::NumType::UInt | crate::token::NumType::ULong
                        ),
                    }),
                    Some(_) => {
                        self.pos -= 1;
                        self.fail("floating constant in preprocessor expression".to_string())
                    }
                    None => {
                        self.pos -= 1;
                        self.fail(format!("invalid numeric constant '{}'", tok.text))
                    }
                }
            }
            TokenKind::Num(n) => {
                // Character constants arrive pre-converted.
                self.pos += 1;
                Ok(Val::new(n.ival))
            }
            TokenKind::Ident => {
                // Undefined identifiers evaluate to 0.
                self.pos += 1;
                Ok(Val::new(0))
            }
            _ => self.fail(format!("unexpected token '{}' in #if", tok.text)),
        }
    }
}
