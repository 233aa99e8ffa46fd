//! Statement parsing
//!
//! Control flow lowers to a small node set: `while` is a `For` without
//! init/inc, `case` values fold at parse time (with GNU range support),
//! and every loop/switch carries freshly generated break/continue labels
//! so consumers never chase parser state.

use std::rc::Rc;

use crate::ast::{CaseRange, Node, NodeKind};
use crate::ctype::{Type, TypeKind};
use crate::diag::Fatal;
use crate::token::TokenKind;

use super::decl::VarAttr;
use super::{Parser, SwitchCtx};

impl<'s, 't> Parser<'s, 't> {
    /// compound-stmt = "{" (declaration | statement)* "}"
    pub(crate) fn compound_stmt(&mut self) -> Result<Node, Fatal> {
        let tok = self.expect("{")?;
        self.enter_scope();

        let mut stmts: Vec<Node> = Vec::new();
        while !self.at("}") && !self.peek().is_eof() {
            if self.handle_pragma_pack() {
                continue;
            }
            if self.at("_Static_assert") || self.at("static_assert") {
                self.static_assert()?;
                continue;
            }

            // A typename starts a declaration unless it is a label
            // (`T:` where T shadows a typedef).
            if self.is_typename(self.peek()) && !self.peek_at(1).is(":") {
                let mut attr = VarAttr::default();
                let basety = self.declspec(Some(&mut attr))?;
                if attr.is_typedef {
                    self.parse_typedef(basety)?;
                    continue;
                }
                stmts.push(self.declaration(basety, &attr)?);
                continue;
            }

            stmts.push(self.stmt()?);
        }
        self.expect("}")?;
        self.leave_scope();
        Ok(Node::new(NodeKind::Block(stmts), Type::void(), tok))
    }

    fn stmt(&mut self) -> Result<Node, Fatal> {
        let tok = self.peek().clone();

        if tok.is_keyword("return") {
            self.advance();
            if self.eat(";") {
                return Ok(Node::new(NodeKind::Return(None), Type::void(), tok));
            }
            let value = self.expr()?;
            let value = self.decay(value);
            let ret_ty = self
                .current_fn
                .as_ref()
                .and_then(|fun| fun.borrow().ty.func().map(|f| f.return_ty.clone()));
            let value = match ret_ty {
                Some(ret_ty)
                    if !ret_ty.is_void()
                        && !matches!(ret_ty.kind, TypeKind::Struct(_) | TypeKind::Union(_)) =>
                {
                    self.cast_to(value, ret_ty)
                }
                _ => value,
            };
            self.expect(";")?;
            return Ok(Node::new(
                NodeKind::Return(Some(Box::new(value))),
                Type::void(),
                tok,
            ));
        }

        if tok.is_keyword("if") {
            self.advance();
            self.expect("(")?;
            let cond = self.expr()?;
            let cond = self.decay(cond);
            self.expect(")")?;
            let then = self.stmt()?;
            let els = if self.eat("else") {
                Some(Box::new(self.stmt()?))
            } else {
                None
            };
            return Ok(Node::new(
                NodeKind::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    els,
                },
                Type::void(),
                tok,
            ));
        }

        if tok.is_keyword("switch") {
            self.advance();
            self.expect("(")?;
            let cond = self.expr()?;
            let cond = self.decay(cond);
            if !cond.ty.is_integer() && !cond.ty.is_error() {
                self.error_tok(&cond.tok, "switch quantity is not an integer".to_string())?;
            }

            let brk = self.sess.new_unique_name();
            let saved_brk = self.brk_label.replace(brk.clone());
            let saved_switch = self.cur_switch.replace(SwitchCtx {
                cases: Vec::new(),
                default_label: None,
                cond_ty: cond.ty.clone(),
            });

            let body = self.stmt()?;

            let ctx = self.cur_switch.take().unwrap_or(SwitchCtx {
                cases: Vec::new(),
                default_label: None,
                cond_ty: Type::int(),
            });
            self.cur_switch = saved_switch;
            self.brk_label = saved_brk;

            return Ok(Node::new(
                NodeKind::Switch {
                    cond: Box::new(cond),
                    body: Box::new(body),
                    cases: ctx.cases,
                    default_label: ctx.default_label,
                    brk_label: brk,
                },
                Type::void(),
                tok,
            ));
        }

        if tok.is_keyword("case") {
            self.advance();
            let begin = self.const_expr()?;
            // [GNU] case ranges: `case lo ... hi:`.
            let end = if self.eat("...") {
                self.const_expr()?
            } else {
                begin
            };
            self.expect(":")?;

            if end < begin {
                self.error_tok(&tok, "empty case range".to_string())?;
            }
            let label = self.sess.new_unique_name();
            let duplicate = self
                .cur_switch
                .as_ref()
                .map(|ctx| ctx.cases.iter().any(|c| begin <= c.end && c.begin <= end));
            match duplicate {
                None => {
                    self.error_tok(&tok, "case label not within a switch statement".to_string())?;
                }
                Some(true) => {
                    self.error_tok(&tok, format!("duplicate case value {}", begin))?;
                }
                Some(false) => {
                    if let Some(ctx) = &mut self.cur_switch {
                        ctx.cases.push(CaseRange {
                            begin,
                            end,
                            label: label.clone(),
                        });
                    }
                }
            }

            let stmt = self.stmt()?;
            return Ok(Node::new(
                NodeKind::Case {
                    begin,
                    end,
                    label,
                    stmt: Box::new(stmt),
                },
                Type::void(),
                tok,
            ));
        }

        if tok.is_keyword("default") {
            self.advance();
            self.expect(":")?;
            let label = self.sess.new_unique_name();
            let has_default = self.cur_switch.as_ref().map(|ctx| ctx.default_label.is_some());
            match has_default {
                None => {
                    self.error_tok(
                        &tok,
                        "'default' label not within a switch statement".to_string(),
                    )?;
                }
                Some(true) => {
                    self.error_tok(&tok, "multiple default labels in one switch".to_string())?;
                }
                Some(false) => {
                    if let Some(ctx) = &mut self.cur_switch {
                        ctx.default_label = Some(label.clone());
                    }
                }
            }
            let stmt = self.stmt()?;
            return Ok(Node::new(
                NodeKind::Case {
                    begin: 0,
                    end: -1,
                    label,
                    stmt: Box::new(stmt),
                },
                Type::void(),
                tok,
            ));
        }

        if tok.is_keyword("for") {
            self.advance();
            self.expect("(")?;
            self.enter_scope();

            let init = if self.at(";") {
                self.advance();
                None
            } else if self.is_typename(self.peek()) {
                let mut attr = VarAttr::default();
                let basety = self.declspec(Some(&mut attr))?;
                Some(Box::new(self.declaration(basety, &attr)?))
            } else {
                let e = self.expr()?;
                self.expect(";")?;
                Some(Box::new(Node::new(
                    NodeKind::ExprStmt(Box::new(e)),
                    Type::void(),
                    tok.clone(),
                )))
            };

            let cond = if self.at(";") {
                None
            } else {
                let c = self.expr()?;
                Some(Box::new(self.decay(c)))
            };
            self.expect(";")?;

            let inc = if self.at(")") {
                None
            } else {
                Some(Box::new(self.expr()?))
            };
            self.expect(")")?;

            let (brk, cont) = self.push_loop_labels();
            let body = self.stmt()?;
            let (brk, cont) = self.pop_loop_labels(brk, cont);
            self.leave_scope();

            return Ok(Node::new(
                NodeKind::For {
                    init,
                    cond,
                    inc,
                    body: Box::new(body),
                    brk_label: brk,
                    cont_label: cont,
                },
                Type::void(),
                tok,
            ));
        }

        if tok.is_keyword("while") {
            self.advance();
            self.expect("(")?;
            let cond = self.expr()?;
            let cond = self.decay(cond);
            self.expect(")")?;

            let (brk, cont) = self.push_loop_labels();
            let body = self.stmt()?;
            let (brk, cont) = self.pop_loop_labels(brk, cont);

            return Ok(Node::new(
                NodeKind::For {
                    init: None,
                    cond: Some(Box::new(cond)),
                    inc: None,
                    body: Box::new(body),
                    brk_label: brk,
                    cont_label: cont,
                },
                Type::void(),
                tok,
            ));
        }

        if tok.is_keyword("do") {
            self.advance();
            let (brk, cont) = self.push_loop_labels();
            let body = self.stmt()?;
            let (brk, cont) = self.pop_loop_labels(brk, cont);

            self.expect("while")?;
            self.expect("(")?;
            let cond = self.expr()?;
            let cond = self.decay(cond);
            self.expect(")")?;
            self.expect(";")?;

            return Ok(Node::new(
                NodeKind::Do {
                    body: Box::new(body),
                    cond: Box::new(cond),
                    brk_label: brk,
                    cont_label: cont,
                },
                Type::void(),
                tok,
            ));
        }

        if tok.is_keyword("goto") {
            self.advance();
            // [GNU] computed goto: `goto *expr;`.
            if self.eat("*") {
                let target = self.expr()?;
                self.expect(";")?;
                return Ok(Node::new(
                    NodeKind::GotoExpr(Box::new(target)),
                    Type::void(),
                    tok,
                ));
            }
            let name_tok = self.peek().clone();
            if !name_tok.is_ident() {
                self.error_tok(&name_tok, "expected a label name".to_string())?;
                self.sync_stmt();
                return Ok(Node::null(tok));
            }
            self.advance();
            self.expect(";")?;
            return Ok(Node::new(
                NodeKind::Goto {
                    label: name_tok.text.clone(),
                    unique_label: Rc::from(""),
                },
                Type::void(),
                tok,
            ));
        }

        if tok.is_keyword("break") || tok.is_keyword("continue") {
            self.advance();
            self.expect(";")?;
            let target = if tok.is("break") {
                self.brk_label.clone()
            } else {
                self.cont_label.clone()
            };
            let Some(target) = target else {
                self.error_tok(
                    &tok,
                    format!("stray '{}' statement", tok.text),
                )?;
                return Ok(Node::null(tok));
            };
            return Ok(Node::new(
                NodeKind::Goto {
                    label: target.clone(),
                    unique_label: target,
                },
                Type::void(),
                tok,
            ));
        }

        // Labeled statement: `ident :`.
        if tok.is_ident() && self.peek_at(1).is(":") {
            self.advance();
            self.advance();
            let unique = self.sess.new_unique_name();
            if self.labels.iter().any(|(n, _)| *n == tok.text) {
                self.error_tok(&tok, format!("duplicate label '{}'", tok.text))?;
            }
            self.labels.push((tok.text.clone(), unique.clone()));
            let stmt = self.stmt()?;
            return Ok(Node::new(
                NodeKind::Label {
                    name: tok.text.clone(),
                    unique_label: unique,
                    stmt: Box::new(stmt),
                },
                Type::void(),
                tok,
            ));
        }

        if tok.is("{") {
            return self.compound_stmt();
        }

        if tok.is_keyword("asm") || tok.is_keyword("__asm") || tok.is_keyword("__asm__") {
            let node = self.asm_stmt()?;
            self.expect(";")?;
            return Ok(node);
        }

        if self.eat(";") {
            return Ok(Node::new(NodeKind::Block(Vec::new()), Type::void(), tok));
        }

        // Expression statement.
        let expr = self.expr()?;
        if expr.ty.is_error() && !self.at(";") {
            self.sync_stmt();
            return Ok(Node::null(tok));
        }
        self.expect(";")?;
        Ok(Node::new(
            NodeKind::ExprStmt(Box::new(expr)),
            Type::void(),
            tok,
        ))
    }

    /// `asm [volatile] ( "template" ...operands... )`: the template is
    /// captured as an opaque string, operands are skipped.
    pub(crate) fn asm_stmt(&mut self) -> Result<Node, Fatal> {
        let tok = self.advance();
        while self.eat("volatile") || self.eat("inline") {}
        self.expect("(")?;

        let mut template = String::new();
        if let TokenKind::Str(lit) = &self.peek().kind {
            template = lit.raw.to_string();
            self.advance();
        } else {
            let t = self.peek().clone();
            self.error_tok(&t, "expected a string literal in asm".to_string())?;
        }

        let mut depth = 0usize;
        while !self.peek().is_eof() {
            if self.at("(") {
                depth += 1;
            } else if self.at(")") {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            self.advance();
        }
        self.expect(")")?;

        Ok(Node::new(
            NodeKind::Asm(Rc::from(template)),
            Type::void(),
            tok,
        ))
    }

    fn push_loop_labels(&mut self) -> (Option<Rc<str>>, Option<Rc<str>>) {
        let brk = self.sess.new_unique_name();
        let cont = self.sess.new_unique_name();
        (
            self.brk_label.replace(brk),
            self.cont_label.replace(cont),
        )
    }

    /// Restore the outer labels, returning this loop's own.
    fn pop_loop_labels(
        &mut self,
        saved_brk: Option<Rc<str>>,
        saved_cont: Option<Rc<str>>,
    ) -> (Rc<str>, Rc<str>) {
        let brk = self.brk_label.take().unwrap_or_else(|| Rc::from(""));
        let cont = self.cont_label.take().unwrap_or_else(|| Rc::from(""));
        self.brk_label = saved_brk;
        self.cont_label = saved_cont;
        (brk, cont)
    }
}
