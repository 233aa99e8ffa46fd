//! Expression parsing with type inference
//!
//! Every production returns a fully typed [`Node`]; implicit conversions
//! (usual arithmetic conversions, array and function decay) are inserted
//! as explicit `Cast` nodes at parse time, so no AST consumer has to
//! re-derive them. Compound assignment and `++`/`--` are desugared with
//! a hidden pointer temporary so the left operand is evaluated once.
//!
//! The constant evaluator (`const_expr`/`eval`/`eval2`) lives here too:
//! it folds array sizes, enum values, case labels, `_Static_assert` and
//! global initializers, sharing its arithmetic core with the
//! preprocessor's `#if` engine via [`crate::eval`].

use std::rc::Rc;

use crate::ast::{Node, NodeKind, Obj, ObjRef};
use crate::ctype::{array_of, func_type, pointer_to, FuncParam, Member, Type, TypeKind};
use crate::diag::Fatal;
use crate::eval::{cast_int, int_binary, int_neg, BinOp};
use crate::token::{StrKind, Token, TokenKind};

use super::{BlockCtx, Parser, VarScope};

/// Failure of pure constant evaluation; converted to a diagnostic (or
/// swallowed, for VLA detection) by the caller.
pub(crate) struct EvalErr {
    pub tok: Token,
    pub msg: String,
}

impl<'s, 't> Parser<'s, 't> {
    // ----- grammar -----

    /// expr = assign ("," expr)*
    pub(crate) fn expr(&mut self) -> Result<Node, Fatal> {
        let node = self.assign()?;
        if self.at(",") {
            let tok = self.advance();
            let rhs = self.expr()?;
            let ty = rhs.ty.clone();
            return Ok(Node::new(
                NodeKind::Comma(Box::new(node), Box::new(rhs)),
                ty,
                tok,
            ));
        }
        Ok(node)
    }

    /// assign = conditional (assign-op assign)?
    pub(crate) fn assign(&mut self) -> Result<Node, Fatal> {
        let lhs = self.conditional()?;

        if self.at("=") {
            let tok = self.advance();
            let rhs = self.assign()?;
            return self.new_assign(lhs, rhs, tok);
        }

        macro_rules! compound {
            ($spelling:expr, $build:ident) => {
                if self.at($spelling) {
                    let tok = self.advance();
                    let rhs = self.assign()?;
                    return self.compound_assign(lhs, rhs, tok, Self::$build);
                }
            };
        }
        compound!("+=", new_add);
        compound!("-=", new_sub);
        compound!("*=", new_mul);
        compound!("/=", new_div);
        compound!("%=", new_mod);
        compound!("&=", new_bitand);
        compound!("|=", new_bitor);
        compound!("^=", new_bitxor);
        compound!("<<=", new_shl);
        compound!(">>=", new_shr);

        Ok(lhs)
    }

    /// conditional = logor ("?" expr ":" conditional)?
    pub(crate) fn conditional(&mut self) -> Result<Node, Fatal> {
        let cond = self.logor()?;
        if !self.at("?") {
            return Ok(cond);
        }
        let tok = self.advance();

        // [GNU] `a ?: b` reuses the condition as the then-value.
        if self.at(":") {
            self.advance();
            let els = self.conditional()?;
            let then = cond.clone();
            return self.finish_cond(cond, then, els, tok);
        }

        let then = self.expr()?;
        self.expect(":")?;
        let els = self.conditional()?;
        self.finish_cond(cond, then, els, tok)
    }

    fn finish_cond(&mut self, cond: Node, then: Node, els: Node, tok: Token) -> Result<Node, Fatal> {
        let then = self.decay(then);
        let els = self.decay(els);
        let ty = if then.ty.is_void() || els.ty.is_void() {
            Type::void()
        } else if !then.ty.is_numeric() || !els.ty.is_numeric() {
            // Pointer or aggregate result: take the then-side's type.
            then.ty.clone()
        } else {
            self.sess.tags.common_type(&then.ty, &els.ty)
        };
        let (then, els) = if ty.is_numeric() {
            (self.cast_to(then, ty.clone()), self.cast_to(els, ty.clone()))
        } else {
            (then, els)
        };
        Ok(Node::new(
            NodeKind::Cond {
                cond: Box::new(cond),
                then: Box::new(then),
                els: Box::new(els),
            },
            ty,
            tok,
        ))
    }

    fn logor(&mut self) -> Result<Node, Fatal> {
        let mut node = self.logand()?;
        while self.at("||") {
            let tok = self.advance();
            let rhs = self.logand()?;
            node = Node::new(
                NodeKind::LogOr(Box::new(self.decay(node)), Box::new(self.decay(rhs))),
                Type::int(),
                tok,
            );
        }
        Ok(node)
    }

    fn logand(&mut self) -> Result<Node, Fatal> {
        let mut node = self.bitor()?;
        while self.at("&&") {
            let tok = self.advance();
            let rhs = self.bitor()?;
            node = Node::new(
                NodeKind::LogAnd(Box::new(self.decay(node)), Box::new(self.decay(rhs))),
                Type::int(),
                tok,
            );
        }
        Ok(node)
    }

    fn bitor(&mut self) -> Result<Node, Fatal> {
        let mut node = self.bitxor()?;
        while self.at("|") {
            let tok = self.advance();
            let rhs = self.bitxor()?;
            node = self.new_bitor(node, rhs, tok)?;
        }
        Ok(node)
    }

    fn bitxor(&mut self) -> Result<Node, Fatal> {
        let mut node = self.bitand()?;
        while self.at("^") {
            let tok = self.advance();
            let rhs = self.bitand()?;
            node = self.new_bitxor(node, rhs, tok)?;
        }
        Ok(node)
    }

    fn bitand(&mut self) -> Result<Node, Fatal> {
        let mut node = self.equality()?;
        while self.at("&") {
            let tok = self.advance();
            let rhs = self.equality()?;
            node = self.new_bitand(node, rhs, tok)?;
        }
        Ok(node)
    }

    fn equality(&mut self) -> Result<Node, Fatal> {
        let mut node = self.relational()?;
        loop {
            if self.at("==") {
                let tok = self.advance();
                let rhs = self.relational()?;
                node = self.new_comparison(node, rhs, tok, NodeKind::Eq)?;
            } else if self.at("!=") {
                let tok = self.advance();
                let rhs = self.relational()?;
                node = self.new_comparison(node, rhs, tok, NodeKind::Ne)?;
            } else {
                return Ok(node);
            }
        }
    }

    fn relational(&mut self) -> Result<Node, Fatal> {
        let mut node = self.shift()?;
        loop {
            if self.at("<") {
                let tok = self.advance();
                let rhs = self.shift()?;
                node = self.new_comparison(node, rhs, tok, NodeKind::Lt)?;
            } else if self.at("<=") {
                let tok = self.advance();
                let rhs = self.shift()?;
                node = self.new_comparison(node, rhs, tok, NodeKind::Le)?;
            } else if self.at(">") {
                let tok = self.advance();
                let rhs = self.shift()?;
                // a > b is b < a with the operands swapped in place.
                node = self.new_comparison(rhs, node, tok, NodeKind::Lt)?;
            } else if self.at(">=") {
                let tok = self.advance();
                let rhs = self.shift()?;
                node = self.new_comparison(rhs, node, tok, NodeKind::Le)?;
            } else {
                return Ok(node);
            }
        }
    }

    fn shift(&mut self) -> Result<Node, Fatal> {
        let mut node = self.add_expr()?;
        loop {
            if self.at("<<") {
                let tok = self.advance();
                let rhs = self.add_expr()?;
                node = self.new_shl(node, rhs, tok)?;
            } else if self.at(">>") {
                let tok = self.advance();
                let rhs = self.add_expr()?;
                node = self.new_shr(node, rhs, tok)?;
            } else {
                return Ok(node);
            }
        }
    }

    fn add_expr(&mut self) -> Result<Node, Fatal> {
        let mut node = self.mul_expr()?;
        loop {
            if self.at("+") {
                let tok = self.advance();
                let rhs = self.mul_expr()?;
                node = self.new_add(node, rhs, tok)?;
            } else if self.at("-") {
                let tok = self.advance();
                let rhs = self.mul_expr()?;
                node = self.new_sub(node, rhs, tok)?;
            } else {
                return Ok(node);
            }
        }
    }

    fn mul_expr(&mut self) -> Result<Node, Fatal> {
        let mut node = self.cast_expr()?;
        loop {
            if self.at("*") {
                let tok = self.advance();
                let rhs = self.cast_expr()?;
                node = self.new_mul(node, rhs, tok)?;
            } else if self.at("/") {
                let tok = self.advance();
                let rhs = self.cast_expr()?;
                node = self.new_div(node, rhs, tok)?;
            } else if self.at("%") {
                let tok = self.advance();
                let rhs = self.cast_expr()?;
                node = self.new_mod(node, rhs, tok)?;
            } else {
                return Ok(node);
            }
        }
    }

    /// cast = "(" type-name ")" cast | "(" type-name ")" "{" ... | unary
    pub(crate) fn cast_expr(&mut self) -> Result<Node, Fatal> {
        if self.at("(") && self.is_typename(self.peek_at(1)) {
            let tok = self.peek().clone();
            self.advance();
            let ty = self.typename()?;
            self.expect(")")?;

            // Compound literal `(T){...}` is a postfix expression.
            if self.at("{") {
                let node = self.compound_literal(ty, tok)?;
                return self.postfix_suffixes(node);
            }

            let operand = self.cast_expr()?;
            let operand = self.decay(operand);
            return Ok(self.cast_to(operand, ty));
        }
        self.unary()
    }

    fn compound_literal(&mut self, ty: Type, tok: Token) -> Result<Node, Fatal> {
        if self.current_fn.is_none() {
            let var = self.new_anon_gvar(ty);
            self.gvar_initializer(&var)?;
            return Ok(Node::var(var, tok));
        }
        let var = self.new_lvar(Rc::from(""), ty);
        let init = self.lvar_initializer(&var)?;
        let var_node = Node::var(var, tok.clone());
        let ty = var_node.ty.clone();
        Ok(Node::new(
            NodeKind::Comma(Box::new(init), Box::new(var_node)),
            ty,
            tok,
        ))
    }

    /// unary = ("+" | "-" | "*" | "&" | "!" | "~") cast
    ///       | ("++" | "--") unary
    ///       | "&&" ident (label as value)
    ///       | "sizeof" / "_Alignof"
    ///       | "^" block-literal
    ///       | postfix
    fn unary(&mut self) -> Result<Node, Fatal> {
        if self.eat("+") {
            let node = self.cast_expr()?;
            return Ok(self.promote(node));
        }
        if self.at("-") {
            let tok = self.advance();
            let node = self.cast_expr()?;
            let node = self.promote(node);
            let ty = node.ty.clone();
            return Ok(Node::new(NodeKind::Neg(Box::new(node)), ty, tok));
        }
        if self.at("&") {
            let tok = self.advance();
            let node = self.cast_expr()?;
            let ty = match &node.ty.kind {
                TypeKind::Array { base, .. } => pointer_to((**base).clone()),
                _ => pointer_to(node.ty.clone()),
            };
            return Ok(Node::new(NodeKind::Addr(Box::new(node)), ty, tok));
        }
        if self.at("*") {
            let tok = self.advance();
            let node = self.cast_expr()?;
            return self.new_deref(node, tok);
        }
        if self.at("!") {
            let tok = self.advance();
            let node = self.cast_expr()?;
            let node = self.decay(node);
            return Ok(Node::new(NodeKind::Not(Box::new(node)), Type::int(), tok));
        }
        if self.at("~") {
            let tok = self.advance();
            let node = self.cast_expr()?;
            let node = self.promote(node);
            let ty = node.ty.clone();
            return Ok(Node::new(NodeKind::BitNot(Box::new(node)), ty, tok));
        }
        if self.at("++") {
            let tok = self.advance();
            let operand = self.unary()?;
            let one = Node::num(1, Type::int(), tok.clone());
            return self.compound_assign(operand, one, tok, Self::new_add);
        }
        if self.at("--") {
            let tok = self.advance();
            let operand = self.unary()?;
            let one = Node::num(1, Type::int(), tok.clone());
            return self.compound_assign(operand, one, tok, Self::new_sub);
        }

        // [GNU] label as a value: &&label, resolved with the gotos.
        if self.at("&&") {
            let tok = self.advance();
            let name_tok = self.peek().clone();
            if !name_tok.is_ident() {
                self.error_tok(&name_tok, "expected a label name after '&&'".to_string())?;
                return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
            }
            self.advance();
            return Ok(Node::new(
                NodeKind::LabelVal {
                    label: name_tok.text.clone(),
                    unique_label: Rc::from(""),
                },
                pointer_to(Type::void()),
                tok,
            ));
        }

        if self.at("sizeof") {
            let tok = self.advance();
            if self.at("(") && self.is_typename(self.peek_at(1)) {
                let mark = self.mark();
                self.advance();
                let ty = self.typename()?;
                self.expect(")")?;
                // `sizeof (T){...}` is sizeof a compound literal.
                if self.at("{") {
                    self.reset(mark);
                    let node = self.cast_expr()?;
                    let ty = node.ty.clone();
                    return self.sizeof_type(&ty, tok);
                }
                return self.sizeof_type(&ty, tok);
            }
            let node = self.unary()?;
            let ty = node.ty.clone();
            return self.sizeof_type(&ty, tok);
        }

        if self.at("_Alignof") || self.at("alignof") {
            let tok = self.advance();
            let ty = if self.at("(") && self.is_typename(self.peek_at(1)) {
                self.advance();
                let ty = self.typename()?;
                self.expect(")")?;
                ty
            } else {
                self.unary()?.ty
            };
            let align = self.sess.tags.align_of(&ty);
            return Ok(Node::num(align, Type::ulong(), tok));
        }

        if self.at("^") {
            return self.block_literal();
        }

        self.postfix()
    }

    fn sizeof_type(&mut self, ty: &Type, tok: Token) -> Result<Node, Fatal> {
        if let TypeKind::Vla { base, len } = &ty.kind {
            // The size of a VLA is a runtime value: len * sizeof(base).
            let base_size = self.sess.tags.size_of(base);
            let len = (**len).clone();
            let len = self.cast_to(len, Type::ulong());
            let size = Node::num(base_size, Type::ulong(), tok.clone());
            return Ok(Node::new(
                NodeKind::Mul(Box::new(len), Box::new(size)),
                Type::ulong(),
                tok,
            ));
        }
        let size = self.sess.tags.size_of(ty);
        if size < 0 {
            self.error_tok(&tok, "invalid application of 'sizeof' to an incomplete type".to_string())?;
        }
        Ok(Node::num(size.max(0), Type::ulong(), tok))
    }

    /// postfix = primary ("[" expr "]" | "." ident | "->" ident | "++" |
    ///           "--" | "(" args ")")*
    fn postfix(&mut self) -> Result<Node, Fatal> {
        let node = self.primary()?;
        self.postfix_suffixes(node)
    }

    fn postfix_suffixes(&mut self, node: Node) -> Result<Node, Fatal> {
        let mut node = node;
        loop {
            if self.at("[") {
                let tok = self.advance();
                let index = self.expr()?;
                self.expect("]")?;
                let sum = self.new_add(node, index, tok.clone())?;
                node = self.new_deref(sum, tok)?;
            } else if self.at(".") {
                let tok = self.advance();
                node = self.member_access(node, tok)?;
            } else if self.at("->") {
                let tok = self.advance();
                node = self.new_deref(node, tok.clone())?;
                node = self.member_access(node, tok)?;
            } else if self.at("++") {
                let tok = self.advance();
                node = self.postfix_inc_dec(node, tok, 1)?;
            } else if self.at("--") {
                let tok = self.advance();
                node = self.postfix_inc_dec(node, tok, -1)?;
            } else if self.at("(") {
                let tok = self.advance();
                node = self.funcall(node, tok)?;
            } else {
                return Ok(node);
            }
        }
    }

    /// `e++` evaluates to the old value: `(typeof e)((e += 1) - 1)`.
    fn postfix_inc_dec(&mut self, node: Node, tok: Token, addend: i64) -> Result<Node, Fatal> {
        let ty = node.ty.clone();
        let one = Node::num(addend.abs(), Type::int(), tok.clone());
        let assigned = if addend > 0 {
            self.compound_assign(node, one, tok.clone(), Self::new_add)?
        } else {
            self.compound_assign(node, one, tok.clone(), Self::new_sub)?
        };
        let undo = Node::num(-addend, Type::int(), tok.clone());
        let adjusted = self.new_add(assigned, undo, tok)?;
        Ok(self.cast_to(adjusted, ty))
    }

    fn funcall(&mut self, callee: Node, tok: Token) -> Result<Node, Fatal> {
        // Block invocation keeps its own node kind.
        if matches!(callee.ty.kind, TypeKind::Block(_)) {
            let fty = match &callee.ty.kind {
                TypeKind::Block(f) => (**f).clone(),
                _ => unreachable!(),
            };
            let args = self.call_args(&fty, &tok)?;
            let ret = fty.return_ty.clone();
            return Ok(Node::new(
                NodeKind::BlockCall {
                    callee: Box::new(callee),
                    args,
                },
                ret,
                tok,
            ));
        }

        let callee = self.decay(callee);
        let fty = match &callee.ty.kind {
            TypeKind::Ptr(base) => match &base.kind {
                TypeKind::Func(f) => (**f).clone(),
                _ => {
                    self.error_tok(&tok, "called object is not a function".to_string())?;
                    return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
                }
            },
            TypeKind::Func(f) => (**f).clone(),
            TypeKind::Error => {
                // Recovery: swallow the argument list.
                let dummy = func_type(Type::error(), Vec::new(), true);
                let f = match dummy.kind {
                    TypeKind::Func(f) => *f,
                    _ => unreachable!(),
                };
                let _ = self.call_args(&f, &tok)?;
                return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
            }
            _ => {
                self.error_tok(&tok, "called object is not a function".to_string())?;
                return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
            }
        };

        let args = self.call_args(&fty, &tok)?;
        let ret = fty.return_ty.clone();
        Ok(Node::new(
            NodeKind::FunCall {
                func: Box::new(callee),
                func_ty: Box::new(fty),
                args,
            },
            ret,
            tok,
        ))
    }

    /// Argument list with per-parameter conversions; default promotions
    /// for variadic tails.
    fn call_args(&mut self, fty: &crate::ctype::FuncType, tok: &Token) -> Result<Vec<Node>, Fatal> {
        let mut args: Vec<Node> = Vec::new();
        let mut idx = 0usize;
        while !self.at(")") && !self.peek().is_eof() {
            if idx > 0 {
                self.expect(",")?;
            }
            let arg = self.assign()?;
            let arg = self.decay(arg);
            let arg = if let Some(param) = fty.params.get(idx) {
                self.cast_to(arg, param.ty.clone())
            } else if fty.is_variadic || fty.is_unprototyped {
                if matches!(arg.ty.kind, TypeKind::Float) {
                    self.cast_to(arg, Type::double())
                } else {
                    arg
                }
            } else {
                self.error_tok(tok, "too many arguments".to_string())?;
                arg
            };
            args.push(arg);
            idx += 1;
        }
        self.expect(")")?;
        if idx < fty.params.len() {
            self.error_tok(tok, "too few arguments".to_string())?;
        }
        Ok(args)
    }

    fn member_access(&mut self, node: Node, tok: Token) -> Result<Node, Fatal> {
        let name_tok = self.peek().clone();
        if !name_tok.is_ident() {
            self.error_tok(&name_tok, "expected a member name".to_string())?;
            return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
        }
        self.advance();

        let id = match &node.ty.kind {
            TypeKind::Struct(id) | TypeKind::Union(id) => *id,
            TypeKind::Error => return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok)),
            _ => {
                self.error_tok(&tok, "member access on a non-aggregate value".to_string())?;
                return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
            }
        };

        let Some(path) = self.find_member_path(id, &name_tok.text) else {
            self.error_tok(
                &name_tok,
                format!("no member named '{}'", name_tok.text),
            )?;
            return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
        };

        // Anonymous members produce a chain of member nodes.
        let mut out = node;
        for member in path {
            let ty = member.ty.clone();
            out = Node::new(
                NodeKind::Member {
                    base: Box::new(out),
                    member,
                },
                ty,
                tok.clone(),
            );
        }
        Ok(out)
    }

    /// Locate a member by name, descending into anonymous struct/union
    /// members; returns the access path from outermost to the member.
    fn find_member_path(&self, id: crate::ctype::TagId, name: &str) -> Option<Vec<Member>> {
        let members = self.sess.tags.def(id).members.clone()?;
        for m in &members {
            match &m.name {
                Some(tok) if &*tok.text == name => return Some(vec![m.clone()]),
                None => {
                    let inner = match &m.ty.kind {
                        TypeKind::Struct(id) | TypeKind::Union(id) => *id,
                        _ => continue,
                    };
                    if let Some(mut path) = self.find_member_path(inner, name) {
                        let mut full = vec![m.clone()];
                        full.append(&mut path);
                        return Some(full);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn primary(&mut self) -> Result<Node, Fatal> {
        let tok = self.peek().clone();

        // [GNU] statement expression `({ ... })`.
        if self.at("(") && self.peek_at(1).is("{") {
            self.advance();
            let body = self.compound_stmt()?;
            self.expect(")")?;
            let stmts = match body.kind {
                NodeKind::Block(stmts) => stmts,
                _ => vec![body],
            };
            let ty = stmts
                .iter()
                .last()
                .and_then(|n| match &n.kind {
                    NodeKind::ExprStmt(e) => Some(e.ty.clone()),
                    _ => None,
                })
                .unwrap_or_else(Type::void);
            return Ok(Node::new(NodeKind::StmtExpr(stmts), ty, tok));
        }

        if self.eat("(") {
            let node = self.expr()?;
            self.expect(")")?;
            return Ok(node);
        }

        if self.at("true") || self.at("false") {
            let tok = self.advance();
            return Ok(Node::num(tok.is("true") as i64, Type::bool_(), tok));
        }

        match &tok.kind {
            TokenKind::Num(num) => {
                self.advance();
                let ty = Type::from_num(num.ty);
                if num.ty.is_float() {
                    return Ok(Node::fnum(num.fval, ty, tok));
                }
                return Ok(Node::num(num.ival, ty, tok));
            }
            TokenKind::Str(lit) => {
                self.advance();
                return self.string_literal(lit.clone(), tok);
            }
            _ => {}
        }

        if tok.is_ident() {
            self.advance();

            // Atomic builtins parse as calls with fixed shapes.
            if tok.is("__builtin_compare_and_swap") {
                self.expect("(")?;
                let addr = self.assign()?;
                self.expect(",")?;
                let old = self.assign()?;
                self.expect(",")?;
                let new = self.assign()?;
                self.expect(")")?;
                return Ok(Node::new(
                    NodeKind::Cas {
                        addr: Box::new(addr),
                        old: Box::new(old),
                        new: Box::new(new),
                    },
                    Type::bool_(),
                    tok,
                ));
            }
            if tok.is("__builtin_atomic_exchange") {
                self.expect("(")?;
                let addr = self.assign()?;
                self.expect(",")?;
                let val = self.assign()?;
                self.expect(")")?;
                let ty = addr.ty.base().cloned().unwrap_or_else(Type::error);
                return Ok(Node::new(
                    NodeKind::Exch {
                        addr: Box::new(addr),
                        val: Box::new(val),
                    },
                    ty,
                    tok,
                ));
            }

            // `__func__` (and the GNU alias) materializes lazily as a
            // hoisted string holding the enclosing function's name.
            if (tok.is("__func__") || tok.is("__FUNCTION__"))
                && self.find_var(&tok.text).is_none()
            {
                let fn_name = self.current_fn.as_ref().map(|f| f.borrow().name.clone());
                if let Some(name) = fn_name {
                    let mut bytes = name.as_bytes().to_vec();
                    bytes.push(0);
                    let ty = array_of(Type::char_(), bytes.len() as i64);
                    let var = self.new_anon_gvar(ty);
                    var.borrow_mut().init_data = Some(bytes);
                    return Ok(Node::var(var, tok));
                }
            }

            match self.find_var(&tok.text) {
                Some(VarScope::Var(obj)) => {
                    let is_local = obj.borrow().is_local;
                    if !is_local {
                        let name = obj.borrow().name.clone();
                        self.note_ref(&name);
                    } else {
                        self.track_capture(&obj);
                    }
                    return Ok(Node::var(obj, tok));
                }
                Some(VarScope::EnumConst { val, ty }) => {
                    return Ok(Node::num(val, ty, tok));
                }
                Some(VarScope::Typedef(_)) | None => {
                    if self.at("(") {
                        self.error_tok(
                            &tok,
                            format!("implicit declaration of function '{}'", tok.text),
                        )?;
                        // Recover with an extern `int ()` declaration so
                        // the call parses.
                        let fty = {
                            let mut t = func_type(Type::int(), Vec::new(), false);
                            if let TypeKind::Func(f) = &mut t.kind {
                                f.is_unprototyped = true;
                            }
                            t
                        };
                        let obj = Obj::new_ref(tok.text.clone(), fty);
                        obj.borrow_mut().is_function = true;
                        self.globals.push(obj.clone());
                        self.push_var_scope(tok.text.clone(), VarScope::Var(obj.clone()));
                        return Ok(Node::var(obj, tok));
                    }
                    self.error_tok(&tok, format!("undefined variable '{}'", tok.text))?;
                    return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
                }
            }
        }

        self.error_tok(&tok, format!("expected an expression before '{}'", tok.text))?;
        // Do not consume: the caller's recovery decides how far to skip.
        Ok(Node::new(NodeKind::NullExpr, Type::error(), tok))
    }

    fn string_literal(&mut self, lit: crate::token::StrLit, tok: Token) -> Result<Node, Fatal> {
        let elem = match lit.kind {
            StrKind::Char => Type::char_(),
            StrKind::Utf16 => Type::ushort(),
            StrKind::Utf32 => Type::uint(),
        };
        let ty = array_of(elem, lit.len() as i64);
        let var = self.new_anon_gvar(ty);
        var.borrow_mut().init_data = Some(lit.bytes.to_vec());
        Ok(Node::var(var, tok))
    }

    /// `^ret(params){body}`: an Apple-style block literal lowered to a
    /// synthetic static function plus a capture list.
    fn block_literal(&mut self) -> Result<Node, Fatal> {
        let tok = self.advance(); // ^
        let ret_ty = if self.is_typename(self.peek()) {
            self.declspec(None)?
        } else {
            Type::int()
        };

        let mut params: Vec<FuncParam> = Vec::new();
        if self.at("(") {
            let fn_ty = self.type_suffix(ret_ty.clone())?;
            if let Some(f) = fn_ty.func() {
                params = f.params.clone();
            }
        }
        let fty = func_type(ret_ty, params.clone(), false);
        let block_fty = match &fty.kind {
            TypeKind::Func(f) => f.clone(),
            _ => unreachable!(),
        };

        let func = {
            let name = self.sess.new_unique_name();
            let obj = Obj::new_ref(name, fty);
            let mut o = obj.borrow_mut();
            o.is_function = true;
            o.is_static = true;
            o.is_definition = true;
            o.is_block = true;
            drop(o);
            self.globals.push(obj.clone());
            obj
        };

        // The body parses as its own function: fresh locals, labels and
        // a capture frame.
        let saved_fn = self.current_fn.replace(func.clone());
        let saved_locals = std::mem::take(&mut self.locals);
        let saved_labels = std::mem::take(&mut self.labels);
        self.block_stack.push(BlockCtx {
            own_locals: Vec::new(),
            captures: Vec::new(),
        });

        self.enter_scope();
        let mut param_objs: Vec<ObjRef> = Vec::new();
        for p in &params {
            let pname: Rc<str> = p
                .name
                .as_ref()
                .map(|t| t.text.clone())
                .unwrap_or_else(|| Rc::from(""));
            param_objs.push(self.new_lvar(pname, p.ty.clone()));
        }
        func.borrow_mut().params = param_objs;

        let mut body = if self.at("{") {
            self.compound_stmt()?
        } else {
            let t = self.peek().clone();
            self.error_tok(&t, "expected a block body".to_string())?;
            Node::null(t)
        };
        self.resolve_gotos(&mut body)?;
        self.leave_scope();

        let ctx = self.block_stack.pop().unwrap_or(BlockCtx {
            own_locals: Vec::new(),
            captures: Vec::new(),
        });
        {
            let mut o = func.borrow_mut();
            o.body = Some(body);
            o.locals = std::mem::take(&mut self.locals);
            o.captures = ctx.captures.clone();
        }
        self.locals = saved_locals;
        self.labels = saved_labels;
        self.current_fn = saved_fn;

        Ok(Node::new(
            NodeKind::BlockLiteral {
                func,
                captures: ctx.captures,
            },
            Type::new(TypeKind::Block(block_fty)),
            tok,
        ))
    }

    /// Record a reference to an outer local from inside a block literal.
    fn track_capture(&mut self, obj: &ObjRef) {
        let Some(ctx) = self.block_stack.last_mut() else {
            return;
        };
        if ctx.own_locals.iter().any(|o| Rc::ptr_eq(o, obj)) {
            return;
        }
        if !ctx.captures.iter().any(|o| Rc::ptr_eq(o, obj)) {
            obj.borrow_mut().is_captured = true;
            ctx.captures.push(obj.clone());
        }
    }

    // ----- typed node builders -----

    /// Array-to-pointer and function-to-pointer decay, as an explicit
    /// cast node.
    pub(crate) fn decay(&mut self, node: Node) -> Node {
        match &node.ty.kind {
            TypeKind::Array { base, .. } | TypeKind::Vla { base, .. } => {
                let ty = pointer_to((**base).clone());
                self.cast_to(node, ty)
            }
            TypeKind::Func(_) => {
                let ty = pointer_to(node.ty.clone());
                self.cast_to(node, ty)
            }
            _ => node,
        }
    }

    /// Explicit conversion node. Also the only place a value's type ever
    /// changes.
    pub(crate) fn cast_to(&mut self, node: Node, ty: Type) -> Node {
        let tok = node.tok.clone();
        Node::new(NodeKind::Cast(Box::new(node)), ty, tok)
    }

    /// Integer promotion: anything smaller than int computes as int.
    fn promote(&mut self, node: Node) -> Node {
        let node = self.decay(node);
        if node.ty.is_integer() && self.sess.tags.size_of(&node.ty) < 4 {
            return self.cast_to(node, Type::int());
        }
        node
    }

    fn usual_arith(&mut self, lhs: Node, rhs: Node) -> (Node, Node, Type) {
        let lhs = self.decay(lhs);
        let rhs = self.decay(rhs);
        let ty = self.sess.tags.common_type(&lhs.ty, &rhs.ty);
        let lhs = self.cast_to(lhs, ty.clone());
        let rhs = self.cast_to(rhs, ty.clone());
        (lhs, rhs, ty)
    }

    pub(crate) fn new_assign(&mut self, lhs: Node, rhs: Node, tok: Token) -> Result<Node, Fatal> {
        self.check_lvalue(&lhs, &tok)?;
        if lhs.ty.is_const {
            self.error_tok(&tok, "assignment to const-qualified value".to_string())?;
        }
        let rhs = self.decay(rhs);
        let is_aggregate = matches!(lhs.ty.kind, TypeKind::Struct(_) | TypeKind::Union(_));
        let rhs = if is_aggregate || lhs.ty.is_error() {
            rhs
        } else {
            self.cast_to(rhs, lhs.ty.clone())
        };
        let ty = lhs.ty.clone();
        Ok(Node::new(
            NodeKind::Assign(Box::new(lhs), Box::new(rhs)),
            ty,
            tok,
        ))
    }

    fn check_lvalue(&mut self, node: &Node, tok: &Token) -> Result<(), Fatal> {
        match &node.kind {
            NodeKind::Var(_) | NodeKind::Deref(_) | NodeKind::Member { .. } | NodeKind::VlaPtr(_) => {
                Ok(())
            }
            NodeKind::Comma(_, rhs) => self.check_lvalue(rhs, tok),
            NodeKind::NullExpr => Ok(()), // error recovery
            _ => {
                self.error_tok(tok, "not an lvalue".to_string())?;
                Ok(())
            }
        }
    }

    /// `A op= B` desugars to `tmp = &A, *tmp = *tmp op B` so A is
    /// evaluated exactly once.
    fn compound_assign(
        &mut self,
        lhs: Node,
        rhs: Node,
        tok: Token,
        build: fn(&mut Self, Node, Node, Token) -> Result<Node, Fatal>,
    ) -> Result<Node, Fatal> {
        self.check_lvalue(&lhs, &tok)?;
        let lhs_ty = lhs.ty.clone();

        let tmp = self.new_lvar(Rc::from(""), pointer_to(lhs_ty.clone()));
        let tmp_init = {
            let addr = Node::new(
                NodeKind::Addr(Box::new(lhs)),
                pointer_to(lhs_ty.clone()),
                tok.clone(),
            );
            let tmp_node = Node::var(tmp.clone(), tok.clone());
            Node::new(
                NodeKind::Assign(Box::new(tmp_node), Box::new(addr)),
                pointer_to(lhs_ty.clone()),
                tok.clone(),
            )
        };
        let deref = |tmp: &ObjRef, tok: &Token, ty: &Type| {
            Node::new(
                NodeKind::Deref(Box::new(Node::var(tmp.clone(), tok.clone()))),
                ty.clone(),
                tok.clone(),
            )
        };
        let value = build(self, deref(&tmp, &tok, &lhs_ty), rhs, tok.clone())?;
        let value = self.cast_to(value, lhs_ty.clone());
        let store = Node::new(
            NodeKind::Assign(Box::new(deref(&tmp, &tok, &lhs_ty)), Box::new(value)),
            lhs_ty.clone(),
            tok.clone(),
        );
        Ok(Node::new(
            NodeKind::Comma(Box::new(tmp_init), Box::new(store)),
            lhs_ty,
            tok,
        ))
    }

    /// Addition with pointer scaling.
    pub(crate) fn new_add(&mut self, lhs: Node, rhs: Node, tok: Token) -> Result<Node, Fatal> {
        let lhs = self.decay(lhs);
        let rhs = self.decay(rhs);

        if lhs.ty.is_numeric() && rhs.ty.is_numeric() {
            let (lhs, rhs, ty) = self.usual_arith(lhs, rhs);
            return Ok(Node::new(NodeKind::Add(Box::new(lhs), Box::new(rhs)), ty, tok));
        }

        // Canonicalize `num + ptr` to `ptr + num`.
        let (ptr, num) = if lhs.ty.base().is_some() {
            (lhs, rhs)
        } else if rhs.ty.base().is_some() {
            (rhs, lhs)
        } else {
            if !lhs.ty.is_error() && !rhs.ty.is_error() {
                self.error_tok(&tok, "invalid operands to '+'".to_string())?;
            }
            return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
        };
        if num.ty.base().is_some() {
            self.error_tok(&tok, "invalid operands to '+' (two pointers)".to_string())?;
            return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
        }

        let size = ptr.ty.base().map(|b| self.sess.tags.size_of(b)).unwrap_or(1);
        let num = self.cast_to(num, Type::long());
        let scaled = Node::new(
            NodeKind::Mul(
                Box::new(num),
                Box::new(Node::num(size.max(1), Type::long(), tok.clone())),
            ),
            Type::long(),
            tok.clone(),
        );
        let ty = ptr.ty.clone();
        Ok(Node::new(
            NodeKind::Add(Box::new(ptr), Box::new(scaled)),
            ty,
            tok,
        ))
    }

    /// Subtraction: numeric, pointer-int, and pointer-pointer.
    pub(crate) fn new_sub(&mut self, lhs: Node, rhs: Node, tok: Token) -> Result<Node, Fatal> {
        let lhs = self.decay(lhs);
        let rhs = self.decay(rhs);

        if lhs.ty.is_numeric() && rhs.ty.is_numeric() {
            let (lhs, rhs, ty) = self.usual_arith(lhs, rhs);
            return Ok(Node::new(NodeKind::Sub(Box::new(lhs), Box::new(rhs)), ty, tok));
        }

        if lhs.ty.base().is_some() && rhs.ty.is_integer() {
            let size = lhs.ty.base().map(|b| self.sess.tags.size_of(b)).unwrap_or(1);
            let rhs = self.cast_to(rhs, Type::long());
            let scaled = Node::new(
                NodeKind::Mul(
                    Box::new(rhs),
                    Box::new(Node::num(size.max(1), Type::long(), tok.clone())),
                ),
                Type::long(),
                tok.clone(),
            );
            let ty = lhs.ty.clone();
            return Ok(Node::new(
                NodeKind::Sub(Box::new(lhs), Box::new(scaled)),
                ty,
                tok,
            ));
        }

        if lhs.ty.base().is_some() && rhs.ty.base().is_some() {
            // ptr - ptr yields the element distance, type long.
            let size = lhs.ty.base().map(|b| self.sess.tags.size_of(b)).unwrap_or(1);
            let diff = Node::new(
                NodeKind::Sub(Box::new(lhs), Box::new(rhs)),
                Type::long(),
                tok.clone(),
            );
            return Ok(Node::new(
                NodeKind::Div(
                    Box::new(diff),
                    Box::new(Node::num(size.max(1), Type::long(), tok.clone())),
                ),
                Type::long(),
                tok,
            ));
        }

        if !lhs.ty.is_error() && !rhs.ty.is_error() {
            self.error_tok(&tok, "invalid operands to '-'".to_string())?;
        }
        Ok(Node::new(NodeKind::NullExpr, Type::error(), tok))
    }

    fn arith_binary(
        &mut self,
        lhs: Node,
        rhs: Node,
        tok: Token,
        make: fn(Box<Node>, Box<Node>) -> NodeKind,
        int_only: bool,
        op_name: &str,
    ) -> Result<Node, Fatal> {
        let lhs = self.decay(lhs);
        let rhs = self.decay(rhs);
        if lhs.ty.is_error() || rhs.ty.is_error() {
            return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
        }
        if !lhs.ty.is_numeric()
            || !rhs.ty.is_numeric()
            || (int_only && (!lhs.ty.is_integer() || !rhs.ty.is_integer()))
        {
            self.error_tok(&tok, format!("invalid operands to '{}'", op_name))?;
            return Ok(Node::new(NodeKind::NullExpr, Type::error(), tok));
        }
        let (lhs, rhs, ty) = self.usual_arith(lhs, rhs);
        Ok(Node::new(make(Box::new(lhs), Box::new(rhs)), ty, tok))
    }

    pub(crate) fn new_mul(&mut self, l: Node, r: Node, t: Token) -> Result<Node, Fatal> {
        self.arith_binary(l, r, t, NodeKind::Mul, false, "*")
    }
    pub(crate) fn new_div(&mut self, l: Node, r: Node, t: Token) -> Result<Node, Fatal> {
        self.arith_binary(l, r, t, NodeKind::Div, false, "/")
    }
    pub(crate) fn new_mod(&mut self, l: Node, r: Node, t: Token) -> Result<Node, Fatal> {
        self.arith_binary(l, r, t, NodeKind::Mod, true, "%")
    }
    pub(crate) fn new_bitand(&mut self, l: Node, r: Node, t: Token) -> Result<Node, Fatal> {
        self.arith_binary(l, r, t, NodeKind::BitAnd, true, "&")
    }
    pub(crate) fn new_bitor(&mut self, l: Node, r: Node, t: Token) -> Result<Node, Fatal> {
        self.arith_binary(l, r, t, NodeKind::BitOr, true, "|")
    }
    pub(crate) fn new_bitxor(&mut self, l: Node, r: Node, t: Token) -> Result<Node, Fatal> {
        self.arith_binary(l, r, t, NodeKind::BitXor, true, "^")
    }

    /// Shifts promote the left operand; the result has its type.
    pub(crate) fn new_shl(&mut self, lhs: Node, rhs: Node, tok: Token) -> Result<Node, Fatal> {
        let lhs = self.promote(lhs);
        let rhs = self.promote(rhs);
        let ty = lhs.ty.clone();
        Ok(Node::new(NodeKind::Shl(Box::new(lhs), Box::new(rhs)), ty, tok))
    }
    pub(crate) fn new_shr(&mut self, lhs: Node, rhs: Node, tok: Token) -> Result<Node, Fatal> {
        let lhs = self.promote(lhs);
        let rhs = self.promote(rhs);
        let ty = lhs.ty.clone();
        Ok(Node::new(NodeKind::Shr(Box::new(lhs), Box::new(rhs)), ty, tok))
    }

    fn new_comparison(
        &mut self,
        lhs: Node,
        rhs: Node,
        tok: Token,
        make: fn(Box<Node>, Box<Node>) -> NodeKind,
    ) -> Result<Node, Fatal> {
        let lhs = self.decay(lhs);
        let rhs = self.decay(rhs);
        let (lhs, rhs) = if lhs.ty.is_numeric() && rhs.ty.is_numeric() {
            let (l, r, _) = self.usual_arith(lhs, rhs);
            (l, r)
        } else {
            (lhs, rhs)
        };
        Ok(Node::new(
            make(Box::new(lhs), Box::new(rhs)),
            Type::int(),
            tok,
        ))
    }

    fn new_deref(&mut self, node: Node, tok: Token) -> Result<Node, Fatal> {
        let node = self.decay(node);
        let ty = match node.ty.base() {
            Some(base) if base.is_void() => {
                self.error_tok(&tok, "dereferencing a void pointer".to_string())?;
                Type::error()
            }
            Some(base) => base.clone(),
            None if node.ty.is_error() => Type::error(),
            None => {
                self.error_tok(&tok, "invalid pointer dereference".to_string())?;
                Type::error()
            }
        };
        Ok(Node::new(NodeKind::Deref(Box::new(node)), ty, tok))
    }

    // ----- constant evaluation -----

    /// Parse and fold a constant expression.
    pub(crate) fn const_expr(&mut self) -> Result<i64, Fatal> {
        let node = self.conditional()?;
        match eval_no_label(&node) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.error_tok(&e.tok, e.msg)?;
                Ok(0)
            }
        }
    }

    /// Silent fold, used to distinguish constant array bounds from VLAs.
    pub(crate) fn try_eval(&self, node: &Node) -> Option<i64> {
        eval_no_label(node).ok()
    }
}

/// Structural test for a constant expression: no variables anywhere. An
/// expression of this shape that still fails to evaluate (division by
/// zero, signed overflow) is an error, not a VLA bound.
pub(crate) fn is_const_shape(node: &Node) -> bool {
    match &node.kind {
        NodeKind::Add(a, b)
        | NodeKind::Sub(a, b)
        | NodeKind::Mul(a, b)
        | NodeKind::Div(a, b)
        | NodeKind::Mod(a, b)
        | NodeKind::BitAnd(a, b)
        | NodeKind::BitOr(a, b)
        | NodeKind::BitXor(a, b)
        | NodeKind::Shl(a, b)
        | NodeKind::Shr(a, b)
        | NodeKind::Eq(a, b)
        | NodeKind::Ne(a, b)
        | NodeKind::Lt(a, b)
        | NodeKind::Le(a, b)
        | NodeKind::LogAnd(a, b)
        | NodeKind::LogOr(a, b) => is_const_shape(a) && is_const_shape(b),
        NodeKind::Neg(a) | NodeKind::Not(a) | NodeKind::BitNot(a) | NodeKind::Cast(a) => {
            is_const_shape(a)
        }
        NodeKind::Cond { cond, then, els } => {
            is_const_shape(cond) && is_const_shape(then) && is_const_shape(els)
        }
        NodeKind::Num { .. } => true,
        _ => false,
    }
}

fn not_const(tok: &Token) -> EvalErr {
    EvalErr {
        tok: tok.clone(),
        msg: "not a compile-time constant".to_string(),
    }
}

/// Evaluate where an address constant is not acceptable: a label leaking
/// out means the expression was `&global`-shaped, which only a
/// relocation-bearing context may consume.
pub(crate) fn eval_no_label(node: &Node) -> Result<i64, EvalErr> {
    let mut label: Option<Rc<str>> = None;
    let v = eval(node, &mut label)?;
    if label.is_some() {
        return Err(not_const(&node.tok));
    }
    Ok(v)
}

/// Evaluate an integer constant expression. When `label` is provided, the
/// expression may be an address constant: the address of a global plus an
/// offset, with the global's name stored through `label`.
pub(crate) fn eval(node: &Node, label: &mut Option<Rc<str>>) -> Result<i64, EvalErr> {
    if node.ty.is_flonum() {
        return Ok(eval_double(node)? as i64);
    }

    let unsigned = node.ty.is_unsigned;
    let arith = |op: BinOp, a: &Node, b: &Node, label: &mut Option<Rc<str>>| -> Result<i64, EvalErr> {
        let lv = eval(a, label)?;
        let rv = eval_no_label(b)?;
        int_binary(op, lv, rv, unsigned).map_err(|e| EvalErr {
            tok: node.tok.clone(),
            msg: e.to_string(),
        })
    };
    let pure = |op: BinOp, a: &Node, b: &Node| -> Result<i64, EvalErr> {
        let lv = eval_no_label(a)?;
        let rv = eval_no_label(b)?;
        int_binary(op, lv, rv, unsigned).map_err(|e| EvalErr {
            tok: node.tok.clone(),
            msg: e.to_string(),
        })
    };

    match &node.kind {
        NodeKind::Add(a, b) => arith(BinOp::Add, a, b, label),
        NodeKind::Sub(a, b) => arith(BinOp::Sub, a, b, label),
        NodeKind::Mul(a, b) => pure(BinOp::Mul, a, b),
        NodeKind::Div(a, b) => pure(BinOp::Div, a, b),
        NodeKind::Mod(a, b) => pure(BinOp::Rem, a, b),
        NodeKind::BitAnd(a, b) => pure(BinOp::And, a, b),
        NodeKind::BitOr(a, b) => pure(BinOp::Or, a, b),
        NodeKind::BitXor(a, b) => pure(BinOp::Xor, a, b),
        NodeKind::Shl(a, b) => pure(BinOp::Shl, a, b),
        NodeKind::Shr(a, b) => pure(BinOp::Shr, a, b),
        NodeKind::Eq(a, b) => cmp(a, b, BinOp::Eq, node),
        NodeKind::Ne(a, b) => cmp(a, b, BinOp::Ne, node),
        NodeKind::Lt(a, b) => cmp(a, b, BinOp::Lt, node),
        NodeKind::Le(a, b) => cmp(a, b, BinOp::Le, node),
        NodeKind::Neg(a) => {
            let v = eval_no_label(a)?;
            int_neg(v, unsigned).map_err(|e| EvalErr {
                tok: node.tok.clone(),
                msg: e.to_string(),
            })
        }
        NodeKind::Not(a) => Ok((eval_no_label(a)? == 0) as i64),
        NodeKind::BitNot(a) => Ok(!eval_no_label(a)?),
        NodeKind::LogAnd(a, b) => {
            Ok((eval_no_label(a)? != 0 && eval_no_label(b)? != 0) as i64)
        }
        NodeKind::LogOr(a, b) => {
            Ok((eval_no_label(a)? != 0 || eval_no_label(b)? != 0) as i64)
        }
        NodeKind::Cond { cond, then, els } => {
            if eval_no_label(cond)? != 0 {
                eval(then, label)
            } else {
                eval(els, label)
            }
        }
        NodeKind::Comma(_, rhs) => eval(rhs, label),
        NodeKind::Cast(inner) => {
            let v = eval(inner, label)?;
            if node.ty.is_integer() {
                let size = match node.ty.kind {
                    TypeKind::Bool => return Ok((v != 0) as i64),
                    TypeKind::Char => 1,
                    TypeKind::Short => 2,
                    TypeKind::Int | TypeKind::Enum(_) => 4,
                    _ => 8,
                };
                return Ok(cast_int(v, size, node.ty.is_unsigned));
            }
            Ok(v)
        }
        NodeKind::Num { ival, .. } => Ok(*ival),
        NodeKind::Addr(inner) => eval_rval(inner, label),
        NodeKind::LabelVal { unique_label, .. } => {
            if label.is_some() {
                return Err(not_const(&node.tok));
            }
            *label = Some(unique_label.clone());
            Ok(0)
        }
        NodeKind::Member { base, member } => {
            if !node.ty.is_array() {
                return Err(not_const(&node.tok));
            }
            Ok(eval_rval(base, label)? + member.offset)
        }
        NodeKind::Var(obj) => {
            let o = obj.borrow();
            if !o.ty.is_array() && !o.ty.is_func() {
                return Err(not_const(&node.tok));
            }
            if label.is_some() {
                return Err(not_const(&node.tok));
            }
            *label = Some(o.name.clone());
            Ok(0)
        }
        _ => Err(not_const(&node.tok)),
    }
}

fn cmp(a: &Node, b: &Node, op: BinOp, node: &Node) -> Result<i64, EvalErr> {
    let unsigned = a.ty.is_unsigned;
    let lv = eval_no_label(a)?;
    let rv = eval_no_label(b)?;
    int_binary(op, lv, rv, unsigned).map_err(|e| EvalErr {
        tok: node.tok.clone(),
        msg: e.to_string(),
    })
}

/// Address of an lvalue in a constant context: a global's label plus a
/// constant byte offset.
fn eval_rval(node: &Node, label: &mut Option<Rc<str>>) -> Result<i64, EvalErr> {
    match &node.kind {
        NodeKind::Var(obj) => {
            let o = obj.borrow();
            if o.is_local {
                return Err(not_const(&node.tok));
            }
            if label.is_some() {
                return Err(not_const(&node.tok));
            }
            *label = Some(o.name.clone());
            Ok(0)
        }
        NodeKind::Deref(inner) => eval(inner, label),
        NodeKind::Member { base, member } => Ok(eval_rval(base, label)? + member.offset),
        _ => Err(not_const(&node.tok)),
    }
}

/// Floating-point constant folding at the widest host precision.
pub(crate) fn eval_double(node: &Node) -> Result<f64, EvalErr> {
    if node.ty.is_integer() {
        let v = eval_no_label(node)?;
        return Ok(if node.ty.is_unsigned {
            v as u64 as f64
        } else {
            v as f64
        });
    }

    match &node.kind {
        NodeKind::Add(a, b) => Ok(eval_double(a)? + eval_double(b)?),
        NodeKind::Sub(a, b) => Ok(eval_double(a)? - eval_double(b)?),
        NodeKind::Mul(a, b) => Ok(eval_double(a)? * eval_double(b)?),
        NodeKind::Div(a, b) => Ok(eval_double(a)? / eval_double(b)?),
        NodeKind::Neg(a) => Ok(-eval_double(a)?),
        NodeKind::Comma(_, rhs) => eval_double(rhs),
        NodeKind::Cond { cond, then, els } => {
            if eval_no_label(cond)? != 0 {
                eval_double(then)
            } else {
                eval_double(els)
            }
        }
        NodeKind::Cast(inner) => {
            if inner.ty.is_flonum() {
                eval_double(inner)
            } else {
                let v = eval_no_label(inner)?;
                Ok(if inner.ty.is_unsigned {
                    v as u64 as f64
                } else {
                    v as f64
                })
            }
        }
        NodeKind::Num { fval, .. } => Ok(*fval),
        _ => Err(not_const(&node.tok)),
    }
}
