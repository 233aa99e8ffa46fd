//! Initializer parsing and flattening
//!
//! Initializers parse into a designator-indexed tree shaped like the
//! initialized type, then flatten two ways: local variables become a
//! `MemZero` followed by element-wise assignments, globals become an
//! `init_data` byte buffer plus `Relocation` records for pointer-valued
//! slots that name other globals. GNU array ranges (`[a ... b] = x`)
//! re-parse the initializer expression once per covered index.

use std::rc::Rc;

use crate::ast::{Node, NodeKind, ObjRef, Relocation};
use crate::ctype::{array_of, Member, Type, TypeKind};
use crate::diag::Fatal;
use crate::token::{StrKind, StrLit, Token, TokenKind};

use super::expr::{eval, eval_double, eval_no_label};
use super::Parser;

#[derive(Debug, Clone)]
pub(crate) struct Initializer {
    ty: Type,
    /// Array of unknown length: children grow as elements appear.
    is_flexible: bool,
    expr: Option<Node>,
    children: Vec<Initializer>,
    /// For unions: which member the initializer selected.
    chosen: Option<usize>,
}

/// Lvalue path from a variable to the sub-object being initialized.
enum InitDesg {
    Var(ObjRef),
    Idx(Box<InitDesg>, i64),
    Member(Box<InitDesg>, Member),
}

impl Initializer {
    fn new(p: &Parser, ty: Type, flexible_ok: bool) -> Initializer {
        let mut init = Initializer {
            ty: ty.clone(),
            is_flexible: false,
            expr: None,
            children: Vec::new(),
            chosen: None,
        };
        match &ty.kind {
            TypeKind::Array { base, len } => {
                if *len < 0 {
                    if flexible_ok {
                        init.is_flexible = true;
                    }
                } else {
                    init.children = (0..*len)
                        .map(|_| Initializer::new(p, (**base).clone(), false))
                        .collect();
                }
            }
            TypeKind::Struct(id) | TypeKind::Union(id) => {
                let members = p.sess.tags.def(*id).members.clone().unwrap_or_default();
                let flexible = p.sess.tags.def(*id).is_flexible;
                let n = members.len();
                init.children = members
                    .into_iter()
                    .enumerate()
                    .map(|(i, m)| {
                        Initializer::new(p, m.ty, flexible_ok && flexible && i == n - 1)
                    })
                    .collect();
            }
            _ => {}
        }
        init
    }
}

impl<'s, 't> Parser<'s, 't> {
    /// Initializer for a local: `MemZero(var), assignments...`.
    pub(crate) fn lvar_initializer(&mut self, var: &ObjRef) -> Result<Node, Fatal> {
        let tok = self.peek().clone();
        let ty = var.borrow().ty.clone();
        if matches!(ty.kind, TypeKind::Vla { .. }) {
            self.error_tok(&tok, "variable-sized object may not be initialized".to_string())?;
        }

        let mut init = Initializer::new(self, ty, true);
        self.initializer2(&mut init)?;
        var.borrow_mut().ty = init.ty.clone();

        let zero = Node::new(NodeKind::MemZero(var.clone()), Type::void(), tok.clone());
        let desg = InitDesg::Var(var.clone());
        let assigns = self.create_lvar_init(&init, &desg, &tok)?;
        let ty = init.ty.clone();
        Ok(Node::new(
            NodeKind::Comma(Box::new(zero), Box::new(assigns)),
            ty,
            tok,
        ))
    }

    /// Initializer for a global: fill `init_data` and relocations.
    pub(crate) fn gvar_initializer(&mut self, var: &ObjRef) -> Result<(), Fatal> {
        let tok = self.peek().clone();
        let ty = var.borrow().ty.clone();
        let mut init = Initializer::new(self, ty, true);
        self.initializer2(&mut init)?;
        var.borrow_mut().ty = init.ty.clone();

        let size = self.sess.tags.size_of(&init.ty).max(0) as usize;
        let mut buf = vec![0u8; size];
        let mut rels: Vec<Relocation> = Vec::new();
        self.write_gvar_data(&init, 0, &mut buf, &mut rels, &tok)?;

        let mut o = var.borrow_mut();
        o.init_data = Some(buf);
        o.rel = rels;
        Ok(())
    }

    // ----- parsing -----

    fn initializer2(&mut self, init: &mut Initializer) -> Result<(), Fatal> {
        let ty = init.ty.clone();

        if ty.is_array() {
            // String literal initializer, optionally braced.
            if let Some(lit) = self.peek_string() {
                self.advance();
                self.string_initializer(init, &lit);
                return Ok(());
            }
            if self.at("{") {
                if let TokenKind::Str(lit) = &self.peek_at(1).kind {
                    let lit = lit.clone();
                    if self.peek_at(2).is("}") {
                        self.advance();
                        self.advance();
                        self.string_initializer(init, &lit);
                        self.expect("}")?;
                        return Ok(());
                    }
                }
                return self.array_initializer_braced(init);
            }
            return self.array_initializer_unbraced(init);
        }

        if matches!(ty.kind, TypeKind::Struct(_)) {
            if self.at("{") {
                return self.struct_initializer_braced(init);
            }
            // A struct may be initialized from another struct value.
            let mark = self.mark();
            let expr = self.assign()?;
            if self.sess.tags.is_compatible(&expr.ty, &ty) {
                init.expr = Some(expr);
                return Ok(());
            }
            self.reset(mark);
            return self.struct_initializer_unbraced(init);
        }

        if matches!(ty.kind, TypeKind::Union(_)) {
            return self.union_initializer(init);
        }

        // Scalar, possibly in redundant braces.
        if self.eat("{") {
            self.initializer2(init)?;
            self.expect("}")?;
            return Ok(());
        }
        let expr = self.assign()?;
        let expr = self.decay(expr);
        let expr = if ty.is_error() || expr.ty.is_error() {
            expr
        } else {
            self.cast_to(expr, ty)
        };
        init.expr = Some(expr);
        Ok(())
    }

    fn peek_string(&self) -> Option<StrLit> {
        match &self.peek().kind {
            TokenKind::Str(lit) => Some(lit.clone()),
            _ => None,
        }
    }

    fn string_initializer(&mut self, init: &mut Initializer, lit: &StrLit) {
        let (base, len) = match &init.ty.kind {
            TypeKind::Array { base, len } => ((**base).clone(), *len),
            _ => return,
        };
        let elems = lit.len() as i64;
        if init.is_flexible {
            init.ty = array_of(base.clone(), elems);
            init.children = (0..elems)
                .map(|_| Initializer::new(self, base.clone(), false))
                .collect();
            init.is_flexible = false;
        }

        let width = lit.kind.width();
        let n = (init.children.len() as i64).min(if len < 0 { elems } else { len });
        for i in 0..n as usize {
            let val = match lit.kind {
                StrKind::Char => lit.bytes.get(i).copied().unwrap_or(0) as i64,
                StrKind::Utf16 => {
                    let off = i * width;
                    u16::from_le_bytes([
                        lit.bytes.get(off).copied().unwrap_or(0),
                        lit.bytes.get(off + 1).copied().unwrap_or(0),
                    ]) as i64
                }
                StrKind::Utf32 => {
                    let off = i * width;
                    u32::from_le_bytes([
                        lit.bytes.get(off).copied().unwrap_or(0),
                        lit.bytes.get(off + 1).copied().unwrap_or(0),
                        lit.bytes.get(off + 2).copied().unwrap_or(0),
                        lit.bytes.get(off + 3).copied().unwrap_or(0),
                    ]) as i64
                }
            };
            init.children[i].expr = Some(Node::num(val, base.clone(), self.peek().clone()));
        }
    }

    /// `{ ... }` with `[index]` and `[a ... b]` designators.
    fn array_initializer_braced(&mut self, init: &mut Initializer) -> Result<(), Fatal> {
        self.expect("{")?;
        let base = match &init.ty.kind {
            TypeKind::Array { base, .. } => (**base).clone(),
            _ => Type::error(),
        };

        let mut max_index: i64 = 0;
        let mut i: i64 = 0;
        let mut first = true;
        while !self.consume_end() {
            if !first {
                self.expect(",")?;
                if self.consume_end() {
                    break;
                }
            }
            first = false;

            if self.at("[") {
                let tok = self.advance();
                let begin = self.const_expr()?;
                let end = if self.eat("...") {
                    self.const_expr()?
                } else {
                    begin
                };
                self.expect("]")?;
                if begin < 0 || end < begin {
                    self.error_tok(&tok, "invalid array designator".to_string())?;
                    continue;
                }
                self.eat("=");

                self.grow_array(init, &base, end + 1);
                if end as usize >= init.children.len() {
                    self.error_tok(
                        &tok,
                        "array designator index exceeds array bounds".to_string(),
                    )?;
                    self.skip_excess_element()?;
                    continue;
                }
                // A range re-parses the same initializer per index.
                let mark = self.mark();
                for idx in begin..=end {
                    self.reset(mark);
                    let mut child = std::mem::replace(
                        &mut init.children[idx as usize],
                        Initializer::new_scalar(base.clone()),
                    );
                    self.initializer2(&mut child)?;
                    init.children[idx as usize] = child;
                }
                max_index = max_index.max(end + 1);
                i = end + 1;
                continue;
            }

            self.grow_array(init, &base, i + 1);
            if (i as usize) < init.children.len() {
                let mut child = std::mem::replace(
                    &mut init.children[i as usize],
                    Initializer::new_scalar(base.clone()),
                );
                self.initializer2(&mut child)?;
                init.children[i as usize] = child;
            } else {
                let tok = self.peek().clone();
                self.warn_tok(&tok, "excess elements in array initializer".to_string())?;
                self.skip_excess_element()?;
            }
            i += 1;
            max_index = max_index.max(i);
        }

        if init.is_flexible {
            init.ty = array_of(base, max_index);
            init.children.truncate(max_index as usize);
            init.is_flexible = false;
        }
        Ok(())
    }

    /// Unbraced array elements inside an enclosing initializer.
    fn array_initializer_unbraced(&mut self, init: &mut Initializer) -> Result<(), Fatal> {
        let base = match &init.ty.kind {
            TypeKind::Array { base, .. } => (**base).clone(),
            _ => Type::error(),
        };
        if init.is_flexible {
            // Count elements by a speculative scan, then parse for real.
            let count = self.speculate(|p| {
                let mut n: i64 = 0;
                loop {
                    if p.at("}") || p.at(";") || p.peek().is_eof() {
                        break;
                    }
                    if n > 0 && !p.eat(",") {
                        break;
                    }
                    let mut probe = Initializer::new(p, base.clone(), false);
                    p.initializer2(&mut probe)?;
                    n += 1;
                }
                Ok(n)
            })?;
            init.ty = array_of(base.clone(), count);
            init.children = (0..count)
                .map(|_| Initializer::new(self, base.clone(), false))
                .collect();
            init.is_flexible = false;
        }

        let n = init.children.len();
        for idx in 0..n {
            if idx > 0 && !self.eat(",") {
                break;
            }
            if self.at("}") {
                break;
            }
            let mut child = std::mem::replace(
                &mut init.children[idx],
                Initializer::new_scalar(base.clone()),
            );
            self.initializer2(&mut child)?;
            init.children[idx] = child;
        }
        Ok(())
    }

    fn grow_array(&mut self, init: &mut Initializer, base: &Type, len: i64) {
        if !init.is_flexible {
            return;
        }
        while (init.children.len() as i64) < len {
            init.children.push(Initializer::new(self, base.clone(), false));
        }
    }

    /// `{ ... }` with `.member` designators.
    fn struct_initializer_braced(&mut self, init: &mut Initializer) -> Result<(), Fatal> {
        self.expect("{")?;
        let members = self.members_of(&init.ty);

        let mut idx = 0usize;
        let mut first = true;
        while !self.consume_end() {
            if !first {
                self.expect(",")?;
                if self.consume_end() {
                    break;
                }
            }
            first = false;

            if self.at(".") {
                self.advance();
                let name_tok = self.peek().clone();
                if !name_tok.is_ident() {
                    self.error_tok(&name_tok, "expected a member designator".to_string())?;
                    self.skip_excess_element()?;
                    continue;
                }
                self.advance();
                self.eat("=");
                match members
                    .iter()
                    .position(|m| m.name.as_ref().map(|t| &*t.text == &*name_tok.text).unwrap_or(false))
                {
                    Some(pos) => {
                        let mut child = std::mem::replace(
                            &mut init.children[pos],
                            Initializer::new_scalar(Type::error()),
                        );
                        self.initializer2(&mut child)?;
                        init.children[pos] = child;
                        idx = pos + 1;
                    }
                    None => {
                        self.error_tok(
                            &name_tok,
                            format!("no member named '{}'", name_tok.text),
                        )?;
                        self.skip_excess_element()?;
                    }
                }
                continue;
            }

            if idx < init.children.len() {
                let mut child = std::mem::replace(
                    &mut init.children[idx],
                    Initializer::new_scalar(Type::error()),
                );
                self.initializer2(&mut child)?;
                init.children[idx] = child;
                idx += 1;
            } else {
                let tok = self.peek().clone();
                self.warn_tok(&tok, "excess elements in struct initializer".to_string())?;
                self.skip_excess_element()?;
            }
        }
        Ok(())
    }

    fn struct_initializer_unbraced(&mut self, init: &mut Initializer) -> Result<(), Fatal> {
        let n = init.children.len();
        for idx in 0..n {
            if idx > 0 && !self.eat(",") {
                break;
            }
            if self.at("}") {
                break;
            }
            let mut child = std::mem::replace(
                &mut init.children[idx],
                Initializer::new_scalar(Type::error()),
            );
            self.initializer2(&mut child)?;
            init.children[idx] = child;
        }
        Ok(())
    }

    fn union_initializer(&mut self, init: &mut Initializer) -> Result<(), Fatal> {
        let members = self.members_of(&init.ty);
        let braced = self.eat("{");

        // `.member =` selects which union member is active.
        if braced && self.at(".") {
            self.advance();
            let name_tok = self.peek().clone();
            if name_tok.is_ident() {
                self.advance();
                self.eat("=");
                match members
                    .iter()
                    .position(|m| m.name.as_ref().map(|t| &*t.text == &*name_tok.text).unwrap_or(false))
                {
                    Some(pos) => {
                        init.chosen = Some(pos);
                        let mut child = std::mem::replace(
                            &mut init.children[pos],
                            Initializer::new_scalar(Type::error()),
                        );
                        self.initializer2(&mut child)?;
                        init.children[pos] = child;
                    }
                    None => {
                        self.error_tok(
                            &name_tok,
                            format!("no member named '{}'", name_tok.text),
                        )?;
                        self.skip_excess_element()?;
                    }
                }
            }
            self.eat(",");
            self.expect("}")?;
            return Ok(());
        }

        if !init.children.is_empty() {
            init.chosen = Some(0);
            let mut child = std::mem::replace(
                &mut init.children[0],
                Initializer::new_scalar(Type::error()),
            );
            self.initializer2(&mut child)?;
            init.children[0] = child;
        }
        if braced {
            self.eat(",");
            self.expect("}")?;
        }
        Ok(())
    }

    fn members_of(&self, ty: &Type) -> Vec<Member> {
        match &ty.kind {
            TypeKind::Struct(id) | TypeKind::Union(id) => {
                self.sess.tags.def(*id).members.clone().unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }

    fn consume_end(&mut self) -> bool {
        if self.eat("}") {
            return true;
        }
        if self.at(",") && self.peek_at(1).is("}") {
            self.advance();
            self.advance();
            return true;
        }
        false
    }

    fn skip_excess_element(&mut self) -> Result<(), Fatal> {
        if self.eat("{") {
            let mut depth = 0usize;
            while !self.peek().is_eof() {
                let t = self.advance();
                if t.is("{") {
                    depth += 1;
                } else if t.is("}") {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
            }
            return Ok(());
        }
        self.assign()?;
        Ok(())
    }

    // ----- flattening: locals -----

    fn init_desg_expr(&mut self, desg: &InitDesg, tok: &Token) -> Result<Node, Fatal> {
        match desg {
            InitDesg::Var(obj) => Ok(Node::var(obj.clone(), tok.clone())),
            InitDesg::Idx(parent, i) => {
                let base = self.init_desg_expr(parent, tok)?;
                let idx = Node::num(*i, Type::long(), tok.clone());
                let sum = self.new_add(base, idx, tok.clone())?;
                let ty = sum.ty.base().cloned().unwrap_or_else(Type::error);
                Ok(Node::new(NodeKind::Deref(Box::new(sum)), ty, tok.clone()))
            }
            InitDesg::Member(parent, member) => {
                let base = self.init_desg_expr(parent, tok)?;
                Ok(Node::new(
                    NodeKind::Member {
                        base: Box::new(base),
                        member: member.clone(),
                    },
                    member.ty.clone(),
                    tok.clone(),
                ))
            }
        }
    }

    fn create_lvar_init(
        &mut self,
        init: &Initializer,
        desg: &InitDesg,
        tok: &Token,
    ) -> Result<Node, Fatal> {
        match &init.ty.kind {
            TypeKind::Array { .. } if init.expr.is_none() => {
                let mut node = Node::null(tok.clone());
                for (i, child) in init.children.iter().enumerate() {
                    let d = InitDesg::Idx(Box::new(clone_desg(desg)), i as i64);
                    let rhs = self.create_lvar_init(child, &d, tok)?;
                    node = comma(node, rhs, tok);
                }
                Ok(node)
            }
            TypeKind::Struct(_) if init.expr.is_none() => {
                let members = self.members_of(&init.ty);
                let mut node = Node::null(tok.clone());
                for (child, m) in init.children.iter().zip(members) {
                    let d = InitDesg::Member(Box::new(clone_desg(desg)), m);
                    let rhs = self.create_lvar_init(child, &d, tok)?;
                    node = comma(node, rhs, tok);
                }
                Ok(node)
            }
            TypeKind::Union(_) if init.expr.is_none() => {
                let Some(idx) = init.chosen else {
                    return Ok(Node::null(tok.clone()));
                };
                let members = self.members_of(&init.ty);
                let Some(m) = members.into_iter().nth(idx) else {
                    return Ok(Node::null(tok.clone()));
                };
                let d = InitDesg::Member(Box::new(clone_desg(desg)), m);
                self.create_lvar_init(&init.children[idx], &d, tok)
            }
            _ => match &init.expr {
                Some(expr) => {
                    let lhs = self.init_desg_expr(desg, tok)?;
                    self.new_assign(lhs, expr.clone(), tok.clone())
                }
                None => Ok(Node::null(tok.clone())),
            },
        }
    }

    // ----- flattening: globals -----

    fn write_gvar_data(
        &mut self,
        init: &Initializer,
        offset: i64,
        buf: &mut Vec<u8>,
        rels: &mut Vec<Relocation>,
        tok: &Token,
    ) -> Result<(), Fatal> {
        match &init.ty.kind {
            TypeKind::Array { base, .. } if init.expr.is_none() => {
                let step = self.sess.tags.size_of(base).max(0);
                for (i, child) in init.children.iter().enumerate() {
                    self.write_gvar_data(child, offset + step * i as i64, buf, rels, tok)?;
                }
                Ok(())
            }
            TypeKind::Struct(_) if init.expr.is_none() => {
                let members = self.members_of(&init.ty);
                for (child, m) in init.children.iter().zip(members) {
                    if m.is_bitfield {
                        let Some(expr) = &child.expr else { continue };
                        let val = match eval_no_label(expr) {
                            Ok(v) => v,
                            Err(e) => {
                                self.error_tok(&e.tok, e.msg)?;
                                0
                            }
                        };
                        self.write_bitfield(buf, offset + m.offset, &m, val);
                    } else {
                        self.write_gvar_data(child, offset + m.offset, buf, rels, tok)?;
                    }
                }
                Ok(())
            }
            TypeKind::Union(_) if init.expr.is_none() => {
                if let Some(idx) = init.chosen {
                    let members = self.members_of(&init.ty);
                    if let Some(m) = members.get(idx) {
                        if m.is_bitfield {
                            if let Some(expr) = &init.children[idx].expr {
                                let val = eval_no_label(expr).unwrap_or(0);
                                self.write_bitfield(buf, offset + m.offset, m, val);
                                return Ok(());
                            }
                        }
                        return self.write_gvar_data(&init.children[idx], offset + m.offset, buf, rels, tok);
                    }
                }
                Ok(())
            }
            _ => {
                let Some(expr) = &init.expr else {
                    return Ok(());
                };

                // Aggregate copied from a compound literal: the literal
                // is already a hoisted global with its own bytes.
                if matches!(init.ty.kind, TypeKind::Struct(_) | TypeKind::Union(_)) {
                    if let NodeKind::Var(obj) = &expr.kind {
                        if let Some(data) = obj.borrow().init_data.clone() {
                            write_bytes(buf, offset, &data);
                            return Ok(());
                        }
                    }
                    self.error_tok(
                        &expr.tok,
                        "initializer element is not a compile-time constant".to_string(),
                    )?;
                    return Ok(());
                }

                if init.ty.is_flonum() {
                    let val = match eval_double(expr) {
                        Ok(v) => v,
                        Err(e) => {
                            self.error_tok(&e.tok, e.msg)?;
                            0.0
                        }
                    };
                    match init.ty.kind {
                        TypeKind::Float => {
                            write_bytes(buf, offset, &(val as f32).to_le_bytes())
                        }
                        _ => write_bytes(buf, offset, &val.to_le_bytes()),
                    }
                    return Ok(());
                }

                let mut label: Option<Rc<str>> = None;
                let val = match eval(expr, &mut label) {
                    Ok(v) => v,
                    Err(e) => {
                        self.error_tok(&e.tok, e.msg)?;
                        0
                    }
                };
                if let Some(label) = label {
                    rels.push(Relocation {
                        offset,
                        label,
                        addend: val,
                    });
                    return Ok(());
                }
                let size = self.sess.tags.size_of(&init.ty).clamp(0, 8) as usize;
                write_bytes(buf, offset, &val.to_le_bytes()[..size]);
                Ok(())
            }
        }
    }

    fn write_bitfield(&self, buf: &mut Vec<u8>, unit_offset: i64, m: &Member, val: i64) {
        // Read-modify-write the bitfield's unit, little-endian.
        let size = self.sess.tags.size_of(&m.ty).clamp(1, 8) as usize;
        ensure_len(buf, unit_offset as usize + size);
        let mut unit = 0u64;
        for i in 0..size {
            unit |= (buf[unit_offset as usize + i] as u64) << (8 * i);
        }
        let mask = if m.bit_width >= 64 {
            u64::MAX
        } else {
            (1u64 << m.bit_width) - 1
        };
        unit &= !(mask << m.bit_offset);
        unit |= ((val as u64) & mask) << m.bit_offset;
        for i in 0..size {
            buf[unit_offset as usize + i] = (unit >> (8 * i)) as u8;
        }
    }
}

impl Initializer {
    fn new_scalar(ty: Type) -> Initializer {
        Initializer {
            ty,
            is_flexible: false,
            expr: None,
            children: Vec::new(),
            chosen: None,
        }
    }
}

fn clone_desg(desg: &InitDesg) -> InitDesg {
    match desg {
        InitDesg::Var(o) => InitDesg::Var(o.clone()),
        InitDesg::Idx(p, i) => InitDesg::Idx(Box::new(clone_desg(p)), *i),
        InitDesg::Member(p, m) => InitDesg::Member(Box::new(clone_desg(p)), m.clone()),
    }
}

fn comma(lhs: Node, rhs: Node, tok: &Token) -> Node {
    if rhs.is_null() {
        return lhs;
    }
    if lhs.is_null() {
        return rhs;
    }
    Node::new(
        NodeKind::Comma(Box::new(lhs), Box::new(rhs)),
        Type::void(),
        tok.clone(),
    )
}

fn ensure_len(buf: &mut Vec<u8>, len: usize) {
    if buf.len() < len {
        buf.resize(len, 0);
    }
}

fn write_bytes(buf: &mut Vec<u8>, offset: i64, bytes: &[u8]) {
    let offset = offset.max(0) as usize;
    ensure_len(buf, offset + bytes.len());
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}
