//! C declaration/statement/expression parser
//!
//! Hand-written recursive descent with one-token lookahead, plus the
//! classical typedef-name disambiguation: identifier tokens consult the
//! scope chain, and a name bound by `typedef` acts as a type specifier
//! while anything else acts as an expression.
//!
//! The grammar is split across sibling files: [`decl`] for declarations
//! and declarators, [`expr`] for expressions (with type inference and
//! explicit cast insertion), [`stmt`] for statements, and [`init`] for
//! the initializer machinery. All of them are `impl Parser` blocks over
//! the state defined here.

mod decl;
mod expr;
mod init;
mod stmt;

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::{CaseRange, Node, NodeKind, Obj, ObjRef};
use crate::ctype::{TagId, Type};
use crate::diag::Fatal;
use crate::session::Session;
use crate::token::{Token, TokenKind};

/// What a name resolves to in the ordinary-identifier namespace.
#[derive(Debug, Clone)]
pub(crate) enum VarScope {
    Var(ObjRef),
    Typedef(Type),
    EnumConst { val: i64, ty: Type },
}

#[derive(Debug, Default)]
struct ScopeLayer {
    vars: FxHashMap<Rc<str>, VarScope>,
    tags: FxHashMap<Rc<str>, TagId>,
}

/// Collected labels of the switch statement being parsed.
pub(crate) struct SwitchCtx {
    pub cases: Vec<CaseRange>,
    pub default_label: Option<Rc<str>>,
    pub cond_ty: Type,
}

/// Per-block-literal capture tracking: locals not owned by the block's
/// synthetic function that its body references.
pub(crate) struct BlockCtx {
    pub own_locals: Vec<ObjRef>,
    pub captures: Vec<ObjRef>,
}

pub struct Parser<'s, 't> {
    pub(crate) sess: &'s mut Session,
    toks: &'t [Token],
    pos: usize,
    scopes: Vec<ScopeLayer>,
    pub(crate) globals: Vec<ObjRef>,
    pub(crate) locals: Vec<ObjRef>,
    pub(crate) current_fn: Option<ObjRef>,
    /// Labels of the function being parsed: name -> unique label.
    pub(crate) labels: Vec<(Rc<str>, Rc<str>)>,
    pub(crate) brk_label: Option<Rc<str>>,
    pub(crate) cont_label: Option<Rc<str>>,
    pub(crate) cur_switch: Option<SwitchCtx>,
    pub(crate) block_stack: Vec<BlockCtx>,
    /// `#pragma pack` state forwarded by the preprocessor.
    pack_stack: Vec<Option<u32>>,
    pub(crate) cur_pack: Option<u32>,
    /// Set during speculative parses (function-vs-variable lookahead) to
    /// suppress duplicate diagnostics.
    speculating: bool,
}

/// Parse a preprocessed token stream into the list of top-level
/// declarations (globals and functions, in source order).
pub fn parse(sess: &mut Session, toks: &[Token]) -> Result<Vec<ObjRef>, Fatal> {
    if toks.is_empty() {
        return Ok(Vec::new());
    }
    let mut p = Parser {
        sess,
        toks,
        pos: 0,
        scopes: vec![ScopeLayer::default()],
        globals: Vec::new(),
        locals: Vec::new(),
        current_fn: None,
        labels: Vec::new(),
        brk_label: None,
        cont_label: None,
        cur_switch: None,
        block_stack: Vec::new(),
        pack_stack: Vec::new(),
        cur_pack: None,
        speculating: false,
    };

    while !p.peek().is_eof() {
        let before = p.pos;
        p.top_level()?;
        if p.pos == before {
            // Defensive progress guarantee after unrecoverable confusion.
            let tok = p.peek().clone();
            p.sess
                .error_tok(&tok, format!("unexpected token '{}'", tok.text))?;
            p.advance();
        }
    }

    mark_live(&p.globals);
    Ok(p.globals)
}

impl<'s, 't> Parser<'s, 't> {
    // ----- token cursor -----

    pub(crate) fn peek(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    pub(crate) fn peek_at(&self, n: usize) -> &Token {
        &self.toks[(self.pos + n).min(self.toks.len() - 1)]
    }

    pub(crate) fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        } else if !self.toks.is_empty() {
            // Stay parked on EOF.
            self.pos = self.toks.len() - 1;
        }
        tok
    }

    pub(crate) fn mark(&self) -> usize {
        self.pos
    }

    pub(crate) fn reset(&mut self, mark: usize) {
        self.pos = mark;
    }

    pub(crate) fn at(&self, s: &str) -> bool {
        self.peek().is(s)
    }

    pub(crate) fn eat(&mut self, s: &str) -> bool {
        if self.at(s) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume `s` or report an error at the current token. The token is
    /// not consumed on mismatch so the caller's recovery sees it.
    pub(crate) fn expect(&mut self, s: &str) -> Result<Token, Fatal> {
        if self.at(s) {
            return Ok(self.advance());
        }
        let tok = self.peek().clone();
        self.error_tok(&tok, format!("expected '{}' before '{}'", s, tok.text))?;
        Ok(tok)
    }

    /// Diagnostic wrappers that go quiet during speculative parses.
    pub(crate) fn error_tok(&mut self, tok: &Token, msg: String) -> Result<(), Fatal> {
        if self.speculating {
            return Ok(());
        }
        self.sess.error_tok(tok, msg)
    }

    pub(crate) fn warn_tok(&mut self, tok: &Token, msg: String) -> Result<(), Fatal> {
        if self.speculating {
            return Ok(());
        }
        self.sess.warn_tok(tok, msg)
    }

    /// Run `f` with diagnostics suppressed and the cursor restored
    /// afterwards; used for lookahead decisions.
    pub(crate) fn speculate<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Fatal>,
    ) -> Result<T, Fatal> {
        let mark = self.mark();
        let was = self.speculating;
        self.speculating = true;
        let result = f(self);
        self.speculating = was;
        self.reset(mark);
        result
    }

    /// Statement-level resynchronization: skip to the next `;` (consumed)
    /// or `}` (left in place).
    pub(crate) fn sync_stmt(&mut self) {
        loop {
            if self.peek().is_eof() || self.at("}") {
                return;
            }
            if self.eat(";") {
                return;
            }
            self.advance();
        }
    }

    // ----- scopes -----

    pub(crate) fn enter_scope(&mut self) {
        self.scopes.push(ScopeLayer::default());
    }

    pub(crate) fn leave_scope(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn push_var_scope(&mut self, name: Rc<str>, entry: VarScope) {
        self.scopes.last_mut().unwrap().vars.insert(name, entry);
    }

    pub(crate) fn find_var(&self, name: &str) -> Option<VarScope> {
        self.scopes
            .iter()
            .rev()
            .find_map(|layer| layer.vars.get(name))
            .cloned()
    }

    /// True if `name` is already bound in the innermost scope (used for
    /// same-scope redefinition checks).
    pub(crate) fn defined_in_current_scope(&self, name: &str) -> bool {
        self.scopes.last().unwrap().vars.contains_key(name)
    }

    pub(crate) fn push_tag_scope(&mut self, name: Rc<str>, id: TagId) {
        self.scopes.last_mut().unwrap().tags.insert(name, id);
    }

    pub(crate) fn find_tag(&self, name: &str) -> Option<TagId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|layer| layer.tags.get(name))
            .copied()
    }

    pub(crate) fn find_tag_in_current_scope(&self, name: &str) -> Option<TagId> {
        self.scopes.last().unwrap().tags.get(name).copied()
    }

    /// Typedef type bound to an identifier token, if any.
    pub(crate) fn typedef_of(&self, tok: &Token) -> Option<Type> {
        if !tok.is_ident() {
            return None;
        }
        match self.find_var(&tok.text) {
            Some(VarScope::Typedef(ty)) => Some(ty),
            _ => None,
        }
    }

    // ----- variables -----

    pub(crate) fn new_lvar(&mut self, name: Rc<str>, ty: Type) -> ObjRef {
        let obj = Obj::new_ref(name.clone(), ty);
        obj.borrow_mut().is_local = true;
        self.locals.push(obj.clone());
        if let Some(block) = self.block_stack.last_mut() {
            block.own_locals.push(obj.clone());
        }
        if !name.is_empty() {
            self.push_var_scope(name, VarScope::Var(obj.clone()));
        }
        obj
    }

    pub(crate) fn new_gvar(&mut self, name: Rc<str>, ty: Type) -> ObjRef {
        let obj = Obj::new_ref(name.clone(), ty);
        {
            let mut o = obj.borrow_mut();
            o.is_static = true;
            o.is_definition = true;
        }
        self.globals.push(obj.clone());
        if !name.is_empty() {
            self.push_var_scope(name, VarScope::Var(obj.clone()));
        }
        obj
    }

    /// Hoist an anonymous global (string literal, static-local storage).
    pub(crate) fn new_anon_gvar(&mut self, ty: Type) -> ObjRef {
        let name = self.sess.new_unique_name();
        let obj = Obj::new_ref(name, ty);
        {
            let mut o = obj.borrow_mut();
            o.is_static = true;
            o.is_definition = true;
        }
        self.globals.push(obj.clone());
        obj
    }

    /// Record that the function being parsed references `name`, feeding
    /// static-inline liveness.
    pub(crate) fn note_ref(&mut self, name: &Rc<str>) {
        if let Some(fun) = &self.current_fn {
            fun.borrow_mut().refs.push(name.clone());
        }
    }

    // ----- pragma pack -----

    pub(crate) fn handle_pragma_pack(&mut self) -> bool {
        let TokenKind::PragmaPack(dir) = &self.peek().kind else {
            return false;
        };
        let dir = *dir;
        self.advance();
        match dir {
            crate::token::PackDirective::Push(n) => {
                self.pack_stack.push(self.cur_pack);
                if n.is_some() {
                    self.cur_pack = n;
                }
            }
            crate::token::PackDirective::Pop => {
                self.cur_pack = self.pack_stack.pop().flatten();
            }
            crate::token::PackDirective::Set(n) => {
                self.cur_pack = n;
            }
        }
        true
    }

    // ----- label resolution -----

    /// Bind every `goto` and `&&label` in a finished function body to its
    /// label's unique name; unbound gotos are errors.
    pub(crate) fn resolve_gotos(&mut self, body: &mut Node) -> Result<(), Fatal> {
        let labels = std::mem::take(&mut self.labels);
        let mut errors: Vec<(Token, Rc<str>)> = Vec::new();
        resolve_gotos_rec(body, &labels, &mut errors);
        for (tok, name) in errors {
            self.sess
                .error_tok(&tok, format!("use of undeclared label '{}'", name))?;
        }
        Ok(())
    }
}

fn resolve_gotos_rec(
    node: &mut Node,
    labels: &[(Rc<str>, Rc<str>)],
    errors: &mut Vec<(Token, Rc<str>)>,
) {
    match &mut node.kind {
        NodeKind::Goto {
            label,
            unique_label,
        }
        | NodeKind::LabelVal {
            label,
            unique_label,
        } => {
            if unique_label.is_empty() {
                match labels.iter().find(|(n, _)| n == label) {
                    Some((_, unique)) => *unique_label = unique.clone(),
                    None => errors.push((node.tok.clone(), label.clone())),
                }
            }
        }
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
        | NodeKind::Assign(a, b)
        | NodeKind::Comma(a, b)
        | NodeKind::LogAnd(a, b)
        | NodeKind::LogOr(a, b) => {
            resolve_gotos_rec(a, labels, errors);
            resolve_gotos_rec(b, labels, errors);
        }
        NodeKind::Neg(a)
        | NodeKind::Not(a)
        | NodeKind::BitNot(a)
        | NodeKind::Addr(a)
        | NodeKind::Deref(a)
        | NodeKind::Cast(a)
        | NodeKind::ExprStmt(a)
        | NodeKind::GotoExpr(a) => resolve_gotos_rec(a, labels, errors),
        NodeKind::Cond { cond, then, els } => {
            resolve_gotos_rec(cond, labels, errors);
            resolve_gotos_rec(then, labels, errors);
            resolve_gotos_rec(els, labels, errors);
        }
        NodeKind::Member { base, .. } => resolve_gotos_rec(base, labels, errors),
        NodeKind::Return(v) => {
            if let Some(v) = v {
                resolve_gotos_rec(v, labels, errors);
            }
        }
        NodeKind::If { cond, then, els } => {
            resolve_gotos_rec(cond, labels, errors);
            resolve_gotos_rec(then, labels, errors);
            if let Some(els) = els {
                resolve_gotos_rec(els, labels, errors);
            }
        }
        NodeKind::For {
            init,
            cond,
            inc,
            body,
            ..
        } => {
            for n in [init, cond, inc].into_iter().flatten() {
                resolve_gotos_rec(n, labels, errors);
            }
            resolve_gotos_rec(body, labels, errors);
        }
        NodeKind::Do { body, cond, .. } => {
            resolve_gotos_rec(body, labels, errors);
            resolve_gotos_rec(cond, labels, errors);
        }
        NodeKind::Switch { cond, body, .. } => {
            resolve_gotos_rec(cond, labels, errors);
            resolve_gotos_rec(body, labels, errors);
        }
        NodeKind::Case { stmt, .. } => resolve_gotos_rec(stmt, labels, errors),
        NodeKind::Label { stmt, .. } => resolve_gotos_rec(stmt, labels, errors),
        NodeKind::Block(body) | NodeKind::StmtExpr(body) => {
            for n in body {
                resolve_gotos_rec(n, labels, errors);
            }
        }
        NodeKind::FunCall { func, args, .. } => {
            resolve_gotos_rec(func, labels, errors);
            for a in args {
                resolve_gotos_rec(a, labels, errors);
            }
        }
        NodeKind::BlockCall { callee, args } => {
            resolve_gotos_rec(callee, labels, errors);
            for a in args {
                resolve_gotos_rec(a, labels, errors);
            }
        }
        NodeKind::Cas { addr, old, new } => {
            resolve_gotos_rec(addr, labels, errors);
            resolve_gotos_rec(old, labels, errors);
            resolve_gotos_rec(new, labels, errors);
        }
        NodeKind::Exch { addr, val } => {
            resolve_gotos_rec(addr, labels, errors);
            resolve_gotos_rec(val, labels, errors);
        }
        // Block literals resolve their own labels when parsed.
        NodeKind::BlockLiteral { .. }
        | NodeKind::NullExpr
        | NodeKind::Var(_)
        | NodeKind::VlaPtr(_)
        | NodeKind::Num { .. }
        | NodeKind::MemZero(_)
        | NodeKind::Asm(_) => {}
    }
}

/// Static-inline liveness: a `static inline` function is live iff it is
/// reachable from an externally visible root. Runs per translation unit
/// at the end of `parse`, before any linking.
fn mark_live(globals: &[ObjRef]) {
    let mut by_name: FxHashMap<Rc<str>, ObjRef> = FxHashMap::default();
    for obj in globals {
        let o = obj.borrow();
        if o.is_function {
            by_name.insert(o.name.clone(), obj.clone());
        }
    }

    let mut stack: Vec<ObjRef> = Vec::new();
    for obj in globals {
        let mut o = obj.borrow_mut();
        if o.is_function {
            o.is_root = !(o.is_static && o.is_inline);
            if o.is_root && o.is_definition {
                drop(o);
                stack.push(obj.clone());
            }
        }
    }

    while let Some(obj) = stack.pop() {
        {
            let mut o = obj.borrow_mut();
            if o.is_live {
                continue;
            }
            o.is_live = true;
        }
        let refs: Vec<Rc<str>> = obj.borrow().refs.clone();
        for name in refs {
            if let Some(callee) = by_name.get(&name) {
                if !callee.borrow().is_live {
                    stack.push(callee.clone());
                }
            }
        }
    }
}
