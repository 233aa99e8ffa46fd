//! S-expression AST printer
//!
//! Functions print as `(function name : return-type)` followed by
//! indented `params:` and `body:` sections; each node prints as
//! `(kind : type)` with labeled children. Intended for eyeballing parser
//! output, not round-tripping.

use std::io::{self, Write};

use crate::ast::{Node, NodeKind, ObjRef};
use crate::session::Session;

pub fn print_ast(w: &mut dyn Write, sess: &Session, prog: &[ObjRef]) -> io::Result<()> {
    for obj in prog {
        let o = obj.borrow();
        if o.is_function {
            let ret = o
                .ty
                .func()
                .map(|f| sess.tags.display(&f.return_ty))
                .unwrap_or_else(|| "nil".to_string());
            writeln!(w, "(function {} : {})", o.name, ret)?;

            if !o.params.is_empty() {
                writeln!(w, "  params:")?;
                for p in &o.params {
                    let p = p.borrow();
                    writeln!(w, "    ({} : {})", p.name, sess.tags.display(&p.ty))?;
                }
            }
            if let Some(body) = &o.body {
                writeln!(w, "  body:")?;
                print_node(w, sess, body, 2)?;
            }
            writeln!(w)?;
        } else {
            write!(w, "(var {} : {}", o.name, sess.tags.display(&o.ty))?;
            if o.is_static {
                write!(w, " static")?;
            }
            if o.is_extern && !o.is_definition {
                write!(w, " extern")?;
            }
            if o.is_tls {
                write!(w, " tls")?;
            }
            writeln!(w, ")")?;
        }
    }
    Ok(())
}

fn indent(w: &mut dyn Write, depth: usize) -> io::Result<()> {
    for _ in 0..depth {
        write!(w, "  ")?;
    }
    Ok(())
}

fn node_name(node: &Node) -> &'static str {
    match &node.kind {
        NodeKind::NullExpr => "null-expr",
        NodeKind::Add(..) => "add",
        NodeKind::Sub(..) => "sub",
        NodeKind::Mul(..) => "mul",
        NodeKind::Div(..) => "div",
        NodeKind::Mod(..) => "mod",
        NodeKind::BitAnd(..) => "bitand",
        NodeKind::BitOr(..) => "bitor",
        NodeKind::BitXor(..) => "bitxor",
        NodeKind::Shl(..) => "shl",
        NodeKind::Shr(..) => "shr",
        NodeKind::Eq(..) => "eq",
        NodeKind::Ne(..) => "ne",
        NodeKind::Lt(..) => "lt",
        NodeKind::Le(..) => "le",
        NodeKind::Assign(..) => "assign",
        NodeKind::Comma(..) => "comma",
        NodeKind::LogAnd(..) => "logand",
        NodeKind::LogOr(..) => "logor",
        NodeKind::Neg(..) => "neg",
        NodeKind::Not(..) => "not",
        NodeKind::BitNot(..) => "bitnot",
        NodeKind::Addr(..) => "addr",
        NodeKind::Deref(..) => "deref",
        NodeKind::Cast(..) => "cast",
        NodeKind::Cond { .. } => "cond",
        NodeKind::Member { .. } => "member",
        NodeKind::Return(..) => "return",
        NodeKind::If { .. } => "if",
        NodeKind::For { .. } => "for",
        NodeKind::Do { .. } => "do",
        NodeKind::Switch { .. } => "switch",
        NodeKind::Case { .. } => "case",
        NodeKind::Block(..) => "block",
        NodeKind::Goto { .. } => "goto",
        NodeKind::GotoExpr(..) => "goto-expr",
        NodeKind::Label { .. } => "label",
        NodeKind::LabelVal { .. } => "label-val",
        NodeKind::FunCall { .. } => "call",
        NodeKind::ExprStmt(..) => "expr-stmt",
        NodeKind::StmtExpr(..) => "stmt-expr",
        NodeKind::Var(..) => "var",
        NodeKind::VlaPtr(..) => "vla-ptr",
        NodeKind::Num { .. } => "num",
        NodeKind::MemZero(..) => "memzero",
        NodeKind::Asm(..) => "asm",
        NodeKind::Cas { .. } => "cas",
        NodeKind::Exch { .. } => "exch",
        NodeKind::BlockLiteral { .. } => "block-literal",
        NodeKind::BlockCall { .. } => "block-call",
    }
}

/// Print a labeled child one level deeper than its parent.
fn labeled(
    w: &mut dyn Write,
    sess: &Session,
    label: &str,
    node: &Node,
    depth: usize,
) -> io::Result<()> {
    indent(w, depth + 1)?;
    writeln!(w, "{}:", label)?;
    print_node(w, sess, node, depth + 2)
}

fn print_node(w: &mut dyn Write, sess: &Session, node: &Node, depth: usize) -> io::Result<()> {
    indent(w, depth)?;
    write!(w, "({} : {}", node_name(node), sess.tags.display(&node.ty))?;
    match &node.kind {
        NodeKind::Num { ival, fval } => {
            if node.ty.is_flonum() {
                write!(w, " {}", fval)?;
            } else {
                write!(w, " {}", ival)?;
            }
        }
        NodeKind::Var(obj) | NodeKind::VlaPtr(obj) | NodeKind::MemZero(obj) => {
            write!(w, " {}", obj.borrow().name)?;
        }
        NodeKind::Member { member, .. } => {
            if let Some(name) = &member.name {
                write!(w, " {}", name.text)?;
            }
        }
        NodeKind::Goto { label, .. } => write!(w, " {}", label)?,
        NodeKind::Label { name, .. } => write!(w, " {}", name)?,
        NodeKind::LabelVal { label, .. } => write!(w, " {}", label)?,
        NodeKind::Case { begin, end, .. } => {
            if end < begin {
                write!(w, " default")?;
            } else if begin == end {
                write!(w, " {}", begin)?;
            } else {
                write!(w, " {}...{}", begin, end)?;
            }
        }
        NodeKind::Asm(text) => write!(w, " {:?}", text)?,
        _ => {}
    }
    writeln!(w, ")")?;

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
        | NodeKind::Assign(a, b)
        | NodeKind::Comma(a, b)
        | NodeKind::LogAnd(a, b)
        | NodeKind::LogOr(a, b) => {
            labeled(w, sess, "lhs", a, depth)?;
            labeled(w, sess, "rhs", b, depth)?;
        }
        NodeKind::Neg(a)
        | NodeKind::Not(a)
        | NodeKind::BitNot(a)
        | NodeKind::Addr(a)
        | NodeKind::Deref(a)
        | NodeKind::Cast(a)
        | NodeKind::ExprStmt(a)
        | NodeKind::GotoExpr(a) => labeled(w, sess, "lhs", a, depth)?,
        NodeKind::Cond { cond, then, els } => {
            labeled(w, sess, "cond", cond, depth)?;
            labeled(w, sess, "then", then, depth)?;
            labeled(w, sess, "else", els, depth)?;
        }
        NodeKind::Member { base, .. } => labeled(w, sess, "lhs", base, depth)?,
        NodeKind::Return(Some(v)) => labeled(w, sess, "lhs", v, depth)?,
        NodeKind::If { cond, then, els } => {
            labeled(w, sess, "cond", cond, depth)?;
            labeled(w, sess, "then", then, depth)?;
            if let Some(els) = els {
                labeled(w, sess, "else", els, depth)?;
            }
        }
        NodeKind::For {
            init,
            cond,
            inc,
            body,
            ..
        } => {
            if let Some(init) = init {
                labeled(w, sess, "init", init, depth)?;
            }
            if let Some(cond) = cond {
                labeled(w, sess, "cond", cond, depth)?;
            }
            if let Some(inc) = inc {
                labeled(w, sess, "inc", inc, depth)?;
            }
            labeled(w, sess, "body", body, depth)?;
        }
        NodeKind::Do { body, cond, .. } => {
            labeled(w, sess, "body", body, depth)?;
            labeled(w, sess, "cond", cond, depth)?;
        }
        NodeKind::Switch { cond, body, .. } => {
            labeled(w, sess, "cond", cond, depth)?;
            labeled(w, sess, "body", body, depth)?;
        }
        NodeKind::Case { stmt, .. } | NodeKind::Label { stmt, .. } => labeled(w, sess, "body", stmt, depth)?,
        NodeKind::Block(stmts) | NodeKind::StmtExpr(stmts) => {
            if !stmts.is_empty() {
                indent(w, depth + 1)?;
                writeln!(w, "body:")?;
                for stmt in stmts {
                    print_node(w, sess, stmt, depth + 2)?;
                }
            }
        }
        NodeKind::FunCall { func, args, .. } => {
            labeled(w, sess, "lhs", func, depth)?;
            if !args.is_empty() {
                indent(w, depth + 1)?;
                writeln!(w, "args:")?;
                for arg in args {
                    print_node(w, sess, arg, depth + 2)?;
                }
            }
        }
        NodeKind::BlockCall { callee, args } => {
            labeled(w, sess, "lhs", callee, depth)?;
            for arg in args {
                print_node(w, sess, arg, depth + 2)?;
            }
        }
        NodeKind::Cas { addr, old, new } => {
            labeled(w, sess, "addr", addr, depth)?;
            labeled(w, sess, "old", old, depth)?;
            labeled(w, sess, "new", new, depth)?;
        }
        NodeKind::Exch { addr, val } => {
            labeled(w, sess, "addr", addr, depth)?;
            labeled(w, sess, "val", val, depth)?;
        }
        NodeKind::BlockLiteral { func, .. } => {
            let f = func.borrow();
            if let Some(body) = &f.body {
                labeled(w, sess, "body", body, depth)?;
            }
        }
        _ => {}
    }
    Ok(())
}
