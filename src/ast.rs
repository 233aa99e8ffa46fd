//! AST node and declaration definitions
//!
//! Every [`Node`] carries its resolved [`Type`] and a representative
//! token; nodes produced during error recovery get the `error` type,
//! never a missing one. Declarations ([`Obj`]) are shared via
//! `Rc<RefCell<_>>` between the scope chain, the nodes that reference
//! them and the top-level program list, mirroring the arena-backed
//! cross-references of the original design.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ctype::{FuncType, Member, Type};
use crate::token::Token;

pub type ObjRef = Rc<RefCell<Obj>>;

/// A label-backed hole in a global initializer: the slot at `offset`
/// holds the address of `label` plus `addend`.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub offset: i64,
    pub label: Rc<str>,
    pub addend: i64,
}

/// Inclusive case range (`case a ... b:`; `a == b` for a plain case).
#[derive(Debug, Clone)]
pub struct CaseRange {
    pub begin: i64,
    pub end: i64,
    pub label: Rc<str>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Does nothing; appears where a statement is required but recovery
    /// consumed the real one.
    NullExpr,
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Mod(Box<Node>, Box<Node>),
    BitAnd(Box<Node>, Box<Node>),
    BitOr(Box<Node>, Box<Node>),
    BitXor(Box<Node>, Box<Node>),
    Shl(Box<Node>, Box<Node>),
    Shr(Box<Node>, Box<Node>),
    Eq(Box<Node>, Box<Node>),
    Ne(Box<Node>, Box<Node>),
    Lt(Box<Node>, Box<Node>),
    Le(Box<Node>, Box<Node>),
    Assign(Box<Node>, Box<Node>),
    Comma(Box<Node>, Box<Node>),
    LogAnd(Box<Node>, Box<Node>),
    LogOr(Box<Node>, Box<Node>),
    Neg(Box<Node>),
    Not(Box<Node>),
    BitNot(Box<Node>),
    Addr(Box<Node>),
    Deref(Box<Node>),
    Cast(Box<Node>),
    Cond {
        cond: Box<Node>,
        then: Box<Node>,
        els: Box<Node>,
    },
    Member {
        base: Box<Node>,
        member: Member,
    },
    Return(Option<Box<Node>>),
    If {
        cond: Box<Node>,
        then: Box<Node>,
        els: Option<Box<Node>>,
    },
    /// `for` and `while` share one shape; `while` has no init/inc.
    For {
        init: Option<Box<Node>>,
        cond: Option<Box<Node>>,
        inc: Option<Box<Node>>,
        body: Box<Node>,
        brk_label: Rc<str>,
        cont_label: Rc<str>,
    },
    Do {
        body: Box<Node>,
        cond: Box<Node>,
        brk_label: Rc<str>,
        cont_label: Rc<str>,
    },
    Switch {
        cond: Box<Node>,
        body: Box<Node>,
        cases: Vec<CaseRange>,
        default_label: Option<Rc<str>>,
        brk_label: Rc<str>,
    },
    Case {
        begin: i64,
        end: i64,
        label: Rc<str>,
        stmt: Box<Node>,
    },
    Block(Vec<Node>),
    Goto {
        label: Rc<str>,
        unique_label: Rc<str>,
    },
    /// [GNU] `goto *expr`.
    GotoExpr(Box<Node>),
    Label {
        name: Rc<str>,
        unique_label: Rc<str>,
        stmt: Box<Node>,
    },
    /// [GNU] `&&label`, a label used as a value.
    LabelVal {
        label: Rc<str>,
        unique_label: Rc<str>,
    },
    FunCall {
        func: Box<Node>,
        func_ty: Box<FuncType>,
        args: Vec<Node>,
    },
    ExprStmt(Box<Node>),
    /// [GNU] statement expression `({ ... })`.
    StmtExpr(Vec<Node>),
    Var(ObjRef),
    /// Pointer to a VLA's storage.
    VlaPtr(ObjRef),
    Num {
        ival: i64,
        fval: f64,
    },
    /// Zero-clear a stack variable before element-wise initialization.
    MemZero(ObjRef),
    Asm(Rc<str>),
    /// Atomic compare-and-swap `__builtin_compare_and_swap(addr, old, new)`.
    Cas {
        addr: Box<Node>,
        old: Box<Node>,
        new: Box<Node>,
    },
    /// Atomic exchange `__builtin_atomic_exchange(addr, val)`.
    Exch {
        addr: Box<Node>,
        val: Box<Node>,
    },
    /// Apple block literal `^ret(args){...}`: a synthetic function plus
    /// the variables it captures from the enclosing scope.
    BlockLiteral {
        func: ObjRef,
        captures: Vec<ObjRef>,
    },
    /// Invocation of a block value.
    BlockCall {
        callee: Box<Node>,
        args: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub ty: Type,
    pub tok: Token,
}

impl Node {
    pub fn new(kind: NodeKind, ty: Type, tok: Token) -> Node {
        Node { kind, ty, tok }
    }

    pub fn num(ival: i64, ty: Type, tok: Token) -> Node {
        Node::new(NodeKind::Num { ival, fval: 0.0 }, ty, tok)
    }

    pub fn fnum(fval: f64, ty: Type, tok: Token) -> Node {
        Node::new(NodeKind::Num { ival: 0, fval }, ty, tok)
    }

    pub fn var(obj: ObjRef, tok: Token) -> Node {
        let ty = obj.borrow().ty.clone();
        Node::new(NodeKind::Var(obj), ty, tok)
    }

    pub fn null(tok: Token) -> Node {
        Node::new(NodeKind::NullExpr, Type::void(), tok)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, NodeKind::NullExpr)
    }
}

/// A named declaration: global variable, function, or local.
#[derive(Debug)]
pub struct Obj {
    pub name: Rc<str>,
    pub ty: Type,
    pub tok: Option<Token>,
    pub is_local: bool,
    pub align: i64,

    // Locals.
    pub is_param: bool,
    pub is_captured: bool,

    // Globals and functions.
    pub is_function: bool,
    pub is_definition: bool,
    pub is_static: bool,
    pub is_extern: bool,
    pub is_inline: bool,
    pub is_tls: bool,
    pub is_constexpr: bool,
    pub is_tentative: bool,

    // Global variable initializer.
    pub init_data: Option<Vec<u8>>,
    pub rel: Vec<Relocation>,
    pub init_expr: Option<Node>,

    // Function.
    pub params: Vec<ObjRef>,
    pub body: Option<Node>,
    pub locals: Vec<ObjRef>,

    // Block literal support.
    pub is_block: bool,
    pub captures: Vec<ObjRef>,

    // Static-inline liveness.
    pub is_live: bool,
    pub is_root: bool,
    pub refs: Vec<Rc<str>>,
}

impl Obj {
    pub fn new(name: Rc<str>, ty: Type) -> Obj {
        Obj {
            name,
            ty,
            tok: None,
            is_local: false,
            align: 0,
            is_param: false,
            is_captured: false,
            is_function: false,
            is_definition: false,
            is_static: false,
            is_extern: false,
            is_inline: false,
            is_tls: false,
            is_constexpr: false,
            is_tentative: false,
            init_data: None,
            rel: Vec::new(),
            init_expr: None,
            params: Vec::new(),
            body: None,
            locals: Vec::new(),
            is_block: false,
            captures: Vec::new(),
            is_live: false,
            is_root: false,
            refs: Vec::new(),
        }
    }

    pub fn new_ref(name: Rc<str>, ty: Type) -> ObjRef {
        Rc::new(RefCell::new(Obj::new(name, ty)))
    }

    /// True when this object provides storage or a body, not just a
    /// declaration.
    pub fn provides_definition(&self) -> bool {
        self.is_definition
            || (self.is_function && self.body.is_some())
            || (!self.is_function && self.init_data.is_some())
    }
}
