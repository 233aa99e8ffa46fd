//! Declaration parsing: declaration specifiers, declarators, aggregates
//!
//! Covers external declarations (functions and globals), block-scope
//! declarations, typedefs, struct/union/enum specifiers with layout,
//! bitfields, `_Alignas`, `_Static_assert`, `__attribute__`, and the
//! function-vs-variable disambiguation at top level.

use std::rc::Rc;

use crate::ast::{Node, NodeKind, Obj, ObjRef};
use crate::ctype::{
    array_of, func_type, pointer_to, vla_of, FuncParam, Member, TagId, TagKind, Type, TypeKind,
};
use crate::diag::Fatal;
use crate::token::{Token, TokenKind};

use super::{Parser, VarScope};

/// Storage-class and alignment attributes gathered by `declspec`.
#[derive(Debug, Default, Clone)]
pub(crate) struct VarAttr {
    pub is_typedef: bool,
    pub is_static: bool,
    pub is_extern: bool,
    pub is_inline: bool,
    pub is_tls: bool,
    pub is_constexpr: bool,
    pub align: Option<i64>,
}

/// `__attribute__((...))` effects relevant to layout.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AttrInfo {
    pub packed: bool,
    pub align: Option<i64>,
}

#[derive(Debug, Clone)]
pub(crate) struct Declarator {
    pub ty: Type,
    pub name: Option<Token>,
}

// Type-specifier counting bits; two `long`s are representable because the
// bit is added, not or-ed.
const K_VOID: u32 = 1 << 0;
const K_BOOL: u32 = 1 << 2;
const K_CHAR: u32 = 1 << 4;
const K_SHORT: u32 = 1 << 6;
const K_INT: u32 = 1 << 8;
const K_LONG: u32 = 1 << 10;
const K_FLOAT: u32 = 1 << 12;
const K_DOUBLE: u32 = 1 << 14;
const K_OTHER: u32 = 1 << 16;
const K_SIGNED: u32 = 1 << 17;
const K_UNSIGNED: u32 = 1 << 18;

impl<'s, 't> Parser<'s, 't> {
    /// One top-level item: function, global, typedef or stray pragma.
    pub(crate) fn top_level(&mut self) -> Result<(), Fatal> {
        if self.handle_pragma_pack() {
            return Ok(());
        }
        if self.at("_Static_assert") || self.at("static_assert") {
            return self.static_assert();
        }
        if self.eat(";") {
            return Ok(());
        }
        if self.at("asm") || self.at("__asm") || self.at("__asm__") {
            // Top-level asm("...") has no declaration to attach to.
            self.asm_stmt()?;
            self.eat(";");
            return Ok(());
        }

        let mut attr = VarAttr::default();
        let basety = self.declspec(Some(&mut attr))?;

        if attr.is_typedef {
            return self.parse_typedef(basety);
        }

        let is_func = self.speculate(|p| {
            if p.at(";") {
                return Ok(false);
            }
            let d = p.declarator(basety.clone())?;
            Ok(d.ty.is_func() && d.name.is_some())
        })?;

        if is_func {
            self.function(basety, &attr)
        } else {
            self.global_variable(basety, &attr)
        }
    }

    /// `_Static_assert ( const-expr [, "message"] ) ;`
    pub(crate) fn static_assert(&mut self) -> Result<(), Fatal> {
        let tok = self.advance();
        self.expect("(")?;
        let val = self.const_expr()?;
        let msg = if self.eat(",") {
            match &self.peek().kind {
                TokenKind::Str(lit) => {
                    let text = lit.raw.to_string();
                    self.advance();
                    Some(text)
                }
                _ => {
                    let t = self.peek().clone();
                    self.error_tok(&t, "expected a string literal".to_string())?;
                    None
                }
            }
        } else {
            None
        };
        self.expect(")")?;
        self.expect(";")?;
        if val == 0 {
            let msg = msg.unwrap_or_else(|| "static assertion failed".to_string());
            self.error_tok(&tok, format!("static assertion failed: {}", msg))?;
        }
        Ok(())
    }

    /// True if the token can begin declaration specifiers here.
    pub(crate) fn is_typename(&self, tok: &Token) -> bool {
        const SPECS: &[&str] = &[
            "void", "_Bool", "bool", "char", "short", "int", "long", "float", "double", "signed",
            "unsigned", "struct", "union", "enum", "typedef", "static", "extern", "inline",
            "_Thread_local", "thread_local", "__thread", "const", "volatile", "auto", "register",
            "restrict", "__restrict", "__restrict__", "_Noreturn", "_Alignas", "alignas",
            "_Atomic", "constexpr", "__attribute__",
        ];
        if matches!(tok.kind, TokenKind::Keyword) && SPECS.contains(&&*tok.text) {
            return true;
        }
        self.typedef_of(tok).is_some()
    }

    /// Parse declaration specifiers into a type. Storage-class specifiers
    /// are only legal when the caller provides a `VarAttr` to put them in.
    pub(crate) fn declspec(&mut self, mut attr: Option<&mut VarAttr>) -> Result<Type, Fatal> {
        let mut counter: u32 = 0;
        let mut ty = Type::int();
        let mut is_const = false;
        let mut is_volatile = false;
        let mut is_atomic = false;
        let mut attr_info = AttrInfo::default();

        while self.is_typename(self.peek()) {
            let tok = self.peek().clone();

            // Storage-class specifiers.
            if tok.is("typedef")
                || tok.is("static")
                || tok.is("extern")
                || tok.is("inline")
                || tok.is("_Thread_local")
                || tok.is("thread_local")
                || tok.is("__thread")
                || tok.is("constexpr")
            {
                self.advance();
                match attr.as_deref_mut() {
                    Some(a) => {
                        if tok.is("typedef") {
                            a.is_typedef = true;
                        } else if tok.is("static") {
                            a.is_static = true;
                        } else if tok.is("extern") {
                            a.is_extern = true;
                        } else if tok.is("inline") {
                            a.is_inline = true;
                        } else if tok.is("constexpr") {
                            a.is_constexpr = true;
                        } else {
                            a.is_tls = true;
                        }
                        if a.is_typedef
                            && (a.is_static || a.is_extern || a.is_inline || a.is_tls)
                        {
                            self.error_tok(
                                &tok,
                                "typedef may not be used together with other storage classes"
                                    .to_string(),
                            )?;
                        }
                    }
                    None => {
                        self.error_tok(
                            &tok,
                            "storage class specifier is not allowed in this context".to_string(),
                        )?;
                    }
                }
                continue;
            }

            // Qualifiers and no-ops.
            if tok.is("const") {
                is_const = true;
                self.advance();
                continue;
            }
            if tok.is("volatile") {
                is_volatile = true;
                self.advance();
                continue;
            }
            if tok.is("auto")
                || tok.is("register")
                || tok.is("restrict")
                || tok.is("__restrict")
                || tok.is("__restrict__")
                || tok.is("_Noreturn")
            {
                self.advance();
                continue;
            }

            if tok.is("__attribute__") {
                let info = self.attribute_list()?;
                attr_info.packed |= info.packed;
                if info.align.is_some() {
                    attr_info.align = info.align;
                }
                continue;
            }

            if tok.is("_Atomic") {
                self.advance();
                if self.eat("(") {
                    ty = self.typename()?;
                    self.expect(")")?;
                    counter += K_OTHER;
                }
                is_atomic = true;
                continue;
            }

            if tok.is("_Alignas") || tok.is("alignas") {
                self.advance();
                self.expect("(")?;
                let align = if self.is_typename(self.peek()) {
                    let t = self.typename()?;
                    self.sess.tags.align_of(&t)
                } else {
                    self.const_expr()?
                };
                self.expect(")")?;
                match attr.as_deref_mut() {
                    Some(a) => a.align = Some(align),
                    None => attr_info.align = Some(align),
                }
                continue;
            }

            // Aggregates, enums and typedef names only combine with
            // qualifiers, never with other specifiers.
            if tok.is("struct") || tok.is("union") || tok.is("enum") || self.typedef_of(&tok).is_some()
            {
                if counter != 0 {
                    break;
                }
                if tok.is("struct") {
                    self.advance();
                    ty = self.struct_union_decl(TagKind::Struct)?;
                } else if tok.is("union") {
                    self.advance();
                    ty = self.struct_union_decl(TagKind::Union)?;
                } else if tok.is("enum") {
                    self.advance();
                    ty = self.enum_specifier()?;
                } else {
                    ty = self.typedef_of(&tok).unwrap();
                    self.advance();
                }
                counter += K_OTHER;
                continue;
            }

            // Builtin type keywords, counted so invalid combinations are
            // rejected (`long double long`, ...).
            self.advance();
            counter += match &*tok.text {
                "void" => K_VOID,
                "_Bool" | "bool" => K_BOOL,
                "char" => K_CHAR,
                "short" => K_SHORT,
                "int" => K_INT,
                "long" => K_LONG,
                "float" => K_FLOAT,
                "double" => K_DOUBLE,
                "signed" => K_SIGNED,
                "unsigned" => K_UNSIGNED,
                _ => 0,
            };

            ty = match counter {
                K_VOID => Type::void(),
                K_BOOL => Type::bool_(),
                x if x == K_CHAR || x == K_SIGNED + K_CHAR => Type::char_(),
                x if x == K_UNSIGNED + K_CHAR => Type::uchar(),
                x if x == K_SHORT
                    || x == K_SHORT + K_INT
                    || x == K_SIGNED + K_SHORT
                    || x == K_SIGNED + K_SHORT + K_INT =>
                {
                    Type::short()
                }
                x if x == K_UNSIGNED + K_SHORT || x == K_UNSIGNED + K_SHORT + K_INT => {
                    Type::ushort()
                }
                x if x == K_INT || x == K_SIGNED || x == K_SIGNED + K_INT => Type::int(),
                x if x == K_UNSIGNED || x == K_UNSIGNED + K_INT => Type::uint(),
                x if x == K_LONG
                    || x == K_LONG + K_INT
                    || x == K_LONG + K_LONG
                    || x == K_LONG + K_LONG + K_INT
                    || x == K_SIGNED + K_LONG
                    || x == K_SIGNED + K_LONG + K_INT
                    || x == K_SIGNED + K_LONG + K_LONG
                    || x == K_SIGNED + K_LONG + K_LONG + K_INT =>
                {
                    Type::long()
                }
                x if x == K_UNSIGNED + K_LONG
                    || x == K_UNSIGNED + K_LONG + K_INT
                    || x == K_UNSIGNED + K_LONG + K_LONG
                    || x == K_UNSIGNED + K_LONG + K_LONG + K_INT =>
                {
                    Type::ulong()
                }
                K_FLOAT => Type::float(),
                K_DOUBLE => Type::double(),
                x if x == K_LONG + K_DOUBLE => Type::ldouble(),
                _ => {
                    self.error_tok(&tok, "invalid type specifier combination".to_string())?;
                    Type::error()
                }
            };
        }

        if is_const || is_volatile {
            ty = ty.qualified(is_const, is_volatile);
        }
        if is_atomic {
            ty.is_atomic = true;
        }
        if let Some(al) = attr_info.align {
            ty.align = al;
        }
        Ok(ty)
    }

    /// `__attribute__((a, b(n), ...))`, possibly repeated.
    pub(crate) fn attribute_list(&mut self) -> Result<AttrInfo, Fatal> {
        let mut info = AttrInfo::default();
        while self.at("__attribute__") {
            self.advance();
            self.expect("(")?;
            self.expect("(")?;
            while !self.at(")") && !self.peek().is_eof() {
                let name = self.advance();
                match &*name.text {
                    "packed" | "__packed__" => info.packed = true,
                    "aligned" | "__aligned__" => {
                        if self.eat("(") {
                            info.align = Some(self.const_expr()?);
                            self.expect(")")?;
                        } else {
                            info.align = Some(16);
                        }
                    }
                    _ => {
                        // Unknown attribute: skip its argument list.
                        if self.eat("(") {
                            let mut depth = 0usize;
                            loop {
                                if self.peek().is_eof() {
                                    break;
                                }
                                let t = self.advance();
                                if t.is("(") {
                                    depth += 1;
                                } else if t.is(")") {
                                    if depth == 0 {
                                        break;
                                    }
                                    depth -= 1;
                                }
                            }
                        }
                    }
                }
                self.eat(",");
            }
            self.expect(")")?;
            self.expect(")")?;
        }
        Ok(info)
    }

    /// Pointer stars (and block markers) plus qualifiers.
    fn pointers(&mut self, mut ty: Type) -> Result<Type, Fatal> {
        loop {
            if self.eat("*") {
                ty = pointer_to(ty);
            } else if self.at("^") {
                // Block-pointer declarator: `ret (^name)(params)`.
                self.advance();
                ty = match ty.kind {
                    TypeKind::Func(f) => Type::new(TypeKind::Block(f)),
                    _ => pointer_to(ty),
                };
            } else {
                break;
            }
            let mut is_const = false;
            let mut is_volatile = false;
            loop {
                if self.eat("const") {
                    is_const = true;
                } else if self.eat("volatile") {
                    is_volatile = true;
                } else if self.eat("restrict")
                    || self.eat("__restrict")
                    || self.eat("__restrict__")
                    || self.eat("_Atomic")
                {
                    // restrict has no representation.
                } else {
                    break;
                }
            }
            if is_const || is_volatile {
                ty = ty.qualified(is_const, is_volatile);
            }
        }
        Ok(ty)
    }

    /// Declarator: pointers, a possibly-parenthesized name (or nothing,
    /// for abstract declarators), and array/function suffixes.
    pub(crate) fn declarator(&mut self, base: Type) -> Result<Declarator, Fatal> {
        let ty = self.pointers(base)?;

        if self.at("(") && self.is_nested_declarator() {
            // The suffix after the parenthesized group applies to the
            // inner declarator's base, so parse the group twice: once to
            // find its extent, then for real with the suffixed type.
            let open = self.mark();
            self.advance();
            let was = self.speculating;
            self.speculating = true;
            let _ = self.declarator(Type::void());
            self.speculating = was;
            self.expect(")")?;
            let suffixed = self.type_suffix(ty)?;
            let after = self.mark();

            self.reset(open);
            self.advance();
            let d = self.declarator(suffixed)?;
            self.reset(after);
            return Ok(d);
        }

        let name = if self.peek().is_ident() {
            Some(self.advance())
        } else {
            None
        };
        let ty = self.type_suffix(ty)?;
        Ok(Declarator { ty, name })
    }

    /// Disambiguate `(` in declarator position: a nested declarator
    /// rather than a function parameter list. A lone identifier in the
    /// parens is a name even when it collides with a typedef.
    fn is_nested_declarator(&self) -> bool {
        let next = self.peek_at(1);
        if next.is(")") {
            return false;
        }
        if next.is_ident() && self.peek_at(2).is(")") {
            return true;
        }
        !self.is_typename(next)
    }

    /// Array and function suffixes, right to left.
    pub(crate) fn type_suffix(&mut self, ty: Type) -> Result<Type, Fatal> {
        if self.at("(") {
            return self.func_params(ty);
        }
        if self.at("[") {
            return self.array_dimension(ty);
        }
        Ok(ty)
    }

    fn func_params(&mut self, return_ty: Type) -> Result<Type, Fatal> {
        let open = self.advance();

        if return_ty.is_array() {
            self.error_tok(&open, "function returning an array".to_string())?;
        }
        if return_ty.is_func() {
            self.error_tok(&open, "function returning a function".to_string())?;
        }

        // `(void)` is an empty prototype; `()` is an old-style
        // unprototyped declaration.
        if self.at("void") && self.peek_at(1).is(")") {
            self.advance();
            self.advance();
            return Ok(func_type(return_ty, Vec::new(), false));
        }
        if self.eat(")") {
            let mut ty = func_type(return_ty, Vec::new(), false);
            if let TypeKind::Func(f) = &mut ty.kind {
                f.is_unprototyped = true;
            }
            return Ok(ty);
        }

        let mut params: Vec<FuncParam> = Vec::new();
        let mut variadic = false;
        loop {
            if !params.is_empty() && !self.eat(",") {
                break;
            }
            if self.eat("...") {
                variadic = true;
                break;
            }
            let base = self.declspec(None)?;
            let d = self.declarator(base)?;
            let mut pty = d.ty;
            // Array and function parameters decay to pointers.
            if let Some(base) = pty.base() {
                if pty.is_array() {
                    pty = pointer_to(base.clone());
                }
            } else if pty.is_func() {
                pty = pointer_to(pty);
            }
            params.push(FuncParam { name: d.name, ty: pty });
            if self.at(")") {
                break;
            }
        }
        self.expect(")")?;
        Ok(func_type(return_ty, params, variadic))
    }

    fn array_dimension(&mut self, ty: Type) -> Result<Type, Fatal> {
        let open = self.advance();
        // `static` and qualifiers inside [] only matter for parameters.
        while self.eat("static")
            || self.eat("const")
            || self.eat("volatile")
            || self.eat("restrict")
            || self.eat("__restrict")
            || self.eat("__restrict__")
        {}

        if self.eat("]") {
            let base = self.type_suffix(ty)?;
            if base.is_func() {
                self.error_tok(&open, "array of functions".to_string())?;
                return Ok(Type::error());
            }
            return Ok(array_of(base, -1));
        }

        let len_expr = self.conditional()?;
        self.expect("]")?;
        let base = self.type_suffix(ty)?;
        if base.is_func() {
            self.error_tok(&open, "array of functions".to_string())?;
            return Ok(Type::error());
        }

        // A constant-shaped bound that fails to fold (division by zero,
        // overflow) is an error; only genuinely runtime bounds are VLAs.
        if !super::expr::is_const_shape(&len_expr) {
            return Ok(vla_of(base, len_expr));
        }
        match self.try_eval(&len_expr) {
            Some(len) if len >= 0 => Ok(array_of(base, len)),
            Some(_) => {
                self.error_tok(&open, "array size is negative".to_string())?;
                Ok(array_of(base, 1))
            }
            None => {
                let _ = self.const_expr_diagnose(&len_expr)?;
                Ok(array_of(base, 1))
            }
        }
    }

    /// Report why a constant-shaped expression failed to fold.
    fn const_expr_diagnose(&mut self, node: &Node) -> Result<i64, Fatal> {
        match super::expr::eval_no_label(node) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.error_tok(&e.tok, e.msg)?;
                Ok(0)
            }
        }
    }

    /// Type name for casts, `sizeof`, `_Alignof`: declspec plus an
    /// abstract declarator.
    pub(crate) fn typename(&mut self) -> Result<Type, Fatal> {
        let base = self.declspec(None)?;
        let d = self.declarator(base)?;
        if let Some(name) = &d.name {
            self.error_tok(name, "type name must not declare an identifier".to_string())?;
        }
        Ok(d.ty)
    }

    // ----- aggregates -----

    fn struct_union_decl(&mut self, kind: TagKind) -> Result<Type, Fatal> {
        let mut attrs = self.attribute_list()?;

        let tag = if self.peek().is_ident() {
            Some(self.advance())
        } else {
            None
        };

        let make_ty = |kind: TagKind, id: TagId| match kind {
            TagKind::Struct => Type::new(TypeKind::Struct(id)),
            TagKind::Union => Type::new(TypeKind::Union(id)),
            TagKind::Enum => Type::new(TypeKind::Enum(id)),
        };

        // Reference or forward declaration.
        if let Some(tag) = &tag {
            if !self.at("{") {
                if let Some(id) = self.find_tag(&tag.text) {
                    if self.sess.tags.def(id).kind != kind {
                        self.error_tok(
                            tag,
                            format!("'{}' defined as a different kind of tag", tag.text),
                        )?;
                        return Ok(Type::error());
                    }
                    return Ok(make_ty(kind, id));
                }
                let id = self.sess.tags.declare(kind, tag.text.clone());
                self.push_tag_scope(tag.text.clone(), id);
                return Ok(make_ty(kind, id));
            }
        }

        self.expect("{")?;

        // A definition completes an incomplete tag declared in the same
        // scope, or introduces a fresh one.
        let id = match &tag {
            Some(tag) => match self.find_tag_in_current_scope(&tag.text) {
                Some(id) if !self.sess.tags.is_complete(id) => id,
                Some(_) => {
                    self.error_tok(tag, format!("redefinition of '{}'", tag.text))?;
                    self.sess.tags.declare(kind, tag.text.clone())
                }
                None => {
                    let id = self.sess.tags.declare(kind, tag.text.clone());
                    self.push_tag_scope(tag.text.clone(), id);
                    id
                }
            },
            None => {
                let name = self.sess.new_unique_name();
                self.sess.tags.declare(kind, name)
            }
        };

        let members = self.struct_members()?;
        let trailing = self.attribute_list()?;
        attrs.packed |= trailing.packed;
        if trailing.align.is_some() {
            attrs.align = trailing.align;
        }

        let pack = self.cur_pack;
        self.sess
            .tags
            .complete_aggregate(id, members, pack, attrs.packed, attrs.align);
        Ok(make_ty(kind, id))
    }

    fn struct_members(&mut self) -> Result<Vec<Member>, Fatal> {
        let mut members: Vec<Member> = Vec::new();

        while !self.at("}") && !self.peek().is_eof() {
            if self.handle_pragma_pack() {
                continue;
            }
            if self.at("_Static_assert") || self.at("static_assert") {
                self.static_assert()?;
                continue;
            }

            let mut attr = VarAttr::default();
            let basety = self.declspec(Some(&mut attr))?;
            if attr.is_typedef || attr.is_static || attr.is_extern {
                let t = self.peek().clone();
                self.error_tok(&t, "storage class specifier in struct member".to_string())?;
            }

            // Anonymous struct/union member: `struct { ... };`
            if self.at(";")
                && matches!(basety.kind, TypeKind::Struct(_) | TypeKind::Union(_))
            {
                self.advance();
                members.push(Member {
                    name: None,
                    ty: basety,
                    idx: members.len(),
                    align: attr.align.unwrap_or(0),
                    offset: 0,
                    is_bitfield: false,
                    bit_offset: 0,
                    bit_width: 0,
                });
                continue;
            }

            let mut first = true;
            while !self.at(";") && !self.peek().is_eof() {
                if !first {
                    self.expect(",")?;
                }
                first = false;

                // Unnamed bitfield: `int : 3;`
                if self.at(":") {
                    self.advance();
                    let width_tok = self.peek().clone();
                    let width = self.const_expr()?;
                    self.check_bitfield_width(&width_tok, &basety, width, true)?;
                    members.push(Member {
                        name: None,
                        ty: basety.clone(),
                        idx: members.len(),
                        align: 0,
                        offset: 0,
                        is_bitfield: true,
                        bit_offset: 0,
                        bit_width: width.max(0),
                    });
                    continue;
                }

                let d = self.declarator(basety.clone())?;
                let member_attrs = self.attribute_list()?;

                let mut m = Member {
                    name: d.name.clone(),
                    ty: d.ty,
                    idx: members.len(),
                    align: member_attrs.align.or(attr.align).unwrap_or(0),
                    offset: 0,
                    is_bitfield: false,
                    bit_offset: 0,
                    bit_width: 0,
                };
                if self.eat(":") {
                    let width_tok = self.peek().clone();
                    let width = self.const_expr()?;
                    self.check_bitfield_width(&width_tok, &m.ty, width, false)?;
                    m.is_bitfield = true;
                    m.bit_width = width.max(0);
                }
                members.push(m);
            }
            self.expect(";")?;
        }
        self.expect("}")?;

        // Only the last member may have an incomplete (flexible) array
        // type.
        let n = members.len();
        for (i, m) in members.iter().enumerate() {
            if i + 1 < n && m.ty.is_array() && self.sess.tags.size_of(&m.ty) < 0 {
                if let Some(name) = &m.name {
                    let name = name.clone();
                    self.error_tok(&name, "flexible array member is not at the end of the struct".to_string())?;
                }
            }
        }
        Ok(members)
    }

    fn check_bitfield_width(
        &mut self,
        tok: &Token,
        ty: &Type,
        width: i64,
        unnamed: bool,
    ) -> Result<(), Fatal> {
        if !ty.is_integer() {
            self.error_tok(tok, "bit-field has non-integer type".to_string())?;
            return Ok(());
        }
        let max = self.sess.tags.size_of(ty) * 8;
        if width < 0 {
            self.error_tok(tok, "bit-field has negative width".to_string())?;
        } else if width == 0 && !unnamed {
            self.error_tok(tok, "named bit-field has zero width".to_string())?;
        } else if width > max {
            self.error_tok(tok, format!("bit-field width exceeds its type ({} bits)", max))?;
        }
        Ok(())
    }

    fn enum_specifier(&mut self) -> Result<Type, Fatal> {
        self.attribute_list()?;
        let tag = if self.peek().is_ident() {
            Some(self.advance())
        } else {
            None
        };

        if let Some(tag) = &tag {
            if !self.at("{") {
                if let Some(id) = self.find_tag(&tag.text) {
                    if self.sess.tags.def(id).kind != TagKind::Enum {
                        self.error_tok(
                            tag,
                            format!("'{}' defined as a different kind of tag", tag.text),
                        )?;
                        return Ok(Type::error());
                    }
                    return Ok(Type::new(TypeKind::Enum(id)));
                }
                let id = self.sess.tags.declare(TagKind::Enum, tag.text.clone());
                self.push_tag_scope(tag.text.clone(), id);
                return Ok(Type::new(TypeKind::Enum(id)));
            }
        }

        self.expect("{")?;
        let id = match &tag {
            Some(tag) => match self.find_tag_in_current_scope(&tag.text) {
                Some(id) if !self.sess.tags.is_complete(id) => id,
                Some(_) => {
                    self.error_tok(tag, format!("redefinition of '{}'", tag.text))?;
                    self.sess.tags.declare(TagKind::Enum, tag.text.clone())
                }
                None => {
                    let id = self.sess.tags.declare(TagKind::Enum, tag.text.clone());
                    self.push_tag_scope(tag.text.clone(), id);
                    id
                }
            },
            None => {
                let name = self.sess.new_unique_name();
                self.sess.tags.declare(TagKind::Enum, name)
            }
        };

        let mut constants: Vec<(Rc<str>, i64)> = Vec::new();
        let mut val: i64 = 0;
        let mut first = true;
        while !self.at("}") && !self.peek().is_eof() {
            if !first {
                self.expect(",")?;
                if self.at("}") {
                    break; // trailing comma
                }
            }
            first = false;

            let name_tok = self.peek().clone();
            if !name_tok.is_ident() {
                self.error_tok(&name_tok, "expected an enumerator name".to_string())?;
                self.sync_stmt();
                break;
            }
            self.advance();
            if self.eat("=") {
                val = self.const_expr()?;
            }
            if self.defined_in_current_scope(&name_tok.text) {
                self.error_tok(&name_tok, format!("redefinition of '{}'", name_tok.text))?;
            }
            constants.push((name_tok.text.clone(), val));
            self.push_var_scope(
                name_tok.text.clone(),
                VarScope::EnumConst {
                    val,
                    ty: Type::int(),
                },
            );
            val = val.wrapping_add(1);
        }
        self.expect("}")?;
        self.attribute_list()?;

        self.sess.tags.complete_enum(id, constants);
        Ok(Type::new(TypeKind::Enum(id)))
    }

    // ----- top-level declarations -----

    pub(crate) fn parse_typedef(&mut self, basety: Type) -> Result<(), Fatal> {
        let mut first = true;
        while !self.at(";") && !self.peek().is_eof() {
            if !first {
                self.expect(",")?;
            }
            first = false;

            let d = self.declarator(basety.clone())?;
            let Some(name) = d.name else {
                let t = self.peek().clone();
                self.error_tok(&t, "typedef name omitted".to_string())?;
                self.sync_stmt();
                return Ok(());
            };
            if self.defined_in_current_scope(&name.text) {
                // Identical redefinition is allowed (C11).
                let same = match self.find_var(&name.text) {
                    Some(VarScope::Typedef(old)) => self.sess.tags.is_compatible(&old, &d.ty),
                    _ => false,
                };
                if !same {
                    self.error_tok(&name, format!("redefinition of '{}'", name.text))?;
                }
            }
            self.push_var_scope(name.text.clone(), VarScope::Typedef(d.ty));
        }
        self.expect(";")?;
        Ok(())
    }

    fn global_variable(&mut self, basety: Type, attr: &VarAttr) -> Result<(), Fatal> {
        let mut first = true;
        while !self.at(";") && !self.peek().is_eof() {
            if !first {
                self.expect(",")?;
            }
            first = false;

            let d = self.declarator(basety.clone())?;
            let Some(name) = d.name.clone() else {
                let t = self.peek().clone();
                self.warn_tok(&t, "declaration does not declare anything".to_string())?;
                self.sync_stmt();
                return Ok(());
            };

            // Redeclarations must agree on the type; at most one may
            // provide an initializer.
            let existing = match self.find_var(&name.text) {
                Some(VarScope::Var(obj)) if !obj.borrow().is_local => Some(obj),
                _ => None,
            };
            if let Some(prev) = &existing {
                let prev_ty = prev.borrow().ty.clone();
                if !self.sess.tags.is_compatible(&prev_ty, &d.ty) {
                    self.error_tok(
                        &name,
                        format!("conflicting types for '{}'", name.text),
                    )?;
                }
            }

            let obj = match existing {
                Some(obj) => obj,
                None => {
                    let obj = Obj::new_ref(name.text.clone(), d.ty.clone());
                    self.globals.push(obj.clone());
                    self.push_var_scope(name.text.clone(), VarScope::Var(obj.clone()));
                    obj
                }
            };
            {
                let mut o = obj.borrow_mut();
                o.ty = d.ty.clone();
                o.tok = Some(name.clone());
                o.is_static |= attr.is_static;
                o.is_extern |= attr.is_extern;
                o.is_tls |= attr.is_tls;
                o.is_constexpr |= attr.is_constexpr;
                o.is_definition |= !attr.is_extern;
                if let Some(al) = attr.align {
                    o.align = al;
                }
            }

            if self.eat("=") {
                if obj.borrow().init_data.is_some() || obj.borrow().init_expr.is_some() {
                    self.error_tok(&name, format!("redefinition of '{}'", name.text))?;
                }
                self.gvar_initializer(&obj)?;
                let mut o = obj.borrow_mut();
                o.is_definition = true;
                o.is_tentative = false;
            } else {
                let mut o = obj.borrow_mut();
                if attr.is_constexpr {
                    drop(o);
                    self.error_tok(&name, "constexpr variable requires an initializer".to_string())?;
                } else if !attr.is_extern && o.init_data.is_none() {
                    o.is_tentative = true;
                }
            }
        }
        self.expect(";")?;
        Ok(())
    }

    fn function(&mut self, basety: Type, attr: &VarAttr) -> Result<(), Fatal> {
        let d = self.declarator(basety)?;
        let Some(name_tok) = d.name.clone() else {
            let t = self.peek().clone();
            self.error_tok(&t, "function name omitted".to_string())?;
            self.sync_stmt();
            return Ok(());
        };
        let name = name_tok.text.clone();

        let existing = match self.find_var(&name) {
            Some(VarScope::Var(obj)) if obj.borrow().is_function => Some(obj),
            Some(VarScope::Var(_)) | Some(VarScope::Typedef(_)) | Some(VarScope::EnumConst { .. }) => {
                self.error_tok(&name_tok, format!("redefinition of '{}'", name))?;
                None
            }
            None => None,
        };
        if let Some(prev) = &existing {
            let prev_ty = prev.borrow().ty.clone();
            if !self.sess.tags.is_compatible(&prev_ty, &d.ty) {
                self.error_tok(&name_tok, format!("conflicting types for '{}'", name))?;
            }
        }

        let obj = match existing {
            Some(obj) => obj,
            None => {
                let obj = Obj::new_ref(name.clone(), d.ty.clone());
                self.globals.push(obj.clone());
                self.push_var_scope(name.clone(), VarScope::Var(obj.clone()));
                obj
            }
        };
        {
            let mut o = obj.borrow_mut();
            o.is_function = true;
            o.tok = Some(name_tok.clone());
            o.is_static |= attr.is_static;
            o.is_extern |= attr.is_extern;
            o.is_inline |= attr.is_inline;
            // Prototyped redeclarations refine unprototyped ones.
            if !o.is_definition {
                o.ty = d.ty.clone();
            }
        }

        if self.eat(";") {
            return Ok(());
        }

        if obj.borrow().is_definition {
            self.error_tok(&name_tok, format!("redefinition of '{}'", name))?;
        }
        obj.borrow_mut().is_definition = true;
        obj.borrow_mut().ty = d.ty.clone();

        let saved_fn = self.current_fn.replace(obj.clone());
        let saved_locals = std::mem::take(&mut self.locals);
        let saved_labels = std::mem::take(&mut self.labels);

        self.enter_scope();

        let mut params: Vec<ObjRef> = Vec::new();
        if let Some(f) = d.ty.func() {
            for p in &f.params {
                let pname: Rc<str> = p
                    .name
                    .as_ref()
                    .map(|t| t.text.clone())
                    .unwrap_or_else(|| Rc::from(""));
                params.push(self.new_lvar(pname, p.ty.clone()));
            }
        }
        obj.borrow_mut().params = params;

        let mut body = if self.at("{") {
            self.compound_stmt()?
        } else {
            let t = self.peek().clone();
            self.error_tok(&t, "expected function body".to_string())?;
            Node::null(t)
        };
        self.resolve_gotos(&mut body)?;
        self.leave_scope();

        {
            let mut o = obj.borrow_mut();
            o.body = Some(body);
            o.locals = std::mem::take(&mut self.locals);
        }
        self.locals = saved_locals;
        self.labels = saved_labels;
        self.current_fn = saved_fn;
        Ok(())
    }

    /// Block-scope declaration; returns the initialization statements.
    pub(crate) fn declaration(&mut self, basety: Type, attr: &VarAttr) -> Result<Node, Fatal> {
        let decl_tok = self.peek().clone();
        let mut stmts: Vec<Node> = Vec::new();
        let mut first = true;

        while !self.at(";") && !self.peek().is_eof() {
            if !first {
                self.expect(",")?;
            }
            first = false;

            let d = self.declarator(basety.clone())?;
            let Some(name) = d.name.clone() else {
                let t = self.peek().clone();
                self.error_tok(&t, "variable name omitted".to_string())?;
                self.sync_stmt();
                return Ok(Node::new(NodeKind::Block(stmts), Type::void(), decl_tok));
            };

            if d.ty.is_void() {
                self.error_tok(&name, format!("variable '{}' declared void", name.text))?;
                continue;
            }

            // A block-scope function declaration refers to the global.
            if d.ty.is_func() {
                let obj = match self.find_var(&name.text) {
                    Some(VarScope::Var(o)) if o.borrow().is_function => o,
                    _ => {
                        let obj = Obj::new_ref(name.text.clone(), d.ty.clone());
                        obj.borrow_mut().is_function = true;
                        self.globals.push(obj.clone());
                        obj
                    }
                };
                self.push_var_scope(name.text.clone(), VarScope::Var(obj));
                continue;
            }

            if self.defined_in_current_scope(&name.text) {
                self.error_tok(&name, format!("redefinition of '{}'", name.text))?;
            }

            // Static locals live in hoisted global storage under a
            // unique name; the scope entry points at that storage.
            if attr.is_static {
                let storage = self.new_anon_gvar(d.ty.clone());
                storage.borrow_mut().tok = Some(name.clone());
                self.push_var_scope(name.text.clone(), VarScope::Var(storage.clone()));
                if self.eat("=") {
                    self.gvar_initializer(&storage)?;
                }
                continue;
            }

            let obj = self.new_lvar(name.text.clone(), d.ty.clone());
            if let Some(al) = attr.align {
                obj.borrow_mut().align = al;
            }
            obj.borrow_mut().tok = Some(name.clone());

            if self.eat("=") {
                let expr = self.lvar_initializer(&obj)?;
                stmts.push(Node::new(
                    NodeKind::ExprStmt(Box::new(expr)),
                    Type::void(),
                    name.clone(),
                ));
            } else if matches!(d.ty.kind, TypeKind::Array { len: -1, .. }) {
                self.error_tok(&name, "incomplete array type needs an initializer".to_string())?;
            }

            if attr.is_constexpr {
                obj.borrow_mut().is_constexpr = true;
            }
        }
        self.expect(";")?;
        Ok(Node::new(NodeKind::Block(stmts), Type::void(), decl_tok))
    }
}
