//! JSON declaration dump for FFI binding generators
//!
//! Emits `{functions, variables, structs, unions, enums}` with
//! recursively serialized types, storage classes and source positions.
//! Hidden compiler-generated names (hoisted string literals, synthesized
//! tags) are omitted.

use std::io::{self, Write};

use serde_json::{json, Map, Value};

use crate::ast::ObjRef;
use crate::ctype::{TagKind, Type, TypeKind};
use crate::session::Session;

pub fn output_json(w: &mut dyn Write, sess: &Session, prog: &[ObjRef]) -> io::Result<()> {
    let mut functions: Vec<Value> = Vec::new();
    let mut variables: Vec<Value> = Vec::new();

    for obj in prog {
        let o = obj.borrow();
        if is_hidden(&o.name) {
            continue;
        }
        let mut entry = Map::new();
        entry.insert("name".into(), json!(&*o.name));
        entry.insert("type".into(), type_json(sess, &o.ty));
        entry.insert("storage".into(), json!(storage_of(&o)));
        if let Some(tok) = &o.tok {
            entry.insert("file".into(), json!(&*tok.filename));
            entry.insert("line".into(), json!(tok.display_line()));
        }
        if o.is_function {
            entry.insert("is_definition".into(), json!(o.is_definition));
            if o.is_inline {
                entry.insert("inline".into(), json!(true));
            }
            functions.push(Value::Object(entry));
        } else {
            if o.is_tls {
                entry.insert("thread_local".into(), json!(true));
            }
            variables.push(Value::Object(entry));
        }
    }

    let mut structs: Vec<Value> = Vec::new();
    let mut unions: Vec<Value> = Vec::new();
    let mut enums: Vec<Value> = Vec::new();
    for id in 0..sess.tags.len() {
        let def = sess.tags.def(id as u32);
        if is_hidden(&def.name) {
            continue;
        }
        match def.kind {
            TagKind::Struct | TagKind::Union => {
                let Some(members) = &def.members else { continue };
                let members: Vec<Value> = members
                    .iter()
                    .map(|m| {
                        let mut entry = Map::new();
                        if let Some(name) = &m.name {
                            entry.insert("name".into(), json!(&*name.text));
                        }
                        entry.insert("type".into(), type_json(sess, &m.ty));
                        entry.insert("offset".into(), json!(m.offset));
                        if m.is_bitfield {
                            entry.insert("bit_offset".into(), json!(m.bit_offset));
                            entry.insert("bit_width".into(), json!(m.bit_width));
                        }
                        Value::Object(entry)
                    })
                    .collect();
                let entry = json!({
                    "name": &*def.name,
                    "size": def.size,
                    "align": def.align,
                    "members": members,
                });
                if def.kind == TagKind::Struct {
                    structs.push(entry);
                } else {
                    unions.push(entry);
                }
            }
            TagKind::Enum => {
                if def.size <= 0 {
                    continue;
                }
                let values: Vec<Value> = def
                    .enum_constants
                    .iter()
                    .map(|(name, val)| json!({"name": &**name, "value": val}))
                    .collect();
                enums.push(json!({"name": &*def.name, "values": values}));
            }
        }
    }

    let doc = json!({
        "functions": functions,
        "variables": variables,
        "structs": structs,
        "unions": unions,
        "enums": enums,
    });
    serde_json::to_writer_pretty(&mut *w, &doc)?;
    writeln!(w)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with(".L..") || name.is_empty()
}

fn storage_of(o: &crate::ast::Obj) -> &'static str {
    if o.is_static {
        "static"
    } else if o.is_extern && !o.is_definition {
        "extern"
    } else {
        "none"
    }
}

fn type_json(sess: &Session, ty: &Type) -> Value {
    let mut entry = Map::new();
    let kind = match &ty.kind {
        TypeKind::Void => "void",
        TypeKind::Bool => "bool",
        TypeKind::Char => "char",
        TypeKind::Short => "short",
        TypeKind::Int => "int",
        TypeKind::Long => "long",
        TypeKind::Float => "float",
        TypeKind::Double => "double",
        TypeKind::LDouble => "long double",
        TypeKind::Enum(_) => "enum",
        TypeKind::Ptr(_) => "pointer",
        TypeKind::Array { .. } => "array",
        TypeKind::Vla { .. } => "vla",
        TypeKind::Func(_) => "function",
        TypeKind::Struct(_) => "struct",
        TypeKind::Union(_) => "union",
        TypeKind::Block(_) => "block",
        TypeKind::Error => "error",
    };
    entry.insert("kind".into(), json!(kind));

    if ty.is_unsigned && ty.is_integer() {
        entry.insert("unsigned".into(), json!(true));
    }
    if ty.is_const {
        entry.insert("const".into(), json!(true));
    }
    if ty.is_volatile {
        entry.insert("volatile".into(), json!(true));
    }
    if ty.is_atomic {
        entry.insert("atomic".into(), json!(true));
    }

    match &ty.kind {
        TypeKind::Ptr(base) => {
            entry.insert("base".into(), type_json(sess, base));
        }
        TypeKind::Array { base, len } => {
            entry.insert("base".into(), type_json(sess, base));
            entry.insert("length".into(), json!(len));
        }
        TypeKind::Vla { base, .. } => {
            entry.insert("base".into(), type_json(sess, base));
        }
        TypeKind::Func(f) | TypeKind::Block(f) => {
            entry.insert("return".into(), type_json(sess, &f.return_ty));
            let params: Vec<Value> = f
                .params
                .iter()
                .map(|p| {
                    let mut param = Map::new();
                    if let Some(name) = &p.name {
                        param.insert("name".into(), json!(&*name.text));
                    }
                    param.insert("type".into(), type_json(sess, &p.ty));
                    Value::Object(param)
                })
                .collect();
            entry.insert("params".into(), json!(params));
            if f.is_variadic {
                entry.insert("variadic".into(), json!(true));
            }
        }
        TypeKind::Struct(id) | TypeKind::Union(id) | TypeKind::Enum(id) => {
            entry.insert("tag".into(), json!(&*sess.tags.def(*id).name));
        }
        _ => {}
    }
    Value::Object(entry)
}
