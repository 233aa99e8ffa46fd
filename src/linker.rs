//! Linking of parsed translation units
//!
//! Merges multiple top-level declaration lists into one program: for each
//! name a definition is preferred over a declaration, two definitions are
//! an error, the canonical type and initializer propagate to every
//! reference, and the output preserves first-seen order with no
//! duplicate names.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::ObjRef;
use crate::diag::Fatal;
use crate::session::Session;

pub fn link_progs(sess: &mut Session, progs: Vec<Vec<ObjRef>>) -> Result<Vec<ObjRef>, Fatal> {
    if progs.len() <= 1 {
        // A single unit links to itself unchanged.
        return Ok(progs.into_iter().next().unwrap_or_default());
    }

    // First pass: pick the canonical object per name, preferring
    // definitions.
    let mut canonical: FxHashMap<Rc<str>, ObjRef> = FxHashMap::default();
    for prog in &progs {
        for obj in prog {
            let name = obj.borrow().name.clone();
            match canonical.get(&name) {
                None => {
                    canonical.insert(name, obj.clone());
                }
                Some(existing) if Rc::ptr_eq(existing, obj) => {}
                Some(existing) => {
                    let obj_is_def = obj.borrow().provides_definition();
                    let existing_is_def = existing.borrow().provides_definition();
                    if obj_is_def && existing_is_def {
                        let tok = obj.borrow().tok.clone();
                        if let Some(tok) = tok {
                            sess.error_tok(&tok, format!("redefinition of '{}'", name))?;
                        } else {
                            sess.diags.error(
                                Rc::from("<link>"),
                                1,
                                1,
                                format!("redefinition of '{}'", name),
                            )?;
                        }
                    } else if obj_is_def {
                        // The later definition supersedes the earlier
                        // declaration; the declaration picks up its type
                        // and initializer for AST consumers.
                        let (ty, init, is_def) = {
                            let o = obj.borrow();
                            (o.ty.clone(), o.init_data.clone(), o.is_definition)
                        };
                        {
                            let mut e = existing.borrow_mut();
                            e.ty = ty;
                            e.init_data = init;
                            e.is_definition = is_def;
                        }
                        canonical.insert(name, obj.clone());
                    } else if existing_is_def {
                        let (ty, init, is_def) = {
                            let e = existing.borrow();
                            (e.ty.clone(), e.init_data.clone(), e.is_definition)
                        };
                        let mut o = obj.borrow_mut();
                        o.ty = ty;
                        o.init_data = init;
                        o.is_definition = is_def;
                    }
                    // Both declarations: the first stays canonical.
                }
            }
        }
    }

    // Second pass: emit canonical objects in first-seen order and point
    // the leftovers at the canonical type.
    let mut merged: Vec<ObjRef> = Vec::new();
    let mut emitted: FxHashMap<Rc<str>, ()> = FxHashMap::default();
    for prog in &progs {
        for obj in prog {
            let name = obj.borrow().name.clone();
            let canon = match canonical.get(&name) {
                Some(c) => c.clone(),
                None => continue,
            };
            if !Rc::ptr_eq(&canon, obj) {
                let (ty, init, is_def) = {
                    let c = canon.borrow();
                    (c.ty.clone(), c.init_data.clone(), c.is_definition)
                };
                let mut o = obj.borrow_mut();
                o.ty = ty;
                o.init_data = init;
                o.is_definition = is_def;
            }
            if Rc::ptr_eq(&canon, obj) && emitted.insert(name, ()).is_none() {
                merged.push(obj.clone());
            }
        }
    }
    Ok(merged)
}
