// Integration tests for the parser, linker and output stages

use cfront::ast::{NodeKind, ObjRef};
use cfront::ctype::TypeKind;
use cfront::output::{output_json, output_preprocessed, print_ast};
use cfront::Session;

fn session() -> Session {
    let mut sess = Session::new();
    sess.set_collect_errors(true);
    sess
}

fn parse_src(src: &str) -> (Session, Vec<ObjRef>) {
    let mut sess = session();
    let toks = sess
        .preprocess_source("test.c", src)
        .expect("preprocessing failed");
    let objs = sess.parse(&toks).expect("parsing failed");
    assert!(
        !sess.has_errors(),
        "unexpected errors: {:?}",
        sess.error_count()
    );
    (sess, objs)
}

fn json_of(sess: &Session, objs: &[ObjRef]) -> serde_json::Value {
    let mut out = Vec::new();
    output_json(&mut out, sess, objs).expect("json failed");
    serde_json::from_slice(&out).expect("invalid json")
}

#[test]
fn hello_world_parse() {
    let (sess, objs) = parse_src("int main(void) { return 0; }");

    assert_eq!(objs.len(), 1);
    let main = objs[0].borrow();
    assert_eq!(&*main.name, "main");
    assert!(main.is_function);
    assert!(main.is_definition);
    let ret = main.ty.func().expect("function type").return_ty.clone();
    assert!(matches!(ret.kind, TypeKind::Int));

    // Body is a block holding exactly one `return 0;`.
    let body = main.body.as_ref().expect("body");
    let NodeKind::Block(stmts) = &body.kind else {
        panic!("body is not a block")
    };
    assert_eq!(stmts.len(), 1);
    assert!(matches!(stmts[0].kind, NodeKind::Return(Some(_))));

    let doc = json_of(&sess, &objs);
    let functions = doc["functions"].as_array().unwrap();
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0]["name"], "main");
}

#[test]
fn typedef_disambiguation() {
    // `T (T);` reads as a parenthesized declarator: a variable named T,
    // of type int, shadowing the typedef.
    let (_, objs) = parse_src("typedef int T; T (T);");
    assert_eq!(objs.len(), 1);
    let var = objs[0].borrow();
    assert_eq!(&*var.name, "T");
    assert!(!var.is_function);
    assert!(matches!(var.ty.kind, TypeKind::Int));
}

#[test]
fn typedefs_act_as_type_specifiers() {
    let (_, objs) = parse_src("typedef unsigned long size; size n = 10; size f(size x) { return x; }");
    assert_eq!(objs.len(), 2);
    let n = objs[0].borrow();
    assert!(matches!(n.ty.kind, TypeKind::Long));
    assert!(n.ty.is_unsigned);
}

#[test]
fn scopes_shadow_and_pop() {
    let (_, objs) = parse_src(
        "int x = 1;\nint f(void) { int x = 2; { int x = 3; } return x; }\nint g(void) { return x; }",
    );
    assert_eq!(objs.len(), 3);
}

#[test]
fn struct_layout_reaches_json() {
    let (sess, objs) = parse_src(
        "struct point { char tag; int x; int y; };\nstruct point p;",
    );
    let doc = json_of(&sess, &objs);
    let structs = doc["structs"].as_array().unwrap();
    let point = structs
        .iter()
        .find(|s| s["name"] == "point")
        .expect("struct point");
    assert_eq!(point["size"], 12);
    assert_eq!(point["align"], 4);
    let members = point["members"].as_array().unwrap();
    assert_eq!(members[1]["offset"], 4);
}

#[test]
fn bitfields_and_flexible_members() {
    let (sess, objs) = parse_src(
        "struct flags { unsigned a : 3; unsigned b : 5; };\nstruct buf { int len; char data[]; };\nstruct flags f;\nstruct buf b;",
    );
    let doc = json_of(&sess, &objs);
    let structs = doc["structs"].as_array().unwrap();
    let flags = structs.iter().find(|s| s["name"] == "flags").unwrap();
    assert_eq!(flags["size"], 4);
    assert_eq!(flags["members"][1]["bit_offset"], 3);
    let buf = structs.iter().find(|s| s["name"] == "buf").unwrap();
    assert_eq!(buf["size"], 4);
}

#[test]
fn flexible_member_must_be_last() {
    let mut sess = session();
    let toks = sess
        .preprocess_source("test.c", "struct bad { char data[]; int len; };")
        .unwrap();
    sess.parse(&toks).expect("recoverable");
    assert!(sess.has_errors());
}

#[test]
fn anonymous_members_promote() {
    let (_, objs) = parse_src(
        "struct s { union { int i; float f; }; int tail; } v;\nint get(struct s *p) { return p->i + v.tail; }",
    );
    assert_eq!(objs.len(), 2);
}

#[test]
fn enums_define_constants() {
    let (sess, objs) = parse_src("enum color { RED, GREEN = 5, BLUE };\nint x = BLUE;");
    let doc = json_of(&sess, &objs);
    let enums = doc["enums"].as_array().unwrap();
    let color = enums.iter().find(|e| e["name"] == "color").unwrap();
    let values = color["values"].as_array().unwrap();
    assert_eq!(values[1]["name"], "GREEN");
    assert_eq!(values[1]["value"], 5);
    assert_eq!(values[2]["value"], 6);

    // BLUE folded into x's initializer.
    let x = objs.iter().find(|o| &*o.borrow().name == "x").unwrap();
    assert_eq!(x.borrow().init_data.as_ref().unwrap()[0], 6);
}

#[test]
fn global_initializers_fold_to_bytes() {
    let (_, objs) = parse_src("int x = 40 + 2;\nshort s[3] = {1, 2, 3};");
    let x = objs[0].borrow();
    assert_eq!(x.init_data.as_ref().unwrap(), &vec![42, 0, 0, 0]);
    let s = objs[1].borrow();
    assert_eq!(s.init_data.as_ref().unwrap(), &vec![1, 0, 2, 0, 3, 0]);
}

#[test]
fn global_pointer_initializers_emit_relocations() {
    let (_, objs) = parse_src("int target;\nint *p = &target;\nchar *s = \"hi\";");
    let p = objs.iter().find(|o| &*o.borrow().name == "p").unwrap();
    let p = p.borrow();
    assert_eq!(p.rel.len(), 1);
    assert_eq!(&*p.rel[0].label, "target");

    let s = objs.iter().find(|o| &*o.borrow().name == "s").unwrap();
    // The string literal became a hoisted global the relocation names.
    let label = s.borrow().rel[0].label.clone();
    let lit = objs.iter().find(|o| o.borrow().name == label).unwrap();
    assert_eq!(lit.borrow().init_data.as_ref().unwrap(), b"hi\0");
}

#[test]
fn designated_initializers_with_ranges() {
    let (_, objs) = parse_src("int a[6] = {[1] = 9, [3 ... 5] = 7};");
    let a = objs[0].borrow();
    let data = a.init_data.as_ref().unwrap();
    let words: Vec<i32> = data
        .chunks(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(words, vec![0, 9, 0, 7, 7, 7]);
}

#[test]
fn struct_designators_and_nested_init() {
    let (_, objs) = parse_src(
        "struct p { int x; int y; };\nstruct p v = {.y = 2, .x = 1};\nstruct p grid[2] = {{1, 2}, {.y = 4}};",
    );
    let v = objs.iter().find(|o| &*o.borrow().name == "v").unwrap();
    assert_eq!(v.borrow().init_data.as_ref().unwrap(), &vec![1, 0, 0, 0, 2, 0, 0, 0]);
}

#[test]
fn local_initializers_become_assignments() {
    let (_, objs) = parse_src("void f(void) { int a[2] = {1, 2}; }");
    let f = objs[0].borrow();
    // MemZero precedes the element-wise assignments somewhere in the body.
    let body = format!("{:?}", f.body.as_ref().unwrap());
    assert!(body.contains("MemZero"));
    assert!(body.contains("Assign"));
}

#[test]
fn static_locals_are_hoisted() {
    let (_, objs) = parse_src("int counter(void) { static int n = 5; return n; }");
    // The function plus its hoisted storage.
    assert_eq!(objs.len(), 2);
    let hoisted = objs.iter().find(|o| !o.borrow().is_function).unwrap();
    let h = hoisted.borrow();
    assert!(h.name.starts_with(".L.."));
    assert_eq!(h.init_data.as_ref().unwrap()[0], 5);
}

#[test]
fn string_literals_are_hoisted() {
    let (_, objs) = parse_src("const char *greet(void) { return \"hello\"; }");
    let lit = objs.iter().find(|o| !o.borrow().is_function).unwrap();
    assert_eq!(lit.borrow().init_data.as_ref().unwrap(), b"hello\0");
}

#[test]
fn goto_binds_to_labels() {
    let (_, objs) = parse_src(
        "int f(int n) { if (n) goto done; n = 1; done: return n; }",
    );
    let body = format!("{:?}", objs[0].borrow().body.as_ref().unwrap());
    assert!(body.contains("Goto"));
    assert!(body.contains("Label"));
}

#[test]
fn unbound_goto_is_an_error() {
    let mut sess = session();
    let toks = sess
        .preprocess_source("test.c", "void f(void) { goto nowhere; }")
        .unwrap();
    sess.parse(&toks).expect("recoverable");
    assert!(sess.has_errors());
}

#[test]
fn switch_collects_cases() {
    let (_, objs) = parse_src(
        "int f(int n) { switch (n) { case 1: return 10; case 2 ... 4: return 20; default: return 0; } }",
    );
    let f = objs[0].borrow();
    let body = f.body.as_ref().unwrap();
    let NodeKind::Block(stmts) = &body.kind else { panic!() };
    let NodeKind::Switch {
        cases,
        default_label,
        ..
    } = &stmts[0].kind
    else {
        panic!("expected switch")
    };
    assert_eq!(cases.len(), 2);
    assert_eq!((cases[1].begin, cases[1].end), (2, 4));
    assert!(default_label.is_some());
}

#[test]
fn duplicate_case_is_an_error() {
    let mut sess = session();
    let toks = sess
        .preprocess_source("test.c", "int f(int n) { switch (n) { case 1: case 1: return 0; } }")
        .unwrap();
    sess.parse(&toks).expect("recoverable");
    assert!(sess.has_errors());
}

#[test]
fn sizeof_folds_at_parse_time() {
    let (_, objs) = parse_src("int a = sizeof(long);\nint b = sizeof(int[4]);\nint c = sizeof \"abc\";");
    let val = |i: usize| objs[i].borrow().init_data.as_ref().unwrap()[0];
    assert_eq!(val(0), 8);
    assert_eq!(val(1), 16);
    assert_eq!(val(2), 4);
}

#[test]
fn constant_division_by_zero_is_an_error() {
    let mut sess = session();
    let toks = sess.preprocess_source("test.c", "int a[1/0];").unwrap();
    sess.parse(&toks).expect("recoverable");
    assert!(sess.has_errors());
}

#[test]
fn vla_types_are_recognized() {
    let (_, objs) = parse_src("void f(int n) { int a[n]; }");
    let f = objs[0].borrow();
    let vla = f
        .locals
        .iter()
        .find(|o| &*o.borrow().name == "a")
        .expect("local a");
    assert!(matches!(vla.borrow().ty.kind, TypeKind::Vla { .. }));
}

#[test]
fn statement_expressions_have_value_types() {
    let (_, objs) = parse_src("int f(void) { return ({ int x = 2; x + 1; }); }");
    assert_eq!(objs.len(), 1);
}

#[test]
fn compound_literals_parse() {
    let (_, objs) = parse_src(
        "struct p { int x; int y; };\nint f(void) { return (struct p){1, 2}.x; }\nstruct p g = (struct p){3, 4};",
    );
    let g = objs.iter().find(|o| &*o.borrow().name == "g").unwrap();
    assert!(g.borrow().init_data.is_some() || g.borrow().is_definition);
}

#[test]
fn asm_statements_are_opaque_strings() {
    let (_, objs) = parse_src("void f(void) { asm volatile (\"nop\"); }");
    let body = format!("{:?}", objs[0].borrow().body.as_ref().unwrap());
    assert!(body.contains("nop"));
}

#[test]
fn block_literals_lower_to_functions() {
    let (_, objs) = parse_src(
        "int run(void) { int base = 10; int (^add)(int) = ^int(int n){ return base + n; }; return add(1); }",
    );
    // The synthetic block function was hoisted to the top level.
    let block_fn = objs
        .iter()
        .find(|o| o.borrow().is_block)
        .expect("block function");
    let b = block_fn.borrow();
    assert!(b.is_function);
    assert_eq!(b.captures.len(), 1);
    assert_eq!(&*b.captures[0].borrow().name, "base");
}

#[test]
fn atomic_builtins_parse() {
    let (_, objs) = parse_src(
        "int cas(int *p, int old, int new_) { return __builtin_compare_and_swap(p, old, new_); }",
    );
    let body = format!("{:?}", objs[0].borrow().body.as_ref().unwrap());
    assert!(body.contains("Cas"));
}

#[test]
fn static_inline_liveness() {
    let (_, objs) = parse_src(
        "static inline int used(void) { return 1; }\nstatic inline int unused(void) { return 2; }\nint main(void) { return used(); }",
    );
    let by_name = |name: &str| {
        objs.iter()
            .find(|o| &*o.borrow().name == name)
            .unwrap_or_else(|| panic!("missing {}", name))
            .borrow()
            .is_live
    };
    assert!(by_name("main"));
    assert!(by_name("used"));
    assert!(!by_name("unused"));
    // The dead function stays in the symbol table regardless.
    assert_eq!(objs.len(), 3);
}

#[test]
fn link_single_unit_is_identity() {
    let (mut sess, objs) = parse_src("int x;\nint main(void) { return x; }");
    let names: Vec<String> = objs.iter().map(|o| o.borrow().name.to_string()).collect();
    let linked = sess.link(vec![objs]).expect("link failed");
    let linked_names: Vec<String> = linked.iter().map(|o| o.borrow().name.to_string()).collect();
    assert_eq!(names, linked_names);
}

#[test]
fn link_prefers_definitions_and_deduplicates() {
    let mut sess = session();
    let t1 = sess
        .preprocess_source("a.c", "int shared(void);\nint a_var = 1;")
        .unwrap();
    let p1 = sess.parse(&t1).unwrap();
    let t2 = sess
        .preprocess_source("b.c", "int shared(void) { return 7; }\nint b_var = 2;")
        .unwrap();
    let p2 = sess.parse(&t2).unwrap();

    let merged = sess.link(vec![p1, p2]).expect("link failed");
    assert!(!sess.has_errors());

    let names: Vec<String> = merged.iter().map(|o| o.borrow().name.to_string()).collect();
    assert_eq!(names.iter().filter(|n| *n == "shared").count(), 1);
    // First-seen order: a.c's objects precede b.c's additions.
    let a_pos = names.iter().position(|n| n == "a_var").unwrap();
    let b_pos = names.iter().position(|n| n == "b_var").unwrap();
    assert!(a_pos < b_pos);

    let shared = merged.iter().find(|o| &*o.borrow().name == "shared").unwrap();
    assert!(shared.borrow().provides_definition());
}

#[test]
fn link_rejects_double_definitions() {
    let mut sess = session();
    let t1 = sess.preprocess_source("a.c", "int f(void) { return 1; }").unwrap();
    let p1 = sess.parse(&t1).unwrap();
    let t2 = sess.preprocess_source("b.c", "int f(void) { return 2; }").unwrap();
    let p2 = sess.parse(&t2).unwrap();
    sess.link(vec![p1, p2]).expect("collected error");
    assert!(sess.has_errors());
}

#[test]
fn preprocessed_output_reparses_identically() {
    let src = "#define N 3\nstruct s { int a; };\nint values[N] = {1, 2, 3};\nint sum(struct s *p) { return p->a + values[0]; }\n";

    let (_, objs1) = parse_src(src);

    let mut sess = session();
    let toks = sess.preprocess_source("test.c", src).unwrap();
    let mut text = Vec::new();
    output_preprocessed(&mut text, &toks).unwrap();
    let text = String::from_utf8(text).unwrap();

    let (_, objs2) = parse_src(&text);

    assert_eq!(objs1.len(), objs2.len());
    for (a, b) in objs1.iter().zip(&objs2) {
        let (a, b) = (a.borrow(), b.borrow());
        assert_eq!(a.name, b.name);
        assert_eq!(a.is_function, b.is_function);
        assert_eq!(a.init_data, b.init_data);
    }
}

#[test]
fn ast_printer_produces_sexprs() {
    let (sess, objs) = parse_src("int add(int a, int b) { return a + b; }");
    let mut out = Vec::new();
    print_ast(&mut out, &sess, &objs).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("(function add : int)"));
    assert!(text.contains("(a : int)"));
    assert!(text.contains("(add : int")); // the + node
    assert!(text.contains("(return"));
}

#[test]
fn error_nodes_keep_parsing_alive() {
    let mut sess = session();
    let toks = sess
        .preprocess_source("test.c", "int x = undeclared;\nint y = 2;")
        .unwrap();
    let objs = sess.parse(&toks).expect("recovery keeps going");
    assert!(sess.has_errors());
    // y still parsed after the bad declaration.
    assert!(objs.iter().any(|o| &*o.borrow().name == "y"));
}

#[test]
fn headers_drive_ffi_style_json() {
    let src = r#"
#include <stddef.h>

typedef struct node {
    struct node *next;
    size_t len;
    char data[16];
} node_t;

extern int visit(node_t *head, int (*cb)(node_t *, void *), void *ctx);
static const int VERSION = 3;
"#;
    let (sess, objs) = parse_src(src);
    let doc = json_of(&sess, &objs);

    let visit = doc["functions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["name"] == "visit")
        .expect("visit in functions");
    assert_eq!(visit["storage"], "extern");
    assert_eq!(visit["type"]["params"].as_array().unwrap().len(), 3);

    let node = doc["structs"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "node")
        .expect("struct node");
    let members = node["members"].as_array().unwrap();
    assert_eq!(members[0]["type"]["kind"], "pointer");
    assert_eq!(members[2]["type"]["length"], 16);
}
