// Integration tests for the preprocessor

use std::fs;
use std::path::PathBuf;

use cfront::output::output_preprocessed;
use cfront::token::Token;
use cfront::Session;

fn session() -> Session {
    let mut sess = Session::new();
    sess.set_collect_errors(true);
    sess
}

fn preprocess(src: &str) -> (Session, Vec<Token>) {
    let mut sess = session();
    let toks = sess
        .preprocess_source("test.c", src)
        .expect("preprocessing failed");
    (sess, toks)
}

/// Preprocess and re-emit as source text.
fn pp_text(src: &str) -> String {
    let (_, toks) = preprocess(src);
    let mut out = Vec::new();
    output_preprocessed(&mut out, &toks).expect("write failed");
    String::from_utf8(out).expect("non-utf8 output")
}

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cfront-test-{}-{}", std::process::id(), tag));
    fs::create_dir_all(&dir).expect("failed to create scratch dir");
    dir
}

#[test]
fn object_macro_expands() {
    assert_eq!(pp_text("#define N 10\nint x = N;\n"), "int x = 10;\n");
}

#[test]
fn self_referential_macro_terminates() {
    // The hide-set leaves the inner reference untouched.
    assert_eq!(pp_text("#define M M\nM\n"), "M\n");
}

#[test]
fn mutually_recursive_macros_terminate() {
    let text = pp_text("#define A B\n#define B A\nA B\n");
    assert_eq!(text, "A B\n");
}

#[test]
fn function_macro_arguments_expand() {
    let text = pp_text("#define SQ(x) ((x) * (x))\nint y = SQ(1 + 2);\n");
    assert_eq!(text, "int y = ((1 + 2) * (1 + 2));\n");
}

#[test]
fn function_macro_without_parens_is_plain_ident() {
    let text = pp_text("#define F(x) x\nint F;\n");
    assert_eq!(text, "int F;\n");
}

#[test]
fn stringify_and_paste() {
    let text = pp_text("#define S(x) #x\n#define P(a,b) a##b\nS(1+2) P(foo,bar)\n");
    assert_eq!(text, "\"1+2\" foobar\n");
}

#[test]
fn stringify_escapes_quotes_and_backslashes() {
    let text = pp_text("#define S(x) #x\nS(\"hi\\n\")\n");
    assert_eq!(text, "\"\\\"hi\\\\n\\\"\"\n");
}

#[test]
fn va_args_and_va_opt() {
    let text = pp_text("#define F(fmt, ...) f(fmt __VA_OPT__(,) __VA_ARGS__)\nF(\"a\", 1, 2)\nF(\"b\")\n");
    assert_eq!(text, "f(\"a\", 1, 2)\nf(\"b\")\n");
}

#[test]
fn gnu_comma_paste_deletes_comma() {
    let text = pp_text("#define F(fmt, ...) f(fmt, ##__VA_ARGS__)\nF(x)\nF(x, 1)\n");
    assert_eq!(text, "f(x)\nf(x,1)\n");
}

#[test]
fn conditional_takes_true_branch() {
    let text = pp_text("#if 1+1==2\nint x;\n#else\nint y;\n#endif\n");
    assert_eq!(text, "int x;\n");
}

#[test]
fn elif_chains() {
    let src = "#if 0\nint a;\n#elif 0\nint b;\n#elif 1\nint c;\n#else\nint d;\n#endif\n";
    assert_eq!(pp_text(src), "int c;\n");
}

#[test]
fn ifdef_and_undef() {
    let src = "#define X\n#ifdef X\nint a;\n#endif\n#undef X\n#ifdef X\nint b;\n#endif\n";
    assert_eq!(pp_text(src), "int a;\n");
}

#[test]
fn defined_operator_and_unknown_idents_are_zero() {
    let src = "#if defined(FOO) || BAR\nint a;\n#else\nint b;\n#endif\n";
    assert_eq!(pp_text(src), "int b;\n");
}

#[test]
fn nested_conditionals_skip_correctly() {
    let src = "#if 0\n#if 1\nint a;\n#endif\n#else\nint b;\n#endif\n";
    assert_eq!(pp_text(src), "int b;\n");
}

#[test]
fn unterminated_conditional_is_an_error() {
    let mut sess = session();
    let result = sess.preprocess_source("test.c", "#if 1\nint x;\n");
    assert!(result.is_ok());
    assert!(sess.has_errors());
}

#[test]
fn error_directive_reports() {
    let mut sess = session();
    sess.preprocess_source("test.c", "#error custom message\n")
        .expect("collection keeps going");
    assert_eq!(sess.error_count(), 1);
}

#[test]
fn warning_directive_warns() {
    let mut sess = session();
    sess.preprocess_source("test.c", "#warning heads up\n")
        .expect("warnings never abort");
    assert_eq!(sess.warning_count(), 1);
    assert!(!sess.has_errors());
}

#[test]
fn line_directive_overrides_position() {
    let (_, toks) = preprocess("#line 100 \"other.c\"\nint x;\n");
    let int_tok = toks.iter().find(|t| t.is("int")).expect("int token");
    assert_eq!(int_tok.display_line(), 100);
    assert_eq!(&*int_tok.filename, "other.c");
}

#[test]
fn file_and_line_builtins() {
    let text = pp_text("const char *f = __FILE__;\nint l = __LINE__;\n");
    assert!(text.contains("\"test.c\""));
    assert!(text.contains("int l = 2;"));
}

#[test]
fn counter_increments() {
    let text = pp_text("int a = __COUNTER__;\nint b = __COUNTER__;\n");
    assert!(text.contains("int a = 0;"));
    assert!(text.contains("int b = 1;"));
}

#[test]
fn every_token_has_valid_provenance() {
    let (_, toks) = preprocess("#define F(x) x\nint a = F(1);\n#include <stdbool.h>\nbool b = true;\n");
    for tok in &toks {
        assert!(tok.display_line() >= 1, "bad line on {:?}", tok.text);
        assert!(tok.col >= 1, "bad col on {:?}", tok.text);
        assert!(!tok.filename.is_empty());
    }
}

#[test]
fn embedded_stdlib_resolves_angle_includes() {
    let (sess, toks) = preprocess("#include <stdint.h>\nint32_t x;\n");
    assert!(!sess.has_errors());
    // The typedef text was spliced in.
    assert!(toks.iter().any(|t| t.is("typedef")));
}

#[test]
fn missing_include_is_an_error() {
    let mut sess = session();
    sess.preprocess_source("test.c", "#include \"no-such-file.h\"\n")
        .expect("recoverable");
    assert!(sess.has_errors());
}

#[test]
fn pragma_once_includes_only_once() {
    let dir = scratch_dir("once");
    fs::write(dir.join("once.h"), "#pragma once\nint once_var;\n").unwrap();

    let mut sess = session();
    sess.add_include_path(&dir);
    let text = {
        let toks = sess
            .preprocess_source("test.c", "#include \"once.h\"\n#include \"once.h\"\n")
            .expect("preprocess failed");
        let mut out = Vec::new();
        output_preprocessed(&mut out, &toks).unwrap();
        String::from_utf8(out).unwrap()
    };
    assert_eq!(text.matches("once_var").count(), 1);
}

#[test]
fn include_next_visits_paths_in_order() {
    let dir_a = scratch_dir("next-a");
    let dir_b = scratch_dir("next-b");
    fs::write(dir_a.join("x.h"), "int from_a;\n#include_next \"x.h\"\n").unwrap();
    fs::write(dir_b.join("x.h"), "int from_b;\n").unwrap();

    let mut sess = session();
    sess.add_include_path(&dir_a);
    sess.add_include_path(&dir_b);
    let toks = sess
        .preprocess_source("test.c", "#include \"x.h\"\n")
        .expect("preprocess failed");
    assert!(!sess.has_errors());

    let mut out = Vec::new();
    output_preprocessed(&mut out, &toks).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches("from_a").count(), 1);
    assert_eq!(text.matches("from_b").count(), 1);
    assert!(text.find("from_a").unwrap() < text.find("from_b").unwrap());
}

#[test]
fn embed_expands_file_bytes() {
    let dir = scratch_dir("embed");
    fs::write(dir.join("blob.bin"), [1u8, 2, 3]).unwrap();

    let mut sess = session();
    sess.add_include_path(&dir);
    let toks = sess
        .preprocess_source("test.c", "unsigned char d[] = {\n#embed \"blob.bin\"\n};\n")
        .expect("preprocess failed");
    let mut out = Vec::new();
    output_preprocessed(&mut out, &toks).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("1"));
    assert!(text.contains("2"));
    assert!(text.contains("3"));
    assert_eq!(text.matches(',').count(), 2);
}

#[test]
fn embed_soft_limit_warns_but_emits() {
    let dir = scratch_dir("embed-soft");
    fs::write(dir.join("blob.bin"), vec![7u8; 100]).unwrap();

    let mut sess = session();
    sess.opts.embed_limit = 50;
    sess.add_include_path(&dir);
    let toks = sess
        .preprocess_source("test.c", "unsigned char d[] = {\n#embed \"blob.bin\"\n};\n")
        .expect("soft limit is only a warning");
    assert_eq!(sess.warning_count(), 1);
    assert!(!sess.has_errors());

    let objs = sess.parse(&toks).expect("parse failed");
    let data = objs[0].borrow();
    assert_eq!(data.ty.array_len(), Some(100));
}

#[test]
fn embed_hard_limit_errors_and_emits_nothing() {
    let dir = scratch_dir("embed-hard");
    fs::write(dir.join("blob.bin"), vec![7u8; 100]).unwrap();

    let mut sess = session();
    sess.opts.embed_limit = 50;
    sess.opts.embed_hard_error = true;
    sess.add_include_path(&dir);
    let toks = sess
        .preprocess_source("test.c", "unsigned char d[] = {\n#embed \"blob.bin\"\n};\n")
        .expect("collected error");
    assert!(sess.has_errors());

    sess.clear_errors();
    let objs = sess.parse(&toks).expect("parse failed");
    let data = objs[0].borrow();
    assert_ne!(data.ty.array_len(), Some(100));
}

#[test]
fn embed_parameters() {
    let dir = scratch_dir("embed-params");
    fs::write(dir.join("blob.bin"), [9u8, 8]).unwrap();
    fs::write(dir.join("empty.bin"), []).unwrap();

    let mut sess = session();
    sess.add_include_path(&dir);
    let toks = sess
        .preprocess_source(
            "test.c",
            "int a[] = {\n#embed \"blob.bin\" limit(1) prefix(100,) suffix(, 200)\n};\nint b = \n#embed \"empty.bin\" if_empty(42)\n;\n",
        )
        .expect("preprocess failed");
    let mut out = Vec::new();
    output_preprocessed(&mut out, &toks).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("100"), "prefix missing: {}", text);
    assert!(text.contains("9"), "data missing: {}", text);
    assert!(!text.contains("8"), "limit ignored: {}", text);
    assert!(text.contains("200"), "suffix missing: {}", text);
    assert!(text.contains("42"), "if_empty missing: {}", text);
}

#[test]
fn pragma_pack_becomes_layout_state() {
    let mut sess = session();
    let toks = sess
        .preprocess_source(
            "test.c",
            "#pragma pack(push, 1)\nstruct p { char c; int i; };\n#pragma pack(pop)\nstruct q { char c; int i; };\n",
        )
        .expect("preprocess failed");
    sess.parse(&toks).expect("parse failed");
    assert!(!sess.has_errors());

    let mut out = Vec::new();
    cfront::output::output_json(&mut out, &sess, &[]).unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let structs = doc["structs"].as_array().unwrap();
    let size_of = |name: &str| {
        structs
            .iter()
            .find(|s| s["name"] == name)
            .unwrap_or_else(|| panic!("missing struct {}", name))["size"]
            .as_i64()
            .unwrap()
    };
    assert_eq!(size_of("p"), 5);
    assert_eq!(size_of("q"), 8);
}

#[test]
fn skip_preprocess_mode_keeps_directives_out_but_promotes_keywords() {
    let mut sess = session();
    sess.opts.skip_preprocess = true;
    let toks = sess
        .preprocess_source("test.c", "int main(void) { return 0; }\n")
        .expect("tokenize failed");
    assert!(toks.iter().any(|t| t.is_keyword("return")));
}

#[test]
fn macro_redefinition_with_different_body_errors() {
    let mut sess = session();
    sess.preprocess_source("test.c", "#define A 1\n#define A 2\n")
        .expect("recoverable");
    assert!(sess.has_errors());
}

#[test]
fn identical_redefinition_is_silent() {
    let mut sess = session();
    sess.preprocess_source("test.c", "#define A 1\n#define A 1\n")
        .expect("ok");
    assert!(!sess.has_errors());
    assert_eq!(sess.warning_count(), 0);
}

#[test]
fn cli_style_defines() {
    let mut sess = session();
    sess.define("VERSION", "3");
    let toks = sess
        .preprocess_source("test.c", "int v = VERSION;\n")
        .expect("preprocess failed");
    let mut out = Vec::new();
    output_preprocessed(&mut out, &toks).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "int v = 3;\n");

    sess.undef("VERSION");
    let toks = sess
        .preprocess_source("test2.c", "int w = VERSION;\n")
        .expect("preprocess failed");
    assert!(toks.iter().any(|t| t.is("VERSION")));
}
