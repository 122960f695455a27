use less_ferrite::{compile, compile_file, CacheInput, Compiler};
use std::fs;
use std::path::PathBuf;

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("less_ferrite_it_{}_{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn variable_and_nesting() {
    let src = r"@spacing: 8px;
.container {
  padding: @spacing;
  .title {
    margin-bottom: @spacing;
  }
}";
    let css = compile(src).unwrap();
    assert!(css.contains(".container {"));
    assert!(css.contains(".container .title {"));
    assert!(css.contains("padding: 8px;"));
}

#[test]
fn selector_multiplication_matches_lessjs() {
    let src = "div, pre { color: blue; span, .big, hello.world { height: 20px; } }";
    let css = compile(src).unwrap();
    assert!(css.contains("div,\npre {\n  color: blue;\n}"));
    assert!(css.contains(
        "div span,\ndiv .big,\ndiv hello.world,\npre span,\npre .big,\npre hello.world {\n  height: 20px;\n}"
    ));
}

#[test]
fn max_with_mixed_units_fails() {
    let err = compile(".s { max: max(10px, 5%); }").unwrap_err();
    assert!(err.to_string().contains("Cannot convert % to px"));
}

#[test]
fn convert_with_mixed_families_fails() {
    let err = compile(".s { convert: convert(10px, s); }").unwrap_err();
    assert!(err.to_string().contains("Cannot convert px to s"));
}

#[test]
fn convert_length_and_time_units() {
    let css = compile(".x { a: convert(96px, in); b: convert(300ms, s); c: convert(0.25turn, deg); }")
        .unwrap();
    assert!(css.contains("a: 1in;"));
    assert!(css.contains("b: 0.3s;"));
    assert!(css.contains("c: 90deg;"));
}

#[test]
fn deduplication_consolidates_comments() {
    let src = r".x {
  /* first */
  color: url('x');
  /* second */
  color: url('x');
}";
    let mut compiler = Compiler::new();
    compiler.set_preserve_comments(true);
    let css = compiler.compile(src, None).unwrap();
    assert_eq!(css.matches("color: url('x');").count(), 1);
    let first = css.find("/* first */").unwrap();
    let second = css.find("/* second */").unwrap();
    let rule = css.find("color: url('x');").unwrap();
    assert!(first < second && second < rule);
}

#[test]
fn comments_dropped_by_default() {
    let css = compile("/* note */\n.x { color: red; }").unwrap();
    assert!(!css.contains("/* note */"));
}

#[test]
fn import_inlines_variables_and_blocks() {
    let dir = scratch("import_basic");
    fs::write(dir.join("lib.less"), "@c: red;\n.shared { margin: 0; }\n").unwrap();
    fs::write(dir.join("main.less"), "@import \"lib\";\n.x { color: @c; }\n").unwrap();

    let mut compiler = Compiler::new();
    let css = compiler.compile_file(dir.join("main.less")).unwrap();
    assert!(css.contains(".shared {"));
    assert!(css.contains("color: red;"));
    assert_eq!(compiler.all_parsed_files().len(), 2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn import_cycle_resolves_to_noop() {
    let dir = scratch("import_cycle");
    fs::write(dir.join("a.less"), "@import \"b\";\n.from-a { x: 1; }\n").unwrap();
    fs::write(dir.join("b.less"), "@import \"a\";\n.from-b { y: 2; }\n").unwrap();

    let css = compile_file(dir.join("a.less")).unwrap();
    assert_eq!(css.matches(".from-a {").count(), 1);
    assert_eq!(css.matches(".from-b {").count(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unresolved_import_falls_back_to_css_import() {
    let css = compile("@import \"missing-theme\";\n.x { a: b; }").unwrap();
    assert!(css.contains("@import \"missing-theme\";"));
}

#[test]
fn mixin_matches_only_closest_scope() {
    let src = r".m() { scope: outer; }
.wrap {
  .m() { scope: inner; }
  .use { .m(); }
}
.top { .m(); }";
    let css = compile(src).unwrap();
    assert!(css.contains(".wrap .use {\n  scope: inner;\n}"));
    assert!(css.contains(".top {\n  scope: outer;\n}"));
    assert_eq!(css.matches("scope: inner;").count(), 1);
}

#[test]
fn mixin_expands_all_matches_in_declaration_order() {
    let src = r".m() { a: 1; }
.m() { b: 2; }
.x { .m(); }";
    let css = compile(src).unwrap();
    let a = css.find("a: 1;").unwrap();
    let b = css.find("b: 2;").unwrap();
    assert!(a < b);
}

#[test]
fn mixin_pattern_matches_literal_arguments() {
    let src = r".badge(pill) { border-radius: 999px; }
.badge(square) { border-radius: 0; }
.tag { .badge(pill); }";
    let css = compile(src).unwrap();
    assert!(css.contains("border-radius: 999px;"));
    assert!(!css.contains("border-radius: 0;"));
}

#[test]
fn keyword_arguments_bind_by_name() {
    let src = r".m(@a: 1, @b: 2) { out: @a @b; }
.x { .m(@b: 9); }";
    let css = compile(src).unwrap();
    assert!(css.contains("out: 1 9;"));
}

#[test]
fn directives_pass_through() {
    let src = r#"@charset "utf-8";
@font-face {
  font-family: 'Open Sans';
  src: url('/fonts/os.woff2') format('woff2');
}
@keyframes fade-in {
  from { opacity: 0; }
  to { opacity: 1; }
}"#;
    let css = compile(src).unwrap();
    assert!(css.contains("@charset \"utf-8\";"));
    assert!(css.contains("@font-face {"));
    assert!(css.contains("font-family: 'Open Sans';"));
    assert!(css.contains("src: url('/fonts/os.woff2') format('woff2');"));
    assert!(css.contains("@keyframes fade-in {"));
    assert!(css.contains("opacity: 0;"));
}

#[test]
fn media_query_types_and_expressions() {
    let src = "@media only screen and (min-width: 768px) { .a { b: c; } }";
    let css = compile(src).unwrap();
    assert!(css.contains("@media only screen and (min-width: 768px) {"));
    assert!(css.contains(".a {"));
}

#[test]
fn string_functions_and_list_indexing() {
    let src = r#".x {
  c: argb(rgba(255, 0, 0, 0.5));
  e: extract(1px solid red, 2);
  f: %("%s-%d", a, 2);
}"#;
    let css = compile(src).unwrap();
    assert!(css.contains("c: #80ff0000;"));
    assert!(css.contains("e: solid;"));
    assert!(css.contains("f: \"a-2\";"));
}

#[test]
fn extract_out_of_range_reprints_call() {
    let css = compile(".x { v: extract(1px solid, 9); }").unwrap();
    assert!(css.contains("extract("));
}

#[test]
fn data_uri_embeds_small_files() {
    let dir = scratch("data_uri");
    fs::write(dir.join("dot.png"), b"not-really-a-png").unwrap();

    let mut compiler = Compiler::new();
    compiler.add_import_dir(&dir);
    let css = compiler
        .compile(".x { background: data-uri('dot.png'); }", None)
        .unwrap();
    assert!(css.contains("background: url(\"data:image/png;base64,"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn data_uri_missing_file_keeps_url() {
    let css = compile(".x { background: data-uri('nope.png'); }").unwrap();
    assert!(css.contains("background: url(\"nope.png\");"));
}

#[test]
fn checked_compile_rebuilds_only_when_newer() {
    let dir = scratch("checked");
    let input = dir.join("in.less");
    let output = dir.join("out.css");
    fs::write(&input, ".a { color: red; }").unwrap();

    let mut compiler = Compiler::new();
    assert!(compiler.checked_compile(&input, &output).unwrap());
    assert!(output.is_file());
    assert!(!compiler.checked_compile(&input, &output).unwrap());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn cached_compile_tracks_files_and_staleness() {
    let dir = scratch("cached");
    let input = dir.join("in.less");
    fs::write(&input, "@import \"part\";\n.a { color: @c; }").unwrap();
    fs::write(dir.join("part.less"), "@c: blue;").unwrap();

    let mut compiler = Compiler::new();
    let record = compiler
        .cached_compile(CacheInput::Path(input.clone()), false)
        .unwrap();
    assert_eq!(record.files.len(), 2);
    let css = record.compiled.clone().unwrap();
    assert!(css.contains("color: blue;"));

    // 未过期：原记录原样返回
    let unchanged = compiler
        .cached_compile(CacheInput::Record(record.clone()), false)
        .unwrap();
    assert_eq!(unchanged.updated, record.updated);

    // 把记录的 mtime 拨回去伪造过期
    let mut stale = record.clone();
    for mtime in stale.files.values_mut() {
        *mtime = 0;
    }
    let rebuilt = compiler
        .cached_compile(CacheInput::Record(stale), false)
        .unwrap();
    assert!(rebuilt.compiled.is_some());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn checked_cached_compile_writes_css_and_meta() {
    let dir = scratch("ccc");
    let input = dir.join("in.less");
    let output = dir.join("out.css");
    fs::write(&input, ".a { color: red; }").unwrap();

    let mut compiler = Compiler::new();
    let css = compiler
        .checked_cached_compile(&input, &output, false)
        .unwrap();
    assert!(css.contains("color: red;"));
    assert_eq!(fs::read_to_string(&output).unwrap(), css);

    let meta = fs::read_to_string(dir.join("out.css.meta")).unwrap();
    assert!(meta.contains("\"root\""));
    assert!(meta.contains("\"files\""));
    assert!(!meta.contains("\"compiled\""));

    // 第二次命中缓存，返回相同 CSS
    let again = compiler
        .checked_cached_compile(&input, &output, false)
        .unwrap();
    assert_eq!(again, css);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn compile_styles_base_fixture() {
    let css = compile_file("fixtures/styles/base.less").unwrap();
    assert!(css.contains(".page {"));
    assert!(css.contains("min-height: 100%;"));
    assert!(css.contains(".btn-primary {"));
    assert!(css.contains("color: #ffffff;"));
}

#[test]
fn compressed_fixture_output_is_compact() {
    let mut compiler = Compiler::new();
    compiler.set_formatter("compressed").unwrap();
    let css = compiler.compile_file("fixtures/mixins.less").unwrap();
    assert!(css.contains(".dialog{box-shadow:0 2px 4px rgba(0,0,0,0.4);"));
    assert!(!css.contains('\n'));
}

#[test]
fn error_reports_file_and_line() {
    let dir = scratch("errline");
    let input = dir.join("bad.less");
    fs::write(&input, ".a {\n  width: @nope;\n}\n").unwrap();

    let err = compile_file(&input).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("variable @nope is undefined"));
    assert!(message.contains("bad.less"));
    assert!(message.contains("line 2"));

    let _ = fs::remove_dir_all(&dir);
}
