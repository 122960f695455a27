//! less_ferrite 库入口，把 LESS 编译为 CSS。
//! 流水线分三段：解析（Parser）→ 语义求值（Evaluator）→ CSS 序列化
//! （Formatter）。求值器负责作用域栈、mixin 匹配展开、值归约、
//! 表达式求值、@media 倍乘、@import 内联与输出行去重。

mod ast;
mod cache;
mod color;
mod env;
mod error;
mod evaluator;
mod functions;
mod importer;
mod parser;
mod reducer;
mod serializer;
mod value;

pub use crate::cache::{CacheInput, CacheRecord};
pub use crate::color::Color;
pub use crate::error::{LessError, LessResult};
pub use crate::value::{StringPart, Value, VarName};

use crate::ast::Arena;
use crate::evaluator::Evaluator;
use crate::parser::Parser;
use crate::serializer::Formatter;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 用户注册的值函数。返回 `None` 表示放弃处理，调用会按原样
/// 回写到输出。
pub type CustomFunction = Box<dyn Fn(&Value) -> LessResult<Option<Value>>>;

/// 编译器实例。持有格式化风格、注册的函数与变量、import 目录和
/// 最近一次编译涉及的文件表。一个实例同一时刻只服务一次编译，
/// 并发编译请各建实例。
pub struct Compiler {
    formatter_name: String,
    preserve_comments: bool,
    import_dirs: Vec<PathBuf>,
    import_disabled: bool,
    registered_vars: IndexMap<String, String>,
    user_fns: IndexMap<String, CustomFunction>,
    parsed_files: IndexMap<PathBuf, u64>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler {
            formatter_name: "lessjs".to_string(),
            preserve_comments: false,
            import_dirs: Vec::new(),
            import_disabled: false,
            registered_vars: IndexMap::new(),
            user_fns: IndexMap::new(),
            parsed_files: IndexMap::new(),
        }
    }

    /// 编译一段 LESS 源码。`name` 用于错误消息里的文件定位。
    pub fn compile(&mut self, source: &str, name: Option<&str>) -> LessResult<String> {
        let parser = Parser {
            write_comments: self.preserve_comments,
        };
        let mut arena = Arena::new();
        let root = parser.parse(&mut arena, source, name)?;
        let formatter = Formatter::by_name(&self.formatter_name).unwrap_or_else(Formatter::lessjs);
        let mut evaluator = Evaluator::new(
            arena,
            parser,
            formatter.clone(),
            self.import_dirs.clone(),
            self.import_disabled,
            &self.user_fns,
            &self.registered_vars,
            &mut self.parsed_files,
        );
        let out_root = evaluator.compile_tree(root)?;
        Ok(formatter.render(&evaluator.out, out_root))
    }

    /// 从文件编译；输入文件所在目录临时加入 import 检索，
    /// `all_parsed_files` 重置为本次编译涉及的文件。
    pub fn compile_file<P: AsRef<Path>>(&mut self, path: P) -> LessResult<String> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(LessError::new(format!(
                "load error: failed to find {}",
                path.display()
            )));
        }
        let old_dirs = self.import_dirs.clone();
        if let Some(parent) = path.parent() {
            self.import_dirs.push(parent.to_path_buf());
        }
        self.parsed_files = IndexMap::new();
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.parsed_files
            .insert(canonical.clone(), importer::mtime(&canonical));

        let result = fs::read_to_string(path)
            .map_err(|err| {
                LessError::new(format!(
                    "load error: failed to read {}: {err}",
                    path.display()
                ))
            })
            .and_then(|source| self.compile(&source, Some(&path.display().to_string())));
        self.import_dirs = old_dirs;
        result
    }

    /// 编译到输出文件，返回写入的字节数。
    pub fn compile_file_to<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        input: P,
        output: Q,
    ) -> LessResult<u64> {
        let css = self.compile_file(input)?;
        fs::write(output.as_ref(), &css).map_err(|err| {
            LessError::new(format!(
                "load error: failed to write {}: {err}",
                output.as_ref().display()
            ))
        })?;
        Ok(css.len() as u64)
    }

    /// 输入比输出新时才重编译；返回是否编译过。
    pub fn checked_compile<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        input: P,
        output: Q,
    ) -> LessResult<bool> {
        let input = input.as_ref();
        let output = output.as_ref();
        if !output.is_file() || importer::mtime(input) > importer::mtime(output) {
            self.compile_file_to(input, output)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// 带文件表的缓存编译。`force`、记录缺少文件表或任一记录文件
    /// 在磁盘上变新都会触发重建；否则原记录原样返回。
    pub fn cached_compile(&mut self, input: CacheInput, force: bool) -> LessResult<CacheRecord> {
        let root = match input {
            CacheInput::Path(path) => path,
            CacheInput::Record(record) => {
                if force || record.is_stale() {
                    record.root.clone()
                } else {
                    return Ok(record);
                }
            }
        };
        let compiled = self.compile_file(&root)?;
        Ok(CacheRecord {
            root,
            files: self.parsed_files.clone(),
            compiled: Some(compiled),
            updated: cache::now_secs(),
        })
    }

    /// 缓存编译并落盘：CSS 写 `out`，记录（去掉 compiled）写
    /// `<out>.meta` 边车。
    pub fn checked_cached_compile<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        input: P,
        output: Q,
        force: bool,
    ) -> LessResult<String> {
        let input = input.as_ref();
        let output = output.as_ref();
        let meta_path = PathBuf::from(format!("{}.meta", output.display()));

        let cache_input = if !force && meta_path.is_file() {
            match CacheRecord::load(&meta_path) {
                Ok(record) if record.root == input => CacheInput::Record(record),
                _ => CacheInput::Path(input.to_path_buf()),
            }
        } else {
            CacheInput::Path(input.to_path_buf())
        };

        let record = self.cached_compile(cache_input, force)?;
        match &record.compiled {
            Some(css) => {
                fs::write(output, css).map_err(|err| {
                    LessError::new(format!(
                        "load error: failed to write {}: {err}",
                        output.display()
                    ))
                })?;
                record.store(&meta_path)?;
                Ok(css.clone())
            }
            None => fs::read_to_string(output).map_err(|err| {
                LessError::new(format!(
                    "load error: failed to read {}: {err}",
                    output.display()
                ))
            }),
        }
    }

    /// `"compressed" | "classic" | "lessjs"`，默认 lessjs。
    pub fn set_formatter(&mut self, name: &str) -> LessResult<()> {
        if Formatter::by_name(name).is_none() {
            return Err(LessError::new(format!("unknown formatter: {name}")));
        }
        self.formatter_name = name.to_string();
        Ok(())
    }

    pub fn set_preserve_comments(&mut self, preserve: bool) {
        self.preserve_comments = preserve;
    }

    pub fn register_function(&mut self, name: impl Into<String>, function: CustomFunction) {
        self.user_fns.insert(name.into(), function);
    }

    pub fn unregister_function(&mut self, name: &str) {
        self.user_fns.shift_remove(name);
    }

    /// 变量以 LESS 文本给出，编译开始时解析并注入最外层作用域。
    pub fn set_variables<I, K, V>(&mut self, variables: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in variables {
            self.registered_vars.insert(name.into(), value.into());
        }
    }

    pub fn unset_variable(&mut self, name: &str) {
        self.registered_vars.shift_remove(name);
    }

    pub fn set_import_dir(&mut self, dirs: Vec<PathBuf>) {
        self.import_dirs = dirs;
    }

    pub fn add_import_dir(&mut self, dir: impl Into<PathBuf>) {
        self.import_dirs.push(dir.into());
    }

    pub fn set_import_disabled(&mut self, disabled: bool) {
        self.import_disabled = disabled;
    }

    /// 最近一次 compile_file 解析过的全部文件及其 mtime。
    pub fn all_parsed_files(&self) -> &IndexMap<PathBuf, u64> {
        &self.parsed_files
    }
}

/// 一次性编译，默认配置（lessjs 风格）。
pub fn compile(source: &str) -> LessResult<String> {
    Compiler::new().compile(source, None)
}

/// 一次性从文件编译，自动处理 @import。
pub fn compile_file<P: AsRef<Path>>(path: P) -> LessResult<String> {
    Compiler::new().compile_file(path)
}

#[cfg(feature = "node")]
use napi_derive::napi;

/// Node.js 侧的编译选项对象。
#[cfg(feature = "node")]
#[napi(object)]
pub struct JsCompileOptions {
    /// 输出风格：compressed / classic / lessjs。
    pub formatter: Option<String>,
    /// 源文件路径，用于解析相对 @import。
    pub filename: Option<String>,
    /// 是否保留 /* */ 注释。
    pub preserve_comments: Option<bool>,
}

/// 暴露给 Node.js 的编译函数。
#[cfg(feature = "node")]
#[napi]
pub fn compile_less(source: String, options: Option<JsCompileOptions>) -> napi::Result<String> {
    let mut compiler = Compiler::new();
    if let Some(opt) = options {
        if let Some(formatter) = opt.formatter {
            compiler
                .set_formatter(&formatter)
                .map_err(|err| napi::Error::from_reason(err.to_string()))?;
        }
        if let Some(preserve) = opt.preserve_comments {
            compiler.set_preserve_comments(preserve);
        }
        if let Some(filename) = opt.filename {
            if let Some(parent) = PathBuf::from(&filename).parent() {
                compiler.add_import_dir(parent.to_path_buf());
            }
        }
    }
    compiler
        .compile(&source, None)
        .map_err(|err| napi::Error::from_reason(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_variable_and_arithmetic() {
        let mut compiler = Compiler::new();
        compiler.set_variables([("color", "red"), ("base", "960px")]);
        let css = compiler
            .compile(".magic { color: @color; width: @base - 200; }", None)
            .unwrap();
        assert_eq!(css, ".magic {\n  color: red;\n  width: 760px;\n}\n");
    }

    #[test]
    fn compile_nested_parent_selector() {
        let css = compile(".btn { color: #fff; &:hover { color: #000; } }").unwrap();
        assert!(css.contains(".btn:hover {"));
        assert!(css.contains("color: #000;"));
    }

    #[test]
    fn compile_selector_multiplication() {
        let css =
            compile("div, pre { color: blue; span, .big, hello.world { height: 20px; } }").unwrap();
        assert!(css.contains(
            "div span,\ndiv .big,\ndiv hello.world,\npre span,\npre .big,\npre hello.world {"
        ));
        assert!(css.contains("height: 20px;"));
    }

    #[test]
    fn compile_mixin_with_default_and_override() {
        let src = r".shadow(@blur: 4px) {
  box-shadow: 0 0 @blur rgba(0, 0, 0, 0.2);
}
.panel { .shadow(); }
.toast { .shadow(8px); }";
        let css = compile(src).unwrap();
        assert!(css.contains("box-shadow: 0 0 4px rgba(0,0,0,0.2);"));
        assert!(css.contains("box-shadow: 0 0 8px rgba(0,0,0,0.2);"));
    }

    #[test]
    fn compile_guard_mismatch_is_undefined() {
        let src = r".flipped(@x) when (@x =< 10) { rule: value; }
.selector { .flipped(12); }";
        let err = compile(src).unwrap_err();
        assert!(err.to_string().contains(".flipped is undefined"));
    }

    #[test]
    fn compile_guard_match_expands() {
        let src = r".flipped(@x) when (@x =< 10) { width: @x; }
.selector { .flipped(8); }";
        let css = compile(src).unwrap();
        assert!(css.contains("width: 8;"));
    }

    #[test]
    fn compile_guard_disjunction_and_negation() {
        let matching = r".pick(@x) when (@x > 100), not (@x = 5) { width: @x; }
.b { .pick(7); }";
        let css = compile(matching).unwrap();
        assert!(css.contains("width: 7;"));

        let failing = r".pick(@x) when (@x > 100), not (@x = 5) { width: @x; }
.a { .pick(5); }";
        let err = compile(failing).unwrap_err();
        assert!(err.to_string().contains(".pick is undefined"));
    }

    #[test]
    fn compile_mixin_suffix_appends_important() {
        let src = r".m() { margin: 10px; }
.box { .m() !important; }";
        let css = compile(src).unwrap();
        assert!(css.contains("margin: 10px !important;"));
    }

    #[test]
    fn compile_arguments_variable() {
        let src = r".m(@a, @b: 2px) { margin: @arguments; }
.x { .m(1px); }";
        let css = compile(src).unwrap();
        assert!(css.contains("margin: 1px 2px;"));
    }

    #[test]
    fn compile_rest_parameter_absorbs_tail() {
        let src = r".m(@first, @rest...) { first: @first; rest: @rest; }
.x { .m(1, 2, 3); }";
        let css = compile(src).unwrap();
        assert!(css.contains("first: 1;"));
        assert!(css.contains("rest: 2 3;"));
    }

    #[test]
    fn compile_scope_capture_through_mixin() {
        let src = r".outer { @color: green; .inner() { color: @color; } tag: keep; }
.user { .outer > .inner(); }";
        let css = compile(src).unwrap();
        assert!(css.contains(".user {\n  color: green;\n}"));
    }

    #[test]
    fn compile_multi_segment_call_falls_back_to_enclosing_scope() {
        let src = r".outer { .inner() { color: green; } }
.wrap {
  .outer { tag: keep; }
  .use { .outer > .inner(); }
}";
        let css = compile(src).unwrap();
        assert!(css.contains(".wrap .use {\n  color: green;\n}"));
    }

    #[test]
    fn compile_legacy_at_mixin_call() {
        let src = r"@widget() { margin: 0; }
$panel { color: red; }
.x { @widget(); @panel; }";
        let css = compile(src).unwrap();
        assert!(css.contains("margin: 0;"));
        assert!(css.contains("color: red;"));
        assert!(!css.contains("$widget"));
    }

    #[test]
    fn compile_ruleset_call_keeps_last_match() {
        let src = r"$panel { color: red; }
$panel { color: blue; }
.x { $panel; }";
        let css = compile(src).unwrap();
        assert!(css.contains("color: blue;"));
        assert!(!css.contains("color: red;"));
        assert!(!css.contains("$panel"));
    }

    #[test]
    fn compile_undefined_variable_is_fatal() {
        let err = compile(".x { color: @missing; }").unwrap_err();
        assert!(err.to_string().contains("variable @missing is undefined"));
    }

    #[test]
    fn compile_variable_cycle_is_fatal() {
        let err = compile("@a: @b;\n@b: @a;\n.x { width: @a; }").unwrap_err();
        assert!(err.to_string().contains("infinite loop detected"));
    }

    #[test]
    fn compile_interpolated_selector_and_property() {
        let src = r"@name: magic;
@side: left;
.@{name} { margin-@{side}: 4px; }";
        let css = compile(src).unwrap();
        assert!(css.contains(".magic {"));
        assert!(css.contains("margin-left: 4px;"));
    }

    #[test]
    fn compile_string_interpolation() {
        let src = "@base: \"ui\";\n.x { background: \"@{base}/sprite.png\"; }";
        let css = compile(src).unwrap();
        assert!(css.contains("background: \"ui/sprite.png\";"));
    }

    #[test]
    fn compile_escape_passes_through() {
        let css = compile(".x { width: ~\"calc(100% - 20px)\"; }").unwrap();
        assert!(css.contains("width: calc(100% - 20px);"));
    }

    #[test]
    fn compile_color_functions_inline() {
        let src = r"@brand: #336699;
.btn {
  background: lighten(@brand, 20%);
  border-color: darken(@brand, 10%);
  color: fade(#ffffff, 40%);
}";
        let css = compile(src).unwrap();
        assert!(css.contains("background: #6699cc;"));
        assert!(css.contains("border-color: #264d73;"));
        assert!(css.contains("color: rgba(255,255,255,0.4);"));
    }

    #[test]
    fn compile_media_multiplication() {
        let src = r".panel {
  color: #333;
  @media (min-width: 800px) {
    color: #000;
    @media print { color: #111; }
  }
}";
        let css = compile(src).unwrap();
        assert!(css.contains("@media (min-width: 800px) {"));
        assert!(css.contains("@media (min-width: 800px) and print {"));
        assert!(css.contains(".panel {"));
    }

    #[test]
    fn compile_compressed_formatter() {
        let mut compiler = Compiler::new();
        compiler.set_formatter("compressed").unwrap();
        let css = compiler
            .compile(".demo { color: #ffffff; font-weight: bold; }", None)
            .unwrap();
        assert_eq!(css, ".demo{color:#fff;font-weight:bold;}");
    }

    #[test]
    fn compile_classic_formatter_single_line() {
        let mut compiler = Compiler::new();
        compiler.set_formatter("classic").unwrap();
        let css = compiler.compile(".a { color: red; }", None).unwrap();
        assert_eq!(css, ".a { color:red; }\n");
    }

    #[test]
    fn unknown_formatter_is_rejected() {
        let mut compiler = Compiler::new();
        assert!(compiler.set_formatter("tabs").is_err());
        assert!(compiler.set_formatter("lessjs").is_ok());
    }

    #[test]
    fn register_and_unregister_function() {
        let mut compiler = Compiler::new();
        compiler.register_function(
            "add-two",
            Box::new(|args| {
                let Value::List { items, .. } = args else {
                    return Ok(None);
                };
                let (Some(Value::Number { value: a, .. }), Some(Value::Number { value: b, .. })) =
                    (items.first(), items.get(1))
                else {
                    return Ok(None);
                };
                Ok(Some(Value::number(a + b, "")))
            }),
        );
        let css = compiler
            .compile(".x { r: add-two(10, 20); }", None)
            .unwrap();
        assert!(css.contains("r: 30;"));

        compiler.unregister_function("add-two");
        let css = compiler
            .compile(".x { r: add-two(10, 20); }", None)
            .unwrap();
        assert!(css.contains("r: add-two(10,20);"));
    }

    #[test]
    fn compile_division_slash_kept_for_font() {
        let css = compile(".x { font: 12px/1.5 sans-serif; width: (100px / 4); }").unwrap();
        assert!(css.contains("font: 12px/1.5 sans-serif;"));
        assert!(css.contains("width: 25px;"));
    }

    #[test]
    fn compile_import_disabled_leaves_marker() {
        let dir = std::env::temp_dir();
        let target = dir.join("less_ferrite_disabled.less");
        std::fs::write(&target, ".a { b: c; }").unwrap();
        let mut compiler = Compiler::new();
        compiler.set_import_disabled(true);
        compiler.add_import_dir(dir);
        let css = compiler
            .compile("@import \"less_ferrite_disabled\";", None)
            .unwrap();
        assert!(css.contains("/* import disabled */"));
        let _ = std::fs::remove_file(target);
    }

    #[test]
    fn compile_css_import_passes_through() {
        let css = compile("@import \"reset.css\";\nbody { margin: 0; }").unwrap();
        assert!(css.starts_with("@import \"reset.css\";"));
        assert!(css.contains("body {"));
    }
}
