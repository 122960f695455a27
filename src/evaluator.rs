use crate::ast::{
    Arena, BlockId, BlockKind, CallArg, FileId, MediaPart, Param, Prop, PropKind, Tag,
};
use crate::env::{lookup, EnvFrame, EnvRef, ImportRecord};
use crate::error::{LessError, LessResult};
use crate::importer;
use crate::parser::Parser;
use crate::serializer::{Formatter, OutBlock, OutKind};
use crate::value::{Value, VarName};
use crate::CustomFunction;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

/// 一次编译的执行器：持有块 Arena、作用域栈与输出树，按声明
/// 顺序展开 mixin、倍乘选择器与 media 查询，并做行级去重。
pub(crate) struct Evaluator<'a> {
    pub(crate) arena: Arena,
    pub(crate) parser: Parser,
    pub(crate) formatter: Formatter,
    pub(crate) env: EnvRef,
    pub(crate) out: Vec<OutBlock>,
    pub(crate) scope: usize,
    pub(crate) import_dirs: Vec<PathBuf>,
    pub(crate) import_disabled: bool,
    pub(crate) user_fns: &'a IndexMap<String, CustomFunction>,
    pub(crate) registered_vars: &'a IndexMap<String, String>,
    pub(crate) parsed_files: &'a mut IndexMap<PathBuf, u64>,
    next_import_id: usize,
    /// 错误定位：当前 prop 的源文件与偏移。导入的 prop 挂在调用方
    /// 块下编译，文件归属靠 `source_override` 纠正。
    pub(crate) source_file: FileId,
    pub(crate) source_pos: Option<usize>,
    source_override: Option<FileId>,
}

impl<'a> Evaluator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        arena: Arena,
        parser: Parser,
        formatter: Formatter,
        import_dirs: Vec<PathBuf>,
        import_disabled: bool,
        user_fns: &'a IndexMap<String, CustomFunction>,
        registered_vars: &'a IndexMap<String, String>,
        parsed_files: &'a mut IndexMap<PathBuf, u64>,
    ) -> Evaluator<'a> {
        Evaluator {
            arena,
            parser,
            formatter,
            env: EnvFrame::child(None, None),
            out: Vec::new(),
            scope: 0,
            import_dirs,
            import_disabled,
            user_fns,
            registered_vars,
            parsed_files,
            next_import_id: 0,
            source_file: 0,
            source_pos: None,
            source_override: None,
        }
    }

    /// 编译整棵树，返回输出树根下标。
    pub(crate) fn compile_tree(&mut self, root: BlockId) -> LessResult<usize> {
        if !self.registered_vars.is_empty() {
            self.inject_variables()?;
        }
        let out_root = self.make_output_block(OutKind::Root, Vec::new(), None);
        self.scope = out_root;
        self.push_env(Some(root));
        self.compile_props(root, out_root)?;
        self.pop_env();
        Ok(out_root)
    }

    /// 注册变量以 LESS 文本形式给出，解析后注入最外层帧。
    fn inject_variables(&mut self) -> LessResult<()> {
        self.push_env(None);
        for (name, text) in self.registered_vars {
            let name = if name.starts_with('@') {
                name.clone()
            } else {
                format!("@{name}")
            };
            let value = Parser::parse_standalone_value(text).map_err(|_| {
                LessError::new(format!("failed to parse passed in variable {name}: {text}"))
            })?;
            self.env.set(name, value);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 作用域栈

    pub(crate) fn push_env(&mut self, block: Option<BlockId>) -> EnvRef {
        let frame = EnvFrame::child(Some(Rc::clone(&self.env)), block);
        self.env = Rc::clone(&frame);
        frame
    }

    pub(crate) fn pop_env(&mut self) -> EnvRef {
        let parent = self
            .env
            .parent
            .clone()
            .unwrap_or_else(|| EnvFrame::child(None, None));
        std::mem::replace(&mut self.env, parent)
    }

    pub(crate) fn get(&self, name: &str) -> LessResult<Value> {
        lookup(&self.env, name).ok_or_else(|| self.error(format!("variable {name} is undefined")))
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> LessError {
        match self.source_pos {
            Some(pos) => {
                let file = &self.arena.files[self.source_file];
                LessError::located(message, file.name.as_deref(), &file.text, pos)
            }
            None => LessError::new(message),
        }
    }

    pub(crate) fn compile_value(&self, value: &Value) -> LessResult<String> {
        value
            .to_css(self.formatter.compress_colors)
            .map_err(|err| self.error(err.message))
    }

    // ------------------------------------------------------------------
    // 块编译

    fn make_output_block(
        &mut self,
        kind: OutKind,
        selectors: Vec<String>,
        parent: Option<usize>,
    ) -> usize {
        self.out.push(OutBlock {
            kind,
            selectors,
            lines: Vec::new(),
            children: Vec::new(),
            parent,
        });
        self.out.len() - 1
    }

    fn compile_block(&mut self, id: BlockId) -> LessResult<()> {
        match self.arena.block(id).kind {
            BlockKind::Rule => self.compile_css_block(id),
            BlockKind::Media => self.compile_media(id),
            BlockKind::Directive => {
                let name = self.arena.block(id).name.clone().unwrap_or_default();
                let value = self.arena.block(id).value.clone();
                let mut selector = format!("@{name}");
                if let Some(value) = value {
                    let reduced = self.reduce(&value, false)?;
                    let text = self.compile_value(&reduced)?;
                    if !text.is_empty() {
                        selector.push(' ');
                        selector.push_str(&text);
                    }
                }
                self.compile_nested_block(id, vec![selector])
            }
            BlockKind::Root => Err(self.error("unknown block type: root")),
        }
    }

    fn compile_css_block(&mut self, id: BlockId) -> LessResult<()> {
        let env = self.push_env(Some(id));
        let tags = self.arena.block(id).tags.clone();
        let selectors = self.compile_selectors(&tags)?;
        let selectors = self.multiply_selectors(selectors);
        *env.selectors.borrow_mut() = Some(selectors.clone());

        let out = self.make_output_block(OutKind::Plain, selectors, Some(self.scope));
        self.out[self.scope].children.push(out);
        self.compile_props(id, out)?;

        // mixin 随身携带声明处作用域
        let env = self.pop_env();
        self.arena.block_mut(id).scope = Some(env);
        Ok(())
    }

    fn compile_nested_block(&mut self, id: BlockId, selectors: Vec<String>) -> LessResult<()> {
        self.push_env(Some(id));
        let out = self.make_output_block(OutKind::Directive, selectors, Some(self.scope));
        self.out[self.scope].children.push(out);
        self.scope = out;
        self.compile_props(id, out)?;
        self.scope = self.out[out].parent.unwrap_or(0);
        self.pop_env();
        Ok(())
    }

    fn compile_media(&mut self, id: BlockId) -> LessResult<()> {
        self.push_env(Some(id));
        let parent_scope = self.media_parent(self.scope);
        let queries = self
            .multiply_media(Some(Rc::clone(&self.env)), None)
            .unwrap_or_default();
        let query = self.compile_media_query(&queries)?;
        let out = self.make_output_block(OutKind::Media, vec![query], Some(parent_scope));
        self.out[parent_scope].children.push(out);
        self.scope = out;
        self.compile_props(id, out)?;

        // media 里直接出现的规则行包一层最近的选择器
        if !self.out[out].lines.is_empty() {
            if let Some(selectors) = self.find_closest_selectors() {
                let orphan = self.make_output_block(OutKind::Plain, selectors, Some(out));
                self.out[orphan].lines = std::mem::take(&mut self.out[out].lines);
                self.out[out].children.insert(0, orphan);
            }
        }
        self.scope = self.out[out].parent.unwrap_or(0);
        self.pop_env();
        Ok(())
    }

    fn media_parent(&self, mut scope: usize) -> usize {
        while let Some(parent) = self.out[scope].parent {
            if matches!(self.out[scope].kind, OutKind::Root | OutKind::Directive) {
                break;
            }
            scope = parent;
        }
        scope
    }

    fn multiply_media(
        &self,
        env: Option<EnvRef>,
        child_queries: Option<Vec<Vec<MediaPart>>>,
    ) -> Option<Vec<Vec<MediaPart>>> {
        let frame = env?;
        let block = frame.block.map(|id| self.arena.block(id));
        match block {
            Some(b) if b.kind == BlockKind::Media => {
                let queries = &b.queries;
                let out = match child_queries {
                    None => queries.clone(),
                    Some(children) => {
                        let mut merged = Vec::new();
                        for parent in queries {
                            for child in &children {
                                let mut q = parent.clone();
                                q.extend(child.iter().cloned());
                                merged.push(q);
                            }
                        }
                        merged
                    }
                };
                self.multiply_media(frame.parent.clone(), Some(out))
            }
            // 普通规则块不影响查询，继续向外
            Some(b) if b.kind == BlockKind::Rule => {
                self.multiply_media(frame.parent.clone(), child_queries)
            }
            // 带类型的非 media 祖先终止收集，返回已算出的查询
            Some(_) => child_queries,
            None => self.multiply_media(frame.parent.clone(), child_queries),
        }
    }

    fn compile_media_query(&mut self, queries: &[Vec<MediaPart>]) -> LessResult<String> {
        let mut compiled = Vec::new();
        for query in queries {
            let mut parts = Vec::new();
            for part in query {
                match part {
                    MediaPart::Type(words) => parts.push(words.join(" ")),
                    MediaPart::Expr { feature, value } => match value {
                        Some(value) => {
                            let reduced = self.reduce(value, false)?;
                            parts.push(format!("({feature}: {})", self.compile_value(&reduced)?));
                        }
                        None => parts.push(format!("({feature})")),
                    },
                    MediaPart::Var(value) => {
                        let reduced = self.reduce(value, false)?;
                        parts.push(self.compile_value(&reduced)?);
                    }
                }
            }
            if !parts.is_empty() {
                compiled.push(parts.join(" and "));
            }
        }
        let mut out = String::from("@media");
        if !compiled.is_empty() {
            out.push(' ');
            out.push_str(&compiled.join(self.formatter.selector_separator));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // 选择器

    fn compile_selectors(&mut self, tags: &[Tag]) -> LessResult<Vec<String>> {
        tags.iter()
            .map(|tag| match tag {
                Tag::Lit(text) => Ok(text.clone()),
                Tag::Interp(value) => {
                    let reduced = self.reduce(value, false)?;
                    Ok(self.compile_value(&reduced)?.trim().to_string())
                }
            })
            .collect()
    }

    fn multiply_selectors(&self, selectors: Vec<String>) -> Vec<String> {
        multiply_selectors_with(self.find_closest_selectors().as_deref(), selectors)
    }

    fn find_closest_selectors(&self) -> Option<Vec<String>> {
        let mut env = Some(Rc::clone(&self.env));
        while let Some(frame) = env {
            if let Some(selectors) = frame.selectors.borrow().as_ref() {
                return Some(selectors.clone());
            }
            env = frame.parent.clone();
        }
        None
    }

    // ------------------------------------------------------------------
    // prop 排序与编译

    fn sort_props(&mut self, props: Vec<Prop>, split: bool) -> (Vec<Prop>, Vec<Prop>) {
        let mut vars: Vec<Prop> = Vec::new();
        let mut imports: Vec<Prop> = Vec::new();
        let mut other: Vec<Prop> = Vec::new();
        let mut stack: Vec<Prop> = Vec::new();

        for mut prop in props {
            let pos = prop.pos;
            match prop.kind {
                PropKind::Comment(_) => stack.push(prop),
                PropKind::Assign { ref name, .. } => {
                    let is_var = name.starts_with('@') && !name.starts_with("@{");
                    stack.push(prop);
                    if is_var {
                        vars.append(&mut stack);
                    } else {
                        other.append(&mut stack);
                    }
                }
                PropKind::Import { .. } => {
                    let import_id = self.next_import_id;
                    self.next_import_id += 1;
                    if let PropKind::Import { ref mut id, .. } = prop.kind {
                        *id = Some(import_id);
                    }
                    stack.push(prop);
                    imports.append(&mut stack);
                    other.push(Prop {
                        kind: PropKind::ImportMixin { id: import_id },
                        pos,
                    });
                }
                _ => {
                    stack.push(prop);
                    other.append(&mut stack);
                }
            }
        }
        other.append(&mut stack);

        // 变量块在 import 前后各出现一次，后一份可能盖掉 import
        // 改写过的值；与原实现保持一致。
        let mut top = vars.clone();
        top.extend(imports);
        top.extend(vars);
        if split {
            (top, other)
        } else {
            top.extend(other);
            (top, Vec::new())
        }
    }

    pub(crate) fn compile_props(&mut self, block: BlockId, out: usize) -> LessResult<()> {
        let props = self.arena.block(block).props.clone();
        let (sorted, _) = self.sort_props(props, false);
        for prop in sorted {
            self.compile_prop(prop, block, out)?;
        }
        let lines = std::mem::take(&mut self.out[out].lines);
        self.out[out].lines = deduplicate(lines);
        Ok(())
    }

    fn compile_prop(&mut self, prop: Prop, block: BlockId, out: usize) -> LessResult<()> {
        self.source_file = self
            .source_override
            .unwrap_or_else(|| self.arena.block(block).file);
        self.source_pos = Some(prop.pos);
        match prop.kind {
            PropKind::Assign { name, value } => {
                if name.starts_with('@') && !name.starts_with("@{") {
                    self.env.set(name, value);
                } else {
                    let name = self.interpolate_property_name(&name)?;
                    let reduced = self.reduce(&value, false)?;
                    let text = self.compile_value(&reduced)?;
                    let line = self.formatter.property(&name, &text);
                    self.out[out].lines.push(line);
                }
                Ok(())
            }
            PropKind::Block(child) => self.compile_block(child),
            PropKind::Call { path, args, suffix } => {
                self.compile_call(&path, args.as_deref(), suffix.as_deref(), block, out)
            }
            PropKind::Raw(text) | PropKind::Comment(text) => {
                self.out[out].lines.push(text);
                Ok(())
            }
            PropKind::Directive { name, value } => {
                let reduced = self.reduce(&value, false)?;
                let text = self.compile_value(&reduced)?;
                let line = if text.is_empty() {
                    format!("@{name};")
                } else {
                    format!("@{name} {text};")
                };
                self.out[out].lines.push(line);
                Ok(())
            }
            PropKind::Import { path, id } => {
                let id = id.unwrap_or(0);
                let reduced = self.reduce(&path, false)?;
                let record = self.try_import(&reduced, block, out)?;
                self.env.imports.borrow_mut().insert(id, record);
                Ok(())
            }
            PropKind::ImportMixin { id } => {
                let record = self.find_import_record(id);
                match record {
                    Some(ImportRecord::Fallback(Some(line))) => {
                        self.out[out].lines.push(line);
                    }
                    Some(ImportRecord::Fallback(None)) | None => {}
                    Some(ImportRecord::Inline { bottom, file, dir }) => {
                        self.compile_imported_props(bottom, block, out, file, Some(dir))?;
                    }
                }
                Ok(())
            }
        }
    }

    fn find_import_record(&self, id: usize) -> Option<ImportRecord> {
        let mut env = Some(Rc::clone(&self.env));
        while let Some(frame) = env {
            if let Some(record) = frame.imports.borrow().get(&id) {
                return Some(record.clone());
            }
            env = frame.parent.clone();
        }
        None
    }

    fn interpolate_property_name(&mut self, raw: &str) -> LessResult<String> {
        if !raw.contains("@{") {
            return Ok(raw.trim().to_string());
        }
        let mut chars = raw.chars().peekable();
        let mut output = String::new();
        while let Some(ch) = chars.next() {
            if ch == '@' && chars.peek() == Some(&'{') {
                chars.next();
                let mut name = String::new();
                for next in chars.by_ref() {
                    if next == '}' {
                        break;
                    }
                    name.push(next);
                }
                if name.is_empty() {
                    return Err(self.error("parse error: empty interpolation in property name"));
                }
                let value = self.reduce(&Value::Variable(VarName::Name(format!("@{name}"))), false)?;
                output.push_str(self.compile_value(&value)?.trim());
            } else {
                output.push(ch);
            }
        }
        Ok(output.trim().to_string())
    }

    // ------------------------------------------------------------------
    // mixin / ruleset 调用

    fn compile_call(
        &mut self,
        path: &[String],
        args: Option<&[CallArg]>,
        suffix: Option<&str>,
        block: BlockId,
        out: usize,
    ) -> LessResult<()> {
        let mut ordered: Vec<Value> = Vec::new();
        let mut keyword: IndexMap<String, Value> = IndexMap::new();
        for arg in args.unwrap_or_default() {
            match arg {
                CallArg::Var(name) => {
                    let value =
                        self.reduce(&Value::Variable(VarName::Name(name.clone())), false)?;
                    ordered.push(value);
                }
                CallArg::Keyword(name, value) => {
                    let value = self.reduce(value, false)?;
                    keyword.insert(name.clone(), value);
                }
                CallArg::Lit(value) => ordered.push(self.reduce(value, false)?),
            }
        }

        let seen = HashSet::new();
        let matches = self.find_blocks(Some(block), path, &ordered, &keyword, &seen)?;
        let Some(mut mixins) = matches else {
            return Err(self.error(format!("{} is undefined", path[0])));
        };
        // ruleset 调用只保留最后一个匹配
        if path[0].starts_with('$') {
            mixins = mixins.split_off(mixins.len() - 1);
        }

        for mixin in mixins {
            // 调用块自身不展开
            if mixin == block {
                continue;
            }

            let mut have_scope = false;
            if let Some(parent) = self.arena.block(mixin).parent {
                if let Some(captured) = self.arena.block(parent).scope.clone() {
                    have_scope = true;
                    let frame = self.push_env(None);
                    *frame.store_parent.borrow_mut() = Some(captured);
                }
            }
            let params = self.arena.block(mixin).params.clone();
            let have_args = params.is_some();
            if let Some(params) = params {
                self.push_env(None);
                self.zip_set_args(&params, &ordered, &keyword)?;
            }

            // mixin 暂时挂到调用点，让其内部的查找从这里出发
            let old_parent = self.arena.block(mixin).parent;
            if mixin != block {
                self.arena.block_mut(mixin).parent = Some(block);
            }

            let props = self.arena.block(mixin).props.clone();
            let (sorted, _) = self.sort_props(props, false);
            for mut sub in sorted {
                if let Some(suffix) = suffix {
                    if let PropKind::Assign { name, value } = &mut sub.kind {
                        if !name.starts_with('@') {
                            *value = Value::List {
                                delim: " ".to_string(),
                                items: vec![value.clone(), Value::keyword(suffix)],
                            };
                        }
                    }
                }
                self.compile_prop(sub, mixin, out)?;
            }

            self.arena.block_mut(mixin).parent = old_parent;
            if have_args {
                self.pop_env();
            }
            if have_scope {
                self.pop_env();
            }
        }
        Ok(())
    }

    /// 按名字路径查找可调用块：只返回最近一个有任何匹配的作用域
    /// 里的全部匹配（less.js 语义）。本节点没有任何匹配时继续向
    /// parent 找。防环的已访问集按分支向下复制，子树里的失败探测
    /// 不会挡住后续的外层回退。
    fn find_blocks(
        &mut self,
        search: Option<BlockId>,
        path: &[String],
        ordered: &[Value],
        keyword: &IndexMap<String, Value>,
        seen: &HashSet<BlockId>,
    ) -> LessResult<Option<Vec<BlockId>>> {
        let Some(node) = search else {
            return Ok(None);
        };
        if seen.contains(&node) {
            return Ok(None);
        }
        let mut seen = seen.clone();
        seen.insert(node);

        if let Some(candidates) = self.arena.block(node).children.get(&path[0]).cloned() {
            if path.len() == 1 {
                let mut matches = Vec::new();
                for candidate in candidates {
                    if self.pattern_match(candidate, ordered, keyword)? {
                        matches.push(candidate);
                    }
                }
                if !matches.is_empty() {
                    return Ok(Some(matches));
                }
            } else {
                let mut matches = Vec::new();
                for candidate in candidates {
                    if let Some(sub) =
                        self.find_blocks(Some(candidate), &path[1..], ordered, keyword, &seen)?
                    {
                        matches.extend(sub);
                    }
                }
                if !matches.is_empty() {
                    return Ok(Some(matches));
                }
            }
        }

        let parent = self.arena.block(node).parent;
        if parent == Some(node) {
            return Ok(None);
        }
        self.find_blocks(parent, path, ordered, keyword, &seen)
    }

    /// 按元数与字面值匹配，守卫按"析取的合取"求值：每个合取组
    /// 绑一帧实参，组内全部守卫通过才算组通过。
    fn pattern_match(
        &mut self,
        id: BlockId,
        ordered: &[Value],
        keyword: &IndexMap<String, Value>,
    ) -> LessResult<bool> {
        let guards = self.arena.block(id).guards.clone();
        let params = self.arena.block(id).params.clone();
        let is_vararg = self.arena.block(id).is_vararg;

        if let Some(guards) = guards {
            let mut group_passed = false;
            for group in &guards {
                self.push_env(None);
                if let Some(params) = &params {
                    self.zip_set_args(params, ordered, keyword)?;
                }
                group_passed = true;
                for guard in group {
                    let mut passed = self.reduce(&guard.cond, false)?.is_true();
                    if guard.negate {
                        passed = !passed;
                    }
                    if !passed {
                        group_passed = false;
                        break;
                    }
                }
                self.pop_env();
                if group_passed {
                    break;
                }
            }
            if !group_passed {
                return Ok(false);
            }
        }

        let params = match params {
            None => {
                return Ok(is_vararg || (ordered.is_empty() && keyword.is_empty()));
            }
            Some(params) if params.is_empty() => {
                return Ok(is_vararg || (ordered.is_empty() && keyword.is_empty()));
            }
            Some(params) => params,
        };

        // 关键字实参先从匹配序列里剔除
        let remaining: Vec<&Param> = params
            .iter()
            .filter(|param| {
                !matches!(param, Param::Named { name, .. } if keyword.contains_key(name))
            })
            .collect();

        let mut last: isize = -1;
        for (i, param) in remaining.iter().enumerate() {
            last = i as isize;
            match param {
                Param::Lit(expected) => match ordered.get(i) {
                    Some(actual) if actual == expected => {}
                    _ => return Ok(false),
                },
                Param::Named { default, .. } => {
                    if ordered.get(i).is_none() && default.is_none() {
                        return Ok(false);
                    }
                }
                Param::Rest(_) => {
                    last -= 1;
                    break;
                }
            }
        }

        if is_vararg {
            return Ok(true);
        }
        // 默认值参数吸收多余实参，所以是 ≥
        let num_matched = (last + 1) as usize;
        Ok(num_matched >= ordered.len())
    }

    /// 绑定声明参数：关键字优先，然后按位消费，最后落默认值；
    /// 末尾 rest 参数吸收剩余按位实参。
    fn zip_set_args(
        &mut self,
        params: &[Param],
        ordered: &[Value],
        keyword: &IndexMap<String, Value>,
    ) -> LessResult<()> {
        let mut assigned = Vec::new();
        let mut next = 0usize;
        for param in params {
            match param {
                Param::Named { name, default } => {
                    let value = if let Some(value) = keyword.get(name) {
                        value.clone()
                    } else if let Some(value) = ordered.get(next) {
                        next += 1;
                        value.clone()
                    } else if let Some(default) = default {
                        default.clone()
                    } else {
                        return Err(self.error(format!("Failed to assign arg {name}")));
                    };
                    let value = self.reduce(&value, false)?;
                    self.env.set(name.clone(), value.clone());
                    assigned.push(value);
                }
                _ => next += 1,
            }
        }
        if let Some(Param::Rest(name)) = params.last() {
            let rest: Vec<Value> = ordered.iter().skip(params.len() - 1).cloned().collect();
            let value = self.reduce(
                &Value::List {
                    delim: " ".to_string(),
                    items: rest,
                },
                false,
            )?;
            self.env.set(name.clone(), value);
        }
        *self.env.arguments.borrow_mut() = Some(assigned);
        Ok(())
    }

    // ------------------------------------------------------------------
    // import

    fn try_import(
        &mut self,
        path: &Value,
        parent: BlockId,
        out: usize,
    ) -> LessResult<ImportRecord> {
        let mut path_value = path.clone();
        if let Value::Function { name, args } = &path_value {
            if name == "url" {
                path_value = match args.as_ref() {
                    Value::List { items, .. } if items.len() == 1 => items[0].clone(),
                    other => other.clone(),
                };
            }
        }
        let fallback = |ev: &Self| -> LessResult<ImportRecord> {
            let line = format!("@import {};", ev.compile_value(path)?);
            Ok(ImportRecord::Fallback(Some(line)))
        };

        let Some(coerced) = crate::reducer::coerce_string(&path_value) else {
            return fallback(self);
        };
        let unquoted = self.lib_e(&coerced)?;
        let url = self.compile_value(&unquoted)?;
        // .css 的导入留给浏览器
        if url.ends_with(".css") {
            return fallback(self);
        }
        let Some(real_path) = importer::find_import(&self.import_dirs, &url) else {
            return fallback(self);
        };
        if self.import_disabled {
            return Ok(ImportRecord::Fallback(Some(
                "/* import disabled */".to_string(),
            )));
        }
        let canonical = real_path.canonicalize().unwrap_or(real_path);
        // 环导入：同一规范路径只展开一次
        if self.parsed_files.contains_key(&canonical) {
            return Ok(ImportRecord::Fallback(None));
        }
        self.parsed_files
            .insert(canonical.clone(), importer::mtime(&canonical));

        let source = fs::read_to_string(&canonical).map_err(|err| {
            self.error(format!(
                "load error: failed to read {}: {err}",
                canonical.display()
            ))
        })?;
        let display = canonical.display().to_string();
        let import_root = self
            .parser
            .parse(&mut self.arena, &source, Some(&display))?;
        let import_file = self.arena.block(import_root).file;

        // 导入文件的块挂到当前块下，children 一并并入
        let root_props = self.arena.block(import_root).props.clone();
        for prop in &root_props {
            if let PropKind::Block(child) = prop.kind {
                self.arena.block_mut(child).parent = Some(parent);
            }
        }
        let children = self.arena.block(import_root).children.clone();
        for (name, ids) in children {
            self.arena
                .block_mut(parent)
                .children
                .entry(name)
                .or_default()
                .extend(ids);
        }

        let dir = canonical
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        let (top, bottom) = self.sort_props(root_props, true);
        self.compile_imported_props(top, parent, out, import_file, Some(dir.clone()))?;
        Ok(ImportRecord::Inline {
            bottom,
            file: import_file,
            dir,
        })
    }

    fn compile_imported_props(
        &mut self,
        props: Vec<Prop>,
        block: BlockId,
        out: usize,
        file: FileId,
        dir: Option<PathBuf>,
    ) -> LessResult<()> {
        let old_override = self.source_override;
        let old_dirs = self.import_dirs.clone();
        if let Some(dir) = dir {
            self.import_dirs.insert(0, dir);
        }
        self.source_override = Some(file);
        let mut result = Ok(());
        for prop in props {
            result = self.compile_prop(prop, block, out);
            if result.is_err() {
                break;
            }
        }
        self.import_dirs = old_dirs;
        self.source_override = old_override;
        result
    }
}

/// 父选择器展开：`&` 逐个替换为 parent；没有 `&` 时 parent 前置。
fn expand_parent_selectors(tag: &str, replace: &str) -> (String, usize) {
    let count = tag.matches('&').count();
    (tag.replace('&', replace), count)
}

fn multiply_selectors_with(parents: Option<&[String]>, selectors: Vec<String>) -> Vec<String> {
    let parents = match parents {
        Some(parents) if !parents.is_empty() => parents,
        // 顶层没有 parent，`&` 替换为空串
        _ => {
            return selectors
                .iter()
                .map(|s| expand_parent_selectors(s, "").0)
                .collect();
        }
    };
    let mut out = Vec::new();
    for parent in parents {
        for child in &selectors {
            let (expanded, count) = expand_parent_selectors(child, parent);
            if count > 0 {
                out.push(expanded.trim().to_string());
            } else {
                out.push(format!("{} {}", parent.trim(), child.trim()));
            }
        }
    }
    out
}

/// 行级去重：保留非注释行的首次出现，重复行前面的注释合并到
/// 保留副本之前，尾部注释原样追加。
fn deduplicate(lines: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    let mut comments: Vec<String> = Vec::new();
    for line in lines {
        if line.starts_with("/*") {
            comments.push(line);
            continue;
        }
        if !unique.contains(&line) {
            unique.push(line.clone());
        }
        let at = unique.iter().position(|l| *l == line).unwrap_or(0);
        unique.splice(at..at, comments.drain(..));
    }
    unique.extend(comments);
    unique
}
