use crate::ast::{
    Arena, BlockId, BlockKind, CallArg, FileId, Guard, MediaPart, Param, Prop, PropKind, Tag,
};
use crate::error::{LessError, LessResult};
use crate::value::{StringPart, Value, VarName};

/// LESS 解析器，把源码解析成 Arena 里的块树。每个被导入的文件
/// 各自 parse 一次，共享同一个 Arena，块 id 全局稳定。
pub struct Parser {
    /// 是否把 `/* … */` 注释保留为 prop。
    pub write_comments: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

impl Parser {
    pub fn new() -> Parser {
        Parser {
            write_comments: false,
        }
    }

    pub fn parse(
        &self,
        arena: &mut Arena,
        source: &str,
        name: Option<&str>,
    ) -> LessResult<BlockId> {
        let file = arena.add_file(name.map(str::to_string), source.to_string());
        let mut session = Session {
            cur: Cursor::new(source),
            arena,
            file,
            file_name: name.map(str::to_string),
            write_comments: self.write_comments,
            in_parens: false,
            current_property: None,
        };
        let root = session.arena.alloc(BlockKind::Root, None, file, 0);
        session.parse_body(root, true)?;
        Ok(root)
    }

    /// 解析一段独立的属性值文本（注册变量注入时用）。
    pub fn parse_standalone_value(source: &str) -> LessResult<Value> {
        let mut arena = Arena::new();
        let file = arena.add_file(None, source.to_string());
        let mut session = Session {
            cur: Cursor::new(source),
            arena: &mut arena,
            file,
            file_name: None,
            write_comments: false,
            in_parens: false,
            current_property: None,
        };
        session
            .parse_property_value()?
            .ok_or_else(|| LessError::new(format!("failed to parse value: {source}")))
    }
}

enum StatementKind {
    Declaration,
    NestedBlock,
}

struct Session<'a> {
    cur: Cursor<'a>,
    arena: &'a mut Arena,
    file: FileId,
    file_name: Option<String>,
    write_comments: bool,
    /// 括号内的算术不受空白规则限制。
    in_parens: bool,
    /// 当前属性名，font 缩写的 `/` 直通判断用。
    current_property: Option<String>,
}

impl<'a> Session<'a> {
    // ------------------------------------------------------------------
    // 语句层

    fn parse_body(&mut self, block: BlockId, top_level: bool) -> LessResult<()> {
        loop {
            self.cur.skip_plain_ws();
            if self.cur.starts_with("//") {
                self.cur.skip_line();
                continue;
            }
            if self.cur.starts_with("/*") {
                let pos = self.cur.pos();
                let text = self.read_block_comment()?;
                if self.write_comments {
                    self.push_prop(block, PropKind::Comment(text), pos);
                }
                continue;
            }
            match self.cur.peek() {
                None => {
                    if top_level {
                        return Ok(());
                    }
                    return Err(self.err_at("parse error: missing closing `}`", self.cur.pos()));
                }
                Some('}') if !top_level => {
                    self.cur.bump();
                    return Ok(());
                }
                Some(';') => {
                    self.cur.bump();
                    continue;
                }
                _ => self.parse_statement(block)?,
            }
        }
    }

    fn parse_statement(&mut self, block: BlockId) -> LessResult<()> {
        let start = self.cur.pos();

        if self.cur.peek() == Some('@') && !self.cur.starts_with("@{") {
            if self.probe_variable_assign() {
                return self.parse_variable_assign(block, start);
            }
            if self.probe_at_keyword("import") {
                return self.parse_import(block, start);
            }
            if self.probe_at_keyword("media") {
                return self.parse_media(block, start);
            }
            // 旧式 `@name` mixin 语法；已知的 at 规则名不参与
            if !self.probe_reserved_directive() {
                if self.probe_mixin_def() {
                    return self.parse_mixin_def(block, start);
                }
                if self.probe_mixin_call() {
                    return self.parse_mixin_call(block, start);
                }
            }
            return self.parse_directive(block, start);
        }

        if self.probe_mixin_def() {
            return self.parse_mixin_def(block, start);
        }
        if self.probe_mixin_call() {
            return self.parse_mixin_call(block, start);
        }

        match self.detect_statement_kind() {
            Some(StatementKind::NestedBlock) => self.parse_rule_block(block, start),
            Some(StatementKind::Declaration) => self.parse_declaration(block, start),
            None => Err(self.err_at("parse error", start)),
        }
    }

    fn parse_variable_assign(&mut self, block: BlockId, start: usize) -> LessResult<()> {
        self.cur.bump(); // '@'
        let name = format!("@{}", self.read_ident());
        self.lex_ws();
        self.expect(':')?;
        let value = self
            .parse_property_value()?
            .ok_or_else(|| self.err_at("parse error: expected value", self.cur.pos()))?;
        self.end_statement()?;
        self.push_prop(block, PropKind::Assign { name, value }, start);
        Ok(())
    }

    fn parse_import(&mut self, block: BlockId, start: usize) -> LessResult<()> {
        self.cur.bump(); // '@'
        self.read_ident(); // "import"
        self.lex_ws();
        let path = self
            .parse_property_value()?
            .ok_or_else(|| self.err_at("parse error: expected import path", self.cur.pos()))?;
        self.end_statement()?;
        self.push_prop(block, PropKind::Import { path, id: None }, start);
        Ok(())
    }

    fn parse_media(&mut self, block: BlockId, start: usize) -> LessResult<()> {
        self.cur.bump(); // '@'
        self.read_ident(); // "media"
        self.lex_ws();
        let queries = self.parse_media_queries()?;
        self.expect('{')?;
        let child = self.arena.alloc(BlockKind::Media, Some(block), self.file, start);
        self.arena.block_mut(child).queries = queries;
        self.parse_body(child, false)?;
        self.push_prop(block, PropKind::Block(child), start);
        Ok(())
    }

    fn parse_directive(&mut self, block: BlockId, start: usize) -> LessResult<()> {
        self.cur.bump(); // '@'
        let name = self.read_ident();
        if name.is_empty() {
            return Err(self.err_at("parse error: expected directive name", start));
        }
        self.lex_ws();
        if self.directive_opens_block() {
            let value = self.read_open_string('{')?;
            self.expect('{')?;
            let child = self
                .arena
                .alloc(BlockKind::Directive, Some(block), self.file, start);
            self.arena.block_mut(child).name = Some(name);
            self.arena.block_mut(child).value = value;
            self.parse_body(child, false)?;
            self.push_prop(block, PropKind::Block(child), start);
        } else {
            let value = self
                .read_open_string(';')?
                .unwrap_or(Value::Str {
                    delim: None,
                    parts: Vec::new(),
                });
            self.end_statement()?;
            self.push_prop(block, PropKind::Directive { name, value }, start);
        }
        Ok(())
    }

    /// 向前看该 at-rule 是块形式（先遇 `{`）还是行形式（先遇 `;`）。
    fn directive_opens_block(&self) -> bool {
        let mut probe = self.cur.clone();
        let mut depth = 0usize;
        while let Some(ch) = probe.peek() {
            match ch {
                '{' if depth == 0 => return true,
                ';' if depth == 0 => return false,
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                '"' | '\'' => {
                    probe.bump();
                    probe.skip_quoted(ch);
                    continue;
                }
                _ => {}
            }
            probe.bump();
        }
        false
    }

    fn parse_mixin_def(&mut self, block: BlockId, start: usize) -> LessResult<()> {
        let tag = self.read_simple_tag().unwrap();
        self.lex_ws();
        let (params, is_vararg) = self.parse_params()?;
        self.lex_ws();
        let guards = if self.eat_keyword("when") {
            Some(self.parse_guards()?)
        } else {
            None
        };
        self.expect('{')?;
        let child = self.arena.alloc(BlockKind::Rule, Some(block), self.file, start);
        {
            let b = self.arena.block_mut(child);
            b.tags = vec![Tag::Lit(tag.clone())];
            b.params = Some(params);
            b.is_vararg = is_vararg;
            b.guards = guards;
        }
        self.parse_body(child, false)?;
        // 带参数的块是隐藏的：只注册为可调用子块，不产出 CSS。
        self.arena.register_child(block, &tag, child);
        Ok(())
    }

    fn parse_mixin_call(&mut self, block: BlockId, start: usize) -> LessResult<()> {
        let mut path = Vec::new();
        loop {
            match self.read_simple_tag() {
                Some(tag) => path.push(tag),
                None => break,
            }
            self.lex_ws();
            if self.cur.peek() == Some('>') {
                self.cur.bump();
                self.lex_ws();
            }
        }
        if path.is_empty() {
            return Err(self.err_at("parse error: expected mixin name", start));
        }
        let args = if self.cur.peek() == Some('(') {
            Some(self.parse_call_args()?)
        } else {
            None
        };
        self.lex_ws();
        let suffix = if self.cur.peek() == Some('!') {
            self.cur.bump();
            let word = self.read_ident();
            self.lex_ws();
            Some(format!("!{word}"))
        } else {
            None
        };
        self.end_statement()?;
        self.push_prop(block, PropKind::Call { path, args, suffix }, start);
        Ok(())
    }

    fn parse_rule_block(&mut self, block: BlockId, start: usize) -> LessResult<()> {
        let tags = self.parse_selector_tags()?;
        self.expect('{')?;
        let child = self.arena.alloc(BlockKind::Rule, Some(block), self.file, start);
        self.arena.block_mut(child).tags = tags.clone();
        self.parse_body(child, false)?;

        let mut all_ruleset = true;
        for tag in &tags {
            if let Tag::Lit(text) = tag {
                self.arena.register_child(block, text, child);
                if !text.starts_with('$') {
                    all_ruleset = false;
                }
            } else {
                all_ruleset = false;
            }
        }
        // 纯 `$name` 命名的块只能被调用，不直接产出。
        if !all_ruleset {
            self.push_prop(block, PropKind::Block(child), start);
        }
        Ok(())
    }

    fn parse_declaration(&mut self, block: BlockId, start: usize) -> LessResult<()> {
        let name = self.read_property_name();
        if name.is_empty() {
            return Err(self.err_at("parse error: expected property name", start));
        }
        self.lex_ws();
        self.expect(':')?;
        self.current_property = Some(name.to_ascii_lowercase());
        let value = self.parse_property_value();
        self.current_property = None;
        let value = value?
            .ok_or_else(|| self.err_at("parse error: expected property value", self.cur.pos()))?;
        self.end_statement()?;
        self.push_prop(block, PropKind::Assign { name, value }, start);
        Ok(())
    }

    fn push_prop(&mut self, block: BlockId, kind: PropKind, pos: usize) {
        self.arena.block_mut(block).props.push(Prop { kind, pos });
    }

    /// 语句结束：`;` 或紧邻的 `}`。
    fn end_statement(&mut self) -> LessResult<()> {
        self.lex_ws();
        match self.cur.peek() {
            Some(';') => {
                self.cur.bump();
                self.lex_ws();
                Ok(())
            }
            Some('}') | None => Ok(()),
            _ => Err(self.err_at("parse error: expected `;`", self.cur.pos())),
        }
    }

    // ------------------------------------------------------------------
    // 探测

    fn probe_variable_assign(&self) -> bool {
        let mut probe = self.cur.clone();
        probe.bump(); // '@'
        if probe.read_ident().is_empty() {
            return false;
        }
        probe.skip_plain_ws();
        probe.peek() == Some(':')
    }

    fn probe_at_keyword(&self, word: &str) -> bool {
        let mut probe = self.cur.clone();
        probe.bump();
        probe.read_ident().eq_ignore_ascii_case(word)
    }

    /// 标准 at 规则名（含厂商前缀变体）保留给 directive 解析。
    fn probe_reserved_directive(&self) -> bool {
        let mut probe = self.cur.clone();
        probe.bump(); // '@'
        let name = probe.read_ident().to_ascii_lowercase();
        let base = name
            .strip_prefix('-')
            .and_then(|rest| rest.split_once('-'))
            .map(|(_, base)| base.to_string())
            .unwrap_or(name);
        matches!(
            base.as_str(),
            "charset"
                | "namespace"
                | "document"
                | "supports"
                | "page"
                | "font-face"
                | "keyframes"
                | "viewport"
                | "counter-style"
                | "font-feature-values"
        )
    }

    fn probe_mixin_def(&self) -> bool {
        let mut probe = self.cur.clone();
        if !probe.eat_simple_tag() {
            return false;
        }
        probe.skip_plain_ws();
        if probe.peek() != Some('(') {
            return false;
        }
        if !probe.skip_balanced_parens() {
            return false;
        }
        probe.skip_plain_ws();
        if probe.eat_word("when") {
            let mut depth = 0usize;
            while let Some(ch) = probe.peek() {
                match ch {
                    '{' if depth == 0 => break,
                    '(' => depth += 1,
                    ')' => depth = depth.saturating_sub(1),
                    _ => {}
                }
                probe.bump();
            }
        }
        probe.peek() == Some('{')
    }

    fn probe_mixin_call(&self) -> bool {
        let mut probe = self.cur.clone();
        if !probe.eat_simple_tag() {
            return false;
        }
        loop {
            probe.skip_plain_ws();
            if probe.peek() == Some('>') {
                probe.bump();
                probe.skip_plain_ws();
            }
            if !probe.eat_simple_tag() {
                break;
            }
        }
        probe.skip_plain_ws();
        if probe.peek() == Some('(') && !probe.skip_balanced_parens() {
            return false;
        }
        probe.skip_plain_ws();
        if probe.peek() == Some('!') {
            probe.bump();
            probe.read_ident();
            probe.skip_plain_ws();
        }
        matches!(probe.peek(), Some(';') | Some('}') | None)
    }

    /// 向前看判断是声明还是嵌套块。
    fn detect_statement_kind(&self) -> Option<StatementKind> {
        let mut probe = self.cur.clone();
        let mut saw_colon = false;
        let mut depth = 0usize;
        while let Some(ch) = probe.peek() {
            match ch {
                '@' if probe.starts_with("@{") => {
                    probe.bump();
                    probe.bump();
                    while let Some(inner) = probe.bump() {
                        if inner == '}' {
                            break;
                        }
                    }
                    continue;
                }
                '"' | '\'' => {
                    probe.bump();
                    probe.skip_quoted(ch);
                    continue;
                }
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '{' if depth == 0 => return Some(StatementKind::NestedBlock),
                ';' if depth == 0 => return Some(StatementKind::Declaration),
                '}' if depth == 0 => {
                    return saw_colon.then_some(StatementKind::Declaration);
                }
                ':' => saw_colon = true,
                _ => {}
            }
            probe.bump();
        }
        saw_colon.then_some(StatementKind::Declaration)
    }

    // ------------------------------------------------------------------
    // 选择器与注释

    fn parse_selector_tags(&mut self) -> LessResult<Vec<Tag>> {
        let mut tags = Vec::new();
        loop {
            tags.push(self.parse_single_tag()?);
            if self.cur.peek() == Some(',') {
                self.cur.bump();
                self.lex_ws();
            } else {
                break;
            }
        }
        Ok(tags)
    }

    fn parse_single_tag(&mut self) -> LessResult<Tag> {
        let mut parts: Vec<StringPart> = Vec::new();
        let mut lit = String::new();
        let mut depth = 0usize;
        loop {
            match self.cur.peek() {
                None => return Err(self.err_at("parse error: missing `{`", self.cur.pos())),
                Some('{') if depth == 0 => break,
                Some(',') if depth == 0 => break,
                Some('@') if self.cur.starts_with("@{") => {
                    self.cur.bump();
                    self.cur.bump();
                    let name = self.read_ident();
                    if self.cur.peek() == Some('}') {
                        self.cur.bump();
                    }
                    if !lit.is_empty() {
                        parts.push(StringPart::Literal(std::mem::take(&mut lit)));
                    }
                    parts.push(StringPart::Part(Value::Interpolate {
                        inner: Box::new(Value::keyword(name)),
                        strip_quotes: false,
                    }));
                }
                Some(q @ ('"' | '\'')) => {
                    lit.push(q);
                    self.cur.bump();
                    while let Some(ch) = self.cur.bump() {
                        lit.push(ch);
                        if ch == q {
                            break;
                        }
                    }
                }
                Some(ch) => {
                    match ch {
                        '(' | '[' => depth += 1,
                        ')' | ']' => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                    lit.push(ch);
                    self.cur.bump();
                }
            }
        }
        if parts.is_empty() {
            Ok(Tag::Lit(lit.trim().to_string()))
        } else {
            let tail = lit.trim_end();
            if !tail.is_empty() {
                parts.push(StringPart::Literal(tail.to_string()));
            }
            Ok(Tag::Interp(Value::Str { delim: None, parts }))
        }
    }

    fn read_block_comment(&mut self) -> LessResult<String> {
        let start = self.cur.pos();
        self.cur.bump();
        self.cur.bump();
        loop {
            if self.cur.starts_with("*/") {
                self.cur.bump();
                self.cur.bump();
                return Ok(self.cur.slice_from(start).to_string());
            }
            if self.cur.bump().is_none() {
                return Err(self.err_at("parse error: unclosed comment", start));
            }
        }
    }

    // ------------------------------------------------------------------
    // 参数、实参与守卫

    fn parse_params(&mut self) -> LessResult<(Vec<Param>, bool)> {
        self.expect('(')?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        loop {
            self.lex_ws();
            if self.cur.peek() == Some(')') {
                self.cur.bump();
                self.lex_ws();
                return Ok((params, is_vararg));
            }
            if self.cur.starts_with("...") {
                self.cur.advance(3);
                is_vararg = true;
                break;
            }
            match self.parse_expression_list()? {
                Some(Value::Variable(VarName::Name(name))) => {
                    if self.cur.peek() == Some(':') {
                        self.cur.bump();
                        self.lex_ws();
                        let default = self.parse_expression_list()?.ok_or_else(|| {
                            self.err_at("parse error: expected default value", self.cur.pos())
                        })?;
                        params.push(Param::Named {
                            name,
                            default: Some(default),
                        });
                    } else if self.cur.starts_with("...") {
                        self.cur.advance(3);
                        params.push(Param::Rest(name));
                        is_vararg = true;
                        break;
                    } else {
                        params.push(Param::Named {
                            name,
                            default: None,
                        });
                    }
                }
                Some(value) => params.push(Param::Lit(value)),
                None => {}
            }
            self.lex_ws();
            if self.cur.peek() == Some(',') {
                self.cur.bump();
            } else {
                break;
            }
        }
        self.lex_ws();
        self.expect(')')?;
        Ok((params, is_vararg))
    }

    fn parse_call_args(&mut self) -> LessResult<Vec<CallArg>> {
        self.expect('(')?;
        let mut args = Vec::new();
        loop {
            self.lex_ws();
            if self.cur.peek() == Some(')') {
                self.cur.bump();
                self.lex_ws();
                return Ok(args);
            }
            match self.parse_expression_list()? {
                Some(Value::Variable(VarName::Name(name))) => {
                    if self.cur.peek() == Some(':') {
                        self.cur.bump();
                        self.lex_ws();
                        let value = self.parse_expression_list()?.ok_or_else(|| {
                            self.err_at("parse error: expected argument value", self.cur.pos())
                        })?;
                        args.push(CallArg::Keyword(name, value));
                    } else {
                        args.push(CallArg::Var(name));
                    }
                }
                Some(value) => args.push(CallArg::Lit(value)),
                None => {}
            }
            self.lex_ws();
            if self.cur.peek() == Some(',') {
                self.cur.bump();
            } else {
                break;
            }
        }
        self.lex_ws();
        self.expect(')')?;
        Ok(args)
    }

    fn parse_guards(&mut self) -> LessResult<Vec<Vec<Guard>>> {
        let mut groups = Vec::new();
        loop {
            let mut group = Vec::new();
            loop {
                self.lex_ws();
                let negate = self.eat_keyword("not");
                self.lex_ws();
                self.expect('(')?;
                let was = self.in_parens;
                self.in_parens = true;
                let cond = self.parse_expression();
                self.in_parens = was;
                let cond = cond?.ok_or_else(|| {
                    self.err_at("parse error: expected guard expression", self.cur.pos())
                })?;
                self.expect(')')?;
                group.push(Guard { cond, negate });
                if !self.eat_keyword("and") {
                    break;
                }
            }
            groups.push(group);
            self.lex_ws();
            if self.cur.peek() == Some(',') {
                self.cur.bump();
            } else {
                break;
            }
        }
        Ok(groups)
    }

    // ------------------------------------------------------------------
    // media 查询

    fn parse_media_queries(&mut self) -> LessResult<Vec<Vec<MediaPart>>> {
        let mut queries = Vec::new();
        loop {
            queries.push(self.parse_media_query()?);
            if self.cur.peek() == Some(',') {
                self.cur.bump();
                self.lex_ws();
            } else {
                break;
            }
        }
        Ok(queries)
    }

    fn parse_media_query(&mut self) -> LessResult<Vec<MediaPart>> {
        let mut parts = Vec::new();
        let mut words = Vec::new();
        if self.eat_keyword("only") {
            words.push("only".to_string());
        } else if self.eat_keyword("not") {
            words.push("not".to_string());
        }
        if matches!(self.cur.peek(), Some(c) if c.is_ascii_alphabetic()) {
            words.push(self.read_ident());
            self.lex_ws();
        }
        let had_type = !words.is_empty();
        if had_type {
            parts.push(MediaPart::Type(words));
        }
        if !had_type || self.eat_keyword("and") {
            loop {
                parts.push(self.parse_media_expression()?);
                if !self.eat_keyword("and") {
                    break;
                }
            }
        }
        Ok(parts)
    }

    fn parse_media_expression(&mut self) -> LessResult<MediaPart> {
        self.lex_ws();
        match self.cur.peek() {
            Some('(') => {
                self.cur.bump();
                self.lex_ws();
                let feature = self.read_ident();
                if feature.is_empty() {
                    return Err(self.err_at("parse error: expected media feature", self.cur.pos()));
                }
                self.lex_ws();
                let value = if self.cur.peek() == Some(':') {
                    self.cur.bump();
                    self.lex_ws();
                    let was = self.in_parens;
                    self.in_parens = true;
                    let v = self.parse_expression();
                    self.in_parens = was;
                    Some(v?.ok_or_else(|| {
                        self.err_at("parse error: expected media value", self.cur.pos())
                    })?)
                } else {
                    None
                };
                self.expect(')')?;
                Ok(MediaPart::Expr { feature, value })
            }
            Some('@') => {
                let value = self
                    .parse_value()?
                    .ok_or_else(|| self.err_at("parse error: expected media query", self.cur.pos()))?;
                Ok(MediaPart::Var(value))
            }
            _ => Err(self.err_at("parse error: expected media query", self.cur.pos())),
        }
    }

    // ------------------------------------------------------------------
    // 值与表达式

    fn parse_property_value(&mut self) -> LessResult<Option<Value>> {
        let mut values = Vec::new();
        loop {
            match self.parse_expression_list()? {
                Some(v) => values.push(v),
                None => break,
            }
            if self.cur.peek() == Some(',') {
                self.cur.bump();
                self.lex_ws();
            } else {
                break;
            }
        }
        if values.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::compress_list(values, ", ")))
        }
    }

    fn parse_expression_list(&mut self) -> LessResult<Option<Value>> {
        let mut exps = Vec::new();
        while let Some(exp) = self.parse_expression()? {
            exps.push(exp);
        }
        if exps.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::compress_list(exps, " ")))
        }
    }

    fn parse_expression(&mut self) -> LessResult<Option<Value>> {
        let Some(lhs) = self.parse_value()? else {
            return Ok(None);
        };
        let mut out = self.exp_helper(lhs, 0)?;
        // font 缩写的 `/` 不作除法，原样拼回。
        if !self.in_parens
            && self.current_property.as_deref() == Some("font")
            && self.cur.peek() == Some('/')
        {
            self.cur.bump();
            self.lex_ws();
            if let Some(rhs) = self.parse_value()? {
                out = Value::List {
                    delim: String::new(),
                    items: vec![out, Value::keyword("/"), rhs],
                };
            }
        }
        Ok(Some(out))
    }

    fn exp_helper(&mut self, mut lhs: Value, min_p: u8) -> LessResult<Value> {
        loop {
            let save = self.cur.pos();
            let ws_before = self.cur.last_was_ws();
            let need_white = ws_before && !self.in_parens;
            let Some(op) = self.match_operator(need_white) else {
                break;
            };
            if precedence(&op) < min_p {
                self.cur.set(save);
                break;
            }
            if op == "/"
                && !self.in_parens
                && self.current_property.as_deref() == Some("font")
            {
                self.cur.set(save);
                break;
            }
            self.lex_ws();
            let ws_after = self.cur.last_was_ws();
            let Some(mut rhs) = self.parse_value()? else {
                self.cur.set(save);
                break;
            };
            if let Some(next) = self.peek_operator() {
                if precedence(&next) > precedence(&op) {
                    rhs = self.exp_helper(rhs, precedence(&next))?;
                }
            }
            lhs = Value::Expression {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
                ws_before,
                ws_after,
            };
        }
        Ok(lhs)
    }

    fn match_operator(&mut self, need_white: bool) -> Option<String> {
        let rest = self.cur.rest();
        for op in OPERATORS {
            if let Some(tail) = rest.strip_prefix(op) {
                if need_white && !tail.chars().next().is_some_and(|c| c.is_whitespace()) {
                    return None;
                }
                self.cur.advance(op.len());
                return Some(op.to_string());
            }
        }
        None
    }

    fn peek_operator(&self) -> Option<String> {
        let rest = self.cur.rest();
        OPERATORS
            .iter()
            .find(|op| rest.starts_with(**op))
            .map(|op| op.to_string())
    }

    fn parse_value(&mut self) -> LessResult<Option<Value>> {
        match self.cur.peek() {
            None => Ok(None),
            Some('-') => match self.cur.peek_at(1) {
                Some('(') => {
                    self.cur.bump();
                    self.cur.bump();
                    self.lex_ws();
                    let was = self.in_parens;
                    self.in_parens = true;
                    let inner = self.parse_expression();
                    self.in_parens = was;
                    let inner = inner?.ok_or_else(|| {
                        self.err_at("parse error: expected expression", self.cur.pos())
                    })?;
                    self.expect(')')?;
                    Ok(Some(Value::Unary {
                        op: '-',
                        inner: Box::new(inner),
                    }))
                }
                Some(c) if c.is_ascii_digit() || c == '.' => Ok(self.parse_number()),
                _ => Ok(self.parse_keyword_value()),
            },
            Some('(') => {
                self.cur.bump();
                self.lex_ws();
                let was = self.in_parens;
                self.in_parens = true;
                let inner = self.parse_expression();
                self.in_parens = was;
                let inner = inner?
                    .ok_or_else(|| self.err_at("parse error: expected expression", self.cur.pos()))?;
                self.expect(')')?;
                Ok(Some(inner))
            }
            Some(c) if c.is_ascii_digit() => Ok(self.parse_number()),
            Some('.') if matches!(self.cur.peek_at(1), Some(d) if d.is_ascii_digit()) => {
                Ok(self.parse_number())
            }
            Some('#') => Ok(self.parse_color()),
            Some('"') | Some('\'') => self.parse_string().map(Some),
            Some('~') => {
                if matches!(self.cur.peek_at(1), Some('"') | Some('\'')) {
                    self.cur.bump();
                    let inner = self.parse_string()?;
                    Ok(Some(Value::Escape(Box::new(inner))))
                } else {
                    Ok(None)
                }
            }
            Some('@') => Ok(self.parse_variable()),
            _ => {
                if let Some(func) = self.parse_function()? {
                    return Ok(Some(func));
                }
                Ok(self.parse_keyword_value())
            }
        }
    }

    fn parse_number(&mut self) -> Option<Value> {
        let start = self.cur.pos();
        let mut text = String::new();
        if self.cur.peek() == Some('-') {
            text.push('-');
            self.cur.bump();
        }
        let mut saw_digit = false;
        while let Some(c) = self.cur.peek() {
            if c.is_ascii_digit() {
                saw_digit = true;
                text.push(c);
                self.cur.bump();
            } else if c == '.' && !text.contains('.') {
                text.push(c);
                self.cur.bump();
            } else {
                break;
            }
        }
        if !saw_digit {
            self.cur.set(start);
            return None;
        }
        let mut unit = String::new();
        while let Some(c) = self.cur.peek() {
            if c.is_ascii_alphabetic() || c == '%' {
                unit.push(c);
                self.cur.bump();
            } else {
                break;
            }
        }
        let value: f64 = text.parse().ok()?;
        self.lex_ws();
        Some(Value::Number { value, unit })
    }

    fn parse_color(&mut self) -> Option<Value> {
        let start = self.cur.pos();
        self.cur.bump(); // '#'
        let mut digits = String::new();
        while let Some(c) = self.cur.peek() {
            if c.is_ascii_hexdigit() {
                digits.push(c);
                self.cur.bump();
            } else {
                break;
            }
        }
        match digits.len() {
            3 | 6 => {
                self.lex_ws();
                Some(Value::RawColor(format!("#{digits}")))
            }
            8 => {
                self.lex_ws();
                crate::color::Color::from_hex(&format!("#{digits}")).map(Value::Color)
            }
            _ => {
                self.cur.set(start);
                None
            }
        }
    }

    fn parse_string(&mut self) -> LessResult<Value> {
        let start = self.cur.pos();
        let delim = self.cur.bump().unwrap();
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            match self.cur.peek() {
                None => return Err(self.err_at("parse error: unclosed string", start)),
                Some(c) if c == delim => {
                    self.cur.bump();
                    break;
                }
                Some('\\') => {
                    lit.push('\\');
                    self.cur.bump();
                    if let Some(escaped) = self.cur.bump() {
                        lit.push(escaped);
                    }
                }
                Some('@') if self.cur.starts_with("@{") => {
                    self.cur.bump();
                    self.cur.bump();
                    let name = self.read_ident();
                    if self.cur.peek() == Some('}') {
                        self.cur.bump();
                    }
                    if !lit.is_empty() {
                        parts.push(StringPart::Literal(std::mem::take(&mut lit)));
                    }
                    parts.push(StringPart::Part(Value::Interpolate {
                        inner: Box::new(Value::keyword(name)),
                        strip_quotes: true,
                    }));
                }
                Some(c) => {
                    lit.push(c);
                    self.cur.bump();
                }
            }
        }
        if !lit.is_empty() {
            parts.push(StringPart::Literal(lit));
        }
        self.lex_ws();
        Ok(Value::Str {
            delim: Some(delim),
            parts,
        })
    }

    fn parse_variable(&mut self) -> Option<Value> {
        let start = self.cur.pos();
        self.cur.bump(); // '@'
        if self.cur.peek() == Some('@') {
            self.cur.bump();
            let name = self.read_ident();
            if name.is_empty() {
                self.cur.set(start);
                return None;
            }
            self.lex_ws();
            return Some(Value::Variable(VarName::Nested(Box::new(
                Value::Variable(VarName::Name(format!("@{name}"))),
            ))));
        }
        let name = self.read_ident();
        if name.is_empty() {
            self.cur.set(start);
            return None;
        }
        self.lex_ws();
        Some(Value::Variable(VarName::Name(format!("@{name}"))))
    }

    fn parse_function(&mut self) -> LessResult<Option<Value>> {
        let start = self.cur.pos();
        let name = if self.cur.peek() == Some('%') {
            self.cur.bump();
            "%".to_string()
        } else {
            let mut name = String::new();
            while let Some(c) = self.cur.peek() {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.') {
                    name.push(c);
                    self.cur.bump();
                } else {
                    break;
                }
            }
            name
        };
        if name.is_empty() || self.cur.peek() != Some('(') {
            self.cur.set(start);
            return Ok(None);
        }
        self.cur.bump(); // '('
        let args_start = self.cur.pos();
        self.lex_ws();
        if let Some(args) = self.try_structured_args()? {
            if self.cur.peek() == Some(')') {
                self.cur.bump();
                self.lex_ws();
                return Ok(Some(Value::Function {
                    name,
                    args: Box::new(args),
                }));
            }
        }
        // 结构化解析失败就按原始文本读到配对的 `)`（url、IE 滤镜）。
        self.cur.set(args_start);
        self.lex_ws();
        let raw = self
            .read_open_string(')')?
            .unwrap_or(Value::Str {
                delim: None,
                parts: Vec::new(),
            });
        self.expect(')')?;
        Ok(Some(Value::Function {
            name,
            args: Box::new(raw),
        }))
    }

    fn try_structured_args(&mut self) -> LessResult<Option<Value>> {
        let mut args = Vec::new();
        loop {
            self.lex_ws();
            if self.cur.peek() == Some(')') {
                break;
            }
            // IE 滤镜的 name=value 形式
            let save = self.cur.pos();
            let ident = self.read_ident();
            if !ident.is_empty() && self.cur.peek() == Some('=') {
                self.cur.bump();
                self.lex_ws();
                match self.parse_expression_list() {
                    Ok(Some(value)) => {
                        args.push(Value::Str {
                            delim: None,
                            parts: vec![
                                StringPart::Literal(format!("{ident}=")),
                                StringPart::Part(value),
                            ],
                        });
                        if self.cur.peek() == Some(',') {
                            self.cur.bump();
                        }
                        continue;
                    }
                    _ => return Ok(None),
                }
            }
            self.cur.set(save);
            match self.parse_expression_list() {
                Ok(Some(value)) => args.push(value),
                Ok(None) => return Ok(None),
                Err(_) => return Ok(None),
            }
            if self.cur.peek() == Some(',') {
                self.cur.bump();
            } else {
                break;
            }
        }
        Ok(Some(Value::List {
            delim: ",".to_string(),
            items: args,
        }))
    }

    fn parse_keyword_value(&mut self) -> Option<Value> {
        let mut word = String::new();
        match self.cur.peek() {
            Some(c) if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '*' | '!') => {
                word.push(c);
                self.cur.bump();
            }
            _ => return None,
        }
        while let Some(c) = self.cur.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') {
                word.push(c);
                self.cur.bump();
            } else {
                break;
            }
        }
        self.lex_ws();
        Some(Value::Keyword(word))
    }

    /// 原样读取直到 `stop`（不消费它），其中的 `@{…}` 与引号串
    /// 仍被解析为嵌套部件。`stop` 为 `)` 时对括号配对。
    fn read_open_string(&mut self, stop: char) -> LessResult<Option<Value>> {
        let mut parts: Vec<StringPart> = Vec::new();
        let mut lit = String::new();
        let mut depth = 0usize;
        loop {
            match self.cur.peek() {
                None => break,
                Some(c) if c == stop && depth == 0 => break,
                Some('}') if stop == ';' => break,
                Some('(') if stop == ')' => {
                    depth += 1;
                    lit.push('(');
                    self.cur.bump();
                }
                Some(')') if stop == ')' => {
                    depth -= 1;
                    lit.push(')');
                    self.cur.bump();
                }
                Some('@') if self.cur.starts_with("@{") => {
                    self.cur.bump();
                    self.cur.bump();
                    let name = self.read_ident();
                    if self.cur.peek() == Some('}') {
                        self.cur.bump();
                    }
                    if !lit.is_empty() {
                        parts.push(StringPart::Literal(std::mem::take(&mut lit)));
                    }
                    parts.push(StringPart::Part(Value::Interpolate {
                        inner: Box::new(Value::keyword(name)),
                        strip_quotes: true,
                    }));
                }
                Some('"' | '\'') => {
                    if !lit.is_empty() {
                        parts.push(StringPart::Literal(std::mem::take(&mut lit)));
                    }
                    parts.push(StringPart::Part(self.parse_string()?));
                }
                Some(c) => {
                    lit.push(c);
                    self.cur.bump();
                }
            }
        }
        let tail = lit.trim_end();
        if !tail.is_empty() {
            parts.push(StringPart::Literal(tail.to_string()));
        } else if let Some(StringPart::Literal(last)) = parts.last_mut() {
            let trimmed = last.trim_end().to_string();
            *last = trimmed;
        }
        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::Str { delim: None, parts }))
        }
    }

    // ------------------------------------------------------------------
    // 词法辅助

    /// 跳过空白与注释（静默）。
    fn lex_ws(&mut self) {
        loop {
            self.cur.skip_plain_ws();
            if self.cur.starts_with("//") {
                self.cur.skip_line();
                continue;
            }
            if self.cur.starts_with("/*") {
                self.cur.bump();
                self.cur.bump();
                while !self.cur.starts_with("*/") {
                    if self.cur.bump().is_none() {
                        return;
                    }
                }
                self.cur.bump();
                self.cur.bump();
                continue;
            }
            return;
        }
    }

    fn read_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.cur.peek() {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                ident.push(c);
                self.cur.bump();
            } else {
                break;
            }
        }
        ident
    }

    fn read_simple_tag(&mut self) -> Option<String> {
        let save = self.cur.pos();
        if !matches!(self.cur.peek(), Some('.') | Some('#') | Some('$') | Some('@')) {
            return None;
        }
        let prefix = self.cur.bump().unwrap();
        // 旧式 `@name` 命名空间折叠进 `$name`
        let prefix = if prefix == '@' { '$' } else { prefix };
        let ident = self.read_ident();
        if ident.is_empty() {
            self.cur.set(save);
            return None;
        }
        Some(format!("{prefix}{ident}"))
    }

    fn read_property_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.cur.peek() {
            if c == ':' || c == ';' || c == '}' {
                break;
            }
            if c == '@' && self.cur.starts_with("@{") {
                name.push('@');
                self.cur.bump();
                while let Some(inner) = self.cur.bump() {
                    name.push(inner);
                    if inner == '}' {
                        break;
                    }
                }
                continue;
            }
            if c.is_whitespace() {
                break;
            }
            name.push(c);
            self.cur.bump();
        }
        name.trim().to_string()
    }

    fn expect(&mut self, expected: char) -> LessResult<()> {
        if self.cur.peek() == Some(expected) {
            self.cur.bump();
            self.lex_ws();
            Ok(())
        } else {
            Err(self.err_at(
                format!("parse error: expected `{expected}`"),
                self.cur.pos(),
            ))
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.cur.eat_word(word) {
            self.lex_ws();
            true
        } else {
            false
        }
    }

    fn err_at(&self, message: impl Into<String>, pos: usize) -> LessError {
        LessError::located(message, self.file_name.as_deref(), self.cur.source, pos)
    }
}

const OPERATORS: &[&str] = &["=<", ">=", "<", ">", "=", "+", "-", "*", "/", "%"];

fn precedence(op: &str) -> u8 {
    match op {
        "*" | "/" | "%" => 2,
        "+" | "-" => 1,
        _ => 0,
    }
}

/// 带位置指针的输入游标。探测走 clone，失败则丢弃副本。
#[derive(Clone)]
struct Cursor<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Cursor { source, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn set(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn slice_from(&self, start: usize) -> &'a str {
        &self.source[start..self.pos]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn advance(&mut self, bytes: usize) {
        self.pos = (self.pos + bytes).min(self.source.len());
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    fn last_was_ws(&self) -> bool {
        self.source[..self.pos]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace)
    }

    fn skip_plain_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_quoted(&mut self, delim: char) {
        while let Some(c) = self.bump() {
            if c == '\\' {
                self.bump();
            } else if c == delim {
                break;
            }
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if !self.starts_with(word) {
            return false;
        }
        let boundary = self.source[self.pos + word.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric() && c != '-' && c != '_');
        if boundary {
            self.pos += word.len();
            true
        } else {
            false
        }
    }

    fn read_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        ident
    }

    fn eat_simple_tag(&mut self) -> bool {
        if !matches!(self.peek(), Some('.') | Some('#') | Some('$') | Some('@')) {
            return false;
        }
        self.bump();
        !self.read_ident().is_empty()
    }

    fn skip_balanced_parens(&mut self) -> bool {
        if self.peek() != Some('(') {
            return false;
        }
        self.bump();
        let mut depth = 1usize;
        while let Some(c) = self.bump() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return true;
                    }
                }
                '"' | '\'' => self.skip_quoted(c),
                _ => {}
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_root(source: &str) -> (Arena, BlockId) {
        let mut arena = Arena::new();
        let root = Parser::new().parse(&mut arena, source, None).unwrap();
        (arena, root)
    }

    #[test]
    fn variable_assign_and_declaration() {
        let (arena, root) = parse_root("@base: 960px;\n.magic { width: @base; }");
        let props = &arena.block(root).props;
        assert!(matches!(
            &props[0].kind,
            PropKind::Assign { name, .. } if name == "@base"
        ));
        assert!(matches!(&props[1].kind, PropKind::Block(_)));
    }

    #[test]
    fn mixin_definition_is_hidden_but_registered() {
        let (arena, root) = parse_root(".rounded(@r: 4px) { border-radius: @r; }");
        assert!(arena.block(root).props.is_empty());
        assert!(arena.block(root).children.contains_key(".rounded"));
        let mixin = arena.block(arena.block(root).children[".rounded"][0]);
        assert_eq!(mixin.params.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn ruleset_named_block_is_hidden() {
        let (arena, root) = parse_root("$panel { color: red; }\n.a { color: blue; }");
        assert_eq!(arena.block(root).props.len(), 1);
        assert!(arena.block(root).children.contains_key("$panel"));
    }

    #[test]
    fn plain_block_is_both_child_and_prop() {
        let (arena, root) = parse_root(".btn { color: red; }");
        assert_eq!(arena.block(root).props.len(), 1);
        assert!(arena.block(root).children.contains_key(".btn"));
    }

    #[test]
    fn expression_parses_with_whitespace_rule() {
        let (arena, root) = parse_root(".a { width: @base - 200; margin: 0 -2px; }");
        let block = arena.block(arena.block(root).children[".a"][0]);
        match &block.props[0].kind {
            PropKind::Assign { value, .. } => {
                assert!(matches!(value, Value::Expression { op, .. } if op == "-"));
            }
            other => panic!("unexpected prop {other:?}"),
        }
        match &block.props[1].kind {
            PropKind::Assign { value, .. } => match value {
                Value::List { items, .. } => assert_eq!(items.len(), 2),
                other => panic!("expected space list, got {other:?}"),
            },
            other => panic!("unexpected prop {other:?}"),
        }
    }

    #[test]
    fn guards_parse_into_disjunction_of_conjunctions() {
        let (arena, root) =
            parse_root(".m(@x) when (@x > 10) and (@x < 20), not (@x = 15) { a: b; }");
        let mixin = arena.block(arena.block(root).children[".m"][0]);
        let guards = mixin.guards.as_ref().unwrap();
        assert_eq!(guards.len(), 2);
        assert_eq!(guards[0].len(), 2);
        assert!(guards[1][0].negate);
    }

    #[test]
    fn media_query_parts() {
        let (arena, root) = parse_root("@media only screen and (min-width: 768px) { .a { b: c; } }");
        let media = match &arena.block(root).props[0].kind {
            PropKind::Block(id) => arena.block(*id),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(media.kind, BlockKind::Media);
        assert_eq!(media.queries.len(), 1);
        assert_eq!(media.queries[0].len(), 2);
        assert_eq!(
            media.queries[0][0],
            MediaPart::Type(vec!["only".to_string(), "screen".to_string()])
        );
    }

    #[test]
    fn call_args_keyword_and_rest() {
        let (arena, root) = parse_root(
            ".m(@a, @b: 2, @rest...) { a: @a; }\n.x { .m(1, @b: 3, 4, 5); }",
        );
        let mixin = arena.block(arena.block(root).children[".m"][0]);
        let params = mixin.params.as_ref().unwrap();
        assert!(matches!(&params[2], Param::Rest(name) if name == "@rest"));
        assert!(mixin.is_vararg);
        let caller = arena.block(arena.block(root).children[".x"][0]);
        match &caller.props[0].kind {
            PropKind::Call { path, args, .. } => {
                assert_eq!(path, &vec![".m".to_string()]);
                let args = args.as_ref().unwrap();
                assert_eq!(args.len(), 4);
                assert!(matches!(&args[1], CallArg::Keyword(name, _) if name == "@b"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn url_function_falls_back_to_raw_string() {
        let (arena, root) = parse_root(".a { background: url(/img/x.png) no-repeat; }");
        let block = arena.block(arena.block(root).children[".a"][0]);
        match &block.props[0].kind {
            PropKind::Assign { value, .. } => match value {
                Value::List { items, .. } => {
                    assert!(matches!(&items[0], Value::Function { name, .. } if name == "url"));
                }
                other => panic!("expected list, got {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comments_become_props_when_enabled() {
        let mut arena = Arena::new();
        let mut parser = Parser::new();
        parser.write_comments = true;
        let root = parser
            .parse(&mut arena, "/* keep */\n.a { color: red; }", None)
            .unwrap();
        assert!(matches!(
            &arena.block(root).props[0].kind,
            PropKind::Comment(text) if text == "/* keep */"
        ));
    }

    #[test]
    fn legacy_at_tags_fold_to_ruleset_prefix() {
        let (arena, root) = parse_root("@widget() { margin: 0; }\n.y { @widget(); }");
        assert!(arena.block(root).children.contains_key("$widget"));
        let caller = arena.block(arena.block(root).children[".y"][0]);
        match &caller.props[0].kind {
            PropKind::Call { path, .. } => assert_eq!(path, &vec!["$widget".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reserved_at_rules_stay_directives() {
        let (arena, root) = parse_root("@font-face { font-family: x; }");
        assert!(matches!(
            &arena.block(root).props[0].kind,
            PropKind::Block(id) if arena.block(*id).kind == BlockKind::Directive
        ));
    }

    #[test]
    fn interpolated_selector_tag() {
        let (arena, root) = parse_root("@name: magic;\n.@{name} { color: red; }");
        let block_prop = &arena.block(root).props[1];
        let id = match &block_prop.kind {
            PropKind::Block(id) => *id,
            other => panic!("unexpected {other:?}"),
        };
        assert!(matches!(&arena.block(id).tags[0], Tag::Interp(_)));
    }
}
