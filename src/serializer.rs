/// 输出树节点。编译器产出扁平的块列表，`children` 存下标。
#[derive(Debug, Clone)]
pub struct OutBlock {
    pub kind: OutKind,
    pub selectors: Vec<String>,
    /// 已格式化的规则行与注释行，按产出顺序。
    pub lines: Vec<String>,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutKind {
    Root,
    /// 普通 CSS 规则块。
    Plain,
    Media,
    Directive,
}

/// 字段驱动的 CSS 序列化风格。三种预设对应 classic / compressed /
/// lessjs，`property` 与 `render` 是求值器消费的两个入口。
#[derive(Debug, Clone)]
pub struct Formatter {
    pub indent_char: &'static str,
    pub line_break: &'static str,
    pub open: &'static str,
    pub close: &'static str,
    pub open_single: &'static str,
    pub close_single: &'static str,
    pub selector_separator: &'static str,
    pub assign_separator: &'static str,
    pub disable_single: bool,
    pub break_selectors: bool,
    /// 压缩模式下丢弃注释行。
    pub compress_props: bool,
    /// 十六进制缩写、raw_color 展开由值序列化读取。
    pub compress_colors: bool,
}

impl Formatter {
    pub fn classic() -> Formatter {
        Formatter {
            indent_char: "  ",
            line_break: "\n",
            open: " {",
            close: "}",
            open_single: " { ",
            close_single: " }",
            selector_separator: ", ",
            assign_separator: ":",
            disable_single: false,
            break_selectors: false,
            compress_props: false,
            compress_colors: false,
        }
    }

    pub fn compressed() -> Formatter {
        Formatter {
            indent_char: "",
            line_break: "",
            open: "{",
            selector_separator: ",",
            disable_single: true,
            compress_props: true,
            compress_colors: true,
            ..Formatter::classic()
        }
    }

    pub fn lessjs() -> Formatter {
        Formatter {
            disable_single: true,
            break_selectors: true,
            assign_separator: ": ",
            selector_separator: ",",
            ..Formatter::classic()
        }
    }

    pub fn by_name(name: &str) -> Option<Formatter> {
        match name {
            "classic" => Some(Formatter::classic()),
            "compressed" => Some(Formatter::compressed()),
            "lessjs" | "less.js" => Some(Formatter::lessjs()),
            _ => None,
        }
    }

    pub fn property(&self, name: &str, value: &str) -> String {
        format!("{name}{}{value};", self.assign_separator)
    }

    pub fn render(&self, blocks: &[OutBlock], root: usize) -> String {
        let mut out = String::new();
        self.write_block(blocks, root, 0, &mut out);
        out
    }

    fn indent_str(&self, level: usize) -> String {
        self.indent_char.repeat(level)
    }

    fn is_empty(&self, blocks: &[OutBlock], id: usize) -> bool {
        blocks[id].lines.is_empty()
            && blocks[id]
                .children
                .iter()
                .all(|&child| self.is_empty(blocks, child))
    }

    fn write_block(&self, blocks: &[OutBlock], id: usize, level: usize, out: &mut String) {
        if self.is_empty(blocks, id) {
            return;
        }
        let block = &blocks[id];
        let pre = self.indent_str(level);
        let is_single =
            !self.disable_single && block.kind == OutKind::Plain && block.lines.len() == 1;
        let mut inner = pre.clone();
        let mut child_level = level;

        if !block.selectors.is_empty() {
            child_level = level + 1;
            let separator = if self.break_selectors {
                format!("{}{}{pre}", self.selector_separator, self.line_break)
            } else {
                self.selector_separator.to_string()
            };
            out.push_str(&pre);
            out.push_str(&block.selectors.join(&separator));
            if is_single {
                out.push_str(self.open_single);
                inner = String::new();
            } else {
                out.push_str(self.open);
                out.push_str(self.line_break);
                inner = self.indent_str(child_level);
            }
        }

        let lines: Vec<&str> = if self.compress_props {
            block
                .lines
                .iter()
                .filter(|line| !line.starts_with("/*"))
                .map(String::as_str)
                .collect()
        } else {
            block.lines.iter().map(String::as_str).collect()
        };
        if !lines.is_empty() {
            let glue = format!("{}{inner}", self.line_break);
            out.push_str(&inner);
            out.push_str(&lines.join(&glue));
            if !is_single && !block.children.is_empty() {
                out.push_str(self.line_break);
            }
        }

        for &child in &block.children {
            self.write_block(blocks, child, child_level, out);
        }

        if !block.selectors.is_empty() {
            if is_single {
                out.push_str(self.close_single);
                out.push_str(self.line_break);
            } else {
                if block.children.is_empty() {
                    out.push_str(self.line_break);
                }
                out.push_str(&pre);
                out.push_str(self.close);
                out.push_str(self.line_break);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<OutBlock> {
        vec![
            OutBlock {
                kind: OutKind::Root,
                selectors: vec![],
                lines: vec![],
                children: vec![1],
                parent: None,
            },
            OutBlock {
                kind: OutKind::Plain,
                selectors: vec![".a".to_string(), ".b".to_string()],
                lines: vec!["color:red;".to_string()],
                children: vec![],
                parent: Some(0),
            },
        ]
    }

    #[test]
    fn classic_collapses_single_line_blocks() {
        let css = Formatter::classic().render(&sample(), 0);
        assert_eq!(css, ".a, .b { color:red; }\n");
    }

    #[test]
    fn compressed_strips_breaks_and_comments() {
        let mut blocks = sample();
        blocks[1].lines.insert(0, "/* note */".to_string());
        let css = Formatter::compressed().render(&blocks, 0);
        assert_eq!(css, ".a,.b{color:red;}");
    }

    #[test]
    fn lessjs_breaks_selectors() {
        let css = Formatter::lessjs().render(&sample(), 0);
        assert_eq!(css, ".a,\n.b {\n  color:red;\n}\n");
    }

    #[test]
    fn empty_blocks_are_dropped() {
        let mut blocks = sample();
        blocks[1].lines.clear();
        let css = Formatter::classic().render(&blocks, 0);
        assert_eq!(css, "");
    }
}
