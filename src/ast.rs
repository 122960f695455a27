use crate::env::EnvRef;
use crate::value::Value;
use indexmap::IndexMap;

pub type BlockId = usize;
pub type FileId = usize;

/// 解析出的块。普通 CSS 规则块、media、directive 与根节点
/// 共用同一结构，靠 `kind` 区分。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Root,
    Rule,
    Media,
    Directive,
}

/// 所有块都放在 Arena 里，父子关系与 mixin 查找走整数 id，
/// 避免所有权环。
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub parent: Option<BlockId>,
    pub kind: BlockKind,
    pub file: FileId,
    pub pos: usize,
    /// 选择器列表，`&` 尚未展开。
    pub tags: Vec<Tag>,
    /// directive 的名字与参数值。
    pub name: Option<String>,
    pub value: Option<Value>,
    /// media 查询：外层列表是逗号分隔的 query，内层是 and 串联的片段。
    pub queries: Vec<Vec<MediaPart>>,
    pub props: Vec<Prop>,
    /// 声明名 → 同名子块列表，保持声明顺序。
    pub children: IndexMap<String, Vec<BlockId>>,
    pub params: Option<Vec<Param>>,
    pub is_vararg: bool,
    /// 析取范式的守卫：外层任意一组通过即匹配。
    pub guards: Option<Vec<Vec<Guard>>>,
    /// 编译期记录的声明处作用域（mixin 随身携带）。
    pub scope: Option<EnvRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Lit(String),
    /// 选择器里出现 `@{…}` 时整个 tag 退化为待归约的值。
    Interp(Value),
}

#[derive(Debug, Clone)]
pub struct Prop {
    pub kind: PropKind,
    /// 源文本字节偏移，错误定位用。
    pub pos: usize,
}

#[derive(Debug, Clone)]
pub enum PropKind {
    /// `@var: value` 或 `prop: value`，以名字前缀区分。
    Assign { name: String, value: Value },
    Block(BlockId),
    /// mixin / ruleset 调用；路径首段带 `$` 前缀时只保留最后一个匹配。
    Call {
        path: Vec<String>,
        args: Option<Vec<CallArg>>,
        suffix: Option<String>,
    },
    Raw(String),
    Comment(String),
    Directive { name: String, value: Value },
    Import { path: Value, id: Option<usize> },
    /// sort_props 配对插入的占位符，真正内联导入的 bottom-props。
    ImportMixin { id: usize },
}

#[derive(Debug, Clone)]
pub enum CallArg {
    Lit(Value),
    /// 裸 `@name`，取调用处该变量的值作为顺序实参。
    Var(String),
    /// `@name: value` 关键字实参。
    Keyword(String, Value),
}

#[derive(Debug, Clone)]
pub enum Param {
    /// 字面量参数，调用值必须结构相等才匹配。
    Lit(Value),
    Named {
        name: String,
        default: Option<Value>,
    },
    /// `@name...`，吸收剩余顺序实参。
    Rest(String),
}

#[derive(Debug, Clone)]
pub struct Guard {
    pub cond: Value,
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaPart {
    /// `only screen` / `not print` / `screen`。
    Type(Vec<String>),
    Expr {
        feature: String,
        value: Option<Value>,
    },
    Var(Value),
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: Option<String>,
    pub text: String,
}

/// 一次编译内所有解析产物的归属地。导入的文件解析进同一个
/// Arena，id 在整个编译中保持稳定。
#[derive(Debug, Default)]
pub struct Arena {
    pub blocks: Vec<Block>,
    pub files: Vec<SourceFile>,
}

impl Arena {
    pub fn new() -> Arena {
        Arena::default()
    }

    pub fn add_file(&mut self, name: Option<String>, text: String) -> FileId {
        self.files.push(SourceFile { name, text });
        self.files.len() - 1
    }

    pub fn alloc(
        &mut self,
        kind: BlockKind,
        parent: Option<BlockId>,
        file: FileId,
        pos: usize,
    ) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(Block {
            id,
            parent,
            kind,
            file,
            pos,
            tags: Vec::new(),
            name: None,
            value: None,
            queries: Vec::new(),
            props: Vec::new(),
            children: IndexMap::new(),
            params: None,
            is_vararg: false,
            guards: None,
            scope: None,
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    pub fn register_child(&mut self, parent: BlockId, name: &str, child: BlockId) {
        self.blocks[parent]
            .children
            .entry(name.to_string())
            .or_default()
            .push(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_keep_declaration_order() {
        let mut arena = Arena::new();
        let file = arena.add_file(None, String::new());
        let root = arena.alloc(BlockKind::Root, None, file, 0);
        let a = arena.alloc(BlockKind::Rule, Some(root), file, 0);
        let b = arena.alloc(BlockKind::Rule, Some(root), file, 0);
        arena.register_child(root, ".mix", a);
        arena.register_child(root, ".mix", b);
        arena.register_child(root, ".other", b);
        assert_eq!(arena.block(root).children[".mix"], vec![a, b]);
        let names: Vec<&String> = arena.block(root).children.keys().collect();
        assert_eq!(names, vec![".mix", ".other"]);
    }
}
