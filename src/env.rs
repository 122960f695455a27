use crate::ast::{BlockId, FileId, Prop};
use crate::value::Value;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;

pub type EnvRef = Rc<EnvFrame>;

/// 作用域帧。链式堆分配，生命周期由 push/pop 控制；mixin 捕获
/// 声明处作用域时会把某一帧的引用塞进 `scope`/`store_parent`，
/// 因此帧可以在弹栈后继续存活。
#[derive(Debug)]
pub struct EnvFrame {
    pub parent: Option<EnvRef>,
    pub block: Option<BlockId>,
    pub store: RefCell<IndexMap<String, Value>>,
    /// 当前 CSS 块展开后的选择器。
    pub selectors: RefCell<Option<Vec<String>>>,
    /// `@arguments` 的按位实参。
    pub arguments: RefCell<Option<Vec<Value>>>,
    /// mixin 携带的声明处作用域，查找失败时的次级出口。
    pub store_parent: RefCell<Option<EnvRef>>,
    /// 变量环检测用的本帧已访问名字集合。
    pub seen: RefCell<HashSet<String>>,
    /// 本帧内 import-id → 导入结果。
    pub imports: RefCell<HashMap<usize, ImportRecord>>,
}

/// `import` prop 求值后的记录，由配对的 import_mixin 占位符消费。
#[derive(Debug, Clone)]
pub enum ImportRecord {
    /// 未能内联时要输出的整行文本；None 表示静默跳过（如环导入）。
    Fallback(Option<String>),
    Inline {
        bottom: Vec<Prop>,
        file: FileId,
        dir: PathBuf,
    },
}

impl EnvFrame {
    pub fn child(parent: Option<EnvRef>, block: Option<BlockId>) -> EnvRef {
        Rc::new(EnvFrame {
            parent,
            block,
            store: RefCell::new(IndexMap::new()),
            selectors: RefCell::new(None),
            arguments: RefCell::new(None),
            store_parent: RefCell::new(None),
            seen: RefCell::new(HashSet::new()),
            imports: RefCell::new(HashMap::new()),
        })
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.store.borrow_mut().insert(name.into(), value);
    }

    pub fn is_seen(&self, name: &str) -> bool {
        self.seen.borrow().contains(name)
    }

    pub fn mark_seen(&self, name: &str, flag: bool) {
        if flag {
            self.seen.borrow_mut().insert(name.to_string());
        } else {
            self.seen.borrow_mut().remove(name);
        }
    }
}

/// 变量解析。先走主 parent 链，途中把遇到的 `store_parent` 记入
/// FIFO 队列；主链找不到再按入队顺序走各条次级链（次级链上新出现
/// 的 `store_parent` 同样入队）。`@arguments` 在任一帧命中按位实参
/// 时合成空格列表。
pub fn lookup(top: &EnvRef, name: &str) -> Option<Value> {
    let is_arguments = name == "@arguments";
    let mut pending: VecDeque<EnvRef> = VecDeque::new();
    let mut current = Some(Rc::clone(top));
    loop {
        while let Some(frame) = current {
            if is_arguments {
                if let Some(args) = frame.arguments.borrow().as_ref() {
                    return Some(Value::List {
                        delim: " ".to_string(),
                        items: args.clone(),
                    });
                }
            }
            if let Some(value) = frame.store.borrow().get(name) {
                return Some(value.clone());
            }
            if let Some(secondary) = frame.store_parent.borrow().as_ref() {
                pending.push_back(Rc::clone(secondary));
            }
            current = frame.parent.clone();
        }
        current = Some(pending.pop_front()?);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parent_chain() {
        let outer = EnvFrame::child(None, None);
        outer.set("@a", Value::keyword("outer"));
        let inner = EnvFrame::child(Some(Rc::clone(&outer)), None);
        inner.set("@b", Value::keyword("inner"));
        assert_eq!(lookup(&inner, "@a"), Some(Value::keyword("outer")));
        assert_eq!(lookup(&inner, "@b"), Some(Value::keyword("inner")));
        assert_eq!(lookup(&inner, "@missing"), None);
    }

    #[test]
    fn secondary_chain_is_consulted_after_primary() {
        let captured = EnvFrame::child(None, None);
        captured.set("@hidden", Value::keyword("from-mixin-site"));
        let root = EnvFrame::child(None, None);
        let call = EnvFrame::child(Some(root), None);
        *call.store_parent.borrow_mut() = Some(captured);
        assert_eq!(
            lookup(&call, "@hidden"),
            Some(Value::keyword("from-mixin-site"))
        );
    }

    #[test]
    fn primary_chain_shadows_secondary() {
        let captured = EnvFrame::child(None, None);
        captured.set("@x", Value::keyword("secondary"));
        let root = EnvFrame::child(None, None);
        root.set("@x", Value::keyword("primary"));
        let call = EnvFrame::child(Some(root), None);
        *call.store_parent.borrow_mut() = Some(captured);
        assert_eq!(lookup(&call, "@x"), Some(Value::keyword("primary")));
    }

    #[test]
    fn arguments_synthesize_space_list() {
        let frame = EnvFrame::child(None, None);
        *frame.arguments.borrow_mut() =
            Some(vec![Value::number(1.0, "px"), Value::number(2.0, "px")]);
        let inner = EnvFrame::child(Some(frame), None);
        let got = lookup(&inner, "@arguments").unwrap();
        match got {
            Value::List { delim, items } => {
                assert_eq!(delim, " ");
                assert_eq!(items.len(), 2);
            }
            other => panic!("expected list, got {other:?}"),
        }
    }
}
