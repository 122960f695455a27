use crate::error::{LessError, LessResult};
use crate::importer;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// 缓存编译的持久记录。`compiled` 只在内存里携带结果，写进
/// `<out>.meta` 边车文件时会被剥掉。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub root: PathBuf,
    #[serde(default)]
    pub files: IndexMap<PathBuf, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiled: Option<String>,
    pub updated: u64,
}

/// `cached_compile` 的输入：新编译给路径，增量检查给上次的记录。
#[derive(Debug, Clone)]
pub enum CacheInput {
    Path(PathBuf),
    Record(CacheRecord),
}

impl CacheRecord {
    /// 任一记录过的文件消失或磁盘 mtime 超过记录值即过期。
    pub fn is_stale(&self) -> bool {
        if self.files.is_empty() {
            return true;
        }
        self.files
            .iter()
            .any(|(path, &recorded)| !path.exists() || importer::mtime(path) > recorded)
    }

    pub fn load(path: &Path) -> LessResult<CacheRecord> {
        let text = fs::read_to_string(path)
            .map_err(|err| LessError::new(format!("load error: failed to read {}: {err}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|err| LessError::new(format!("cache error: bad meta {}: {err}", path.display())))
    }

    /// 写边车文件，剥掉 `compiled`。
    pub fn store(&self, path: &Path) -> LessResult<()> {
        let mut slim = self.clone();
        slim.compiled = None;
        let text = serde_json::to_string(&slim)
            .map_err(|err| LessError::new(format!("cache error: serialize failed: {err}")))?;
        fs::write(path, text)
            .map_err(|err| LessError::new(format!("cache error: failed to write {}: {err}", path.display())))
    }
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_without_compiled() {
        let dir = std::env::temp_dir().join("less_ferrite_cache_test");
        let _ = fs::create_dir_all(&dir);
        let meta = dir.join("out.css.meta");

        let mut files = IndexMap::new();
        files.insert(PathBuf::from("/tmp/in.less"), 123u64);
        let record = CacheRecord {
            root: PathBuf::from("/tmp/in.less"),
            files,
            compiled: Some("body{}".to_string()),
            updated: 42,
        };
        record.store(&meta).unwrap();
        let loaded = CacheRecord::load(&meta).unwrap();
        assert_eq!(loaded.root, record.root);
        assert_eq!(loaded.updated, 42);
        assert!(loaded.compiled.is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_files_map_means_stale() {
        let record = CacheRecord {
            root: PathBuf::from("x.less"),
            files: IndexMap::new(),
            compiled: None,
            updated: 0,
        };
        assert!(record.is_stale());
    }
}
