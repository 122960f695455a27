use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// 按配置的 import 目录顺序解析 url：先试 `<dir>/<url>.less`，
/// 再试 `<dir>/<url>` 本身。
pub fn find_import(dirs: &[PathBuf], url: &str) -> Option<PathBuf> {
    for dir in dirs {
        let full = dir.join(url);
        let with_ext = PathBuf::from(format!("{}.less", full.display()));
        if with_ext.is_file() {
            return Some(with_ext);
        }
        if full.is_file() {
            return Some(full);
        }
    }
    None
}

/// 文件修改时间（unix 秒）。读不到时当 0，让缓存下次必然重建。
pub fn mtime(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/// data-uri 的扩展名 → mime 猜测。
pub fn mime_for(path: &Path) -> Option<&'static str> {
    static MIME_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
        HashMap::from([
            ("png", "image/png"),
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("gif", "image/gif"),
            ("svg", "image/svg+xml"),
            ("webp", "image/webp"),
            ("ico", "image/x-icon"),
            ("woff", "font/woff"),
            ("woff2", "font/woff2"),
            ("ttf", "font/ttf"),
            ("otf", "font/otf"),
            ("eot", "application/vnd.ms-fontobject"),
            ("css", "text/css"),
            ("html", "text/html"),
            ("txt", "text/plain"),
        ])
    });
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    MIME_TYPES.get(ext.as_str()).copied()
}
