use thiserror::Error;

/// 编译过程中统一的错误类型。消息在构造时就拼好位置信息，
/// 字段仅供程序化访问。
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LessError {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub culprit: Option<String>,
}

pub type LessResult<T> = Result<T, LessError>;

impl LessError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        LessError {
            message: message.into(),
            file: None,
            line: None,
            culprit: None,
        }
    }

    /// 带源码位置的错误。`offset` 是源文本中的字节偏移，
    /// 这里换算出行号并截取肇事行。
    pub fn located<S: Into<String>>(
        message: S,
        file: Option<&str>,
        source: &str,
        offset: usize,
    ) -> Self {
        let offset = offset.min(source.len());
        let line = source[..offset].matches('\n').count() + 1;
        let culprit = source[offset..]
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        let loc = match file {
            Some(name) => format!("{name} on line {line}"),
            None => format!("line: {line}"),
        };
        let message = message.into();
        let rendered = if culprit.is_empty() {
            format!("{message}: {loc}")
        } else {
            format!("{message}: failed at `{culprit}` {loc}")
        };
        LessError {
            message: rendered,
            file: file.map(str::to_string),
            line: Some(line),
            culprit: Some(culprit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn located_error_reports_line_and_culprit() {
        let src = "a;\nb {\n  broken\n}";
        let err = LessError::located("parse error", Some("main.less"), src, 8);
        assert_eq!(err.line, Some(3));
        assert_eq!(err.culprit.as_deref(), Some("broken"));
        assert_eq!(
            err.to_string(),
            "parse error: failed at `broken` main.less on line 3"
        );
    }

    #[test]
    fn bare_error_keeps_message() {
        let err = LessError::new("variable @x is undefined");
        assert_eq!(err.to_string(), "variable @x is undefined");
        assert!(err.line.is_none());
    }
}
