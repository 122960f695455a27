use crate::color::Color;
use crate::error::{LessError, LessResult};

/// 语义求值所用的带标签值树。解析器产出未归约的形态，
/// reducer 将其折叠成可直接序列化的值。
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 数值与单位，单位可以为空、`%`、长度、时间或角度。
    Number { value: f64, unit: String },
    Color(Color),
    /// 未展开的十六进制字面量（`#RGB` / `#RRGGBB`），按需再转成 Color。
    RawColor(String),
    Keyword(String),
    /// 定界符 + 字面片段与内嵌值交替的序列（字符串插值）。
    Str {
        delim: Option<char>,
        parts: Vec<StringPart>,
    },
    List {
        delim: String,
        items: Vec<Value>,
    },
    Function {
        name: String,
        args: Box<Value>,
    },
    Expression {
        op: String,
        left: Box<Value>,
        right: Box<Value>,
        ws_before: bool,
        ws_after: bool,
    },
    Variable(VarName),
    /// `@{…}` 查表插值；`strip_quotes` 时把结果退成关键字。
    Interpolate {
        inner: Box<Value>,
        strip_quotes: bool,
    },
    Escape(Box<Value>),
    Unary {
        op: char,
        inner: Box<Value>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum VarName {
    /// 带 `@` 前缀的名字。
    Name(String),
    /// `@@name` 之类，名字本身还要先求值。
    Nested(Box<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Literal(String),
    Part(Value),
}

impl Value {
    pub fn number(value: f64, unit: impl Into<String>) -> Value {
        Value::Number {
            value,
            unit: unit.into(),
        }
    }

    pub fn keyword(word: impl Into<String>) -> Value {
        Value::Keyword(word.into())
    }

    /// 布尔值编码成 `true` / `false` 关键字。
    pub fn truth(value: bool) -> Value {
        Value::Keyword(if value { "true" } else { "false" }.to_string())
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Value::Keyword(word) if word == "true")
    }

    /// 单元素列表直接退化为该元素。
    pub fn compress_list(mut items: Vec<Value>, delim: &str) -> Value {
        if items.len() == 1 {
            items.pop().unwrap()
        } else {
            Value::List {
                delim: delim.to_string(),
                items,
            }
        }
    }

    /// 把已归约的值序列化为 CSS 文本。`compress_colors` 控制
    /// 十六进制缩写以及 raw_color 的展开。
    pub fn to_css(&self, compress_colors: bool) -> LessResult<String> {
        match self {
            Value::List { delim, items } => {
                let parts = items
                    .iter()
                    .map(|item| item.to_css(compress_colors))
                    .collect::<LessResult<Vec<_>>>()?;
                Ok(parts.join(delim))
            }
            Value::RawColor(hex) => {
                if compress_colors {
                    match Color::from_hex(hex) {
                        Some(color) => Value::Color(color).to_css(compress_colors),
                        None => Ok(hex.clone()),
                    }
                } else {
                    Ok(hex.clone())
                }
            }
            Value::Keyword(word) => Ok(word.clone()),
            Value::Number { value, unit } => Ok(format!("{}{unit}", fmt_number(*value))),
            Value::Str { delim, parts } => {
                let mut out = String::new();
                if let Some(d) = delim {
                    out.push(*d);
                }
                for part in parts {
                    match part {
                        StringPart::Literal(text) => out.push_str(text),
                        StringPart::Part(value) => out.push_str(&value.to_css(compress_colors)?),
                    }
                }
                if let Some(d) = delim {
                    out.push(*d);
                }
                Ok(out)
            }
            Value::Color(color) => Ok(color.to_css(compress_colors)),
            Value::Function { name, args } => {
                Ok(format!("{name}({})", args.to_css(compress_colors)?))
            }
            other => Err(LessError::new(format!(
                "unknown value type: {}",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number { .. } => "number",
            Value::Color(_) => "color",
            Value::RawColor(_) => "raw_color",
            Value::Keyword(_) => "keyword",
            Value::Str { .. } => "string",
            Value::List { .. } => "list",
            Value::Function { .. } => "function",
            Value::Expression { .. } => "expression",
            Value::Variable(_) => "variable",
            Value::Interpolate { .. } => "interpolate",
            Value::Escape(_) => "escape",
            Value::Unary { .. } => "unary",
        }
    }
}

/// 数字始终用 `.` 作小数点输出，保留 8 位以内小数并去掉尾零。
pub fn fmt_number(value: f64) -> String {
    let rounded = (value * 1e8).round() / 1e8;
    if rounded == rounded.trunc() && rounded.abs() < 1e15 {
        return format!("{}", rounded as i64);
    }
    let mut text = format!("{rounded:.8}");
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formatting_trims_zeroes() {
        assert_eq!(fmt_number(760.0), "760");
        assert_eq!(fmt_number(0.5), "0.5");
        assert_eq!(fmt_number(0.1 + 0.2), "0.3");
        assert_eq!(fmt_number(-6.0), "-6");
        assert_eq!(fmt_number(1.0 / 3.0), "0.33333333");
    }

    #[test]
    fn list_joins_with_its_delimiter() {
        let list = Value::List {
            delim: ", ".to_string(),
            items: vec![Value::keyword("a"), Value::keyword("b")],
        };
        assert_eq!(list.to_css(false).unwrap(), "a, b");
    }

    #[test]
    fn string_renders_parts_inside_delimiters() {
        let s = Value::Str {
            delim: Some('"'),
            parts: vec![
                StringPart::Literal("w: ".to_string()),
                StringPart::Part(Value::number(10.0, "px")),
            ],
        };
        assert_eq!(s.to_css(false).unwrap(), "\"w: 10px\"");
    }

    #[test]
    fn compress_list_unwraps_single_item() {
        let v = Value::compress_list(vec![Value::keyword("solo")], " ");
        assert_eq!(v, Value::keyword("solo"));
    }
}
