use crate::color::Color;
use crate::error::LessResult;
use crate::evaluator::Evaluator;
use crate::value::{StringPart, Value, VarName};

/// 可当作字符串拼接的值：字符串本身，或包装成无定界符字符串的
/// 关键字。
pub(crate) fn coerce_string(value: &Value) -> Option<Value> {
    match value {
        Value::Str { .. } => Some(value.clone()),
        Value::Keyword(word) => Some(Value::Str {
            delim: None,
            parts: vec![StringPart::Literal(word.clone())],
        }),
        _ => None,
    }
}

pub(crate) fn coerce_color(value: &Value) -> Option<Color> {
    match value {
        Value::Color(color) => Some(*color),
        Value::RawColor(hex) => Color::from_hex(hex),
        Value::Keyword(word) => Color::from_name(word),
        _ => None,
    }
}

/// `+` 的字符串拼接：非字符串一侧作为嵌套值挂进字符串；两侧都是
/// 字符串时右侧去定界符直接内联。
fn string_concatenate(left: &Value, right: &Value) -> Option<Value> {
    if let Some(Value::Str { delim, mut parts }) = coerce_string(left) {
        let mut right = right.clone();
        if let Value::Str { delim, .. } = &mut right {
            *delim = None;
        }
        parts.push(StringPart::Part(right));
        return Some(Value::Str { delim, parts });
    }
    if let Some(Value::Str { delim, mut parts }) = coerce_string(right) {
        parts.insert(0, StringPart::Part(left.clone()));
        return Some(Value::Str { delim, parts });
    }
    None
}

impl Evaluator<'_> {
    /// 把值树归约到规范形态。对完全归约的值幂等；解析变量、求表达
    /// 式、跑函数库、折叠数字上的一元符号。`for_expression` 时额外
    /// 把关键字色名与 raw_color 坍缩成 color。
    pub(crate) fn reduce(&mut self, value: &Value, for_expression: bool) -> LessResult<Value> {
        match value {
            Value::Interpolate {
                inner,
                strip_quotes,
            } => {
                let reduced = self.reduce(inner, false)?;
                let name = self.compile_value(&reduced)?;
                let mut result =
                    self.reduce(&Value::Variable(VarName::Name(format!("@{name}"))), false)?;
                if let Value::RawColor(hex) = &result {
                    if let Some(color) = Color::from_hex(hex) {
                        result = Value::Color(color);
                    }
                }
                if *strip_quotes {
                    result = self.lib_e(&result)?;
                }
                Ok(result)
            }
            Value::Variable(var) => {
                let key = match var {
                    VarName::Name(name) => name.clone(),
                    VarName::Nested(inner) => {
                        let reduced = self.reduce(inner, false)?;
                        let text = self.compile_value(&self.lib_e(&reduced)?)?;
                        format!("@{text}")
                    }
                };
                if self.env.is_seen(&key) {
                    return Err(self.error(format!("infinite loop detected: {key}")));
                }
                self.env.mark_seen(&key, true);
                let result = self.get(&key).and_then(|stored| self.reduce(&stored, false));
                self.env.mark_seen(&key, false);
                result
            }
            Value::List { delim, items } => {
                let items = items
                    .iter()
                    .map(|item| self.reduce(item, for_expression))
                    .collect::<LessResult<Vec<_>>>()?;
                Ok(Value::List {
                    delim: delim.clone(),
                    items,
                })
            }
            Value::Expression {
                op,
                left,
                right,
                ws_before,
                ws_after,
            } => self.evaluate(op, left, right, *ws_before, *ws_after),
            Value::Str { delim, parts } => {
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        StringPart::Literal(text) => out.push(StringPart::Literal(text.clone())),
                        StringPart::Part(inner) => {
                            let strip = matches!(inner, Value::Variable(_));
                            let mut reduced = self.reduce(inner, false)?;
                            if strip {
                                reduced = self.lib_e(&reduced)?;
                            }
                            out.push(StringPart::Part(reduced));
                        }
                    }
                }
                Ok(Value::Str {
                    delim: *delim,
                    parts: out,
                })
            }
            Value::Escape(inner) => {
                let reduced = self.reduce(inner, false)?;
                self.lib_e(&reduced)
            }
            Value::Function { name, args } => self.reduce_function(name, args),
            Value::Unary { op, inner } => {
                let reduced = self.reduce(inner, false)?;
                if let Value::Number { value, unit } = &reduced {
                    return Ok(match op {
                        '+' => reduced.clone(),
                        _ => Value::Number {
                            value: -value,
                            unit: unit.clone(),
                        },
                    });
                }
                Ok(Value::Str {
                    delim: None,
                    parts: vec![
                        StringPart::Literal(op.to_string()),
                        StringPart::Part(reduced),
                    ],
                })
            }
            other => {
                if for_expression {
                    match other {
                        Value::Keyword(_) | Value::RawColor(_) => {
                            if let Some(color) = coerce_color(other) {
                                return Ok(Value::Color(color));
                            }
                        }
                        _ => {}
                    }
                }
                Ok(other.clone())
            }
        }
    }

    fn reduce_function(&mut self, name: &str, args: &Value) -> LessResult<Value> {
        if let Some(color) = self.func_to_color(name, args)? {
            return Ok(color);
        }
        // 单元素实参列表退化成该元素
        let compressed = match args {
            Value::List { delim, items } => Value::compress_list(items.clone(), delim),
            other => other.clone(),
        };

        let user_fns = self.user_fns;
        if let Some(f) = user_fns.get(name) {
            let reduced_args = self.reduce(&compressed, true)?;
            let ret = f(&reduced_args)?;
            return Ok(self.passthrough_or(ret, name, &reduced_args));
        }

        let lib_name = if name == "%" {
            "_sprintf".to_string()
        } else {
            name.replace('-', "_")
        };
        if Evaluator::is_builtin(&lib_name) {
            let reduced_args = self.reduce(&compressed, true)?;
            let ret = self.call_builtin(&lib_name, &reduced_args)?;
            return Ok(self.passthrough_or(ret, name, &reduced_args));
        }

        // 未知函数按普通 CSS 函数处理：归约实参后原样输出
        let reduced = self.reduce(args, false)?;
        Ok(Value::Function {
            name: name.to_string(),
            args: Box::new(reduced),
        })
    }

    /// 函数没有产出时把调用按文本重新拼出来。
    fn passthrough_or(&self, ret: Option<Value>, name: &str, args: &Value) -> Value {
        match ret {
            Some(value) => value,
            None => Value::Str {
                delim: None,
                parts: vec![
                    StringPart::Literal(format!("{name}(")),
                    StringPart::Part(args.clone()),
                    StringPart::Literal(")".to_string()),
                ],
            },
        }
    }

    /// `rgb`/`rgba`/`hsl`/`hsla` 带列表实参时直接坍缩成 color。
    fn func_to_color(&mut self, name: &str, args: &Value) -> LessResult<Option<Value>> {
        let Value::List { items, .. } = args else {
            return Ok(None);
        };
        match name {
            "hsl" | "hsla" => {
                let mut comps = [0.0f64; 4];
                for (i, raw) in items.iter().enumerate().take(4) {
                    let reduced = self.reduce(raw, false)?;
                    let raw_value = match &reduced {
                        Value::Number { value, .. } => *value,
                        _ => 0.0,
                    };
                    let max = match i {
                        0 => 360.0,
                        1 | 2 => 100.0,
                        _ => 1.0,
                    };
                    comps[i] = raw_value.clamp(0.0, max);
                }
                let hsl = crate::color::Hsl {
                    h: comps[0],
                    s: comps[1],
                    l: comps[2],
                    alpha: (items.len() >= 4).then_some(comps[3]),
                };
                Ok(Some(Value::Color(crate::color::to_rgb(hsl))))
            }
            "rgb" | "rgba" => {
                let mut channels = [0.0f64; 3];
                let mut alpha = None;
                for (i, raw) in items.iter().enumerate().take(4) {
                    let reduced = self.reduce(raw, false)?;
                    let (raw_value, is_percent) = match &reduced {
                        Value::Number { value, unit } => (*value, unit == "%"),
                        _ => (0.0, false),
                    };
                    if i < 3 {
                        channels[i] = if is_percent {
                            255.0 * raw_value / 100.0
                        } else {
                            raw_value
                        };
                    } else {
                        alpha = Some(if is_percent {
                            raw_value / 100.0
                        } else {
                            raw_value
                        });
                    }
                }
                let color = Color {
                    r: channels[0],
                    g: channels[1],
                    b: channels[2],
                    alpha,
                }
                .fix();
                Ok(Some(Value::Color(color)))
            }
            _ => Ok(None),
        }
    }

    /// 二元运算。两侧先按表达式语义归约并尝试色彩坍缩，再按
    /// (左类型, 右类型) 分派；没有规则命中时拼回文本。
    pub(crate) fn evaluate(
        &mut self,
        op: &str,
        left: &Value,
        right: &Value,
        ws_before: bool,
        ws_after: bool,
    ) -> LessResult<Value> {
        let mut left = self.reduce(left, true)?;
        let mut right = self.reduce(right, true)?;
        if let Some(color) = coerce_color(&left) {
            left = Value::Color(color);
        }
        if let Some(color) = coerce_color(&right) {
            right = Value::Color(color);
        }

        if op == "and" {
            return Ok(Value::truth(left.is_true() && right.is_true()));
        }
        if op == "=" {
            return Ok(Value::truth(left == right));
        }
        if op == "+" {
            if let Some(concatenated) = string_concatenate(&left, &right) {
                return Ok(concatenated);
            }
        }

        match (&left, &right) {
            (
                Value::Number {
                    value: l,
                    unit: lu,
                },
                Value::Number {
                    value: r,
                    unit: ru,
                },
            ) => {
                return self.op_number_number(op, *l, lu, *r, ru);
            }
            (Value::Color(l), Value::Color(r)) => {
                return self.op_color_color(op, *l, *r);
            }
            (Value::Color(color), Value::Number { value, unit }) => {
                return self.op_color_number(op, *color, *value, unit);
            }
            (Value::Number { value, unit }, Value::Color(color))
                if op == "+" || op == "*" =>
            {
                return self.op_color_number(op, *color, *value, unit);
            }
            _ => {}
        }

        // 回退：按源码原样拼接
        let mut padded = op.to_string();
        if ws_before {
            padded.insert(0, ' ');
        }
        if ws_after {
            padded.push(' ');
        }
        Ok(Value::Str {
            delim: None,
            parts: vec![
                StringPart::Part(left),
                StringPart::Literal(padded),
                StringPart::Part(right),
            ],
        })
    }

    fn op_number_number(
        &self,
        op: &str,
        left: f64,
        left_unit: &str,
        right: f64,
        right_unit: &str,
    ) -> LessResult<Value> {
        let unit = if left_unit.is_empty() {
            right_unit
        } else {
            left_unit
        };
        let value = match op {
            "+" => left + right,
            "-" => left - right,
            "*" => left * right,
            "%" => left % right,
            "/" => {
                if right == 0.0 {
                    return Err(self.error("parse error: divide by zero"));
                }
                left / right
            }
            "<" => return Ok(Value::truth(left < right)),
            ">" => return Ok(Value::truth(left > right)),
            ">=" => return Ok(Value::truth(left >= right)),
            "=<" => return Ok(Value::truth(left <= right)),
            _ => {
                return Err(self.error(format!("parse error: unknown number operator: {op}")));
            }
        };
        Ok(Value::Number {
            value,
            unit: unit.to_string(),
        })
    }

    fn op_color_color(&self, op: &str, left: Color, right: Color) -> LessResult<Value> {
        let count = if left.alpha.is_some() || right.alpha.is_some() {
            4
        } else {
            3
        };
        let lc = [left.r, left.g, left.b, left.alpha.unwrap_or(0.0)];
        let rc = [right.r, right.g, right.b, right.alpha.unwrap_or(0.0)];
        let mut out = [0.0f64; 4];
        for i in 0..count {
            out[i] = match op {
                "+" => lc[i] + rc[i],
                "-" => lc[i] - rc[i],
                "*" => lc[i] * rc[i],
                "%" | "/" => {
                    if rc[i] == 0.0 {
                        return Err(self.error("evaluate error: can't divide by zero"));
                    }
                    if op == "%" {
                        lc[i] % rc[i]
                    } else {
                        lc[i] / rc[i]
                    }
                }
                _ => {
                    return Err(self.error(format!(
                        "evaluate error: color operation failed on op {op}"
                    )));
                }
            };
        }
        let color = Color {
            r: out[0],
            g: out[1],
            b: out[2],
            alpha: (count == 4).then_some(out[3]),
        }
        .fix();
        Ok(Value::Color(color))
    }

    fn op_color_number(
        &self,
        op: &str,
        color: Color,
        mut number: f64,
        unit: &str,
    ) -> LessResult<Value> {
        if unit == "%" {
            number /= 100.0;
        }
        let broadcast = Color {
            r: number,
            g: number,
            b: number,
            alpha: color.alpha.map(|_| number),
        };
        self.op_color_color(op, color, broadcast)
    }
}
