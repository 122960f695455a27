use crate::color::{luma, to_hsl, to_rgb, Color};
use crate::error::LessResult;
use crate::evaluator::Evaluator;
use crate::importer;
use crate::reducer::coerce_color;
use crate::value::{StringPart, Value};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use std::f64::consts::PI;
use std::fs;

/// px 换算系数，长度家族内互转经由 px。
const LENGTH_UNITS: &[(&str, f64)] = &[
    ("px", 1.0),
    ("m", 3779.52755906),
    ("cm", 37.79527559),
    ("mm", 3.77952756),
    ("in", 96.0),
    ("pt", 1.33333333),
    ("pc", 16.0),
];
const TIME_UNITS: &[&str] = &["s", "ms"];
const ANGLE_UNITS: &[&str] = &["deg", "rad", "turn", "grad"];

fn length_factor(unit: &str) -> Option<f64> {
    LENGTH_UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, factor)| *factor)
}

fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

impl Evaluator<'_> {
    pub(crate) fn is_builtin(name: &str) -> bool {
        matches!(
            name,
            "pow" | "pi"
                | "mod"
                | "tan"
                | "sin"
                | "cos"
                | "atan"
                | "asin"
                | "acos"
                | "sqrt"
                | "floor"
                | "ceil"
                | "round"
                | "percentage"
                | "unit"
                | "convert"
                | "abs"
                | "min"
                | "max"
                | "extract"
                | "isnumber"
                | "isstring"
                | "iscolor"
                | "iskeyword"
                | "ispixel"
                | "ispercentage"
                | "isem"
                | "isrem"
                | "red"
                | "green"
                | "blue"
                | "alpha"
                | "hue"
                | "saturation"
                | "lightness"
                | "luma"
                | "argb"
                | "rgbahex"
                | "darken"
                | "lighten"
                | "saturate"
                | "desaturate"
                | "spin"
                | "fadein"
                | "fadeout"
                | "fade"
                | "tint"
                | "shade"
                | "mix"
                | "contrast"
                | "e"
                | "_sprintf"
                | "data_uri"
        )
    }

    pub(crate) fn call_builtin(&mut self, name: &str, args: &Value) -> LessResult<Option<Value>> {
        match name {
            "pow" => {
                let args = self.assert_args(args, 2, "pow")?;
                let base = self.assert_number(&args[0])?;
                let exp = self.assert_number(&args[1])?;
                Ok(Some(Value::number(base.powf(exp), "")))
            }
            "pi" => Ok(Some(Value::number(PI, ""))),
            "mod" => {
                let args = self.assert_args(args, 2, "mod")?;
                let a = self.assert_number(&args[0])?;
                let b = self.assert_number(&args[1])?;
                Ok(Some(Value::number(a % b, "")))
            }
            "tan" => self.trig(args, f64::tan),
            "sin" => self.trig(args, f64::sin),
            "cos" => self.trig(args, f64::cos),
            "atan" => self.inverse_trig(args, f64::atan),
            "asin" => self.inverse_trig(args, f64::asin),
            "acos" => self.inverse_trig(args, f64::acos),
            "sqrt" => {
                let value = self.assert_number(args)?;
                Ok(Some(Value::number(value.sqrt(), "")))
            }
            "floor" => self.rounding(args, f64::floor),
            "ceil" => self.rounding(args, f64::ceil),
            "round" => self.lib_round(args),
            "percentage" => {
                let value = self.assert_number(args)?;
                Ok(Some(Value::number(value * 100.0, "%")))
            }
            "unit" => self.lib_unit(args),
            "convert" => self.lib_convert(args),
            "abs" => match args {
                Value::Number { value, unit } => {
                    Ok(Some(Value::number(value.abs(), unit.clone())))
                }
                _ => Err(self.error("expecting number")),
            },
            "min" => self.extreme(args, "min", |candidate, best| candidate < best),
            "max" => self.extreme(args, "max", |candidate, best| candidate > best),
            "extract" => self.lib_extract(args),
            "isnumber" => Ok(Some(Value::truth(matches!(args, Value::Number { .. })))),
            "isstring" => Ok(Some(Value::truth(matches!(args, Value::Str { .. })))),
            "iscolor" => Ok(Some(Value::truth(coerce_color(args).is_some()))),
            "iskeyword" => Ok(Some(Value::truth(matches!(args, Value::Keyword(_))))),
            "ispixel" => Ok(Some(self.unit_is(args, "px"))),
            "ispercentage" => Ok(Some(self.unit_is(args, "%"))),
            "isem" => Ok(Some(self.unit_is(args, "em"))),
            "isrem" => Ok(Some(self.unit_is(args, "rem"))),
            "red" => self.channel(args, "red", |c| c.r),
            "green" => self.channel(args, "green", |c| c.g),
            "blue" => self.channel(args, "blue", |c| c.b),
            "alpha" => Ok(coerce_color(args).map(|c| Value::number(c.effective_alpha(), ""))),
            "hue" => self.hsl_channel(args, |hsl| hsl.h),
            "saturation" => self.hsl_channel(args, |hsl| hsl.s),
            "lightness" => self.hsl_channel(args, |hsl| hsl.l),
            "luma" => {
                let Some(color) = coerce_color(args) else {
                    return Err(self.error("color expected for luma()"));
                };
                Ok(Some(Value::number(round8(luma(color) * 100.0), "%")))
            }
            "argb" | "rgbahex" => {
                let Some(color) = coerce_color(args) else {
                    return Err(self.error("color expected for rgbahex"));
                };
                let c = color.fix();
                Ok(Some(Value::keyword(format!(
                    "#{:02x}{:02x}{:02x}{:02x}",
                    (c.effective_alpha() * 255.0).round() as u8,
                    c.r.round() as u8,
                    c.g.round() as u8,
                    c.b.round() as u8
                ))))
            }
            "darken" => self.adjust_lightness(args, -1.0),
            "lighten" => self.adjust_lightness(args, 1.0),
            "saturate" => self.adjust_saturation(args, 1.0),
            "desaturate" => self.adjust_saturation(args, -1.0),
            "spin" => {
                let (color, delta) = self.color_args(args)?;
                let mut hsl = to_hsl(color);
                hsl.h += delta % 360.0;
                if hsl.h < 0.0 {
                    hsl.h += 360.0;
                }
                Ok(Some(Value::Color(to_rgb(hsl))))
            }
            "fadein" => self.adjust_alpha(args, 1.0),
            "fadeout" => self.adjust_alpha(args, -1.0),
            "fade" => {
                let (color, delta) = self.color_args(args)?;
                let faded = Color {
                    alpha: Some((delta / 100.0).clamp(0.0, 1.0)),
                    ..color
                };
                Ok(Some(Value::Color(faded)))
            }
            "tint" => self.blend_with(args, Color::rgb(255.0, 255.0, 255.0), "tint"),
            "shade" => self.blend_with(args, Color::rgb(0.0, 0.0, 0.0), "shade"),
            "mix" => self.lib_mix(args),
            "contrast" => self.lib_contrast(args),
            "e" => self.lib_e(args).map(Some),
            "_sprintf" => self.lib_sprintf(args),
            "data_uri" => self.lib_data_uri(args),
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // 实参断言

    fn assert_number(&self, value: &Value) -> LessResult<f64> {
        match value {
            Value::Number { value, .. } => Ok(*value),
            _ => Err(self.error("expecting number")),
        }
    }

    fn assert_args<'v>(
        &self,
        value: &'v Value,
        expected: usize,
        name: &str,
    ) -> LessResult<&'v [Value]> {
        match value {
            Value::List { items, .. } if items.len() == expected => Ok(items),
            Value::List { items, .. } => Err(self.error(format!(
                "{name}: expecting {expected} arguments, got {}",
                items.len()
            ))),
            _ => Err(self.error(format!("{name}: expecting {expected} arguments, got 1"))),
        }
    }

    fn assert_min_args<'v>(
        &self,
        value: &'v Value,
        expected: usize,
        name: &str,
    ) -> LessResult<Vec<Value>> {
        match value {
            Value::List { items, .. } => {
                if items.len() < expected {
                    Err(self.error(format!(
                        "{name}: expecting at least {expected} arguments, got {}",
                        items.len()
                    )))
                } else {
                    Ok(items.clone())
                }
            }
            single => Ok(vec![single.clone()]),
        }
    }

    fn assert_color(&self, value: &Value) -> LessResult<Color> {
        coerce_color(value).ok_or_else(|| self.error("expected color value"))
    }

    /// (颜色, 数值增量) 形式的实参对；不完整时退回黑色与 0。
    fn color_args(&self, args: &Value) -> LessResult<(Color, f64)> {
        match args {
            Value::List { items, .. } if items.len() >= 2 => {
                let color = self.assert_color(&items[0])?;
                let delta = match &items[1] {
                    Value::Number { value, .. } => *value,
                    _ => 0.0,
                };
                Ok((color, delta))
            }
            _ => Ok((Color::rgb(0.0, 0.0, 0.0), 0.0)),
        }
    }

    /// 去定界符。列表取第一项递归，非字符串的值先序列化再当关键字。
    pub(crate) fn lib_e(&self, value: &Value) -> LessResult<Value> {
        match value {
            Value::List { items, .. } => match items.first() {
                Some(first) => self.lib_e(first),
                None => Err(self.error("unrecognised input")),
            },
            Value::Str { parts, .. } => Ok(Value::Str {
                delim: None,
                parts: parts.clone(),
            }),
            Value::Keyword(_) => Ok(value.clone()),
            other => Ok(Value::Keyword(self.compile_value(other)?)),
        }
    }

    // ------------------------------------------------------------------
    // 数学

    fn trig(&self, args: &Value, f: fn(f64) -> f64) -> LessResult<Option<Value>> {
        let value = self.assert_number(args)?;
        Ok(Some(Value::number(f(value), "")))
    }

    fn inverse_trig(&self, args: &Value, f: fn(f64) -> f64) -> LessResult<Option<Value>> {
        let value = self.assert_number(args)?;
        Ok(Some(Value::number(f(value), "rad")))
    }

    fn rounding(&self, args: &Value, f: fn(f64) -> f64) -> LessResult<Option<Value>> {
        match args {
            Value::Number { value, unit } => Ok(Some(Value::number(f(*value), unit.clone()))),
            _ => Err(self.error("expecting number")),
        }
    }

    fn lib_round(&self, args: &Value) -> LessResult<Option<Value>> {
        match args {
            Value::List { items, .. } if items.len() >= 2 => {
                let value = self.assert_number(&items[0])?;
                let precision = self.assert_number(&items[1])?;
                let factor = 10f64.powi(precision as i32);
                let unit = match &items[0] {
                    Value::Number { unit, .. } => unit.clone(),
                    _ => String::new(),
                };
                Ok(Some(Value::number((value * factor).round() / factor, unit)))
            }
            Value::Number { value, unit } => {
                Ok(Some(Value::number(value.round(), unit.clone())))
            }
            _ => Err(self.error("expecting number")),
        }
    }

    fn lib_unit(&self, args: &Value) -> LessResult<Option<Value>> {
        match args {
            Value::List { items, .. } if items.len() >= 2 => {
                let value = self.assert_number(&items[0])?;
                let unit = self.compile_value(&self.lib_e(&items[1])?)?;
                Ok(Some(Value::number(value, unit)))
            }
            _ => {
                let value = self.assert_number(args)?;
                Ok(Some(Value::number(value, "")))
            }
        }
    }

    fn lib_convert(&self, args: &Value) -> LessResult<Option<Value>> {
        let args = self.assert_args(args, 2, "convert")?;
        let to = match &args[1] {
            Value::Keyword(word) => word.clone(),
            other => self.compile_value(&self.lib_e(other)?)?,
        };
        self.convert_value(&args[0], &to).map(Some)
    }

    /// 单位换算：长度经 px、时间只有 s↔ms、角度一律以度为枢纽。
    /// 结果保留 8 位小数。
    pub(crate) fn convert_value(&self, number: &Value, to: &str) -> LessResult<Value> {
        let value = self.assert_number(number)?;
        let from = match number {
            Value::Number { unit, .. } => unit.as_str(),
            _ => "",
        };
        if from == to {
            return Ok(number.clone());
        }
        if let (Some(from_factor), Some(to_factor)) = (length_factor(from), length_factor(to)) {
            let px = value * from_factor;
            return Ok(Value::number(round8(px / to_factor), to));
        }
        if TIME_UNITS.contains(&from) && TIME_UNITS.contains(&to) {
            let result = if to == "ms" { value * 1000.0 } else { value / 1000.0 };
            return Ok(Value::number(round8(result), to));
        }
        if ANGLE_UNITS.contains(&from) && ANGLE_UNITS.contains(&to) {
            let deg = match from {
                "deg" => value,
                "rad" => value.to_degrees(),
                "turn" => value * 360.0,
                _ => value / (400.0 / 360.0),
            };
            let result = match to {
                "deg" => deg,
                "rad" => deg.to_radians(),
                "turn" => deg / 360.0,
                _ => deg * (400.0 / 360.0),
            };
            return Ok(Value::number(round8(result), to));
        }
        Err(self.error(format!("Cannot convert {from} to {to}")))
    }

    fn extreme(
        &self,
        args: &Value,
        name: &str,
        better: fn(f64, f64) -> bool,
    ) -> LessResult<Option<Value>> {
        let values = self.assert_min_args(args, 1, name)?;
        let first_unit = match &values[0] {
            Value::Number { unit, .. } => unit.clone(),
            _ => return Err(self.error("expecting number")),
        };
        let mut best = 0usize;
        let mut best_value = self.assert_number(&values[0])?;
        for (i, value) in values.iter().enumerate() {
            let converted = self.convert_value(value, &first_unit)?;
            let converted = self.assert_number(&converted)?;
            if better(converted, best_value) {
                best = i;
                best_value = converted;
            }
        }
        Ok(Some(values[best].clone()))
    }

    // ------------------------------------------------------------------
    // 列表与类型谓词

    fn lib_extract(&self, args: &Value) -> LessResult<Option<Value>> {
        let args = self.assert_args(args, 2, "extract")?;
        let index = self.assert_number(&args[1])?;
        if let Value::List { items, .. } = &args[0] {
            if index >= 1.0 {
                if let Some(item) = items.get(index as usize - 1) {
                    return Ok(Some(item.clone()));
                }
            }
        }
        // 越界时调用按原样回吐
        Ok(None)
    }

    fn unit_is(&self, args: &Value, expected: &str) -> Value {
        Value::truth(matches!(args, Value::Number { unit, .. } if unit == expected))
    }

    // ------------------------------------------------------------------
    // 颜色通道与调整

    fn channel(
        &self,
        args: &Value,
        name: &str,
        pick: fn(&Color) -> f64,
    ) -> LessResult<Option<Value>> {
        let Some(color) = coerce_color(args) else {
            return Err(self.error(format!("color expected for {name}()")));
        };
        Ok(Some(Value::number(pick(&color), "")))
    }

    fn hsl_channel(
        &self,
        args: &Value,
        pick: fn(&crate::color::Hsl) -> f64,
    ) -> LessResult<Option<Value>> {
        let color = self.assert_color(args)?;
        let hsl = to_hsl(color);
        Ok(Some(Value::number(pick(&hsl).round(), "")))
    }

    fn adjust_lightness(&self, args: &Value, sign: f64) -> LessResult<Option<Value>> {
        let (color, delta) = self.color_args(args)?;
        let mut hsl = to_hsl(color);
        hsl.l = (hsl.l + sign * delta).clamp(0.0, 100.0);
        Ok(Some(Value::Color(to_rgb(hsl))))
    }

    fn adjust_saturation(&self, args: &Value, sign: f64) -> LessResult<Option<Value>> {
        let (color, delta) = self.color_args(args)?;
        let mut hsl = to_hsl(color);
        hsl.s = (hsl.s + sign * delta).clamp(0.0, 100.0);
        Ok(Some(Value::Color(to_rgb(hsl))))
    }

    fn adjust_alpha(&self, args: &Value, sign: f64) -> LessResult<Option<Value>> {
        let (color, delta) = self.color_args(args)?;
        let alpha = (color.effective_alpha() + sign * delta / 100.0).clamp(0.0, 1.0);
        Ok(Some(Value::Color(Color {
            alpha: Some(alpha),
            ..color
        })))
    }

    fn blend_with(&self, args: &Value, base: Color, name: &str) -> LessResult<Option<Value>> {
        match args {
            Value::Color(_) | Value::RawColor(_) | Value::Keyword(_) => {
                let color = self.assert_color(args)?;
                Ok(Some(Value::Color(self.mix_colors(base, color, 0.5))))
            }
            Value::List { items, .. } if items.len() >= 2 => {
                let color = self.assert_color(&items[0])?;
                let weight = match &items[1] {
                    Value::Number { value, .. } => value / 100.0,
                    _ => 0.5,
                };
                Ok(Some(Value::Color(self.mix_colors(base, color, weight))))
            }
            _ => Err(self.error(format!("{name} expects (color, weight)"))),
        }
    }

    fn lib_mix(&self, args: &Value) -> LessResult<Option<Value>> {
        let Value::List { items, .. } = args else {
            return Err(self.error("mix expects (color1, color2, weight)"));
        };
        if items.len() < 2 {
            return Err(self.error("mix expects (color1, color2, weight)"));
        }
        let first = self.assert_color(&items[0])?;
        let second = self.assert_color(&items[1])?;
        let weight = match items.get(2) {
            Some(Value::Number { value, .. }) => value / 100.0,
            _ => 0.5,
        };
        Ok(Some(Value::Color(self.mix_colors(first, second, weight))))
    }

    /// less.js 的加权混色：权重先与两色的透明度差校正。
    fn mix_colors(&self, first: Color, second: Color, weight: f64) -> Color {
        let first_a = first.effective_alpha();
        let second_a = second.effective_alpha();
        let w = weight * 2.0 - 1.0;
        let a = first_a - second_a;
        let w1 = if w * a == -1.0 {
            w
        } else {
            (w + a) / (1.0 + w * a)
        };
        let w1 = (w1 + 1.0) / 2.0;
        let w2 = 1.0 - w1;
        let alpha = if first_a != 1.0 || second_a != 1.0 {
            Some(first_a * weight + second_a * (1.0 - weight))
        } else {
            None
        };
        Color {
            r: w1 * first.r + w2 * second.r,
            g: w1 * first.g + w2 * second.g,
            b: w1 * first.b + w2 * second.b,
            alpha,
        }
        .fix()
    }

    fn lib_contrast(&self, args: &Value) -> LessResult<Option<Value>> {
        let mut dark = Color::rgb(0.0, 0.0, 0.0);
        let mut light = Color::rgb(255.0, 255.0, 255.0);
        let mut threshold = 0.43;
        let input = match args {
            Value::List { items, .. } if !items.is_empty() => {
                let input = self.assert_color(&items[0])?;
                if let Some(value) = items.get(1) {
                    dark = self.assert_color(value)?;
                }
                if let Some(value) = items.get(2) {
                    light = self.assert_color(value)?;
                }
                if let Some(Value::Number { value, unit }) = items.get(3) {
                    threshold = if unit == "%" { value / 100.0 } else { *value };
                }
                input
            }
            other => self.assert_color(other)?,
        };
        // 深浅色按感知亮度重排
        if luma(dark) > luma(light) {
            std::mem::swap(&mut dark, &mut light);
        }
        let picked = if luma(input) < threshold { light } else { dark };
        Ok(Some(Value::Color(picked)))
    }

    // ------------------------------------------------------------------
    // 字符串与资源

    fn lib_sprintf(&mut self, args: &Value) -> LessResult<Option<Value>> {
        static PLACEHOLDER: Lazy<Regex> =
            Lazy::new(|| Regex::new("%[dsa]").expect("placeholder pattern"));

        let Value::List { items, .. } = args else {
            return Ok(Some(args.clone()));
        };
        let Some(template_value) = items.first() else {
            return Ok(Some(args.clone()));
        };
        let mut template = self.compile_value(&self.lib_e(template_value)?)?;
        let slots = PLACEHOLDER.find_iter(&template).count();
        for i in 0..slots {
            let value = items.get(i + 1).cloned().unwrap_or_else(|| Value::keyword(""));
            let mut reduced = self.reduce(&value, false)?;
            if let Some(color) = coerce_color(&reduced) {
                reduced = Value::Color(color);
            }
            let replacement = self.compile_value(&self.lib_e(&reduced)?)?;
            template = PLACEHOLDER
                .replace(&template, regex::NoExpand(&replacement))
                .into_owned();
        }
        let delim = match template_value {
            Value::Str { delim, .. } => *delim,
            _ => Some('"'),
        };
        Ok(Some(Value::Str {
            delim,
            parts: vec![StringPart::Literal(template)],
        }))
    }

    /// 文件能经 import 目录找到且小于 32KiB 时 base64 内嵌，否则
    /// 原样输出 url。
    fn lib_data_uri(&mut self, args: &Value) -> LessResult<Option<Value>> {
        let (mime_arg, url_arg) = match args {
            Value::List { items, .. } if items.len() >= 2 => (Some(&items[0]), &items[1]),
            other => (None, other),
        };
        let mut url = self.compile_value(&self.lib_e(url_arg)?)?;
        if let Some(full_path) = importer::find_import(&self.import_dirs, &url) {
            if let Ok(metadata) = fs::metadata(&full_path) {
                if metadata.len() < 32 * 1024 {
                    let mime = match mime_arg {
                        Some(value) => Some(self.compile_value(&self.lib_e(value)?)?),
                        None => importer::mime_for(&full_path).map(str::to_string),
                    };
                    if let (Some(mime), Ok(bytes)) = (mime, fs::read(&full_path)) {
                        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                        url = format!("data:{mime};base64,{encoded}");
                    }
                }
            }
        }
        Ok(Some(Value::keyword(format!("url(\"{url}\")"))))
    }
}
