use crate::value::fmt_number;
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub alpha: Option<f64>,
}

#[derive(Clone, Copy, Debug)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
    pub alpha: Option<f64>,
}

impl Color {
    pub fn rgb(r: f64, g: f64, b: f64) -> Color {
        Color {
            r,
            g,
            b,
            alpha: None,
        }
        .fix()
    }

    pub fn rgba(r: f64, g: f64, b: f64, alpha: f64) -> Color {
        Color {
            r,
            g,
            b,
            alpha: Some(alpha),
        }
        .fix()
    }

    pub fn fix(self) -> Color {
        Color {
            r: self.r.clamp(0.0, 255.0),
            g: self.g.clamp(0.0, 255.0),
            b: self.b.clamp(0.0, 255.0),
            alpha: self.alpha.map(|a| a.clamp(0.0, 1.0)),
        }
    }

    pub fn effective_alpha(&self) -> f64 {
        self.alpha.unwrap_or(1.0)
    }

    pub fn from_hex(hex: &str) -> Option<Color> {
        let digits = hex.strip_prefix('#')?;
        match digits.len() {
            3 => {
                let r = hex_value(&digits[0..1])?;
                let g = hex_value(&digits[1..2])?;
                let b = hex_value(&digits[2..3])?;
                Some(Color::rgb(
                    (r * 17) as f64,
                    (g * 17) as f64,
                    (b * 17) as f64,
                ))
            }
            6 => {
                let r = hex_value(&digits[0..2])?;
                let g = hex_value(&digits[2..4])?;
                let b = hex_value(&digits[4..6])?;
                Some(Color::rgb(r as f64, g as f64, b as f64))
            }
            8 => {
                let r = hex_value(&digits[0..2])?;
                let g = hex_value(&digits[2..4])?;
                let b = hex_value(&digits[4..6])?;
                let a = hex_value(&digits[6..8])?;
                Some(Color::rgba(r as f64, g as f64, b as f64, a as f64 / 255.0))
            }
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Color> {
        let lowered = name.to_ascii_lowercase();
        CSS_COLORS.get(lowered.as_str()).map(|&(r, g, b, a)| Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            alpha: a,
        })
    }

    pub fn to_css(&self, compress: bool) -> String {
        let c = self.fix();
        let r = c.r.round() as u8;
        let g = c.g.round() as u8;
        let b = c.b.round() as u8;
        match c.alpha {
            Some(a) if a != 1.0 => {
                format!("rgba({r},{g},{b},{})", fmt_number(a))
            }
            _ => {
                let hex = format!("#{r:02x}{g:02x}{b:02x}");
                if compress {
                    let h = hex.as_bytes();
                    if h[1] == h[2] && h[3] == h[4] && h[5] == h[6] {
                        return format!("#{}{}{}", h[1] as char, h[3] as char, h[5] as char);
                    }
                }
                hex
            }
        }
    }
}

fn hex_value(digits: &str) -> Option<u32> {
    u32::from_str_radix(digits, 16).ok()
}

pub fn to_hsl(color: Color) -> Hsl {
    let r = color.r / 255.0;
    let g = color.g / 255.0;
    let b = color.b / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if (max - min).abs() < f64::EPSILON {
        return Hsl {
            h: 0.0,
            s: 0.0,
            l: l * 100.0,
            alpha: color.alpha,
        };
    }

    let d = max - min;
    let s = if l < 0.5 {
        d / (max + min)
    } else {
        d / (2.0 - max - min)
    };

    let h = if (max - r).abs() < f64::EPSILON {
        (g - b) / d
    } else if (max - g).abs() < f64::EPSILON {
        2.0 + (b - r) / d
    } else {
        4.0 + (r - g) / d
    };
    let h = if h < 0.0 { h + 6.0 } else { h };

    Hsl {
        h: h * 60.0,
        s: s * 100.0,
        l: l * 100.0,
        alpha: color.alpha,
    }
}

pub fn to_rgb(hsl: Hsl) -> Color {
    let h = hsl.h / 360.0;
    let s = hsl.s / 100.0;
    let l = hsl.l / 100.0;

    let (r, g, b) = if s <= 0.0 {
        (l, l, l)
    } else {
        let q = if l < 0.5 {
            l * (1.0 + s)
        } else {
            l + s - l * s
        };
        let p = 2.0 * l - q;
        (
            hue_to_channel(p, q, h + 1.0 / 3.0),
            hue_to_channel(p, q, h),
            hue_to_channel(p, q, h - 1.0 / 3.0),
        )
    };

    Color {
        r: (r * 255.0).round(),
        g: (g * 255.0).round(),
        b: (b * 255.0).round(),
        alpha: hsl.alpha,
    }
    .fix()
}

fn hue_to_channel(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    } else if t > 1.0 {
        t -= 1.0;
    }
    match t {
        _ if 6.0 * t < 1.0 => p + (q - p) * 6.0 * t,
        _ if 2.0 * t < 1.0 => q,
        _ if 3.0 * t < 2.0 => p + (q - p) * (2.0 / 3.0 - t) * 6.0,
        _ => p,
    }
}

pub fn luma(color: Color) -> f64 {
    let expand = |channel: f64| {
        let c = channel / 255.0;
        if c <= 0.03928 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    };
    0.2126 * expand(color.r) + 0.7152 * expand(color.g) + 0.0722 * expand(color.b)
}

static CSS_COLORS: Lazy<HashMap<&'static str, (u16, u16, u16, Option<f64>)>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let table: &[(&str, (u16, u16, u16))] = &[
        ("aliceblue", (240, 248, 255)),
        ("antiquewhite", (250, 235, 215)),
        ("aqua", (0, 255, 255)),
        ("aquamarine", (127, 255, 212)),
        ("azure", (240, 255, 255)),
        ("beige", (245, 245, 220)),
        ("bisque", (255, 228, 196)),
        ("black", (0, 0, 0)),
        ("blanchedalmond", (255, 235, 205)),
        ("blue", (0, 0, 255)),
        ("blueviolet", (138, 43, 226)),
        ("brown", (165, 42, 42)),
        ("burlywood", (222, 184, 135)),
        ("cadetblue", (95, 158, 160)),
        ("chartreuse", (127, 255, 0)),
        ("chocolate", (210, 105, 30)),
        ("coral", (255, 127, 80)),
        ("cornflowerblue", (100, 149, 237)),
        ("cornsilk", (255, 248, 220)),
        ("crimson", (220, 20, 60)),
        ("cyan", (0, 255, 255)),
        ("darkblue", (0, 0, 139)),
        ("darkcyan", (0, 139, 139)),
        ("darkgoldenrod", (184, 134, 11)),
        ("darkgray", (169, 169, 169)),
        ("darkgreen", (0, 100, 0)),
        ("darkgrey", (169, 169, 169)),
        ("darkkhaki", (189, 183, 107)),
        ("darkmagenta", (139, 0, 139)),
        ("darkolivegreen", (85, 107, 47)),
        ("darkorange", (255, 140, 0)),
        ("darkorchid", (153, 50, 204)),
        ("darkred", (139, 0, 0)),
        ("darksalmon", (233, 150, 122)),
        ("darkseagreen", (143, 188, 143)),
        ("darkslateblue", (72, 61, 139)),
        ("darkslategray", (47, 79, 79)),
        ("darkslategrey", (47, 79, 79)),
        ("darkturquoise", (0, 206, 209)),
        ("darkviolet", (148, 0, 211)),
        ("deeppink", (255, 20, 147)),
        ("deepskyblue", (0, 191, 255)),
        ("dimgray", (105, 105, 105)),
        ("dimgrey", (105, 105, 105)),
        ("dodgerblue", (30, 144, 255)),
        ("firebrick", (178, 34, 34)),
        ("floralwhite", (255, 250, 240)),
        ("forestgreen", (34, 139, 34)),
        ("fuchsia", (255, 0, 255)),
        ("gainsboro", (220, 220, 220)),
        ("ghostwhite", (248, 248, 255)),
        ("gold", (255, 215, 0)),
        ("goldenrod", (218, 165, 32)),
        ("gray", (128, 128, 128)),
        ("green", (0, 128, 0)),
        ("greenyellow", (173, 255, 47)),
        ("grey", (128, 128, 128)),
        ("honeydew", (240, 255, 240)),
        ("hotpink", (255, 105, 180)),
        ("indianred", (205, 92, 92)),
        ("indigo", (75, 0, 130)),
        ("ivory", (255, 255, 240)),
        ("khaki", (240, 230, 140)),
        ("lavender", (230, 230, 250)),
        ("lavenderblush", (255, 240, 245)),
        ("lawngreen", (124, 252, 0)),
        ("lemonchiffon", (255, 250, 205)),
        ("lightblue", (173, 216, 230)),
        ("lightcoral", (240, 128, 128)),
        ("lightcyan", (224, 255, 255)),
        ("lightgoldenrodyellow", (250, 250, 210)),
        ("lightgray", (211, 211, 211)),
        ("lightgreen", (144, 238, 144)),
        ("lightgrey", (211, 211, 211)),
        ("lightpink", (255, 182, 193)),
        ("lightsalmon", (255, 160, 122)),
        ("lightseagreen", (32, 178, 170)),
        ("lightskyblue", (135, 206, 250)),
        ("lightslategray", (119, 136, 153)),
        ("lightslategrey", (119, 136, 153)),
        ("lightsteelblue", (176, 196, 222)),
        ("lightyellow", (255, 255, 224)),
        ("lime", (0, 255, 0)),
        ("limegreen", (50, 205, 50)),
        ("linen", (250, 240, 230)),
        ("magenta", (255, 0, 255)),
        ("maroon", (128, 0, 0)),
        ("mediumaquamarine", (102, 205, 170)),
        ("mediumblue", (0, 0, 205)),
        ("mediumorchid", (186, 85, 211)),
        ("mediumpurple", (147, 112, 219)),
        ("mediumseagreen", (60, 179, 113)),
        ("mediumslateblue", (123, 104, 238)),
        ("mediumspringgreen", (0, 250, 154)),
        ("mediumturquoise", (72, 209, 204)),
        ("mediumvioletred", (199, 21, 133)),
        ("midnightblue", (25, 25, 112)),
        ("mintcream", (245, 255, 250)),
        ("mistyrose", (255, 228, 225)),
        ("moccasin", (255, 228, 181)),
        ("navajowhite", (255, 222, 173)),
        ("navy", (0, 0, 128)),
        ("oldlace", (253, 245, 230)),
        ("olive", (128, 128, 0)),
        ("olivedrab", (107, 142, 35)),
        ("orange", (255, 165, 0)),
        ("orangered", (255, 69, 0)),
        ("orchid", (218, 112, 214)),
        ("palegoldenrod", (238, 232, 170)),
        ("palegreen", (152, 251, 152)),
        ("paleturquoise", (175, 238, 238)),
        ("palevioletred", (219, 112, 147)),
        ("papayawhip", (255, 239, 213)),
        ("peachpuff", (255, 218, 185)),
        ("peru", (205, 133, 63)),
        ("pink", (255, 192, 203)),
        ("plum", (221, 160, 221)),
        ("powderblue", (176, 224, 230)),
        ("purple", (128, 0, 128)),
        ("red", (255, 0, 0)),
        ("rosybrown", (188, 143, 143)),
        ("royalblue", (65, 105, 225)),
        ("saddlebrown", (139, 69, 19)),
        ("salmon", (250, 128, 114)),
        ("sandybrown", (244, 164, 96)),
        ("seagreen", (46, 139, 87)),
        ("seashell", (255, 245, 238)),
        ("sienna", (160, 82, 45)),
        ("silver", (192, 192, 192)),
        ("skyblue", (135, 206, 235)),
        ("slateblue", (106, 90, 205)),
        ("slategray", (112, 128, 144)),
        ("slategrey", (112, 128, 144)),
        ("snow", (255, 250, 250)),
        ("springgreen", (0, 255, 127)),
        ("steelblue", (70, 130, 180)),
        ("tan", (210, 180, 140)),
        ("teal", (0, 128, 128)),
        ("thistle", (216, 191, 216)),
        ("tomato", (255, 99, 71)),
        ("turquoise", (64, 224, 208)),
        ("violet", (238, 130, 238)),
        ("wheat", (245, 222, 179)),
        ("white", (255, 255, 255)),
        ("whitesmoke", (245, 245, 245)),
        ("yellow", (255, 255, 0)),
        ("yellowgreen", (154, 205, 50)),
    ];
    for &(name, (r, g, b)) in table {
        m.insert(name, (r, g, b, None));
    }
    m.insert("transparent", (0, 0, 0, Some(0.0)));
    m
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parsing_expands_short_form() {
        let c = Color::from_hex("#1af").unwrap();
        assert_eq!((c.r, c.g, c.b), (17.0, 170.0, 255.0));
        assert!(Color::from_hex("#12345").is_none());
    }

    #[test]
    fn hsl_round_trip_preserves_channels() {
        let c = Color::rgb(51.0, 102.0, 153.0);
        let back = to_rgb(to_hsl(c));
        assert_eq!((back.r, back.g, back.b), (51.0, 102.0, 153.0));
    }

    #[test]
    fn fix_clamps_out_of_range_channels() {
        let c = Color::rgba(-4.0, 300.0, 128.0, 1.5);
        assert_eq!((c.r, c.g, c.b), (0.0, 255.0, 128.0));
        assert_eq!(c.alpha, Some(1.0));
    }

    #[test]
    fn css_output_shortens_when_compressing() {
        let c = Color::rgb(255.0, 255.0, 255.0);
        assert_eq!(c.to_css(false), "#ffffff");
        assert_eq!(c.to_css(true), "#fff");
        let faded = Color::rgba(0.0, 0.0, 0.0, 0.4);
        assert_eq!(faded.to_css(false), "rgba(0,0,0,0.4)");
    }

    #[test]
    fn named_colors_resolve() {
        let red = Color::from_name("Red").unwrap();
        assert_eq!((red.r, red.g, red.b), (255.0, 0.0, 0.0));
        assert_eq!(Color::from_name("transparent").unwrap().alpha, Some(0.0));
        assert!(Color::from_name("notacolor").is_none());
    }

    #[test]
    fn luma_uses_srgb_expansion() {
        assert!((luma(Color::rgb(255.0, 255.0, 255.0)) - 1.0).abs() < 1e-9);
        assert!(luma(Color::rgb(0.0, 0.0, 0.0)).abs() < 1e-9);
        let mid = luma(Color::rgb(255.0, 0.0, 0.0));
        assert!((mid - 0.2126).abs() < 1e-4);
    }
}
