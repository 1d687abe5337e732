//! Color literal normalization
//!
//! Colors inside string goals are rewritten to `rgba(r, g, b, a)` before
//! interpolation so that every channel becomes a plain numeric token.
//! Supported forms, in lookup order: `#rrggbb`, named colors, `rgb()`,
//! `rgba()`, `#rgb`, `#rrggbbaa`, `#rgba`, `hsl()`, `hsla()`.

use regex::{Captures, Regex};
use rustc_hash::FxHashMap;
use std::sync::{Arc, OnceLock};

use crate::value::format_number;

// ============================================================================
// Named colors
// ============================================================================

/// Table of named colors packed as `0xRRGGBBAA`
#[derive(Debug, Clone)]
pub struct ColorNames {
    colors: FxHashMap<String, u32>,
    pattern: Option<Regex>,
}

impl ColorNames {
    /// Build a table from name/color pairs
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let colors: FxHashMap<String, u32> =
            entries.into_iter().map(|(n, c)| (n.into(), c)).collect();
        let pattern = if colors.is_empty() {
            None
        } else {
            let mut names: Vec<&str> = colors.keys().map(String::as_str).collect();
            names.sort_unstable();
            let alternation = names
                .iter()
                .map(|n| regex::escape(n))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"\b({})\b", alternation)).ok()
        };
        Self { colors, pattern }
    }

    /// The CSS/SVG color keywords
    pub fn css() -> Self {
        Self::new(CSS_COLORS.iter().copied())
    }

    /// Process-wide shared copy of [`ColorNames::css`]
    pub fn shared() -> Arc<ColorNames> {
        static CSS: OnceLock<Arc<ColorNames>> = OnceLock::new();
        CSS.get_or_init(|| Arc::new(ColorNames::css())).clone()
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.colors.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.colors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

impl Default for ColorNames {
    fn default() -> Self {
        Self::css()
    }
}

// ============================================================================
// Parsing
// ============================================================================

struct Matchers {
    rgb: Regex,
    rgba: Regex,
    hsl: Regex,
    hsla: Regex,
    hex3: Regex,
    hex4: Regex,
    hex6: Regex,
    hex8: Regex,
    color: Regex,
    digit: Regex,
}

const NUMBER: &str = r"[-+]?\d*\.?\d+";

fn call(parts: &[&str]) -> String {
    format!(r"\(\s*({})\s*\)", parts.join(r")\s*,\s*("))
}

fn matchers() -> &'static Matchers {
    static MATCHERS: OnceLock<Matchers> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        let pct = format!("{}%", NUMBER);
        let compile = |src: &str| Regex::new(src).expect("static color pattern");
        Matchers {
            rgb: compile(&format!("rgb{}", call(&[NUMBER, NUMBER, NUMBER]))),
            rgba: compile(&format!("rgba{}", call(&[NUMBER, NUMBER, NUMBER, NUMBER]))),
            hsl: compile(&format!("hsl{}", call(&[NUMBER, &pct, &pct]))),
            hsla: compile(&format!("hsla{}", call(&[NUMBER, &pct, &pct, NUMBER]))),
            hex3: compile(r"^#([0-9a-fA-F])([0-9a-fA-F])([0-9a-fA-F])$"),
            hex4: compile(r"^#([0-9a-fA-F])([0-9a-fA-F])([0-9a-fA-F])([0-9a-fA-F])$"),
            hex6: compile(r"^#([0-9a-fA-F]{6})$"),
            hex8: compile(r"^#([0-9a-fA-F]{8})$"),
            color: compile(
                r"(?i)(#(?:[0-9a-f]{2}){2,4}|(#[0-9a-f]{3})|(rgb|hsl)a?\((-?\d+%?[,\s]+){2,3}\s*[\d\.]+%?\))",
            ),
            digit: compile(r"\d"),
        }
    })
}

fn leading_float(s: &str) -> f64 {
    s.trim_end_matches('%').parse::<f64>().unwrap_or(f64::NAN)
}

#[inline]
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn parse255(s: &str) -> u32 {
    let n = leading_float(s).trunc();
    if n < 0.0 {
        0
    } else if n > 255.0 {
        255
    } else {
        n as u32
    }
}

fn parse360(s: &str) -> f64 {
    let n = leading_float(s);
    ((n % 360.0) + 360.0) % 360.0 / 360.0
}

fn parse1(s: &str) -> u32 {
    let n = leading_float(s);
    if n < 0.0 {
        0
    } else if n > 1.0 {
        255
    } else {
        round_half_up(n * 255.0) as u32
    }
}

fn parse_percentage(s: &str) -> f64 {
    let n = leading_float(s);
    if n < 0.0 {
        0.0
    } else if n > 100.0 {
        1.0
    } else {
        n / 100.0
    }
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> u32 {
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);
    let channel = |c: f64| (round_half_up(c * 255.0) as u32) & 0xff;
    (channel(r) << 24) | (channel(g) << 16) | (channel(b) << 8)
}

fn hex(digits: &str) -> Option<u32> {
    u32::from_str_radix(digits, 16).ok()
}

/// Parse a color literal into a packed `0xRRGGBBAA`
pub fn normalize_color(color: &str, names: &ColorNames) -> Option<u32> {
    let m = matchers();

    if let Some(c) = m.hex6.captures(color) {
        return hex(&format!("{}ff", &c[1]));
    }
    if let Some(packed) = names.get(color) {
        return Some(packed);
    }
    if let Some(c) = m.rgb.captures(color) {
        return Some((parse255(&c[1]) << 24) | (parse255(&c[2]) << 16) | (parse255(&c[3]) << 8) | 0xff);
    }
    if let Some(c) = m.rgba.captures(color) {
        return Some(
            (parse255(&c[1]) << 24) | (parse255(&c[2]) << 16) | (parse255(&c[3]) << 8) | parse1(&c[4]),
        );
    }
    if let Some(c) = m.hex3.captures(color) {
        return hex(&format!("{0}{0}{1}{1}{2}{2}ff", &c[1], &c[2], &c[3]));
    }
    if let Some(c) = m.hex8.captures(color) {
        return hex(&c[1]);
    }
    if let Some(c) = m.hex4.captures(color) {
        return hex(&format!("{0}{0}{1}{1}{2}{2}{3}{3}", &c[1], &c[2], &c[3], &c[4]));
    }
    if let Some(c) = m.hsl.captures(color) {
        let rgb = hsl_to_rgb(parse360(&c[1]), parse_percentage(&c[2]), parse_percentage(&c[3]));
        return Some(rgb | 0xff);
    }
    if let Some(c) = m.hsla.captures(color) {
        let rgb = hsl_to_rgb(parse360(&c[1]), parse_percentage(&c[2]), parse_percentage(&c[3]));
        return Some(rgb | parse1(&c[4]));
    }
    None
}

/// Rewrite a color literal as `rgba(r, g, b, a)`; unknown input is returned as-is
pub fn color_to_rgba(color: &str, names: &ColorNames) -> String {
    match normalize_color(color, names) {
        Some(packed) => {
            let r = (packed & 0xff00_0000) >> 24;
            let g = (packed & 0x00ff_0000) >> 16;
            let b = (packed & 0x0000_ff00) >> 8;
            let a = (packed & 0x0000_00ff) as f64 / 255.0;
            format!("rgba({}, {}, {}, {})", r, g, b, format_number(a))
        }
        None => color.to_string(),
    }
}

/// Replace every color literal inside a template with its `rgba()` form
pub fn normalize_colors(template: &str, names: &ColorNames) -> String {
    let m = matchers();
    let literal = m
        .color
        .replace_all(template, |c: &Captures| color_to_rgba(&c[0], names));
    match &names.pattern {
        Some(pattern) => pattern
            .replace_all(&literal, |c: &Captures| color_to_rgba(&c[0], names))
            .into_owned(),
        None => literal.into_owned(),
    }
}

/// Whether a string goal can be interpolated rather than snapped
pub fn is_animatable_string(s: &str, names: &ColorNames) -> bool {
    s.starts_with('#') || matchers().digit.is_match(s) || names.contains(s)
}

// http://www.w3.org/TR/css3-color/#svg-color
const CSS_COLORS: &[(&str, u32)] = &[
    ("transparent", 0x00000000),
    ("aliceblue", 0xf0f8ffff),
    ("antiquewhite", 0xfaebd7ff),
    ("aqua", 0x00ffffff),
    ("aquamarine", 0x7fffd4ff),
    ("azure", 0xf0ffffff),
    ("beige", 0xf5f5dcff),
    ("bisque", 0xffe4c4ff),
    ("black", 0x000000ff),
    ("blanchedalmond", 0xffebcdff),
    ("blue", 0x0000ffff),
    ("blueviolet", 0x8a2be2ff),
    ("brown", 0xa52a2aff),
    ("burlywood", 0xdeb887ff),
    ("burntsienna", 0xea7e5dff),
    ("cadetblue", 0x5f9ea0ff),
    ("chartreuse", 0x7fff00ff),
    ("chocolate", 0xd2691eff),
    ("coral", 0xff7f50ff),
    ("cornflowerblue", 0x6495edff),
    ("cornsilk", 0xfff8dcff),
    ("crimson", 0xdc143cff),
    ("cyan", 0x00ffffff),
    ("darkblue", 0x00008bff),
    ("darkcyan", 0x008b8bff),
    ("darkgoldenrod", 0xb8860bff),
    ("darkgray", 0xa9a9a9ff),
    ("darkgreen", 0x006400ff),
    ("darkgrey", 0xa9a9a9ff),
    ("darkkhaki", 0xbdb76bff),
    ("darkmagenta", 0x8b008bff),
    ("darkolivegreen", 0x556b2fff),
    ("darkorange", 0xff8c00ff),
    ("darkorchid", 0x9932ccff),
    ("darkred", 0x8b0000ff),
    ("darksalmon", 0xe9967aff),
    ("darkseagreen", 0x8fbc8fff),
    ("darkslateblue", 0x483d8bff),
    ("darkslategray", 0x2f4f4fff),
    ("darkslategrey", 0x2f4f4fff),
    ("darkturquoise", 0x00ced1ff),
    ("darkviolet", 0x9400d3ff),
    ("deeppink", 0xff1493ff),
    ("deepskyblue", 0x00bfffff),
    ("dimgray", 0x696969ff),
    ("dimgrey", 0x696969ff),
    ("dodgerblue", 0x1e90ffff),
    ("firebrick", 0xb22222ff),
    ("floralwhite", 0xfffaf0ff),
    ("forestgreen", 0x228b22ff),
    ("fuchsia", 0xff00ffff),
    ("gainsboro", 0xdcdcdcff),
    ("ghostwhite", 0xf8f8ffff),
    ("gold", 0xffd700ff),
    ("goldenrod", 0xdaa520ff),
    ("gray", 0x808080ff),
    ("green", 0x008000ff),
    ("greenyellow", 0xadff2fff),
    ("grey", 0x808080ff),
    ("honeydew", 0xf0fff0ff),
    ("hotpink", 0xff69b4ff),
    ("indianred", 0xcd5c5cff),
    ("indigo", 0x4b0082ff),
    ("ivory", 0xfffff0ff),
    ("khaki", 0xf0e68cff),
    ("lavender", 0xe6e6faff),
    ("lavenderblush", 0xfff0f5ff),
    ("lawngreen", 0x7cfc00ff),
    ("lemonchiffon", 0xfffacdff),
    ("lightblue", 0xadd8e6ff),
    ("lightcoral", 0xf08080ff),
    ("lightcyan", 0xe0ffffff),
    ("lightgoldenrodyellow", 0xfafad2ff),
    ("lightgray", 0xd3d3d3ff),
    ("lightgreen", 0x90ee90ff),
    ("lightgrey", 0xd3d3d3ff),
    ("lightpink", 0xffb6c1ff),
    ("lightsalmon", 0xffa07aff),
    ("lightseagreen", 0x20b2aaff),
    ("lightskyblue", 0x87cefaff),
    ("lightslategray", 0x778899ff),
    ("lightslategrey", 0x778899ff),
    ("lightsteelblue", 0xb0c4deff),
    ("lightyellow", 0xffffe0ff),
    ("lime", 0x00ff00ff),
    ("limegreen", 0x32cd32ff),
    ("linen", 0xfaf0e6ff),
    ("magenta", 0xff00ffff),
    ("maroon", 0x800000ff),
    ("mediumaquamarine", 0x66cdaaff),
    ("mediumblue", 0x0000cdff),
    ("mediumorchid", 0xba55d3ff),
    ("mediumpurple", 0x9370dbff),
    ("mediumseagreen", 0x3cb371ff),
    ("mediumslateblue", 0x7b68eeff),
    ("mediumspringgreen", 0x00fa9aff),
    ("mediumturquoise", 0x48d1ccff),
    ("mediumvioletred", 0xc71585ff),
    ("midnightblue", 0x191970ff),
    ("mintcream", 0xf5fffaff),
    ("mistyrose", 0xffe4e1ff),
    ("moccasin", 0xffe4b5ff),
    ("navajowhite", 0xffdeadff),
    ("navy", 0x000080ff),
    ("oldlace", 0xfdf5e6ff),
    ("olive", 0x808000ff),
    ("olivedrab", 0x6b8e23ff),
    ("orange", 0xffa500ff),
    ("orangered", 0xff4500ff),
    ("orchid", 0xda70d6ff),
    ("palegoldenrod", 0xeee8aaff),
    ("palegreen", 0x98fb98ff),
    ("paleturquoise", 0xafeeeeff),
    ("palevioletred", 0xdb7093ff),
    ("papayawhip", 0xffefd5ff),
    ("peachpuff", 0xffdab9ff),
    ("peru", 0xcd853fff),
    ("pink", 0xffc0cbff),
    ("plum", 0xdda0ddff),
    ("powderblue", 0xb0e0e6ff),
    ("purple", 0x800080ff),
    ("rebeccapurple", 0x663399ff),
    ("red", 0xff0000ff),
    ("rosybrown", 0xbc8f8fff),
    ("royalblue", 0x4169e1ff),
    ("saddlebrown", 0x8b4513ff),
    ("salmon", 0xfa8072ff),
    ("sandybrown", 0xf4a460ff),
    ("seagreen", 0x2e8b57ff),
    ("seashell", 0xfff5eeff),
    ("sienna", 0xa0522dff),
    ("silver", 0xc0c0c0ff),
    ("skyblue", 0x87ceebff),
    ("slateblue", 0x6a5acdff),
    ("slategray", 0x708090ff),
    ("slategrey", 0x708090ff),
    ("snow", 0xfffafaff),
    ("springgreen", 0x00ff7fff),
    ("steelblue", 0x4682b4ff),
    ("tan", 0xd2b48cff),
    ("teal", 0x008080ff),
    ("thistle", 0xd8bfd8ff),
    ("tomato", 0xff6347ff),
    ("turquoise", 0x40e0d0ff),
    ("violet", 0xee82eeff),
    ("wheat", 0xf5deb3ff),
    ("white", 0xffffffff),
    ("whitesmoke", 0xf5f5f5ff),
    ("yellow", 0xffff00ff),
    ("yellowgreen", 0x9acd32ff),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn css() -> Arc<ColorNames> {
        ColorNames::shared()
    }

    #[test]
    fn test_hex_forms() {
        let names = css();
        assert_eq!(normalize_color("#ff0000", &names), Some(0xff0000ff));
        assert_eq!(normalize_color("#f00", &names), Some(0xff0000ff));
        assert_eq!(normalize_color("#ff000080", &names), Some(0xff000080));
        assert_eq!(normalize_color("#f008", &names), Some(0xff000088));
        assert_eq!(normalize_color("#ggg", &names), None);
    }

    #[test]
    fn test_functional_forms() {
        let names = css();
        assert_eq!(normalize_color("rgb(255, 128, 0)", &names), Some(0xff8000ff));
        assert_eq!(normalize_color("rgba(300, -5, 0, 0.5)", &names), Some(0xff000080));
        assert_eq!(normalize_color("hsl(120, 100%, 50%)", &names), Some(0x00ff00ff));
        assert_eq!(normalize_color("hsla(0, 100%, 50%, 0)", &names), Some(0xff000000));
    }

    #[test]
    fn test_named_colors() {
        let names = css();
        assert_eq!(names.len(), 150);
        assert_eq!(normalize_color("rebeccapurple", &names), Some(0x663399ff));
        assert_eq!(color_to_rgba("red", &names), "rgba(255, 0, 0, 1)");
        assert_eq!(color_to_rgba("transparent", &names), "rgba(0, 0, 0, 0)");
        assert_eq!(color_to_rgba("nonsense", &names), "nonsense");
    }

    #[test]
    fn test_normalize_template() {
        let names = css();
        let out = normalize_colors("0px 2px 4px #000, 1px 1px red", &names);
        assert_eq!(out, "0px 2px 4px rgba(0, 0, 0, 1), 1px 1px rgba(255, 0, 0, 1)");
        // color names are only matched as whole words
        assert_eq!(normalize_colors("translateX(10px)", &names), "translateX(10px)");
    }

    #[test]
    fn test_animatable_strings() {
        let names = css();
        assert!(is_animatable_string("#fff", &names));
        assert!(is_animatable_string("10px", &names));
        assert!(is_animatable_string("tomato", &names));
        assert!(!is_animatable_string("auto", &names));
    }
}
