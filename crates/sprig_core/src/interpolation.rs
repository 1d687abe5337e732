//! Range interpolation
//!
//! An [`Interpolator`] maps an input number onto an output range. Outputs may
//! be numbers or string templates; templates are split into numeric tokens
//! (colors are first rewritten to `rgba()`), each token gets its own numeric
//! interpolator, and the template is reassembled on every call.
//!
//! ```
//! use sprig_core::interpolation::{Extrapolate, InterpolationConfig, Interpolator};
//! use sprig_core::color::ColorNames;
//!
//! let config = InterpolationConfig::new(vec![0.0, 100.0])
//!     .range(vec![0.0, 1.0])
//!     .extrapolate(Extrapolate::Clamp);
//! let interp = Interpolator::build(config, &ColorNames::shared()).unwrap();
//! assert_eq!(interp.at(0.5).as_number(), Some(50.0));
//! assert_eq!(interp.at(2.0).as_number(), Some(100.0));
//! ```

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use crate::color::{normalize_colors, ColorNames};
use crate::easing::Easing;
use crate::error::{InterpolationError, Result};
use crate::value::{format_number, Value};

/// Behavior outside the input range
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extrapolate {
    /// Continue the edge segment linearly
    #[default]
    Extend,
    /// Pin to the nearest bound
    Clamp,
    /// Return the (mapped) input unchanged
    Identity,
}

/// Output breakpoints
#[derive(Clone, Debug, PartialEq)]
pub enum Output {
    Numbers(Vec<f64>),
    Strings(Vec<String>),
}

impl Output {
    pub fn len(&self) -> usize {
        match self {
            Output::Numbers(n) => n.len(),
            Output::Strings(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<f64>> for Output {
    fn from(values: Vec<f64>) -> Self {
        Output::Numbers(values)
    }
}

impl From<Vec<String>> for Output {
    fn from(values: Vec<String>) -> Self {
        Output::Strings(values)
    }
}

impl From<Vec<&str>> for Output {
    fn from(values: Vec<&str>) -> Self {
        Output::Strings(values.into_iter().map(String::from).collect())
    }
}

/// Input transform applied before extrapolation
pub type MapFn = Rc<dyn Fn(f64) -> f64>;

/// Builder-style interpolation settings
#[derive(Clone)]
pub struct InterpolationConfig {
    pub range: Vec<f64>,
    pub output: Output,
    pub extrapolate_left: Extrapolate,
    pub extrapolate_right: Extrapolate,
    pub easing: Easing,
    pub map: Option<MapFn>,
}

impl InterpolationConfig {
    /// Interpolate over `[0, 1]` into `output`
    pub fn new(output: impl Into<Output>) -> Self {
        Self {
            range: vec![0.0, 1.0],
            output: output.into(),
            extrapolate_left: Extrapolate::Extend,
            extrapolate_right: Extrapolate::Extend,
            easing: Easing::Linear,
            map: None,
        }
    }

    pub fn range(mut self, range: Vec<f64>) -> Self {
        self.range = range;
        self
    }

    /// Set both extrapolation sides
    pub fn extrapolate(mut self, mode: Extrapolate) -> Self {
        self.extrapolate_left = mode;
        self.extrapolate_right = mode;
        self
    }

    pub fn extrapolate_left(mut self, mode: Extrapolate) -> Self {
        self.extrapolate_left = mode;
        self
    }

    pub fn extrapolate_right(mut self, mode: Extrapolate) -> Self {
        self.extrapolate_right = mode;
        self
    }

    pub fn easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    pub fn map(mut self, map: impl Fn(f64) -> f64 + 'static) -> Self {
        self.map = Some(Rc::new(map));
        self
    }
}

impl fmt::Debug for InterpolationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpolationConfig")
            .field("range", &self.range)
            .field("output", &self.output)
            .field("extrapolate_left", &self.extrapolate_left)
            .field("extrapolate_right", &self.extrapolate_right)
            .field("easing", &self.easing)
            .field("map", &self.map.is_some())
            .finish()
    }
}

/// What an interpolator is built from: settings, or an existing function
/// which is used as-is.
#[derive(Clone)]
pub enum InterpolatorSpec {
    Config(InterpolationConfig),
    Function(CalcFn),
}

impl From<InterpolationConfig> for InterpolatorSpec {
    fn from(config: InterpolationConfig) -> Self {
        InterpolatorSpec::Config(config)
    }
}

impl From<CalcFn> for InterpolatorSpec {
    fn from(f: CalcFn) -> Self {
        InterpolatorSpec::Function(f)
    }
}

/// Arbitrary function of the input values
pub type CalcFn = Rc<dyn Fn(&[Value]) -> Value>;

// ============================================================================
// Interpolators
// ============================================================================

/// A compiled interpolation function
#[derive(Clone)]
pub enum Interpolator {
    Numeric(NumericInterpolator),
    Shape(ShapeInterpolator),
    Custom(CalcFn),
}

impl Interpolator {
    /// Compile an interpolator. Functions pass through untouched.
    pub fn build(spec: impl Into<InterpolatorSpec>, names: &ColorNames) -> Result<Self> {
        match spec.into() {
            InterpolatorSpec::Function(f) => Ok(Interpolator::Custom(f)),
            InterpolatorSpec::Config(config) => match &config.output {
                Output::Numbers(_) => NumericInterpolator::new(&config).map(Interpolator::Numeric),
                Output::Strings(_) => {
                    ShapeInterpolator::new(&config, names).map(Interpolator::Shape)
                }
            },
        }
    }

    pub fn custom(f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Interpolator::Custom(Rc::new(f))
    }

    /// Evaluate at a single numeric input
    pub fn at(&self, input: f64) -> Value {
        match self {
            Interpolator::Numeric(n) => Value::Number(n.at(input)),
            Interpolator::Shape(s) => Value::String(s.at(input)),
            Interpolator::Custom(f) => f(&[Value::Number(input)]),
        }
    }

    /// Evaluate against the current values of every input node.
    ///
    /// Range interpolators read the first input; a non-numeric input yields NaN.
    pub fn apply(&self, inputs: &[Value]) -> Value {
        match self {
            Interpolator::Custom(f) => f(inputs),
            _ => {
                let input = inputs.first().and_then(Value::as_number).unwrap_or(f64::NAN);
                self.at(input)
            }
        }
    }
}

impl fmt::Debug for Interpolator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interpolator::Numeric(n) => f.debug_tuple("Numeric").field(n).finish(),
            Interpolator::Shape(s) => f.debug_tuple("Shape").field(&s.template).finish(),
            Interpolator::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Piecewise numeric interpolation
#[derive(Clone)]
pub struct NumericInterpolator {
    range: Vec<f64>,
    output: Vec<f64>,
    extrapolate_left: Extrapolate,
    extrapolate_right: Extrapolate,
    easing: Easing,
    map: Option<MapFn>,
}

impl NumericInterpolator {
    fn new(config: &InterpolationConfig) -> Result<Self> {
        let output = match &config.output {
            Output::Numbers(n) => n.clone(),
            Output::Strings(s) => {
                return Err(InterpolationError::NotANumber(s.join(", ")));
            }
        };
        Self::with_output(config, output)
    }

    fn with_output(config: &InterpolationConfig, output: Vec<f64>) -> Result<Self> {
        if config.range.len() < 2 {
            return Err(InterpolationError::InvalidRange(format!(
                "need at least two breakpoints, got {}",
                config.range.len()
            )));
        }
        if config.range.len() != output.len() {
            return Err(InterpolationError::InvalidRange(format!(
                "range has {} breakpoints but output has {}",
                config.range.len(),
                output.len()
            )));
        }
        Ok(Self {
            range: config.range.clone(),
            output,
            extrapolate_left: config.extrapolate_left,
            extrapolate_right: config.extrapolate_right,
            easing: config.easing.clone(),
            map: config.map.clone(),
        })
    }

    pub fn at(&self, input: f64) -> f64 {
        let i = find_range(input, &self.range);
        interpolate(
            input,
            self.range[i],
            self.range[i + 1],
            self.output[i],
            self.output[i + 1],
            &self.easing,
            self.extrapolate_left,
            self.extrapolate_right,
            self.map.as_deref(),
        )
    }
}

impl fmt::Debug for NumericInterpolator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumericInterpolator")
            .field("range", &self.range)
            .field("output", &self.output)
            .finish()
    }
}

/// First segment whose upper breakpoint reaches the input; the last segment
/// covers everything beyond.
fn find_range(input: f64, range: &[f64]) -> usize {
    let mut i = 1;
    while i < range.len() - 1 {
        if range[i] >= input {
            break;
        }
        i += 1;
    }
    i - 1
}

#[allow(clippy::too_many_arguments)]
fn interpolate(
    input: f64,
    input_min: f64,
    input_max: f64,
    output_min: f64,
    output_max: f64,
    easing: &Easing,
    left: Extrapolate,
    right: Extrapolate,
    map: Option<&dyn Fn(f64) -> f64>,
) -> f64 {
    let mut result = match map {
        Some(map) => map(input),
        None => input,
    };

    if result < input_min {
        match left {
            Extrapolate::Identity => return result,
            Extrapolate::Clamp => result = input_min,
            Extrapolate::Extend => {}
        }
    }
    if result > input_max {
        match right {
            Extrapolate::Identity => return result,
            Extrapolate::Clamp => result = input_max,
            Extrapolate::Extend => {}
        }
    }

    if output_min == output_max {
        return output_min;
    }
    if input_min == input_max {
        return if input <= input_min { output_min } else { output_max };
    }

    // Infinite bounds shift instead of dividing
    if input_min == f64::NEG_INFINITY {
        result = -result;
    } else if input_max == f64::INFINITY {
        result -= input_min;
    } else {
        result = (result - input_min) / (input_max - input_min);
    }

    result = easing.apply(result);

    if output_min == f64::NEG_INFINITY {
        -result
    } else if output_max == f64::INFINITY {
        result + output_min
    } else {
        result * (output_max - output_min) + output_min
    }
}

// ============================================================================
// String shapes
// ============================================================================

fn number_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"[+\-]?(?:0|[1-9]\d*)(?:\.\d*)?(?:[eE][+\-]?\d+)?").expect("static token pattern")
    })
}

fn rgba_channels() -> &'static Regex {
    static RGBA: OnceLock<Regex> = OnceLock::new();
    RGBA.get_or_init(|| {
        Regex::new(r"(?i)rgba\(([0-9.\-]+), ([0-9.\-]+), ([0-9.\-]+), ([0-9.\-]+)\)")
            .expect("static rgba pattern")
    })
}

/// Interpolates every number inside a string template, e.g.
/// `"0px 2px rgba(0, 0, 0, 0.5)"`.
#[derive(Clone)]
pub struct ShapeInterpolator {
    template: String,
    tokens: Vec<NumericInterpolator>,
}

impl ShapeInterpolator {
    fn new(config: &InterpolationConfig, names: &ColorNames) -> Result<Self> {
        let outputs = match &config.output {
            Output::Strings(s) => s,
            Output::Numbers(_) => {
                return Err(InterpolationError::InvalidRange(
                    "numeric output given to a string interpolator".into(),
                ))
            }
        };
        if outputs.is_empty() {
            return Err(InterpolationError::InvalidRange("empty output".into()));
        }

        let mut normalized: Vec<String> = outputs.iter().map(|o| normalize_colors(o, names)).collect();
        let re = number_token();
        let parsed: Vec<Vec<f64>> = normalized
            .iter()
            .map(|s| {
                re.find_iter(s)
                    .map(|m| m.as_str().parse::<f64>().unwrap_or(f64::NAN))
                    .collect()
            })
            .collect();

        let expected = parsed[0].len();
        if let Some(pos) = parsed.iter().position(|tokens| tokens.len() != expected) {
            return Err(InterpolationError::ShapeMismatch {
                first: outputs[0].clone(),
                other: outputs[pos].clone(),
                expected,
                found: parsed[pos].len(),
            });
        }

        let tokens = (0..expected)
            .map(|i| {
                let column = parsed.iter().map(|tokens| tokens[i]).collect();
                NumericInterpolator::with_output(config, column)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            template: normalized.swap_remove(0),
            tokens,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn at(&self, input: f64) -> String {
        let mut i = 0;
        let filled = number_token().replace_all(&self.template, |_: &Captures| {
            let value = self.tokens.get(i).map(|t| t.at(input)).unwrap_or(f64::NAN);
            i += 1;
            format_number(value)
        });
        // r, g and b must be integers; alpha stays fractional
        rgba_channels()
            .replace_all(&filled, |c: &Captures| {
                let round = |s: &str| {
                    let n: f64 = s.parse().unwrap_or(f64::NAN);
                    format_number((n + 0.5).floor())
                };
                format!("rgba({}, {}, {}, {})", round(&c[1]), round(&c[2]), round(&c[3]), &c[4])
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(config: InterpolationConfig) -> Interpolator {
        Interpolator::build(config, &ColorNames::shared()).unwrap()
    }

    fn num(interp: &Interpolator, input: f64) -> f64 {
        interp.at(input).as_number().unwrap()
    }

    #[test]
    fn test_monotonic_and_exact_endpoints() {
        let rising = build(InterpolationConfig::new(vec![0.0, 10.0, 100.0]).range(vec![0.0, 0.5, 1.0]));
        let falling = build(InterpolationConfig::new(vec![3.0, -1.0, -7.5]).range(vec![-2.0, 0.3, 4.0]));

        assert_eq!(num(&rising, 0.0), 0.0);
        assert_eq!(num(&rising, 1.0), 100.0);
        assert_eq!(num(&falling, -2.0), 3.0);
        assert_eq!(num(&falling, 4.0), -7.5);

        let mut prev_up = f64::NEG_INFINITY;
        let mut prev_down = f64::INFINITY;
        for step in 0..=100 {
            let t = step as f64 / 100.0;
            let up = num(&rising, t);
            assert!(up >= prev_up);
            prev_up = up;

            let x = -2.0 + 6.0 * t;
            let down = num(&falling, x);
            assert!(down <= prev_down);
            prev_down = down;
        }
    }

    #[test]
    fn test_interior_breakpoint_uses_lower_segment() {
        let interp = build(InterpolationConfig::new(vec![0.0, 10.0, 10.0]).range(vec![0.0, 1.0, 2.0]));
        assert_eq!(num(&interp, 1.0), 10.0);
        assert_eq!(num(&interp, 1.5), 10.0);
    }

    #[test]
    fn test_extrapolation_modes() {
        let base = InterpolationConfig::new(vec![0.0, 100.0]).range(vec![0.0, 1.0]);
        let extend = build(base.clone());
        let clamp = build(base.clone().extrapolate_left(Extrapolate::Clamp));
        let identity = build(base.extrapolate(Extrapolate::Identity));

        assert_eq!(num(&extend, -1.0), -100.0);
        assert_eq!(num(&extend, 2.0), 200.0);
        assert_eq!(num(&clamp, -5.0), num(&clamp, 0.0));
        assert_eq!(num(&clamp, 2.0), 200.0);
        assert_eq!(num(&identity, -3.25), -3.25);
        assert_eq!(num(&identity, 7.0), 7.0);
    }

    #[test]
    fn test_degenerate_ranges() {
        let flat = build(InterpolationConfig::new(vec![4.0, 4.0]));
        assert_eq!(num(&flat, 0.3), 4.0);

        let point = build(InterpolationConfig::new(vec![0.0, 10.0]).range(vec![1.0, 1.0]));
        assert_eq!(num(&point, 0.5), 0.0);
        assert_eq!(num(&point, 1.0), 0.0);
        assert_eq!(num(&point, 2.0), 10.0);
    }

    #[test]
    fn test_infinite_bounds() {
        let interp = build(
            InterpolationConfig::new(vec![f64::NEG_INFINITY, 0.0]).range(vec![f64::NEG_INFINITY, 0.0]),
        );
        assert_eq!(num(&interp, -5.0), -5.0);

        let open = build(InterpolationConfig::new(vec![10.0, f64::INFINITY]).range(vec![0.0, f64::INFINITY]));
        assert_eq!(num(&open, 3.0), 13.0);
    }

    #[test]
    fn test_map_and_easing() {
        let interp = build(
            InterpolationConfig::new(vec![0.0, 1.0])
                .map(|x| x * 2.0)
                .easing(Easing::EaseInQuad)
                .extrapolate(Extrapolate::Clamp),
        );
        assert_eq!(num(&interp, 0.25), 0.25);
        assert_eq!(num(&interp, 0.75), 1.0);
    }

    #[test]
    fn test_string_shapes() {
        let interp = build(InterpolationConfig::new(vec!["0px 10px", "100px -10px"]));
        assert_eq!(interp.at(0.5), Value::from("50px 0px"));
        assert_eq!(interp.at(1.0), Value::from("100px -10px"));
    }

    #[test]
    fn test_color_shapes_round_rgb_channels() {
        let interp = build(InterpolationConfig::new(vec!["#000000", "rgba(255, 255, 255, 0)"]));
        assert_eq!(interp.at(0.5), Value::from("rgba(128, 128, 128, 0.5)"));
        let named = build(InterpolationConfig::new(vec!["red", "blue"]));
        assert_eq!(named.at(0.0), Value::from("rgba(255, 0, 0, 1)"));
        assert_eq!(named.at(1.0), Value::from("rgba(0, 0, 255, 1)"));
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let result = Interpolator::build(
            InterpolationConfig::new(vec!["1px 2px", "3px"]),
            &ColorNames::shared(),
        );
        assert!(matches!(
            result,
            Err(InterpolationError::ShapeMismatch { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn test_range_length_mismatch() {
        let result = Interpolator::build(
            InterpolationConfig::new(vec![0.0, 1.0, 2.0]),
            &ColorNames::shared(),
        );
        assert!(matches!(result, Err(InterpolationError::InvalidRange(_))));
    }

    #[test]
    fn test_function_passes_through() {
        let f: CalcFn = Rc::new(|inputs: &[Value]| {
            let sum: f64 = inputs.iter().filter_map(Value::as_number).sum();
            Value::from(sum)
        });
        let interp = Interpolator::build(f, &ColorNames::shared()).unwrap();
        assert_eq!(interp.apply(&[Value::from(1.0), Value::from(2.5)]), Value::from(3.5));
    }
}
