//! Easing curves
//!
//! [`Easing::Linear`] is the identity and is the only curve guaranteed to
//! behave sensibly outside `[0, 1]`, which matters for interpolators that
//! extend past their range.

use std::fmt;
use std::rc::Rc;

/// Easing function applied to a normalized progress value
#[derive(Clone, Default)]
pub enum Easing {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
    EaseInQuad,
    EaseOutQuad,
    EaseInOutQuad,
    EaseInCubic,
    EaseOutCubic,
    EaseInOutCubic,
    /// CSS-style cubic bezier timing curve with control points (x1, y1, x2, y2)
    CubicBezier(f64, f64, f64, f64),
    /// Caller-supplied curve
    Custom(Rc<dyn Fn(f64) -> f64>),
}

impl Easing {
    pub fn custom(f: impl Fn(f64) -> f64 + 'static) -> Self {
        Easing::Custom(Rc::new(f))
    }

    /// Apply easing to a value
    pub fn apply(&self, t: f64) -> f64 {
        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t,
            Easing::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Easing::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Easing::EaseInQuad => t * t,
            Easing::EaseOutQuad => t * (2.0 - t),
            Easing::EaseInOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            Easing::EaseInCubic => t * t * t,
            Easing::EaseOutCubic => {
                let t = t - 1.0;
                t * t * t + 1.0
            }
            Easing::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    let u = 2.0 * t - 2.0;
                    0.5 * u * u * u + 1.0
                }
            }
            Easing::CubicBezier(x1, y1, x2, y2) => bezier_ease(t, *x1, *y1, *x2, *y2),
            Easing::Custom(f) => f(t),
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Easing::Linear)
    }
}

impl fmt::Debug for Easing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Easing::Linear => write!(f, "Linear"),
            Easing::EaseIn => write!(f, "EaseIn"),
            Easing::EaseOut => write!(f, "EaseOut"),
            Easing::EaseInOut => write!(f, "EaseInOut"),
            Easing::EaseInQuad => write!(f, "EaseInQuad"),
            Easing::EaseOutQuad => write!(f, "EaseOutQuad"),
            Easing::EaseInOutQuad => write!(f, "EaseInOutQuad"),
            Easing::EaseInCubic => write!(f, "EaseInCubic"),
            Easing::EaseOutCubic => write!(f, "EaseOutCubic"),
            Easing::EaseInOutCubic => write!(f, "EaseInOutCubic"),
            Easing::CubicBezier(x1, y1, x2, y2) => {
                write!(f, "CubicBezier({}, {}, {}, {})", x1, y1, x2, y2)
            }
            Easing::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[inline]
fn cubic_bezier(p1: f64, p2: f64, t: f64) -> f64 {
    let u = 1.0 - t;
    3.0 * u * u * t * p1 + 3.0 * u * t * t * p2 + t * t * t
}

/// Invert the x curve by bisection, then sample y.
fn bezier_ease(t: f64, x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if x1 == y1 && x2 == y2 {
        return t;
    }
    let mut lo = 0.0;
    let mut hi = 1.0;
    let mut mid = t;
    for _ in 0..32 {
        let x = cubic_bezier(x1, x2, mid);
        if (x - t).abs() < 1e-7 {
            break;
        }
        if x < t {
            lo = mid;
        } else {
            hi = mid;
        }
        mid = 0.5 * (lo + hi);
    }
    cubic_bezier(y1, y2, mid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let curves = [
            Easing::Linear,
            Easing::EaseIn,
            Easing::EaseOut,
            Easing::EaseInOut,
            Easing::EaseInOutQuad,
            Easing::EaseOutCubic,
            Easing::EaseInOutCubic,
            Easing::CubicBezier(0.25, 0.1, 0.25, 1.0),
        ];
        for easing in curves {
            assert!(easing.apply(0.0).abs() < 1e-6, "{:?}", easing);
            assert!((easing.apply(1.0) - 1.0).abs() < 1e-6, "{:?}", easing);
        }
    }

    #[test]
    fn test_linear_extends() {
        assert_eq!(Easing::Linear.apply(1.5), 1.5);
        assert_eq!(Easing::Linear.apply(-0.5), -0.5);
    }

    #[test]
    fn test_custom() {
        let step = Easing::custom(|t| if t < 0.5 { 0.0 } else { 1.0 });
        assert_eq!(step.apply(0.4), 0.0);
        assert_eq!(step.apply(0.6), 1.0);
    }
}
