//! Animation configuration
//!
//! A [`SpringConfig`] describes how one key travels to its goal. By default
//! that is a damped spring; `duration` turns it into a timed tween and
//! `decay` into momentum that bleeds off on its own.
//!
//! Presets can be kept in configuration files:
//!
//! ```
//! use sprig_animation::SpringConfig;
//!
//! let config: SpringConfig = serde_json::from_str(r#"{ "tension": 280, "friction": 60 }"#).unwrap();
//! assert_eq!(config.mass, 1.0);
//! assert_eq!(config, SpringConfig::slow());
//! ```

use serde::{Deserialize, Serialize};
use sprig_core::Easing;

/// Initial velocity, either shared by every element or given per element
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Velocity {
    Scalar(f64),
    PerElement(Vec<f64>),
}

impl Velocity {
    /// Velocity of the element at `index`
    pub fn at(&self, index: usize) -> f64 {
        match self {
            Velocity::Scalar(v) => *v,
            Velocity::PerElement(vs) => vs.get(index).copied().unwrap_or(0.0),
        }
    }
}

impl Default for Velocity {
    fn default() -> Self {
        Velocity::Scalar(0.0)
    }
}

impl From<f64> for Velocity {
    fn from(v: f64) -> Self {
        Velocity::Scalar(v)
    }
}

impl From<Vec<f64>> for Velocity {
    fn from(vs: Vec<f64>) -> Self {
        Velocity::PerElement(vs)
    }
}

/// Configuration for one animated key
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SpringConfig {
    pub tension: f64,
    pub friction: f64,
    pub mass: f64,
    pub velocity: Velocity,
    /// Distance and speed below which a spring counts as settled
    pub precision: f64,
    /// Stop as soon as the goal is crossed
    pub clamp: bool,
    /// Milliseconds; switches to a timed tween
    pub duration: Option<f64>,
    /// Momentum decay instead of a spring
    pub decay: bool,
    #[serde(skip)]
    pub easing: Easing,
}

impl SpringConfig {
    /// Create a new spring configuration
    pub fn new(tension: f64, friction: f64) -> Self {
        Self {
            tension,
            friction,
            mass: 1.0,
            velocity: Velocity::default(),
            precision: 0.01,
            clamp: false,
            duration: None,
            decay: false,
            easing: Easing::Linear,
        }
    }

    /// A gentle, slow spring
    pub fn gentle() -> Self {
        Self::new(120.0, 14.0)
    }

    /// A wobbly spring with overshoot
    pub fn wobbly() -> Self {
        Self::new(180.0, 12.0)
    }

    /// A stiff, snappy spring
    pub fn stiff() -> Self {
        Self::new(210.0, 20.0)
    }

    pub fn slow() -> Self {
        Self::new(280.0, 60.0)
    }

    /// Heavily damped, no overshoot
    pub fn molasses() -> Self {
        Self::new(280.0, 120.0)
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "gentle" => Some(Self::gentle()),
            "wobbly" => Some(Self::wobbly()),
            "stiff" => Some(Self::stiff()),
            "slow" => Some(Self::slow()),
            "molasses" => Some(Self::molasses()),
            _ => None,
        }
    }

    pub fn mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    pub fn velocity(mut self, velocity: impl Into<Velocity>) -> Self {
        self.velocity = velocity.into();
        self
    }

    pub fn precision(mut self, precision: f64) -> Self {
        self.precision = precision;
        self
    }

    pub fn clamp(mut self, clamp: bool) -> Self {
        self.clamp = clamp;
        self
    }

    /// Animate over a fixed time instead of with physics
    pub fn duration(mut self, ms: f64) -> Self {
        self.duration = Some(ms);
        self
    }

    pub fn easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// Coast on the initial velocity
    pub fn decay(mut self) -> Self {
        self.decay = true;
        self
    }

    /// Friction at which the spring stops oscillating
    pub fn critical_friction(&self) -> f64 {
        2.0 * (self.tension * self.mass).sqrt()
    }

    /// Check if the spring will oscillate around its goal
    pub fn is_underdamped(&self) -> bool {
        self.friction < self.critical_friction()
    }
}

impl Default for SpringConfig {
    fn default() -> Self {
        Self::new(170.0, 26.0)
    }
}

impl PartialEq for SpringConfig {
    fn eq(&self, other: &Self) -> bool {
        self.tension == other.tension
            && self.friction == other.friction
            && self.mass == other.mass
            && self.velocity == other.velocity
            && self.precision == other.precision
            && self.clamp == other.clamp
            && self.duration == other.duration
            && self.decay == other.decay
    }
}
