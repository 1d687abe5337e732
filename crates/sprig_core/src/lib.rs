//! sprig core
//!
//! The pieces of sprig that have no notion of time:
//!
//! - **Values**: the dynamic [`Value`] type carried by requests and goals
//! - **Interpolation**: range mapping with extrapolation, easing and string
//!   or color shapes
//! - **Animated graph**: an arena of animated nodes with lazy consumer
//!   tracking and batched delivery to props objects
//!
//! Scheduling, physics and controllers live in `sprig_animation`.

pub mod animated;
pub mod color;
pub mod easing;
pub mod error;
pub mod interpolation;
pub mod value;

pub use animated::{
    deliver_updates, Animated, AnimatedGraph, AnimatedInterpolation, AnimatedNode,
    AnimatedObject, AnimatedValue, AnimatedValueArray, ApplyFn, Field, GraphStats, NodeId,
    NodeList, SharedAnimatedGraph,
};
pub use color::{color_to_rgba, is_animatable_string, normalize_color, ColorNames};
pub use easing::Easing;
pub use error::{InterpolationError, Result};
pub use interpolation::{
    CalcFn, Extrapolate, InterpolationConfig, Interpolator, InterpolatorSpec, Output,
};
pub use value::{format_number, value_map, Value, ValueMap};
