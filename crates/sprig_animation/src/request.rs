//! Update requests
//!
//! An [`UpdateRequest`] is what callers hand to [`Controller::update`]: target
//! values plus everything that shapes how they are reached. Requests are
//! built fluently:
//!
//! ```
//! use sprig_animation::{SpringConfig, UpdateRequest};
//!
//! let request = UpdateRequest::new()
//!     .from([("opacity", 0.0)])
//!     .to([("opacity", 1.0)])
//!     .config(SpringConfig::gentle())
//!     .delay(200.0);
//! assert!(request.has_values());
//! ```
//!
//! [`Controller::update`]: crate::Controller::update

use sprig_core::{Value, ValueMap};
use std::fmt;
use std::rc::Rc;

use crate::config::SpringConfig;
use crate::controller::Controller;
use crate::error::Result;
use crate::script::{AsyncTo, ScriptHandle};

pub type StartFn = Rc<dyn Fn(&str)>;
pub type FrameFn = Rc<dyn Fn(&ValueMap)>;
pub type RestFn = Rc<dyn Fn(&ValueMap)>;

/// Pointer identity for shared closures and slices
pub(crate) fn same_rc<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

/// Where the controller should go
#[derive(Clone)]
pub enum Target {
    Values(ValueMap),
    Async(AsyncTo),
}

/// Spring configuration, fixed or chosen per key
#[derive(Clone)]
pub enum ConfigSource {
    Fixed(SpringConfig),
    PerKey(Rc<dyn Fn(&str) -> SpringConfig>),
}

impl ConfigSource {
    pub fn resolve(&self, key: &str) -> SpringConfig {
        match self {
            ConfigSource::Fixed(config) => config.clone(),
            ConfigSource::PerKey(f) => f(key),
        }
    }
}

impl From<SpringConfig> for ConfigSource {
    fn from(config: SpringConfig) -> Self {
        ConfigSource::Fixed(config)
    }
}

/// Milliseconds to wait before the request runs
#[derive(Clone)]
pub enum Delay {
    Ms(f64),
    /// Split the request so every key waits its own time
    PerKey(Rc<dyn Fn(&str) -> f64>),
}

/// Whether keys jump straight to their goal
#[derive(Clone)]
pub enum Immediate {
    All(bool),
    PerKey(Rc<dyn Fn(&str) -> bool>),
}

impl Immediate {
    pub fn resolve(&self, key: &str) -> bool {
        match self {
            Immediate::All(all) => *all,
            Immediate::PerKey(f) => f(key),
        }
    }
}

/// What a request cancels
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cancel {
    /// Stop everything, including async scripts
    All,
    /// Freeze these keys and keep them from animating
    Keys(Vec<String>),
}

/// A batch of changes for one controller
#[derive(Clone, Default)]
pub struct UpdateRequest {
    pub to: Option<Target>,
    pub from: Option<ValueMap>,
    pub config: Option<ConfigSource>,
    pub delay: Option<Delay>,
    pub immediate: Option<Immediate>,
    pub reset: bool,
    /// Swap `to` and `from`
    pub reverse: bool,
    pub cancel: Option<Cancel>,
    /// Trail another controller: its live values become the goals
    pub attach: Option<Controller>,
    pub on_start: Option<StartFn>,
    pub on_frame: Option<FrameFn>,
    pub on_rest: Option<RestFn>,
    /// Ordering stamp in scheduler milliseconds; defaults to the time of
    /// [`Controller::update`](crate::Controller::update)
    pub timestamp: Option<f64>,
}

impl UpdateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.to = Some(Target::Values(sprig_core::value_map(values)));
        self
    }

    pub fn from<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.from = Some(sprig_core::value_map(values));
        self
    }

    /// Run these requests one after another, each once the previous rests
    pub fn chain(mut self, steps: Vec<UpdateRequest>) -> Self {
        self.to = Some(Target::Async(AsyncTo::Chain(steps.into())));
        self
    }

    /// Drive the controller from a script
    pub fn script(mut self, script: impl Fn(&ScriptHandle) -> Result<()> + 'static) -> Self {
        self.to = Some(Target::Async(AsyncTo::Script(Rc::new(script))));
        self
    }

    pub fn config(mut self, config: SpringConfig) -> Self {
        self.config = Some(ConfigSource::Fixed(config));
        self
    }

    pub fn config_fn(mut self, f: impl Fn(&str) -> SpringConfig + 'static) -> Self {
        self.config = Some(ConfigSource::PerKey(Rc::new(f)));
        self
    }

    pub fn delay(mut self, ms: f64) -> Self {
        self.delay = Some(Delay::Ms(ms));
        self
    }

    pub fn delay_fn(mut self, f: impl Fn(&str) -> f64 + 'static) -> Self {
        self.delay = Some(Delay::PerKey(Rc::new(f)));
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = Some(Immediate::All(immediate));
        self
    }

    pub fn immediate_fn(mut self, f: impl Fn(&str) -> bool + 'static) -> Self {
        self.immediate = Some(Immediate::PerKey(Rc::new(f)));
        self
    }

    /// Restart from `from` even if the goal is unchanged
    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn cancel(mut self) -> Self {
        self.cancel = Some(Cancel::All);
        self
    }

    pub fn cancel_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.cancel = Some(Cancel::Keys(keys.into_iter().map(Into::into).collect()));
        self
    }

    pub fn attach(mut self, target: &Controller) -> Self {
        self.attach = Some(target.clone());
        self
    }

    pub fn on_start(mut self, f: impl Fn(&str) + 'static) -> Self {
        self.on_start = Some(Rc::new(f));
        self
    }

    pub fn on_frame(mut self, f: impl Fn(&ValueMap) + 'static) -> Self {
        self.on_frame = Some(Rc::new(f));
        self
    }

    pub fn on_rest(mut self, f: impl Fn(&ValueMap) + 'static) -> Self {
        self.on_rest = Some(Rc::new(f));
        self
    }

    pub fn timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// The plain target values, if this is not an async request
    pub fn values(&self) -> Option<&ValueMap> {
        match &self.to {
            Some(Target::Values(values)) => Some(values),
            _ => None,
        }
    }

    pub fn has_values(&self) -> bool {
        self.values().is_some_and(|v| !v.is_empty())
    }

    pub fn is_async(&self) -> bool {
        matches!(self.to, Some(Target::Async(_)))
    }

    /// Fold a later request into this one. Target maps are merged key by key,
    /// every other field set on `later` wins.
    pub(crate) fn merge(&mut self, later: UpdateRequest) {
        self.to = match (self.to.take(), later.to) {
            (Some(Target::Values(mut dest)), Some(Target::Values(src))) => {
                dest.extend(src);
                Some(Target::Values(dest))
            }
            (dest, src) => src.or(dest),
        };
        self.from = match (self.from.take(), later.from) {
            (Some(mut dest), Some(src)) => {
                dest.extend(src);
                Some(dest)
            }
            (dest, src) => src.or(dest),
        };
        self.reset |= later.reset;
        self.reverse |= later.reverse;

        macro_rules! take_later {
            ($($field:ident),*) => {
                $(if later.$field.is_some() {
                    self.$field = later.$field;
                })*
            };
        }
        take_later!(config, delay, immediate, cancel, attach, on_start, on_frame, on_rest, timestamp);
    }
}

impl fmt::Debug for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let to = match &self.to {
            Some(Target::Values(values)) => format!("{:?}", values),
            Some(Target::Async(AsyncTo::Chain(steps))) => format!("chain of {}", steps.len()),
            Some(Target::Async(AsyncTo::Script(_))) => "script".to_string(),
            None => "none".to_string(),
        };
        f.debug_struct("UpdateRequest")
            .field("to", &to)
            .field("from", &self.from)
            .field("reset", &self.reset)
            .field("reverse", &self.reverse)
            .field("cancel", &self.cancel)
            .field("attach", &self.attach.as_ref().map(Controller::id))
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}
