//! Controllers
//!
//! A [`Controller`] owns the animations of one logical entity: one animated
//! node per key, the spring or tween driving it, and a queue of pending
//! [`UpdateRequest`]s.
//!
//! ```text
//!   update(request)      queue, timestamped
//!        │
//!   start()              group by delay ──► timer ──┐
//!        │                                          │
//!        └──────────────────────────────► run ◄─────┘
//!                                          │
//!                          diff ──► animate ──► join frameloop
//!                                                   │
//!                          advance per tick ◄───────┘
//!                                   │
//!                          rest ──► on_end / on_rest
//! ```
//!
//! Diffing is ordered by timestamp per value path: a request never
//! overwrites a path that a newer request already wrote, whatever order the
//! requests actually run in. That keeps delayed and async updates safe.
//!
//! Controllers are cheap handles; clones refer to the same state. User
//! callbacks are always invoked with no internal borrow held, so they may
//! call back into the controller.

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;
use sprig_core::{
    is_animatable_string, AnimatedGraph, AnimatedNode, ColorNames, InterpolationConfig,
    Interpolator, NodeId, NodeList, SharedAnimatedGraph, Value, ValueMap,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{SpringConfig, Velocity};
use crate::error::{AnimationError, Result};
use crate::integrator::Integrator;
use crate::request::{
    same_rc, Cancel, ConfigSource, Delay, FrameFn, Immediate, RestFn, StartFn, Target,
    UpdateRequest,
};
use crate::scheduler::{AnimationScheduler, SchedulerHandle};
use crate::script::{self, AsyncTo};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a controller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(u64);

impl ControllerId {
    fn next() -> Self {
        ControllerId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Called once when a run resolves, with whether it finished uncancelled
pub(crate) type RunEnd = Box<dyn FnOnce(bool)>;

// ============================================================================
// Per-key state
// ============================================================================

/// Goal of one moving element
#[derive(Clone, Debug)]
enum GoalSource {
    Literal(Value),
    /// Live output of another controller
    Node(NodeId),
}

/// Parameters of a key that is currently moving
#[derive(Clone, Debug)]
struct ActiveConfig {
    to_values: Vec<GoalSource>,
    from_values: Vec<Value>,
    immediate: bool,
    integrator: Integrator,
    velocity: Velocity,
}

#[derive(Clone, Debug)]
struct KeyState {
    idle: bool,
    goal: Value,
    animated: NodeId,
    /// Value nodes actually written by the integrator
    values: NodeList,
    config: Option<ActiveConfig>,
}

/// Last accepted request fields
#[derive(Default)]
struct Props {
    to: Option<ValueMap>,
    from: Option<ValueMap>,
    attach: Option<WeakController>,
    on_start: Option<StartFn>,
    on_frame: Option<FrameFn>,
    on_rest: Option<RestFn>,
    async_to: Option<AsyncTo>,
}

pub(crate) struct QueuedUpdate {
    pub(crate) delay: u64,
    pub(crate) request: UpdateRequest,
}

pub(crate) struct ControllerState {
    id: ControllerId,
    idle: bool,
    destroyed: bool,
    props: Props,
    queue: Vec<QueuedUpdate>,
    timestamps: FxHashMap<String, f64>,
    /// Per-key values recorded each frame for `on_frame`
    values: ValueMap,
    merged: ValueMap,
    keys: IndexMap<String, KeyState>,
    on_end_queue: Vec<RunEnd>,
    run_count: usize,
    /// Bumped by a full stop; invalidates running scripts
    generation: u64,
    default_config: Option<ConfigSource>,
    default_immediate: Option<Immediate>,
    graph: SharedAnimatedGraph,
    scheduler: SchedulerHandle,
}

impl ControllerState {
    fn now(&self) -> f64 {
        self.scheduler.now().unwrap_or_default()
    }

    /// Make sure every key has a node before anything animates it
    fn ensure_animated(&mut self, values: &ValueMap, graph: &mut AnimatedGraph, names: &ColorNames) {
        let now = self.now();
        for (key, value) in values {
            if self.keys.contains_key(key) {
                continue;
            }
            let Some(node) = create_animated(graph, value, names, now) else {
                tracing::warn!("value for {:?} is not animatable: {}", key, value.kind());
                continue;
            };
            let values = graph.payload(node);
            for &v in &values {
                if let Some(value) = graph.value_mut(v) {
                    value.done = true;
                }
            }
            let goal = graph.get_value(node);
            if let Some(to) = &mut self.props.to {
                to.insert(key.clone(), goal.clone());
            }
            self.keys.insert(
                key.clone(),
                KeyState {
                    idle: true,
                    goal,
                    animated: node,
                    values,
                    config: None,
                },
            );
        }
    }

    /// Freeze one key where it is
    fn stop_animation(&mut self, key: &str, graph: &mut AnimatedGraph, now: f64) {
        let Some(state) = self.keys.get_mut(key) else {
            return;
        };
        if state.idle {
            return;
        }
        for &v in &state.values {
            if let Some(value) = graph.value_mut(v) {
                value.done = true;
            }
        }
        // pending updates to this key are stale now
        self.timestamps.insert(format!("to.{}", key), now);

        let goal = graph.get_value(state.animated);
        if let Some(to) = &mut self.props.to {
            to.insert(key.to_string(), goal.clone());
        }
        state.idle = true;
        state.goal = goal;
        state.config = None;
    }

    fn has_incomplete(&self, graph: &AnimatedGraph) -> bool {
        self.keys
            .values()
            .any(|k| k.config.is_some() && k.values.iter().any(|&v| !graph.is_done(v)))
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Handle to one animated entity
#[derive(Clone)]
pub struct Controller {
    inner: Rc<RefCell<ControllerState>>,
}

/// Non-owning controller reference
#[derive(Clone)]
pub struct WeakController {
    id: ControllerId,
    inner: Weak<RefCell<ControllerState>>,
}

impl WeakController {
    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Controller> {
        self.inner.upgrade().map(|inner| Controller { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakController({})", self.id)
    }
}

impl Controller {
    pub fn new(scheduler: &AnimationScheduler) -> Self {
        Self::create(scheduler.handle(), scheduler.graph())
    }

    /// Create a controller from a scheduler handle
    pub fn from_handle(handle: &SchedulerHandle) -> Result<Self> {
        let graph = handle.graph().ok_or(AnimationError::SchedulerGone)?;
        Ok(Self::create(handle.clone(), graph))
    }

    fn create(scheduler: SchedulerHandle, graph: SharedAnimatedGraph) -> Self {
        let id = ControllerId::next();
        tracing::debug!("controller {} created", id);
        Self {
            inner: Rc::new(RefCell::new(ControllerState {
                id,
                idle: true,
                destroyed: false,
                props: Props::default(),
                queue: Vec::new(),
                timestamps: FxHashMap::default(),
                values: ValueMap::new(),
                merged: ValueMap::new(),
                keys: IndexMap::new(),
                on_end_queue: Vec::new(),
                run_count: 0,
                generation: 0,
                default_config: None,
                default_immediate: None,
                graph,
                scheduler,
            })),
        }
    }

    pub fn id(&self) -> ControllerId {
        self.inner.borrow().id
    }

    pub fn downgrade(&self) -> WeakController {
        WeakController {
            id: self.id(),
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn graph(&self) -> SharedAnimatedGraph {
        self.inner.borrow().graph.clone()
    }

    pub fn scheduler(&self) -> SchedulerHandle {
        self.inner.borrow().scheduler.clone()
    }

    /// Whether the controller is out of the frameloop
    pub fn is_idle(&self) -> bool {
        self.inner.borrow().idle
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.borrow().destroyed
    }

    /// Node bound to `key`, for building props objects
    pub fn animated(&self, key: &str) -> Option<NodeId> {
        self.inner.borrow().keys.get(key).map(|k| k.animated)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.borrow().keys.keys().cloned().collect()
    }

    /// Current value of every key
    pub fn get_values(&self) -> ValueMap {
        let state = self.inner.borrow();
        let graph = state.graph.borrow();
        state
            .keys
            .iter()
            .map(|(key, k)| (key.clone(), graph.get_value(k.animated)))
            .collect()
    }

    /// Number of requests waiting for [`start`](Self::start)
    pub fn queue_len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Config used for keys whose request carries none
    pub fn set_default_config(&self, config: impl Into<ConfigSource>) -> &Self {
        self.inner.borrow_mut().default_config = Some(config.into());
        self
    }

    pub fn set_default_immediate(&self, immediate: Immediate) -> &Self {
        self.inner.borrow_mut().default_immediate = Some(immediate);
        self
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Queue a request. Nothing happens until [`start`](Self::start).
    pub fn update(&self, mut request: UpdateRequest) -> &Self {
        let timestamp = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            if state.destroyed {
                tracing::warn!("update on destroyed controller {} ignored", state.id);
                return self;
            }
            let names = state.scheduler.color_names();
            let graph = state.graph.clone();
            let mut graph = graph.borrow_mut();
            // async targets need their nodes before the first step runs
            if let Some(from) = &request.from {
                state.ensure_animated(from, &mut graph, &names);
            }
            if let Some(to) = request.values() {
                state.ensure_animated(to, &mut graph, &names);
            }
            request.timestamp.unwrap_or_else(|| state.now())
        };
        request.timestamp = Some(timestamp);

        let queued = match request.delay.take() {
            Some(Delay::PerKey(delay)) if request.values().is_some() => split_by_key(&request, &*delay),
            delay => {
                let ms = match delay {
                    Some(Delay::Ms(ms)) => ms,
                    _ => 0.0,
                };
                vec![QueuedUpdate {
                    delay: round_delay(ms),
                    request,
                }]
            }
        };
        self.inner.borrow_mut().queue.extend(queued);
        self
    }

    /// Flush the queue, or rejoin the frameloop if nothing is queued
    pub fn start(&self) -> &Self {
        self.start_inner(None);
        self
    }

    /// Like [`start`](Self::start); `on_end` runs once every run of this
    /// batch has resolved
    pub fn start_with(&self, on_end: impl FnOnce(bool) + 'static) -> &Self {
        self.start_inner(Some(Box::new(on_end)));
        self
    }

    fn start_inner(&self, on_end: Option<RunEnd>) {
        if self.inner.borrow().queue.is_empty() {
            self.start_loop(on_end);
        } else {
            self.flush(on_end);
        }
    }

    fn flush(&self, on_end: Option<RunEnd>) {
        let (groups, scheduler) = {
            let mut state = self.inner.borrow_mut();
            let queue = std::mem::take(&mut state.queue);
            let groups = reduce_delays(queue);
            state.run_count += groups.len();
            (groups, state.scheduler.clone())
        };

        let batch = Rc::new(RunBatch {
            controller: self.downgrade(),
            runs_left: Cell::new(groups.len()),
            on_end: RefCell::new(on_end),
        });

        for (delay, request) in groups {
            let end = batch.end();
            if delay == 0 {
                self.run(request, end);
                continue;
            }
            if !scheduler.is_alive() {
                tracing::warn!("no scheduler to delay update of controller {}; running now", self.id());
                self.run(request, end);
                continue;
            }
            let controller = self.downgrade();
            scheduler.set_timeout(delay as f64, move || match controller.upgrade() {
                Some(controller) => controller.run(request, end),
                None => end(false),
            });
        }
    }

    fn run(&self, request: UpdateRequest, on_end: RunEnd) {
        if self.is_destroyed() {
            on_end(false);
            return;
        }
        if request.is_async() {
            script::run_async(self, request, on_end);
            return;
        }
        if self.diff(&request) {
            self.animate(&request);
        }
        self.start_loop(Some(on_end));
    }

    /// Register `on_end` and join the frameloop if there is work to do
    fn start_loop(&self, on_end: Option<RunEnd>) {
        let (resolve_now, join, scheduler) = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let resolve_now = match on_end {
                Some(on_end) if state.run_count > 0 => {
                    state.on_end_queue.push(on_end);
                    None
                }
                other => other,
            };
            let join = state.idle
                && !state.destroyed
                && (state.run_count > 0 || state.has_incomplete(&state.graph.borrow()));
            if join {
                state.idle = false;
            }
            (resolve_now, join, state.scheduler.clone())
        };
        if join {
            scheduler.register(self);
        }
        if let Some(on_end) = resolve_now {
            on_end(true);
        }
    }

    /// Leave the frameloop and resolve everything waiting on it
    fn finish_loop(&self, finished: bool) {
        let (queue, scheduler, id) = {
            let mut state = self.inner.borrow_mut();
            state.idle = true;
            (
                std::mem::take(&mut state.on_end_queue),
                state.scheduler.clone(),
                state.id,
            )
        };
        scheduler.unregister(id);
        for on_end in queue {
            on_end(finished);
        }
    }

    // ========================================================================
    // Diff and animate
    // ========================================================================

    /// Merge every fresh field of `request` into the props. Returns whether
    /// anything changed.
    pub(crate) fn diff(&self, request: &UpdateRequest) -> bool {
        let mut guard = self.inner.borrow_mut();
        let state = &mut *guard;
        let timestamp = request.timestamp.unwrap_or_else(|| state.now());

        let (to, from) = if request.reverse {
            (request.from.as_ref(), request.values())
        } else {
            (request.values(), request.from.as_ref())
        };

        let mut changed = false;
        if let Some(to) = to {
            let props_to = state.props.to.get_or_insert_with(ValueMap::new);
            changed |= diff_values("to", to, props_to, &mut state.timestamps, timestamp);
        }
        if let Some(from) = from {
            let props_from = state.props.from.get_or_insert_with(ValueMap::new);
            changed |= diff_values("from", from, props_from, &mut state.timestamps, timestamp);
        }

        // one-shot fields: always a change when accepted
        if request.reset && stamp(&mut state.timestamps, "reset", timestamp) {
            changed = true;
        }
        if request.cancel.is_some() && stamp(&mut state.timestamps, "cancel", timestamp) {
            changed = true;
        }

        if let Some(target) = &request.attach {
            if stamp(&mut state.timestamps, "attach", timestamp)
                && state.props.attach.as_ref().map(WeakController::id) != Some(target.id())
            {
                state.props.attach = Some(target.downgrade());
                changed = true;
            }
        }

        macro_rules! diff_callback {
            ($field:ident) => {
                if let Some(callback) = &request.$field {
                    if stamp(&mut state.timestamps, stringify!($field), timestamp)
                        && !state.props.$field.as_ref().is_some_and(|prev| same_rc(prev, callback))
                    {
                        state.props.$field = Some(callback.clone());
                        changed = true;
                    }
                }
            };
        }
        diff_callback!(on_start);
        diff_callback!(on_frame);
        diff_callback!(on_rest);

        changed
    }

    /// Record a new async target. Returns false if it is already running or
    /// a newer one was recorded.
    pub(crate) fn diff_async_target(&self, target: &AsyncTo, timestamp: f64) -> bool {
        let mut guard = self.inner.borrow_mut();
        let state = &mut *guard;
        if !stamp(&mut state.timestamps, "async_to", timestamp) {
            return false;
        }
        if state.props.async_to.as_ref().is_some_and(|prev| prev.same(target)) {
            return false;
        }
        state.props.async_to = Some(target.clone());
        true
    }

    pub(crate) fn async_target(&self) -> Option<AsyncTo> {
        self.inner.borrow().props.async_to.clone()
    }

    pub(crate) fn clear_async_target(&self) {
        self.inner.borrow_mut().props.async_to = None;
    }

    pub(crate) fn generation(&self) -> u64 {
        self.inner.borrow().generation
    }

    /// Rebuild the animation of every key whose goal changed
    pub(crate) fn animate(&self, request: &UpdateRequest) {
        let cancel = {
            let state = self.inner.borrow();
            let modified = request
                .timestamp
                .is_some_and(|ts| state.timestamps.get("cancel") == Some(&ts));
            request.cancel.clone().filter(|_| modified)
        };
        let prevented = match cancel {
            Some(Cancel::All) => {
                self.stop();
                return;
            }
            Some(Cancel::Keys(keys)) => {
                self.stop_keys(&keys);
                keys
            }
            None => Vec::new(),
        };

        // resolve user-supplied parts before borrowing anything
        let (keys, trail) = {
            let state = self.inner.borrow();
            let keys: IndexSet<String> = state
                .props
                .from
                .iter()
                .chain(state.props.to.iter())
                .flat_map(|m| m.keys().cloned())
                .collect();
            (keys, state.props.attach.as_ref().and_then(WeakController::upgrade))
        };
        let (config_source, immediate_source) = {
            let state = self.inner.borrow();
            (
                request.config.clone().or_else(|| state.default_config.clone()),
                request.immediate.clone().or_else(|| state.default_immediate.clone()),
            )
        };
        let configs: FxHashMap<&str, SpringConfig> = keys
            .iter()
            .map(|k| {
                let config = config_source.as_ref().map(|c| c.resolve(k)).unwrap_or_default();
                (k.as_str(), config)
            })
            .collect();
        let immediates: FxHashMap<&str, bool> = keys
            .iter()
            .map(|k| (k.as_str(), immediate_source.as_ref().is_some_and(|i| i.resolve(k))))
            .collect();
        let trail_nodes = match trail {
            Some(target) if target.id() != self.id() => {
                if Rc::ptr_eq(&target.graph(), &self.graph()) {
                    target.payloads()
                } else {
                    tracing::warn!("cannot trail controller {} on another scheduler", target.id());
                    FxHashMap::default()
                }
            }
            _ => FxHashMap::default(),
        };

        let mut started = Vec::new();
        let on_start = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let graph = state.graph.clone();
            let mut graph = graph.borrow_mut();
            let names = state.scheduler.color_names();
            let now = state.now();
            let reset = request.reset;

            let from = state.props.from.clone().unwrap_or_default();
            let mut merged = from.clone();
            merged.extend(state.props.to.clone().unwrap_or_default());
            state.merged = merged.clone();

            let mut changed = false;
            for (key, value) in &merged {
                if prevented.contains(key) {
                    continue;
                }
                if value.is_map() || value.is_null() {
                    tracing::warn!("value for {:?} is not animatable: {}", key, value.kind());
                    continue;
                }
                let Some(current_state) = state.keys.get(key) else {
                    tracing::warn!(
                        "failed to animate key {:?}; an async animation needs a from value for it",
                        key
                    );
                    continue;
                };
                let animated = current_state.animated;
                let idle = current_state.idle;
                let payload = current_state.values.clone();
                let prev_goal = current_state.goal.clone();

                let goal = compute_goal(value, &names);
                let current = graph.get_value(animated);

                if !reset && Value::equivalent(&goal, &current) {
                    if !idle {
                        changed = true;
                        state.stop_animation(key, &mut graph, now);
                    }
                    continue;
                }
                if !reset && Value::equivalent(&goal, &prev_goal) {
                    continue;
                }

                let immediate = immediates.get(key.as_str()).copied().unwrap_or(false);
                let is_active = payload.iter().any(|&v| !graph.is_done(v));
                let from_value = from
                    .get(key)
                    .map(|v| compute_goal(v, &names))
                    .unwrap_or_else(|| goal.clone());
                let interpolated = value.as_str().is_some_and(|s| is_animatable_string(s, &names));

                let next = if interpolated {
                    let output = vec![
                        template(if reset { &from_value } else { &current }),
                        template(&goal),
                    ];
                    let calc = match Interpolator::build(InterpolationConfig::new(output.clone()), &names) {
                        Ok(calc) => calc,
                        Err(err) => {
                            tracing::error!(
                                "failed to interpolate {:?} from {:?} to {:?}: {}",
                                key,
                                output[0],
                                output[1],
                                err
                            );
                            continue;
                        }
                    };
                    let input = match payload.first() {
                        Some(&driver) if graph.value(driver).is_some() => {
                            graph.set_value(driver, Value::from(0.0), false);
                            graph.reset_value(driver, is_active, now);
                            driver
                        }
                        _ => {
                            let driver = graph.create_value(Value::from(0.0));
                            graph.reset_value(driver, false, now);
                            driver
                        }
                    };
                    let node = graph.create_interpolation(smallvec::smallvec![input], calc);
                    graph.move_children(animated, node);
                    if immediate {
                        graph.set_value(input, Value::from(1.0), false);
                    }
                    node
                } else {
                    let reusable = match (&goal, graph.node(animated)) {
                        (Value::Array(items), Some(AnimatedNode::ValueArray(array))) => {
                            array.children.len() == items.len()
                        }
                        (Value::Array(_), _) => false,
                        (_, Some(AnimatedNode::Value(_))) => true,
                        _ => false,
                    };
                    let node = if reusable {
                        if reset {
                            graph.set_value(animated, from_value.clone(), false);
                        }
                        graph.reset_value(animated, is_active, now);
                        animated
                    } else {
                        let node = match (&goal, &from_value) {
                            (Value::Array(items), Value::Array(start)) if start.len() == items.len() => {
                                graph.create_value_array(start)
                            }
                            (Value::Array(items), _) => graph.create_value_array(items),
                            _ => graph.create_value(from_value.clone()),
                        };
                        graph.reset_value(node, false, now);
                        graph.move_children(animated, node);
                        node
                    };
                    if immediate {
                        graph.set_value(node, goal.clone(), false);
                    }
                    node
                };

                let values = graph.payload(next);
                if next != animated {
                    graph.release(animated, &values);
                }

                let to_values = match trail_nodes.get(key) {
                    Some(nodes) => nodes.iter().map(|&n| GoalSource::Node(n)).collect(),
                    None if interpolated => vec![GoalSource::Literal(Value::from(1.0))],
                    None => match &goal {
                        Value::Array(items) => items.iter().cloned().map(GoalSource::Literal).collect(),
                        other => vec![GoalSource::Literal(other.clone())],
                    },
                };
                let from_values = values.iter().map(|&v| graph.get_value(v)).collect();
                let config = configs.get(key.as_str()).cloned().unwrap_or_default();

                if !immediate {
                    started.push(key.clone());
                }
                changed = true;
                state.keys.insert(
                    key.clone(),
                    KeyState {
                        idle: false,
                        goal,
                        animated: next,
                        values,
                        config: Some(ActiveConfig {
                            to_values,
                            from_values,
                            immediate,
                            integrator: Integrator::from_config(&config),
                            velocity: config.velocity.clone(),
                        }),
                    },
                );
            }

            if !changed {
                return;
            }
            state.values = state
                .keys
                .iter()
                .map(|(key, k)| (key.clone(), graph.get_value(k.animated)))
                .collect();
            state.props.on_start.clone()
        };

        if let Some(on_start) = on_start {
            for key in &started {
                on_start(key);
            }
        }
    }

    /// Value nodes per key, for controllers trailing this one
    fn payloads(&self) -> FxHashMap<String, NodeList> {
        let state = self.inner.borrow();
        let graph = state.graph.borrow();
        state
            .keys
            .iter()
            .map(|(key, k)| (key.clone(), graph.payload(k.animated)))
            .collect()
    }

    // ========================================================================
    // Frameloop
    // ========================================================================

    /// Move every unfinished value to `time`. Returns whether anything is
    /// still moving and how many values were stepped.
    pub(crate) fn advance(&self, time: f64) -> (bool, usize) {
        let mut guard = self.inner.borrow_mut();
        let state = &mut *guard;
        let graph = state.graph.clone();
        let mut graph = graph.borrow_mut();
        let record = state.props.on_frame.is_some();

        let mut is_active = false;
        let mut count = 0;
        for (key, key_state) in &state.keys {
            let Some(config) = &key_state.config else {
                continue;
            };
            for (i, &node) in key_state.values.iter().enumerate() {
                if graph.is_done(node) {
                    continue;
                }
                count += 1;

                let (to, upstream) = match config.to_values.get(i) {
                    Some(GoalSource::Literal(v)) => (v.clone(), None),
                    Some(GoalSource::Node(id)) => (graph.get_value(*id), Some(*id)),
                    None => (graph.get_value(node), None),
                };
                let from = config.from_values.get(i).and_then(Value::as_number);

                let numbers = match (from, to.as_number()) {
                    (Some(from), Some(to)) if !config.immediate => Some((from, to)),
                    _ => None,
                };
                let Some((from, to)) = numbers else {
                    // immediate, or strings and other values that cannot move
                    graph.set_value(node, to, true);
                    if let Some(value) = graph.value_mut(node) {
                        value.done = true;
                    }
                    continue;
                };

                let Some(value) = graph.value(node) else {
                    continue;
                };
                let step = config.integrator.step(value, from, to, config.velocity.at(i), time);

                // trailing values rest only after what they trail
                let finished = step.finished && !upstream.is_some_and(|id| !graph.is_done(id));
                let position = if finished {
                    step.rest.unwrap_or(to)
                } else {
                    is_active = true;
                    step.position
                };

                if let Some(value) = graph.value_mut(node) {
                    value.done = finished;
                    value.last_velocity = step.last_velocity;
                    value.last_time = step.last_time;
                    value.last_position = Value::from(position);
                }
                graph.set_value(node, Value::from(position), true);
            }
            if record {
                state.values.insert(key.clone(), graph.get_value(key_state.animated));
            }
        }
        (is_active, count)
    }

    /// Called by the scheduler after [`advance`](Self::advance)
    pub(crate) fn on_frame(&self, is_active: bool, count: usize) {
        if count > 0 {
            let (on_frame, values) = {
                let state = self.inner.borrow();
                (state.props.on_frame.clone(), state.values.clone())
            };
            if let Some(on_frame) = on_frame {
                on_frame(&values);
            }
        }
        if !is_active {
            self.finish_loop(true);
        }
    }

    // ========================================================================
    // Stopping
    // ========================================================================

    /// Freeze every key, cancel async scripts and leave the frameloop
    pub fn stop(&self) -> &Self {
        self.stop_all(false);
        self
    }

    /// [`stop`](Self::stop), resolving waiters with `finished`
    pub fn stop_with(&self, finished: bool) -> &Self {
        self.stop_all(finished);
        self
    }

    /// Freeze just these keys; the rest keep moving
    pub fn stop_keys<S: AsRef<str>>(&self, keys: &[S]) -> &Self {
        let mut guard = self.inner.borrow_mut();
        let state = &mut *guard;
        let graph = state.graph.clone();
        let mut graph = graph.borrow_mut();
        let now = state.now();
        for key in keys {
            state.stop_animation(key.as_ref(), &mut graph, now);
        }
        self
    }

    fn stop_all(&self, finished: bool) {
        let stopped = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            if state.idle && state.run_count == 0 {
                false
            } else {
                state.generation += 1;
                let graph = state.graph.clone();
                let mut graph = graph.borrow_mut();
                let now = state.now();
                let keys: Vec<String> = state.keys.keys().cloned().collect();
                for key in keys {
                    state.stop_animation(&key, &mut graph, now);
                }
                true
            }
        };
        if stopped {
            tracing::debug!("controller {} stopped", self.id());
            self.finish_loop(finished);
        }
    }

    /// Stop, then release every node this controller owns
    pub fn destroy(&self) {
        if self.is_destroyed() {
            return;
        }
        self.stop();

        let mut guard = self.inner.borrow_mut();
        let state = &mut *guard;
        {
            let mut graph = state.graph.borrow_mut();
            for key_state in state.keys.values() {
                graph.remove(key_state.animated);
                for &v in &key_state.values {
                    graph.remove(v);
                }
            }
        }
        state.destroyed = true;
        state.generation += 1;
        state.props = Props::default();
        state.queue.clear();
        state.timestamps.clear();
        state.values.clear();
        state.merged.clear();
        state.keys.clear();
        state.on_end_queue.clear();
        state.scheduler.unregister(state.id);
        tracing::debug!("controller {} destroyed", state.id);
    }

    // ========================================================================
    // Queue access for chaining
    // ========================================================================

    pub(crate) fn take_queue(&self) -> Vec<QueuedUpdate> {
        std::mem::take(&mut self.inner.borrow_mut().queue)
    }

    pub(crate) fn restore_queue(&self, queue: Vec<QueuedUpdate>) {
        self.inner.borrow_mut().queue.extend(queue);
    }

    /// Push every queued request back by `ms`
    pub(crate) fn delay_queue(&self, ms: f64) {
        let extra = round_delay(ms);
        for queued in &mut self.inner.borrow_mut().queue {
            queued.delay += extra;
        }
    }
}

impl PartialEq for Controller {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Controller {}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Controller")
            .field("id", &state.id)
            .field("idle", &state.idle)
            .field("keys", &state.keys.keys().collect::<Vec<_>>())
            .field("queue", &state.queue.len())
            .field("run_count", &state.run_count)
            .finish()
    }
}

// ============================================================================
// Runs
// ============================================================================

/// Runs started by one `start` call
struct RunBatch {
    controller: WeakController,
    runs_left: Cell<usize>,
    on_end: RefCell<Option<RunEnd>>,
}

impl RunBatch {
    fn end(self: &Rc<Self>) -> RunEnd {
        let batch = self.clone();
        Box::new(move |finished| batch.finish(finished))
    }

    fn finish(&self, finished: bool) {
        let controller = self.controller.upgrade();
        let run_count = controller.as_ref().map(|c| {
            let mut state = c.inner.borrow_mut();
            state.run_count = state.run_count.saturating_sub(1);
            state.run_count
        });

        let left = self.runs_left.get().saturating_sub(1);
        self.runs_left.set(left);
        if left > 0 {
            return;
        }

        // decided before on_end runs: on_end may start the next batch
        let rest = match (&controller, run_count) {
            (Some(controller), Some(0)) if finished => {
                let state = controller.inner.borrow();
                state.props.on_rest.clone().map(|f| (f, state.merged.clone()))
            }
            _ => None,
        };
        let on_end = self.on_end.borrow_mut().take();
        if let Some(on_end) = on_end {
            on_end(finished);
        }
        if let Some((on_rest, merged)) = rest {
            on_rest(&merged);
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// One request per target key, each carrying only its own `from`
fn split_by_key(request: &UpdateRequest, delay: &dyn Fn(&str) -> f64) -> Vec<QueuedUpdate> {
    let Some(to) = request.values() else {
        return Vec::new();
    };
    to.iter()
        .map(|(key, value)| {
            let mut split = request.clone();
            split.to = Some(Target::Values(ValueMap::from([(key.clone(), value.clone())])));
            split.from = request
                .from
                .as_ref()
                .and_then(|from| from.get(key))
                .map(|v| ValueMap::from([(key.clone(), v.clone())]));
            QueuedUpdate {
                delay: round_delay(delay(key)),
                request: split,
            }
        })
        .collect()
}

fn round_delay(ms: f64) -> u64 {
    if ms.is_finite() && ms > 0.0 {
        ms.round() as u64
    } else {
        0
    }
}

/// Merge queued requests that share a delay
fn reduce_delays(queue: Vec<QueuedUpdate>) -> BTreeMap<u64, UpdateRequest> {
    let mut groups: BTreeMap<u64, UpdateRequest> = BTreeMap::new();
    for QueuedUpdate { delay, request } in queue {
        match groups.get_mut(&delay) {
            Some(group) => group.merge(request),
            None => {
                groups.insert(delay, request);
            }
        }
    }
    groups
}

/// Accept `path` if no newer write was recorded for it
fn stamp(timestamps: &mut FxHashMap<String, f64>, path: &str, timestamp: f64) -> bool {
    match timestamps.get(path) {
        Some(&previous) if timestamp < previous => false,
        _ => {
            timestamps.insert(path.to_string(), timestamp);
            true
        }
    }
}

/// Merge `values` into `parent` leaf by leaf
fn diff_values(
    path: &str,
    values: &ValueMap,
    parent: &mut ValueMap,
    timestamps: &mut FxHashMap<String, f64>,
    timestamp: f64,
) -> bool {
    let mut changed = false;
    for (key, value) in values {
        let path = format!("{}.{}", path, key);
        if let Value::Map(nested) = value {
            let slot = parent
                .entry(key.clone())
                .or_insert_with(|| Value::Map(ValueMap::new()));
            if !slot.is_map() {
                *slot = Value::Map(ValueMap::new());
            }
            if let Value::Map(child) = slot {
                changed |= diff_values(&path, nested, child, timestamps, timestamp);
            }
        } else if stamp(timestamps, &path, timestamp)
            && !parent.get(key).is_some_and(|old| Value::equivalent(old, value))
        {
            parent.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// Goal as the animated node will report it: color literals in animatable
/// strings become `rgba(...)`
fn compute_goal(value: &Value, names: &ColorNames) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| compute_goal(v, names)).collect()),
        Value::String(s) if is_animatable_string(s, names) => {
            Interpolator::build(InterpolationConfig::new(vec![s.as_str(), s.as_str()]), names)
                .map(|calc| calc.at(1.0))
                .unwrap_or_else(|_| value.clone())
        }
        _ => value.clone(),
    }
}

fn template(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Node for a value seen for the first time
fn create_animated(
    graph: &mut AnimatedGraph,
    value: &Value,
    names: &ColorNames,
    now: f64,
) -> Option<NodeId> {
    let node = match value {
        Value::Map(_) | Value::Null => return None,
        Value::Array(items) => graph.create_value_array(items),
        Value::String(s) if is_animatable_string(s, names) => {
            let calc = match Interpolator::build(InterpolationConfig::new(vec![s.as_str(), s.as_str()]), names) {
                Ok(calc) => calc,
                Err(err) => {
                    tracing::error!("failed to interpolate {:?}: {}", s, err);
                    return None;
                }
            };
            let driver = graph.create_value(Value::from(0.0));
            graph.reset_value(driver, false, now);
            graph.create_interpolation(smallvec::smallvec![driver], calc)
        }
        other => graph.create_value(other.clone()),
    };
    graph.reset_value(node, false, now);
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Clock, ManualClock};
    use sprig_core::{deliver_updates, value_map, Field};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn setup() -> (AnimationScheduler, ManualClock, Controller) {
        let clock = ManualClock::new();
        let scheduler = AnimationScheduler::with_clock(Clock::Manual(clock.clone()));
        let controller = Controller::new(&scheduler);
        (scheduler, clock, controller)
    }

    fn frame(scheduler: &AnimationScheduler, clock: &ManualClock) {
        clock.advance(16.0);
        scheduler.update();
    }

    fn pump(scheduler: &AnimationScheduler, clock: &ManualClock) -> usize {
        let mut frames = 0;
        while scheduler.take_frame_request() {
            frame(scheduler, clock);
            frames += 1;
            assert!(frames < 10_000, "never came to rest");
        }
        frames
    }

    fn x(controller: &Controller) -> f64 {
        controller.get_values()["x"].as_number().unwrap()
    }

    #[test]
    fn test_spring_to_rest() {
        let (scheduler, clock, controller) = setup();
        let frames = Rc::new(Cell::new(0));
        let rested = Rc::new(RefCell::new(Vec::new()));
        let (frame_count, rest_sink) = (frames.clone(), rested.clone());

        controller
            .update(
                UpdateRequest::new()
                    .from([("x", 0.0)])
                    .to([("x", 1.0)])
                    .on_frame(move |_| frame_count.set(frame_count.get() + 1))
                    .on_rest(move |values| rest_sink.borrow_mut().push(values.clone())),
            )
            .start();
        assert!(!controller.is_idle());

        pump(&scheduler, &clock);
        assert!(controller.is_idle());
        assert_eq!(x(&controller), 1.0);
        assert!(frames.get() > 10);
        assert_eq!(*rested.borrow(), vec![value_map([("x", 1.0)])]);
    }

    #[test]
    fn test_newer_timestamp_wins() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 5.0)]).timestamp(1.0))
            .start();
        controller
            .update(UpdateRequest::new().to([("x", 9.0)]).timestamp(0.0))
            .start();
        pump(&scheduler, &clock);
        assert_eq!(x(&controller), 5.0);
    }

    #[test]
    fn test_delayed_update_cannot_override_newer() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 9.0)]).delay(100.0))
            .start();
        clock.advance(10.0);
        controller.update(UpdateRequest::new().to([("x", 5.0)])).start();
        pump(&scheduler, &clock);
        // the delayed request ran last but was stamped first
        assert_eq!(x(&controller), 5.0);
    }

    #[test]
    fn test_retarget_continues_from_current_value() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 100.0)]))
            .start();
        for _ in 0..5 {
            frame(&scheduler, &clock);
        }
        let before = x(&controller);
        assert!(before > 0.0 && before < 100.0);

        controller.update(UpdateRequest::new().to([("x", 0.0)])).start();
        frame(&scheduler, &clock);
        let after = x(&controller);
        // velocity carries over, so the first step still heads up
        assert!((after - before).abs() < 30.0, "jumped from {} to {}", before, after);

        pump(&scheduler, &clock);
        assert_eq!(x(&controller), 0.0);
    }

    #[test]
    fn test_immediate_jumps() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 50.0)]).immediate(true))
            .start();
        assert_eq!(x(&controller), 50.0);
        assert_eq!(pump(&scheduler, &clock), 1);
        assert!(controller.is_idle());
    }

    #[test]
    fn test_duration_tween() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(
                UpdateRequest::new()
                    .from([("x", 0.0)])
                    .to([("x", 10.0)])
                    .config(SpringConfig::default().duration(160.0)),
            )
            .start();
        for _ in 0..5 {
            frame(&scheduler, &clock);
        }
        assert!((x(&controller) - 5.0).abs() < 1e-9);
        assert_eq!(pump(&scheduler, &clock), 5);
        assert_eq!(x(&controller), 10.0);
    }

    #[test]
    fn test_decay_coasts_to_rest() {
        let (scheduler, clock, controller) = setup();
        let finished = Rc::new(Cell::new(None));
        let rested = Rc::new(RefCell::new(Vec::new()));
        let (finished_sink, rest_sink) = (finished.clone(), rested.clone());

        controller
            .update(
                UpdateRequest::new()
                    .from([("x", 0.0)])
                    .to([("x", 1.0)])
                    .config(SpringConfig::default().decay().velocity(0.5))
                    .on_rest(move |values| rest_sink.borrow_mut().push(values.clone())),
            )
            .start_with(move |done| finished_sink.set(Some(done)));

        let frames = pump(&scheduler, &clock);
        assert!(frames > 10);
        assert!(controller.is_idle());
        assert_eq!(finished.get(), Some(true));

        // coasts toward v / (1 - 0.998) and ignores the goal
        let rest = x(&controller);
        assert!(rest > 200.0 && rest < 250.0, "rest = {}", rest);
        assert_eq!(*rested.borrow(), vec![value_map([("x", rest)])]);
    }

    #[test]
    fn test_color_strings_interpolate() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("fill", "red")]).to([("fill", "#0000ff")]))
            .start();
        frame(&scheduler, &clock);
        frame(&scheduler, &clock);
        let mid = controller.get_values()["fill"].clone();
        assert!(mid.as_str().is_some_and(|s| s.starts_with("rgba(")));

        pump(&scheduler, &clock);
        assert_eq!(controller.get_values()["fill"], Value::from("rgba(0, 0, 255, 1)"));
    }

    #[test]
    fn test_plain_strings_snap() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("display", "none")]).to([("display", "block")]))
            .start();
        assert_eq!(pump(&scheduler, &clock), 1);
        assert_eq!(controller.get_values()["display"], Value::from("block"));
    }

    #[test]
    fn test_arrays_animate_per_element() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(
                UpdateRequest::new()
                    .from([("pos", vec![0.0, 0.0])])
                    .to([("pos", vec![10.0, -20.0])])
                    .config(SpringConfig::default().velocity(vec![5.0, 0.0])),
            )
            .start();
        pump(&scheduler, &clock);
        assert_eq!(controller.get_values()["pos"], Value::from(vec![10.0, -20.0]));
    }

    #[test]
    fn test_shape_mismatch_keeps_previous_node() {
        init_tracing();
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("shadow", "0px 0px")]).to([("shadow", "0px 0px")]))
            .start();
        let before = controller.animated("shadow").unwrap();

        controller
            .update(UpdateRequest::new().to([("shadow", "1px 2px 3px")]))
            .start();
        pump(&scheduler, &clock);
        assert_eq!(controller.animated("shadow"), Some(before));
        assert_eq!(controller.get_values()["shadow"], Value::from("0px 0px"));
    }

    #[test]
    fn test_unanimatable_values_are_skipped() {
        init_tracing();
        let (scheduler, clock, controller) = setup();
        controller
            .update(
                UpdateRequest::new()
                    .from([("x", Value::from(0.0)), ("nested", Value::Map(value_map([("a", 1.0)])))])
                    .to([("x", 1.0)]),
            )
            .start();
        assert!(controller.animated("nested").is_none());
        pump(&scheduler, &clock);
        assert_eq!(x(&controller), 1.0);
    }

    #[test]
    fn test_stop_keys_freezes_only_those() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("x", 0.0), ("y", 0.0)]).to([("x", 100.0), ("y", 100.0)]))
            .start();
        frame(&scheduler, &clock);
        frame(&scheduler, &clock);
        controller.stop_keys(&["x"]);
        let frozen = x(&controller);

        pump(&scheduler, &clock);
        assert_eq!(x(&controller), frozen);
        assert_eq!(controller.get_values()["y"].as_number(), Some(100.0));
    }

    #[test]
    fn test_stop_resolves_unfinished() {
        let (scheduler, clock, controller) = setup();
        let result = Rc::new(Cell::new(None));
        let sink = result.clone();
        controller
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 100.0)]))
            .start_with(move |finished| sink.set(Some(finished)));
        frame(&scheduler, &clock);
        controller.stop();
        assert_eq!(result.get(), Some(false));
        assert!(controller.is_idle());
        assert_eq!(scheduler.controller_count(), 0);
    }

    #[test]
    fn test_cancel_keys_prevents_animation() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(
                UpdateRequest::new()
                    .from([("x", 0.0), ("y", 0.0)])
                    .to([("x", 10.0), ("y", 10.0)])
                    .cancel_keys(["y"]),
            )
            .start();
        pump(&scheduler, &clock);
        assert_eq!(x(&controller), 10.0);
        assert_eq!(controller.get_values()["y"].as_number(), Some(0.0));
    }

    #[test]
    fn test_reverse_swaps_targets() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 10.0)]))
            .start();
        pump(&scheduler, &clock);
        assert_eq!(x(&controller), 10.0);

        controller
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 10.0)]).reverse())
            .start();
        assert!(!controller.is_idle());
        pump(&scheduler, &clock);
        assert_eq!(x(&controller), 0.0);
    }

    #[test]
    fn test_reset_restarts_from_from() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 10.0)]))
            .start();
        pump(&scheduler, &clock);

        let starts = Rc::new(RefCell::new(Vec::new()));
        let sink = starts.clone();
        controller
            .update(
                UpdateRequest::new()
                    .from([("x", 0.0)])
                    .to([("x", 10.0)])
                    .reset()
                    .on_start(move |key| sink.borrow_mut().push(key.to_string())),
            )
            .start();
        assert_eq!(x(&controller), 0.0);
        assert_eq!(*starts.borrow(), vec!["x".to_string()]);
        pump(&scheduler, &clock);
        assert_eq!(x(&controller), 10.0);
    }

    #[test]
    fn test_delay_fn_splits_keys() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(
                UpdateRequest::new()
                    .from([("x", 0.0), ("y", 0.0)])
                    .to([("x", 10.0), ("y", 10.0)])
                    .delay_fn(|key| if key == "y" { 200.0 } else { 0.0 }),
            )
            .start();
        for _ in 0..5 {
            frame(&scheduler, &clock);
        }
        assert!(x(&controller) > 0.0);
        assert_eq!(controller.get_values()["y"].as_number(), Some(0.0));
        pump(&scheduler, &clock);
        assert_eq!(controller.get_values()["y"].as_number(), Some(10.0));
    }

    #[test]
    fn test_trailing_controller_waits_for_leader() {
        let (scheduler, clock, leader) = setup();
        let follower = Controller::new(&scheduler);

        leader
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 100.0)]).config(SpringConfig::molasses()))
            .start();
        follower
            .update(
                UpdateRequest::new()
                    .from([("x", 0.0)])
                    .to([("x", 1.0)])
                    .attach(&leader)
                    .config(SpringConfig::stiff()),
            )
            .start();

        while !leader.is_idle() {
            assert!(!follower.is_idle(), "follower rested before its leader");
            frame(&scheduler, &clock);
        }
        pump(&scheduler, &clock);
        assert_eq!(x(&leader), 100.0);
        assert_eq!(x(&follower), 100.0);
    }

    #[test]
    fn test_props_receive_values() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 1.0)]))
            .start();

        let last = Rc::new(RefCell::new(Value::Null));
        let sink = last.clone();
        let node = controller.animated("x").unwrap();
        controller.graph().borrow_mut().create_props(
            [("x".to_string(), Field::Node(node))],
            move |patch: &Value| {
                *sink.borrow_mut() = patch.clone();
                true
            },
        );
        pump(&scheduler, &clock);
        assert_eq!(*last.borrow(), Value::Map(value_map([("x", 1.0)])));
    }

    #[test]
    fn test_type_change_migrates_props() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("v", 0.0)]).to([("v", 0.0)]))
            .start();
        let last = Rc::new(RefCell::new(Value::Null));
        let sink = last.clone();
        let graph = controller.graph();
        let props = graph.borrow_mut().create_props(
            [("v".to_string(), Field::Node(controller.animated("v").unwrap()))],
            move |patch: &Value| {
                *sink.borrow_mut() = patch.clone();
                true
            },
        );

        controller
            .update(UpdateRequest::new().to([("v", vec![1.0, 2.0])]))
            .start();
        pump(&scheduler, &clock);
        deliver_updates(&graph);

        assert_eq!(graph.borrow().get_value(props), Value::Map(value_map([("v", vec![1.0, 2.0])])));
        assert_eq!(*last.borrow(), Value::Map(value_map([("v", vec![1.0, 2.0])])));
    }

    #[test]
    fn test_destroy_releases_nodes() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("x", Value::from(0.0)), ("fill", Value::from("red"))]).to([("x", Value::from(1.0)), ("fill", Value::from("blue"))]))
            .start();
        frame(&scheduler, &clock);
        assert!(!controller.graph().borrow().is_empty());

        controller.destroy();
        assert!(controller.is_destroyed());
        assert!(controller.graph().borrow().is_empty());
        assert_eq!(scheduler.controller_count(), 0);

        controller.update(UpdateRequest::new().to([("x", 5.0)])).start();
        assert!(controller.get_values().is_empty());
    }

    #[test]
    fn test_start_without_queue_resolves() {
        let (_scheduler, _clock, controller) = setup();
        let result = Rc::new(Cell::new(None));
        let sink = result.clone();
        controller.start_with(move |finished| sink.set(Some(finished)));
        assert_eq!(result.get(), Some(true));
        assert!(controller.is_idle());
    }

    #[test]
    fn test_unchanged_request_resolves_next_frame() {
        let (scheduler, clock, controller) = setup();
        controller
            .update(UpdateRequest::new().from([("x", 3.0)]))
            .start();
        pump(&scheduler, &clock);

        let result = Rc::new(Cell::new(None));
        let sink = result.clone();
        controller
            .update(UpdateRequest::new().to([("x", 3.0)]))
            .start_with(move |finished| sink.set(Some(finished)));
        assert_eq!(result.get(), None);
        assert_eq!(pump(&scheduler, &clock), 1);
        assert_eq!(result.get(), Some(true));
    }

    #[test]
    fn test_default_config() {
        let (scheduler, clock, controller) = setup();
        controller.set_default_config(SpringConfig::default().duration(32.0));
        controller
            .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 1.0)]))
            .start();
        assert_eq!(pump(&scheduler, &clock), 2);
    }
}
