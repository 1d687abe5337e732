//! Frameloop scheduler
//!
//! The scheduler keeps a registry of controllers that are currently moving
//! and advances all of them whenever the host calls [`AnimationScheduler::update`].
//! The loop is self-rescheduling: while anything is registered (or a host
//! timer is pending) every driver invocation asks for another one, and as
//! soon as the registry drains it goes quiet until the next registration.
//!
//! How "ask for another invocation" reaches the host is a [`FrameRequest`]:
//!
//! - [`FrameRequest::Manual`] (default): a flag the host polls with
//!   [`AnimationScheduler::take_frame_request`]
//! - [`FrameRequest::Callback`]: a function invoked once per request, e.g. to
//!   wake an event loop
//!
//! ```
//! use sprig_animation::{AnimationScheduler, Clock, Controller, ManualClock, UpdateRequest};
//!
//! let clock = ManualClock::new();
//! let scheduler = AnimationScheduler::with_clock(Clock::Manual(clock.clone()));
//! let controller = Controller::new(&scheduler);
//!
//! controller
//!     .update(UpdateRequest::new().from([("x", 0.0)]).to([("x", 1.0)]))
//!     .start();
//!
//! while scheduler.take_frame_request() {
//!     clock.advance(16.0);
//!     scheduler.update();
//! }
//! assert_eq!(controller.get_values()["x"].as_number(), Some(1.0));
//! ```

use indexmap::IndexMap;
use slotmap::{new_key_type, SlotMap};
use sprig_core::{deliver_updates, AnimatedGraph, ColorNames, SharedAnimatedGraph};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

use crate::controller::{Controller, ControllerId, WeakController};

new_key_type! {
    /// Handle to a pending host timer
    pub struct TimerId;
}

/// Deferred task run by the driver once its due time has passed
pub type TimerTask = Box<dyn FnOnce()>;

// ============================================================================
// Clock
// ============================================================================

/// Time source in milliseconds
#[derive(Clone, Debug)]
pub enum Clock {
    /// Monotonic wall clock, zero at scheduler creation
    System(Instant),
    /// Time that only moves when told to
    Manual(ManualClock),
}

impl Clock {
    pub fn system() -> Self {
        Clock::System(Instant::now())
    }

    pub fn now(&self) -> f64 {
        match self {
            Clock::System(origin) => origin.elapsed().as_secs_f64() * 1000.0,
            Clock::Manual(clock) => clock.now(),
        }
    }
}

/// A shared, host-driven clock
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Rc<Cell<f64>>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        self.0.get()
    }

    pub fn advance(&self, ms: f64) {
        self.0.set(self.0.get() + ms);
    }

    pub fn set(&self, ms: f64) {
        self.0.set(ms);
    }
}

// ============================================================================
// Frame requests
// ============================================================================

/// How the loop asks the host for the next driver invocation
#[derive(Clone, Default)]
pub enum FrameRequest {
    /// Raise a flag for [`AnimationScheduler::take_frame_request`]
    #[default]
    Manual,
    /// Call back into the host. The callback must not run the driver
    /// synchronously; it should schedule it.
    Callback(Rc<dyn Fn()>),
}

impl fmt::Debug for FrameRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameRequest::Manual => f.write_str("Manual"),
            FrameRequest::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

// ============================================================================
// Scheduler state
// ============================================================================

struct Timer {
    due: f64,
    seq: u64,
    task: TimerTask,
}

struct SchedulerInner {
    active: bool,
    controllers: IndexMap<ControllerId, WeakController>,
    timers: SlotMap<TimerId, Timer>,
    timer_seq: u64,
    frame_request: FrameRequest,
    frame_pending: bool,
    clock: Clock,
    color_names: Arc<ColorNames>,
    frames: u64,
}

/// The frameloop. Owns the node graph shared by all of its controllers.
pub struct AnimationScheduler {
    inner: Rc<RefCell<SchedulerInner>>,
    graph: SharedAnimatedGraph,
}

impl AnimationScheduler {
    /// Create a scheduler on the system clock
    pub fn new() -> Self {
        Self::with_clock(Clock::system())
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                active: false,
                controllers: IndexMap::new(),
                timers: SlotMap::with_key(),
                timer_seq: 0,
                frame_request: FrameRequest::Manual,
                frame_pending: false,
                clock,
                color_names: ColorNames::shared(),
                frames: 0,
            })),
            graph: AnimatedGraph::shared(),
        }
    }

    /// Get a weak handle for controllers
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            inner: Rc::downgrade(&self.inner),
            graph: Rc::downgrade(&self.graph),
        }
    }

    pub fn graph(&self) -> SharedAnimatedGraph {
        self.graph.clone()
    }

    pub fn now(&self) -> f64 {
        self.inner.borrow().clock.now()
    }

    pub fn is_active(&self) -> bool {
        self.inner.borrow().active
    }

    /// Number of registered controllers
    pub fn controller_count(&self) -> usize {
        self.inner.borrow().controllers.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    /// Number of driver invocations so far
    pub fn frame_count(&self) -> u64 {
        self.inner.borrow().frames
    }

    pub fn set_frame_request(&self, request: FrameRequest) {
        self.inner.borrow_mut().frame_request = request;
    }

    /// Consume the pending frame request, if any
    pub fn take_frame_request(&self) -> bool {
        std::mem::take(&mut self.inner.borrow_mut().frame_pending)
    }

    pub fn color_names(&self) -> Arc<ColorNames> {
        self.inner.borrow().color_names.clone()
    }

    /// Replace the color table used for string goals created from now on
    pub fn set_color_names(&self, names: Arc<ColorNames>) {
        self.inner.borrow_mut().color_names = names;
    }

    pub fn register(&self, controller: &Controller) {
        register(&self.inner, controller);
    }

    pub fn unregister(&self, id: ControllerId) {
        self.inner.borrow_mut().controllers.shift_remove(&id);
    }

    pub fn set_timeout(&self, delay: f64, task: impl FnOnce() + 'static) -> TimerId {
        set_timeout(&self.inner, delay, Box::new(task))
    }

    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.inner.borrow_mut().timers.remove(id).is_some()
    }

    /// Run one frame: fire due timers, advance every registered controller,
    /// deliver values to props objects. Returns whether the loop continues.
    pub fn update(&self) -> bool {
        let time = {
            let mut inner = self.inner.borrow_mut();
            inner.frames += 1;
            inner.clock.now()
        };

        for task in self.take_due_timers(time) {
            task();
        }

        let controllers: Vec<Controller> = self
            .inner
            .borrow()
            .controllers
            .values()
            .filter_map(WeakController::upgrade)
            .collect();

        let mut updated = 0;
        for controller in &controllers {
            // an earlier controller's callbacks may have stopped this one
            if !self.inner.borrow().controllers.contains_key(&controller.id()) {
                continue;
            }
            let (is_active, count) = controller.advance(time);
            updated += count;
            controller.on_frame(is_active, count);
        }

        let delivered = deliver_updates(&self.graph);
        tracing::trace!(
            "frame at {:.1}ms: {} controllers, {} values, {} props delivered",
            time,
            controllers.len(),
            updated,
            delivered
        );

        let keep_going = {
            let mut inner = self.inner.borrow_mut();
            inner.controllers.retain(|_, c| c.is_alive());
            if inner.controllers.is_empty() && inner.timers.is_empty() {
                inner.active = false;
                tracing::debug!("frameloop idle after {} frames", inner.frames);
                false
            } else {
                true
            }
        };
        if keep_going {
            request_frame(&self.inner);
        }
        keep_going
    }

    fn take_due_timers(&self, time: f64) -> Vec<TimerTask> {
        let mut inner = self.inner.borrow_mut();
        let mut due: Vec<(f64, u64, TimerId)> = inner
            .timers
            .iter()
            .filter(|(_, t)| t.due <= time)
            .map(|(id, t)| (t.due, t.seq, id))
            .collect();
        due.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        due.into_iter()
            .filter_map(|(_, _, id)| inner.timers.remove(id).map(|t| t.task))
            .collect()
    }
}

impl Default for AnimationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AnimationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("AnimationScheduler")
            .field("active", &inner.active)
            .field("controllers", &inner.controllers.len())
            .field("timers", &inner.timers.len())
            .field("frame_request", &inner.frame_request)
            .finish()
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Weak handle to the scheduler held by controllers.
///
/// Every operation degrades to a no-op once the scheduler is dropped.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Weak<RefCell<SchedulerInner>>,
    graph: Weak<RefCell<AnimatedGraph>>,
}

impl SchedulerHandle {
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn now(&self) -> Option<f64> {
        self.inner.upgrade().map(|inner| inner.borrow().clock.now())
    }

    pub fn graph(&self) -> Option<SharedAnimatedGraph> {
        self.graph.upgrade()
    }

    pub fn color_names(&self) -> Arc<ColorNames> {
        self.inner
            .upgrade()
            .map(|inner| inner.borrow().color_names.clone())
            .unwrap_or_else(ColorNames::shared)
    }

    pub fn register(&self, controller: &Controller) {
        if let Some(inner) = self.inner.upgrade() {
            register(&inner, controller);
        }
    }

    pub fn unregister(&self, id: ControllerId) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().controllers.shift_remove(&id);
        }
    }

    pub fn is_registered(&self, id: ControllerId) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.borrow().controllers.contains_key(&id))
    }

    pub fn set_timeout(&self, delay: f64, task: impl FnOnce() + 'static) -> Option<TimerId> {
        let inner = self.inner.upgrade()?;
        Some(set_timeout(&inner, delay, Box::new(task)))
    }

    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.borrow_mut().timers.remove(id).is_some())
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn register(inner: &Rc<RefCell<SchedulerInner>>, controller: &Controller) {
    let start = {
        let mut state = inner.borrow_mut();
        state.controllers.insert(controller.id(), controller.downgrade());
        !std::mem::replace(&mut state.active, true)
    };
    if start {
        tracing::debug!("frameloop started by controller {}", controller.id());
        request_frame(inner);
    }
}

fn set_timeout(inner: &Rc<RefCell<SchedulerInner>>, delay: f64, task: TimerTask) -> TimerId {
    let (id, start) = {
        let mut state = inner.borrow_mut();
        let due = state.clock.now() + delay.max(0.0);
        let seq = state.timer_seq;
        state.timer_seq += 1;
        let id = state.timers.insert(Timer { due, seq, task });
        (id, !std::mem::replace(&mut state.active, true))
    };
    if start {
        tracing::debug!("frameloop started by timer");
        request_frame(inner);
    }
    id
}

fn request_frame(inner: &Rc<RefCell<SchedulerInner>>) {
    let callback = {
        let mut state = inner.borrow_mut();
        let callback = match &state.frame_request {
            FrameRequest::Manual => None,
            FrameRequest::Callback(f) => Some(f.clone()),
        };
        if callback.is_none() {
            state.frame_pending = true;
        }
        callback
    };
    if let Some(callback) = callback {
        callback();
    }
}
