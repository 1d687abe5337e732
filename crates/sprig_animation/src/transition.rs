//! Keyed transitions
//!
//! A [`Transition`] maps a changing list of items onto one [`Controller`] per
//! item. Every [`update`](Transition::update) reconciles the new list against
//! the previous one:
//!
//! - keys that appear get an `enter` request (or `initial` on the very first
//!   reconciliation)
//! - keys that stay get an `update` request, if an update producer is set
//! - keys that disappear get a `leave` request and stay in the rendered list,
//!   next to their old neighbours, until their controller comes to rest
//!
//! [`reconcile`] is the pure part and can be used on its own.
//!
//! ```
//! use sprig_animation::{AnimationScheduler, Transition, TransitionProps, UpdateRequest};
//!
//! let scheduler = AnimationScheduler::new();
//! let mut list = Transition::new(
//!     &scheduler,
//!     TransitionProps::new(|item: &&str| item.to_string())
//!         .from(|_, _| sprig_core::value_map([("opacity", 0.0)]))
//!         .enter(|_, _| UpdateRequest::new().to([("opacity", 1.0)]))
//!         .leave(|_, _| UpdateRequest::new().to([("opacity", 0.0)]))
//!         .trail(50.0),
//! );
//! list.update(&["a", "b"]);
//! assert_eq!(list.transitions().len(), 2);
//! ```

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use sprig_core::ValueMap;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::config::SpringConfig;
use crate::controller::Controller;
use crate::request::{Delay, UpdateRequest};
use crate::scheduler::{AnimationScheduler, SchedulerHandle};

/// Why a transition item is animating
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initial,
    Enter,
    Update,
    Leave,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initial => "initial",
            Phase::Enter => "enter",
            Phase::Update => "update",
            Phase::Leave => "leave",
        };
        f.write_str(name)
    }
}

pub type KeyFn<T> = Rc<dyn Fn(&T) -> String>;
pub type FromFn<T> = Rc<dyn Fn(&T, usize) -> ValueMap>;
pub type PhaseFn<T> = Rc<dyn Fn(&T, usize) -> UpdateRequest>;
pub type PhaseConfigFn<T> = Rc<dyn Fn(&T, Phase) -> SpringConfig>;
pub type ItemStartFn<T> = Rc<dyn Fn(&T, Phase, &str)>;
pub type ItemValuesFn<T> = Rc<dyn Fn(&T, Phase, &ValueMap)>;
pub type ItemFn<T> = Rc<dyn Fn(&T)>;

/// Everything that shapes a transition
pub struct TransitionProps<T> {
    pub keys: KeyFn<T>,
    /// `from` values used instead of `from` on the first reconciliation
    pub initial: Option<FromFn<T>>,
    pub from: Option<FromFn<T>>,
    pub enter: Option<PhaseFn<T>>,
    pub update: Option<PhaseFn<T>>,
    pub leave: Option<PhaseFn<T>>,
    /// Extra delay per stamped item, in milliseconds
    pub trail: f64,
    /// Order in which phases are assigned, and so how trail delays stack
    pub order: Vec<Phase>,
    /// Re-adding a leaving key revives it instead of creating a twin
    pub unique: bool,
    /// Forget every current item before the next reconciliation
    pub reset: bool,
    pub config: Option<PhaseConfigFn<T>>,
    /// Keep left items until every controller is idle
    pub lazy: bool,
    /// Leave controllers unstarted; see [`Transition::start`]
    pub paused: bool,
    pub on_start: Option<ItemStartFn<T>>,
    pub on_frame: Option<ItemValuesFn<T>>,
    pub on_rest: Option<ItemValuesFn<T>>,
    pub on_destroyed: Option<ItemFn<T>>,
}

impl<T> TransitionProps<T> {
    pub fn new(keys: impl Fn(&T) -> String + 'static) -> Self {
        Self {
            keys: Rc::new(keys),
            initial: None,
            from: None,
            enter: None,
            update: None,
            leave: None,
            trail: 0.0,
            order: vec![Phase::Enter, Phase::Leave, Phase::Update],
            unique: false,
            reset: false,
            config: None,
            lazy: false,
            paused: false,
            on_start: None,
            on_frame: None,
            on_rest: None,
            on_destroyed: None,
        }
    }

    pub fn initial(mut self, f: impl Fn(&T, usize) -> ValueMap + 'static) -> Self {
        self.initial = Some(Rc::new(f));
        self
    }

    pub fn from(mut self, f: impl Fn(&T, usize) -> ValueMap + 'static) -> Self {
        self.from = Some(Rc::new(f));
        self
    }

    pub fn enter(mut self, f: impl Fn(&T, usize) -> UpdateRequest + 'static) -> Self {
        self.enter = Some(Rc::new(f));
        self
    }

    pub fn update(mut self, f: impl Fn(&T, usize) -> UpdateRequest + 'static) -> Self {
        self.update = Some(Rc::new(f));
        self
    }

    pub fn leave(mut self, f: impl Fn(&T, usize) -> UpdateRequest + 'static) -> Self {
        self.leave = Some(Rc::new(f));
        self
    }

    pub fn trail(mut self, ms: f64) -> Self {
        self.trail = ms;
        self
    }

    pub fn order(mut self, order: Vec<Phase>) -> Self {
        self.order = order;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn config(mut self, f: impl Fn(&T, Phase) -> SpringConfig + 'static) -> Self {
        self.config = Some(Rc::new(f));
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn on_start(mut self, f: impl Fn(&T, Phase, &str) + 'static) -> Self {
        self.on_start = Some(Rc::new(f));
        self
    }

    pub fn on_frame(mut self, f: impl Fn(&T, Phase, &ValueMap) + 'static) -> Self {
        self.on_frame = Some(Rc::new(f));
        self
    }

    pub fn on_rest(mut self, f: impl Fn(&T, Phase, &ValueMap) + 'static) -> Self {
        self.on_rest = Some(Rc::new(f));
        self
    }

    pub fn on_destroyed(mut self, f: impl Fn(&T) + 'static) -> Self {
        self.on_destroyed = Some(Rc::new(f));
        self
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// One rendered item
#[derive(Clone, Debug)]
pub struct TransitionRecord<T> {
    /// Stable key; also the key of the owning controller
    pub key: String,
    /// Key produced by the key extractor
    pub original_key: String,
    pub phase: Phase,
    pub item: T,
    /// Left the list; removed once it comes to rest
    pub destroyed: bool,
    /// Request produced for the latest phase change
    pub request: UpdateRequest,
}

/// A left item with the neighbours it had when it left
#[derive(Clone, Debug)]
pub struct DeletedRecord<T> {
    pub record: TransitionRecord<T>,
    pub left: Option<String>,
    pub right: Option<String>,
}

/// Reconciliation state carried from one item list to the next
#[derive(Clone, Debug)]
pub struct TransitionState<T> {
    pub first: bool,
    pub changed: bool,
    /// Live records by original key
    pub current: IndexMap<String, TransitionRecord<T>>,
    pub deleted: Vec<DeletedRecord<T>>,
    /// Render order, left items included
    pub transitions: Vec<TransitionRecord<T>>,
    prev_keys: Vec<String>,
    prev_items: Vec<T>,
    guid: u64,
}

impl<T> Default for TransitionState<T> {
    fn default() -> Self {
        Self {
            first: true,
            changed: false,
            current: IndexMap::new(),
            deleted: Vec::new(),
            transitions: Vec::new(),
            prev_keys: Vec::new(),
            prev_items: Vec::new(),
            guid: 0,
        }
    }
}

impl<T> TransitionState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop left records, all of them or just `key`
    pub fn clean_up(&mut self, key: Option<&str>) -> Vec<String> {
        let removed: Vec<String> = self
            .deleted
            .iter()
            .map(|d| d.record.key.clone())
            .filter(|k| key.map_or(true, |key| key == k))
            .collect();
        self.transitions.retain(|t| !removed.contains(&t.key));
        self.deleted.retain(|d| !removed.contains(&d.record.key));
        removed
    }
}

/// Compute the next state for `items`
pub fn reconcile<T: Clone>(
    mut state: TransitionState<T>,
    items: &[T],
    props: &TransitionProps<T>,
) -> TransitionState<T> {
    // first occurrence of a key wins
    let mut seen = FxHashSet::default();
    let (keys, items): (Vec<String>, Vec<T>) = items
        .iter()
        .map(|item| ((props.keys)(item), item))
        .filter(|(key, _)| {
            let fresh = seen.insert(key.clone());
            if !fresh {
                tracing::warn!("duplicate transition key {:?} ignored", key);
            }
            fresh
        })
        .map(|(key, item)| (key, item.clone()))
        .unzip();

    if props.reset {
        state.current.clear();
        state.transitions.clear();
    }

    let next: FxHashSet<&str> = keys.iter().map(String::as_str).collect();
    let added: Vec<usize> = (0..keys.len())
        .filter(|&i| !state.current.contains_key(&keys[i]))
        .collect();
    let updated: Vec<usize> = if props.update.is_some() {
        (0..keys.len())
            .filter(|&i| state.current.contains_key(&keys[i]))
            .collect()
    } else {
        Vec::new()
    };
    let removed: Vec<String> = state
        .transitions
        .iter()
        .filter(|t| !t.destroyed && !next.contains(t.original_key.as_str()))
        .map(|t| t.original_key.clone())
        .collect();

    let mut delay = -props.trail;
    let mut stamp = |request: &mut UpdateRequest, item: &T, phase: Phase| {
        delay += props.trail;
        if request.delay.is_none() {
            request.delay = Some(Delay::Ms(delay));
        }
        if request.config.is_none() {
            if let Some(config) = &props.config {
                request.config = Some(config(item, phase).into());
            }
        }
    };

    for &order in &props.order {
        match order {
            Phase::Enter | Phase::Initial => {
                let (phase, from) = match (&props.initial, state.first) {
                    (Some(initial), true) => (Phase::Initial, Some(initial)),
                    _ => (Phase::Enter, props.from.as_ref()),
                };
                for &i in &added {
                    let key = &keys[i];
                    let item = &items[i];
                    if props.unique {
                        state.deleted.retain(|d| &d.record.original_key != key);
                    }
                    let mut request = props.enter.as_ref().map(|f| f(item, i)).unwrap_or_default();
                    stamp(&mut request, item, phase);
                    if request.from.is_none() {
                        request.from = from.map(|f| f(item, i)).filter(|m| !m.is_empty());
                    }
                    let record_key = if props.unique {
                        key.clone()
                    } else {
                        state.guid += 1;
                        state.guid.to_string()
                    };
                    state.current.insert(
                        key.clone(),
                        TransitionRecord {
                            key: record_key,
                            original_key: key.clone(),
                            phase,
                            item: item.clone(),
                            destroyed: false,
                            request,
                        },
                    );
                }
            }
            Phase::Leave => {
                for key in &removed {
                    let Some(record) = state.current.shift_remove(key) else {
                        continue;
                    };
                    let index = state.prev_keys.iter().position(|k| k == key);
                    let item = index
                        .and_then(|i| state.prev_items.get(i))
                        .cloned()
                        .unwrap_or_else(|| record.item.clone());
                    let mut request = props
                        .leave
                        .as_ref()
                        .map(|f| f(&item, index.unwrap_or_default()))
                        .unwrap_or_default();
                    stamp(&mut request, &item, Phase::Leave);
                    state.deleted.push(DeletedRecord {
                        left: index
                            .and_then(|i| i.checked_sub(1))
                            .and_then(|i| state.prev_keys.get(i))
                            .cloned(),
                        right: index.and_then(|i| state.prev_keys.get(i + 1)).cloned(),
                        record: TransitionRecord {
                            phase: Phase::Leave,
                            destroyed: true,
                            item,
                            request,
                            ..record
                        },
                    });
                }
            }
            Phase::Update => {
                let Some(update) = &props.update else {
                    continue;
                };
                for &i in &updated {
                    let item = &items[i];
                    let mut request = update(item, i);
                    stamp(&mut request, item, Phase::Update);
                    if let Some(record) = state.current.get_mut(&keys[i]) {
                        record.phase = Phase::Update;
                        record.item = item.clone();
                        record.request = request;
                    }
                }
            }
        }
    }

    let out: Vec<TransitionRecord<T>> = keys
        .iter()
        .filter_map(|key| state.current.get(key).cloned())
        .collect();
    let transitions = reconcile_deleted(&state.deleted, out);

    tracing::debug!(
        "reconciled {} items: {} added, {} updated, {} removed",
        keys.len(),
        added.len(),
        updated.len(),
        removed.len()
    );

    TransitionState {
        first: state.first && added.is_empty(),
        changed: !added.is_empty() || !updated.is_empty() || !removed.is_empty(),
        transitions,
        prev_keys: keys,
        prev_items: items,
        ..state
    }
}

/// Put left records back next to the neighbours they had. Records whose
/// neighbours left too wait for a later pass; when a pass places nothing, the
/// rest are appended in order.
pub fn reconcile_deleted<T: Clone>(
    deleted: &[DeletedRecord<T>],
    current: Vec<TransitionRecord<T>>,
) -> Vec<TransitionRecord<T>> {
    let mut out = current;
    let mut pending: VecDeque<&DeletedRecord<T>> = deleted.iter().collect();

    while !pending.is_empty() {
        let mut deferred = VecDeque::new();
        let before = pending.len();
        for d in pending {
            let slot = out.iter().enumerate().rev().find_map(|(j, t)| {
                if d.right.as_deref() == Some(t.original_key.as_str()) {
                    Some(j)
                } else if d.left.as_deref() == Some(t.original_key.as_str()) {
                    Some(j + 1)
                } else {
                    None
                }
            });
            match slot {
                Some(index) => out.insert(index, d.record.clone()),
                None => deferred.push_back(d),
            }
        }
        if deferred.len() == before {
            out.extend(deferred.into_iter().map(|d| d.record.clone()));
            break;
        }
        pending = deferred;
    }
    out
}

// ============================================================================
// Driver
// ============================================================================

/// A rendered item with the controller animating it
#[derive(Clone, Debug)]
pub struct TransitionItem<T> {
    pub key: String,
    pub item: T,
    pub phase: Phase,
    pub controller: Controller,
}

struct TransitionInner<T> {
    state: TransitionState<T>,
    instances: IndexMap<String, Controller>,
}

/// Keyed list of animated items
pub struct Transition<T> {
    scheduler: SchedulerHandle,
    props: TransitionProps<T>,
    inner: Rc<RefCell<TransitionInner<T>>>,
}

impl<T: Clone + 'static> Transition<T> {
    pub fn new(scheduler: &AnimationScheduler, props: TransitionProps<T>) -> Self {
        Self::with_handle(scheduler.handle(), props)
    }

    pub fn with_handle(scheduler: SchedulerHandle, props: TransitionProps<T>) -> Self {
        Self {
            scheduler,
            props,
            inner: Rc::new(RefCell::new(TransitionInner {
                state: TransitionState::new(),
                instances: IndexMap::new(),
            })),
        }
    }

    pub fn props(&self) -> &TransitionProps<T> {
        &self.props
    }

    pub fn props_mut(&mut self) -> &mut TransitionProps<T> {
        &mut self.props
    }

    /// Reconcile `items` and hand every changed record to its controller
    pub fn update(&mut self, items: &[T]) -> &Self {
        let work = {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;
            let state = std::mem::take(&mut inner.state);
            inner.state = reconcile(state, items, &self.props);
            if !inner.state.changed {
                return self;
            }

            let mut work = Vec::with_capacity(inner.state.transitions.len());
            for record in &inner.state.transitions {
                let controller = match inner.instances.get(&record.key) {
                    Some(controller) => controller.clone(),
                    None => match Controller::from_handle(&self.scheduler) {
                        Ok(controller) => {
                            inner.instances.insert(record.key.clone(), controller.clone());
                            controller
                        }
                        Err(err) => {
                            tracing::warn!("cannot animate transition item {:?}: {}", record.key, err);
                            continue;
                        }
                    },
                };
                work.push((record.clone(), controller));
            }
            work
        };

        for (record, controller) in work {
            let request = self.item_request(&record);
            controller.update(request);
            if !self.props.paused {
                controller.start();
            }
        }
        self.props.reset = false;
        self
    }

    /// Attach the per-item callbacks to a record's request
    fn item_request(&self, record: &TransitionRecord<T>) -> UpdateRequest {
        let mut request = record.request.clone();
        let phase = record.phase;

        let inner = Rc::downgrade(&self.inner);
        let key = record.key.clone();
        let item = record.item.clone();
        let destroyed = record.destroyed;
        let deferred = self.props.paused || self.props.lazy;
        let on_rest = self.props.on_rest.clone();
        let on_destroyed = self.props.on_destroyed.clone();
        request = request.on_rest(move |values| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if destroyed {
                if !deferred {
                    clean_up(&inner, Some(&key));
                }
                if let Some(on_destroyed) = &on_destroyed {
                    on_destroyed(&item);
                }
            }
            let settled = {
                let state = inner.borrow();
                !state.state.deleted.is_empty() && state.instances.values().all(Controller::is_idle)
            };
            if settled && deferred {
                clean_up(&inner, None);
            }
            if let Some(on_rest) = &on_rest {
                on_rest(&item, phase, values);
            }
        });

        if let Some(on_frame) = self.props.on_frame.clone() {
            let item = record.item.clone();
            request = request.on_frame(move |values| on_frame(&item, phase, values));
        }

        if let Some(on_start) = self.props.on_start.clone() {
            let item = record.item.clone();
            let started = Cell::new(false);
            request = request.on_start(move |key| {
                if !started.replace(true) {
                    on_start(&item, phase, key);
                }
            });
        }
        request
    }

    /// Items in render order, left items included
    pub fn transitions(&self) -> Vec<TransitionItem<T>> {
        let inner = self.inner.borrow();
        inner
            .state
            .transitions
            .iter()
            .filter_map(|record| {
                inner.instances.get(&record.key).map(|controller| TransitionItem {
                    key: record.key.clone(),
                    item: record.item.clone(),
                    phase: record.phase,
                    controller: controller.clone(),
                })
            })
            .collect()
    }

    pub fn state(&self) -> std::cell::Ref<'_, TransitionState<T>> {
        std::cell::Ref::map(self.inner.borrow(), |inner| &inner.state)
    }

    pub fn controllers(&self) -> Vec<Controller> {
        self.inner.borrow().instances.values().cloned().collect()
    }

    /// Start every controller; used when the transition is paused
    pub fn start(&self) -> &Self {
        for controller in self.controllers() {
            controller.start();
        }
        self
    }

    /// Like [`start`](Self::start); `on_end` runs once every controller has
    /// resolved, with whether all of them finished
    pub fn start_with(&self, on_end: impl FnOnce(bool) + 'static) -> &Self {
        let controllers = self.controllers();
        if controllers.is_empty() {
            on_end(true);
            return self;
        }
        let join = Rc::new(Join::new(controllers.len(), on_end));
        for controller in controllers {
            let join = join.clone();
            controller.start_with(move |finished| join.done(finished));
        }
        self
    }

    pub fn stop(&self, finished: bool) -> &Self {
        for controller in self.controllers() {
            controller.stop_with(finished);
        }
        self
    }

    /// Destroy every controller and forget every item
    pub fn destroy(&self) {
        let instances = match self.inner.try_borrow_mut() {
            Ok(mut inner) => {
                inner.state = TransitionState::new();
                std::mem::take(&mut inner.instances)
            }
            Err(_) => {
                tracing::warn!("transition destroyed while reconciling");
                return;
            }
        };
        for controller in instances.values() {
            controller.destroy();
        }
    }
}

impl<T> Drop for Transition<T> {
    fn drop(&mut self) {
        let instances = match self.inner.try_borrow_mut() {
            Ok(mut inner) => std::mem::take(&mut inner.instances),
            Err(_) => return,
        };
        for controller in instances.values() {
            controller.destroy();
        }
    }
}

impl<T> fmt::Debug for Transition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Transition")
            .field("items", &inner.state.transitions.len())
            .field("deleted", &inner.state.deleted.len())
            .field("instances", &inner.instances.len())
            .finish()
    }
}

/// Remove left items and destroy their controllers
fn clean_up<T>(inner: &Rc<RefCell<TransitionInner<T>>>, key: Option<&str>) {
    let controllers: Vec<Controller> = {
        let mut inner = inner.borrow_mut();
        let removed = inner.state.clean_up(key);
        removed
            .iter()
            .filter_map(|key| inner.instances.shift_remove(key))
            .collect()
    };
    for controller in controllers {
        tracing::debug!("transition item controller {} cleaned up", controller.id());
        controller.destroy();
    }
}

/// Resolves once `count` callbacks have come in
pub(crate) struct Join {
    left: Cell<usize>,
    finished: Cell<bool>,
    on_end: RefCell<Option<Box<dyn FnOnce(bool)>>>,
}

impl Join {
    pub(crate) fn new(count: usize, on_end: impl FnOnce(bool) + 'static) -> Self {
        Self {
            left: Cell::new(count),
            finished: Cell::new(true),
            on_end: RefCell::new(Some(Box::new(on_end))),
        }
    }

    pub(crate) fn done(&self, finished: bool) {
        self.finished.set(self.finished.get() && finished);
        let left = self.left.get().saturating_sub(1);
        self.left.set(left);
        if left == 0 {
            let on_end = self.on_end.borrow_mut().take();
            if let Some(on_end) = on_end {
                on_end(self.finished.get());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Clock, ManualClock};
    use sprig_core::value_map;

    fn keys<T>(state: &TransitionState<T>) -> Vec<&str> {
        state.transitions.iter().map(|t| t.original_key.as_str()).collect()
    }

    fn fade() -> TransitionProps<&'static str> {
        TransitionProps::new(|item: &&str| item.to_string())
            .from(|_, _| value_map([("opacity", 0.0)]))
            .enter(|_, _| UpdateRequest::new().to([("opacity", 1.0)]))
            .leave(|_, _| UpdateRequest::new().to([("opacity", 0.0)]))
    }

    fn delay_of(record: &TransitionRecord<&str>) -> f64 {
        match record.request.delay {
            Some(Delay::Ms(ms)) => ms,
            _ => panic!("no fixed delay"),
        }
    }

    fn setup() -> (AnimationScheduler, ManualClock) {
        let clock = ManualClock::new();
        (AnimationScheduler::with_clock(Clock::Manual(clock.clone())), clock)
    }

    fn pump(scheduler: &AnimationScheduler, clock: &ManualClock) {
        let mut frames = 0;
        while scheduler.take_frame_request() {
            clock.advance(16.0);
            scheduler.update();
            frames += 1;
            assert!(frames < 10_000);
        }
    }

    #[test]
    fn test_enter_with_trail() {
        let props = fade().trail(100.0);
        let state = reconcile(TransitionState::new(), &["a", "b", "c"], &props);

        assert!(state.changed);
        assert!(!state.first);
        assert_eq!(keys(&state), ["a", "b", "c"]);
        let delays: Vec<f64> = state.transitions.iter().map(delay_of).collect();
        assert_eq!(delays, [0.0, 100.0, 200.0]);
        assert!(state.transitions.iter().all(|t| t.phase == Phase::Enter));
        assert_eq!(state.transitions[0].request.from, Some(value_map([("opacity", 0.0)])));
    }

    #[test]
    fn test_unchanged_items_are_idempotent() {
        let props = fade();
        let state = reconcile(TransitionState::new(), &["a", "b"], &props);
        let before: Vec<String> = state.transitions.iter().map(|t| t.key.clone()).collect();

        let state = reconcile(state, &["a", "b"], &props);
        assert!(!state.changed);
        let after: Vec<String> = state.transitions.iter().map(|t| t.key.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_removed_item_keeps_its_place() {
        let props = fade();
        let state = reconcile(TransitionState::new(), &["a", "b", "c"], &props);
        let state = reconcile(state, &["a", "c"], &props);

        assert_eq!(keys(&state), ["a", "b", "c"]);
        let deleted = &state.deleted[0];
        assert_eq!(deleted.left.as_deref(), Some("a"));
        assert_eq!(deleted.right.as_deref(), Some("c"));
        assert_eq!(deleted.record.phase, Phase::Leave);
        assert!(deleted.record.destroyed);
    }

    #[test]
    fn test_neighbours_removed_together() {
        let props = fade();
        let state = reconcile(TransitionState::new(), &["a", "b", "c", "d"], &props);
        let state = reconcile(state, &["a", "d"], &props);
        assert_eq!(keys(&state), ["a", "b", "c", "d"]);

        let state = reconcile(state, &["c2"], &props);
        assert_eq!(state.transitions.len(), 5);
    }

    #[test]
    fn test_everything_removed_falls_back_to_order() {
        let props = fade();
        let state = reconcile(TransitionState::new(), &["a", "b", "c"], &props);
        let state = reconcile(state, &[], &props);
        assert_eq!(keys(&state), ["a", "b", "c"]);
        assert!(state.current.is_empty());
    }

    #[test]
    fn test_initial_replaces_from_once() {
        let props = fade().initial(|_, _| value_map([("opacity", 0.5)]));
        let state = reconcile(TransitionState::new(), &["a"], &props);
        assert_eq!(state.transitions[0].phase, Phase::Initial);
        assert_eq!(state.transitions[0].request.from, Some(value_map([("opacity", 0.5)])));

        let state = reconcile(state, &["a", "b"], &props);
        assert_eq!(state.transitions[1].phase, Phase::Enter);
        assert_eq!(state.transitions[1].request.from, Some(value_map([("opacity", 0.0)])));
    }

    #[test]
    fn test_update_phase_and_order() {
        let props = fade()
            .update(|_, _| UpdateRequest::new().to([("opacity", 0.8)]))
            .order(vec![Phase::Update, Phase::Enter])
            .trail(10.0);
        let state = reconcile(TransitionState::new(), &["a"], &props);
        let state = reconcile(state, &["a", "b"], &props);

        assert!(state.changed);
        assert_eq!(state.transitions[0].phase, Phase::Update);
        assert_eq!(delay_of(&state.transitions[0]), 0.0);
        assert_eq!(delay_of(&state.transitions[1]), 10.0);
    }

    #[test]
    fn test_producer_delay_overrides_trail() {
        let props = TransitionProps::new(|item: &&str| item.to_string())
            .enter(|_, i| UpdateRequest::new().to([("x", 1.0)]).delay(i as f64 * 7.0))
            .trail(100.0);
        let state = reconcile(TransitionState::new(), &["a", "b"], &props);
        assert_eq!(delay_of(&state.transitions[1]), 7.0);
    }

    #[test]
    fn test_guid_keys_unless_unique() {
        let props = fade();
        let state = reconcile(TransitionState::new(), &["a"], &props);
        let state = reconcile(state, &[], &props);
        let state = reconcile(state, &["a"], &props);
        // the leaving twin is still there
        assert_eq!(state.transitions.len(), 2);
        assert_ne!(state.transitions[0].key, state.transitions[1].key);

        let props = fade().unique(true);
        let state = reconcile(TransitionState::new(), &["a"], &props);
        let state = reconcile(state, &[], &props);
        let state = reconcile(state, &["a"], &props);
        assert_eq!(state.transitions.len(), 1);
        assert_eq!(state.transitions[0].key, "a");
        assert!(state.deleted.is_empty());
    }

    #[test]
    fn test_reset_forgets_current() {
        let mut props = fade();
        let state = reconcile(TransitionState::new(), &["a"], &props);
        props.reset = true;
        let state = reconcile(state, &["a"], &props);
        assert!(state.changed);
        assert_eq!(state.transitions.len(), 1);
        assert!(state.deleted.is_empty());
    }

    #[test]
    fn test_duplicate_keys_keep_first() {
        let state = reconcile(TransitionState::new(), &["a", "a", "b"], &fade());
        assert_eq!(keys(&state), ["a", "b"]);
    }

    #[test]
    fn test_phase_order_from_json() {
        let order: Vec<Phase> = serde_json::from_str(r#"["leave", "enter", "update"]"#).unwrap();
        assert_eq!(order, [Phase::Leave, Phase::Enter, Phase::Update]);
        assert_eq!(Phase::Initial.to_string(), "initial");
    }

    #[test]
    fn test_left_items_are_cleaned_up_at_rest() {
        let (scheduler, clock) = setup();
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let sink = destroyed.clone();
        let mut list = Transition::new(
            &scheduler,
            fade().on_destroyed(move |item: &&str| sink.borrow_mut().push(item.to_string())),
        );

        list.update(&["a", "b", "c"]);
        pump(&scheduler, &clock);
        let b = list.transitions()[1].controller.clone();
        assert_eq!(b.get_values()["opacity"].as_number(), Some(1.0));

        list.update(&["a", "c"]);
        assert_eq!(list.transitions().len(), 3);
        pump(&scheduler, &clock);

        let keys: Vec<&str> = list.transitions().iter().map(|t| t.item).collect();
        assert_eq!(keys, ["a", "c"]);
        assert_eq!(*destroyed.borrow(), ["b"]);
        assert!(b.is_destroyed());
        assert_eq!(list.controllers().len(), 2);
    }

    #[test]
    fn test_unique_readd_reuses_controller() {
        let (scheduler, clock) = setup();
        let mut list = Transition::new(&scheduler, fade().unique(true));

        list.update(&["a", "b", "c"]);
        pump(&scheduler, &clock);
        let b = list.transitions()[1].controller.clone();

        list.update(&["a", "c"]);
        {
            let state = list.state();
            assert_eq!(state.deleted[0].left.as_deref(), Some("a"));
            assert_eq!(state.deleted[0].right.as_deref(), Some("c"));
        }
        clock.advance(16.0);
        scheduler.update();
        assert!(!b.is_idle());

        list.update(&["a", "b", "c"]);
        let items = list.transitions();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].controller, b);
        assert_eq!(items[1].phase, Phase::Enter);
        assert_eq!(list.controllers().len(), 3);

        pump(&scheduler, &clock);
        assert!(!b.is_destroyed());
        assert_eq!(b.get_values()["opacity"].as_number(), Some(1.0));
        assert_eq!(list.transitions().len(), 3);
    }

    #[test]
    fn test_paused_waits_for_start() {
        let (scheduler, clock) = setup();
        let rested = Rc::new(RefCell::new(Vec::new()));
        let sink = rested.clone();
        let mut list = Transition::new(
            &scheduler,
            fade()
                .paused(true)
                .on_rest(move |item: &&str, phase, _| sink.borrow_mut().push((item.to_string(), phase))),
        );
        list.update(&["a", "b"]);
        assert!(list.controllers().iter().all(|c| c.queue_len() == 1));
        assert!(!scheduler.is_active());

        let ended = Rc::new(Cell::new(None));
        let end = ended.clone();
        list.start_with(move |finished| end.set(Some(finished)));
        pump(&scheduler, &clock);

        assert_eq!(ended.get(), Some(true));
        assert_eq!(
            *rested.borrow(),
            [("a".to_string(), Phase::Enter), ("b".to_string(), Phase::Enter)]
        );
    }

    #[test]
    fn test_lazy_cleans_up_when_all_idle() {
        let (scheduler, clock) = setup();
        let mut list = Transition::new(&scheduler, fade().lazy(true));
        list.update(&["a", "b"]);
        pump(&scheduler, &clock);

        list.update(&["b"]);
        pump(&scheduler, &clock);
        assert_eq!(list.transitions().len(), 1);
        assert!(list.state().deleted.is_empty());
    }

    #[test]
    fn test_on_start_once_per_item() {
        let (scheduler, clock) = setup();
        let starts = Rc::new(RefCell::new(Vec::new()));
        let sink = starts.clone();
        let mut list = Transition::new(
            &scheduler,
            TransitionProps::new(|item: &&str| item.to_string())
                .from(|_, _| value_map([("x", 0.0), ("y", 0.0)]))
                .enter(|_, _| UpdateRequest::new().to([("x", 1.0), ("y", 1.0)]))
                .on_start(move |item: &&str, phase, _key| sink.borrow_mut().push((item.to_string(), phase))),
        );
        list.update(&["a"]);
        pump(&scheduler, &clock);
        assert_eq!(*starts.borrow(), [("a".to_string(), Phase::Enter)]);
    }

    #[test]
    fn test_destroy_releases_controllers() {
        let (scheduler, _clock) = setup();
        let mut list = Transition::new(&scheduler, fade());
        list.update(&["a", "b"]);
        let controllers = list.controllers();
        list.destroy();
        assert!(controllers.iter().all(Controller::is_destroyed));
        assert!(list.transitions().is_empty());
        assert!(scheduler.graph().borrow().is_empty());
    }
}
