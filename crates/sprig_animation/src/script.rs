//! Async scripts
//!
//! An async target drives a controller through a sequence of updates instead
//! of a single goal. There is no language-level suspension here: every step
//! is scheduled with a continuation that runs once the step comes to rest.
//!
//! ```
//! use sprig_animation::{AnimationScheduler, Controller, UpdateRequest};
//!
//! let scheduler = AnimationScheduler::new();
//! let controller = Controller::new(&scheduler);
//! controller
//!     .update(UpdateRequest::new().from([("x", 0.0)]).script(|s| {
//!         s.next(UpdateRequest::new().to([("x", 1.0)]), |s| {
//!             s.last(UpdateRequest::new().to([("x", 0.0)]))
//!         })
//!     }))
//!     .start();
//! ```
//!
//! A script is cancelled when its controller is stopped wholesale or
//! destroyed, or when another script becomes the controller's async target.
//! Cancelled continuations are dropped and further [`ScriptHandle::next`]
//! calls fail with [`AnimationError::Cancelled`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::controller::{Controller, RunEnd, WeakController};
use crate::error::{AnimationError, Result};
use crate::request::{same_rc, Cancel, Target, UpdateRequest};

/// User function driving a controller
pub type Script = Rc<dyn Fn(&ScriptHandle) -> Result<()>>;

/// An async target
#[derive(Clone)]
pub enum AsyncTo {
    Chain(Rc<[UpdateRequest]>),
    Script(Script),
}

impl AsyncTo {
    /// Identity, not structural equality
    pub fn same(&self, other: &AsyncTo) -> bool {
        match (self, other) {
            (AsyncTo::Chain(a), AsyncTo::Chain(b)) => same_rc(a, b),
            (AsyncTo::Script(a), AsyncTo::Script(b)) => same_rc(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for AsyncTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncTo::Chain(steps) => write!(f, "Chain({} steps)", steps.len()),
            AsyncTo::Script(_) => f.write_str("Script(..)"),
        }
    }
}

struct ScriptRun {
    controller: WeakController,
    generation: u64,
    target: AsyncTo,
    /// Steps scheduled but not yet resolved, plus the script body itself
    outstanding: Cell<usize>,
    on_end: RefCell<Option<RunEnd>>,
}

impl ScriptRun {
    fn is_cancelled(&self) -> bool {
        let Some(controller) = self.controller.upgrade() else {
            return true;
        };
        if controller.generation() != self.generation {
            return true;
        }
        match &self.target {
            AsyncTo::Script(_) => !controller
                .async_target()
                .is_some_and(|current| current.same(&self.target)),
            AsyncTo::Chain(_) => false,
        }
    }

    fn step_done(&self) {
        let left = self.outstanding.get().saturating_sub(1);
        self.outstanding.set(left);
        if left == 0 {
            let on_end = self.on_end.borrow_mut().take();
            if let Some(on_end) = on_end {
                on_end(!self.is_cancelled());
            }
        }
    }
}

/// Handle passed to scripts and their continuations
#[derive(Clone)]
pub struct ScriptHandle {
    run: Rc<ScriptRun>,
}

impl ScriptHandle {
    /// Queue `request` on the controller; `then` runs once it comes to rest.
    pub fn next<F>(&self, request: UpdateRequest, then: F) -> Result<()>
    where
        F: FnOnce(&ScriptHandle) -> Result<()> + 'static,
    {
        if self.run.is_cancelled() {
            return Err(AnimationError::Cancelled);
        }
        let controller = self.run.controller.upgrade().ok_or(AnimationError::Destroyed)?;

        self.run.outstanding.set(self.run.outstanding.get() + 1);
        let run = self.run.clone();
        controller.update(request).start_with(move |_finished| {
            if !run.is_cancelled() {
                let handle = ScriptHandle { run: run.clone() };
                report(then(&handle));
            }
            run.step_done();
        });
        Ok(())
    }

    /// Queue a final step
    pub fn last(&self, request: UpdateRequest) -> Result<()> {
        self.next(request, |_| Ok(()))
    }

    /// Stop every animation of the controller, cancelling this script
    pub fn stop(&self) {
        if let Some(controller) = self.run.controller.upgrade() {
            controller.stop();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.run.is_cancelled()
    }

    pub fn controller(&self) -> Option<Controller> {
        self.run.controller.upgrade()
    }
}

impl fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("target", &self.run.target)
            .field("outstanding", &self.run.outstanding.get())
            .field("cancelled", &self.run.is_cancelled())
            .finish()
    }
}

fn report(result: Result<()>) {
    if let Err(err) = result {
        if !err.is_cancelled() {
            tracing::error!("async animation failed: {}", err);
        }
    }
}

fn chain_step(handle: &ScriptHandle, steps: Rc<[UpdateRequest]>, index: usize) -> Result<()> {
    let Some(step) = steps.get(index).cloned() else {
        return Ok(());
    };
    handle.next(step, move |handle| chain_step(handle, steps, index + 1))
}

/// Run a request whose `to` is an async target
pub(crate) fn run_async(controller: &Controller, mut request: UpdateRequest, on_end: RunEnd) {
    let Some(Target::Async(target)) = request.to.take() else {
        on_end(false);
        return;
    };

    // everything besides the target applies right away
    if controller.diff(&request) {
        controller.animate(&request);
    }

    if request.cancel == Some(Cancel::All) {
        controller.clear_async_target();
        on_end(false);
        return;
    }

    let timestamp = request.timestamp.unwrap_or_default();
    if !controller.diff_async_target(&target, timestamp) {
        on_end(false);
        return;
    }

    tracing::debug!("controller {} running {:?}", controller.id(), target);
    let run = Rc::new(ScriptRun {
        controller: controller.downgrade(),
        generation: controller.generation(),
        target: target.clone(),
        outstanding: Cell::new(1),
        on_end: RefCell::new(Some(on_end)),
    });
    let handle = ScriptHandle { run: run.clone() };
    match target {
        AsyncTo::Chain(steps) => report(chain_step(&handle, steps, 0)),
        AsyncTo::Script(script) => report(script(&handle)),
    }
    run.step_done();
}
