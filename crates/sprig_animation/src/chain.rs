//! Chaining
//!
//! [`chain`] starts groups of controllers one after another. A group is
//! anything that can list its controllers: a single [`Controller`], a slice of
//! them, or a [`Transition`]. Groups are usually paused so their requests sit
//! in the controllers' queues until the chain releases them.
//!
//! With time steps every group starts at once, its queued requests pushed
//! back by `time_frame * time_steps[i]` milliseconds. Without, each group
//! starts when the previous one comes to rest.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::controller::{Controller, QueuedUpdate};
use crate::transition::{Join, Transition};

/// Milliseconds a time step of `1.0` stands for
pub const DEFAULT_TIME_FRAME: f64 = 1000.0;

/// Something that owns controllers
pub trait ChainGroup {
    fn controllers(&self) -> Vec<Controller>;
}

impl ChainGroup for Controller {
    fn controllers(&self) -> Vec<Controller> {
        vec![self.clone()]
    }
}

impl ChainGroup for [Controller] {
    fn controllers(&self) -> Vec<Controller> {
        self.to_vec()
    }
}

impl ChainGroup for Vec<Controller> {
    fn controllers(&self) -> Vec<Controller> {
        self.clone()
    }
}

impl<T: Clone + 'static> ChainGroup for Transition<T> {
    fn controllers(&self) -> Vec<Controller> {
        Transition::controllers(self)
    }
}

/// Start `groups` in sequence
pub fn chain(groups: &[&dyn ChainGroup], time_steps: Option<&[f64]>, time_frame: Option<f64>) {
    let time_frame = time_frame.unwrap_or(DEFAULT_TIME_FRAME);
    match time_steps {
        Some(steps) => chain_timed(groups, steps, time_frame),
        None => chain_sequential(groups),
    }
}

fn chain_timed(groups: &[&dyn ChainGroup], steps: &[f64], time_frame: f64) {
    let mut prev_delay = 0.0;
    for (i, group) in groups.iter().enumerate() {
        let controllers = group.controllers();
        if controllers.is_empty() {
            continue;
        }
        // missing steps reuse the previous delay
        let delay = match steps.get(i).map(|step| time_frame * step) {
            Some(delay) if delay.is_finite() => {
                prev_delay = delay;
                delay
            }
            _ => prev_delay,
        };
        tracing::debug!("chain group {} starts after {}ms", i, delay);
        for controller in controllers {
            controller.delay_queue(delay);
            controller.start();
        }
    }
}

/// Queued requests of one group, held back until the group's turn
struct Stage {
    controllers: Vec<Controller>,
    queues: Vec<Vec<QueuedUpdate>>,
}

fn chain_sequential(groups: &[&dyn ChainGroup]) {
    let stages: VecDeque<Stage> = groups
        .iter()
        .map(|group| group.controllers())
        .filter(|controllers| !controllers.is_empty())
        .map(|controllers| Stage {
            queues: controllers.iter().map(Controller::take_queue).collect(),
            controllers,
        })
        .collect();
    run_stage(Rc::new(RefCell::new(stages)));
}

fn run_stage(stages: Rc<RefCell<VecDeque<Stage>>>) {
    let Some(stage) = stages.borrow_mut().pop_front() else {
        return;
    };
    let count = stage.controllers.len();
    for (controller, queue) in stage.controllers.iter().zip(stage.queues) {
        controller.restore_queue(queue);
    }

    let join = Rc::new(Join::new(count, move |_finished| run_stage(stages)));
    for controller in stage.controllers {
        let join = join.clone();
        controller.start_with(move |finished| join.done(finished));
    }
}
