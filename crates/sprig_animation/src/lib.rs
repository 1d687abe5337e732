//! sprig animation
//!
//! Frame-by-frame animation on top of `sprig_core`.
//!
//! # Features
//!
//! - **Integrator**: springs stepped at 1ms, timed tweens and momentum decay
//! - **Scheduler**: an explicit frameloop value with host timers and a manual
//!   or callback tick source
//! - **Controllers**: per-entity state machines that queue, delay and diff
//!   update requests by timestamp, so out-of-order completions are safe
//! - **Async Scripts**: request chains and continuation scripts, cancelled
//!   when superseded
//! - **Transitions**: keyed item lists with enter/update/leave phases, trail
//!   staggering and stable placement of leaving items
//! - **Chaining**: start groups of controllers in sequence or on time steps
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

pub mod chain;
pub mod config;
pub mod controller;
pub mod error;
pub mod integrator;
pub mod request;
pub mod scheduler;
pub mod script;
pub mod transition;

pub use chain::{chain, ChainGroup, DEFAULT_TIME_FRAME};
pub use config::{SpringConfig, Velocity};
pub use controller::{Controller, ControllerId, WeakController};
pub use error::{AnimationError, Result};
pub use integrator::{Integrator, Step, MAX_CATCH_UP_MS};
pub use request::{Cancel, ConfigSource, Delay, Immediate, Target, UpdateRequest};
pub use scheduler::{
    AnimationScheduler, Clock, FrameRequest, ManualClock, SchedulerHandle, TimerId,
};
pub use script::{AsyncTo, Script, ScriptHandle};
pub use transition::{
    reconcile, reconcile_deleted, DeletedRecord, Phase, Transition, TransitionItem,
    TransitionProps, TransitionRecord, TransitionState,
};
