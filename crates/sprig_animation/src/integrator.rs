//! Per-tick motion
//!
//! An [`Integrator`] advances one scalar toward its goal. Springs are stepped
//! with semi-implicit Euler in fixed 1ms sub-steps; tweens and decays are
//! closed-form functions of the time since the animation started.
//!
//! Times are milliseconds on the scheduler clock.

use sprig_core::{AnimatedValue, Easing};

use crate::config::SpringConfig;

/// Longest stretch of time a spring will catch up on after a stall
pub const MAX_CATCH_UP_MS: f64 = 64.0;

/// Decay rate per millisecond
const DECAY: f64 = 0.998;

/// Threshold under which a decaying value counts as stopped
const DECAY_REST: f64 = 0.1;

/// How a value moves toward its goal
#[derive(Clone, Debug)]
pub enum Integrator {
    Spring {
        tension: f64,
        friction: f64,
        mass: f64,
        precision: f64,
        clamp: bool,
    },
    Duration {
        duration: f64,
        easing: Easing,
    },
    Decay,
}

/// Result of advancing one value by one tick
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step {
    pub position: f64,
    pub finished: bool,
    /// For a decay, the position it came to rest at
    pub rest: Option<f64>,
    pub last_velocity: Option<f64>,
    pub last_time: Option<f64>,
}

impl Integrator {
    pub fn from_config(config: &SpringConfig) -> Self {
        if let Some(duration) = config.duration {
            Integrator::Duration {
                duration,
                easing: config.easing.clone(),
            }
        } else if config.decay {
            Integrator::Decay
        } else {
            Integrator::Spring {
                tension: config.tension,
                friction: config.friction,
                mass: config.mass,
                precision: config.precision,
                clamp: config.clamp,
            }
        }
    }

    /// Advance `state` to `time`.
    ///
    /// `from` is where the animation started, `to` the goal and `velocity`
    /// the configured initial velocity for this element.
    pub fn step(&self, state: &AnimatedValue, from: f64, to: f64, velocity: f64, time: f64) -> Step {
        let last_position = state.last_position.as_number().unwrap_or(from);
        match self {
            Integrator::Duration { duration, easing } => {
                let progress = (time - state.start_time) / duration;
                Step {
                    position: from + easing.apply(progress) * (to - from),
                    finished: time >= state.start_time + duration,
                    rest: None,
                    last_velocity: state.last_velocity,
                    last_time: state.last_time,
                }
            }
            Integrator::Decay => {
                let k = 1.0 - DECAY;
                let position =
                    from + velocity / k * (1.0 - (-k * (time - state.start_time)).exp());
                let finished = (last_position - position).abs() < DECAY_REST;
                Step {
                    position,
                    finished,
                    rest: finished.then_some(position),
                    last_velocity: state.last_velocity,
                    last_time: state.last_time,
                }
            }
            Integrator::Spring {
                tension,
                friction,
                mass,
                precision,
                clamp,
            } => {
                let mut last_time = state.last_time.unwrap_or(time);
                let mut velocity = state.last_velocity.unwrap_or(velocity);
                let mut position = last_position;

                if time - last_time > MAX_CATCH_UP_MS {
                    last_time = time - MAX_CATCH_UP_MS;
                }

                let steps = (time - last_time).floor().max(0.0) as u64;
                for _ in 0..steps {
                    let force = -tension * (position - to);
                    let damping = -friction * velocity;
                    let acceleration = (force + damping) / mass;
                    velocity += acceleration / 1000.0;
                    position += velocity / 1000.0;
                }

                let overshooting = *clamp
                    && *tension != 0.0
                    && if from < to { position > to } else { position < to };
                let resting = velocity.abs() <= *precision;
                let arrived = *tension == 0.0 || (to - position).abs() <= *precision;

                Step {
                    position,
                    finished: overshooting || (resting && arrived),
                    rest: None,
                    last_velocity: Some(velocity),
                    last_time: Some(time),
                }
            }
        }
    }

    pub fn is_spring(&self) -> bool {
        matches!(self, Integrator::Spring { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprig_core::Value;

    fn apply(state: &mut AnimatedValue, step: &Step) {
        state.value = Value::from(step.position);
        state.last_position = Value::from(step.position);
        state.last_velocity = step.last_velocity;
        state.last_time = step.last_time;
    }

    /// Step at ~60fps until finished, returning (frames, final position)
    fn run(integrator: &Integrator, from: f64, to: f64, velocity: f64) -> (usize, f64) {
        let mut state = AnimatedValue::new(Value::from(from));
        state.reset(false, 0.0);
        let mut time = 0.0;
        for frame in 1..5000 {
            time += 16.0;
            let step = integrator.step(&state, from, to, velocity, time);
            apply(&mut state, &step);
            if step.finished {
                return (frame, step.rest.unwrap_or(step.position));
            }
        }
        panic!("animation never finished");
    }

    #[test]
    fn test_default_spring_converges() {
        let integrator = Integrator::from_config(&SpringConfig::default());
        let (frames, position) = run(&integrator, 0.0, 1.0, 0.0);
        assert!(frames < 200, "took {} frames", frames);
        assert!((position - 1.0).abs() <= 0.01);
    }

    #[test]
    fn test_first_tick_does_not_move() {
        let integrator = Integrator::from_config(&SpringConfig::default());
        let mut state = AnimatedValue::new(Value::from(0.0));
        state.reset(false, 100.0);
        let step = integrator.step(&state, 0.0, 1.0, 0.0, 100.0);
        assert_eq!(step.position, 0.0);
        assert_eq!(step.last_time, Some(100.0));
    }

    #[test]
    fn test_clamp_stops_at_goal() {
        let integrator = Integrator::from_config(&SpringConfig::wobbly().clamp(true));
        let mut state = AnimatedValue::new(Value::from(0.0));
        state.reset(false, 0.0);
        let mut time = 0.0;
        loop {
            time += 16.0;
            let step = integrator.step(&state, 0.0, 10.0, 0.0, time);
            apply(&mut state, &step);
            if step.finished {
                assert!(step.position > 10.0);
                break;
            }
            assert!(step.position <= 10.0);
        }
    }

    #[test]
    fn test_stall_catch_up_is_capped() {
        let integrator = Integrator::from_config(&SpringConfig::default());
        let mut state = AnimatedValue::new(Value::from(0.0));
        state.last_time = Some(0.0);

        let stalled = integrator.step(&state, 0.0, 1.0, 0.0, 10_000.0);
        let capped = integrator.step(&state, 0.0, 1.0, 0.0, MAX_CATCH_UP_MS);
        assert_eq!(stalled.position, capped.position);
    }

    #[test]
    fn test_zero_tension_settles_on_velocity() {
        let integrator = Integrator::from_config(&SpringConfig::new(0.0, 20.0));
        let (_, position) = run(&integrator, 0.0, 100.0, 1.0);
        // with no pull toward the goal only friction matters
        assert!(position > 0.0 && position < 100.0);
    }

    #[test]
    fn test_duration_tween() {
        let integrator = Integrator::from_config(&SpringConfig::default().duration(100.0));
        let mut state = AnimatedValue::new(Value::from(0.0));
        state.reset(false, 0.0);

        let half = integrator.step(&state, 0.0, 50.0, 0.0, 50.0);
        assert_eq!(half.position, 25.0);
        assert!(!half.finished);

        let end = integrator.step(&state, 0.0, 50.0, 0.0, 100.0);
        assert!(end.finished);
    }

    #[test]
    fn test_decay_coasts_and_stops() {
        let integrator = Integrator::from_config(&SpringConfig::default().decay());
        let (_, position) = run(&integrator, 0.0, 0.0, 0.5);
        // asymptote is v / (1 - 0.998)
        assert!(position > 200.0 && position < 250.0);
    }
}
