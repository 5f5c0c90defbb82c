//! Opening and closing the claw of a gripper end bone.

use std::time::Duration;

use easing_function::{easings::StandardEasing, Easing};

use crate::Actuators;

/// Tuning for [`GripperAnimator`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GripperConfig {
    /// How long moving the claw from fully closed to fully open takes.
    pub full_travel_seconds: f32,
    /// The easing applied to claw moves.
    pub easing: StandardEasing,
}

impl Default for GripperConfig {
    fn default() -> Self {
        Self {
            full_travel_seconds: 1.,
            easing: StandardEasing::Linear,
        }
    }
}

/// Tweens the claw opening from where it is to a desired opening.
#[derive(Debug, Clone, PartialEq)]
pub struct GripperAnimator {
    from: f32,
    to: f32,
    duration: Duration,
    elapsed: Duration,
    easing: StandardEasing,
    finished: bool,
}

impl GripperAnimator {
    /// Returns an animator moving the claw from `from` to `to`.
    ///
    /// The duration is proportional to the distance travelled.
    #[must_use]
    pub fn new(from: f32, to: f32, config: &GripperConfig) -> Self {
        let seconds = (to - from).abs() * config.full_travel_seconds.max(0.);
        Self {
            from,
            to,
            duration: Duration::try_from_secs_f32(seconds).unwrap_or(if seconds.is_nan() {
                Duration::ZERO
            } else {
                Duration::MAX
            }),
            elapsed: Duration::ZERO,
            easing: config.easing,
            finished: false,
        }
    }

    /// Returns the opening this animator moves to.
    #[must_use]
    pub const fn target(&self) -> f32 {
        self.to
    }

    /// Returns true once the claw has arrived or the animator was stopped.
    #[must_use]
    pub const fn has_finished(&self) -> bool {
        self.finished
    }

    /// Advances the claw by `elapsed`. Returns false once the claw has
    /// arrived.
    pub fn tick<A>(&mut self, elapsed: Duration, actuators: &mut A) -> bool
    where
        A: Actuators + ?Sized,
    {
        if self.finished {
            return false;
        }

        self.elapsed = self.elapsed.saturating_add(elapsed);
        let percent = if self.duration.is_zero() {
            1.
        } else {
            (self.elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.)
        };
        let factor = self.easing.ease(percent);
        actuators.set_claw_opening(self.from + (self.to - self.from) * factor);

        if percent >= 1. {
            tracing::debug!(opening = self.to, "claw finished moving");
            self.finished = true;
        }
        !self.finished
    }

    /// Leaves the claw where it currently is.
    pub fn emergency_stop(&mut self) {
        self.finished = true;
    }
}

#[test]
fn claw_reaches_target() {
    let chain = crate::planar_chain(&[1.]);
    let mut actuators = crate::SimulatedActuators::for_chain(&chain);
    let mut animator = GripperAnimator::new(1., 0.5, &GripperConfig::default());

    assert!(animator.tick(Duration::from_millis(250), &mut actuators));
    approx::assert_abs_diff_eq!(actuators.claw_opening(), 0.5, epsilon = 0.3);
    assert!(actuators.claw_opening() < 1.);

    assert!(!animator.tick(Duration::from_millis(250), &mut actuators));
    assert!(animator.has_finished());
    approx::assert_abs_diff_eq!(actuators.claw_opening(), 0.5, epsilon = 1e-5);
}

#[test]
fn stopped_claw_stays_put() {
    let chain = crate::planar_chain(&[1.]);
    let mut actuators = crate::SimulatedActuators::for_chain(&chain);
    let mut animator = GripperAnimator::new(1., 0., &GripperConfig::default());

    animator.tick(Duration::from_millis(100), &mut actuators);
    let opening = actuators.claw_opening();
    animator.emergency_stop();
    assert!(!animator.tick(Duration::from_millis(100), &mut actuators));
    approx::assert_abs_diff_eq!(actuators.claw_opening(), opening);
}

#[test]
fn extreme_travel_times() {
    let chain = crate::planar_chain(&[1.]);
    let mut actuators = crate::SimulatedActuators::for_chain(&chain);

    let slow = GripperConfig {
        full_travel_seconds: 1e30,
        ..GripperConfig::default()
    };
    let mut animator = GripperAnimator::new(1., 0., &slow);
    assert!(animator.tick(Duration::from_secs(60), &mut actuators));
    assert!(!animator.tick(Duration::MAX, &mut actuators));
    approx::assert_abs_diff_eq!(actuators.claw_opening(), 0.);

    // No distance at an infinite rate is no time at all.
    let endless = GripperConfig {
        full_travel_seconds: f32::INFINITY,
        ..GripperConfig::default()
    };
    let mut animator = GripperAnimator::new(0.5, 0.5, &endless);
    assert!(!animator.tick(Duration::ZERO, &mut actuators));
    approx::assert_abs_diff_eq!(actuators.claw_opening(), 0.5);
}
