//! Per-joint motion execution.
//!
//! A [`JointController`] owns a FIFO queue of [`MoveTask`]s and at most one
//! running [`JointAnimator`]. Each tick it starts the next queued move once
//! the previous one has finished.

use std::collections::VecDeque;

use crate::{math, Actuators, Angle, JointId, MovementRange};

/// Tuning for [`JointAnimator`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ControllerConfig {
    /// The constant speed joints are driven at.
    pub speed_degrees_per_second: f32,
    /// The angular error below which a move is finished.
    pub epsilon_degrees: f32,
    /// The torque made available to a motor when a move starts.
    pub max_motor_torque: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            speed_degrees_per_second: 10.,
            epsilon_degrees: 0.5,
            max_motor_torque: 10_000.,
        }
    }
}

/// A queued request to move a joint to an orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveTask {
    desired: Angle,
}

impl MoveTask {
    /// Returns a task moving to `desired`.
    #[must_use]
    pub const fn new(desired: Angle) -> Self {
        Self { desired }
    }

    /// Returns the orientation this task moves to.
    #[must_use]
    pub const fn desired(&self) -> Angle {
        self.desired
    }
}

/// Drives one joint to a desired orientation at constant speed.
///
/// On its first tick the animator picks the direction of rotation and starts
/// the motor. That is the shorter direction unless the joint's
/// [`MovementRange`] only allows the longer one. On every later tick it stops the motor once the joint is
/// within the deadband of the desired orientation. There is no easing: the
/// joint moves at full speed until it is stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct JointAnimator {
    joint: JointId,
    desired: Angle,
    range: MovementRange,
    config: ControllerConfig,
    motor_started: bool,
}

impl JointAnimator {
    /// Returns an animator moving `joint` to `desired`.
    #[must_use]
    pub const fn new(joint: JointId, desired: Angle, config: ControllerConfig) -> Self {
        Self {
            joint,
            desired,
            range: MovementRange::UNRESTRICTED,
            config,
            motor_started: false,
        }
    }

    /// Keeps the joint inside `range` while it travels.
    #[must_use]
    pub const fn with_range(mut self, range: MovementRange) -> Self {
        self.range = range;
        self
    }

    /// Returns the orientation this animator moves to.
    #[must_use]
    pub const fn desired(&self) -> Angle {
        self.desired
    }

    /// Advances the animation. Returns false once the joint has arrived and
    /// the motor has been stopped.
    pub fn tick<A>(&mut self, actuators: &mut A) -> bool
    where
        A: Actuators + ?Sized,
    {
        let current = Angle::from_box2d(actuators.joint_angle(self.joint));
        let error = current.delta_to(self.desired);

        if !self.motor_started {
            let speed = if self.range.travel(current, self.desired) < 0. {
                -self.config.speed_degrees_per_second
            } else {
                self.config.speed_degrees_per_second
            };
            actuators.set_max_motor_torque(self.joint, self.config.max_motor_torque);
            actuators.enable_limit(self.joint, false);
            tracing::debug!(
                joint = ?self.joint,
                from = %current,
                to = %self.desired,
                degrees_per_second = speed,
                "starting joint motor"
            );
            actuators.set_motor_speed(self.joint, math::degrees_to_radians(speed));
            actuators.enable_motor(self.joint, true);
            self.motor_started = true;
            return true;
        }

        if error.abs() < self.config.epsilon_degrees {
            actuators.set_motor_speed(self.joint, 0.);
            tracing::debug!(
                joint = ?self.joint,
                actual = %current,
                desired = %self.desired,
                "joint finished moving"
            );
            return false;
        }
        true
    }
}

/// The motion state of a [`JointController`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum MotionState {
    /// Nothing queued and nothing running.
    Idle,
    /// Moves are queued but none is running.
    Queued,
    /// A move is running.
    Active,
}

/// Executes queued moves for a single joint, one at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct JointController {
    joint: JointId,
    range: MovementRange,
    config: ControllerConfig,
    tasks: VecDeque<MoveTask>,
    animator: Option<JointAnimator>,
}

impl JointController {
    /// Returns an idle controller for `joint`.
    #[must_use]
    pub const fn new(joint: JointId, config: ControllerConfig) -> Self {
        Self {
            joint,
            range: MovementRange::UNRESTRICTED,
            config,
            tasks: VecDeque::new(),
            animator: None,
        }
    }

    /// Returns this controller, moving its joint only through `range`.
    #[must_use]
    pub fn with_range(mut self, range: MovementRange) -> Self {
        self.range = range;
        self
    }

    /// Returns the joint this controller moves.
    #[must_use]
    pub const fn joint(&self) -> JointId {
        self.joint
    }

    /// Queues a move to `desired`.
    pub fn add_task(&mut self, desired: Angle) {
        self.tasks.push_back(MoveTask::new(desired));
    }

    /// Returns the moves that have not started yet, oldest first.
    pub fn pending_tasks(&self) -> impl Iterator<Item = &MoveTask> {
        self.tasks.iter()
    }

    /// Returns the orientation the running move is heading to.
    #[must_use]
    pub fn active_target(&self) -> Option<Angle> {
        self.animator.as_ref().map(JointAnimator::desired)
    }

    /// Returns the current motion state.
    #[must_use]
    pub fn state(&self) -> MotionState {
        match (&self.animator, self.tasks.is_empty()) {
            (Some(_), _) => MotionState::Active,
            (None, false) => MotionState::Queued,
            (None, true) => MotionState::Idle,
        }
    }

    /// Returns true if a move is running or queued.
    #[must_use]
    pub fn is_moving(&self) -> bool {
        self.state() != MotionState::Idle
    }

    /// Starts the next queued move if none is running, then advances the
    /// running move.
    pub fn tick<A>(&mut self, actuators: &mut A)
    where
        A: Actuators + ?Sized,
    {
        if self.animator.is_none() {
            if let Some(task) = self.tasks.pop_front() {
                self.animator = Some(
                    JointAnimator::new(self.joint, task.desired, self.config)
                        .with_range(self.range),
                );
            }
        }
        if let Some(animator) = &mut self.animator {
            if !animator.tick(actuators) {
                self.animator = None;
            }
        }
    }

    /// Drops every queued and running move and stops the motor immediately.
    pub fn emergency_stop<A>(&mut self, actuators: &mut A)
    where
        A: Actuators + ?Sized,
    {
        self.tasks.clear();
        self.animator = None;
        actuators.set_motor_speed(self.joint, 0.);
    }
}

#[cfg(test)]
fn single_joint() -> (JointId, crate::SimulatedActuators) {
    let chain = crate::planar_chain(&[1.]);
    let joint = chain.root().unwrap();
    (joint, crate::SimulatedActuators::for_chain(&chain))
}

#[test]
fn picks_shorter_direction() {
    let (joint, mut actuators) = single_joint();
    actuators.set_joint_angle(joint, math::degrees_to_radians(10.));
    let mut animator = JointAnimator::new(joint, Angle::degrees(350.), ControllerConfig::default());

    assert!(animator.tick(&mut actuators));
    // 20° clockwise through 0°, not 340° counter-clockwise.
    approx::assert_abs_diff_eq!(
        math::radians_to_degrees(actuators.motor_speed(joint)),
        -10.,
        epsilon = 1e-4
    );
}

#[test]
fn animator_stops_within_deadband() {
    let (joint, mut actuators) = single_joint();
    let mut animator = JointAnimator::new(joint, Angle::degrees(3.), ControllerConfig::default());
    let tick = std::time::Duration::from_secs_f32(1. / 60.);

    let mut ticks = 0;
    while animator.tick(&mut actuators) {
        actuators.step(tick);
        ticks += 1;
        assert!(ticks < 1000, "animator never finished");
    }
    approx::assert_abs_diff_eq!(actuators.motor_speed(joint), 0.);
    let reached = Angle::from_box2d(actuators.joint_angle(joint));
    assert!(reached.delta_to(Angle::degrees(3.)).abs() < 0.5);
}

#[test]
fn drains_tasks_in_order() {
    let (joint, mut actuators) = single_joint();
    let mut controller = JointController::new(joint, ControllerConfig::default());
    assert_eq!(controller.state(), MotionState::Idle);
    for desired in [20., 5., 12.] {
        controller.add_task(Angle::degrees(desired));
    }
    assert_eq!(controller.state(), MotionState::Queued);

    let tick = std::time::Duration::from_secs_f32(1. / 60.);
    let mut started = Vec::new();
    let mut ticks = 0;
    while controller.is_moving() {
        let before = controller.active_target();
        controller.tick(&mut actuators);
        if let Some(target) = controller.active_target() {
            if before != Some(target) {
                // The previous move must have fully arrived before this one
                // started.
                if let Some(previous) = started.last() {
                    let current = Angle::from_box2d(actuators.joint_angle(joint));
                    assert!(current.delta_to(*previous).abs() < 0.5);
                }
                started.push(target);
            }
        }
        actuators.step(tick);
        ticks += 1;
        assert!(ticks < 10_000, "controller never finished");
    }

    assert_eq!(
        started,
        [Angle::degrees(20.), Angle::degrees(5.), Angle::degrees(12.)]
    );
    assert_eq!(controller.state(), MotionState::Idle);
}

#[test]
fn emergency_stop_clears_everything() {
    let (joint, mut actuators) = single_joint();
    let mut controller = JointController::new(joint, ControllerConfig::default());
    for desired in [90., 180., 270., 45.] {
        controller.add_task(Angle::degrees(desired));
    }
    controller.tick(&mut actuators);
    assert_eq!(controller.state(), MotionState::Active);
    assert_eq!(controller.pending_tasks().count(), 3);
    assert!(actuators.motor_speed(joint) > 0.);

    controller.emergency_stop(&mut actuators);
    assert_eq!(controller.state(), MotionState::Idle);
    assert_eq!(controller.pending_tasks().count(), 0);
    assert!(controller.active_target().is_none());
    approx::assert_abs_diff_eq!(actuators.motor_speed(joint), 0.);
}

#[test]
fn travels_the_long_way_around_a_gap() {
    let (joint, mut actuators) = single_joint();
    actuators.set_joint_angle(joint, math::degrees_to_radians(20.));
    let range = MovementRange::new(10., 350.);
    let mut controller = JointController::new(joint, ControllerConfig::default()).with_range(range);
    controller.add_task(Angle::degrees(340.));

    controller.tick(&mut actuators);
    assert!(actuators.motor_speed(joint) > 0.);

    let tick = std::time::Duration::from_secs_f32(1. / 60.);
    let mut ticks = 0;
    while controller.is_moving() {
        actuators.step(tick);
        let current = Angle::from_box2d(actuators.joint_angle(joint));
        assert!(range.contains(current), "passed through {current}");
        controller.tick(&mut actuators);
        ticks += 1;
        assert!(ticks < 10_000, "controller never finished");
    }
    let reached = Angle::from_box2d(actuators.joint_angle(joint));
    assert!(reached.delta_to(Angle::degrees(340.)).abs() < 0.5);
}
