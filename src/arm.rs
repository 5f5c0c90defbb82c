//! The [`RobotArm`] orchestrator.
//!
//! A robot arm is advanced by calling [`RobotArm::tick`] once per frame. Each
//! tick runs, in order:
//!
//! 1. the active solve session, if any, dispatching its solution to the joint
//!    controllers once it succeeds,
//! 2. the gripper animator,
//! 3. every joint controller,
//! 4. a resynchronization of the chain from the actuators.

use std::time::Duration;

use crate::controller::{ControllerConfig, JointController};
use crate::gripper::{GripperAnimator, GripperConfig};
use crate::validator::ConstraintConfig;
use crate::{
    Actuators, Angle, ArmConfig, BoneKind, CcdSolver, ChainError, ConstraintValidator, JointId,
    KinematicsChain, Outcome, SolverConfig, Vector,
};

/// Notified exactly once when a solve session finishes, with the outcome and
/// the solved chain.
pub type CompletionCallback = Box<dyn FnOnce(Outcome, &KinematicsChain)>;

/// An error from a [`RobotArm`] request.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ArmError {
    /// The arm's chain is malformed.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Claw openings range from 0 (closed) to 1 (open).
    #[error("claw opening {0} is outside of 0..=1")]
    ClawOpening(f32),
    /// The end bone of the chain is not a gripper.
    #[error("the arm has no gripper")]
    NoGripper,
}

struct SolveSession {
    solver: CcdSolver,
    callback: CompletionCallback,
    solve_time: Duration,
}

/// A kinematic chain driven through a set of [`Actuators`].
pub struct RobotArm<A> {
    chain: KinematicsChain,
    actuators: A,
    controllers: Vec<JointController>,
    solver_config: SolverConfig,
    constraints: ConstraintConfig,
    gripper_config: GripperConfig,
    session: Option<SolveSession>,
    gripper: Option<GripperAnimator>,
}

impl<A> RobotArm<A>
where
    A: Actuators,
{
    /// Returns an arm moving `chain` with default tuning.
    pub fn new(chain: KinematicsChain, actuators: A) -> Result<Self, ChainError> {
        Self::from_config(ArmConfig::new(chain), actuators)
    }

    /// Returns an arm described by `config`.
    ///
    /// The chain is immediately synchronized with the angles reported by
    /// `actuators`.
    pub fn from_config(config: ArmConfig, actuators: A) -> Result<Self, ChainError> {
        let ArmConfig {
            mut chain,
            solver,
            controller,
            constraints,
            gripper,
        } = config;
        chain.sync_with_actuators(&actuators)?;
        if chain.end_effector().is_none() {
            return Err(ChainError::Empty);
        }
        let controllers = controllers_for(&chain, controller);

        Ok(Self {
            chain,
            actuators,
            controllers,
            solver_config: solver,
            constraints,
            gripper_config: gripper,
            session: None,
            gripper: None,
        })
    }

    /// Starts solving for a pose that places the end effector at `target`,
    /// subject to the configured constraints.
    ///
    /// Returns false without doing anything if the arm is still solving or
    /// moving. Otherwise `callback` is invoked exactly once when the session
    /// finishes or is cancelled.
    pub fn move_arm<F>(&mut self, target: Vector, callback: F) -> bool
    where
        F: FnOnce(Outcome, &KinematicsChain) + 'static,
    {
        let validator = self.constraints.validator();
        self.move_arm_with(target, validator, callback)
    }

    /// Starts solving for `target` like [`move_arm()`](Self::move_arm), but
    /// with a custom validator.
    pub fn move_arm_with<V, F>(&mut self, target: Vector, validator: V, callback: F) -> bool
    where
        V: ConstraintValidator + 'static,
        F: FnOnce(Outcome, &KinematicsChain) + 'static,
    {
        if !self.has_finished_moving() {
            tracing::info!(goal = ?target, "rejecting move while the arm is busy");
            return false;
        }
        if let Err(err) = self.chain.sync_with_actuators(&self.actuators) {
            tracing::error!(%err, "unable to synchronize chain before solving");
            return false;
        }

        let solver = match CcdSolver::new(
            self.chain.create_copy(),
            target,
            Box::new(validator) as Box<dyn ConstraintValidator>,
            self.solver_config,
        ) {
            Ok(solver) => solver,
            Err(err) => {
                tracing::error!(%err, "unable to start solving");
                return false;
            }
        };

        tracing::info!(goal = ?target, "solving for target");
        self.session = Some(SolveSession {
            solver,
            callback: Box::new(callback),
            solve_time: Duration::ZERO,
        });
        true
    }

    /// Queues a move of a single joint to `degrees`.
    ///
    /// Returns false if the arm is busy, the joint does not exist, or
    /// `degrees` is outside the joint's range.
    pub fn move_joint(&mut self, joint: JointId, degrees: f32) -> bool {
        if !self.has_finished_moving() {
            tracing::info!(?joint, degrees, "rejecting joint move while the arm is busy");
            return false;
        }
        self.queue_move(joint, Angle::degrees(degrees))
    }

    fn queue_move(&mut self, joint: JointId, desired: Angle) -> bool {
        let Some(range) = self.chain.joints().get(joint.index()).map(crate::Joint::range) else {
            return false;
        };
        let Some(controller) = self.controllers.get_mut(joint.index()) else {
            return false;
        };
        if !range.contains(desired) {
            return false;
        }
        controller.add_task(desired);
        true
    }

    /// Starts moving the claw to `opening`, from 0 (closed) to 1 (open).
    ///
    /// Returns `Ok(false)` if the claw is still moving.
    pub fn set_claw(&mut self, opening: f32) -> Result<bool, ArmError> {
        if !(0. ..=1.).contains(&opening) {
            return Err(ArmError::ClawOpening(opening));
        }
        if !matches!(
            self.chain.end_bone().map(crate::Bone::kind),
            Some(BoneKind::Gripper { .. })
        ) {
            return Err(ArmError::NoGripper);
        }
        if self.gripper.is_some() {
            return Ok(false);
        }

        tracing::info!(opening, "moving claw");
        self.gripper = Some(GripperAnimator::new(
            self.actuators.claw_opening(),
            opening,
            &self.gripper_config,
        ));
        Ok(true)
    }

    /// Stops all motion immediately.
    ///
    /// Queued and running joint moves are dropped, motors are commanded to
    /// stop, and the claw stays where it is. An unfinished solve session is
    /// cancelled and its callback receives [`Outcome::Failure`].
    pub fn emergency_stop(&mut self) {
        tracing::warn!("emergency stop");
        if let Some(mut gripper) = self.gripper.take() {
            gripper.emergency_stop();
        }
        for controller in &mut self.controllers {
            controller.emergency_stop(&mut self.actuators);
        }
        if let Some(session) = self.session.take() {
            (session.callback)(Outcome::Failure, session.solver.chain());
        }
    }

    /// Returns true if nothing is being solved and no joint is moving.
    #[must_use]
    pub fn has_finished_moving(&self) -> bool {
        self.session.is_none() && !self.controllers.iter().any(JointController::is_moving)
    }

    /// Returns true while a solve session is running.
    #[must_use]
    pub const fn is_solving(&self) -> bool {
        self.session.is_some()
    }

    /// Returns true while the claw is opening or closing.
    #[must_use]
    pub const fn is_claw_moving(&self) -> bool {
        self.gripper.is_some()
    }

    /// Advances the arm by one frame that lasted `elapsed`.
    pub fn tick(&mut self, elapsed: Duration) {
        let iterations = self.solver_config.iterations_per_tick.max(1);
        let outcome = self.session.as_mut().map(|session| {
            session.solve_time += elapsed;
            session.solver.solve(iterations)
        });
        if outcome.is_some_and(|outcome| outcome != Outcome::Processing) {
            if let Some(session) = self.session.take() {
                self.finish_session(session);
            }
        }

        if let Some(gripper) = &mut self.gripper {
            if !gripper.tick(elapsed, &mut self.actuators) {
                self.gripper = None;
            }
        }

        for controller in &mut self.controllers {
            controller.tick(&mut self.actuators);
        }

        if let Err(err) = self.chain.sync_with_actuators(&self.actuators) {
            tracing::error!(%err, "unable to synchronize chain");
        }
    }

    fn finish_session(&mut self, session: SolveSession) {
        let SolveSession {
            solver,
            callback,
            solve_time,
        } = session;
        let outcome = solver.outcome().unwrap_or(Outcome::Failure);

        if outcome == Outcome::Success {
            tracing::info!(
                goal = ?solver.target(),
                iterations = solver.iterations(),
                distance = solver.distance_to_target(),
                solver_time = ?solver.elapsed(),
                ?solve_time,
                "found a solution"
            );
            let solved = solver.chain();
            for joint in solved.joint_ids() {
                let desired = solved[joint].orientation();
                if !self.queue_move(joint, desired) {
                    tracing::error!(?joint, %desired, "unable to dispatch solved joint angle");
                }
            }
        } else {
            tracing::warn!(
                goal = ?solver.target(),
                iterations = solver.iterations(),
                distance = solver.distance_to_target(),
                ?solve_time,
                "no solution found"
            );
        }

        callback(outcome, solver.chain());
    }

    /// Returns the chain as last synchronized with the actuators.
    #[must_use]
    pub const fn chain(&self) -> &KinematicsChain {
        &self.chain
    }

    /// Returns the controller moving `joint`.
    #[must_use]
    pub fn controller(&self, joint: JointId) -> Option<&JointController> {
        self.controllers.get(joint.index())
    }

    /// Returns the actuators driving this arm.
    #[must_use]
    pub const fn actuators(&self) -> &A {
        &self.actuators
    }

    /// Returns exclusive access to the actuators driving this arm.
    pub fn actuators_mut(&mut self) -> &mut A {
        &mut self.actuators
    }
}

fn controllers_for(chain: &KinematicsChain, config: ControllerConfig) -> Vec<JointController> {
    chain
        .joint_ids()
        .map(|joint| JointController::new(joint, config).with_range(chain[joint].range()))
        .collect()
}

#[cfg(test)]
fn test_arm(lengths: &[f32]) -> RobotArm<crate::SimulatedActuators> {
    let chain = crate::planar_chain(lengths);
    let actuators = crate::SimulatedActuators::for_chain(&chain);
    let mut config = ArmConfig::new(chain);
    config.constraints = ConstraintConfig::NONE;
    RobotArm::from_config(config, actuators).unwrap()
}

#[cfg(test)]
const FRAME: Duration = Duration::from_nanos(16_666_667);

#[cfg(test)]
fn run_until_finished(arm: &mut RobotArm<crate::SimulatedActuators>) {
    let mut ticks = 0;
    loop {
        arm.tick(FRAME);
        arm.actuators_mut().step(FRAME);
        if arm.has_finished_moving() {
            break;
        }
        ticks += 1;
        assert!(ticks < 5000, "arm never finished moving");
    }
}

#[cfg(test)]
fn recorder() -> (
    std::rc::Rc<std::cell::RefCell<Vec<Outcome>>>,
    impl FnOnce(Outcome, &KinematicsChain) + 'static,
) {
    let outcomes = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let callback = {
        let outcomes = outcomes.clone();
        move |outcome: Outcome, _: &KinematicsChain| outcomes.borrow_mut().push(outcome)
    };
    (outcomes, callback)
}

#[test]
fn moves_end_effector_to_target() {
    let mut arm = test_arm(&[1., 1., 1.]);
    let target = Vector::new(1.5, 1.);
    let (outcomes, callback) = recorder();

    assert!(arm.move_arm(target, callback));
    assert!(arm.is_solving());
    run_until_finished(&mut arm);

    assert_eq!(*outcomes.borrow(), [Outcome::Success]);
    let end = arm.chain().end_effector().unwrap();
    assert!(end.distance(target) < 0.1, "ended at {end:?}");
}

#[test]
fn second_move_is_rejected() {
    let mut arm = test_arm(&[1., 1., 1.]);
    let (first, first_callback) = recorder();
    let (second, second_callback) = recorder();

    assert!(arm.move_arm(Vector::new(1., 1.5), first_callback));
    assert!(!arm.move_arm(Vector::new(2., 0.5), second_callback));
    run_until_finished(&mut arm);

    assert_eq!(first.borrow().len(), 1);
    assert!(second.borrow().is_empty());
}

#[test]
fn failed_solve_dispatches_nothing() {
    let mut arm = test_arm(&[1., 1.]);
    let (outcomes, callback) = recorder();

    assert!(arm.move_arm(Vector::new(10., 10.), callback));
    run_until_finished(&mut arm);

    assert_eq!(*outcomes.borrow(), [Outcome::Failure]);
    for joint in arm.chain().joint_ids() {
        approx::assert_abs_diff_eq!(arm.actuators().motor_speed(joint), 0.);
    }
    approx::assert_abs_diff_eq!(arm.chain().end_effector().unwrap().x, 2., epsilon = 1e-5);
}

#[test]
fn move_joint_checks_range() {
    let mut chain = crate::planar_chain(&[1., 1.]);
    let elbow = chain.find_joint_by_label("joint 1").unwrap();
    chain[elbow].set_range(crate::MovementRange::RIGHT_HALF);
    let actuators = crate::SimulatedActuators::for_chain(&chain);
    let mut arm = RobotArm::new(chain, actuators).unwrap();

    assert!(!arm.move_joint(elbow, 180.));
    assert!(arm.has_finished_moving());
    assert!(arm.move_joint(elbow, 30.));
    assert!(!arm.move_joint(elbow, 20.));
    run_until_finished(&mut arm);

    let reached = arm.chain()[elbow].orientation();
    assert!(reached.delta_to(Angle::degrees(30.)).abs() < 0.5);
}

#[test]
fn emergency_stop_cancels_solving() {
    let mut arm = test_arm(&[1., 1., 1.]);
    let (outcomes, callback) = recorder();

    assert!(arm.move_arm(Vector::new(1.5, 1.), callback));
    arm.emergency_stop();
    assert_eq!(*outcomes.borrow(), [Outcome::Failure]);
    assert!(!arm.is_solving());

    arm.tick(FRAME);
    assert!(arm.has_finished_moving());
    assert_eq!(outcomes.borrow().len(), 1);
}

#[test]
fn emergency_stop_halts_joints() {
    let mut arm = test_arm(&[1., 1.]);
    let root = arm.chain().root().unwrap();
    assert!(arm.move_joint(root, 90.));
    for _ in 0..10 {
        arm.tick(FRAME);
        arm.actuators_mut().step(FRAME);
    }
    assert!(arm.actuators().motor_speed(root) > 0.);

    arm.emergency_stop();
    assert!(arm.has_finished_moving());
    approx::assert_abs_diff_eq!(arm.actuators().motor_speed(root), 0.);
}

#[test]
fn claw_requests() {
    let mut arm = test_arm(&[1.]);
    assert_eq!(arm.set_claw(0.5), Err(ArmError::NoGripper));

    let config = ArmConfig::standard().unwrap();
    let actuators = crate::SimulatedActuators::for_chain(&config.chain);
    let mut arm = RobotArm::from_config(config, actuators).unwrap();
    assert_eq!(arm.set_claw(1.5), Err(ArmError::ClawOpening(1.5)));
    assert!(arm.set_claw(f32::NAN).is_err());

    assert_eq!(arm.set_claw(0.), Ok(true));
    assert_eq!(arm.set_claw(0.5), Ok(false));
    assert!(arm.is_claw_moving());
    for _ in 0..70 {
        arm.tick(FRAME);
    }
    approx::assert_abs_diff_eq!(arm.actuators().claw_opening(), 0.);
    assert!(!arm.is_claw_moving());
    assert_eq!(arm.set_claw(0.5), Ok(true));
}

#[test]
fn standard_arm_reaches_with_default_constraints() {
    for target in [
        Vector::new(1.2, 0.45),
        Vector::new(0.8, 1.2),
        Vector::new(1.8, 0.5),
    ] {
        let config = ArmConfig::standard().unwrap();
        let actuators = crate::SimulatedActuators::for_chain(&config.chain);
        let mut arm = RobotArm::from_config(config, actuators).unwrap();
        let (outcomes, callback) = recorder();

        assert!(arm.move_arm(target, callback));
        run_until_finished(&mut arm);

        assert_eq!(*outcomes.borrow(), [Outcome::Success], "solving for {target:?}");
        let end = arm.chain().end_effector().unwrap();
        assert!(end.distance(target) < 0.1, "ended at {end:?} for {target:?}");
    }
}

#[test]
fn zero_iterations_per_tick_still_solves() {
    let chain = crate::planar_chain(&[1., 1., 1.]);
    let actuators = crate::SimulatedActuators::for_chain(&chain);
    let mut config = ArmConfig::new(chain);
    config.constraints = ConstraintConfig::NONE;
    config.solver.iterations_per_tick = 0;
    let mut arm = RobotArm::from_config(config, actuators).unwrap();
    let (outcomes, callback) = recorder();

    assert!(arm.move_arm(Vector::new(1.5, 1.), callback));
    run_until_finished(&mut arm);
    assert_eq!(*outcomes.borrow(), [Outcome::Success]);
}
