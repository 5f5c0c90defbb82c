//! Cyclic coordinate descent over a [`KinematicsChain`] snapshot.
//!
//! A [`CcdSolver`] is a resumable session: each call to
//! [`CcdSolver::solve`] spends a bounded number of iterations and reports
//! whether it needs to be called again.

use std::time::{Duration, Instant};

use crate::{Angle, Bone, ChainError, ConstraintValidator, JointId, KinematicsChain, Vector};

/// The state of a solve after a call to [`CcdSolver::solve`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Outcome {
    /// The iteration budget for this call ran out. Call again.
    Processing,
    /// The target could not be reached within the total iteration budget.
    Failure,
    /// The end effector is within tolerance of the target, in a valid
    /// configuration.
    Success,
}

/// Tuning for [`CcdSolver`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SolverConfig {
    /// How many iterations a [`RobotArm`](crate::RobotArm) spends per tick.
    pub iterations_per_tick: usize,
    /// How many iterations a session may spend in total before failing.
    pub max_iterations: usize,
    /// The end effector distance below which the target counts as reached.
    pub tolerance: f32,
    /// How many times a rejected joint change is halved before the joint is
    /// left where it was.
    pub max_bisections: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations_per_tick: 100,
            max_iterations: 1000,
            tolerance: 0.01,
            max_bisections: 4,
        }
    }
}

/// An inverse-kinematics session moving the end effector of a private chain
/// snapshot toward a target point.
///
/// Joints are adjusted one at a time from the end effector toward the root.
/// One pass over all joints is one iteration. Each joint is turned by the
/// rotation that points the end effector at the target, clamped to the
/// joint's [`MovementRange`](crate::MovementRange) and travelling only
/// through angles the range allows. When that rotation is refused, the joint
/// is turned again with the last joint counter-rotating to keep the end
/// bone's heading.
///
/// A change that turns a valid configuration into an invalid one is halved
/// toward the previous angle until it becomes valid, and undone if it never
/// does. While the configuration is still invalid, changes are kept so the
/// solver can search its way out.
pub struct CcdSolver<V = Box<dyn ConstraintValidator>> {
    chain: KinematicsChain,
    target: Vector,
    validator: V,
    config: SolverConfig,
    joints: Vec<JointId>,
    valid: bool,
    iterations: usize,
    elapsed: Duration,
    outcome: Option<Outcome>,
}

impl<V> CcdSolver<V>
where
    V: ConstraintValidator,
{
    /// Returns a new session that solves `chain` toward `target`.
    ///
    /// Fails if `chain` is malformed or has no end effector.
    pub fn new(
        mut chain: KinematicsChain,
        target: Vector,
        validator: V,
        config: SolverConfig,
    ) -> Result<Self, ChainError> {
        chain.apply_forward_kinematics()?;
        if chain.end_effector().is_none() {
            return Err(ChainError::Empty);
        }
        let joints = chain
            .links()?
            .into_iter()
            .rev()
            .map(|(joint, _)| joint)
            .collect();
        let valid = !validator.is_invalid_configuration(&chain);
        Ok(Self {
            chain,
            target,
            validator,
            config,
            joints,
            valid,
            iterations: 0,
            elapsed: Duration::ZERO,
            outcome: None,
        })
    }

    /// Runs at most `max_iterations` iterations and reports the state of the
    /// session.
    ///
    /// Once a terminal [`Outcome`] has been returned, further calls return it
    /// again without doing any work.
    pub fn solve(&mut self, max_iterations: usize) -> Outcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }

        let started = Instant::now();
        let outcome = self.run(max_iterations);
        self.elapsed += started.elapsed();

        if outcome != Outcome::Processing {
            tracing::debug!(
                ?outcome,
                iterations = self.iterations,
                distance = self.distance_to_target(),
                elapsed = ?self.elapsed,
                "ccd session finished"
            );
            self.outcome = Some(outcome);
        }
        outcome
    }

    fn run(&mut self, budget: usize) -> Outcome {
        if self.has_converged() {
            return Outcome::Success;
        }
        for _ in 0..budget {
            if self.iterations >= self.config.max_iterations {
                return Outcome::Failure;
            }
            if let Err(err) = self.iterate() {
                tracing::error!(%err, "chain became malformed while solving");
                return Outcome::Failure;
            }
            self.iterations += 1;
            if self.has_converged() {
                return Outcome::Success;
            }
        }

        if self.iterations >= self.config.max_iterations {
            Outcome::Failure
        } else {
            Outcome::Processing
        }
    }

    fn has_converged(&self) -> bool {
        self.valid && self.distance_to_target() < self.config.tolerance
    }

    fn iterate(&mut self) -> Result<(), ChainError> {
        for index in 0..self.joints.len() {
            self.adjust_joint(self.joints[index])?;
        }
        Ok(())
    }

    fn adjust_joint(&mut self, id: JointId) -> Result<(), ChainError> {
        let Some(end) = self.chain.end_effector() else {
            return Ok(());
        };
        let pivot = self.chain[id].position();
        // A joint sitting on the end effector or the target has no preferred
        // direction.
        if let Some(delta) = (end - pivot).angle_to(self.target - pivot) {
            if self.rotate(id, delta, None)? {
                return Ok(());
            }
        }

        // Swinging the whole arm also swings the gripper's heading, which the
        // approach check may refuse. Try again while the terminal joint keeps
        // the heading fixed, aiming the wrist so the end lands on the target.
        let Some(terminal) = self.chain.end_bone().map(Bone::joint_a) else {
            return Ok(());
        };
        if terminal == id {
            return Ok(());
        }
        let wrist = self.chain[terminal].position();
        let Some(delta) = (wrist - pivot).angle_to(self.target - (end - wrist) - pivot) else {
            return Ok(());
        };
        self.rotate(id, delta, Some(terminal))?;
        Ok(())
    }

    /// Turns `id` by up to `delta` degrees, counter-rotating `compensate` by
    /// the same amount. Returns whether a change was kept.
    fn rotate(
        &mut self,
        id: JointId,
        delta: f32,
        compensate: Option<JointId>,
    ) -> Result<bool, ChainError> {
        let previous = self.chain[id].orientation();
        let range = self.chain[id].range();
        let step = range.travel(previous, range.clamp(previous + Angle::degrees(delta)));
        if step.abs() <= f32::EPSILON {
            return Ok(false);
        }
        let counterpart = compensate.map(|joint| {
            (
                joint,
                self.chain[joint].orientation(),
                self.chain[joint].range(),
            )
        });

        let mut step = step;
        for _ in 0..=self.config.max_bisections {
            let candidate = previous + Angle::degrees(step);
            let counter = counterpart
                .map(|(joint, angle, range)| (joint, angle + Angle::degrees(-step), range));
            if range.contains(candidate)
                && counter.map_or(true, |(_, angle, range)| range.contains(angle))
            {
                self.chain[id].set_orientation(candidate);
                if let Some((joint, angle, _)) = counter {
                    self.chain[joint].set_orientation(angle);
                }
                self.chain.apply_forward_kinematics()?;
                if !self.validator.is_invalid_configuration(&self.chain) {
                    self.valid = true;
                    return Ok(true);
                } else if !self.valid {
                    return Ok(true);
                }
            }
            step /= 2.;
        }

        self.chain[id].set_orientation(previous);
        if let Some((joint, angle, _)) = counterpart {
            self.chain[joint].set_orientation(angle);
        }
        self.chain.apply_forward_kinematics()?;
        Ok(false)
    }

    /// Returns the distance between the end effector and the target.
    #[must_use]
    pub fn distance_to_target(&self) -> f32 {
        self.chain
            .end_effector()
            .map_or(f32::INFINITY, |end| end.distance(self.target))
    }

    /// Returns the chain being solved.
    #[must_use]
    pub const fn chain(&self) -> &KinematicsChain {
        &self.chain
    }

    /// Returns the point the end effector is being moved to.
    #[must_use]
    pub const fn target(&self) -> Vector {
        self.target
    }

    /// Returns the total number of iterations performed so far.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    /// Returns the wall-clock time spent inside [`solve()`](Self::solve).
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Returns the terminal outcome, if the session has finished.
    #[must_use]
    pub const fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Consumes the session, returning the solved chain.
    #[must_use]
    pub fn into_chain(self) -> KinematicsChain {
        self.chain
    }
}

#[cfg(test)]
fn solve_to_completion<V: ConstraintValidator>(solver: &mut CcdSolver<V>) -> (Outcome, usize) {
    let mut calls = 0;
    loop {
        calls += 1;
        let outcome = solver.solve(10);
        if outcome != Outcome::Processing || calls > 1000 {
            return (outcome, calls);
        }
    }
}

#[test]
fn reaches_reachable_target() {
    let chain = crate::planar_chain(&[1., 1., 1.]);
    let target = Vector::new(1.5, 1.);
    let mut solver = CcdSolver::new(
        chain,
        target,
        crate::validator::Unconstrained,
        SolverConfig::default(),
    )
    .unwrap();

    let (outcome, calls) = solve_to_completion(&mut solver);
    assert_eq!(outcome, Outcome::Success);
    assert!(calls < 100);
    assert!(solver.distance_to_target() < SolverConfig::default().tolerance);
    assert!(solver.iterations() < SolverConfig::default().max_iterations);
    // Terminal outcomes are sticky.
    assert_eq!(solver.solve(10), Outcome::Success);
}

#[test]
fn unreachable_target_fails() {
    let chain = crate::planar_chain(&[1., 1., 1.]);
    let config = SolverConfig {
        max_iterations: 50,
        ..SolverConfig::default()
    };
    let mut solver = CcdSolver::new(
        chain,
        Vector::new(5., 5.),
        crate::validator::Unconstrained,
        config,
    )
    .unwrap();

    assert_eq!(solver.solve(10), Outcome::Processing);
    let (outcome, _) = solve_to_completion(&mut solver);
    assert_eq!(outcome, Outcome::Failure);
    assert_eq!(solver.iterations(), 50);
}

#[test]
fn always_invalid_terminates() {
    let chain = crate::planar_chain(&[1., 1., 1.]);
    let config = SolverConfig {
        max_iterations: 20,
        ..SolverConfig::default()
    };
    let mut solver = CcdSolver::new(
        chain,
        Vector::new(1., 1.),
        crate::validator::Predicate(|_: &KinematicsChain| true),
        config,
    )
    .unwrap();

    let (outcome, _) = solve_to_completion(&mut solver);
    assert_eq!(outcome, Outcome::Failure);
    assert!(solver.chain().end_effector().unwrap().x.is_finite());
}

#[test]
fn rejected_changes_keep_configuration_valid() {
    let mut chain = crate::planar_chain(&[1., 1.]);
    chain.set_base_position(Vector::new(0., 0.5)).unwrap();
    let ground = crate::validator::GroundPlane { height: 0. };
    let config = SolverConfig {
        max_iterations: 100,
        ..SolverConfig::default()
    };
    let mut solver = CcdSolver::new(chain, Vector::new(1.5, -0.5), ground, config).unwrap();

    let (outcome, _) = solve_to_completion(&mut solver);
    assert_eq!(outcome, Outcome::Failure);
    for node in solver.chain().nodes().unwrap() {
        assert!(node.lowest_point() >= 0., "{} went below ground", node.label());
    }
}

#[test]
fn solved_angles_respect_ranges() {
    let mut chain = crate::planar_chain(&[1., 1., 1.]);
    let limited = crate::MovementRange::new(270., 90.);
    for label in ["joint 1", "joint 2"] {
        let joint = chain.find_joint_by_label(label).unwrap();
        chain[joint].set_range(limited);
    }
    let mut solver = CcdSolver::new(
        chain,
        Vector::new(-0.5, 0.5),
        crate::validator::Unconstrained,
        SolverConfig::default(),
    )
    .unwrap();

    solve_to_completion(&mut solver);
    for joint in solver.chain().joints() {
        assert!(
            joint.range().contains(joint.orientation()),
            "{} at {} is outside {}",
            joint.label(),
            joint.orientation(),
            joint.range()
        );
    }
}

#[test]
fn already_at_target_succeeds_without_iterating() {
    let chain = crate::planar_chain(&[1., 1.]);
    let mut solver = CcdSolver::new(
        chain,
        Vector::new(2., 0.),
        crate::validator::Unconstrained,
        SolverConfig::default(),
    )
    .unwrap();
    assert_eq!(solver.solve(0), Outcome::Success);
    assert_eq!(solver.iterations(), 0);
}

#[test]
fn steps_travel_inside_range() {
    let mut chain = KinematicsChain::default();
    let joint = chain.add_joint("joint", Angle::degrees(20.)).unwrap();
    chain
        .add_bone("bone", joint, None, crate::BoneKind::Rigid { length: 1. })
        .unwrap();
    chain[joint].set_range(crate::MovementRange::new(10., 350.));
    let target = Vector::from_angle(Angle::degrees(340.));

    // Below y = -0.2 is refused, so the full step is halved once.
    let validator = crate::validator::Predicate(|c: &KinematicsChain| {
        c.end_effector().map_or(true, |end| end.y < -0.2)
    });
    let mut solver =
        CcdSolver::new(chain.create_copy(), target, validator, SolverConfig::default()).unwrap();
    assert_eq!(solver.solve(1), Outcome::Processing);
    approx::assert_abs_diff_eq!(
        solver.chain()[joint].orientation().to_degrees(),
        180.,
        epsilon = 1e-3
    );

    let mut solver = CcdSolver::new(
        chain,
        target,
        crate::validator::Unconstrained,
        SolverConfig::default(),
    )
    .unwrap();
    let (outcome, _) = solve_to_completion(&mut solver);
    assert_eq!(outcome, Outcome::Success);
    let solved = &solver.chain()[joint];
    assert!(solved.range().contains(solved.orientation()));
}
