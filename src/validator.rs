//! Predicates that reject solver-proposed chain configurations.

use crate::{KinematicsChain, Vector};

/// Decides whether a forward-solved chain configuration is unacceptable.
///
/// Implementations must be deterministic and free of side effects: the solver
/// may ask about the same configuration many times.
pub trait ConstraintValidator {
    /// Returns true if `chain` must not be used.
    fn is_invalid_configuration(&self, chain: &KinematicsChain) -> bool;
}

impl<T> ConstraintValidator for Box<T>
where
    T: ConstraintValidator + ?Sized,
{
    fn is_invalid_configuration(&self, chain: &KinematicsChain) -> bool {
        T::is_invalid_configuration(self, chain)
    }
}

/// Accepts every configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconstrained;

impl ConstraintValidator for Unconstrained {
    fn is_invalid_configuration(&self, _chain: &KinematicsChain) -> bool {
        false
    }
}

/// A validator backed by a closure.
#[derive(Debug, Clone, Copy)]
pub struct Predicate<F>(pub F);

impl<F> ConstraintValidator for Predicate<F>
where
    F: Fn(&KinematicsChain) -> bool,
{
    fn is_invalid_configuration(&self, chain: &KinematicsChain) -> bool {
        (self.0)(chain)
    }
}

/// Rejects configurations where any joint, bone, or claw dips below a
/// horizontal plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundPlane {
    /// The y coordinate of the plane.
    pub height: f32,
}

impl ConstraintValidator for GroundPlane {
    fn is_invalid_configuration(&self, chain: &KinematicsChain) -> bool {
        match chain.nodes() {
            Ok(nodes) => nodes
                .iter()
                .any(|node| node.lowest_point() < self.height),
            Err(_) => true,
        }
    }
}

/// Rejects configurations where the end bone points too far away from a
/// reference direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproachAngle {
    /// The direction the end bone should point in.
    pub direction: Vector,
    /// The largest allowed deviation from `direction`, in degrees.
    pub tolerance_degrees: f32,
}

impl ConstraintValidator for ApproachAngle {
    fn is_invalid_configuration(&self, chain: &KinematicsChain) -> bool {
        let Some(direction) = chain.end_bone().and_then(crate::Bone::direction) else {
            return true;
        };
        direction
            .angle_to(self.direction)
            .map_or(true, |deviation| deviation.abs() > self.tolerance_degrees)
    }
}

/// Rejects a configuration as soon as any of its checks does, in the order
/// the checks were added.
#[derive(Default)]
pub struct CompositeValidator {
    checks: Vec<Box<dyn ConstraintValidator>>,
}

impl CompositeValidator {
    /// Appends `check`. Add cheap checks first.
    #[must_use]
    pub fn with(mut self, check: impl ConstraintValidator + 'static) -> Self {
        self.push(check);
        self
    }

    /// Appends `check`.
    pub fn push(&mut self, check: impl ConstraintValidator + 'static) {
        self.checks.push(Box::new(check));
    }

    /// Returns the number of checks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns true if this validator has no checks and accepts everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl ConstraintValidator for CompositeValidator {
    fn is_invalid_configuration(&self, chain: &KinematicsChain) -> bool {
        self.checks
            .iter()
            .any(|check| check.is_invalid_configuration(chain))
    }
}

/// Which constraints a [`RobotArm`](crate::RobotArm) enforces while solving.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConstraintConfig {
    /// Nothing may go below this y coordinate.
    pub ground_height: Option<f32>,
    /// The direction the end bone must approach its target from.
    pub approach_direction: Vector,
    /// How far the end bone may deviate from `approach_direction`, in
    /// degrees. `None` disables the check.
    pub approach_tolerance_degrees: Option<f32>,
}

impl ConstraintConfig {
    /// A configuration that enforces nothing.
    pub const NONE: Self = Self {
        ground_height: None,
        approach_direction: Vector::new(0., -1.),
        approach_tolerance_degrees: None,
    };

    /// Builds the validator described by this configuration.
    #[must_use]
    pub fn validator(&self) -> CompositeValidator {
        let mut validator = CompositeValidator::default();
        if let Some(height) = self.ground_height {
            validator.push(GroundPlane { height });
        }
        if let Some(tolerance_degrees) = self.approach_tolerance_degrees {
            validator.push(ApproachAngle {
                direction: self.approach_direction,
                tolerance_degrees,
            });
        }
        validator
    }
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            ground_height: Some(0.),
            approach_direction: Vector::new(0., -1.),
            approach_tolerance_degrees: Some(5.),
        }
    }
}

#[test]
fn ground_plane() {
    let mut chain = crate::planar_chain(&[1., 1.]);
    let ground = GroundPlane { height: 0. };
    assert!(!ground.is_invalid_configuration(&chain));

    let root = chain.root().unwrap();
    chain[root].set_orientation(crate::Angle::degrees(-10.));
    chain.apply_forward_kinematics().unwrap();
    assert!(ground.is_invalid_configuration(&chain));
}

#[test]
fn approach_angle() {
    let mut chain = crate::planar_chain(&[1., 1.]);
    let approach = ApproachAngle {
        direction: Vector::new(0., -1.),
        tolerance_degrees: 5.,
    };
    assert!(approach.is_invalid_configuration(&chain));

    let elbow = chain.find_joint_by_label("joint 1").unwrap();
    chain[elbow].set_orientation(crate::Angle::degrees(274.));
    chain.apply_forward_kinematics().unwrap();
    assert!(!approach.is_invalid_configuration(&chain));

    chain[elbow].set_orientation(crate::Angle::degrees(264.));
    chain.apply_forward_kinematics().unwrap();
    assert!(approach.is_invalid_configuration(&chain));
}

#[test]
fn composite_short_circuits() {
    use std::{cell::Cell, rc::Rc};

    let calls = Rc::new(Cell::new(0));
    let counted = {
        let calls = calls.clone();
        Predicate(move |_: &KinematicsChain| {
            calls.set(calls.get() + 1);
            false
        })
    };
    let chain = crate::planar_chain(&[1.]);

    let rejecting = CompositeValidator::default()
        .with(Predicate(|_: &KinematicsChain| true))
        .with(counted.clone());
    assert!(rejecting.is_invalid_configuration(&chain));
    assert_eq!(calls.get(), 0);

    let accepting = CompositeValidator::default().with(Unconstrained).with(counted);
    assert!(!accepting.is_invalid_configuration(&chain));
    assert_eq!(calls.get(), 1);
}

#[test]
fn config_builds_checks_in_order() {
    assert_eq!(ConstraintConfig::default().validator().len(), 2);
    assert!(ConstraintConfig::NONE.validator().is_empty());
}
