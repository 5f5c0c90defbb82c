//! Bundled arm descriptions and their on-disk format.

#[cfg(feature = "config")]
use std::{
    fs,
    io::{self, BufWriter},
    path::Path,
};

#[cfg(feature = "config")]
use tempfile::{NamedTempFile, PersistError};

use crate::controller::ControllerConfig;
use crate::gripper::GripperConfig;
use crate::validator::ConstraintConfig;
use crate::{Angle, BoneKind, ChainError, KinematicsChain, MovementRange, SolverConfig, Vector};

/// Where the root joint of the standard arm sits.
pub const STANDARD_BASE_POSITION: Vector = Vector::new(0., 0.5);
/// The length of the two long segments of the standard arm.
pub const STANDARD_SEGMENT_LENGTH: f32 = 1.;
/// The length of the gripper bone of the standard arm.
pub const STANDARD_GRIPPER_LENGTH: f32 = 0.25;
/// The width of the gripper base plate of the standard arm.
pub const STANDARD_BASE_PLATE_LENGTH: f32 = 0.4;
/// The length of each claw of the standard arm.
pub const STANDARD_CLAW_LENGTH: f32 = 0.3;
/// The range every joint past the shoulder of the standard arm is limited to.
pub const STANDARD_JOINT_RANGE: MovementRange = MovementRange::RIGHT_HALF;

/// A complete description of a [`RobotArm`](crate::RobotArm): its chain and
/// every tuning knob.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmConfig {
    /// The arm's joints and bones, in their starting pose.
    pub chain: KinematicsChain,
    /// Solver budgets and tolerances.
    #[cfg_attr(feature = "serde", serde(default))]
    pub solver: SolverConfig,
    /// Joint motor tuning.
    #[cfg_attr(feature = "serde", serde(default))]
    pub controller: ControllerConfig,
    /// The constraints solved configurations must satisfy.
    #[cfg_attr(feature = "serde", serde(default))]
    pub constraints: ConstraintConfig,
    /// Claw tuning.
    #[cfg_attr(feature = "serde", serde(default))]
    pub gripper: GripperConfig,
}

impl ArmConfig {
    /// Returns a configuration for `chain` with default tuning.
    #[must_use]
    pub fn new(chain: KinematicsChain) -> Self {
        Self {
            chain,
            solver: SolverConfig::default(),
            controller: ControllerConfig::default(),
            constraints: ConstraintConfig::default(),
            gripper: GripperConfig::default(),
        }
    }

    /// Returns the standard arm: an unrestricted shoulder, an upper arm, a
    /// forearm, a hand, and a gripper.
    ///
    /// The arm starts with the upper arm pointing up, the forearm and hand
    /// level, and the gripper pointing at the ground.
    pub fn standard() -> Result<Self, ChainError> {
        let mut chain = KinematicsChain::default();
        let shoulder = chain.add_joint("shoulder", Angle::degrees(90.))?;
        let elbow = chain.add_joint("elbow", Angle::degrees(270.))?;
        let wrist = chain.add_joint("wrist", Angle::ZERO)?;
        let claw = chain.add_joint("claw", Angle::degrees(270.))?;
        for joint in [elbow, wrist, claw] {
            chain[joint].set_range(STANDARD_JOINT_RANGE);
        }

        chain.add_bone(
            "upper arm",
            shoulder,
            Some(elbow),
            BoneKind::Rigid {
                length: STANDARD_SEGMENT_LENGTH,
            },
        )?;
        chain.add_bone(
            "forearm",
            elbow,
            Some(wrist),
            BoneKind::Rigid {
                length: STANDARD_SEGMENT_LENGTH,
            },
        )?;
        chain.add_bone(
            "hand",
            wrist,
            Some(claw),
            BoneKind::Rigid {
                length: STANDARD_SEGMENT_LENGTH / 2.,
            },
        )?;
        chain.add_bone(
            "gripper",
            claw,
            None,
            BoneKind::Gripper {
                length: STANDARD_GRIPPER_LENGTH,
                base_plate_length: STANDARD_BASE_PLATE_LENGTH,
                claw_length: STANDARD_CLAW_LENGTH,
            },
        )?;
        chain.set_base_position(STANDARD_BASE_POSITION)?;

        Ok(Self::new(chain))
    }
}

#[cfg(feature = "config")]
impl ArmConfig {
    /// Reads a configuration from an rsn file.
    pub fn read_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read(path)?;
        Ok(rsn::from_slice::<Self>(&contents)?)
    }

    /// Writes this configuration to `path` as pretty-printed rsn.
    ///
    /// The file is written next to its destination and moved into place, so
    /// an existing file is never left half-written.
    pub fn write_to(&self, path: &Path) -> Result<(), ConfigError> {
        let parent = path.parent().ok_or(ConfigError::InvalidPath)?;
        let mut temp_file = NamedTempFile::new_in(parent)?;
        let mut writer = BufWriter::new(temp_file.as_file_mut());
        rsn::ser::Config::pretty().serialize_to_writer(self, &mut writer)?;
        writer
            .into_inner()
            .map_err(io::IntoInnerError::into_error)?;
        temp_file.persist(path)?;

        Ok(())
    }
}

/// An error reading or writing an [`ArmConfig`].
#[cfg(feature = "config")]
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The file contents were not a valid configuration.
    #[error("{0}")]
    Rsn(rsn::de::Error),
    /// The path has no parent directory to write into.
    #[error("invalid file path")]
    InvalidPath,
}

#[cfg(feature = "config")]
impl From<rsn::de::Error> for ConfigError {
    fn from(err: rsn::de::Error) -> Self {
        Self::Rsn(err)
    }
}

#[cfg(feature = "config")]
impl From<PersistError> for ConfigError {
    fn from(err: PersistError) -> Self {
        Self::Io(err.error)
    }
}

#[test]
fn standard_arm_starts_valid() {
    use crate::ConstraintValidator;

    let config = ArmConfig::standard().unwrap();
    let chain = &config.chain;
    assert_eq!(chain.joints().len(), 4);
    approx::assert_abs_diff_eq!(chain.total_length(), 2.75, epsilon = 1e-5);

    let end = chain.end_effector().unwrap();
    approx::assert_abs_diff_eq!(end.x, 1.5, epsilon = 1e-5);
    approx::assert_abs_diff_eq!(end.y, 1.25, epsilon = 1e-5);
    assert!(!config
        .constraints
        .validator()
        .is_invalid_configuration(chain));

    for label in ["elbow", "wrist", "claw"] {
        let joint = chain.find_joint_by_label(label).unwrap();
        assert_eq!(chain[joint].range(), STANDARD_JOINT_RANGE);
    }
    let shoulder = chain.find_joint_by_label("shoulder").unwrap();
    assert!(chain[shoulder].range().is_unrestricted());
}

#[test]
#[cfg(feature = "config")]
fn config_file_round_trip() {
    let mut config = ArmConfig::standard().unwrap();
    config.solver.max_iterations = 250;
    config.constraints = ConstraintConfig::NONE;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arm.rsn");
    config.write_to(&path).unwrap();
    let read = ArmConfig::read_from(&path).unwrap();
    assert_eq!(read.solver, config.solver);
    assert_eq!(read.constraints, config.constraints);
    assert_eq!(read.chain.joints().len(), config.chain.joints().len());
    approx::assert_abs_diff_eq!(
        read.chain.end_effector().unwrap().y,
        config.chain.end_effector().unwrap().y,
        epsilon = 1e-5
    );

    std::fs::write(&path, "not an arm").unwrap();
    assert!(matches!(
        ArmConfig::read_from(&path),
        Err(ConfigError::Rsn(_))
    ));
}
