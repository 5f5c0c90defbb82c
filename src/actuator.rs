//! The boundary between the kinematic model and the physical arm.
//!
//! Motion controllers only ever read a joint's live angle, command a signed
//! angular speed, and toggle the motor. Anything that can do that, such as a
//! physics-engine revolute joint or a servo bus, can drive a
//! [`RobotArm`](crate::RobotArm).

use std::time::Duration;

use crate::{JointId, KinematicsChain};

/// Motorized revolute joints and a gripper claw, addressed by [`JointId`].
///
/// Angles and speeds use the physics-engine convention: radians and radians
/// per second, unbounded.
pub trait Actuators {
    /// Returns the current angle of `joint` in radians.
    fn joint_angle(&self, joint: JointId) -> f32;
    /// Returns the speed last commanded for `joint` in radians per second.
    fn motor_speed(&self, joint: JointId) -> f32;
    /// Commands `joint` to rotate at `radians_per_second`.
    fn set_motor_speed(&mut self, joint: JointId, radians_per_second: f32);
    /// Enables or disables the motor of `joint`.
    fn enable_motor(&mut self, joint: JointId, enabled: bool);
    /// Sets the torque available to the motor of `joint`.
    fn set_max_motor_torque(&mut self, joint: JointId, torque: f32);
    /// Enables or disables the physical angle limits of `joint`.
    fn enable_limit(&mut self, joint: JointId, enabled: bool);
    /// Returns how far the gripper claw is open, from 0 (closed) to 1 (open).
    fn claw_opening(&self) -> f32;
    /// Moves the gripper claw to `opening`.
    fn set_claw_opening(&mut self, opening: f32);
}

/// The state of one simulated revolute joint.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SimulatedJoint {
    /// The joint angle in radians.
    pub angle: f32,
    /// The commanded speed in radians per second.
    pub motor_speed: f32,
    /// Whether the motor is driving the joint.
    pub motor_enabled: bool,
    /// The torque available to the motor.
    pub max_motor_torque: f32,
    /// Whether physical limits are enforced.
    pub limit_enabled: bool,
}

/// A massless stand-in for a physics engine: each motor rotates its joint at
/// exactly the commanded speed.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedActuators {
    joints: Vec<SimulatedJoint>,
    claw_opening: f32,
}

impl SimulatedActuators {
    /// Returns actuators whose joints start at the orientations of `chain`,
    /// with the claw fully open.
    #[must_use]
    pub fn for_chain(chain: &KinematicsChain) -> Self {
        Self {
            joints: chain
                .joints()
                .iter()
                .map(|joint| SimulatedJoint {
                    angle: joint.orientation().to_radians(),
                    ..SimulatedJoint::default()
                })
                .collect(),
            claw_opening: 1.,
        }
    }

    /// Returns the simulated state of `joint`.
    #[must_use]
    pub fn joint(&self, joint: JointId) -> Option<&SimulatedJoint> {
        self.joints.get(joint.index())
    }

    /// Teleports `joint` to `radians`.
    pub fn set_joint_angle(&mut self, joint: JointId, radians: f32) {
        if let Some(joint) = self.joints.get_mut(joint.index()) {
            joint.angle = radians;
        }
    }

    /// Advances every enabled motor by `elapsed`.
    pub fn step(&mut self, elapsed: Duration) {
        let seconds = elapsed.as_secs_f32();
        for joint in &mut self.joints {
            if joint.motor_enabled {
                joint.angle += joint.motor_speed * seconds;
            }
        }
    }
}

impl Actuators for SimulatedActuators {
    fn joint_angle(&self, joint: JointId) -> f32 {
        self.joint(joint).map_or(0., |joint| joint.angle)
    }

    fn motor_speed(&self, joint: JointId) -> f32 {
        self.joint(joint).map_or(0., |joint| joint.motor_speed)
    }

    fn set_motor_speed(&mut self, joint: JointId, radians_per_second: f32) {
        if let Some(joint) = self.joints.get_mut(joint.index()) {
            joint.motor_speed = radians_per_second;
        }
    }

    fn enable_motor(&mut self, joint: JointId, enabled: bool) {
        if let Some(joint) = self.joints.get_mut(joint.index()) {
            joint.motor_enabled = enabled;
        }
    }

    fn set_max_motor_torque(&mut self, joint: JointId, torque: f32) {
        if let Some(joint) = self.joints.get_mut(joint.index()) {
            joint.max_motor_torque = torque;
        }
    }

    fn enable_limit(&mut self, joint: JointId, enabled: bool) {
        if let Some(joint) = self.joints.get_mut(joint.index()) {
            joint.limit_enabled = enabled;
        }
    }

    fn claw_opening(&self) -> f32 {
        self.claw_opening
    }

    fn set_claw_opening(&mut self, opening: f32) {
        self.claw_opening = opening.clamp(0., 1.);
    }
}

#[test]
fn motors_integrate_speed() {
    let chain = crate::planar_chain(&[1., 1.]);
    let mut actuators = SimulatedActuators::for_chain(&chain);
    let elbow = chain.find_joint_by_label("joint 1").unwrap();

    actuators.set_motor_speed(elbow, 1.);
    actuators.step(Duration::from_secs(1));
    approx::assert_abs_diff_eq!(actuators.joint_angle(elbow), 0.);

    actuators.enable_motor(elbow, true);
    actuators.step(Duration::from_millis(500));
    approx::assert_abs_diff_eq!(actuators.joint_angle(elbow), 0.5);
}

#[test]
fn sync_pulls_live_angles_into_chain() {
    let mut chain = crate::planar_chain(&[1., 1.]);
    let mut actuators = SimulatedActuators::for_chain(&chain);
    let root = chain.root().unwrap();
    actuators.enable_motor(root, true);
    actuators.set_motor_speed(root, -std::f32::consts::FRAC_PI_2);
    actuators.step(Duration::from_secs(1));

    chain.sync_with_actuators(&actuators).unwrap();
    approx::assert_abs_diff_eq!(chain[root].orientation().to_degrees(), 270., epsilon = 1e-3);
    approx::assert_abs_diff_eq!(chain.end_effector().unwrap().y, -2., epsilon = 1e-5);
}
