#![doc = include_str!(".crate-docs.md")]

use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt::{Debug, Display},
    ops::{Add, Deref, Div, Index, IndexMut, Mul, Neg, Sub},
    sync::Arc,
};

pub mod actuator;
pub mod arm;
pub mod config;
pub mod controller;
pub mod gripper;
pub mod math;
#[cfg(feature = "serde")]
mod serde;
pub mod solver;
pub mod validator;

pub use actuator::{Actuators, SimulatedActuators};
pub use arm::{ArmError, RobotArm};
pub use config::ArmConfig;
pub use solver::{CcdSolver, Outcome, SolverConfig};
pub use validator::ConstraintValidator;

/// A two dimensionsional offset/measurement.
#[derive(Default, Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct Vector {
    /// The x-axis component of this vector.
    pub x: f32,
    /// The y-axis component of this vector.
    pub y: f32,
}

impl Vector {
    /// Returns a new vector from the x and y values.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Returns a unit vector pointing in the direction of `angle`.
    ///
    /// An angle of 0° points along the positive x-axis, and angles increase
    /// counter-clockwise.
    #[must_use]
    pub fn from_angle(angle: Angle) -> Self {
        let radians = angle.to_radians();
        Self::new(radians.cos(), radians.sin())
    }

    /// Returns the magnitude of this vector.
    #[must_use]
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Returns the distance between `self` and `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (other - self).magnitude()
    }

    /// Returns the dot product of `self` and `other`.
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Returns the z component of the cross product of `self` and `other`.
    #[must_use]
    pub fn cross(self, other: Self) -> f32 {
        self.x * other.y - self.y * other.x
    }

    /// Returns this vector rotated by 90° counter-clockwise.
    #[must_use]
    pub const fn perpendicular(self) -> Self {
        Self::new(-self.y, self.x)
    }

    /// Returns a unit vector in the direction of `self`, or `None` if this
    /// vector is too short to have a direction.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let magnitude = self.magnitude();
        (magnitude > f32::EPSILON).then(|| self / magnitude)
    }

    /// Returns the signed angle in degrees that rotates `self` onto `other`.
    ///
    /// Returns `None` if either vector is degenerate. The result is always in
    /// `(-180.0, 180.0]`.
    #[must_use]
    pub fn angle_to(self, other: Self) -> Option<f32> {
        if self.magnitude() <= f32::EPSILON || other.magnitude() <= f32::EPSILON {
            return None;
        }
        let degrees = math::radians_to_degrees(self.cross(other).atan2(self.dot(other)));
        Some(if degrees <= -180.0 { 180.0 } else { degrees })
    }

    /// Returns the result of mapping `x` and `y` to `f`.
    #[must_use]
    pub fn map(self, mut f: impl FnMut(f32) -> f32) -> Self {
        Self {
            x: f(self.x),
            y: f(self.y),
        }
    }
}

impl Add for Vector {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl Sub for Vector {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl Mul<f32> for Vector {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

impl Div<f32> for Vector {
    type Output = Self;

    fn div(self, rhs: f32) -> Self::Output {
        Self {
            x: self.x / rhs,
            y: self.y / rhs,
        }
    }
}

/// An orientation in degrees, always normalized to `0.0..360.0`.
#[derive(Clone, Copy, PartialEq, PartialOrd, Default)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "f32", into = "f32"))]
pub struct Angle {
    degrees: f32,
}

impl Angle {
    /// No rotation.
    pub const ZERO: Self = Self { degrees: 0. };

    /// Returns an angle representing the given degrees.
    #[must_use]
    pub fn degrees(degrees: f32) -> Self {
        Self {
            degrees: math::normalize_degrees(degrees),
        }
    }

    /// Returns an angle representing the given radians.
    #[must_use]
    pub fn radians(radians: f32) -> Self {
        Self::degrees(math::radians_to_degrees(radians))
    }

    /// Returns the angle reported by a physics-engine revolute joint.
    #[must_use]
    pub fn from_box2d(radians: f32) -> Self {
        Self {
            degrees: math::box2d_angle_to_degrees(radians),
        }
    }

    /// Returns this angle represented in degrees.
    ///
    /// This value will always be greater than or equal to 0 and will always be
    /// less than 360.0.
    #[must_use]
    pub const fn to_degrees(self) -> f32 {
        self.degrees
    }

    /// Returns this angle represented in radians.
    #[must_use]
    pub fn to_radians(self) -> f32 {
        math::degrees_to_radians(self.degrees)
    }

    /// Returns the signed number of degrees to rotate from `self` to `target`
    /// along the shorter arc. Ties resolve counter-clockwise.
    #[must_use]
    pub fn delta_to(self, target: Self) -> f32 {
        math::shortest_delta_degrees(self.degrees, target.degrees)
    }
}

impl Debug for Angle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Angle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees)
    }
}

impl From<f32> for Angle {
    /// Interprets `degrees` as degrees.
    fn from(degrees: f32) -> Self {
        Self::degrees(degrees)
    }
}

impl From<Angle> for f32 {
    fn from(angle: Angle) -> Self {
        angle.degrees
    }
}

impl Add for Angle {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::degrees(self.degrees + rhs.degrees)
    }
}

impl Sub for Angle {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::degrees(self.degrees - rhs.degrees)
    }
}

impl Neg for Angle {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::degrees(-self.degrees)
    }
}

/// An inclusive band of allowed joint orientations.
///
/// When `minimum` is greater than `maximum`, the band wraps through 0°. For
/// example, `MovementRange::new(270., 90.)` allows the right half circle:
/// 270°..360° and 0°..90°.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "crate::serde::DeserializedRange"))]
pub struct MovementRange {
    minimum: f32,
    maximum: f32,
}

impl MovementRange {
    /// A range that allows every orientation.
    pub const UNRESTRICTED: Self = Self {
        minimum: 0.,
        maximum: 360.,
    };

    /// The right half circle, from 270° through 0° to 90°.
    pub const RIGHT_HALF: Self = Self {
        minimum: 270.,
        maximum: 90.,
    };

    /// Returns a range from `minimum` to `maximum` degrees.
    ///
    /// Any range spanning a full turn or more is unrestricted.
    #[must_use]
    pub fn new(minimum: f32, maximum: f32) -> Self {
        if maximum - minimum >= 360. {
            Self::UNRESTRICTED
        } else {
            Self {
                minimum: math::normalize_degrees(minimum),
                maximum: math::normalize_degrees(maximum),
            }
        }
    }

    /// Returns the lower bound of this range in degrees.
    #[must_use]
    pub const fn minimum(&self) -> f32 {
        self.minimum
    }

    /// Returns the upper bound of this range in degrees.
    #[must_use]
    pub const fn maximum(&self) -> f32 {
        self.maximum
    }

    /// Returns true if this range allows every orientation.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.maximum - self.minimum >= 360.
    }

    /// Returns true if `degrees` (normalized first) lies within this range.
    #[must_use]
    pub fn is_in_range(&self, degrees: f32) -> bool {
        self.contains(Angle::degrees(degrees))
    }

    /// Returns true if `angle` lies within this range.
    #[must_use]
    pub fn contains(&self, angle: Angle) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let angle = angle.to_degrees();
        if self.minimum <= self.maximum {
            self.minimum <= angle && angle <= self.maximum
        } else {
            angle >= self.minimum || angle <= self.maximum
        }
    }

    /// Returns the signed number of degrees to rotate from `from` to `to`
    /// without leaving this range.
    ///
    /// When both angles are inside a restricted range, only one arc between
    /// them stays inside it, even if it is the longer one. Otherwise this is
    /// the shorter arc.
    #[must_use]
    pub fn travel(&self, from: Angle, to: Angle) -> f32 {
        if self.is_unrestricted() || !self.contains(from) || !self.contains(to) {
            return from.delta_to(to);
        }
        let offset = |angle: Angle| math::normalize_degrees(angle.to_degrees() - self.minimum);
        offset(to) - offset(from)
    }

    /// Returns `angle` if it is within this range, otherwise the range boundary
    /// nearest to `angle`.
    #[must_use]
    pub fn clamp(&self, angle: Angle) -> Angle {
        if self.contains(angle) {
            return angle;
        }
        let minimum = Angle::degrees(self.minimum);
        let maximum = Angle::degrees(self.maximum);
        if angle.delta_to(minimum).abs() <= angle.delta_to(maximum).abs() {
            minimum
        } else {
            maximum
        }
    }
}

impl Default for MovementRange {
    fn default() -> Self {
        Self::UNRESTRICTED
    }
}

impl Display for MovementRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}°, {}°]", self.minimum, self.maximum)
    }
}

/// A structural problem with a [`KinematicsChain`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    /// A chain must have exactly one joint without a predecessor bone.
    #[error("expected exactly one root joint, found {0}")]
    RootCount(usize),
    /// A joint id did not belong to this chain.
    #[error("{0:?} does not exist in this chain")]
    UnknownJoint(JointId),
    /// A joint can only drive a single bone.
    #[error("{0:?} already has a successor bone")]
    DuplicateSuccessor(JointId),
    /// A joint can only be driven by a single bone.
    #[error("{0:?} already has a predecessor bone")]
    DuplicatePredecessor(JointId),
    /// A bone would connect a joint to itself.
    #[error("a bone cannot start and end at {0:?}")]
    SelfLoop(JointId),
    /// Following successor links never reached the end of the chain.
    #[error("the chain contains a cycle")]
    Cycle,
    /// A bone could not be reached by walking from the root joint.
    #[error("{0:?} is not connected to the root joint")]
    Disconnected(BoneId),
    /// The chain has no bones, so there is no end effector.
    #[error("the chain has no bones")]
    Empty,
    /// Labels must be unique within a chain.
    #[error("the label {0:?} is already in use")]
    DuplicateLabel(String),
    /// Ids are limited to 256 joints.
    #[error("too many joints")]
    TooManyJoints,
    /// Ids are limited to 256 bones.
    #[error("too many bones")]
    TooManyBones,
}

/// The shape of a [`Bone`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum BoneKind {
    /// A single bone of a fixed length.
    Rigid {
        /// The length of the bone.
        length: f32,
    },
    /// A bone ending in a base plate with two parallel claws.
    Gripper {
        /// The length of the bone up to the base plate.
        length: f32,
        /// The length of the base plate, perpendicular to the bone.
        base_plate_length: f32,
        /// The length of each claw, parallel to the bone.
        claw_length: f32,
    },
}

impl BoneKind {
    /// Returns the distance between the start and end of the bone.
    #[must_use]
    pub const fn length(&self) -> f32 {
        match self {
            BoneKind::Rigid { length } | BoneKind::Gripper { length, .. } => *length,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
struct ArcString(Arc<String>);

impl ArcString {
    fn new(label: String) -> Option<Self> {
        (!label.is_empty()).then(|| Self(Arc::new(label)))
    }
}

impl PartialEq<str> for ArcString {
    fn eq(&self, other: &str) -> bool {
        &**self == other
    }
}

impl Deref for ArcString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for ArcString {
    fn borrow(&self) -> &str {
        self
    }
}

/// A rotational node in a [`KinematicsChain`].
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    label: Option<ArcString>,
    position: Vector,
    orientation: Angle,
    range: MovementRange,
    predecessor: Option<BoneId>,
    successor: Option<BoneId>,
}

impl Joint {
    /// Returns the label of this joint.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_ref().map_or("", |s| s)
    }

    /// Returns the solved position of this joint.
    #[must_use]
    pub const fn position(&self) -> Vector {
        self.position
    }

    /// Returns the orientation of this joint, relative to the bone that
    /// precedes it.
    #[must_use]
    pub const fn orientation(&self) -> Angle {
        self.orientation
    }

    /// Sets the orientation of this joint.
    ///
    /// Positions are not updated until
    /// [`KinematicsChain::apply_forward_kinematics`] is called.
    pub fn set_orientation(&mut self, orientation: Angle) {
        self.orientation = orientation;
    }

    /// Returns the orientations this joint is allowed to take.
    #[must_use]
    pub const fn range(&self) -> MovementRange {
        self.range
    }

    /// Restricts the orientations this joint is allowed to take.
    pub fn set_range(&mut self, range: MovementRange) {
        self.range = range;
    }

    /// Returns the bone ending at this joint, if any.
    #[must_use]
    pub const fn predecessor(&self) -> Option<BoneId> {
        self.predecessor
    }

    /// Returns the bone starting at this joint, if any.
    #[must_use]
    pub const fn successor(&self) -> Option<BoneId> {
        self.successor
    }
}

/// A rigid segment of a [`KinematicsChain`].
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    label: Option<ArcString>,
    kind: BoneKind,
    start: Vector,
    end: Vector,
    joint_a: JointId,
    joint_b: Option<JointId>,
}

impl Bone {
    /// Returns the label this bone was created with.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_ref().map_or("", |s| s)
    }

    /// Returns the shape of this bone.
    #[must_use]
    pub const fn kind(&self) -> BoneKind {
        self.kind
    }

    /// Returns the length of this bone.
    #[must_use]
    pub const fn length(&self) -> f32 {
        self.kind.length()
    }

    /// Returns the solved start position of this bone.
    #[must_use]
    pub const fn start(&self) -> Vector {
        self.start
    }

    /// Returns the solved end position of this bone.
    #[must_use]
    pub const fn end(&self) -> Vector {
        self.end
    }

    /// Returns the joint this bone starts at.
    #[must_use]
    pub const fn joint_a(&self) -> JointId {
        self.joint_a
    }

    /// Returns the joint this bone ends at. The terminal bone of a chain may
    /// have a free end.
    #[must_use]
    pub const fn joint_b(&self) -> Option<JointId> {
        self.joint_b
    }

    /// Returns the unit direction from the start to the end of this bone.
    #[must_use]
    pub fn direction(&self) -> Option<Vector> {
        (self.end - self.start).normalized()
    }

    /// For [`BoneKind::Gripper`] bones, returns the two ends of the base plate
    /// followed by the two claw tips.
    #[must_use]
    pub fn gripper_outline(&self) -> Option<[Vector; 4]> {
        let BoneKind::Gripper {
            base_plate_length,
            claw_length,
            ..
        } = self.kind
        else {
            return None;
        };
        let direction = self.direction()?;
        let half_plate = direction.perpendicular() * (base_plate_length / 2.);
        let plate_a = self.end + half_plate;
        let plate_b = self.end - half_plate;
        let claw = direction * claw_length;
        Some([plate_a, plate_b, plate_a + claw, plate_b + claw])
    }
}

/// A node of a [`KinematicsChain`], as visited from root to end effector.
#[derive(Debug, Clone, Copy)]
pub enum ChainNode<'a> {
    /// A rotational joint.
    Joint(&'a Joint),
    /// A [`BoneKind::Rigid`] bone.
    Bone(&'a Bone),
    /// A [`BoneKind::Gripper`] bone.
    Gripper(&'a Bone),
}

impl ChainNode<'_> {
    /// Returns the label of this node.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            ChainNode::Joint(joint) => joint.label(),
            ChainNode::Bone(bone) | ChainNode::Gripper(bone) => bone.label(),
        }
    }

    /// Returns the smallest y coordinate covered by this node.
    #[must_use]
    pub fn lowest_point(&self) -> f32 {
        match self {
            ChainNode::Joint(joint) => joint.position.y,
            ChainNode::Bone(bone) => bone.start.y.min(bone.end.y),
            ChainNode::Gripper(bone) => bone
                .gripper_outline()
                .into_iter()
                .flatten()
                .fold(bone.start.y.min(bone.end.y), |lowest, point| {
                    lowest.min(point.y)
                }),
        }
    }
}

/// A linear chain of [`Bone`]s connected by rotational [`Joint`]s.
///
/// Exactly one joint, the root, has no predecessor bone. Every other bone
/// starts at the joint the previous bone ended at. Joint orientations are
/// relative to the preceding bone, so rotating a joint rotates everything
/// after it.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct KinematicsChain {
    joints: Vec<Joint>,
    bones: Vec<Bone>,
    joints_by_label: HashMap<ArcString, JointId>,
    bones_by_label: HashMap<ArcString, BoneId>,
}

impl KinematicsChain {
    /// Creates a new [`Joint`] in the chain with an unrestricted range.
    /// Returns the unique id of the created joint.
    pub fn add_joint(
        &mut self,
        label: impl Into<String>,
        initial_angle: Angle,
    ) -> Result<JointId, ChainError> {
        let id = JointId::from_index(self.joints.len()).ok_or(ChainError::TooManyJoints)?;
        let label = ArcString::new(label.into());
        if let Some(label) = &label {
            if self.joints_by_label.contains_key(label) {
                return Err(ChainError::DuplicateLabel(label.to_string()));
            }
            self.joints_by_label.insert(label.clone(), id);
        }
        self.joints.push(Joint {
            label,
            position: Vector::default(),
            orientation: initial_angle,
            range: MovementRange::UNRESTRICTED,
            predecessor: None,
            successor: None,
        });
        Ok(id)
    }

    /// Creates a new [`Bone`] from `joint_a` to `joint_b`. Returns the unique
    /// id of the created bone.
    ///
    /// Pass `None` for `joint_b` to create the free terminal bone of the
    /// chain. Positions are not solved until
    /// [`apply_forward_kinematics()`](Self::apply_forward_kinematics) is
    /// called.
    pub fn add_bone(
        &mut self,
        label: impl Into<String>,
        joint_a: JointId,
        joint_b: Option<JointId>,
        kind: BoneKind,
    ) -> Result<BoneId, ChainError> {
        let id = BoneId::from_index(self.bones.len()).ok_or(ChainError::TooManyBones)?;
        let start = self.joint(joint_a)?;
        if start.successor.is_some() {
            return Err(ChainError::DuplicateSuccessor(joint_a));
        }
        if let Some(joint_b) = joint_b {
            if joint_b == joint_a {
                return Err(ChainError::SelfLoop(joint_a));
            }
            if self.joint(joint_b)?.predecessor.is_some() {
                return Err(ChainError::DuplicatePredecessor(joint_b));
            }
        }

        let label = ArcString::new(label.into());
        if let Some(label) = &label {
            if self.bones_by_label.contains_key(label) {
                return Err(ChainError::DuplicateLabel(label.to_string()));
            }
            self.bones_by_label.insert(label.clone(), id);
        }

        self[joint_a].successor = Some(id);
        if let Some(joint_b) = joint_b {
            self[joint_b].predecessor = Some(id);
        }
        self.bones.push(Bone {
            label,
            kind,
            start: Vector::default(),
            end: Vector::default(),
            joint_a,
            joint_b,
        });
        Ok(id)
    }

    fn joint(&self, id: JointId) -> Result<&Joint, ChainError> {
        self.joints
            .get(id.index())
            .ok_or(ChainError::UnknownJoint(id))
    }

    /// Returns the list of joints in this chain, in creation order.
    #[must_use]
    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    /// Returns the list of bones in this chain, in creation order.
    #[must_use]
    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    /// Returns the ids of every joint in this chain.
    pub fn joint_ids(&self) -> impl Iterator<Item = JointId> + '_ {
        (0..self.joints.len()).filter_map(JointId::from_index)
    }

    /// Finds an existing [`Joint`] by its label.
    #[must_use]
    pub fn find_joint_by_label(&self, label: &str) -> Option<JointId> {
        self.joints_by_label.get(label).copied()
    }

    /// Finds an existing [`Bone`] by its label.
    #[must_use]
    pub fn find_bone_by_label(&self, label: &str) -> Option<BoneId> {
        self.bones_by_label.get(label).copied()
    }

    /// Returns the single joint without a predecessor bone.
    pub fn root(&self) -> Result<JointId, ChainError> {
        let mut roots = self
            .joint_ids()
            .filter(|id| self[*id].predecessor.is_none());
        match (roots.next(), roots.count()) {
            (Some(root), 0) => Ok(root),
            (None, _) => Err(ChainError::RootCount(0)),
            (Some(_), others) => Err(ChainError::RootCount(others + 1)),
        }
    }

    /// Returns each bone paired with the joint it starts at, ordered from the
    /// root to the end of the chain.
    pub fn links(&self) -> Result<Vec<(JointId, BoneId)>, ChainError> {
        let mut links = Vec::with_capacity(self.bones.len());
        let mut current = Some(self.root()?);
        while let Some(joint) = current {
            let Some(bone) = self[joint].successor else {
                break;
            };
            if links.len() == self.bones.len() {
                return Err(ChainError::Cycle);
            }
            links.push((joint, bone));
            current = self[bone].joint_b;
        }

        if links.len() != self.bones.len() {
            if let Some(missing) = (0..self.bones.len())
                .filter_map(BoneId::from_index)
                .find(|id| links.iter().all(|(_, bone)| bone != id))
            {
                return Err(ChainError::Disconnected(missing));
            }
        }
        Ok(links)
    }

    /// Returns every joint and bone from the root to the end of the chain.
    pub fn nodes(&self) -> Result<Vec<ChainNode<'_>>, ChainError> {
        let links = self.links()?;
        let mut nodes = Vec::with_capacity(links.len() * 2 + 1);
        for (joint, bone) in &links {
            nodes.push(ChainNode::Joint(&self[*joint]));
            let bone = &self[*bone];
            nodes.push(match bone.kind {
                BoneKind::Rigid { .. } => ChainNode::Bone(bone),
                BoneKind::Gripper { .. } => ChainNode::Gripper(bone),
            });
        }
        if let Some(last) = links.last().and_then(|(_, bone)| self[*bone].joint_b) {
            nodes.push(ChainNode::Joint(&self[last]));
        }
        Ok(nodes)
    }

    /// Places the root joint, and with it the whole chain, at `position`.
    pub fn set_base_position(&mut self, position: Vector) -> Result<(), ChainError> {
        let root = self.root()?;
        self[root].position = position;
        self.apply_forward_kinematics()
    }

    /// Updates the solved positions of all bones and joints from the joint
    /// orientations, starting at the root joint.
    pub fn apply_forward_kinematics(&mut self) -> Result<(), ChainError> {
        let mut heading = Angle::ZERO;
        for (joint, bone) in self.links()? {
            let joint = &self[joint];
            let start = joint.position;
            heading = heading + joint.orientation;

            let bone = &mut self.bones[bone.index()];
            bone.start = start;
            bone.end = start + Vector::from_angle(heading) * bone.kind.length();
            let (end, next) = (bone.end, bone.joint_b);
            if let Some(next) = next {
                self[next].position = end;
            }
        }
        Ok(())
    }

    /// Returns the last bone of the chain.
    #[must_use]
    pub fn end_bone(&self) -> Option<&Bone> {
        let (_, bone) = self.links().ok()?.pop()?;
        Some(&self[bone])
    }

    /// Returns the free end of the last bone of the chain.
    #[must_use]
    pub fn end_effector(&self) -> Option<Vector> {
        self.end_bone().map(Bone::end)
    }

    /// Returns the combined length of all bones.
    #[must_use]
    pub fn total_length(&self) -> f32 {
        self.bones.iter().map(Bone::length).sum()
    }

    /// Returns an independent snapshot of this chain.
    ///
    /// Ids, labels, positions, and orientations match the original, so
    /// results computed on the copy can be applied back by id.
    #[must_use]
    pub fn create_copy(&self) -> Self {
        self.clone()
    }

    /// Pulls the live joint angles reported by `actuators` into the chain and
    /// re-solves all positions.
    pub fn sync_with_actuators<A>(&mut self, actuators: &A) -> Result<(), ChainError>
    where
        A: Actuators + ?Sized,
    {
        for (index, joint) in self.joints.iter_mut().enumerate() {
            if let Some(id) = JointId::from_index(index) {
                joint.orientation = Angle::from_box2d(actuators.joint_angle(id));
            }
        }
        self.apply_forward_kinematics()
    }
}

impl Index<BoneId> for KinematicsChain {
    type Output = Bone;

    fn index(&self, index: BoneId) -> &Self::Output {
        &self.bones[index.index()]
    }
}

impl Index<JointId> for KinematicsChain {
    type Output = Joint;

    fn index(&self, index: JointId) -> &Self::Output {
        &self.joints[index.index()]
    }
}

impl IndexMut<JointId> for KinematicsChain {
    fn index_mut(&mut self, index: JointId) -> &mut Self::Output {
        &mut self.joints[index.index()]
    }
}

/// The unique ID of a [`Bone`] in a [`KinematicsChain`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct BoneId(u8);

impl BoneId {
    fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index).ok().map(Self)
    }

    /// Returns the index of this bone in [`KinematicsChain::bones()`].
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The unique ID of a [`Joint`] in a [`KinematicsChain`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct JointId(u8);

impl JointId {
    fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index).ok().map(Self)
    }

    /// Returns the index of this joint in [`KinematicsChain::joints()`].
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Builds a chain of rigid bones rooted at the origin, all joints at 0° and
/// unrestricted, with a free end.
#[cfg(test)]
pub(crate) fn planar_chain(lengths: &[f32]) -> KinematicsChain {
    let mut chain = KinematicsChain::default();
    let joints = (0..lengths.len())
        .map(|index| chain.add_joint(format!("joint {index}"), Angle::ZERO).unwrap())
        .collect::<Vec<_>>();
    for (index, length) in lengths.iter().enumerate() {
        chain
            .add_bone(
                format!("bone {index}"),
                joints[index],
                joints.get(index + 1).copied(),
                BoneKind::Rigid { length: *length },
            )
            .unwrap();
    }
    chain.apply_forward_kinematics().unwrap();
    chain
}

#[test]
#[allow(clippy::cast_possible_truncation)]
fn angle() {
    assert_eq!(
        (Angle::degrees(90.) + Angle::degrees(180.))
            .to_degrees()
            .round() as i32,
        270,
    );
    assert_eq!(
        (Angle::degrees(90.) + Angle::degrees(-180.))
            .to_degrees()
            .round() as i32,
        270,
    );
    assert_eq!(Angle::degrees(-360.), Angle::ZERO);
}

#[test]
#[allow(clippy::cast_precision_loss)]
fn movement_range_matches_brute_force() {
    let ranges = [
        (0., 90.),
        (270., 90.),
        (350., 10.),
        (90., 270.),
        (45., 45.),
        (300., 299.),
    ];
    for (minimum, maximum) in ranges {
        let range = MovementRange::new(minimum, maximum);
        let span = (maximum - minimum).rem_euclid(360.);
        for degree in 0..360 {
            let degree = degree as f32;
            let expected = (degree - minimum).rem_euclid(360.) <= span;
            assert_eq!(
                range.is_in_range(degree),
                expected,
                "{range} disagrees at {degree}°"
            );
        }
    }
    for degree in 0..360 {
        assert!(MovementRange::UNRESTRICTED.is_in_range(degree as f32));
    }
    assert!(MovementRange::new(0., 360.).is_unrestricted());
}

#[test]
fn movement_range_clamps_to_nearest_boundary() {
    let range = MovementRange::new(270., 90.);
    assert_eq!(range.clamp(Angle::degrees(100.)), Angle::degrees(90.));
    assert_eq!(range.clamp(Angle::degrees(260.)), Angle::degrees(270.));
    assert_eq!(range.clamp(Angle::degrees(10.)), Angle::degrees(10.));
}

#[test]
fn travel_stays_inside_range() {
    let avoids_zero = MovementRange::new(10., 350.);
    approx::assert_abs_diff_eq!(
        avoids_zero.travel(Angle::degrees(20.), Angle::degrees(340.)),
        320.,
        epsilon = 1e-4
    );
    approx::assert_abs_diff_eq!(
        avoids_zero.travel(Angle::degrees(340.), Angle::degrees(20.)),
        -320.,
        epsilon = 1e-4
    );
    approx::assert_abs_diff_eq!(
        MovementRange::RIGHT_HALF.travel(Angle::degrees(280.), Angle::degrees(80.)),
        160.,
        epsilon = 1e-4
    );
    approx::assert_abs_diff_eq!(
        MovementRange::UNRESTRICTED.travel(Angle::degrees(20.), Angle::degrees(340.)),
        -40.,
        epsilon = 1e-4
    );
}

#[test]
fn forward_kinematics() {
    let mut chain = planar_chain(&[1., 1., 1.]);
    approx::assert_abs_diff_eq!(chain.end_effector().unwrap().x, 3., epsilon = 1e-5);

    let elbow = chain.find_joint_by_label("joint 1").unwrap();
    chain[elbow].set_orientation(Angle::degrees(90.));
    chain.apply_forward_kinematics().unwrap();
    let end = chain.end_effector().unwrap();
    approx::assert_abs_diff_eq!(end.x, 1., epsilon = 1e-5);
    approx::assert_abs_diff_eq!(end.y, 2., epsilon = 1e-5);

    for bone in chain.bones() {
        approx::assert_abs_diff_eq!(bone.start().distance(bone.end()), bone.length(), epsilon = 1e-5);
    }
}

#[test]
#[allow(clippy::cast_precision_loss)]
fn forward_kinematics_is_idempotent() {
    let mut chain = planar_chain(&[1., 0.5, 2.]);
    for (index, id) in chain.joint_ids().collect::<Vec<_>>().into_iter().enumerate() {
        chain[id].set_orientation(Angle::degrees(37. * (index + 1) as f32));
    }
    chain.apply_forward_kinematics().unwrap();
    let first = chain.clone();
    chain.apply_forward_kinematics().unwrap();
    assert_eq!(first, chain);
}

#[test]
fn copies_are_independent() {
    let original = planar_chain(&[1., 1., 1.]);
    let mut copy = original.create_copy();
    let joint = copy.find_joint_by_label("joint 0").unwrap();
    copy[joint].set_orientation(Angle::degrees(45.));
    copy.apply_forward_kinematics().unwrap();

    assert_eq!(original[joint].orientation(), Angle::ZERO);
    approx::assert_abs_diff_eq!(original.end_effector().unwrap().y, 0., epsilon = 1e-6);
    assert_eq!(copy[joint].label(), original[joint].label());
    assert!(copy.end_effector().unwrap().y > 1.);
}

#[test]
fn structural_errors() {
    let mut chain = KinematicsChain::default();
    let a = chain.add_joint("a", Angle::ZERO).unwrap();
    let b = chain.add_joint("b", Angle::ZERO).unwrap();
    let c = chain.add_joint("c", Angle::ZERO).unwrap();
    chain
        .add_bone("ab", a, Some(b), BoneKind::Rigid { length: 1. })
        .unwrap();
    // `c` is a second root.
    assert_eq!(chain.apply_forward_kinematics(), Err(ChainError::RootCount(2)));

    assert_eq!(
        chain.add_bone("branch", a, Some(c), BoneKind::Rigid { length: 1. }),
        Err(ChainError::DuplicateSuccessor(a))
    );
    assert_eq!(
        chain.add_bone("merge", c, Some(b), BoneKind::Rigid { length: 1. }),
        Err(ChainError::DuplicatePredecessor(b))
    );
    assert_eq!(
        chain.add_joint("a", Angle::ZERO),
        Err(ChainError::DuplicateLabel(String::from("a")))
    );

    chain
        .add_bone("bc", b, Some(c), BoneKind::Rigid { length: 1. })
        .unwrap();
    chain.apply_forward_kinematics().unwrap();
    assert_eq!(chain.nodes().unwrap().len(), 5);
}

#[test]
fn gripper_nodes_include_claws() {
    let mut chain = KinematicsChain::default();
    let wrist = chain.add_joint("wrist", Angle::degrees(270.)).unwrap();
    chain
        .add_bone(
            "gripper",
            wrist,
            None,
            BoneKind::Gripper {
                length: 1.,
                base_plate_length: 0.5,
                claw_length: 0.25,
            },
        )
        .unwrap();
    chain.set_base_position(Vector::new(0., 2.)).unwrap();

    let nodes = chain.nodes().unwrap();
    assert!(matches!(nodes[1], ChainNode::Gripper(_)));
    approx::assert_abs_diff_eq!(nodes[1].lowest_point(), 0.75, epsilon = 1e-5);
}
