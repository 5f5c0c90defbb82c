use std::borrow::Cow;

use serde::{
    de::{self, Visitor},
    ser::SerializeStruct,
    Deserialize, Serialize,
};

use crate::{Angle, Bone, BoneKind, Joint, JointId, KinematicsChain, MovementRange, Vector};

impl Serialize for KinematicsChain {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let base = self
            .root()
            .map_or_else(|_| Vector::default(), |root| self[root].position);
        let mut s = serializer.serialize_struct("KinematicsChain", 3)?;
        s.serialize_field("base", &base)?;
        s.serialize_field("joints", &self.joints)?;
        s.serialize_field("bones", &self.bones)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for KinematicsChain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_struct(
            "KinematicsChain",
            &["base", "joints", "bones"],
            ChainVisitor::default(),
        )
    }
}

#[derive(Default)]
struct ChainVisitor {
    base: Option<Vector>,
    joints: Vec<DeserializedJoint>,
    bones: Vec<DeserializedBone>,
}

impl<'de> Visitor<'de> for ChainVisitor {
    type Value = KinematicsChain;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a KinematicsChain")
    }

    fn visit_map<A>(mut self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        while let Some(key) = map.next_key::<Cow<'de, str>>()? {
            match &*key {
                "base" => {
                    self.base = Some(map.next_value()?);
                }
                "joints" => {
                    self.joints = map.next_value()?;
                }
                "bones" => {
                    self.bones = map.next_value()?;
                }
                _ => {
                    return Err(<A::Error as de::Error>::custom(format!(
                        "unexpected field {key}"
                    )))
                }
            }
        }

        let mut chain = KinematicsChain::default();
        for joint in self.joints.drain(..) {
            let id = chain
                .add_joint(joint.label, joint.angle)
                .map_err(<A::Error as de::Error>::custom)?;
            chain[id].set_range(joint.range);
        }
        for bone in self.bones.drain(..) {
            chain
                .add_bone(bone.label, bone.from, bone.to, bone.kind)
                .map_err(<A::Error as de::Error>::custom)?;
        }
        if !chain.joints.is_empty() {
            chain
                .set_base_position(self.base.unwrap_or_default())
                .map_err(<A::Error as de::Error>::custom)?;
        }
        Ok(chain)
    }
}

impl Serialize for Joint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let field_count = 2 + usize::from(self.label.is_some());
        let mut j = serializer.serialize_struct("Joint", field_count)?;
        if let Some(label) = &self.label {
            j.serialize_field("label", &**label)?;
        }
        j.serialize_field("angle", &self.orientation)?;
        j.serialize_field("range", &self.range)?;
        j.end()
    }
}

#[derive(Deserialize)]
struct DeserializedJoint {
    #[serde(default)]
    label: String,
    angle: Angle,
    #[serde(default)]
    range: MovementRange,
}

impl Serialize for Bone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let field_count =
            2 + usize::from(self.label.is_some()) + usize::from(self.joint_b.is_some());
        let mut b = serializer.serialize_struct("Bone", field_count)?;
        if let Some(label) = &self.label {
            b.serialize_field("label", &**label)?;
        }
        b.serialize_field("kind", &self.kind)?;
        b.serialize_field("from", &self.joint_a)?;
        if let Some(to) = self.joint_b {
            b.serialize_field("to", &to)?;
        }
        b.end()
    }
}

#[derive(Deserialize)]
struct DeserializedBone {
    #[serde(default)]
    label: String,
    kind: BoneKind,
    from: JointId,
    #[serde(default)]
    to: Option<JointId>,
}

#[derive(Deserialize)]
pub(crate) struct DeserializedRange {
    minimum: f32,
    maximum: f32,
}

impl From<DeserializedRange> for MovementRange {
    fn from(range: DeserializedRange) -> Self {
        MovementRange::new(range.minimum, range.maximum)
    }
}

#[test]
fn roundtrip() {
    let mut chain = KinematicsChain::default();
    let shoulder = chain.add_joint("shoulder", Angle::degrees(90.)).unwrap();
    let elbow = chain.add_joint("", Angle::degrees(300.)).unwrap();
    chain[elbow].set_range(MovementRange::RIGHT_HALF);
    chain
        .add_bone("upper arm", shoulder, Some(elbow), BoneKind::Rigid { length: 1. })
        .unwrap();
    let gripper = chain
        .add_bone(
            "gripper",
            elbow,
            None,
            BoneKind::Gripper {
                length: 0.5,
                base_plate_length: 0.2,
                claw_length: 0.1,
            },
        )
        .unwrap();
    chain.set_base_position(Vector::new(0., 0.5)).unwrap();

    let serialized = pot::to_vec(&chain).unwrap();
    let deserialized: KinematicsChain = pot::from_slice(&serialized).unwrap();
    assert_eq!(deserialized[shoulder].label(), "shoulder");
    assert_eq!(deserialized[elbow].label(), "");
    assert_eq!(deserialized[elbow].range(), MovementRange::RIGHT_HALF);
    assert_eq!(deserialized.find_bone_by_label("gripper"), Some(gripper));
    assert_eq!(deserialized[gripper].kind(), chain[gripper].kind());
    let end = deserialized.end_effector().unwrap();
    approx::assert_abs_diff_eq!(end.x, chain.end_effector().unwrap().x, epsilon = 1e-5);
    approx::assert_abs_diff_eq!(end.y, chain.end_effector().unwrap().y, epsilon = 1e-5);
}

#[test]
fn rejects_malformed_chains() {
    #[derive(Serialize)]
    struct RawBone {
        kind: BoneKind,
        from: JointId,
        to: Option<JointId>,
    }
    #[derive(Serialize)]
    struct RawChain {
        joints: Vec<Joint>,
        bones: Vec<RawBone>,
    }

    let chain = crate::planar_chain(&[1.]);
    let root = chain.root().unwrap();
    let raw = RawChain {
        joints: chain.joints().to_vec(),
        bones: vec![RawBone {
            kind: BoneKind::Rigid { length: 1. },
            from: root,
            to: Some(root),
        }],
    };
    let serialized = pot::to_vec(&raw).unwrap();
    assert!(pot::from_slice::<KinematicsChain>(&serialized).is_err());
}

#[test]
fn ranges_are_normalized_when_read() {
    #[derive(Serialize)]
    struct RawRange {
        minimum: f32,
        maximum: f32,
    }

    let serialized = pot::to_vec(&RawRange {
        minimum: -90.,
        maximum: 90.,
    })
    .unwrap();
    let range: MovementRange = pot::from_slice(&serialized).unwrap();
    assert_eq!(range, MovementRange::new(-90., 90.));
    assert!(range.is_in_range(300.));
    assert!(!range.is_in_range(180.));

    let serialized = pot::to_vec(&MovementRange::RIGHT_HALF).unwrap();
    let range: MovementRange = pot::from_slice(&serialized).unwrap();
    assert_eq!(range, MovementRange::RIGHT_HALF);
}
