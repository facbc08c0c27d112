//! Per-agent fact store used for both planning and execution
//!
//! A blackboard is a flat map of named, dynamically-typed facts. Plan
//! search always runs against a cloned snapshot, so a search in flight
//! can never race the live simulation mutating the same agent. Typed
//! reads fail loudly: a missing or mistyped fact is an authoring error,
//! not something to paper over with a silent zero.

use std::collections::HashMap;
use std::fmt;

use hecs::Entity;
use serde::{Deserialize, Serialize};

use crate::components::Vec3;

/// Well-known keys shared by operators, sensors, and task data
pub mod keys {
    /// The entity that owns this blackboard
    pub const OWNER: &str = "Owner";
    /// Owner position, refreshed every serviced tick
    pub const OWNER_COORDS: &str = "OwnerCoordinates";
    /// How far sensors can see, in world units
    pub const VISION_RADIUS: &str = "VisionRadius";
    /// Movement speed in world units per second
    pub const MOVE_SPEED: &str = "MoveSpeed";

    /// Companion key holding the coordinates of a sensed entity target
    pub fn coords_key(key: &str) -> String {
        format!("{}Coords", key)
    }
}

pub const DEFAULT_VISION_RADIUS: f32 = 7.0;
pub const DEFAULT_MOVE_SPEED: f32 = 3.0;

/// Serialize an entity as its raw id bits (used for saved references)
pub(crate) mod entity_bits {
    use hecs::Entity;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(entity: &Entity, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(entity.to_bits().get())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Entity, D::Error> {
        let bits = u64::deserialize(de)?;
        Entity::from_bits(bits).ok_or_else(|| D::Error::custom("invalid entity id bits"))
    }
}

/// One dynamically-typed fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BbValue {
    Entity(#[serde(with = "entity_bits")] Entity),
    Coords(Vec3),
    Float(f32),
    Bool(bool),
    Text(String),
}

impl BbValue {
    /// Kind name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            BbValue::Entity(_) => "entity",
            BbValue::Coords(_) => "coords",
            BbValue::Float(_) => "float",
            BbValue::Bool(_) => "bool",
            BbValue::Text(_) => "text",
        }
    }
}

impl From<Entity> for BbValue {
    fn from(value: Entity) -> Self {
        BbValue::Entity(value)
    }
}

impl From<Vec3> for BbValue {
    fn from(value: Vec3) -> Self {
        BbValue::Coords(value)
    }
}

impl From<f32> for BbValue {
    fn from(value: f32) -> Self {
        BbValue::Float(value)
    }
}

impl From<bool> for BbValue {
    fn from(value: bool) -> Self {
        BbValue::Bool(value)
    }
}

impl From<String> for BbValue {
    fn from(value: String) -> Self {
        BbValue::Text(value)
    }
}

impl From<&str> for BbValue {
    fn from(value: &str) -> Self {
        BbValue::Text(value.to_string())
    }
}

/// Errors from typed blackboard access
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlackboardError {
    KeyNotFound(String),
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl fmt::Display for BlackboardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlackboardError::KeyNotFound(key) => write!(f, "blackboard key not found: {}", key),
            BlackboardError::TypeMismatch {
                key,
                expected,
                found,
            } => {
                write!(
                    f,
                    "blackboard key {} holds {}, expected {}",
                    key, found, expected
                )
            }
        }
    }
}

impl std::error::Error for BlackboardError {}

/// A single agent's view of the world as named facts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blackboard {
    values: HashMap<String, BbValue>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any previous value under the key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<BbValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<BbValue> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Untyped read; typed accessors below are the usual entry points
    pub fn get(&self, key: &str) -> Option<&BbValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BbValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn entity(&self, key: &str) -> Result<Entity, BlackboardError> {
        match self.values.get(key) {
            Some(BbValue::Entity(e)) => Ok(*e),
            Some(other) => Err(self.mismatch(key, "entity", other)),
            None => Err(BlackboardError::KeyNotFound(key.to_string())),
        }
    }

    /// Entity read where absence (or a mismatch) simply means "no target"
    pub fn entity_opt(&self, key: &str) -> Option<Entity> {
        match self.values.get(key) {
            Some(BbValue::Entity(e)) => Some(*e),
            _ => None,
        }
    }

    pub fn coords(&self, key: &str) -> Result<Vec3, BlackboardError> {
        match self.values.get(key) {
            Some(BbValue::Coords(c)) => Ok(*c),
            Some(other) => Err(self.mismatch(key, "coords", other)),
            None => Err(BlackboardError::KeyNotFound(key.to_string())),
        }
    }

    pub fn float(&self, key: &str) -> Result<f32, BlackboardError> {
        match self.values.get(key) {
            Some(BbValue::Float(v)) => Ok(*v),
            Some(other) => Err(self.mismatch(key, "float", other)),
            None => Err(BlackboardError::KeyNotFound(key.to_string())),
        }
    }

    pub fn flag(&self, key: &str) -> Result<bool, BlackboardError> {
        match self.values.get(key) {
            Some(BbValue::Bool(v)) => Ok(*v),
            Some(other) => Err(self.mismatch(key, "bool", other)),
            None => Err(BlackboardError::KeyNotFound(key.to_string())),
        }
    }

    pub fn text(&self, key: &str) -> Result<&str, BlackboardError> {
        match self.values.get(key) {
            Some(BbValue::Text(v)) => Ok(v),
            Some(other) => Err(self.mismatch(key, "text", other)),
            None => Err(BlackboardError::KeyNotFound(key.to_string())),
        }
    }

    /// Never fails: absent or mistyped facts fall back to the default
    pub fn float_or(&self, key: &str, default: f32) -> f32 {
        self.float(key).unwrap_or(default)
    }

    pub fn coords_or(&self, key: &str, default: Vec3) -> Vec3 {
        self.coords(key).unwrap_or(default)
    }

    pub fn flag_or(&self, key: &str, default: bool) -> bool {
        self.flag(key).unwrap_or(default)
    }

    fn mismatch(&self, key: &str, expected: &'static str, found: &BbValue) -> BlackboardError {
        BlackboardError::TypeMismatch {
            key: key.to_string(),
            expected,
            found: found.kind(),
        }
    }
}

/// Pending blackboard writes, produced by evaluating planning effects
///
/// Applied to the hypothetical blackboard during search, and optionally
/// to the live blackboard when an operator starts up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlackboardDelta {
    ops: Vec<(String, Option<BbValue>)>,
}

impl BlackboardDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: BbValue) {
        self.ops.push((key.into(), Some(value)));
    }

    pub fn unset(&mut self, key: impl Into<String>) {
        self.ops.push((key.into(), None));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The latest pending write for a key: `Some(Some(v))` will set,
    /// `Some(None)` will remove, `None` means the delta does not touch it
    pub fn latest(&self, key: &str) -> Option<Option<&BbValue>> {
        self.ops
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    pub fn apply_to(&self, blackboard: &mut Blackboard) {
        for (key, value) in &self.ops {
            match value {
                Some(v) => blackboard.set(key.clone(), v.clone()),
                None => {
                    blackboard.remove(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hecs::World;

    #[test]
    fn test_typed_roundtrip() {
        let mut world = World::new();
        let target = world.spawn((1u8,));

        let mut bb = Blackboard::new();
        bb.set("Target", target);
        bb.set("Spot", Vec3::new(1.0, 2.0, 3.0));
        bb.set("Speed", 4.5f32);
        bb.set("Armed", true);
        bb.set("Label", "north corridor");

        assert_eq!(bb.entity("Target").unwrap(), target);
        assert_eq!(bb.coords("Spot").unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(bb.float("Speed").unwrap(), 4.5);
        assert!(bb.flag("Armed").unwrap());
        assert_eq!(bb.text("Label").unwrap(), "north corridor");
        assert_eq!(bb.len(), 5);
    }

    #[test]
    fn test_missing_key_fails() {
        let bb = Blackboard::new();
        assert_eq!(
            bb.float("Nope"),
            Err(BlackboardError::KeyNotFound("Nope".to_string()))
        );
    }

    #[test]
    fn test_type_mismatch_names_both_kinds() {
        let mut bb = Blackboard::new();
        bb.set("Speed", true);

        match bb.float("Speed") {
            Err(BlackboardError::TypeMismatch {
                key,
                expected,
                found,
            }) => {
                assert_eq!(key, "Speed");
                assert_eq!(expected, "float");
                assert_eq!(found, "bool");
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_cover_absent_and_mistyped() {
        let mut bb = Blackboard::new();
        assert_eq!(bb.float_or("VisionRadius", 7.0), 7.0);

        bb.set("VisionRadius", "oops");
        assert_eq!(bb.float_or("VisionRadius", 7.0), 7.0);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut live = Blackboard::new();
        live.set("Hunger", 0.2f32);

        let mut snapshot = live.clone();
        snapshot.set("Hunger", 0.9f32);
        snapshot.set("Scratch", true);

        assert_eq!(live.float("Hunger").unwrap(), 0.2);
        assert!(!live.contains("Scratch"));
    }

    #[test]
    fn test_delta_apply_and_latest() {
        let mut delta = BlackboardDelta::new();
        delta.set("A", BbValue::Float(1.0));
        delta.unset("B");
        delta.set("A", BbValue::Float(2.0));

        assert_eq!(delta.latest("A"), Some(Some(&BbValue::Float(2.0))));
        assert_eq!(delta.latest("B"), Some(None));
        assert_eq!(delta.latest("C"), None);

        let mut bb = Blackboard::new();
        bb.set("B", true);
        delta.apply_to(&mut bb);

        assert_eq!(bb.float("A").unwrap(), 2.0);
        assert!(!bb.contains("B"));
    }

    #[test]
    fn test_coords_key_convention() {
        assert_eq!(keys::coords_key("TargetFood"), "TargetFoodCoords");
    }
}
