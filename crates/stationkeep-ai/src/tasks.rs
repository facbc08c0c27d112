//! Task definitions: the authored form of a planning domain
//!
//! Definitions reference each other by name and are usually loaded from
//! JSON. [`crate::library::TaskLibrary`] resolves them into an indexed
//! form the planner can walk without string lookups.

use hecs::{Entity, World};
use serde::{Deserialize, Serialize};

use crate::blackboard::{keys, BbValue, Blackboard, BlackboardDelta, DEFAULT_VISION_RADIUS};
use crate::components::{Carried, Food, Health, Hostile, Position, Vec3};
use crate::operators::OperatorSpec;

/// A condition checked against a blackboard snapshot
///
/// Missing or mistyped keys make a condition false rather than raising
/// an error; domains routinely probe for facts a sensor may not have
/// produced yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Precondition {
    KeyExists { key: String },
    KeyNotExists { key: String },
    FloatAtLeast { key: String, value: f32 },
    FloatBelow { key: String, value: f32 },
    BoolIs { key: String, value: bool },
}

impl Precondition {
    pub fn is_met(&self, blackboard: &Blackboard) -> bool {
        match self {
            Precondition::KeyExists { key } => blackboard.contains(key),
            Precondition::KeyNotExists { key } => !blackboard.contains(key),
            Precondition::FloatAtLeast { key, value } => {
                matches!(blackboard.float(key), Ok(v) if v >= *value)
            }
            Precondition::FloatBelow { key, value } => {
                matches!(blackboard.float(key), Ok(v) if v < *value)
            }
            Precondition::BoolIs { key, value } => {
                matches!(blackboard.flag(key), Ok(v) if v == *value)
            }
        }
    }
}

/// A predicted blackboard change used during plan search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    Set { key: String, value: BbValue },
    Unset { key: String },
    CopyKey { from: String, to: String },
}

/// Evaluates effects in order against a snapshot, producing the writes
/// to apply. `CopyKey` reads through earlier effects in the same list;
/// a missing source key makes it a no-op.
pub fn eval_effects(effects: &[Effect], blackboard: &Blackboard) -> BlackboardDelta {
    let mut delta = BlackboardDelta::new();
    for effect in effects {
        match effect {
            Effect::Set { key, value } => delta.set(key.clone(), value.clone()),
            Effect::Unset { key } => delta.unset(key.clone()),
            Effect::CopyKey { from, to } => {
                let source = match delta.latest(from) {
                    Some(Some(value)) => Some(value.clone()),
                    Some(None) => None,
                    None => blackboard.get(from).cloned(),
                };
                if let Some(value) = source {
                    delta.set(to.clone(), value);
                }
            }
        }
    }
    delta
}

/// World query run periodically while a primitive task executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sensor {
    /// Closest uncarried food entity
    NearestFood {
        #[serde(default)]
        radius: Option<f32>,
    },
    /// Closest living entity marked hostile
    NearestHostile {
        #[serde(default)]
        radius: Option<f32>,
    },
}

impl Sensor {
    /// Authored range override, if any; callers fall back to the
    /// agent's vision radius otherwise
    pub fn max_range(&self) -> Option<f32> {
        match self {
            Sensor::NearestFood { radius } => *radius,
            Sensor::NearestHostile { radius } => *radius,
        }
    }

    /// Runs the query, returning the best match and where it was seen
    pub fn sense(
        &self,
        world: &World,
        agent: Entity,
        origin: Vec3,
        radius: f32,
    ) -> Option<(Entity, Vec3)> {
        let mut best: Option<(Entity, Vec3, f32)> = None;
        match self {
            Sensor::NearestFood { .. } => {
                for (entity, (_, position)) in world.query::<(&Food, &Position)>().iter() {
                    if entity == agent || world.get::<&Carried>(entity).is_ok() {
                        continue;
                    }
                    consider(&mut best, entity, position.coords, origin, radius);
                }
            }
            Sensor::NearestHostile { .. } => {
                for (entity, (_, position, health)) in
                    world.query::<(&Hostile, &Position, &Health)>().iter()
                {
                    if entity == agent || !health.is_alive() {
                        continue;
                    }
                    consider(&mut best, entity, position.coords, origin, radius);
                }
            }
        }
        best.map(|(entity, coords, _)| (entity, coords))
    }
}

fn consider(
    best: &mut Option<(Entity, Vec3, f32)>,
    entity: Entity,
    coords: Vec3,
    origin: Vec3,
    radius: f32,
) {
    let distance = origin.distance(&coords);
    if distance > radius {
        return;
    }
    match best {
        Some((_, _, closest)) if *closest <= distance => {}
        _ => *best = Some((entity, coords, distance)),
    }
}

/// A named sensor binding: writes the sensed entity under `key` and its
/// coordinates under the companion coords key, then sleeps between
/// `min_cooldown` and `max_cooldown` seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub key: String,
    pub sensor: Sensor,
    pub min_cooldown: f32,
    pub max_cooldown: f32,
}

impl Service {
    /// Effective query range, honoring an authored override
    pub fn range(&self, blackboard: &Blackboard) -> f32 {
        self.sensor
            .max_range()
            .unwrap_or_else(|| blackboard.float_or(keys::VISION_RADIUS, DEFAULT_VISION_RADIUS))
    }
}

/// One way of decomposing a compound task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(default)]
    pub subtasks: Vec<String>,
}

impl MethodDef {
    pub fn new(preconditions: Vec<Precondition>, subtasks: Vec<&str>) -> Self {
        Self {
            preconditions,
            subtasks: subtasks.into_iter().map(String::from).collect(),
        }
    }
}

/// Authored task, compound or primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskDef {
    Compound {
        name: String,
        methods: Vec<MethodDef>,
    },
    Primitive {
        name: String,
        #[serde(default)]
        preconditions: Vec<Precondition>,
        operator: OperatorSpec,
        #[serde(default)]
        effects: Vec<Effect>,
        /// When set, the task's effects are written to the live
        /// blackboard as the operator starts instead of staying a
        /// planning-only prediction
        #[serde(default)]
        apply_effects_on_startup: bool,
        #[serde(default)]
        services: Vec<Service>,
    },
}

impl TaskDef {
    pub fn name(&self) -> &str {
        match self {
            TaskDef::Compound { name, .. } => name,
            TaskDef::Primitive { name, .. } => name,
        }
    }

    pub fn compound(name: &str, methods: Vec<MethodDef>) -> Self {
        TaskDef::Compound {
            name: name.to_string(),
            methods,
        }
    }

    pub fn primitive(
        name: &str,
        preconditions: Vec<Precondition>,
        operator: OperatorSpec,
        effects: Vec<Effect>,
    ) -> Self {
        TaskDef::Primitive {
            name: name.to_string(),
            preconditions,
            operator,
            effects,
            apply_effects_on_startup: false,
            services: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preconditions_against_snapshot() {
        let mut bb = Blackboard::new();
        bb.set("Hunger", 0.6f32);
        bb.set("OnDuty", true);

        let exists = Precondition::KeyExists {
            key: "Hunger".to_string(),
        };
        let not_exists = Precondition::KeyNotExists {
            key: "TargetFood".to_string(),
        };
        let at_least = Precondition::FloatAtLeast {
            key: "Hunger".to_string(),
            value: 0.5,
        };
        let below = Precondition::FloatBelow {
            key: "Hunger".to_string(),
            value: 0.5,
        };
        let flag = Precondition::BoolIs {
            key: "OnDuty".to_string(),
            value: true,
        };

        assert!(exists.is_met(&bb));
        assert!(not_exists.is_met(&bb));
        assert!(at_least.is_met(&bb));
        assert!(!below.is_met(&bb));
        assert!(flag.is_met(&bb));
    }

    #[test]
    fn test_missing_or_mistyped_keys_are_false() {
        let mut bb = Blackboard::new();
        bb.set("Hunger", "starving");

        let at_least = Precondition::FloatAtLeast {
            key: "Hunger".to_string(),
            value: 0.5,
        };
        let flag = Precondition::BoolIs {
            key: "Absent".to_string(),
            value: false,
        };

        assert!(!at_least.is_met(&bb));
        assert!(!flag.is_met(&bb));
    }

    #[test]
    fn test_copy_key_reads_through_earlier_effects() {
        let bb = Blackboard::new();
        let effects = vec![
            Effect::Set {
                key: "A".to_string(),
                value: BbValue::Float(3.0),
            },
            Effect::CopyKey {
                from: "A".to_string(),
                to: "B".to_string(),
            },
            Effect::Unset {
                key: "A".to_string(),
            },
        ];

        let mut out = Blackboard::new();
        eval_effects(&effects, &bb).apply_to(&mut out);

        assert!(!out.contains("A"));
        assert_eq!(out.float("B").unwrap(), 3.0);
    }

    #[test]
    fn test_copy_key_missing_source_is_noop() {
        let bb = Blackboard::new();
        let effects = vec![Effect::CopyKey {
            from: "Ghost".to_string(),
            to: "B".to_string(),
        }];
        assert!(eval_effects(&effects, &bb).is_empty());
    }

    #[test]
    fn test_nearest_food_skips_carried_and_out_of_range() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let near = world.spawn((Food { nutrition: 5.0 }, Position::new(2.0, 0.0, 0.0)));
        let carrier = world.spawn((Position::new(1.0, 0.0, 0.0),));
        let held = world.spawn((
            Food { nutrition: 5.0 },
            Position::new(1.0, 0.0, 0.0),
            Carried { by: carrier },
        ));
        let far = world.spawn((Food { nutrition: 5.0 }, Position::new(50.0, 0.0, 0.0)));

        let sensor = Sensor::NearestFood { radius: None };
        let found = sensor.sense(&world, agent, Vec3::ZERO, 7.0);

        assert_eq!(found.map(|(e, _)| e), Some(near));
        let _ = (held, far);
    }

    #[test]
    fn test_nearest_hostile_requires_living_target() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let mut dead = Health::new(10.0);
        dead.damage(10.0);
        world.spawn((Hostile, Position::new(1.0, 0.0, 0.0), dead));
        let alive = world.spawn((Hostile, Position::new(3.0, 0.0, 0.0), Health::new(10.0)));

        let sensor = Sensor::NearestHostile { radius: None };
        let found = sensor.sense(&world, agent, Vec3::ZERO, 7.0);

        assert_eq!(found.map(|(e, _)| e), Some(alive));
    }

    #[test]
    fn test_service_range_prefers_authored_override() {
        let mut bb = Blackboard::new();
        bb.set(keys::VISION_RADIUS, 9.0f32);

        let scoped = Service {
            id: "FoodScan".to_string(),
            key: "TargetFood".to_string(),
            sensor: Sensor::NearestFood { radius: Some(3.0) },
            min_cooldown: 0.5,
            max_cooldown: 1.0,
        };
        let open = Service {
            sensor: Sensor::NearestFood { radius: None },
            ..scoped.clone()
        };

        assert_eq!(scoped.range(&bb), 3.0);
        assert_eq!(open.range(&bb), 9.0);
    }
}
