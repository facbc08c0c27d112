//! ECS components for station NPCs and the things they interact with

use std::collections::HashMap;
use std::ops::{Add, Mul, Sub};

use hecs::Entity;
use serde::{Deserialize, Serialize};

use crate::blackboard::Blackboard;
use crate::jobs::{CancelToken, JobId};
use crate::planner::Plan;

/// 3D position / direction vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        (*other - *self).length()
    }

    /// Zero-length vectors normalize to zero rather than NaN
    pub fn normalize(&self) -> Vec3 {
        let len = self.length();
        if len > 0.0001 {
            Vec3::new(self.x / len, self.y / len, self.z / len)
        } else {
            Vec3::ZERO
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// World position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub coords: Vec3,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            coords: Vec3::new(x, y, z),
        }
    }
}

/// Hit points; entities at zero are dead but not automatically despawned
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Health {
    pub fn new(max: f32) -> Self {
        Self { current: max, max }
    }

    pub fn is_alive(&self) -> bool {
        self.current > 0.0
    }

    pub fn damage(&mut self, amount: f32) {
        self.current = (self.current - amount).max(0.0);
    }
}

/// Something edible
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Food {
    pub nutrition: f32,
}

/// Marks an entity as a threat for hostile-scanning sensors
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Hostile;

/// Item held by another entity; carried items are ignored by sensors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Carried {
    #[serde(with = "crate::blackboard::entity_bits")]
    pub by: Entity,
}

/// Marks an agent as awake; sleeping agents are skipped by the scheduler
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ActiveNpc;

/// Attached by the melee operator for the duration of an attack task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeleeCombat {
    #[serde(with = "crate::blackboard::entity_bits")]
    pub target: Entity,
    pub damage: f32,
    pub range: f32,
    pub interval: f32,
    pub next_swing: f32,
}

/// Seconds between replans while no plan job is in flight
pub const DEFAULT_PLAN_COOLDOWN: f32 = 0.45;

/// The planning brain of one NPC
///
/// Serializable state is the durable identity of the agent: which root
/// task it pursues, its blackboard, and its replan cadence. Everything
/// else (the current plan, an in-flight job, service timers) is
/// transient execution state and rebuilt after a load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtnAgent {
    /// Name of the compound task this agent keeps replanning from
    pub root_task: String,
    pub blackboard: Blackboard,
    /// Seconds between replan requests while idle
    pub plan_cooldown: f32,

    #[serde(skip)]
    pub(crate) plan: Option<Plan>,
    #[serde(skip)]
    pub(crate) planning_job: Option<JobId>,
    #[serde(skip)]
    pub(crate) planning_token: Option<CancelToken>,
    /// Counts down to the next replan; starts at zero so a freshly
    /// spawned agent plans on its first serviced tick
    #[serde(skip)]
    pub(crate) plan_accumulator: f32,
    /// Seconds the current operator has been running
    #[serde(skip)]
    pub(crate) operator_elapsed: f32,
    #[serde(skip)]
    pub(crate) service_cooldowns: HashMap<String, f32>,
}

impl HtnAgent {
    pub fn new(root_task: impl Into<String>) -> Self {
        Self {
            root_task: root_task.into(),
            blackboard: Blackboard::new(),
            plan_cooldown: DEFAULT_PLAN_COOLDOWN,
            plan: None,
            planning_job: None,
            planning_token: None,
            plan_accumulator: 0.0,
            operator_elapsed: 0.0,
            service_cooldowns: HashMap::new(),
        }
    }

    pub fn with_cooldown(mut self, seconds: f32) -> Self {
        self.plan_cooldown = seconds;
        self
    }

    pub fn has_plan(&self) -> bool {
        self.plan.is_some()
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn is_planning(&self) -> bool {
        self.planning_job.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_math() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 6.0, 3.0);

        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(b - a, Vec3::new(3.0, 4.0, 0.0));
        assert_eq!(a * 2.0, Vec3::new(2.0, 4.0, 6.0));
        assert!((Vec3::new(3.0, 4.0, 0.0).normalize().length() - 1.0).abs() < 0.0001);
        assert_eq!(Vec3::ZERO.normalize(), Vec3::ZERO);
    }

    #[test]
    fn test_health_clamps_at_zero() {
        let mut health = Health::new(10.0);
        health.damage(4.0);
        assert!(health.is_alive());
        assert_eq!(health.current, 6.0);

        health.damage(100.0);
        assert!(!health.is_alive());
        assert_eq!(health.current, 0.0);
    }

    #[test]
    fn test_fresh_agent_plans_immediately() {
        let agent = HtnAgent::new("CrewRoutine");
        assert_eq!(agent.plan_accumulator, 0.0);
        assert!(!agent.has_plan());
        assert!(!agent.is_planning());
        assert_eq!(agent.plan_cooldown, DEFAULT_PLAN_COOLDOWN);
    }

    #[test]
    fn test_agent_serializes_without_transient_state() {
        let mut agent = HtnAgent::new("CrewRoutine").with_cooldown(1.5);
        agent.blackboard.set("Hunger", 0.4f32);
        agent.plan_accumulator = 0.9;
        agent.operator_elapsed = 2.0;

        let bytes = bincode::serialize(&agent).unwrap();
        let restored: HtnAgent = bincode::deserialize(&bytes).unwrap();

        assert_eq!(restored.root_task, "CrewRoutine");
        assert_eq!(restored.plan_cooldown, 1.5);
        assert_eq!(restored.blackboard.float("Hunger").unwrap(), 0.4);
        assert_eq!(restored.plan_accumulator, 0.0);
        assert_eq!(restored.operator_elapsed, 0.0);
        assert!(restored.plan.is_none());
    }
}
