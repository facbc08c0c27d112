//! Operators: the world-facing half of primitive tasks
//!
//! A primitive task names an operator; the runtime calls `startup` once
//! when the task becomes current, `update` every serviced tick, and
//! `shutdown` exactly once when it stops for any reason. Operators that
//! discover their blackboard target no longer exists remove the stale
//! key before failing, so the next plan does not chase a ghost.

use hecs::{Entity, World};
use serde::{Deserialize, Serialize};

use crate::blackboard::{keys, BbValue, Blackboard, DEFAULT_MOVE_SPEED};
use crate::components::{Carried, Food, Health, MeleeCombat, Position, Vec3};

/// What an operator reports from `update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorStatus {
    /// Still working; the agent yields the rest of this tick
    Continuing,
    Finished,
    Failed,
    /// Only ever handed to `shutdown`, when a plan is torn down early
    Cancelled,
}

fn default_stop_range() -> f32 {
    0.75
}

fn default_move_timeout() -> f32 {
    10.0
}

fn default_carry_key() -> String {
    "CarriedItem".to_string()
}

fn default_reach() -> f32 {
    1.5
}

fn default_attack_range() -> f32 {
    1.5
}

fn default_attack_damage() -> f32 {
    5.0
}

fn default_attack_interval() -> f32 {
    0.8
}

/// Authored operator, one variant per behavior the engine can execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperatorSpec {
    /// Walk toward a blackboard target (an entity, tracked live, or a
    /// fixed coordinate) until within `stop_range`
    MoveTo {
        target_key: String,
        #[serde(default = "default_stop_range")]
        stop_range: f32,
        #[serde(default = "default_move_timeout")]
        timeout: f32,
    },
    /// Take a nearby entity out of the world and into inventory
    PickUp {
        target_key: String,
        #[serde(default = "default_carry_key")]
        carry_key: String,
        #[serde(default = "default_reach")]
        reach: f32,
    },
    /// Consume the carried item, healing by its nutrition
    EatCarried {
        #[serde(default = "default_carry_key")]
        carry_key: String,
    },
    /// Engage a blackboard target until it dies; actual swings land in
    /// the melee combat system
    MeleeAttack {
        target_key: String,
        #[serde(default = "default_attack_range")]
        range: f32,
        #[serde(default = "default_attack_damage")]
        damage: f32,
        #[serde(default = "default_attack_interval")]
        interval: f32,
    },
    /// Idle in place
    Wait { seconds: f32 },
    /// Write a blackboard fact and finish immediately
    SetKey { key: String, value: BbValue },
}

impl OperatorSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            OperatorSpec::MoveTo { .. } => "MoveTo",
            OperatorSpec::PickUp { .. } => "PickUp",
            OperatorSpec::EatCarried { .. } => "EatCarried",
            OperatorSpec::MeleeAttack { .. } => "MeleeAttack",
            OperatorSpec::Wait { .. } => "Wait",
            OperatorSpec::SetKey { .. } => "SetKey",
        }
    }

    /// Called once when the task becomes the plan's current task
    pub fn startup(&self, world: &mut World, agent: Entity, blackboard: &mut Blackboard) {
        if let OperatorSpec::MeleeAttack {
            target_key,
            range,
            damage,
            interval,
        } = self
        {
            if let Some(target) = blackboard.entity_opt(target_key) {
                let _ = world.insert_one(
                    agent,
                    MeleeCombat {
                        target,
                        damage: *damage,
                        range: *range,
                        interval: *interval,
                        next_swing: 0.0,
                    },
                );
            }
        }
    }

    /// Called every serviced tick while the task is current. `elapsed`
    /// is how long this operator has been running, including `dt`.
    pub fn update(
        &self,
        world: &mut World,
        agent: Entity,
        blackboard: &mut Blackboard,
        dt: f32,
        elapsed: f32,
    ) -> OperatorStatus {
        match self {
            OperatorSpec::MoveTo {
                target_key,
                stop_range,
                timeout,
            } => {
                if elapsed > *timeout {
                    log::debug!("{:?} move to {} timed out", agent, target_key);
                    return OperatorStatus::Failed;
                }
                let destination = match resolve_destination(world, blackboard, target_key) {
                    Some(destination) => destination,
                    None => return OperatorStatus::Failed,
                };
                let speed = blackboard.float_or(keys::MOVE_SPEED, DEFAULT_MOVE_SPEED);

                let mut position = match world.get::<&mut Position>(agent) {
                    Ok(position) => position,
                    Err(_) => {
                        log::warn!("{:?} cannot move without a position", agent);
                        return OperatorStatus::Failed;
                    }
                };
                let offset = destination - position.coords;
                let distance = offset.length();
                if distance <= *stop_range {
                    return OperatorStatus::Finished;
                }
                let step = speed * dt;
                if step >= distance {
                    position.coords = destination;
                    return OperatorStatus::Finished;
                }
                position.coords = position.coords + offset.normalize() * step;
                OperatorStatus::Continuing
            }

            OperatorSpec::PickUp {
                target_key,
                carry_key,
                reach,
            } => {
                let target = match blackboard.entity_opt(target_key) {
                    Some(target) => target,
                    None => return OperatorStatus::Failed,
                };
                if !world.contains(target) || world.get::<&Carried>(target).is_ok() {
                    drop_target_keys(blackboard, target_key);
                    return OperatorStatus::Failed;
                }
                let agent_coords = match world.get::<&Position>(agent) {
                    Ok(position) => position.coords,
                    Err(_) => return OperatorStatus::Failed,
                };
                let target_coords = match world.get::<&Position>(target) {
                    Ok(position) => position.coords,
                    Err(_) => {
                        drop_target_keys(blackboard, target_key);
                        return OperatorStatus::Failed;
                    }
                };
                if agent_coords.distance(&target_coords) > *reach {
                    // Out of reach is transient; keep the target so a
                    // replan can walk over first
                    return OperatorStatus::Failed;
                }

                let _ = world.insert_one(target, Carried { by: agent });
                let _ = world.remove_one::<Position>(target);
                blackboard.set(carry_key.clone(), target);
                OperatorStatus::Finished
            }

            OperatorSpec::EatCarried { carry_key } => {
                let item = match blackboard.entity_opt(carry_key) {
                    Some(item) => item,
                    None => return OperatorStatus::Failed,
                };
                // The reference is consumed either way
                blackboard.remove(carry_key);

                let held_by_us = matches!(world.get::<&Carried>(item), Ok(c) if c.by == agent);
                if !held_by_us {
                    return OperatorStatus::Failed;
                }
                let nutrition = match world.get::<&Food>(item) {
                    Ok(food) => food.nutrition,
                    Err(_) => return OperatorStatus::Failed,
                };
                let _ = world.despawn(item);
                if let Ok(mut health) = world.get::<&mut Health>(agent) {
                    health.current = (health.current + nutrition).min(health.max);
                }
                OperatorStatus::Finished
            }

            OperatorSpec::MeleeAttack {
                target_key, range, ..
            } => {
                let target = match blackboard.entity_opt(target_key) {
                    Some(target) => target,
                    None => return OperatorStatus::Failed,
                };
                if !world.contains(target) {
                    drop_target_keys(blackboard, target_key);
                    return OperatorStatus::Failed;
                }
                match world.get::<&Health>(target).map(|h| h.is_alive()) {
                    Err(_) => {
                        drop_target_keys(blackboard, target_key);
                        OperatorStatus::Failed
                    }
                    Ok(false) => {
                        drop_target_keys(blackboard, target_key);
                        OperatorStatus::Finished
                    }
                    Ok(true) => {
                        let agent_coords = match world.get::<&Position>(agent) {
                            Ok(position) => position.coords,
                            Err(_) => return OperatorStatus::Failed,
                        };
                        let target_coords = match world.get::<&Position>(target) {
                            Ok(position) => position.coords,
                            Err(_) => return OperatorStatus::Failed,
                        };
                        if agent_coords.distance(&target_coords) > *range {
                            return OperatorStatus::Failed;
                        }
                        OperatorStatus::Continuing
                    }
                }
            }

            OperatorSpec::Wait { seconds } => {
                if elapsed >= *seconds {
                    OperatorStatus::Finished
                } else {
                    let _ = dt;
                    OperatorStatus::Continuing
                }
            }

            OperatorSpec::SetKey { key, value } => {
                blackboard.set(key.clone(), value.clone());
                OperatorStatus::Finished
            }
        }
    }

    /// Called exactly once when the task stops being current, with the
    /// status it stopped under
    pub fn shutdown(
        &self,
        world: &mut World,
        agent: Entity,
        _blackboard: &mut Blackboard,
        status: OperatorStatus,
    ) {
        if let OperatorSpec::MeleeAttack { .. } = self {
            let _ = world.remove_one::<MeleeCombat>(agent);
        }
        log::trace!("{:?} {} shut down: {:?}", agent, self.kind(), status);
    }
}

/// Turns a blackboard target into a world position. Entity targets are
/// tracked live; a dangling entity clears the key and its coords
/// companion so the domain stops planning around it.
fn resolve_destination(world: &World, blackboard: &mut Blackboard, key: &str) -> Option<Vec3> {
    match blackboard.get(key).cloned() {
        Some(BbValue::Entity(target)) => match world.get::<&Position>(target) {
            Ok(position) => Some(position.coords),
            Err(_) => {
                log::debug!("dropping stale move target {}", key);
                drop_target_keys(blackboard, key);
                None
            }
        },
        Some(BbValue::Coords(coords)) => Some(coords),
        Some(other) => {
            log::warn!("move target {} holds {}, not a location", key, other.kind());
            None
        }
        None => None,
    }
}

fn drop_target_keys(blackboard: &mut Blackboard, key: &str) {
    blackboard.remove(key);
    blackboard.remove(&keys::coords_key(key));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Hostile;

    fn move_op(target_key: &str) -> OperatorSpec {
        OperatorSpec::MoveTo {
            target_key: target_key.to_string(),
            stop_range: default_stop_range(),
            timeout: default_move_timeout(),
        }
    }

    #[test]
    fn test_wait_finishes_after_duration() {
        let mut world = World::new();
        let agent = world.spawn(());
        let mut bb = Blackboard::new();
        let op = OperatorSpec::Wait { seconds: 1.0 };

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.5, 0.5),
            OperatorStatus::Continuing
        );
        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.5, 1.0),
            OperatorStatus::Finished
        );
    }

    #[test]
    fn test_move_to_walks_then_arrives() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let mut bb = Blackboard::new();
        bb.set("Spot", Vec3::new(5.0, 0.0, 0.0));
        let op = move_op("Spot");

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 1.0, 1.0),
            OperatorStatus::Continuing
        );
        let mid = world.get::<&Position>(agent).unwrap().coords;
        assert!((mid.x - 3.0).abs() < 0.0001);

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 1.0, 2.0),
            OperatorStatus::Finished
        );
        let end = world.get::<&Position>(agent).unwrap().coords;
        assert_eq!(end, Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_move_to_drops_dangling_entity_target() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let target = world.spawn((Position::new(4.0, 0.0, 0.0),));
        let mut bb = Blackboard::new();
        bb.set("Target", target);
        bb.set(keys::coords_key("Target"), Vec3::new(4.0, 0.0, 0.0));
        let op = move_op("Target");

        world.despawn(target).unwrap();
        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.1, 0.1),
            OperatorStatus::Failed
        );
        assert!(!bb.contains("Target"));
        assert!(!bb.contains("TargetCoords"));
    }

    #[test]
    fn test_move_to_timeout_keeps_target() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let mut bb = Blackboard::new();
        bb.set("Spot", Vec3::new(100.0, 0.0, 0.0));
        let op = move_op("Spot");

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.1, 10.1),
            OperatorStatus::Failed
        );
        assert!(bb.contains("Spot"));
    }

    #[test]
    fn test_pickup_moves_item_to_inventory() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let food = world.spawn((Food { nutrition: 3.0 }, Position::new(1.0, 0.0, 0.0)));
        let mut bb = Blackboard::new();
        bb.set("TargetFood", food);
        let op = OperatorSpec::PickUp {
            target_key: "TargetFood".to_string(),
            carry_key: "CarriedFood".to_string(),
            reach: 1.5,
        };

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.1, 0.1),
            OperatorStatus::Finished
        );
        assert_eq!(world.get::<&Carried>(food).unwrap().by, agent);
        assert!(world.get::<&Position>(food).is_err());
        assert_eq!(bb.entity("CarriedFood").unwrap(), food);
    }

    #[test]
    fn test_pickup_rejects_item_someone_else_holds() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let rival = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let food = world.spawn((Food { nutrition: 3.0 }, Carried { by: rival }));
        let mut bb = Blackboard::new();
        bb.set("TargetFood", food);
        let op = OperatorSpec::PickUp {
            target_key: "TargetFood".to_string(),
            carry_key: "CarriedFood".to_string(),
            reach: 1.5,
        };

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.1, 0.1),
            OperatorStatus::Failed
        );
        assert!(!bb.contains("TargetFood"));
    }

    #[test]
    fn test_pickup_out_of_reach_is_transient() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let food = world.spawn((Food { nutrition: 3.0 }, Position::new(9.0, 0.0, 0.0)));
        let mut bb = Blackboard::new();
        bb.set("TargetFood", food);
        let op = OperatorSpec::PickUp {
            target_key: "TargetFood".to_string(),
            carry_key: "CarriedFood".to_string(),
            reach: 1.5,
        };

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.1, 0.1),
            OperatorStatus::Failed
        );
        assert!(bb.contains("TargetFood"));
    }

    #[test]
    fn test_eat_consumes_item_and_heals() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0), {
            let mut h = Health::new(10.0);
            h.damage(5.0);
            h
        }));
        let food = world.spawn((Food { nutrition: 4.0 }, Carried { by: agent }));
        let mut bb = Blackboard::new();
        bb.set("CarriedFood", food);
        let op = OperatorSpec::EatCarried {
            carry_key: "CarriedFood".to_string(),
        };

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.1, 0.1),
            OperatorStatus::Finished
        );
        assert!(!world.contains(food));
        assert_eq!(world.get::<&Health>(agent).unwrap().current, 9.0);
        assert!(!bb.contains("CarriedFood"));
    }

    #[test]
    fn test_melee_lifecycle() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let target = world.spawn((Position::new(1.0, 0.0, 0.0), Health::new(10.0), Hostile));
        let mut bb = Blackboard::new();
        bb.set("TargetHostile", target);
        bb.set(keys::coords_key("TargetHostile"), Vec3::new(1.0, 0.0, 0.0));
        let op = OperatorSpec::MeleeAttack {
            target_key: "TargetHostile".to_string(),
            range: 1.5,
            damage: 5.0,
            interval: 0.8,
        };

        op.startup(&mut world, agent, &mut bb);
        assert_eq!(world.get::<&MeleeCombat>(agent).unwrap().target, target);

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.1, 0.1),
            OperatorStatus::Continuing
        );

        world.get::<&mut Health>(target).unwrap().damage(10.0);
        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.1, 0.2),
            OperatorStatus::Finished
        );
        assert!(!bb.contains("TargetHostile"));
        assert!(!bb.contains("TargetHostileCoords"));

        op.shutdown(&mut world, agent, &mut bb, OperatorStatus::Finished);
        assert!(world.get::<&MeleeCombat>(agent).is_err());
    }

    #[test]
    fn test_melee_out_of_range_fails_but_keeps_target() {
        let mut world = World::new();
        let agent = world.spawn((Position::new(0.0, 0.0, 0.0),));
        let target = world.spawn((Position::new(8.0, 0.0, 0.0), Health::new(10.0)));
        let mut bb = Blackboard::new();
        bb.set("TargetHostile", target);
        let op = OperatorSpec::MeleeAttack {
            target_key: "TargetHostile".to_string(),
            range: 1.5,
            damage: 5.0,
            interval: 0.8,
        };

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.1, 0.1),
            OperatorStatus::Failed
        );
        assert!(bb.contains("TargetHostile"));
    }

    #[test]
    fn test_set_key_writes_and_finishes() {
        let mut world = World::new();
        let agent = world.spawn(());
        let mut bb = Blackboard::new();
        let op = OperatorSpec::SetKey {
            key: "Ate".to_string(),
            value: true.into(),
        };

        assert_eq!(
            op.update(&mut world, agent, &mut bb, 0.1, 0.1),
            OperatorStatus::Finished
        );
        assert!(bb.flag("Ate").unwrap());
    }
}
