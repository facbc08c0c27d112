//! Melee swing resolution
//!
//! The melee operator only decides whether an attack task keeps
//! running; the swings themselves land here so damage cadence stays
//! tied to the simulation tick rather than to NPC scheduling order.

use hecs::{Entity, World};

use crate::components::{Health, MeleeCombat, Position};

/// Advances swing timers for everyone engaged in melee and applies the
/// damage. A swing only lands while the target is in range; the timer
/// re-arms either way.
pub fn melee_combat_system(world: &mut World, dt: f32) {
    let mut swings: Vec<(Entity, f32)> = Vec::new();

    for (_, (combat, position)) in world.query::<(&mut MeleeCombat, &Position)>().iter() {
        combat.next_swing -= dt;
        if combat.next_swing > 0.0 {
            continue;
        }
        combat.next_swing = combat.interval;

        let target_coords = match world.get::<&Position>(combat.target) {
            Ok(target) => target.coords,
            Err(_) => continue,
        };
        if position.coords.distance(&target_coords) > combat.range {
            continue;
        }
        swings.push((combat.target, combat.damage));
    }

    for (target, damage) in swings {
        if let Ok(mut health) = world.get::<&mut Health>(target) {
            health.damage(damage);
        }
    }
}
