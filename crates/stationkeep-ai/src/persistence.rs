//! Save and load
//!
//! World state is serialized with bincode. Entity ids are not stable
//! across worlds, so saved references (carried items, entity-valued
//! blackboard facts) are stored as raw id bits and remapped to the
//! freshly spawned entities on load; a reference to an entity that was
//! never saved is dropped with a warning. Plans, plan jobs, and combat
//! markers are transient and are rebuilt by the scheduler after a load.

use std::collections::HashMap;
use std::fmt;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use hecs::{Entity, World};
use serde::{Deserialize, Serialize};

use crate::blackboard::{BbValue, Blackboard};
use crate::components::{ActiveNpc, Carried, Food, Health, Hostile, HtnAgent, Position};

pub const SAVE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SaveData {
    version: u32,
    entities: Vec<SerializableEntity>,
}

#[derive(Serialize, Deserialize, Default)]
struct SerializableEntity {
    bits: u64,
    position: Option<Position>,
    health: Option<Health>,
    food: Option<Food>,
    hostile: bool,
    active: bool,
    carried_by: Option<u64>,
    agent: Option<HtnAgent>,
}

#[derive(Debug)]
pub enum SaveError {
    Io(std::io::Error),
    Bincode(Box<bincode::ErrorKind>),
    VersionMismatch { expected: u32, found: u32 },
}

impl From<std::io::Error> for SaveError {
    fn from(err: std::io::Error) -> Self {
        SaveError::Io(err)
    }
}

impl From<Box<bincode::ErrorKind>> for SaveError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        SaveError::Bincode(err)
    }
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::Io(err) => write!(f, "io error: {}", err),
            SaveError::Bincode(err) => write!(f, "serialization error: {}", err),
            SaveError::VersionMismatch { expected, found } => {
                write!(f, "save version mismatch: expected {}, found {}", expected, found)
            }
        }
    }
}

impl std::error::Error for SaveError {}

pub fn save_world<W: Write>(writer: W, world: &World) -> Result<(), SaveError> {
    let mut entities = Vec::new();

    for entity_ref in world.iter() {
        let mut saved = SerializableEntity {
            bits: entity_ref.entity().to_bits().get(),
            ..Default::default()
        };
        if let Some(position) = entity_ref.get::<&Position>() {
            saved.position = Some(*position);
        }
        if let Some(health) = entity_ref.get::<&Health>() {
            saved.health = Some(*health);
        }
        if let Some(food) = entity_ref.get::<&Food>() {
            saved.food = Some(*food);
        }
        saved.hostile = entity_ref.get::<&Hostile>().is_some();
        saved.active = entity_ref.get::<&ActiveNpc>().is_some();
        if let Some(carried) = entity_ref.get::<&Carried>() {
            saved.carried_by = Some(carried.by.to_bits().get());
        }
        if let Some(agent) = entity_ref.get::<&HtnAgent>() {
            saved.agent = Some((*agent).clone());
        }
        entities.push(saved);
    }

    let data = SaveData {
        version: SAVE_VERSION,
        entities,
    };
    bincode::serialize_into(writer, &data)?;
    Ok(())
}

pub fn load_world<R: Read>(reader: R) -> Result<World, SaveError> {
    let data: SaveData = bincode::deserialize_from(reader)?;
    if data.version != SAVE_VERSION {
        return Err(SaveError::VersionMismatch {
            expected: SAVE_VERSION,
            found: data.version,
        });
    }

    let mut world = World::new();

    // Pass 1: spawn everything so cross-references can be remapped
    let mut remap: HashMap<u64, Entity> = HashMap::new();
    for saved in &data.entities {
        remap.insert(saved.bits, world.spawn(()));
    }

    // Pass 2: attach components, rewriting saved entity ids
    for saved in &data.entities {
        let entity = remap[&saved.bits];
        if let Some(position) = saved.position {
            let _ = world.insert_one(entity, position);
        }
        if let Some(health) = saved.health {
            let _ = world.insert_one(entity, health);
        }
        if let Some(food) = saved.food {
            let _ = world.insert_one(entity, food);
        }
        if saved.hostile {
            let _ = world.insert_one(entity, Hostile);
        }
        if saved.active {
            let _ = world.insert_one(entity, ActiveNpc);
        }
        if let Some(bits) = saved.carried_by {
            match remap.get(&bits) {
                Some(&by) => {
                    let _ = world.insert_one(entity, Carried { by });
                }
                None => log::warn!("dropping carried-by reference to unsaved entity"),
            }
        }
        if let Some(agent) = &saved.agent {
            let mut agent = agent.clone();
            remap_blackboard(&mut agent.blackboard, &remap);
            let _ = world.insert_one(entity, agent);
        }
    }

    Ok(world)
}

pub fn save_to_file(path: impl AsRef<Path>, world: &World) -> Result<(), SaveError> {
    let file = std::fs::File::create(path)?;
    save_world(BufWriter::new(file), world)
}

pub fn load_from_file(path: impl AsRef<Path>) -> Result<World, SaveError> {
    let file = std::fs::File::open(path)?;
    load_world(BufReader::new(file))
}

fn remap_blackboard(blackboard: &mut Blackboard, remap: &HashMap<u64, Entity>) {
    let mut rewrites: Vec<(String, Entity)> = Vec::new();
    let mut stale: Vec<String> = Vec::new();
    for (key, value) in blackboard.iter() {
        if let BbValue::Entity(old) = value {
            match remap.get(&old.to_bits().get()) {
                Some(&new) => rewrites.push((key.to_string(), new)),
                None => stale.push(key.to_string()),
            }
        }
    }
    for (key, entity) in rewrites {
        blackboard.set(key, entity);
    }
    for key in stale {
        log::warn!("dropping blackboard key {} referencing an unsaved entity", key);
        blackboard.remove(&key);
    }
}
