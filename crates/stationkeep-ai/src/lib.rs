//! Stationkeep AI - HTN Planning Engine for Station NPCs
//!
//! An ECS-based NPC engine: agents decompose a hierarchical task
//! network into plans of primitive tasks, and a scheduler executes
//! those plans one operator at a time against a `hecs` world.
//!
//! # Architecture
//!
//! - **Blackboard**: per-agent facts, cloned into plan searches so
//!   planning never races execution
//! - **Task library**: authored compound/primitive tasks, resolved
//!   into an indexed domain shared behind an `Arc`
//! - **Planner**: resumable depth-first decomposition with
//!   backtracking, run inside time-sliced jobs on a FIFO queue
//! - **Scheduler**: budgeted round-robin over awake agents; hands
//!   finished plans off and drives operator startup/update/shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stationkeep_ai::prelude::*;
//!
//! let library = Arc::new(TaskLibrary::from_json(include_str!(
//!     "../../../data/task_library.json"
//! )).unwrap());
//!
//! let mut world = hecs::World::new();
//! world.spawn((
//!     Position::new(0.0, 0.0, 0.0),
//!     Health::new(10.0),
//!     ActiveNpc,
//!     HtnAgent::new("CrewRoutine"),
//! ));
//!
//! let mut scheduler = NpcScheduler::new(SchedulerConfig::default(), library);
//! loop {
//!     let dt = 1.0 / 30.0;
//!     scheduler.update(&mut world, dt);
//!     melee_combat_system(&mut world, dt);
//! }
//! ```

pub mod blackboard;
pub mod components;
pub mod jobs;
pub mod library;
pub mod operators;
pub mod planner;
pub mod persistence;
pub mod systems;
pub mod tasks;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::blackboard::{keys, BbValue, Blackboard, BlackboardError};
    pub use crate::components::*;
    pub use crate::jobs::{CancelToken, JobId, JobPoll, JobQueue, JobStatus};
    pub use crate::library::{LibraryError, TaskLibrary, TaskRef};
    pub use crate::operators::{OperatorSpec, OperatorStatus};
    pub use crate::planner::{plan_now, Plan, PlanFailure, PlanResult, PlanSearch, SearchStep};
    pub use crate::persistence::{load_world, save_world, SaveError};
    pub use crate::systems::*;
    pub use crate::tasks::{
        eval_effects, Effect, MethodDef, Precondition, Sensor, Service, TaskDef,
    };
}
