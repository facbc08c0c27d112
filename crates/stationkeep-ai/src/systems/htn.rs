//! NPC scheduler: plan requests, plan hand-off, and operator execution
//!
//! Each tick the scheduler drains the plan job queue under its time
//! budget, then services awake agents round-robin up to `max_updates`.
//! A serviced agent sees at most one of: a finished job handed off, or
//! its current operator updated. Replanning runs on a cooldown that
//! only counts down while no job is in flight, so one agent never has
//! two searches queued.

use std::sync::Arc;
use std::time::Duration;

use hecs::{Entity, World};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::blackboard::keys;
use crate::components::{ActiveNpc, HtnAgent, Position};
use crate::jobs::{CancelToken, JobPoll, JobQueue};
use crate::library::{PrimitiveTask, TaskLibrary};
use crate::operators::OperatorStatus;
use crate::planner::{traversal_improves, Plan, PlanSearch, DEFAULT_MAX_EXPANSIONS};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Most agents serviced in one tick
    pub max_updates: usize,
    /// Time budget for draining the plan job queue each tick
    pub queue_budget: Duration,
    /// Longest a single plan job may run within one tick
    pub job_slice: Duration,
    /// Expansion cap handed to every plan search
    pub max_expansions: usize,
    /// Seed for service cooldown jitter
    pub seed: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_updates: 128,
            queue_budget: Duration::from_millis(4),
            job_slice: Duration::from_millis(20),
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            seed: 0x5eed,
        }
    }
}

/// Drives every [`HtnAgent`] in a world
pub struct NpcScheduler {
    config: SchedulerConfig,
    library: Arc<TaskLibrary>,
    queue: JobQueue,
    rng: StdRng,
    last_served: Option<Entity>,
}

impl NpcScheduler {
    pub fn new(config: SchedulerConfig, library: Arc<TaskLibrary>) -> Self {
        let queue = JobQueue::new(config.queue_budget, config.job_slice);
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            library,
            queue,
            rng,
            last_served: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn library(&self) -> &Arc<TaskLibrary> {
        &self.library
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Swaps the planning domain, tearing down every plan built
    /// against the old one first
    pub fn set_library(&mut self, world: &mut World, library: Arc<TaskLibrary>) {
        self.reset(world);
        self.library = library;
    }

    /// One scheduler tick
    pub fn update(&mut self, world: &mut World, dt: f32) {
        self.queue.cancel_orphans(world);
        self.queue.process();

        let agents = collect_agents(world);
        if agents.is_empty() {
            self.last_served = None;
            return;
        }

        // Resume the rotation just past the agent served last tick, so
        // a cap smaller than the population starves nobody
        let start = match self.last_served {
            Some(last) => agents.partition_point(|&e| e <= last) % agents.len(),
            None => 0,
        };

        let served = agents.len().min(self.config.max_updates);
        for offset in 0..served {
            let entity = agents[(start + offset) % agents.len()];
            self.update_agent(world, entity, dt);
            self.last_served = Some(entity);
        }
    }

    fn update_agent(&mut self, world: &mut World, entity: Entity, dt: f32) {
        // Take the agent off the entity so operators get unrestricted
        // access to the world, including to the agent's own components
        let mut agent = match world.remove_one::<HtnAgent>(entity) {
            Ok(agent) => agent,
            Err(_) => return,
        };

        agent.blackboard.set(keys::OWNER, entity);
        if let Ok(coords) = world.get::<&Position>(entity).map(|p| p.coords) {
            agent.blackboard.set(keys::OWNER_COORDS, coords);
        }

        let mut handed_off = false;
        if let Some(job) = agent.planning_job {
            match self.queue.poll(job) {
                JobPoll::Pending => {}
                JobPoll::Ready(result) => {
                    handed_off = true;
                    agent.planning_job = None;
                    agent.planning_token = None;
                    match result {
                        Ok(plan) => self.try_install(world, entity, &mut agent, plan),
                        Err(failure) => {
                            // The current plan, if any, keeps running
                            log::debug!("{:?} planning failed: {}", entity, failure);
                        }
                    }
                }
            }
        }

        if agent.planning_job.is_none() {
            agent.plan_accumulator -= dt;
            if agent.plan_accumulator <= 0.0 {
                agent.plan_accumulator = agent.plan_cooldown;
                self.request_plan(entity, &mut agent);
            }
        }

        if !handed_off && agent.plan.is_some() {
            self.execute(world, entity, &mut agent, dt);
        }

        let _ = world.insert_one(entity, agent);
    }

    fn request_plan(&mut self, entity: Entity, agent: &mut HtnAgent) {
        let root = match self.library.find(&agent.root_task) {
            Some(task_ref) => task_ref,
            None => {
                log::error!("{:?} has unknown root task {}", entity, agent.root_task);
                return;
            }
        };
        let cancel = CancelToken::new();
        let search = PlanSearch::new(Arc::clone(&self.library), root, agent.blackboard.clone())
            .with_max_expansions(self.config.max_expansions);
        let id = self.queue.enqueue(entity, search, cancel.clone());
        agent.planning_job = Some(id);
        agent.planning_token = Some(cancel);
    }

    /// Adopts a finished plan unless the one already running took an
    /// equal or better branch through the domain
    fn try_install(&self, world: &mut World, entity: Entity, agent: &mut HtnAgent, plan: Plan) {
        if let Some(current) = &agent.plan {
            if !traversal_improves(current.btr(), plan.btr()) {
                log::trace!("{:?} keeping current plan", entity);
                return;
            }
            self.shutdown_current(world, entity, agent, OperatorStatus::Cancelled);
        }

        if plan.is_empty() {
            log::trace!("{:?} planned nothing to do", entity);
            agent.plan = None;
            agent.service_cooldowns.clear();
            return;
        }

        agent.plan = Some(plan);
        agent.service_cooldowns.clear();
        self.startup_current(world, entity, agent);
    }

    /// Starts the plan's current task: optionally commits its predicted
    /// effects to the live blackboard, then runs the operator's startup
    fn startup_current(&self, world: &mut World, entity: Entity, agent: &mut HtnAgent) {
        let (task_index, effects) = match agent.plan.as_ref() {
            Some(plan) => match plan.current() {
                Some(index) => (index, plan.current_effects().cloned()),
                None => return,
            },
            None => return,
        };
        let library = Arc::clone(&self.library);
        let task = library.primitive(task_index);

        agent.operator_elapsed = 0.0;
        if task.apply_effects_on_startup {
            if let Some(effects) = effects {
                effects.apply_to(&mut agent.blackboard);
            }
        }
        task.operator.startup(world, entity, &mut agent.blackboard);
    }

    fn shutdown_current(
        &self,
        world: &mut World,
        entity: Entity,
        agent: &mut HtnAgent,
        status: OperatorStatus,
    ) {
        let task_index = match agent.plan.as_ref().and_then(|p| p.current()) {
            Some(index) => index,
            None => return,
        };
        let library = Arc::clone(&self.library);
        let task = library.primitive(task_index);
        task.operator
            .shutdown(world, entity, &mut agent.blackboard, status);
    }

    /// Runs the current operator. A task that finishes chains straight
    /// into the next one, so instant operators do not burn a tick each;
    /// the chain is bounded by the plan's length.
    fn execute(&mut self, world: &mut World, entity: Entity, agent: &mut HtnAgent, dt: f32) {
        loop {
            let task_index = match agent.plan.as_ref().and_then(|p| p.current()) {
                Some(index) => index,
                None => {
                    agent.plan = None;
                    agent.service_cooldowns.clear();
                    return;
                }
            };
            let library = Arc::clone(&self.library);
            let task = library.primitive(task_index);

            self.run_services(world, entity, agent, task, dt);

            agent.operator_elapsed += dt;
            let status = task.operator.update(
                world,
                entity,
                &mut agent.blackboard,
                dt,
                agent.operator_elapsed,
            );

            match status {
                OperatorStatus::Continuing => return,
                OperatorStatus::Finished => {
                    task.operator.shutdown(
                        world,
                        entity,
                        &mut agent.blackboard,
                        OperatorStatus::Finished,
                    );
                    if let Some(plan) = agent.plan.as_mut() {
                        plan.advance();
                    }
                    if agent.plan.as_ref().map_or(true, |p| p.is_exhausted()) {
                        log::debug!("{:?} completed its plan", entity);
                        agent.plan = None;
                        agent.service_cooldowns.clear();
                        return;
                    }
                    self.startup_current(world, entity, agent);
                }
                OperatorStatus::Failed | OperatorStatus::Cancelled => {
                    log::debug!("{:?} task {} failed, discarding plan", entity, task.name);
                    task.operator
                        .shutdown(world, entity, &mut agent.blackboard, status);
                    agent.plan = None;
                    agent.service_cooldowns.clear();
                    return;
                }
            }
        }
    }

    /// Updates any sensors bound to the current task whose cooldowns
    /// have expired, then re-arms them with jitter
    fn run_services(
        &mut self,
        world: &mut World,
        entity: Entity,
        agent: &mut HtnAgent,
        task: &PrimitiveTask,
        dt: f32,
    ) {
        if task.services.is_empty() {
            return;
        }
        for timer in agent.service_cooldowns.values_mut() {
            *timer -= dt;
        }
        let origin = match world.get::<&Position>(entity).map(|p| p.coords) {
            Ok(coords) => coords,
            Err(_) => return,
        };

        for service in &task.services {
            let ready = agent
                .service_cooldowns
                .get(&service.id)
                .map_or(true, |t| *t <= 0.0);
            if !ready {
                continue;
            }

            let radius = service.range(&agent.blackboard);
            match service.sensor.sense(world, entity, origin, radius) {
                Some((target, coords)) => {
                    agent.blackboard.set(service.key.clone(), target);
                    agent
                        .blackboard
                        .set(keys::coords_key(&service.key), coords);
                }
                None => {
                    agent.blackboard.remove(&service.key);
                    agent.blackboard.remove(&keys::coords_key(&service.key));
                }
            }

            let cooldown = if service.max_cooldown > service.min_cooldown {
                self.rng.gen_range(service.min_cooldown..service.max_cooldown)
            } else {
                service.min_cooldown
            };
            agent.service_cooldowns.insert(service.id.clone(), cooldown);
        }
    }

    /// Tears down an agent's planning state: cancels any in-flight job
    /// and shuts the current operator down as cancelled. The agent
    /// component itself stays on the entity.
    pub fn detach(&mut self, world: &mut World, entity: Entity) {
        let mut agent = match world.remove_one::<HtnAgent>(entity) {
            Ok(agent) => agent,
            Err(_) => return,
        };
        self.detach_inner(world, entity, &mut agent);
        let _ = world.insert_one(entity, agent);
    }

    fn detach_inner(&mut self, world: &mut World, entity: Entity, agent: &mut HtnAgent) {
        if let Some(token) = agent.planning_token.take() {
            token.cancel();
        }
        if let Some(job) = agent.planning_job.take() {
            self.queue.discard(job);
        }
        self.shutdown_current(world, entity, agent, OperatorStatus::Cancelled);
        agent.plan = None;
        agent.service_cooldowns.clear();
        agent.plan_accumulator = 0.0;
    }

    /// Puts an agent to sleep: detaches it and drops its awake marker
    /// so the rotation skips it until [`NpcScheduler::wake`]
    pub fn sleep(&mut self, world: &mut World, entity: Entity) {
        self.detach(world, entity);
        let _ = world.remove_one::<ActiveNpc>(entity);
    }

    pub fn wake(&mut self, world: &mut World, entity: Entity) {
        if world.contains(entity) {
            let _ = world.insert_one(entity, ActiveNpc);
        }
    }

    /// Detaches every agent, awake or not. Used after a world load and
    /// before a library swap.
    pub fn reset(&mut self, world: &mut World) {
        let entities: Vec<Entity> = world
            .query::<&HtnAgent>()
            .iter()
            .map(|(entity, _)| entity)
            .collect();
        for entity in entities {
            self.detach(world, entity);
        }
        self.last_served = None;
    }
}

/// Makes an agent replan on its next serviced tick instead of waiting
/// out the cooldown
pub fn force_replan(agent: &mut HtnAgent) {
    agent.plan_accumulator = 0.0;
}

fn collect_agents(world: &World) -> Vec<Entity> {
    let mut agents: Vec<Entity> = world
        .query::<(&ActiveNpc, &HtnAgent)>()
        .iter()
        .map(|(entity, _)| entity)
        .collect();
    agents.sort_unstable();
    agents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::OperatorSpec;
    use crate::tasks::{MethodDef, TaskDef};

    fn wait_library() -> Arc<TaskLibrary> {
        Arc::new(
            TaskLibrary::from_defs(vec![
                TaskDef::compound("Root", vec![MethodDef::new(vec![], vec!["Idle"])]),
                TaskDef::primitive("Idle", vec![], OperatorSpec::Wait { seconds: 60.0 }, vec![]),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_agent_acquires_plan_over_ticks() {
        let mut world = World::new();
        let entity = world.spawn((
            Position::new(0.0, 0.0, 0.0),
            ActiveNpc,
            HtnAgent::new("Root"),
        ));
        let mut scheduler = NpcScheduler::new(SchedulerConfig::default(), wait_library());

        // Tick 1 requests, tick 2 hands the plan off, tick 3 executes
        scheduler.update(&mut world, 0.1);
        assert!(world.get::<&HtnAgent>(entity).unwrap().is_planning());

        scheduler.update(&mut world, 0.1);
        let agent = world.get::<&HtnAgent>(entity).unwrap();
        assert!(agent.has_plan());
        assert!(!agent.is_planning());
    }

    #[test]
    fn test_sleeping_agents_are_skipped() {
        let mut world = World::new();
        let entity = world.spawn((Position::new(0.0, 0.0, 0.0), HtnAgent::new("Root")));
        let mut scheduler = NpcScheduler::new(SchedulerConfig::default(), wait_library());

        for _ in 0..5 {
            scheduler.update(&mut world, 0.1);
        }
        let agent = world.get::<&HtnAgent>(entity).unwrap();
        assert!(!agent.is_planning());
        assert!(!agent.has_plan());
    }

    #[test]
    fn test_sleep_cancels_in_flight_planning() {
        let mut world = World::new();
        let entity = world.spawn((
            Position::new(0.0, 0.0, 0.0),
            ActiveNpc,
            HtnAgent::new("Root"),
        ));
        let mut scheduler = NpcScheduler::new(SchedulerConfig::default(), wait_library());

        scheduler.update(&mut world, 0.1);
        assert!(world.get::<&HtnAgent>(entity).unwrap().is_planning());

        scheduler.sleep(&mut world, entity);
        let agent = world.get::<&HtnAgent>(entity).unwrap();
        assert!(!agent.is_planning());
        assert_eq!(scheduler.queue().job_count(), 0);
        assert!(world.get::<&ActiveNpc>(entity).is_err());
        drop(agent);

        scheduler.wake(&mut world, entity);
        assert!(world.get::<&ActiveNpc>(entity).is_ok());
    }

    #[test]
    fn test_force_replan_skips_cooldown() {
        let mut agent = HtnAgent::new("Root").with_cooldown(30.0);
        agent.plan_accumulator = 30.0;
        force_replan(&mut agent);
        assert_eq!(agent.plan_accumulator, 0.0);
    }
}
