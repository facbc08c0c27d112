//! Hierarchical task network plan search
//!
//! Depth-first decomposition over a [`TaskLibrary`]: compounds expand
//! through their first satisfiable method, primitives check
//! preconditions against a hypothetical blackboard and apply their
//! predicted effects to it. A dead end backtracks to the most recent
//! decomposition and resumes with its next method, restoring the
//! hypothetical state captured at that fork.
//!
//! The search is resumable. [`PlanSearch::run`] expands until a
//! deadline or a cancellation token stops it, then picks up where it
//! left off on the next call, so one slow agent cannot stall a tick.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::blackboard::{Blackboard, BlackboardDelta};
use crate::jobs::CancelToken;
use crate::library::{TaskLibrary, TaskRef};
use crate::tasks::eval_effects;

/// Expansion cap guarding against unbounded recursive domains
pub const DEFAULT_MAX_EXPANSIONS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFailure {
    /// Every method combination was tried and none produced a plan
    NoValidPlan,
    /// The search was cancelled before finishing
    Cancelled,
}

impl fmt::Display for PlanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanFailure::NoValidPlan => write!(f, "no valid plan found"),
            PlanFailure::Cancelled => write!(f, "plan search cancelled"),
        }
    }
}

impl std::error::Error for PlanFailure {}

pub type PlanResult = Result<Plan, PlanFailure>;

/// A finished plan: primitive task indices in execution order
///
/// `effects` holds the blackboard delta predicted for each task, and
/// `btr` records which method index was chosen at every decomposition,
/// in decomposition order. Comparing traversal records tells the
/// runtime whether a newer plan took a higher-priority branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    tasks: Vec<usize>,
    effects: Vec<BlackboardDelta>,
    btr: Vec<usize>,
    index: usize,
}

impl Plan {
    pub(crate) fn new(tasks: Vec<usize>, effects: Vec<BlackboardDelta>, btr: Vec<usize>) -> Self {
        Self {
            tasks,
            effects,
            btr,
            index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.tasks.len()
    }

    /// Primitive index of the task currently executing
    pub fn current(&self) -> Option<usize> {
        self.tasks.get(self.index).copied()
    }

    pub fn current_effects(&self) -> Option<&BlackboardDelta> {
        self.effects.get(self.index)
    }

    pub fn tasks(&self) -> &[usize] {
        &self.tasks
    }

    pub fn btr(&self) -> &[usize] {
        &self.btr
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }
}

/// True when `new` decomposed through a strictly higher-priority branch
/// than `old` at the first point where the two traversals diverge
pub fn traversal_improves(old: &[usize], new: &[usize]) -> bool {
    for (o, n) in old.iter().zip(new.iter()) {
        if n < o {
            return true;
        }
        if n > o {
            return false;
        }
    }
    false
}

/// Outcome of one [`PlanSearch::run`] slice
#[derive(Debug)]
pub enum SearchStep {
    /// Deadline hit; call `run` again to continue
    Yielded,
    Done(PlanResult),
}

/// Checkpoint taken when a compound decomposes, enough to restore the
/// search to just before that decomposition and try the next method
struct DecompositionState {
    compound: usize,
    next_method: usize,
    blackboard: Blackboard,
    stack: Vec<TaskRef>,
    plan_len: usize,
    btr_len: usize,
}

/// An in-progress plan search over an immutable library
///
/// Owns a cloned blackboard snapshot, so a running search never
/// observes (or causes) mutation of the live agent.
pub struct PlanSearch {
    library: Arc<TaskLibrary>,
    blackboard: Blackboard,
    stack: Vec<TaskRef>,
    decomp: Vec<DecompositionState>,
    plan_tasks: Vec<usize>,
    plan_effects: Vec<BlackboardDelta>,
    btr: Vec<usize>,
    expansions: usize,
    max_expansions: usize,
}

impl PlanSearch {
    pub fn new(library: Arc<TaskLibrary>, root: TaskRef, blackboard: Blackboard) -> Self {
        Self {
            library,
            blackboard,
            stack: vec![root],
            decomp: Vec::new(),
            plan_tasks: Vec::new(),
            plan_effects: Vec::new(),
            btr: Vec::new(),
            expansions: 0,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        }
    }

    pub fn with_max_expansions(mut self, max_expansions: usize) -> Self {
        self.max_expansions = max_expansions;
        self
    }

    /// Expands tasks until the search finishes, the deadline passes, or
    /// the token is cancelled. Always makes progress: at least one
    /// expansion happens per call even with an already-expired deadline.
    pub fn run(&mut self, deadline: Instant, cancel: &CancelToken) -> SearchStep {
        loop {
            if cancel.is_cancelled() {
                return SearchStep::Done(Err(PlanFailure::Cancelled));
            }
            if let Some(result) = self.step() {
                return SearchStep::Done(result);
            }
            if Instant::now() >= deadline {
                return SearchStep::Yielded;
            }
        }
    }

    /// One expansion; `Some` means the search is over
    fn step(&mut self) -> Option<PlanResult> {
        let task_ref = match self.stack.pop() {
            Some(task_ref) => task_ref,
            None => {
                return Some(Ok(Plan::new(
                    mem::take(&mut self.plan_tasks),
                    mem::take(&mut self.plan_effects),
                    mem::take(&mut self.btr),
                )));
            }
        };

        self.expansions += 1;
        if self.expansions > self.max_expansions {
            log::warn!(
                "plan search exceeded {} expansions, giving up",
                self.max_expansions
            );
            return Some(Err(PlanFailure::NoValidPlan));
        }

        let library = Arc::clone(&self.library);
        let expanded = match task_ref {
            TaskRef::Primitive(index) => {
                let task = library.primitive(index);
                if task
                    .preconditions
                    .iter()
                    .all(|p| p.is_met(&self.blackboard))
                {
                    let delta = eval_effects(&task.effects, &self.blackboard);
                    delta.apply_to(&mut self.blackboard);
                    self.plan_tasks.push(index);
                    self.plan_effects.push(delta);
                    true
                } else {
                    false
                }
            }
            TaskRef::Compound(index) => self.try_decompose(&library, index, 0),
        };

        if expanded || self.backtrack(&library) {
            None
        } else {
            Some(Err(PlanFailure::NoValidPlan))
        }
    }

    /// Decomposes through the first satisfiable method at or after
    /// `first_method`, checkpointing so later methods stay reachable
    fn try_decompose(&mut self, library: &TaskLibrary, compound: usize, first_method: usize) -> bool {
        let task = library.compound(compound);
        for (m, method) in task.methods.iter().enumerate().skip(first_method) {
            if !method
                .preconditions
                .iter()
                .all(|p| p.is_met(&self.blackboard))
            {
                continue;
            }

            self.decomp.push(DecompositionState {
                compound,
                next_method: m + 1,
                blackboard: self.blackboard.clone(),
                stack: self.stack.clone(),
                plan_len: self.plan_tasks.len(),
                btr_len: self.btr.len(),
            });
            self.btr.push(m);
            for subtask in method.subtasks.iter().rev() {
                self.stack.push(*subtask);
            }
            return true;
        }
        false
    }

    /// Rewinds to the most recent decomposition with an untried method;
    /// false means the whole search space is exhausted
    fn backtrack(&mut self, library: &TaskLibrary) -> bool {
        while let Some(state) = self.decomp.pop() {
            self.blackboard = state.blackboard;
            self.stack = state.stack;
            self.plan_tasks.truncate(state.plan_len);
            self.plan_effects.truncate(state.plan_len);
            self.btr.truncate(state.btr_len);
            if self.try_decompose(library, state.compound, state.next_method) {
                return true;
            }
        }
        false
    }
}

/// Runs a search to completion on the calling thread
pub fn plan_now(library: &Arc<TaskLibrary>, root: &str, blackboard: &Blackboard) -> PlanResult {
    let root_ref = match library.find(root) {
        Some(task_ref) => task_ref,
        None => {
            log::error!("cannot plan: unknown root task {}", root);
            return Err(PlanFailure::NoValidPlan);
        }
    };

    let mut search = PlanSearch::new(Arc::clone(library), root_ref, blackboard.clone());
    let cancel = CancelToken::new();
    loop {
        match search.run(Instant::now() + Duration::from_millis(100), &cancel) {
            SearchStep::Done(result) => return result,
            SearchStep::Yielded => {}
        }
    }
}
