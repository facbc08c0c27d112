//! Time-sliced plan jobs
//!
//! Plan searches run inside jobs on a FIFO queue that the scheduler
//! drains once per tick under a time budget. A job that does not finish
//! within its slice goes to the back of the queue and resumes next
//! tick. The queue is deliberately unbounded; tick cost is capped by
//! the budget, so a burst of requests shows up as planning latency, not
//! as a longer tick.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hecs::{Entity, World};

use crate::planner::{PlanFailure, PlanResult, PlanSearch, SearchStep};

/// Shared cancellation flag; cloning hands out another handle to the
/// same flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
    Cancelled,
}

/// A plan search bound to the agent that requested it
pub struct PlanJob {
    owner: Entity,
    status: JobStatus,
    cancel: CancelToken,
    search: PlanSearch,
    result: Option<PlanResult>,
}

impl PlanJob {
    pub fn new(owner: Entity, search: PlanSearch, cancel: CancelToken) -> Self {
        Self {
            owner,
            status: JobStatus::Pending,
            cancel,
            search,
            result: None,
        }
    }

    pub fn owner(&self) -> Entity {
        self.owner
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Runs one slice of the underlying search
    pub fn run(&mut self, deadline: Instant) -> JobStatus {
        if self.cancel.is_cancelled() {
            self.status = JobStatus::Cancelled;
            self.result = Some(Err(PlanFailure::Cancelled));
            return self.status;
        }

        self.status = JobStatus::Running;
        match self.search.run(deadline, &self.cancel) {
            SearchStep::Yielded => {}
            SearchStep::Done(result) => {
                self.status = if result == Err(PlanFailure::Cancelled) {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Finished
                };
                self.result = Some(result);
            }
        }
        self.status
    }
}

/// What an agent sees when it asks after its job
#[derive(Debug)]
pub enum JobPoll {
    Pending,
    Ready(PlanResult),
}

/// FIFO queue of plan jobs, drained under a per-tick time budget
pub struct JobQueue {
    jobs: HashMap<u64, PlanJob>,
    pending: VecDeque<u64>,
    next_id: u64,
    budget: Duration,
    slice: Duration,
}

impl JobQueue {
    /// `budget` bounds total queue work per tick; `slice` bounds one
    /// job's turn within it
    pub fn new(budget: Duration, slice: Duration) -> Self {
        Self {
            jobs: HashMap::new(),
            pending: VecDeque::new(),
            next_id: 0,
            budget,
            slice,
        }
    }

    pub fn enqueue(&mut self, owner: Entity, search: PlanSearch, cancel: CancelToken) -> JobId {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.insert(id, PlanJob::new(owner, search, cancel));
        self.pending.push_back(id);
        log::trace!("enqueued plan job {} for {:?}", id, owner);
        JobId(id)
    }

    /// Runs queued jobs in arrival order until the budget is spent.
    /// The first job always gets a slice even if the budget is zero.
    pub fn process(&mut self) {
        let opened = Instant::now();
        while let Some(id) = self.pending.pop_front() {
            // Discarded jobs leave stale ids behind; skip them
            let job = match self.jobs.get_mut(&id) {
                Some(job) => job,
                None => continue,
            };

            match job.run(Instant::now() + self.slice) {
                JobStatus::Running => self.pending.push_back(id),
                JobStatus::Cancelled => {
                    self.jobs.remove(&id);
                }
                JobStatus::Finished | JobStatus::Pending => {}
            }

            if opened.elapsed() >= self.budget {
                break;
            }
        }
    }

    /// Checks on a job, consuming it once it has a result. An unknown
    /// id reports a cancelled result rather than panicking; discards
    /// and polls can race across ticks.
    pub fn poll(&mut self, id: JobId) -> JobPoll {
        let status = match self.jobs.get(&id.0) {
            Some(job) => job.status(),
            None => return JobPoll::Ready(Err(PlanFailure::Cancelled)),
        };
        match status {
            JobStatus::Finished | JobStatus::Cancelled => {
                let job = self.jobs.remove(&id.0);
                let result = job
                    .and_then(|j| j.result)
                    .unwrap_or(Err(PlanFailure::Cancelled));
                JobPoll::Ready(result)
            }
            JobStatus::Pending | JobStatus::Running => JobPoll::Pending,
        }
    }

    /// Drops a job without waiting for a result
    pub fn discard(&mut self, id: JobId) {
        if let Some(job) = self.jobs.remove(&id.0) {
            job.cancel.cancel();
            log::trace!("discarded plan job {} for {:?}", id.0, job.owner);
        }
    }

    /// Cancels every job whose owner no longer exists
    pub fn cancel_orphans(&mut self, world: &World) {
        let orphaned: Vec<u64> = self
            .jobs
            .iter()
            .filter(|(_, job)| !world.contains(job.owner))
            .map(|(id, _)| *id)
            .collect();
        for id in orphaned {
            if let Some(job) = self.jobs.remove(&id) {
                job.cancel.cancel();
                log::debug!("cancelled orphaned plan job {}", id);
            }
        }
    }

    /// Jobs waiting for or mid-way through processing
    pub fn depth(&self) -> usize {
        self.pending.len()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}
