//! # Job Queue
//!
//! Bounded, prioritized work for the server's worker pool.
//!
//! - Scheduling a job that is already queued merges the two: the better
//!   priority wins and the destinations are unioned.
//! - A job whose key is being worked on stays queued until that work
//!   completes, so no two workers ever touch the same chunk or column.
//! - When full, the farthest job is dropped.

use std::collections::{HashMap, HashSet};

use parking_lot::{Condvar, Mutex};
use terrastream_core::{ChunkCoord, ColumnCoord, StreamError, StreamResult};

use super::connection::ConnectionId;

/// What a job computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKey {
    /// Coarse height of a column.
    Height(ColumnCoord),
    /// Surface and light of a chunk.
    Surface(ChunkCoord),
}

/// A unit of server work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    /// What to compute.
    pub key: JobKey,
    /// Lower is more urgent.
    pub priority: u32,
    /// Connections waiting for the result.
    pub destinations: Vec<ConnectionId>,
}

impl Job {
    /// Creates a job for one destination.
    #[must_use]
    pub fn new(key: JobKey, priority: u32, destination: ConnectionId) -> Self {
        Self {
            key,
            priority,
            destinations: vec![destination],
        }
    }

    fn merge(&mut self, other: Self) {
        self.priority = self.priority.min(other.priority);
        for dest in other.destinations {
            if !self.destinations.contains(&dest) {
                self.destinations.push(dest);
            }
        }
    }
}

struct QueueState {
    pending: HashMap<JobKey, Job>,
    active: HashSet<JobKey>,
    closed: bool,
}

/// Thread-safe job queue.
pub struct JobQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
}

impl JobQueue {
    /// Creates a queue holding at most `capacity` pending jobs.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: HashMap::new(),
                active: HashSet::new(),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queue capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Schedules a job, merging it with a queued job for the same key.
    ///
    /// # Errors
    ///
    /// [`StreamError::QueueFull`] when the queue overflowed. The farthest job
    /// (possibly `job` itself) has been dropped.
    pub fn push(&self, job: Job) -> StreamResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if let Some(queued) = state.pending.get_mut(&job.key) {
            queued.merge(job);
            drop(state);
            self.ready.notify_one();
            return Ok(());
        }

        if state.pending.len() >= self.capacity {
            let farthest = state
                .pending
                .values()
                .max_by_key(|j| j.priority)
                .map(|j| (j.key, j.priority));
            match farthest {
                Some((key, priority)) if priority > job.priority => {
                    state.pending.remove(&key);
                    tracing::warn!("Job queue full, dropped {:?} (priority {})", key, priority);
                    state.pending.insert(job.key, job);
                    drop(state);
                    self.ready.notify_one();
                }
                _ => {
                    tracing::warn!("Job queue full, dropped {:?} (priority {})", job.key, job.priority);
                }
            }
            return Err(StreamError::QueueFull {
                capacity: self.capacity,
            });
        }

        state.pending.insert(job.key, job);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    fn take_best(state: &mut QueueState) -> Option<Job> {
        let key = state
            .pending
            .values()
            .filter(|j| !state.active.contains(&j.key))
            .min_by_key(|j| j.priority)
            .map(|j| j.key)?;
        let job = state.pending.remove(&key)?;
        state.active.insert(key);
        Some(job)
    }

    /// Takes the most urgent runnable job without blocking.
    #[must_use]
    pub fn try_pop(&self) -> Option<Job> {
        let mut state = self.state.lock();
        Self::take_best(&mut state)
    }

    /// Blocks until a job is runnable. Returns `None` once closed.
    ///
    /// The caller must report the job with [`JobQueue::complete`].
    #[must_use]
    pub fn pop(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(job) = Self::take_best(&mut state) {
                return Some(job);
            }
            self.ready.wait(&mut state);
        }
    }

    /// Marks the job for `key` finished, unblocking queued work on the same key.
    pub fn complete(&self, key: JobKey) {
        let mut state = self.state.lock();
        state.active.remove(&key);
        let waiting = state.pending.contains_key(&key);
        drop(state);
        if waiting {
            self.ready.notify_one();
        }
    }

    /// Recomputes the priority of every queued job.
    pub fn reprioritize<F>(&self, mut priority: F)
    where
        F: FnMut(&Job) -> u32,
    {
        let mut state = self.state.lock();
        for job in state.pending.values_mut() {
            job.priority = priority(job);
        }
    }

    /// Removes `dest` from every queued job, dropping jobs left without one.
    pub fn forget_destination(&self, dest: ConnectionId) {
        let mut state = self.state.lock();
        state.pending.retain(|_, job| {
            job.destinations.retain(|d| *d != dest);
            !job.destinations.is_empty()
        });
    }

    /// Stops handing out jobs and wakes every waiting worker.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs being worked on.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.state.lock().active.len()
    }
}
