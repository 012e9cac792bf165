//! Bounded FIFO job queue
//!
//! The queue is owned by the coordinator loop and is only ever touched from
//! it, so it carries no locking of its own. Inserts never block: a full queue
//! rejects the job and the caller reports the drop.

use super::types::{Job, JobSchedulingError};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug)]
pub struct JobQueue {
    pending: VecDeque<Job>,
    capacity: usize,
    dropped: u64,
}

impl JobQueue {
    /// Create a new empty job queue holding at most `capacity` jobs
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Append a job unless the queue is full
    pub fn try_enqueue(&mut self, job: Job) -> Result<(), JobSchedulingError> {
        if self.pending.len() >= self.capacity {
            self.dropped += 1;
            return Err(JobSchedulingError::QueueFull {
                job_id: job.id,
                capacity: self.capacity,
            });
        }

        debug!("Enqueued {} ({} pending)", job, self.pending.len() + 1);
        self.pending.push_back(job);
        Ok(())
    }

    /// Take the oldest pending job
    pub fn pop(&mut self) -> Option<Job> {
        self.pending.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> JobQueueStats {
        JobQueueStats {
            pending_jobs: self.pending.len(),
            capacity: self.capacity,
            dropped_jobs: self.dropped,
        }
    }
}

/// Statistics about the job queue state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct JobQueueStats {
    /// Number of jobs waiting for a worker
    pub pending_jobs: usize,
    pub capacity: usize,
    /// Jobs rejected because the queue was full
    pub dropped_jobs: u64,
}
