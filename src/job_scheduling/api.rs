//! External API for the coordinator
//!
//! The handle is what the listener, signal handlers and debug mode hold. It
//! never touches coordinator state directly; submissions travel through the
//! coordinator inbox and are admitted on the loop.

use super::coordinator::CoordinatorStats;
use super::events::{CoordinatorEvent, CoordinatorSignal, EventSender};
use super::types::{Job, JobId, JobSchedulingError};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tracing::info;

#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    events: EventSender,
    signals: broadcast::Sender<CoordinatorSignal>,
    stats: watch::Receiver<CoordinatorStats>,
}

impl CoordinatorHandle {
    pub fn new(
        events: EventSender,
        signals: broadcast::Sender<CoordinatorSignal>,
        stats: watch::Receiver<CoordinatorStats>,
    ) -> Self {
        Self {
            events,
            signals,
            stats,
        }
    }

    /// Hand a job to the coordinator
    ///
    /// Success means the job reached the coordinator inbox; a full queue is
    /// reported through [`CoordinatorSignal::Dropped`].
    pub fn submit(&self, job: Job) -> Result<JobId, JobSchedulingError> {
        let job_id = job.id;
        self.events
            .send(CoordinatorEvent::Submit(job))
            .map_err(|_| JobSchedulingError::CoordinatorClosed)?;
        Ok(job_id)
    }

    /// Build a job from an inbound request dictionary and submit it
    pub fn submit_request(&self, raw: Map<String, Value>) -> Result<JobId, JobSchedulingError> {
        let job = Job::from_request(raw)?;
        info!("API: received {}", job);
        self.submit(job)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorSignal> {
        self.signals.subscribe()
    }

    /// Latest coordinator statistics
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.borrow().clone()
    }

    /// Health check endpoint for the coordinator
    pub fn health_check(&self) -> SchedulingHealthStatus {
        let stats = self.stats();
        SchedulingHealthStatus {
            is_healthy: !self.events.is_closed(),
            pending_jobs: stats.queue.pending_jobs,
            dropped_jobs: stats.queue.dropped_jobs,
            busy_workers: stats.busy_workers,
            idle_workers: stats.idle_workers,
        }
    }
}

/// Health status of the coordinator
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulingHealthStatus {
    pub is_healthy: bool,
    pub pending_jobs: usize,
    pub dropped_jobs: u64,
    pub busy_workers: usize,
    pub idle_workers: usize,
}
