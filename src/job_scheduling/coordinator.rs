//! Queue, worker pool and dispatch
//!
//! The coordinator owns the queue and every worker and is only touched from
//! the service loop, so dispatch decisions never race with completions. Each
//! call either leaves the queue empty or leaves every worker busy.

use super::events::{
    ControlCall, CoordinatorEvent, CoordinatorSignal, EventSender, WorkerEvent, WorkerId,
};
use super::job_queue::{JobQueue, JobQueueStats};
use super::types::{Job, JobSchedulingError};
use crate::context::AppContext;
use crate::engine::EngineFactory;
use crate::worker::{AuxiliaryHttp, Completion, Finished, Worker, WorkerStatus};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const SIGNAL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    #[serde(flatten)]
    pub queue: JobQueueStats,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub workers: Vec<WorkerStatus>,
}

pub struct Coordinator {
    queue: JobQueue,
    workers: Vec<Worker>,
    events: EventSender,
    signals: broadcast::Sender<CoordinatorSignal>,
    stats: watch::Sender<CoordinatorStats>,
    auxiliary: AuxiliaryHttp,
    quiescent: bool,
}

impl Coordinator {
    pub fn new(context: &AppContext, factory: &dyn EngineFactory, events: EventSender) -> Self {
        let config = &context.config.coordinator;
        let workers: Vec<Worker> = (1..=config.workers)
            .map(|id| {
                Worker::new(
                    id,
                    factory,
                    context.library.clone(),
                    context.worker_settings.clone(),
                    events.clone(),
                )
            })
            .collect();
        info!(
            "Coordinator started with {} workers, queue capacity {}",
            workers.len(),
            config.queue_capacity
        );

        let queue = JobQueue::new(config.queue_capacity);
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        let (stats, _) = watch::channel(Self::collect_stats(&queue, &workers));

        Self {
            queue,
            workers,
            events,
            signals,
            stats,
            auxiliary: context.auxiliary.clone(),
            quiescent: false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorSignal> {
        self.signals.subscribe()
    }

    pub(crate) fn signal_sender(&self) -> broadcast::Sender<CoordinatorSignal> {
        self.signals.clone()
    }

    pub fn stats_receiver(&self) -> watch::Receiver<CoordinatorStats> {
        self.stats.subscribe()
    }

    pub fn worker(&self, id: WorkerId) -> Option<&Worker> {
        self.workers.get(id.wrapping_sub(1))
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn is_quiescent(&self) -> bool {
        self.quiescent
    }

    fn collect_stats(queue: &JobQueue, workers: &[Worker]) -> CoordinatorStats {
        let busy_workers = workers.iter().filter(|worker| worker.is_busy()).count();
        CoordinatorStats {
            queue: queue.stats(),
            busy_workers,
            idle_workers: workers.len() - busy_workers,
            workers: workers.iter().map(Worker::status).collect(),
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        Self::collect_stats(&self.queue, &self.workers)
    }

    fn publish_stats(&self) {
        self.stats.send_replace(self.stats());
    }

    fn signal(&self, signal: CoordinatorSignal) {
        // No subscribers is fine
        let _ = self.signals.send(signal);
    }

    /// Admit a job and try to dispatch it
    pub fn enqueue(&mut self, job: Job) -> Result<(), JobSchedulingError> {
        let job_id = job.id;
        if let Err(e) = self.queue.try_enqueue(job) {
            error!("{}", e);
            self.signal(CoordinatorSignal::Dropped { job_id });
            self.publish_stats();
            return Err(e);
        }
        self.dispatch();
        self.publish_stats();
        Ok(())
    }

    /// Hand pending jobs to idle workers in FIFO order
    ///
    /// When nothing is pending and every worker is idle the coordinator
    /// becomes quiescent; the signal is raised on entering that state only.
    pub fn dispatch(&mut self) {
        loop {
            if self.queue.is_empty() {
                let all_idle = self.workers.iter().all(|worker| !worker.is_busy());
                if all_idle && !self.quiescent {
                    info!("Queue empty and all workers idle");
                    self.signal(CoordinatorSignal::Quiescent);
                }
                self.quiescent = all_idle;
                return;
            }
            self.quiescent = false;

            let Some(index) = self.workers.iter().position(|worker| !worker.is_busy()) else {
                debug!("All workers busy, {} jobs pending", self.queue.len());
                return;
            };
            let Some(job) = self.queue.pop() else {
                return;
            };
            self.start(index, job);
        }
    }

    fn start(&mut self, index: usize, job: Job) {
        let worker_id = self.workers[index].id();
        self.signal(CoordinatorSignal::Dispatched {
            worker: worker_id,
            job_id: job.id,
        });
        if let Some(finished) = self.workers[index].load_job(job) {
            self.finish(worker_id, finished);
        }
    }

    /// Record a job leaving a worker and schedule its retry, if any
    fn finish(&mut self, worker: WorkerId, finished: Finished) {
        if let Completion::Aborted {
            retry: Some((job, delay)),
        } = &finished.completion
        {
            self.schedule_submit(job.clone(), *delay);
        }
        self.signal(CoordinatorSignal::Finished {
            worker,
            job_id: finished.job.id,
            outcome: finished.completion.outcome(),
        });
    }

    /// Submit `job` to this coordinator after `delay`
    pub fn schedule_submit(&self, job: Job, delay: Duration) {
        debug!("Submitting {} in {:?}", job, delay);
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(CoordinatorEvent::Submit(job));
        });
    }

    /// Empty every worker's cookie jar
    pub fn clear_cookies(&self) {
        for worker in &self.workers {
            worker.access().clear_cookies();
        }
        info!("Cleared cookies on {} workers", self.workers.len());
    }

    pub fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Submit(job) => {
                // Rejections are logged by enqueue
                let _ = self.enqueue(job);
            }
            CoordinatorEvent::Worker { worker, event } => {
                self.handle_worker_event(worker, event);
                self.publish_stats();
            }
        }
    }

    fn handle_worker_event(&mut self, id: WorkerId, event: WorkerEvent) {
        let auxiliary = self.auxiliary.clone();
        let events = self.events.clone();
        let Some(worker) = self.workers.get_mut(id.wrapping_sub(1)) else {
            warn!("Event for unknown worker {}", id);
            return;
        };

        let mut follow_up = None;
        let finished = match event {
            WorkerEvent::LoadFinished { ticket, ok } => worker.on_load_finished(ticket, ok),
            WorkerEvent::Console { message } => {
                worker.log_console(&message);
                None
            }
            WorkerEvent::NetworkFailure {
                ticket,
                retry_after,
            } => worker.abort(ticket, Some(retry_after)),
            WorkerEvent::Timeout { ticket } => worker.on_timeout(ticket),
            WorkerEvent::HttpResponse {
                ticket,
                callback_id,
                response,
            } => {
                worker.deliver_http_response(ticket, callback_id, &response);
                None
            }
            WorkerEvent::Control { ticket, call } => match call {
                ControlCall::Done => worker.done(ticket),
                ControlCall::Abort { retry_after } => worker.abort(ticket, retry_after),
                ControlCall::Load(overrides) => {
                    follow_up = worker.phase_transition(ticket, overrides);
                    None
                }
                ControlCall::HttpRequest { callback_id, url } => {
                    if worker.is_current(ticket) {
                        auxiliary.spawn_get(id, ticket, callback_id, url, events);
                    }
                    None
                }
                ControlCall::PostRequest { url, body } => {
                    if worker.is_current(ticket) {
                        auxiliary.spawn_post(id, url, body);
                    }
                    None
                }
                ControlCall::Log { level, message } => {
                    worker.log_script(ticket, level, &message);
                    None
                }
            },
        };

        if let Some(job) = follow_up {
            let _ = self.enqueue(job);
        }
        if let Some(finished) = finished {
            self.finish(id, finished);
            self.dispatch();
        }
    }
}
