//! Coordinator service loop
//!
//! A single task owns the [`Coordinator`] and reacts to inbox events, the
//! recurrence planning tick and the cookie clearing tick until cancelled.

use super::api::CoordinatorHandle;
use super::coordinator::Coordinator;
use super::events::EventReceiver;
use super::job_scheduler::RecurrencePlanner;
use crate::context::AppContext;
use crate::engine::EngineFactory;
use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct CoordinatorService {
    coordinator: Coordinator,
    inbox: EventReceiver,
    handle: CoordinatorHandle,
    planner: Option<RecurrencePlanner>,
    planning_interval: Duration,
    cookie_clear_interval: Duration,
}

impl CoordinatorService {
    /// Build the coordinator and its worker pool
    ///
    /// Without a planner only submitted jobs run.
    pub fn new(
        context: &AppContext,
        factory: &dyn EngineFactory,
        planner: Option<RecurrencePlanner>,
    ) -> Self {
        let (events, inbox) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(context, factory, events.clone());
        let handle = CoordinatorHandle::new(
            events,
            coordinator.signal_sender(),
            coordinator.stats_receiver(),
        );

        Self {
            coordinator,
            inbox,
            handle,
            planner,
            planning_interval: context.config.coordinator.planning_interval,
            cookie_clear_interval: context.config.access.cookie_clear_interval,
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Expand definitions for the upcoming window
    fn run_planning_cycle(&mut self) {
        let Some(planner) = self.planner.as_mut() else {
            return;
        };
        let runs = planner.plan(Utc::now());
        info!("Planning cycle produced {} runs", runs.len());

        for run in runs {
            if run.delay.is_zero() {
                let _ = self.coordinator.enqueue(run.job);
            } else {
                debug!("{} planned for {}", run.job, run.at);
                self.coordinator.schedule_submit(run.job, run.delay);
            }
        }
        self.coordinator.dispatch();
    }

    /// Run the service until `cancellation_token` fires
    pub async fn run(mut self, cancellation_token: CancellationToken) -> Result<()> {
        info!(
            "Starting coordinator service (planning every {:?}, cookies cleared every {:?})",
            self.planning_interval, self.cookie_clear_interval
        );

        // First tick is immediate
        let mut planning = interval(self.planning_interval);
        planning.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cookies = interval_at(
            Instant::now() + self.cookie_clear_interval,
            self.cookie_clear_interval,
        );
        cookies.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = self.inbox.recv() => {
                    self.coordinator.handle_event(event);
                }
                _ = planning.tick() => {
                    self.run_planning_cycle();
                }
                _ = cookies.tick() => {
                    self.coordinator.clear_cookies();
                }
                _ = cancellation_token.cancelled() => {
                    info!("Coordinator service received cancellation signal");
                    let stats = self.coordinator.stats();
                    info!(
                        "Shutting down with {} busy workers and {} pending jobs",
                        stats.busy_workers, stats.queue.pending_jobs
                    );
                    break;
                }
            }
        }

        info!("Coordinator service stopped");
        Ok(())
    }
}
