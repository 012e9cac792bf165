//! The capability object a running script uses to talk to the coordinator
//!
//! A controller is bound to one ticket. Calls made after the worker moved on
//! carry a stale ticket and are discarded by the coordinator.

use crate::job_scheduling::events::{
    ControlCall, CoordinatorEvent, EventSender, ScriptLogLevel, Ticket, WorkerEvent, WorkerId,
};
use crate::job_scheduling::types::{Job, JobOverrides};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PageController {
    worker: WorkerId,
    ticket: Ticket,
    job: Arc<Job>,
    events: EventSender,
}

impl PageController {
    pub fn new(worker: WorkerId, ticket: Ticket, job: Arc<Job>, events: EventSender) -> Self {
        Self {
            worker,
            ticket,
            job,
            events,
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// The job finished successfully
    pub fn done(&self) {
        self.send(ControlCall::Done);
    }

    /// Give up on this attempt; `retry_after` falls back to the configured
    /// abort delay
    pub fn abort(&self, retry_after: Option<Duration>) {
        self.send(ControlCall::Abort { retry_after });
    }

    /// Enqueue a follow-up job built from the current one
    pub fn load(&self, overrides: JobOverrides) {
        self.send(ControlCall::Load(overrides));
    }

    /// Out-of-band GET; the response comes back under `callback_id`
    pub fn http_request<S: Into<String>>(&self, callback_id: u64, url: S) {
        self.send(ControlCall::HttpRequest {
            callback_id,
            url: url.into(),
        });
    }

    /// Fire-and-forget JSON POST
    pub fn post_request<U: Into<String>, B: Into<String>>(&self, url: U, body: B) {
        self.send(ControlCall::PostRequest {
            url: url.into(),
            body: body.into(),
        });
    }

    pub fn current_job_state(&self) -> String {
        self.job.current_state().to_string()
    }

    pub fn job_dict(&self) -> Value {
        self.job.to_dict()
    }

    pub fn log_message<S: Into<String>>(&self, message: S) {
        self.send(ControlCall::Log {
            level: ScriptLogLevel::Info,
            message: message.into(),
        });
    }

    pub fn log_error<S: Into<String>>(&self, message: S) {
        self.send(ControlCall::Log {
            level: ScriptLogLevel::Error,
            message: message.into(),
        });
    }

    fn send(&self, call: ControlCall) {
        let event = CoordinatorEvent::Worker {
            worker: self.worker,
            event: WorkerEvent::Control {
                ticket: self.ticket,
                call,
            },
        };
        if self.events.send(event).is_err() {
            debug!("Worker {}: coordinator has shut down", self.worker);
        }
    }
}
