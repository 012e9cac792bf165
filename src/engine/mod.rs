//! Page engine abstraction
//!
//! A worker drives exactly one [`PageEngine`]. The engine loads documents
//! through the worker's [`AccessController`], evaluates scripts, and reports
//! asynchronous completions through its [`EngineEventSink`]. Completions for a
//! load that was superseded by `load_blank` must not be reported.

pub mod process;

pub use process::{ProcessEngine, ProcessEngineFactory};

use crate::access::AccessController;
use crate::job_scheduling::events::{
    CoordinatorEvent, EventSender, HttpCallbackResult, Ticket, WorkerEvent, WorkerId,
};
use crate::worker::controller::PageController;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Name under which the controller is exposed to scripts
pub const CONTROLLER_OBJECT_NAME: &str = "ScrapeCtrl";

pub trait PageEngine: Send {
    /// Start loading `url`; completion is reported with `ticket`
    fn load_document(&mut self, url: &Url, ticket: Ticket);

    /// Drop the current document and anything still in flight
    fn load_blank(&mut self, url: &str);

    fn evaluate_script(&mut self, source: &str);

    /// Expose `controller` to scripts as a global named `name`
    fn bind_object(&mut self, name: &str, controller: PageController);

    fn set_images_enabled(&mut self, enabled: bool);

    fn set_viewport_size(&mut self, width: u32, height: u32);

    /// Hand the result of an auxiliary GET to the script's callback
    fn deliver_http_response(&mut self, callback_id: u64, response: &HttpCallbackResult);
}

/// Everything an engine needs from the worker that owns it
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub worker: WorkerId,
    pub access: Arc<AccessController>,
    pub events: EngineEventSink,
    pub user_agent: String,
}

/// Builds one engine per worker slot
pub trait EngineFactory: Send + Sync {
    fn create(&self, context: EngineContext) -> Box<dyn PageEngine>;
}

/// Reports engine completions to the coordinator loop
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    worker: WorkerId,
    events: EventSender,
}

impl EngineEventSink {
    pub fn new(worker: WorkerId, events: EventSender) -> Self {
        Self { worker, events }
    }

    pub fn load_finished(&self, ticket: Ticket, ok: bool) {
        self.send(WorkerEvent::LoadFinished { ticket, ok });
    }

    pub fn console_message<S: Into<String>>(&self, message: S) {
        self.send(WorkerEvent::Console {
            message: message.into(),
        });
    }

    fn send(&self, event: WorkerEvent) {
        if self
            .events
            .send(CoordinatorEvent::Worker {
                worker: self.worker,
                event,
            })
            .is_err()
        {
            debug!("Worker {}: coordinator has shut down", self.worker);
        }
    }
}
