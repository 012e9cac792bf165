//! Events flowing into the coordinator loop and signals flowing out of it
//!
//! Every asynchronous completion (page loads, timers, script calls, network
//! failures, auxiliary HTTP responses) is delivered to the coordinator as a
//! [`CoordinatorEvent`] so that all state changes happen on a single task.

use super::types::{Job, JobId, JobOverrides};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Index of a worker slot, assigned sequentially from 1 at startup
pub type WorkerId = usize;

/// Identifies one loaded job on one worker
///
/// A worker hands out a new ticket every time it accepts a job. Events that
/// carry a ticket which no longer matches the worker's current job are stale
/// and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sender half of the coordinator inbox
pub type EventSender = mpsc::UnboundedSender<CoordinatorEvent>;
/// Receiver half of the coordinator inbox
pub type EventReceiver = mpsc::UnboundedReceiver<CoordinatorEvent>;

#[derive(Debug)]
pub enum CoordinatorEvent {
    /// A job arriving from the listener, a timer or a script phase transition
    Submit(Job),
    /// Something happened on a worker slot
    Worker { worker: WorkerId, event: WorkerEvent },
}

#[derive(Debug)]
pub enum WorkerEvent {
    /// The page engine finished loading the start document
    LoadFinished { ticket: Ticket, ok: bool },
    /// Console output produced by the page
    Console { message: String },
    /// A call made by the script through its controller
    Control { ticket: Ticket, call: ControlCall },
    /// A page request failed and the job must back off
    NetworkFailure { ticket: Ticket, retry_after: Duration },
    /// The job's deadline elapsed
    Timeout { ticket: Ticket },
    /// An auxiliary GET issued on behalf of the script completed
    HttpResponse {
        ticket: Ticket,
        callback_id: u64,
        response: HttpCallbackResult,
    },
}

/// Level of a message logged by a script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLogLevel {
    Info,
    Error,
}

/// The controller operations available to a running script
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCall {
    Done,
    /// Abort and retry after the given delay, or the configured default
    Abort { retry_after: Option<Duration> },
    /// Enqueue a follow-up job derived from the current one
    Load(JobOverrides),
    HttpRequest { callback_id: u64, url: String },
    PostRequest { url: String, body: String },
    Log { level: ScriptLogLevel, message: String },
}

/// Result of an auxiliary GET handed back to the script
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpCallbackResult {
    /// HTTP status, `0` when no response was received
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Response body, empty on error
    pub body: String,
}

impl HttpCallbackResult {
    pub fn success(status: u16, body: String) -> Self {
        Self {
            status,
            error: None,
            body,
        }
    }

    pub fn failure<S: Into<String>>(status: u16, error: S) -> Self {
        Self {
            status,
            error: Some(error.into()),
            body: String::new(),
        }
    }
}

/// How a job left its worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum JobOutcome {
    Done,
    Aborted { retry_scheduled: bool },
    /// The start document failed to load so the script never ran
    NotInjected,
    /// The job could not be started at all
    Rejected { reason: String },
}

/// Notifications published by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "signal")]
pub enum CoordinatorSignal {
    Dispatched { worker: WorkerId, job_id: JobId },
    Finished {
        worker: WorkerId,
        job_id: JobId,
        #[serde(flatten)]
        outcome: JobOutcome,
    },
    /// A job was discarded because the queue was full
    Dropped { job_id: JobId },
    /// The queue is empty and every worker is idle
    Quiescent,
}
