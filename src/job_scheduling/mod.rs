//! Job scheduling subsystem
//!
//! The system is built around these components:
//! - `JobQueue`: bounded FIFO storage with backpressure
//! - `RecurrencePlanner`: expands `once` and cron definitions into runs
//! - `Coordinator`: owns the queue and the worker pool and dispatches work
//! - `CoordinatorService`: the single event loop driving the coordinator
//! - `CoordinatorHandle`: submission and observation from outside the loop

pub mod api;
pub mod coordinator;
pub mod events;
pub mod job_definitions;
pub mod job_queue;
pub mod job_queue_runner;
pub mod job_scheduler;
pub mod types;

pub use api::{CoordinatorHandle, SchedulingHealthStatus};
pub use coordinator::{Coordinator, CoordinatorStats};
pub use events::{CoordinatorSignal, JobOutcome, Ticket, WorkerId};
pub use job_definitions::{JobDefinition, load_definitions};
pub use job_queue::JobQueue;
pub use job_queue_runner::CoordinatorService;
pub use job_scheduler::{Recurrence, RecurrencePlanner};
pub use types::*;
