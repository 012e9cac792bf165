//! Worker slots
//!
//! A [`Worker`] owns one page engine and one access controller and runs at
//! most one job at a time:
//!
//! ```text
//! Idle --load_job--> Loading --load ok--> Running --done/abort/timeout--> Idle
//!                       |                                          ^
//!                       +--load failed / invalid url---------------+
//! ```
//!
//! Workers are driven exclusively from the coordinator loop. Methods that end
//! a job return a [`Finished`] report; the worker is already back to idle when
//! the caller sees it.

pub mod auxiliary;
pub mod controller;
pub mod script_library;

pub use auxiliary::AuxiliaryHttp;
pub use controller::PageController;
pub use script_library::{LibraryScript, ScriptLibrary};

use crate::access::{AccessController, BackoffPolicy};
use crate::config::Config;
use crate::engine::{CONTROLLER_OBJECT_NAME, EngineContext, EngineEventSink, EngineFactory, PageEngine};
use crate::job_scheduling::events::{
    CoordinatorEvent, EventSender, HttpCallbackResult, JobOutcome, ScriptLogLevel, Ticket,
    WorkerEvent, WorkerId,
};
use crate::job_scheduling::types::{Job, JobId, JobOverrides};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Worker behaviour shared by every slot
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub default_timeout: Duration,
    pub timeout_retry_delay: Duration,
    pub default_abort_delay: Duration,
    pub max_retries: u32,
    pub viewport: (u32, u32),
    pub user_agent: String,
    pub blank_url: String,
    pub backoff: BackoffPolicy,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_timeout: config.worker.default_timeout,
            timeout_retry_delay: config.worker.timeout_retry_delay,
            default_abort_delay: config.worker.default_abort_delay,
            max_retries: config.coordinator.max_retries,
            viewport: (config.worker.viewport_width, config.worker.viewport_height),
            user_agent: config.worker.user_agent.clone(),
            blank_url: config.worker.blank_url.clone(),
            backoff: BackoffPolicy::new(
                config.access.default_retry_after,
                config.access.max_retry_delay,
            ),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Idle,
    /// Waiting for the start document
    Loading,
    /// The script has been injected
    Running,
}

#[derive(Debug)]
struct ActiveJob {
    job: Arc<Job>,
    ticket: Ticket,
    phase: WorkerPhase,
    deadline: AbortHandle,
}

/// How a job ended on this worker
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Done,
    /// The attempt failed; `retry` is the next attempt and its delay, unless
    /// the retry budget is spent
    Aborted { retry: Option<(Job, Duration)> },
    NotInjected,
    Rejected { reason: String },
}

impl Completion {
    pub fn outcome(&self) -> JobOutcome {
        match self {
            Completion::Done => JobOutcome::Done,
            Completion::Aborted { retry } => JobOutcome::Aborted {
                retry_scheduled: retry.is_some(),
            },
            Completion::NotInjected => JobOutcome::NotInjected,
            Completion::Rejected { reason } => JobOutcome::Rejected {
                reason: reason.clone(),
            },
        }
    }
}

/// Report handed to the coordinator when a job leaves a worker
#[derive(Debug, Clone)]
pub struct Finished {
    pub job: Arc<Job>,
    pub completion: Completion,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub phase: WorkerPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

pub struct Worker {
    id: WorkerId,
    engine: Box<dyn PageEngine>,
    access: Arc<AccessController>,
    library: Arc<ScriptLibrary>,
    settings: Arc<WorkerSettings>,
    events: EventSender,
    current: Option<ActiveJob>,
    next_ticket: u64,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        factory: &dyn EngineFactory,
        library: Arc<ScriptLibrary>,
        settings: Arc<WorkerSettings>,
        events: EventSender,
    ) -> Self {
        let access = Arc::new(AccessController::new(id, settings.backoff, events.clone()));
        let mut engine = factory.create(EngineContext {
            worker: id,
            access: access.clone(),
            events: EngineEventSink::new(id, events.clone()),
            user_agent: settings.user_agent.clone(),
        });
        let (width, height) = settings.viewport;
        engine.set_viewport_size(width, height);

        debug!("Worker {} created", id);
        Self {
            id,
            engine,
            access,
            library,
            settings,
            events,
            current: None,
            next_ticket: 0,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    pub fn phase(&self) -> WorkerPhase {
        self.current
            .as_ref()
            .map(|active| active.phase)
            .unwrap_or(WorkerPhase::Idle)
    }

    pub fn current_job(&self) -> Option<&Arc<Job>> {
        self.current.as_ref().map(|active| &active.job)
    }

    pub fn access(&self) -> &Arc<AccessController> {
        &self.access
    }

    /// Whether `ticket` identifies the job this worker is running
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.current
            .as_ref()
            .is_some_and(|active| active.ticket == ticket)
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            id: self.id,
            phase: self.phase(),
            job_id: self.current_job().map(|job| job.id),
        }
    }

    /// Start a job on this idle worker
    ///
    /// Returns a report immediately when the job cannot be started.
    pub fn load_job(&mut self, job: Job) -> Option<Finished> {
        if let Some(active) = &self.current {
            error!(
                "Worker {}: asked to load {} while running {}",
                self.id, job, active.job
            );
            return Some(Finished {
                job: Arc::new(job),
                completion: Completion::Rejected {
                    reason: "worker busy".to_string(),
                },
            });
        }

        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        let job = Arc::new(job);
        info!("Worker {}: loading {}", self.id, job);

        let deadline = self.arm_deadline(ticket, job.timeout(self.settings.default_timeout));
        self.current = Some(ActiveJob {
            job: job.clone(),
            ticket,
            phase: WorkerPhase::Loading,
            deadline,
        });

        self.access.bind(ticket, job.anonymizing_proxy);
        if let Err(e) = self.access.set_filter_rules(&job.filter_rules) {
            error!("Worker {}: {}", self.id, e);
        }
        if job.block_images {
            self.engine.set_images_enabled(false);
        }
        if let Err(e) = self
            .access
            .set_proxy(job.proxy.as_deref(), job.proxy_auth.as_deref())
        {
            error!("Worker {}: {}", self.id, e);
        }

        match job.start_url.as_deref() {
            Some(raw) => match Url::parse(raw) {
                Ok(url) => {
                    self.engine.load_document(&url, ticket);
                    None
                }
                Err(e) => {
                    error!("Worker {}: invalid start url '{}': {}", self.id, raw, e);
                    self.finish(Completion::Rejected {
                        reason: format!("invalid start url: {e}"),
                    })
                }
            },
            None => self.inject(),
        }
    }

    fn arm_deadline(&self, ticket: Ticket, timeout: Duration) -> AbortHandle {
        let worker = self.id;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(CoordinatorEvent::Worker {
                worker,
                event: WorkerEvent::Timeout { ticket },
            });
        })
        .abort_handle()
    }

    /// The engine finished loading the start document
    pub fn on_load_finished(&mut self, ticket: Ticket, ok: bool) -> Option<Finished> {
        let Some(active) = self.current.as_ref().filter(|active| active.ticket == ticket) else {
            debug!("Worker {}: ignoring load result for stale ticket {}", self.id, ticket);
            return None;
        };

        if active.phase == WorkerPhase::Running {
            if !ok {
                debug!("Worker {}: a later navigation of {} failed", self.id, active.job);
            }
            return None;
        }

        if !ok {
            warn!(
                "Worker {}: the load of {} was unsuccessful, not injecting",
                self.id, active.job
            );
            return self.finish(Completion::NotInjected);
        }

        self.inject()
    }

    /// Expose the controller and run the libraries plus the job script
    fn inject(&mut self) -> Option<Finished> {
        let active = self.current.as_mut()?;
        if active.phase == WorkerPhase::Running {
            return None;
        }
        active.phase = WorkerPhase::Running;
        let job = active.job.clone();
        let ticket = active.ticket;

        let source = match job.script.load() {
            Ok(source) => source,
            Err(e) => {
                error!("Worker {}: cannot read script {}: {}", self.id, job.script, e);
                return self.finish(Completion::Rejected {
                    reason: format!("cannot read script: {e}"),
                });
            }
        };

        let controller = PageController::new(self.id, ticket, job.clone(), self.events.clone());
        self.engine.bind_object(CONTROLLER_OBJECT_NAME, controller);
        for script in self.library.scripts() {
            self.engine.evaluate_script(&script.source);
        }
        self.engine.evaluate_script(&source);
        info!("Worker {}: injected {}", self.id, job);
        None
    }

    /// The script reported success
    pub fn done(&mut self, ticket: Ticket) -> Option<Finished> {
        if !self.is_current(ticket) {
            error!("Worker {}: invalid state, done called with no current job", self.id);
            return None;
        }
        if let Some(job) = self.current_job() {
            info!("Worker {}: {} done", self.id, job);
        }
        self.finish(Completion::Done)
    }

    /// The current attempt failed
    ///
    /// The next attempt is built while the retry budget allows; the caller
    /// re-submits it after the returned delay.
    pub fn abort(&mut self, ticket: Ticket, retry_after: Option<Duration>) -> Option<Finished> {
        if !self.is_current(ticket) {
            error!("Worker {}: invalid state, abort called with no current job", self.id);
            return None;
        }
        let job = self.current_job()?.clone();
        let delay = retry_after.unwrap_or(self.settings.default_abort_delay);
        let next = job.derive_retry();

        let retry = if next.retry_count <= self.settings.max_retries {
            info!(
                "Worker {}: aborted {}, retry {} in {:?}",
                self.id, job, next.retry_count, delay
            );
            Some((next, delay))
        } else {
            error!(
                "Worker {}: aborted {}, max retries ({}) reached, dropping",
                self.id, job, self.settings.max_retries
            );
            None
        };

        self.finish(Completion::Aborted { retry })
    }

    /// The deadline armed in `load_job` elapsed
    pub fn on_timeout(&mut self, ticket: Ticket) -> Option<Finished> {
        if !self.is_current(ticket) {
            debug!("Worker {}: ignoring stale timeout {}", self.id, ticket);
            return None;
        }
        if let Some(job) = self.current_job() {
            warn!("Worker {}: {} timed out", self.id, job);
        }
        self.abort(ticket, Some(self.settings.timeout_retry_delay))
    }

    /// Follow-up job for a script-driven phase transition
    pub fn phase_transition(&self, ticket: Ticket, overrides: JobOverrides) -> Option<Job> {
        if !self.is_current(ticket) {
            error!("Worker {}: invalid state, load called with no current job", self.id);
            return None;
        }
        let next = self.current_job()?.with_overrides(overrides);
        info!("Worker {}: phase transition to {}", self.id, next);
        Some(next)
    }

    pub fn deliver_http_response(
        &mut self,
        ticket: Ticket,
        callback_id: u64,
        response: &HttpCallbackResult,
    ) {
        if !self.is_current(ticket) {
            debug!(
                "Worker {}: dropping response for callback {} of a finished job",
                self.id, callback_id
            );
            return;
        }
        self.engine.deliver_http_response(callback_id, response);
    }

    pub fn log_console(&self, message: &str) {
        info!("Worker {} console: {}", self.id, message);
    }

    pub fn log_script(&self, ticket: Ticket, level: ScriptLogLevel, message: &str) {
        if !self.is_current(ticket) {
            return;
        }
        let job_id = self.current_job().map(|job| job.id).unwrap_or_default();
        match level {
            ScriptLogLevel::Info => info!(job_id = %job_id, "Worker {}: {}", self.id, message),
            ScriptLogLevel::Error => error!(job_id = %job_id, "Worker {}: {}", self.id, message),
        }
    }

    fn finish(&mut self, completion: Completion) -> Option<Finished> {
        let job = self.current_job()?.clone();
        self.reset();
        Some(Finished { job, completion })
    }

    /// Return to idle: cancel the deadline, drop the access policy, restore
    /// image loading and blank the page
    pub fn reset(&mut self) {
        if let Some(active) = self.current.take() {
            active.deadline.abort();
        }
        self.access.reset();
        self.engine.set_images_enabled(true);
        self.engine.load_blank(&self.settings.blank_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_scheduling::types::ScriptRef;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Load(String, Ticket),
        Blank,
        Eval(String),
        Bind,
        Images(bool),
        Viewport(u32, u32),
        Http(u64),
    }

    #[derive(Default)]
    struct Recorder(Arc<Mutex<Vec<Call>>>);

    struct RecordingEngine(Arc<Mutex<Vec<Call>>>);

    impl PageEngine for RecordingEngine {
        fn load_document(&mut self, url: &Url, ticket: Ticket) {
            self.0.lock().unwrap().push(Call::Load(url.to_string(), ticket));
        }
        fn load_blank(&mut self, _url: &str) {
            self.0.lock().unwrap().push(Call::Blank);
        }
        fn evaluate_script(&mut self, source: &str) {
            self.0.lock().unwrap().push(Call::Eval(source.to_string()));
        }
        fn bind_object(&mut self, _name: &str, _controller: PageController) {
            self.0.lock().unwrap().push(Call::Bind);
        }
        fn set_images_enabled(&mut self, enabled: bool) {
            self.0.lock().unwrap().push(Call::Images(enabled));
        }
        fn set_viewport_size(&mut self, width: u32, height: u32) {
            self.0.lock().unwrap().push(Call::Viewport(width, height));
        }
        fn deliver_http_response(&mut self, callback_id: u64, _response: &HttpCallbackResult) {
            self.0.lock().unwrap().push(Call::Http(callback_id));
        }
    }

    impl EngineFactory for Recorder {
        fn create(&self, _context: EngineContext) -> Box<dyn PageEngine> {
            Box::new(RecordingEngine(self.0.clone()))
        }
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.0.lock().unwrap().clone()
        }
    }

    fn worker(max_retries: u32) -> (Worker, Recorder, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder::default();
        let library = Arc::new(ScriptLibrary::new(vec![LibraryScript {
            name: "lib.js".to_string(),
            source: "lib()".to_string(),
        }]));
        let settings = Arc::new(WorkerSettings {
            max_retries,
            ..WorkerSettings::default()
        });
        (Worker::new(1, &recorder, library, settings, tx), recorder, rx)
    }

    fn job() -> Job {
        Job::new(ScriptRef::Inline("main()".to_string()))
    }

    #[tokio::test]
    async fn test_viewport_is_set_on_creation() {
        let (_worker, recorder, _rx) = worker(5);
        assert_eq!(recorder.calls(), vec![Call::Viewport(1366, 768)]);
    }

    #[tokio::test]
    async fn test_job_without_url_is_injected_immediately() {
        let (mut worker, recorder, _rx) = worker(5);
        assert!(worker.load_job(job()).is_none());
        assert_eq!(worker.phase(), WorkerPhase::Running);

        let calls = recorder.calls();
        assert_eq!(
            &calls[1..],
            &[Call::Bind, Call::Eval("lib()".to_string()), Call::Eval("main()".to_string())]
        );
    }

    #[tokio::test]
    async fn test_injection_happens_once() {
        let (mut worker, recorder, _rx) = worker(5);
        worker.load_job(job().with_start_url("https://example.com/"));
        assert_eq!(worker.phase(), WorkerPhase::Loading);

        assert!(worker.on_load_finished(Ticket(1), true).is_none());
        assert!(worker.on_load_finished(Ticket(1), true).is_none());

        let binds = recorder.calls().iter().filter(|c| **c == Call::Bind).count();
        assert_eq!(binds, 1);
    }

    #[tokio::test]
    async fn test_next_job_never_sees_previous_script() {
        let (mut worker, recorder, _rx) = worker(5);
        worker.load_job(Job::new(ScriptRef::Inline("a()".to_string())));
        worker.done(Ticket(1)).unwrap();
        let reset = recorder.calls().len();

        let next =
            Job::new(ScriptRef::Inline("b()".to_string())).with_start_url("https://example.com/b");
        assert!(worker.load_job(next).is_none());
        let loaded = recorder.calls().len();
        assert!(!recorder.calls()[reset..].iter().any(|call| matches!(call, Call::Eval(_))));
        assert_eq!(
            recorder.calls().last(),
            Some(&Call::Load("https://example.com/b".to_string(), Ticket(2)))
        );

        assert!(worker.on_load_finished(Ticket(1), true).is_none());
        assert_eq!(recorder.calls().len(), loaded);

        assert!(worker.on_load_finished(Ticket(2), true).is_none());
        let evals: Vec<String> = recorder.calls()[loaded..]
            .iter()
            .filter_map(|call| match call {
                Call::Eval(source) => Some(source.clone()),
                _ => None,
            })
            .collect();
        assert!(evals.iter().any(|source| source == "b()"));
        assert!(!evals.iter().any(|source| source.contains("a()")));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_injected() {
        let (mut worker, recorder, _rx) = worker(5);
        worker.load_job(job().with_start_url("https://example.com/"));

        let finished = worker.on_load_finished(Ticket(1), false).unwrap();
        assert_eq!(finished.completion, Completion::NotInjected);
        assert!(!worker.is_busy());
        assert!(!recorder.calls().contains(&Call::Bind));
    }

    #[tokio::test]
    async fn test_invalid_start_url_is_terminal() {
        let (mut worker, _recorder, _rx) = worker(5);
        let finished = worker.load_job(job().with_start_url("not a url")).unwrap();
        assert!(matches!(finished.completion, Completion::Rejected { .. }));
        assert!(!worker.is_busy());
    }

    #[tokio::test]
    async fn test_abort_builds_retry_within_budget() {
        let (mut worker, _recorder, _rx) = worker(1);
        let first = job();
        worker.load_job(first.clone());

        let finished = worker.abort(Ticket(1), None).unwrap();
        match finished.completion {
            Completion::Aborted {
                retry: Some((retry, delay)),
            } => {
                assert_eq!(retry.id, first.id);
                assert_eq!(retry.retry_count, 1);
                assert_eq!(delay, Duration::from_secs(60));
                worker.load_job(retry);
            }
            other => panic!("expected a retry, got {other:?}"),
        }

        let finished = worker.abort(Ticket(2), Some(Duration::from_secs(5))).unwrap();
        assert_eq!(finished.completion, Completion::Aborted { retry: None });
    }

    #[tokio::test]
    async fn test_stale_ticket_is_ignored() {
        let (mut worker, _recorder, _rx) = worker(5);
        worker.load_job(job());
        worker.done(Ticket(1));
        worker.load_job(job());

        assert!(worker.done(Ticket(1)).is_none());
        assert!(worker.on_timeout(Ticket(1)).is_none());
        assert!(worker.is_busy());
    }

    #[tokio::test]
    async fn test_reset_restores_images_and_blanks_page() {
        let (mut worker, recorder, _rx) = worker(5);
        let mut blocked = job();
        blocked.block_images = true;
        worker.load_job(blocked);
        worker.done(Ticket(1)).unwrap();

        let calls = recorder.calls();
        assert!(calls.contains(&Call::Images(false)));
        assert_eq!(&calls[calls.len() - 2..], &[Call::Images(true), Call::Blank]);
        assert!(worker.access().proxy().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_timeout_event() {
        let (mut worker, _recorder, mut rx) = worker(5);
        worker.load_job(job().with_timeout_seconds(3));

        tokio::time::sleep(Duration::from_secs(4)).await;
        match rx.recv().await.unwrap() {
            CoordinatorEvent::Worker {
                event: WorkerEvent::Timeout { ticket },
                ..
            } => {
                let finished = worker.on_timeout(ticket).unwrap();
                match finished.completion {
                    Completion::Aborted {
                        retry: Some((_, delay)),
                    } => assert_eq!(delay, Duration::from_secs(10)),
                    other => panic!("unexpected completion {other:?}"),
                }
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
