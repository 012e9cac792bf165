//! Coordinator behaviour driven end to end through a fake page engine

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use scrape_coordinator::access::{
    NetworkError, NetworkErrorKind, OutboundRequest, RequestDisposition, RequestOutcome,
};
use scrape_coordinator::config::Config;
use scrape_coordinator::context::AppContext;
use scrape_coordinator::engine::{EngineContext, EngineEventSink, EngineFactory, PageEngine};
use scrape_coordinator::job_scheduling::events::{EventReceiver, HttpCallbackResult};
use scrape_coordinator::job_scheduling::{
    Coordinator, CoordinatorSignal, Job, JobOutcome, JobOverrides, JobSchedulingError,
    RecurrencePlanner, ScriptRef, Ticket, WorkerId, load_definitions,
};
use scrape_coordinator::worker::{PageController, ScriptLibrary};
use tokio::sync::{broadcast, mpsc};
use url::Url;

/// Controllers currently bound, by worker
type Bindings = Arc<Mutex<HashMap<WorkerId, PageController>>>;

struct FakeEngine {
    worker: WorkerId,
    events: EngineEventSink,
    bindings: Bindings,
}

impl PageEngine for FakeEngine {
    fn load_document(&mut self, url: &Url, ticket: Ticket) {
        let ok = url.host_str() != Some("broken.test");
        self.events.load_finished(ticket, ok);
    }

    fn load_blank(&mut self, _url: &str) {
        self.bindings.lock().unwrap().remove(&self.worker);
    }

    fn evaluate_script(&mut self, _source: &str) {}

    fn bind_object(&mut self, _name: &str, controller: PageController) {
        self.bindings.lock().unwrap().insert(self.worker, controller);
    }

    fn set_images_enabled(&mut self, _enabled: bool) {}

    fn set_viewport_size(&mut self, _width: u32, _height: u32) {}

    fn deliver_http_response(&mut self, _callback_id: u64, _response: &HttpCallbackResult) {}
}

#[derive(Default)]
struct FakeFactory {
    bindings: Bindings,
}

impl EngineFactory for FakeFactory {
    fn create(&self, context: EngineContext) -> Box<dyn PageEngine> {
        Box::new(FakeEngine {
            worker: context.worker,
            events: context.events,
            bindings: self.bindings.clone(),
        })
    }
}

struct Harness {
    coordinator: Coordinator,
    inbox: EventReceiver,
    signals: broadcast::Receiver<CoordinatorSignal>,
    bindings: Bindings,
}

impl Harness {
    fn new(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        configure(&mut config);
        let context = AppContext::with_library(config, ScriptLibrary::default()).unwrap();
        let factory = FakeFactory::default();
        let bindings = factory.bindings.clone();
        let (events, inbox) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(&context, &factory, events);
        let signals = coordinator.subscribe();
        Self {
            coordinator,
            inbox,
            signals,
            bindings,
        }
    }

    /// Handle every event already delivered to the inbox
    fn pump(&mut self) {
        while let Ok(event) = self.inbox.try_recv() {
            self.coordinator.handle_event(event);
        }
    }

    /// Let timers up to `duration` from now fire, then handle their events
    async fn advance(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
        self.pump();
    }

    fn controller(&self, worker: WorkerId) -> PageController {
        self.bindings
            .lock()
            .unwrap()
            .get(&worker)
            .cloned()
            .unwrap_or_else(|| panic!("worker {worker} has no bound controller"))
    }

    fn drain_signals(&mut self) -> Vec<CoordinatorSignal> {
        let mut signals = Vec::new();
        while let Ok(signal) = self.signals.try_recv() {
            signals.push(signal);
        }
        signals
    }

    fn busy_workers(&self) -> usize {
        self.coordinator.stats().busy_workers
    }
}

fn script_job() -> Job {
    Job::new(ScriptRef::Inline("run()".to_string()))
}

#[tokio::test]
async fn test_idle_workers_take_jobs_before_queueing() {
    let mut harness = Harness::new(|config| config.coordinator.workers = 2);

    for _ in 0..3 {
        harness.coordinator.enqueue(script_job()).unwrap();
    }
    harness.pump();
    assert_eq!(harness.busy_workers(), 2);
    assert_eq!(harness.coordinator.pending_jobs(), 1);

    harness.controller(1).done();
    harness.pump();
    assert_eq!(harness.busy_workers(), 2);
    assert_eq!(harness.coordinator.pending_jobs(), 0);
}

#[tokio::test]
async fn test_quiescence_is_signalled_once() {
    let mut harness = Harness::new(|config| config.coordinator.workers = 1);
    let job = script_job();
    let job_id = job.id;

    harness.coordinator.enqueue(job).unwrap();
    harness.controller(1).done();
    harness.pump();

    let signals = harness.drain_signals();
    assert_eq!(
        signals,
        vec![
            CoordinatorSignal::Dispatched { worker: 1, job_id },
            CoordinatorSignal::Finished {
                worker: 1,
                job_id,
                outcome: JobOutcome::Done
            },
            CoordinatorSignal::Quiescent,
        ]
    );
    assert!(harness.coordinator.is_quiescent());

    harness.coordinator.dispatch();
    assert!(harness.drain_signals().is_empty());
}

#[tokio::test]
async fn test_full_queue_drops_new_jobs() {
    let mut harness = Harness::new(|config| {
        config.coordinator.workers = 1;
        config.coordinator.queue_capacity = 2;
    });

    for _ in 0..3 {
        harness.coordinator.enqueue(script_job()).unwrap();
    }
    let overflow = script_job();
    let overflow_id = overflow.id;
    let result = harness.coordinator.enqueue(overflow);

    assert!(matches!(result, Err(JobSchedulingError::QueueFull { capacity: 2, .. })));
    assert!(
        harness
            .drain_signals()
            .contains(&CoordinatorSignal::Dropped { job_id: overflow_id })
    );
    assert_eq!(harness.coordinator.stats().queue.dropped_jobs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_job_is_retried_within_budget() {
    let mut harness = Harness::new(|config| {
        config.coordinator.workers = 1;
        config.coordinator.max_retries = 2;
    });
    let job = script_job();
    let job_id = job.id;
    harness.coordinator.enqueue(job).unwrap();

    let mut attempts = 0;
    while harness.busy_workers() == 1 {
        attempts += 1;
        harness.controller(1).abort(Some(Duration::from_secs(1)));
        harness.pump();
        harness.advance(Duration::from_secs(2)).await;
    }

    assert_eq!(attempts, 3);
    let finished: Vec<_> = harness
        .drain_signals()
        .into_iter()
        .filter_map(|signal| match signal {
            CoordinatorSignal::Finished {
                job_id: id,
                outcome,
                ..
            } if id == job_id => Some(outcome),
            _ => None,
        })
        .collect();
    assert_eq!(
        finished,
        vec![
            JobOutcome::Aborted {
                retry_scheduled: true
            },
            JobOutcome::Aborted {
                retry_scheduled: true
            },
            JobOutcome::Aborted {
                retry_scheduled: false
            },
        ]
    );

    harness.advance(Duration::from_secs(3600)).await;
    assert_eq!(harness.busy_workers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_aborts_with_short_retry() {
    let mut harness = Harness::new(|config| config.coordinator.workers = 1);
    harness
        .coordinator
        .enqueue(script_job().with_timeout_seconds(5))
        .unwrap();

    harness.advance(Duration::from_secs(6)).await;
    assert_eq!(harness.busy_workers(), 0);

    harness.advance(Duration::from_secs(11)).await;
    assert_eq!(harness.busy_workers(), 1);
    let retried = harness.coordinator.worker(1).unwrap().current_job().unwrap();
    assert_eq!(retried.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_load_is_not_retried() {
    let mut harness = Harness::new(|config| config.coordinator.workers = 1);
    harness
        .coordinator
        .enqueue(script_job().with_start_url("https://broken.test/"))
        .unwrap();
    harness.pump();

    assert_eq!(harness.busy_workers(), 0);
    assert!(harness.bindings.lock().unwrap().is_empty());
    assert!(harness.drain_signals().iter().any(|signal| matches!(
        signal,
        CoordinatorSignal::Finished {
            outcome: JobOutcome::NotInjected,
            ..
        }
    )));

    harness.advance(Duration::from_secs(3600)).await;
    assert_eq!(harness.busy_workers(), 0);
}

#[tokio::test]
async fn test_phase_transition_runs_alongside_current_job() {
    let mut harness = Harness::new(|config| config.coordinator.workers = 2);
    let mut job = script_job().with_start_url("https://example.com/list");
    job.retry_count = 1;
    harness.coordinator.enqueue(job.clone()).unwrap();
    harness.pump();

    harness.controller(1).load(JobOverrides {
        state: Some("details".to_string()),
        start_url: Some("https://example.com/item/1".to_string()),
        ..JobOverrides::default()
    });
    harness.pump();

    assert_eq!(harness.busy_workers(), 2);
    let follow_up = harness.coordinator.worker(2).unwrap().current_job().unwrap();
    assert_ne!(follow_up.id, job.id);
    assert_eq!(follow_up.current_state(), "details");
    assert_eq!(follow_up.retry_count, 1);
    assert_eq!(
        harness.coordinator.worker(1).unwrap().current_job().unwrap().id,
        job.id
    );
}

#[tokio::test]
async fn test_stale_controller_cannot_touch_next_job() {
    let mut harness = Harness::new(|config| config.coordinator.workers = 1);
    harness.coordinator.enqueue(script_job()).unwrap();
    let first = harness.controller(1);
    first.done();
    harness.pump();

    let second = script_job();
    let second_id = second.id;
    harness.coordinator.enqueue(second).unwrap();
    harness.drain_signals();

    first.abort(None);
    first.done();
    harness.pump();

    assert!(harness.drain_signals().is_empty());
    assert_eq!(
        harness.coordinator.worker(1).unwrap().current_job().unwrap().id,
        second_id
    );
}

#[tokio::test]
async fn test_invalid_start_url_frees_worker_for_next_job() {
    let mut harness = Harness::new(|config| config.coordinator.workers = 1);
    harness
        .coordinator
        .enqueue(script_job().with_start_url("::not a url::"))
        .unwrap();
    harness.pump();
    assert_eq!(harness.busy_workers(), 0);

    harness.coordinator.enqueue(script_job()).unwrap();
    assert_eq!(harness.busy_workers(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_backs_off_before_retry() {
    let mut harness = Harness::new(|config| config.coordinator.workers = 1);
    harness.coordinator.enqueue(script_job()).unwrap();

    let access = harness.coordinator.worker(1).unwrap().access();
    let issued = match access.intercept(OutboundRequest::get(
        Url::parse("https://example.com/busy").unwrap(),
    )) {
        RequestDisposition::Forward(request) => request,
        RequestDisposition::Blocked => panic!("request should be forwarded"),
    };
    let mut response_headers = HeaderMap::new();
    response_headers.insert(RETRY_AFTER, HeaderValue::from_static("5"));
    let outcome = RequestOutcome::failed(
        issued.ticket,
        issued.url,
        NetworkError::new(NetworkErrorKind::Status(503), "service unavailable"),
        HeaderMap::new(),
        response_headers,
    );
    let delay = access.request_finished(&outcome).unwrap();
    assert!(delay >= Duration::from_secs(50) && delay < Duration::from_secs(80));

    harness.pump();
    assert_eq!(harness.busy_workers(), 0);

    harness.advance(Duration::from_secs(45)).await;
    assert_eq!(harness.busy_workers(), 0);

    harness.advance(Duration::from_secs(40)).await;
    assert_eq!(harness.busy_workers(), 1);
}

#[tokio::test]
async fn test_filter_rules_apply_only_while_job_runs() {
    let mut harness = Harness::new(|config| config.coordinator.workers = 1);
    harness
        .coordinator
        .enqueue(script_job().with_filter_rules([r"reject:\.png$", "allow:.*"]))
        .unwrap();

    let image = Url::parse("https://example.com/logo.png").unwrap();
    let access = harness.coordinator.worker(1).unwrap().access().clone();
    assert!(access.intercept(OutboundRequest::get(image.clone())).is_blocked());
    assert!(
        !access
            .intercept(OutboundRequest::get(Url::parse("https://example.com/").unwrap()))
            .is_blocked()
    );

    harness.controller(1).done();
    harness.pump();
    assert!(!access.intercept(OutboundRequest::get(image)).is_blocked());
}

#[tokio::test]
async fn test_definitions_feed_the_coordinator() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("startup.js"),
        "//!> schedule: once\n//!> state: boot\nrun();\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("hourly.js"),
        "//!> schedule: 0 * * * *\nrun();\n",
    )
    .unwrap();

    let definitions = load_definitions(dir.path()).unwrap();
    let mut planner = RecurrencePlanner::new(definitions, Duration::from_secs(900), 100);
    let mut harness = Harness::new(|config| config.coordinator.workers = 1);

    for run in planner.plan(Utc::now()) {
        if run.delay.is_zero() {
            harness.coordinator.enqueue(run.job).unwrap();
        }
    }

    let running = harness.coordinator.worker(1).unwrap().current_job().unwrap();
    assert_eq!(running.current_state(), "boot");
    assert_eq!(planner.len(), 1);
}
