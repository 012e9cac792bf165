//! Page engine backed by an external script runner process
//!
//! Documents are fetched with `reqwest` through the worker's access
//! controller. Scripts run in a runner process (by default `node` with the
//! shipped `runner/harness.js`) that speaks JSON lines: the engine writes messages to the
//! runner's stdin, the runner writes controller calls to stdout, and anything
//! on stderr or non-JSON stdout is treated as console output.

use super::{EngineContext, EngineFactory, PageEngine};
use crate::access::{NetworkError, NetworkErrorKind, OutboundRequest, RequestDisposition, RequestOutcome};
use crate::config::EngineConfig;
use crate::job_scheduling::events::{HttpCallbackResult, Ticket};
use crate::job_scheduling::types::JobOverrides;
use crate::utils::UrlUtils;
use crate::worker::controller::PageController;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct ProcessEngineFactory {
    command: String,
    args: Vec<String>,
    request_timeout: Duration,
}

impl ProcessEngineFactory {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            command: config.runner.clone(),
            args: config.runner_args.clone(),
            request_timeout: config.request_timeout,
        }
    }
}

impl EngineFactory for ProcessEngineFactory {
    fn create(&self, context: EngineContext) -> Box<dyn PageEngine> {
        Box::new(ProcessEngine {
            context,
            factory: self.clone(),
            images_enabled: true,
            viewport: (0, 0),
            document: Arc::new(Mutex::new(None)),
            load_task: None,
            runner: None,
        })
    }
}

#[derive(Debug, Clone)]
struct LoadedDocument {
    url: String,
    html: String,
}

/// Messages written to the runner's stdin
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EngineMessage<'a> {
    Settings {
        images_enabled: bool,
        viewport_width: u32,
        viewport_height: u32,
        user_agent: &'a str,
    },
    Bind {
        name: &'a str,
        job: Value,
        state: String,
    },
    Document {
        url: &'a str,
        html: &'a str,
    },
    Evaluate {
        source: &'a str,
    },
    HttpResponse {
        callback_id: u64,
        status: u16,
        error: Option<&'a str>,
        body: &'a str,
    },
}

/// Controller calls read from the runner's stdout
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "call", rename_all = "snake_case")]
enum RunnerCall {
    Done,
    Abort {
        #[serde(default)]
        retry_after: Option<u64>,
    },
    Load {
        #[serde(default)]
        overrides: JobOverrides,
    },
    HttpRequest {
        callback_id: u64,
        url: String,
    },
    PostRequest {
        url: String,
        body: String,
    },
    LogMessage {
        message: String,
    },
    LogError {
        message: String,
    },
}

impl RunnerCall {
    fn apply(self, controller: &PageController) {
        match self {
            RunnerCall::Done => controller.done(),
            RunnerCall::Abort { retry_after } => {
                controller.abort(retry_after.map(Duration::from_secs))
            }
            RunnerCall::Load { overrides } => controller.load(overrides),
            RunnerCall::HttpRequest { callback_id, url } => controller.http_request(callback_id, url),
            RunnerCall::PostRequest { url, body } => controller.post_request(url, body),
            RunnerCall::LogMessage { message } => controller.log_message(message),
            RunnerCall::LogError { message } => controller.log_error(message),
        }
    }
}

/// A running script process; dropping it kills the process
struct RunnerSession {
    _child: Child,
    input: mpsc::UnboundedSender<String>,
    tasks: Vec<AbortHandle>,
}

impl Drop for RunnerSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct ProcessEngine {
    context: EngineContext,
    factory: ProcessEngineFactory,
    images_enabled: bool,
    viewport: (u32, u32),
    document: Arc<Mutex<Option<LoadedDocument>>>,
    load_task: Option<AbortHandle>,
    runner: Option<RunnerSession>,
}

impl ProcessEngine {
    fn stop(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        self.runner = None;
        *self.document.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn send(&self, message: &EngineMessage<'_>) {
        let Some(runner) = &self.runner else {
            debug!("Worker {}: no runner to receive message", self.context.worker);
            return;
        };
        match serde_json::to_string(message) {
            Ok(line) => {
                let _ = runner.input.send(line);
            }
            Err(e) => error!("Worker {}: cannot encode runner message: {}", self.context.worker, e),
        }
    }

    fn spawn_runner(&self, controller: PageController) -> std::io::Result<RunnerSession> {
        let mut child = Command::new(&self.factory.command)
            .args(&self.factory.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let missing = || std::io::Error::other("runner stdio not captured");
        let mut stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;
        let stderr = child.stderr.take().ok_or_else(missing)?;

        let (input, mut input_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(mut line) = input_rx.recv().await {
                line.push('\n');
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let sink = self.context.events.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<RunnerCall>(&line) {
                    Ok(call) => call.apply(&controller),
                    Err(_) => sink.console_message(line),
                }
            }
        });

        let sink = self.context.events.clone();
        let console = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink.console_message(line);
            }
        });

        Ok(RunnerSession {
            _child: child,
            input,
            tasks: vec![
                writer.abort_handle(),
                reader.abort_handle(),
                console.abort_handle(),
            ],
        })
    }
}

/// Fetch the start document through the access policy
async fn fetch_document(
    context: &EngineContext,
    url: &Url,
    timeout: Duration,
) -> Option<LoadedDocument> {
    let worker = context.worker;
    let mut request = OutboundRequest::get(url.clone());
    if let Ok(agent) = HeaderValue::from_str(&context.user_agent) {
        request.headers.insert(USER_AGENT, agent);
    }

    let request = match context.access.intercept(request) {
        RequestDisposition::Forward(request) => request,
        RequestDisposition::Blocked => {
            debug!("Worker {}: start document was blocked by filter rules", worker);
            return None;
        }
    };

    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(request.tls.accept_invalid_certs);
    if let Some(proxy) = context.access.proxy() {
        let credentials = context.access.proxy_credentials();
        match proxy.to_reqwest(credentials.as_ref()) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => warn!("Worker {}: ignoring unusable proxy: {}", worker, e),
        }
    }
    let client = match builder.build() {
        Ok(client) => client,
        Err(e) => {
            error!("Worker {}: cannot build HTTP client: {}", worker, e);
            return None;
        }
    };

    let ticket = request.ticket;
    let request_headers = request.headers.clone();
    let target = request.url.clone();
    let response = match client
        .request(request.method, request.url)
        .headers(request.headers)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            context.access.request_finished(&RequestOutcome::failed(
                ticket,
                target,
                NetworkError::from_reqwest(&e),
                request_headers,
                HeaderMap::new(),
            ));
            return None;
        }
    };

    let status = response.status();
    let response_headers = response.headers().clone();

    if status == StatusCode::UNAUTHORIZED {
        context.access.authentication_required(ticket, &target);
        return None;
    }
    if !status.is_success() {
        context.access.request_finished(&RequestOutcome::failed(
            ticket,
            target,
            NetworkError::new(NetworkErrorKind::Status(status.as_u16()), status.to_string()),
            request_headers,
            response_headers,
        ));
        return None;
    }

    context.access.request_finished(&RequestOutcome::succeeded(
        ticket,
        target.clone(),
        request_headers.clone(),
        response_headers.clone(),
    ));

    match response.text().await {
        Ok(html) => Some(LoadedDocument {
            url: target.to_string(),
            html,
        }),
        Err(e) => {
            context.access.request_finished(&RequestOutcome::failed(
                ticket,
                target,
                NetworkError::from_reqwest(&e),
                request_headers,
                response_headers,
            ));
            None
        }
    }
}

impl PageEngine for ProcessEngine {
    fn load_document(&mut self, url: &Url, ticket: Ticket) {
        self.stop();

        let context = self.context.clone();
        let document = self.document.clone();
        let timeout = self.factory.request_timeout;
        let url = url.clone();
        debug!(
            "Worker {}: fetching {}",
            context.worker,
            UrlUtils::obfuscate_credentials(url.as_str())
        );

        let task = tokio::spawn(async move {
            let loaded = fetch_document(&context, &url, timeout).await;
            let ok = loaded.is_some();
            *document.lock().unwrap_or_else(|e| e.into_inner()) = loaded;
            context.events.load_finished(ticket, ok);
        });
        self.load_task = Some(task.abort_handle());
    }

    fn load_blank(&mut self, _url: &str) {
        self.stop();
    }

    fn evaluate_script(&mut self, source: &str) {
        self.send(&EngineMessage::Evaluate { source });
    }

    fn bind_object(&mut self, name: &str, controller: PageController) {
        self.runner = None;
        let job = controller.job_dict();
        let state = controller.current_job_state();

        match self.spawn_runner(controller.clone()) {
            Ok(session) => self.runner = Some(session),
            Err(e) => {
                error!(
                    "Worker {}: cannot start runner '{}': {}",
                    self.context.worker, self.factory.command, e
                );
                controller.log_error(format!("runner failed to start: {e}"));
                controller.abort(None);
                return;
            }
        }

        self.send(&EngineMessage::Settings {
            images_enabled: self.images_enabled,
            viewport_width: self.viewport.0,
            viewport_height: self.viewport.1,
            user_agent: &self.context.user_agent,
        });
        self.send(&EngineMessage::Bind { name, job, state });

        let document = self
            .document
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(document) = document {
            self.send(&EngineMessage::Document {
                url: &document.url,
                html: &document.html,
            });
        }
    }

    fn set_images_enabled(&mut self, enabled: bool) {
        self.images_enabled = enabled;
    }

    fn set_viewport_size(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn deliver_http_response(&mut self, callback_id: u64, response: &HttpCallbackResult) {
        self.send(&EngineMessage::HttpResponse {
            callback_id,
            status: response.status,
            error: response.error.as_deref(),
            body: &response.body,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_scheduling::events::{ControlCall, CoordinatorEvent, WorkerEvent};
    use crate::job_scheduling::types::{Job, ScriptRef};
    use tokio::sync::mpsc;

    #[test]
    fn test_runner_calls_parse() {
        assert_eq!(
            serde_json::from_str::<RunnerCall>(r#"{"call":"done"}"#).unwrap(),
            RunnerCall::Done
        );
        assert_eq!(
            serde_json::from_str::<RunnerCall>(r#"{"call":"abort","retry_after":5}"#).unwrap(),
            RunnerCall::Abort {
                retry_after: Some(5)
            }
        );
        assert_eq!(
            serde_json::from_str::<RunnerCall>(r#"{"call":"load","overrides":{"state":"page2"}}"#)
                .unwrap(),
            RunnerCall::Load {
                overrides: JobOverrides {
                    state: Some("page2".to_string()),
                    ..JobOverrides::default()
                }
            }
        );
        assert!(serde_json::from_str::<RunnerCall>("plain console output").is_err());
    }

    #[test]
    fn test_runner_call_reaches_controller() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = Arc::new(Job::new(ScriptRef::Inline(String::new())));
        let controller = PageController::new(2, Ticket(7), job, tx);

        RunnerCall::HttpRequest {
            callback_id: 4,
            url: "https://example.com/api".to_string(),
        }
        .apply(&controller);

        match rx.try_recv().unwrap() {
            CoordinatorEvent::Worker {
                worker: 2,
                event: WorkerEvent::Control { ticket, call },
            } => {
                assert_eq!(ticket, Ticket(7));
                assert_eq!(
                    call,
                    ControlCall::HttpRequest {
                        callback_id: 4,
                        url: "https://example.com/api".to_string()
                    }
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_engine_messages_are_tagged() {
        let line = serde_json::to_string(&EngineMessage::Evaluate { source: "done()" }).unwrap();
        assert_eq!(line, r#"{"type":"evaluate","source":"done()"}"#);
    }
}
