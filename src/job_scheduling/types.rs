//! Job scheduling type definitions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Identity of a logical job, stable across its retries
pub type JobId = Uuid;

/// State label reported to scripts when a job carries no explicit state
pub const MAIN_STATE: &str = "main";

/// Where a job's script comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptRef {
    /// Script file on the local filesystem
    File(PathBuf),
    /// Script source submitted inline with the job
    Inline(String),
}

impl ScriptRef {
    /// Read the script body
    pub fn load(&self) -> std::io::Result<String> {
        match self {
            ScriptRef::File(path) => std::fs::read_to_string(path),
            ScriptRef::Inline(source) => Ok(source.clone()),
        }
    }
}

impl fmt::Display for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptRef::File(path) => write!(f, "{}", path.display()),
            ScriptRef::Inline(source) => write!(f, "<inline {} bytes>", source.len()),
        }
    }
}

/// A unit of scraping work
///
/// A `Job` is never mutated once it has been handed to the coordinator.
/// Retries and phase transitions are new values built by [`Job::derive_retry`]
/// and [`Job::with_overrides`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub script: ScriptRef,
    /// Initial document; `None` runs the script against a blank document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    /// `once` or a cron expression, only set on locally defined jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Ordered `allow:<pattern>` / `reject:<pattern>` entries
    #[serde(default)]
    pub filter_rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_auth: Option<String>,
    #[serde(default)]
    pub block_images: bool,
    #[serde(default)]
    pub anonymizing_proxy: bool,
    #[serde(default)]
    pub retry_count: u32,
    /// Named phase the script resumes at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Free-form payload carried between phases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Job {
    pub fn new(script: ScriptRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            script,
            start_url: None,
            schedule: None,
            timeout_seconds: None,
            filter_rules: Vec::new(),
            proxy: None,
            proxy_auth: None,
            block_images: false,
            anonymizing_proxy: false,
            retry_count: 0,
            state: None,
            data: None,
        }
    }

    pub fn with_start_url<S: Into<String>>(mut self, url: S) -> Self {
        self.start_url = Some(url.into());
        self
    }

    pub fn with_filter_rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_rules = rules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_proxy<P: Into<String>>(mut self, proxy: P, auth: Option<String>) -> Self {
        self.proxy = Some(proxy.into());
        self.proxy_auth = auth;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Build the next attempt of this job after a failure
    pub fn derive_retry(&self) -> Job {
        Job {
            retry_count: self.retry_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Build the follow-up job for a script-driven phase transition
    ///
    /// The retry counter is carried over unchanged. The follow-up gets its own
    /// identity because it runs while the job that spawned it is still active.
    pub fn with_overrides(&self, overrides: JobOverrides) -> Job {
        let mut next = self.clone();
        next.id = Uuid::new_v4();
        if let Some(state) = overrides.state {
            next.state = Some(state);
        }
        if let Some(start_url) = overrides.start_url {
            next.start_url = Some(start_url);
        }
        if let Some(timeout_seconds) = overrides.timeout_seconds {
            next.timeout_seconds = Some(timeout_seconds);
        }
        if let Some(filter_rules) = overrides.filter_rules {
            next.filter_rules = filter_rules;
        }
        if let Some(proxy) = overrides.proxy {
            next.proxy = Some(proxy);
        }
        if let Some(proxy_auth) = overrides.proxy_auth {
            next.proxy_auth = Some(proxy_auth);
        }
        if let Some(block_images) = overrides.block_images {
            next.block_images = block_images;
        }
        if let Some(anonymizing_proxy) = overrides.anonymizing_proxy {
            next.anonymizing_proxy = anonymizing_proxy;
        }
        if let Some(data) = overrides.data {
            next.data = Some(data);
        }
        next
    }

    /// A new logical run of a recurring definition
    pub fn fresh_instance(&self) -> Job {
        Job {
            id: Uuid::new_v4(),
            retry_count: 0,
            ..self.clone()
        }
    }

    /// Phase reported to the script, `main` when unset
    pub fn current_state(&self) -> &str {
        self.state.as_deref().unwrap_or(MAIN_STATE)
    }

    /// Execution deadline for this job
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// The job as a JSON object, as exposed to scripts
    pub fn to_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Build a job from an inbound request dictionary
    pub fn from_request(raw: Map<String, Value>) -> Result<Job, JobSchedulingError> {
        let request: JobRequest =
            serde_json::from_value(Value::Object(raw)).map_err(|e| JobSchedulingError::InvalidJob {
                reason: e.to_string(),
            })?;
        Job::try_from(request)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job(id={}, script={}, url={}, state={}, retry={})",
            self.id,
            self.script,
            self.start_url.as_deref().unwrap_or("-"),
            self.current_state(),
            self.retry_count
        )
    }
}

/// Fields a running script may replace when it hands off to its next phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOverrides {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, alias = "url")]
    pub start_url: Option<String>,
    #[serde(default, alias = "timeout")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub filter_rules: Option<Vec<String>>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub proxy_auth: Option<String>,
    #[serde(default)]
    pub block_images: Option<bool>,
    #[serde(default)]
    pub anonymizing_proxy: Option<bool>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Shape of a one-off job submitted through the inbound listener
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    /// Path of the script to execute
    #[serde(default)]
    pub script: Option<PathBuf>,
    /// Inline script source, used when `script` is absent
    #[serde(default)]
    pub script_source: Option<String>,
    #[serde(default, alias = "url")]
    pub start_url: Option<String>,
    #[serde(default, alias = "timeout")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub filter_rules: Vec<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub proxy_auth: Option<String>,
    #[serde(default)]
    pub block_images: bool,
    #[serde(default)]
    pub anonymizing_proxy: bool,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl TryFrom<JobRequest> for Job {
    type Error = JobSchedulingError;

    fn try_from(request: JobRequest) -> Result<Self, Self::Error> {
        let script = match (request.script, request.script_source) {
            (Some(path), _) if !path.as_os_str().is_empty() => ScriptRef::File(path),
            (_, Some(source)) if !source.trim().is_empty() => ScriptRef::Inline(source),
            _ => {
                return Err(JobSchedulingError::InvalidJob {
                    reason: "no script reference".to_string(),
                });
            }
        };

        let mut job = Job::new(script);
        job.start_url = request.start_url.filter(|url| !url.trim().is_empty());
        job.timeout_seconds = request.timeout_seconds;
        job.filter_rules = request.filter_rules;
        job.proxy = request.proxy;
        job.proxy_auth = request.proxy_auth;
        job.block_images = request.block_images;
        job.anonymizing_proxy = request.anonymizing_proxy;
        job.state = request.state;
        job.data = request.data;
        Ok(job)
    }
}

/// Errors that can occur in the job scheduling system
#[derive(Debug, thiserror::Error)]
pub enum JobSchedulingError {
    /// Job queue is full
    #[error("Job queue is full (capacity {capacity}), dropped job {job_id}")]
    QueueFull { job_id: JobId, capacity: usize },

    /// Invalid job configuration
    #[error("Invalid job configuration: {reason}")]
    InvalidJob { reason: String },

    /// The coordinator loop is no longer running
    #[error("Coordinator is shut down")]
    CoordinatorClosed,
}
