use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

/// Environment variable prefix for configuration overrides,
/// e.g. `SCRAPER_COORDINATOR__WORKERS=4`.
pub const ENV_PREFIX: &str = "SCRAPER_";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
}

/// Worker pool, queue and recurrence planning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Fixed number of worker slots
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the bounded job queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How often the recurrence planner runs
    #[serde(default = "default_planning_interval", with = "duration")]
    pub planning_interval: Duration,
    /// How far ahead each planning cycle schedules occurrences
    #[serde(default = "default_planning_window", with = "duration")]
    pub planning_window: Duration,
    /// Upper bound on occurrences scheduled per definition per cycle
    #[serde(default = "default_max_occurrences")]
    pub max_occurrences_per_cycle: usize,
    /// Retries allowed after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_job_timeout", with = "duration")]
    pub default_timeout: Duration,
    /// Retry delay used when a job hits its timeout
    #[serde(default = "default_timeout_retry_delay", with = "duration")]
    pub timeout_retry_delay: Duration,
    /// Retry delay used when a script aborts without a delay
    #[serde(default = "default_abort_delay", with = "duration")]
    pub default_abort_delay: Duration,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Document a worker returns to between jobs
    #[serde(default = "default_blank_url")]
    pub blank_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default = "default_cookie_clear_interval", with = "duration")]
    pub cookie_clear_interval: Duration,
    /// Retry delay seed when a failed response carries no usable Retry-After
    #[serde(default = "default_retry_after", with = "duration")]
    pub default_retry_after: Duration,
    #[serde(default = "default_max_retry_delay", with = "duration")]
    pub max_retry_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Directory scanned for local job definition scripts
    #[serde(default = "default_jobs_directory")]
    pub directory: PathBuf,
    /// Directory of shared scripts injected before every job script
    #[serde(default = "default_library_directory")]
    pub library_directory: PathBuf,
    /// Optional controller library injected first
    #[serde(default)]
    pub controller_script: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Command that executes job scripts for the process engine
    #[serde(default = "default_runner_command")]
    pub runner: String,
    /// Arguments for the runner, normally the harness script path
    #[serde(default = "default_runner_args")]
    pub runner_args: Vec<String>,
    /// Timeout for document and auxiliary HTTP requests
    #[serde(default = "default_request_timeout", with = "duration")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_listener_enabled")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_planning_interval() -> Duration {
    Duration::from_secs(DEFAULT_PLANNING_INTERVAL_SECS)
}

fn default_planning_window() -> Duration {
    Duration::from_secs(DEFAULT_PLANNING_WINDOW_SECS)
}

fn default_max_occurrences() -> usize {
    DEFAULT_MAX_OCCURRENCES_PER_CYCLE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS)
}

fn default_timeout_retry_delay() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_RETRY_DELAY_SECS)
}

fn default_abort_delay() -> Duration {
    Duration::from_secs(DEFAULT_ABORT_DELAY_SECS)
}

fn default_viewport_width() -> u32 {
    DEFAULT_VIEWPORT_WIDTH
}

fn default_viewport_height() -> u32 {
    DEFAULT_VIEWPORT_HEIGHT
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_blank_url() -> String {
    DEFAULT_BLANK_URL.to_string()
}

fn default_cookie_clear_interval() -> Duration {
    Duration::from_secs(DEFAULT_COOKIE_CLEAR_INTERVAL_SECS)
}

fn default_retry_after() -> Duration {
    Duration::from_secs(DEFAULT_RETRY_AFTER_SECS)
}

fn default_max_retry_delay() -> Duration {
    Duration::from_secs(DEFAULT_MAX_RETRY_DELAY_SECS)
}

fn default_jobs_directory() -> PathBuf {
    PathBuf::from(DEFAULT_JOBS_DIRECTORY)
}

fn default_library_directory() -> PathBuf {
    PathBuf::from(DEFAULT_LIBRARY_DIRECTORY)
}

fn default_runner_command() -> String {
    DEFAULT_RUNNER_COMMAND.to_string()
}

fn default_runner_args() -> Vec<String> {
    vec![DEFAULT_RUNNER_HARNESS.to_string()]
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
}

fn default_listener_enabled() -> bool {
    true
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            planning_interval: default_planning_interval(),
            planning_window: default_planning_window(),
            max_occurrences_per_cycle: default_max_occurrences(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_job_timeout(),
            timeout_retry_delay: default_timeout_retry_delay(),
            default_abort_delay: default_abort_delay(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            user_agent: default_user_agent(),
            blank_url: default_blank_url(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            cookie_clear_interval: default_cookie_clear_interval(),
            default_retry_after: default_retry_after(),
            max_retry_delay: default_max_retry_delay(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            directory: default_jobs_directory(),
            library_directory: default_library_directory(),
            controller_script: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runner: default_runner_command(),
            runner_args: default_runner_args(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: default_listener_enabled(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file layered over defaults, with
    /// `SCRAPER_`-prefixed environment variables applied last.
    pub fn load_from_file<P: AsRef<Path>>(config_file: P) -> Result<Self> {
        let path = config_file.as_ref();
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if path.exists() {
            figment = figment.merge(Toml::file(path));
            info!("Loading configuration from {}", path.display());
        } else {
            info!(
                "Configuration file {} not found, using defaults",
                path.display()
            );
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.workers == 0 {
            anyhow::bail!("coordinator.workers must be at least 1");
        }
        if self.coordinator.queue_capacity == 0 {
            anyhow::bail!("coordinator.queue_capacity must be at least 1");
        }
        if self.coordinator.planning_interval.is_zero() {
            anyhow::bail!("coordinator.planning_interval must be greater than zero");
        }
        if self.access.cookie_clear_interval.is_zero() {
            anyhow::bail!("access.cookie_clear_interval must be greater than zero");
        }
        if self.engine.runner_args.is_empty() {
            anyhow::bail!("engine.runner_args must name the script the runner executes");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_policy() {
        let config = Config::default();
        assert_eq!(config.coordinator.workers, 10);
        assert_eq!(config.coordinator.queue_capacity, 1000);
        assert_eq!(config.coordinator.planning_window, Duration::from_secs(900));
        assert_eq!(config.coordinator.max_occurrences_per_cycle, 100);
        assert_eq!(config.worker.default_timeout, Duration::from_secs(300));
        assert_eq!(config.worker.timeout_retry_delay, Duration::from_secs(10));
        assert_eq!(config.access.cookie_clear_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.coordinator.workers, DEFAULT_WORKERS);
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[coordinator]
workers = 3
planning_interval = "5m"

[worker]
default_timeout = 120
"#
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.coordinator.workers, 3);
        assert_eq!(config.coordinator.planning_interval, Duration::from_secs(300));
        assert_eq!(config.worker.default_timeout, Duration::from_secs(120));
        assert_eq!(config.coordinator.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.coordinator.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runner_defaults_to_shipped_harness() {
        let config = Config::default();
        assert_eq!(config.engine.runner, "node");
        assert_eq!(config.engine.runner_args, vec![DEFAULT_RUNNER_HARNESS.to_string()]);
        assert!(
            Path::new(env!("CARGO_MANIFEST_DIR"))
                .join(DEFAULT_RUNNER_HARNESS)
                .is_file()
        );
    }

    #[test]
    fn test_empty_runner_args_rejected() {
        let mut config = Config::default();
        config.engine.runner_args.clear();
        assert!(config.validate().is_err());
    }
}
