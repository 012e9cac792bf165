/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Coordinator defaults
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_PLANNING_INTERVAL_SECS: u64 = 15 * 60;
pub const DEFAULT_PLANNING_WINDOW_SECS: u64 = 15 * 60;
pub const DEFAULT_MAX_OCCURRENCES_PER_CYCLE: usize = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 5;

// Worker defaults
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_TIMEOUT_RETRY_DELAY_SECS: u64 = 10;
pub const DEFAULT_ABORT_DELAY_SECS: u64 = 60;
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1366;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 768;
pub const DEFAULT_BLANK_URL: &str = "about:blank";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_10_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/44.0.2403.157 Safari/537.36";

// Access defaults
pub const DEFAULT_COOKIE_CLEAR_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRY_DELAY_SECS: u64 = 3600;

// Job definition defaults
pub const DEFAULT_JOBS_DIRECTORY: &str = "./jobs";
pub const DEFAULT_LIBRARY_DIRECTORY: &str = "./js_libs";

// Engine defaults
pub const DEFAULT_RUNNER_COMMAND: &str = "node";
pub const DEFAULT_RUNNER_HARNESS: &str = "runner/harness.js";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// Listener defaults
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8090;
