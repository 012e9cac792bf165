//! Utility modules shared by the scheduler, access policy and workers

pub mod cron_helper;
pub mod jitter;
pub mod url;

pub use cron_helper::{normalize_cron_expression, parse_schedule};
pub use jitter::generate_jitter_secs_with;
pub use url::UrlUtils;
