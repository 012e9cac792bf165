//! Local job definitions
//!
//! A definition is a script file whose leading lines carry `//!> key: value`
//! headers. Parsing stops at the first line that is not a header. A file
//! without a `schedule` header is a library or helper and is not registered.
//! Cron schedules are evaluated in the local time zone of the host, so
//! `0 9 * * *` runs at 09:00 wall-clock time.
//!
//! ```text
//! //!> schedule: */30 * * * *
//! //!> url: https://example.com/listing
//! //!> filter: reject:\.(png|jpg)$
//! //!> filter: allow:.*
//! //!> timeout: 120
//! ```

use super::job_scheduler::Recurrence;
use super::types::{Job, ScriptRef};
use crate::errors::DefinitionError;
use std::path::Path;
use tracing::{debug, info, warn};

/// Prefix of a definition header line
pub const DEFINITION_MARKER: &str = "//!>";

/// A job template plus its recurrence
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub job: Job,
    pub recurrence: Recurrence,
}

/// Extract the `key: value` header pairs in file order
pub fn parse_headers(source: &str) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    for line in source.lines() {
        let Some(rest) = line.trim_start().strip_prefix(DEFINITION_MARKER) else {
            break;
        };
        let Some((key, value)) = rest.split_once(':') else {
            break;
        };
        headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
    }
    headers
}

fn parse_bool(path: &Path, key: &str, value: &str) -> Result<bool, DefinitionError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(DefinitionError::InvalidValue {
            path: path.to_path_buf(),
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Build a definition from a script file's contents
///
/// Returns `Ok(None)` for scripts without a schedule header.
pub fn parse_definition(path: &Path, source: &str) -> Result<Option<JobDefinition>, DefinitionError> {
    let headers = parse_headers(source);
    let Some(schedule) = headers
        .iter()
        .find(|(key, _)| key == "schedule")
        .map(|(_, value)| value.clone())
    else {
        return Ok(None);
    };

    let recurrence =
        Recurrence::parse(&schedule).map_err(|reason| DefinitionError::InvalidSchedule {
            path: path.to_path_buf(),
            schedule: schedule.clone(),
            reason,
        })?;

    let mut job = Job::new(ScriptRef::File(path.to_path_buf()));
    job.schedule = Some(schedule);

    for (key, value) in headers {
        match key.as_str() {
            "schedule" => {}
            "url" | "start_url" => job.start_url = Some(value),
            "timeout" => {
                let seconds = value.parse::<u64>().map_err(|_| DefinitionError::InvalidValue {
                    path: path.to_path_buf(),
                    key: key.clone(),
                    value: value.clone(),
                })?;
                job.timeout_seconds = Some(seconds);
            }
            "filter" => job.filter_rules.push(value),
            "proxy" => job.proxy = Some(value),
            "proxy_auth" => job.proxy_auth = Some(value),
            "block_images" => job.block_images = parse_bool(path, &key, &value)?,
            "anonymizing_proxy" => job.anonymizing_proxy = parse_bool(path, &key, &value)?,
            "state" => job.state = Some(value),
            other => warn!("Ignoring unknown header '{}' in {}", other, path.display()),
        }
    }

    Ok(Some(JobDefinition { job, recurrence }))
}

/// Load every `*.js` definition in `directory`, in file name order
///
/// A broken definition is logged and skipped. A missing directory yields no
/// definitions.
pub fn load_definitions(directory: &Path) -> Result<Vec<JobDefinition>, DefinitionError> {
    if !directory.exists() {
        warn!("Job directory {} does not exist", directory.display());
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(directory).map_err(|source| DefinitionError::Read {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "js"))
        .collect();
    paths.sort();

    let mut definitions = Vec::new();
    for path in paths {
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(source) => {
                warn!("{}", DefinitionError::Read { path, source });
                continue;
            }
        };

        match parse_definition(&path, &source) {
            Ok(Some(definition)) => {
                debug!("Registered {}", definition.job);
                definitions.push(definition);
            }
            Ok(None) => debug!("{} has no schedule, skipping", path.display()),
            Err(e) => warn!("Dropping job definition: {}", e),
        }
    }

    info!(
        "Loaded {} job definitions from {}",
        definitions.len(),
        directory.display()
    );
    Ok(definitions)
}
