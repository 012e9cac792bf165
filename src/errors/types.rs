//! Error type definitions for the scrape coordinator
//!
//! Errors are grouped by the layer that raises them so callers can decide
//! whether a failure drops a single job definition, a single request, or
//! needs to surface at startup.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Network policy errors (filters, proxies)
    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    /// Local job definition errors
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Job scheduling errors
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] crate::job_scheduling::JobSchedulingError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised while applying a job's network policy to a worker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// A filter entry is not of the form `allow:<pattern>` or `reject:<pattern>`
    #[error("Invalid filter string '{entry}': {reason}")]
    InvalidFilter { entry: String, reason: String },

    /// A proxy or proxy credential string could not be parsed
    #[error("Invalid proxy string '{proxy}': {reason}")]
    InvalidProxy { proxy: String, reason: String },
}

/// Errors raised while reading local job definition files
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// The definition directory or file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The schedule header is neither `once` nor a valid cron expression
    #[error("Invalid schedule '{schedule}' in {path}: {reason}")]
    InvalidSchedule {
        path: PathBuf,
        schedule: String,
        reason: String,
    },

    /// A header value could not be interpreted
    #[error("Invalid value for '{key}' in {path}: {value}")]
    InvalidValue {
        path: PathBuf,
        key: String,
        value: String,
    },
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl AccessError {
    pub fn invalid_filter<E: Into<String>, R: Into<String>>(entry: E, reason: R) -> Self {
        Self::InvalidFilter {
            entry: entry.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_proxy<P: Into<String>, R: Into<String>>(proxy: P, reason: R) -> Self {
        Self::InvalidProxy {
            proxy: proxy.into(),
            reason: reason.into(),
        }
    }
}
