//! Centralized error handling for the scrape coordinator
//!
//! # Error Categories
//!
//! - **Admission errors**: malformed proxy/filter strings, bad definitions,
//!   queue overflow. The affected job is dropped and the process continues.
//! - **Transient execution errors**: carried as worker events, never as `Err`
//!   values, because they feed the retry path instead of the caller.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for network policy Results
pub type AccessResult<T> = Result<T, AccessError>;
