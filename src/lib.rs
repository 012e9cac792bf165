pub mod access;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod job_scheduling;
pub mod observability;
pub mod utils;
pub mod web;
pub mod worker;
