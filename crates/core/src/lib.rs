//! Core types for the runplane control plane: the error taxonomy,
//! configuration, data models (projects, schedules, cron triggers) and the
//! boundary traits the service crates are wired through.

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{RunplaneError, RunplaneResult};
