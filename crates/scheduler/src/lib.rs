//! Schedule management: a persisted schedule store drives a live in-process
//! job table, with cron-style triggers and periodic background tasks.

pub mod background;
pub mod periodic;
pub mod service;

pub use background::{JobAction, JobScheduler};
pub use periodic::PeriodicTaskRunner;
pub use service::ScheduleService;
