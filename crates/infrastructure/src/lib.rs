//! Concrete implementations of the runplane boundary traits: the HTTP
//! project-leader client, the in-memory nop leader, the embedded SQLite
//! schedule store and the default run-submission stub.

pub mod database;
pub mod leader;
pub mod runs;

pub use database::SqliteScheduleStore;
pub use leader::{build_leader, HttpProjectLeader, NopProjectLeader};
pub use runs::LoggingRunSubmitter;
