//! Boundary traits the service crates are wired through. Concrete
//! implementations live in the infrastructure crate; tests substitute
//! in-memory or mock implementations.

pub mod leader;
pub mod run_submitter;
pub mod schedule_repository;

pub use leader::ProjectLeader;
pub use run_submitter::RunSubmitter;
pub use schedule_repository::ScheduleRepository;
