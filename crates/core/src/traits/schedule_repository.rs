use async_trait::async_trait;

use crate::errors::RunplaneResult;
use crate::models::{ScheduleKind, ScheduleRecord};

/// Durable store for schedule definitions. The source of truth for schedule
/// existence across process restarts; the live job table is rebuilt from it.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Persist a new schedule. Fails with `Conflict` when `(project, name)`
    /// already exists.
    async fn create_schedule(&self, record: &ScheduleRecord) -> RunplaneResult<()>;

    /// Fails with `NotFound` when the schedule does not exist.
    async fn get_schedule(&self, project: &str, name: &str) -> RunplaneResult<ScheduleRecord>;

    async fn list_schedules(
        &self,
        project: Option<&str>,
        kind: Option<ScheduleKind>,
    ) -> RunplaneResult<Vec<ScheduleRecord>>;

    /// Fails with `NotFound` when the schedule does not exist.
    async fn delete_schedule(&self, project: &str, name: &str) -> RunplaneResult<()>;
}
