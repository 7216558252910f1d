use async_trait::async_trait;

use crate::errors::RunplaneResult;
use crate::models::{DeletionStrategy, Project};

/// The external authoritative holder of project state.
///
/// Every operation takes the caller's session credential against the
/// leader, obtained out-of-band.
#[async_trait]
pub trait ProjectLeader: Send + Sync {
    /// Create a project. Fails with `Conflict` when a project of that name
    /// already exists on the leader; otherwise returns the leader's
    /// canonical representation.
    async fn create_project(&self, session: &str, project: Project) -> RunplaneResult<Project>;

    /// Idempotent create-or-replace.
    async fn store_project(
        &self,
        session: &str,
        name: &str,
        project: Project,
    ) -> RunplaneResult<Project>;

    /// Delete a project, waiting for the leader's asynchronous deletion job
    /// to reach a terminal state. Deleting an absent project succeeds.
    async fn delete_project(
        &self,
        session: &str,
        name: &str,
        deletion_strategy: DeletionStrategy,
    ) -> RunplaneResult<()>;

    async fn list_projects(&self, session: &str) -> RunplaneResult<Vec<Project>>;

    /// Best-effort discovery of an auxiliary service endpoint of the given
    /// kind; `None` when no ready instance exists.
    async fn try_get_service_url(
        &self,
        session: &str,
        kind: &str,
    ) -> RunplaneResult<Option<String>>;
}
