use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use runplane_core::models::{DeletionStrategy, Project};
use runplane_core::traits::ProjectLeader;
use runplane_core::{RunplaneError, RunplaneResult};

/// In-memory project leader with the same contract as the HTTP client.
/// Used by tests and by deployments running without an external leader.
#[derive(Default)]
pub struct NopProjectLeader {
    projects: RwLock<HashMap<String, Project>>,
}

impl NopProjectLeader {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectLeader for NopProjectLeader {
    async fn create_project(&self, _session: &str, project: Project) -> RunplaneResult<Project> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(project.name()) {
            return Err(RunplaneError::Conflict(format!(
                "project {} already exists",
                project.name()
            )));
        }
        projects.insert(project.name().to_string(), project.clone());
        Ok(project)
    }

    async fn store_project(
        &self,
        _session: &str,
        name: &str,
        project: Project,
    ) -> RunplaneResult<Project> {
        self.projects
            .write()
            .await
            .insert(name.to_string(), project.clone());
        Ok(project)
    }

    async fn delete_project(
        &self,
        _session: &str,
        name: &str,
        _deletion_strategy: DeletionStrategy,
    ) -> RunplaneResult<()> {
        self.projects.write().await.remove(name);
        Ok(())
    }

    async fn list_projects(&self, _session: &str) -> RunplaneResult<Vec<Project>> {
        Ok(self.projects.read().await.values().cloned().collect())
    }

    async fn try_get_service_url(
        &self,
        _session: &str,
        _kind: &str,
    ) -> RunplaneResult<Option<String>> {
        Ok(None)
    }
}
