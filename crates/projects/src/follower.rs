use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use runplane_core::config::{LabelMatchMode, LeaderKind, ProjectsConfig};
use runplane_core::models::{
    DeletionStrategy, Project, ProjectState, ProjectsFormat, ProjectsOutput,
};
use runplane_core::traits::ProjectLeader;
use runplane_core::{RunplaneError, RunplaneResult};
use runplane_scheduler::PeriodicTaskRunner;

/// Periodic task name for the full-cache sync loop.
const SYNC_TASK: &str = "sync_projects";

/// Non-authoritative view of the project set.
///
/// Reads are served from a local cache that a periodic full sync keeps
/// converging toward the leader's state. Writes branch on their origin:
/// a change pushed by the leader itself is applied to the cache directly,
/// anything else is forwarded to the leader and left for the next sync to
/// bring back. The cache is replaced wholesale on each sync, so leader-side
/// deletions propagate without tombstones.
pub struct ProjectFollower {
    leader: Arc<dyn ProjectLeader>,
    session: String,
    config: ProjectsConfig,
    cache: Arc<RwLock<HashMap<String, Project>>>,
}

impl ProjectFollower {
    /// Build the follower and derive its leader session credential from the
    /// configured access key. Fails fast when the HTTP leader is configured
    /// without one.
    pub fn new(leader: Arc<dyn ProjectLeader>, config: ProjectsConfig) -> RunplaneResult<Self> {
        let session = match (config.leader, config.access_key.as_deref()) {
            (LeaderKind::Http, None) => {
                return Err(RunplaneError::InvalidArgument(
                    "http leader requires an access key".to_string(),
                ))
            }
            (_, key) => format!("j:{{\"sid\": \"{}\"}}", key.unwrap_or_default()),
        };
        Ok(Self {
            leader,
            session,
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Prime the cache with one synchronous full sync, then keep it warm
    /// periodically when so configured.
    pub async fn initialize(self: &Arc<Self>, periodic: &PeriodicTaskRunner) -> RunplaneResult<()> {
        self.sync_projects().await?;
        if !self.config.periodic_sync_interval.is_zero() {
            let follower = Arc::clone(self);
            periodic
                .run_function_periodically(
                    SYNC_TASK,
                    self.config.periodic_sync_interval,
                    false,
                    move || {
                        let follower = Arc::clone(&follower);
                        async move {
                            follower.sync_projects().await?;
                            Ok(())
                        }
                    },
                )
                .await;
        }
        Ok(())
    }

    pub async fn shutdown(&self, periodic: &PeriodicTaskRunner) {
        periodic.cancel_periodic_function(SYNC_TASK).await;
    }

    /// Create a project. A leader-originated create lands in the cache
    /// directly; any other create is forwarded and the cache is left alone
    /// until the next sync brings the canonical version back.
    pub async fn create_project(
        &self,
        project: Project,
        from_leader: bool,
    ) -> RunplaneResult<Project> {
        let name = project.name().to_string();
        if name.is_empty() {
            return Err(RunplaneError::InvalidArgument(
                "project name is required".to_string(),
            ));
        }
        if from_leader {
            let mut cache = self.cache.write().await;
            if cache.contains_key(&name) {
                return Err(RunplaneError::Conflict(format!(
                    "project {name} already exists"
                )));
            }
            info!(project = %name, "caching leader-originated project");
            cache.insert(name, project.clone());
            Ok(project)
        } else {
            let created = self.leader.create_project(&self.session, project).await?;
            info!(project = %name, "project creation forwarded to leader");
            Ok(created)
        }
    }

    /// Create-or-replace, with the same origin branching as create. The
    /// path name wins over whatever the body carries.
    pub async fn store_project(
        &self,
        name: &str,
        mut project: Project,
        from_leader: bool,
    ) -> RunplaneResult<Project> {
        if name.is_empty() {
            return Err(RunplaneError::InvalidArgument(
                "project name is required".to_string(),
            ));
        }
        project.metadata.name = name.to_string();
        if from_leader {
            info!(project = name, "caching leader-originated project");
            self.cache
                .write()
                .await
                .insert(name.to_string(), project.clone());
            Ok(project)
        } else {
            let stored = self.leader.store_project(&self.session, name, project).await?;
            info!(project = name, "project store forwarded to leader");
            Ok(stored)
        }
    }

    /// Partial updates cannot be merged safely against a cache that may be
    /// stale, so the follower rejects them outright.
    pub async fn patch_project(
        &self,
        _name: &str,
        _patch: serde_json::Value,
    ) -> RunplaneResult<Project> {
        Err(RunplaneError::NotSupported(
            "patching projects is not supported in follower mode".to_string(),
        ))
    }

    /// Delete a project, branching on origin like the other writes.
    /// Idempotent on both paths: an absent project deletes cleanly.
    pub async fn delete_project(
        &self,
        name: &str,
        deletion_strategy: DeletionStrategy,
        from_leader: bool,
    ) -> RunplaneResult<()> {
        if from_leader {
            if self.cache.write().await.remove(name).is_some() {
                info!(project = name, "leader-originated deletion applied");
            } else {
                debug!(project = name, "deleted project was not cached");
            }
            Ok(())
        } else {
            self.leader
                .delete_project(&self.session, name, deletion_strategy)
                .await?;
            info!(project = name, "project deletion forwarded to leader");
            Ok(())
        }
    }

    /// Serve a project from the cache. Fails with `NotFound` for anything
    /// the last sync did not bring over.
    pub async fn get_project(&self, name: &str) -> RunplaneResult<Project> {
        self.cache
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RunplaneError::NotFound(format!("project {name} does not exist")))
    }

    /// List cached projects, filtered by labels and observed state. Label
    /// terms are `key` (presence) or `key=value`; how multiple terms
    /// combine is governed by the configured match mode. Owner filtering
    /// needs authoritative state and is refused in follower mode.
    pub async fn list_projects(
        &self,
        owner: Option<&str>,
        format: ProjectsFormat,
        labels: &[String],
        state: Option<ProjectState>,
    ) -> RunplaneResult<ProjectsOutput> {
        if owner.is_some() {
            return Err(RunplaneError::NotSupported(
                "filtering projects by owner is not supported in follower mode".to_string(),
            ));
        }
        let cache = self.cache.read().await;
        let mut projects: Vec<&Project> = cache
            .values()
            .filter(|project| {
                self.matches_labels(project, labels)
                    && state.map_or(true, |wanted| project.status.state == Some(wanted))
            })
            .collect();
        projects.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(match format {
            ProjectsFormat::Full => {
                ProjectsOutput::Full(projects.into_iter().cloned().collect())
            }
            ProjectsFormat::NameOnly => ProjectsOutput::NameOnly(
                projects.into_iter().map(|p| p.name().to_string()).collect(),
            ),
        })
    }

    /// Pull the leader's full project set and replace the cache with it.
    pub async fn sync_projects(&self) -> RunplaneResult<()> {
        let projects = self.leader.list_projects(&self.session).await?;
        debug!(count = projects.len(), "synced projects from leader");
        let fresh: HashMap<String, Project> = projects
            .into_iter()
            .map(|project| (project.name().to_string(), project))
            .collect();
        *self.cache.write().await = fresh;
        Ok(())
    }

    /// Discover an auxiliary leader-side service endpoint.
    pub async fn get_service_url(&self, kind: &str) -> RunplaneResult<Option<String>> {
        self.leader.try_get_service_url(&self.session, kind).await
    }

    fn matches_labels(&self, project: &Project, labels: &[String]) -> bool {
        let mut terms = labels.iter().map(|term| match term.split_once('=') {
            Some((key, value)) => {
                project.metadata.labels.get(key).map(String::as_str) == Some(value)
            }
            None => project.metadata.labels.contains_key(term.as_str()),
        });
        match self.config.label_match_mode {
            LabelMatchMode::FirstTerm => terms.next().unwrap_or(true),
            LabelMatchMode::AllTerms => terms.all(|matched| matched),
        }
    }

    /// Number of cached projects, for tooling and tests.
    pub async fn cached_project_count(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use runplane_infrastructure::NopProjectLeader;

    mock! {
        Leader {}

        #[async_trait]
        impl ProjectLeader for Leader {
            async fn create_project(&self, session: &str, project: Project) -> RunplaneResult<Project>;
            async fn store_project(&self, session: &str, name: &str, project: Project) -> RunplaneResult<Project>;
            async fn delete_project(&self, session: &str, name: &str, deletion_strategy: DeletionStrategy) -> RunplaneResult<()>;
            async fn list_projects(&self, session: &str) -> RunplaneResult<Vec<Project>>;
            async fn try_get_service_url(&self, session: &str, kind: &str) -> RunplaneResult<Option<String>>;
        }
    }

    fn nop_follower(mode: LabelMatchMode) -> ProjectFollower {
        let config = ProjectsConfig {
            label_match_mode: mode,
            ..ProjectsConfig::default()
        };
        ProjectFollower::new(Arc::new(NopProjectLeader::new()), config).unwrap()
    }

    fn labeled_project(name: &str, labels: &[(&str, &str)], state: ProjectState) -> Project {
        let mut project = Project::new(name);
        for (key, value) in labels {
            project
                .metadata
                .labels
                .insert(key.to_string(), value.to_string());
        }
        project.status.state = Some(state);
        project
    }

    #[tokio::test]
    async fn http_leader_without_access_key_is_rejected() {
        let config = ProjectsConfig {
            leader: LeaderKind::Http,
            access_key: None,
            ..ProjectsConfig::default()
        };
        assert!(matches!(
            ProjectFollower::new(Arc::new(NopProjectLeader::new()), config),
            Err(RunplaneError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn session_carries_access_key() {
        let mut leader = MockLeader::new();
        leader
            .expect_list_projects()
            .withf(|session| session == "j:{\"sid\": \"secret-key\"}")
            .returning(|_| Ok(vec![]));
        let config = ProjectsConfig {
            leader: LeaderKind::Http,
            access_key: Some("secret-key".to_string()),
            ..ProjectsConfig::default()
        };
        let follower = ProjectFollower::new(Arc::new(leader), config).unwrap();
        follower.sync_projects().await.unwrap();
    }

    #[tokio::test]
    async fn forwarded_create_leaves_the_cache_to_the_next_sync() {
        let leader = Arc::new(NopProjectLeader::new());
        let follower =
            ProjectFollower::new(leader.clone(), ProjectsConfig::default()).unwrap();
        follower
            .create_project(Project::new("iris"), false)
            .await
            .unwrap();
        // not visible until a sync brings the leader's copy over
        assert!(matches!(
            follower.get_project("iris").await,
            Err(RunplaneError::NotFound(_))
        ));
        follower.sync_projects().await.unwrap();
        assert!(follower.get_project("iris").await.is_ok());
    }

    #[tokio::test]
    async fn forwarded_create_returns_the_leader_canonical_project() {
        let mut leader = MockLeader::new();
        leader.expect_create_project().returning(|_, mut project| {
            // the leader stamps fields the caller left out
            project.spec.owner = Some("admin".to_string());
            Ok(project)
        });
        let follower =
            ProjectFollower::new(Arc::new(leader), ProjectsConfig::default()).unwrap();
        let created = follower
            .create_project(Project::new("iris"), false)
            .await
            .unwrap();
        assert_eq!(created.spec.owner.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn create_without_a_name_is_rejected() {
        let follower = nop_follower(LabelMatchMode::FirstTerm);
        assert!(matches!(
            follower.create_project(Project::default(), true).await,
            Err(RunplaneError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_leader_originated_create_is_a_conflict() {
        let follower = nop_follower(LabelMatchMode::FirstTerm);
        follower
            .create_project(Project::new("iris"), true)
            .await
            .unwrap();
        assert!(matches!(
            follower.create_project(Project::new("iris"), true).await,
            Err(RunplaneError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn leader_originated_store_replaces_the_cache_entry() {
        let follower = nop_follower(LabelMatchMode::FirstTerm);
        follower
            .create_project(Project::new("iris"), true)
            .await
            .unwrap();
        let mut update = Project::new("something-else");
        update.spec.description = Some("refreshed".to_string());
        let stored = follower.store_project("iris", update, true).await.unwrap();
        assert_eq!(stored.name(), "iris");
        let cached = follower.get_project("iris").await.unwrap();
        assert_eq!(cached.spec.description.as_deref(), Some("refreshed"));
    }

    #[tokio::test]
    async fn patch_is_not_supported() {
        let follower = nop_follower(LabelMatchMode::FirstTerm);
        assert!(matches!(
            follower
                .patch_project("iris", serde_json::json!({"spec": {"owner": "x"}}))
                .await,
            Err(RunplaneError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_both_paths() {
        let follower = nop_follower(LabelMatchMode::FirstTerm);
        follower
            .create_project(Project::new("iris"), true)
            .await
            .unwrap();
        follower
            .delete_project("iris", DeletionStrategy::Restrict, true)
            .await
            .unwrap();
        follower
            .delete_project("iris", DeletionStrategy::Restrict, true)
            .await
            .unwrap();
        follower
            .delete_project("iris", DeletionStrategy::Cascade, false)
            .await
            .unwrap();
        assert!(matches!(
            follower.get_project("iris").await,
            Err(RunplaneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_sync_keeps_serving_the_stale_cache() {
        let mut leader = MockLeader::new();
        leader
            .expect_list_projects()
            .times(1)
            .returning(|_| Ok(vec![Project::new("iris")]));
        leader
            .expect_list_projects()
            .returning(|_| Err(RunplaneError::Http("leader unreachable".to_string())));
        let follower =
            ProjectFollower::new(Arc::new(leader), ProjectsConfig::default()).unwrap();
        follower.sync_projects().await.unwrap();
        assert!(follower.get_project("iris").await.is_ok());

        assert!(follower.sync_projects().await.is_err());
        // the cache from the last good sync is still served
        assert!(follower.get_project("iris").await.is_ok());
        assert_eq!(follower.cached_project_count().await, 1);
    }

    #[tokio::test]
    async fn sync_replaces_the_cache_wholesale() {
        let leader = Arc::new(NopProjectLeader::new());
        let follower =
            ProjectFollower::new(leader.clone(), ProjectsConfig::default()).unwrap();
        follower
            .create_project(Project::new("stays"), false)
            .await
            .unwrap();
        follower
            .create_project(Project::new("goes"), false)
            .await
            .unwrap();
        follower.sync_projects().await.unwrap();
        assert_eq!(follower.cached_project_count().await, 2);
        // the project disappears on the leader behind the follower's back
        leader
            .delete_project("", "goes", DeletionStrategy::Restrict)
            .await
            .unwrap();
        follower.sync_projects().await.unwrap();
        assert_eq!(follower.cached_project_count().await, 1);
        assert!(follower.get_project("stays").await.is_ok());
    }

    async fn seeded_follower(mode: LabelMatchMode) -> ProjectFollower {
        let follower = nop_follower(mode);
        for project in [
            labeled_project("ml-a", &[("team", "ml"), ("tier", "gold")], ProjectState::Online),
            labeled_project("ml-b", &[("team", "ml")], ProjectState::Archived),
            labeled_project("web", &[("team", "web"), ("tier", "gold")], ProjectState::Online),
        ] {
            follower.create_project(project, true).await.unwrap();
        }
        follower
    }

    fn names(output: ProjectsOutput) -> Vec<String> {
        match output {
            ProjectsOutput::NameOnly(names) => names,
            ProjectsOutput::Full(projects) => {
                projects.iter().map(|p| p.name().to_string()).collect()
            }
        }
    }

    #[tokio::test]
    async fn owner_filter_is_not_supported() {
        let follower = seeded_follower(LabelMatchMode::AllTerms).await;
        assert!(matches!(
            follower
                .list_projects(Some("admin"), ProjectsFormat::Full, &[], None)
                .await,
            Err(RunplaneError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn first_term_mode_ignores_later_terms() {
        let follower = seeded_follower(LabelMatchMode::FirstTerm).await;
        let filter = ["team=ml".to_string(), "tier=gold".to_string()];
        let listed = follower
            .list_projects(None, ProjectsFormat::NameOnly, &filter, None)
            .await
            .unwrap();
        assert_eq!(names(listed), vec!["ml-a", "ml-b"]);
    }

    #[tokio::test]
    async fn all_terms_mode_requires_every_term() {
        let follower = seeded_follower(LabelMatchMode::AllTerms).await;
        let filter = ["team=ml".to_string(), "tier=gold".to_string()];
        let listed = follower
            .list_projects(None, ProjectsFormat::NameOnly, &filter, None)
            .await
            .unwrap();
        assert_eq!(names(listed), vec!["ml-a"]);
    }

    #[tokio::test]
    async fn presence_terms_match_on_the_key_alone() {
        let follower = seeded_follower(LabelMatchMode::AllTerms).await;
        let filter = ["tier".to_string()];
        let listed = follower
            .list_projects(None, ProjectsFormat::NameOnly, &filter, None)
            .await
            .unwrap();
        assert_eq!(names(listed), vec!["ml-a", "web"]);
    }

    #[tokio::test]
    async fn state_filter_applies_on_top_of_labels() {
        let follower = seeded_follower(LabelMatchMode::AllTerms).await;
        let filter = ["team=ml".to_string()];
        let listed = follower
            .list_projects(
                None,
                ProjectsFormat::NameOnly,
                &filter,
                Some(ProjectState::Online),
            )
            .await
            .unwrap();
        assert_eq!(names(listed), vec!["ml-a"]);
    }

    #[tokio::test]
    async fn full_and_name_only_formats_agree() {
        let follower = seeded_follower(LabelMatchMode::AllTerms).await;
        let full = follower
            .list_projects(None, ProjectsFormat::Full, &[], None)
            .await
            .unwrap();
        let name_only = follower
            .list_projects(None, ProjectsFormat::NameOnly, &[], None)
            .await
            .unwrap();
        assert_eq!(names(full), names(name_only));
    }
}
