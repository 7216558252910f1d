use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;

use runplane_core::AppConfig;
use runplane_infrastructure::{build_leader, LoggingRunSubmitter, SqliteScheduleStore};
use runplane_projects::ProjectFollower;
use runplane_scheduler::{PeriodicTaskRunner, ScheduleService};

/// Wires the control plane together: the schedule store, the project
/// leader client, the follower cache and the scheduler loops.
pub struct Application {
    follower: Arc<ProjectFollower>,
    schedules: Arc<ScheduleService>,
    periodic: Arc<PeriodicTaskRunner>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store = SqliteScheduleStore::new_embedded(
            &config.database.url,
            config.database.max_connections,
        )
        .await
        .context("failed to open the schedule store")?;

        let leader = build_leader(&config.projects);
        let follower = Arc::new(
            ProjectFollower::new(leader, config.projects.clone())
                .context("failed to build the project follower")?,
        );

        let schedules = Arc::new(ScheduleService::new(
            Arc::new(store),
            Arc::new(LoggingRunSubmitter::default()),
            config.scheduler.clone(),
        ));

        Ok(Self {
            follower,
            schedules,
            periodic: Arc::new(PeriodicTaskRunner::new()),
        })
    }

    /// Start every component and park until a shutdown signal arrives.
    pub async fn run(&self) -> Result<()> {
        self.follower
            .initialize(&self.periodic)
            .await
            .context("initial project sync failed")?;
        self.schedules.start(&self.periodic).await;
        info!("runplane started");

        signal::ctrl_c()
            .await
            .context("failed to listen for the shutdown signal")?;
        info!("shutdown signal received");

        self.follower.shutdown(&self.periodic).await;
        self.schedules.shutdown().await;
        self.periodic.cancel_all().await;
        info!("runplane stopped");
        Ok(())
    }
}
