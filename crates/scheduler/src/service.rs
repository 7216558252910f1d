use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use runplane_core::config::SchedulerConfig;
use runplane_core::models::{
    CronTrigger, ScheduleKind, ScheduleOutput, ScheduleRecord, SchedulesOutput,
};
use runplane_core::traits::{RunSubmitter, ScheduleRepository};
use runplane_core::{RunplaneError, RunplaneResult};

use crate::background::{JobAction, JobScheduler};
use crate::periodic::PeriodicTaskRunner;

/// Periodic task name for the persisted-schedule reload loop.
const RELOAD_TASK: &str = "reload_schedules";

/// Schedule lifecycle: persist definitions, arm them as live jobs, and
/// rebuild the job table from the store after a restart.
///
/// The write order is deliberate: a schedule is persisted before it is
/// armed, so a crash between the two leaves a record that the next reload
/// arms, never a live job without a record.
pub struct ScheduleService {
    store: Arc<dyn ScheduleRepository>,
    submitter: Arc<dyn RunSubmitter>,
    jobs: Arc<JobScheduler>,
    local_functions: RwLock<HashMap<String, JobAction>>,
    config: SchedulerConfig,
}

impl ScheduleService {
    pub fn new(
        store: Arc<dyn ScheduleRepository>,
        submitter: Arc<dyn RunSubmitter>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            submitter,
            jobs: Arc::new(JobScheduler::new()),
            local_functions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register an in-process callable for `local_function` schedules.
    /// Must happen before any schedule referencing the name is created or
    /// reloaded.
    pub async fn register_local_function(&self, name: &str, action: JobAction) {
        self.local_functions
            .write()
            .await
            .insert(name.to_string(), action);
    }

    /// Start the timer loop, arm everything the store holds, and (when
    /// configured) keep re-syncing the job table from the store. A failed
    /// reload leaves the scheduler running with zero armed jobs rather
    /// than refusing to boot.
    pub async fn start(self: &Arc<Self>, periodic: &PeriodicTaskRunner) {
        self.jobs.start().await;
        if let Err(err) = self.reload_schedules().await {
            warn!(error = %err, "schedule reload failed, starting with no armed jobs");
        }
        if !self.config.periodic_reload_interval.is_zero() {
            let service = Arc::clone(self);
            periodic
                .run_function_periodically(
                    RELOAD_TASK,
                    self.config.periodic_reload_interval,
                    false,
                    move || {
                        let service = Arc::clone(&service);
                        async move {
                            service.reload_schedules().await?;
                            Ok(())
                        }
                    },
                )
                .await;
        }
    }

    pub async fn shutdown(&self) {
        self.jobs.shutdown().await;
    }

    /// Create and arm a schedule. The action is resolved before anything
    /// is written, so an unknown local function never leaves a record
    /// behind.
    pub async fn create_schedule(
        &self,
        project: &str,
        name: &str,
        kind: ScheduleKind,
        scheduled_object: serde_json::Value,
        cron_trigger: CronTrigger,
    ) -> RunplaneResult<()> {
        cron_trigger.validate()?;
        let action = self.resolve_action(kind, &scheduled_object).await?;
        let now = Utc::now();
        let record = ScheduleRecord {
            project: project.to_string(),
            name: name.to_string(),
            kind,
            scheduled_object,
            cron_trigger,
            created_at: now,
            updated_at: now,
        };
        self.store.create_schedule(&record).await?;
        info!(project, name, %kind, "schedule created");
        self.jobs
            .add_job(&self.job_id(project, name), record.cron_trigger, action)
            .await
    }

    /// Read a persisted schedule overlaid with its live next fire time.
    /// A record whose live job is missing is reported as broken instead of
    /// served with a stale or absent next-run time.
    pub async fn get_schedule(&self, project: &str, name: &str) -> RunplaneResult<ScheduleOutput> {
        let record = self.store.get_schedule(project, name).await?;
        self.enrich(record).await
    }

    pub async fn list_schedules(
        &self,
        project: Option<&str>,
        kind: Option<ScheduleKind>,
    ) -> RunplaneResult<SchedulesOutput> {
        let records = self.store.list_schedules(project, kind).await?;
        let mut schedules = Vec::with_capacity(records.len());
        for record in records {
            schedules.push(self.enrich(record).await?);
        }
        Ok(SchedulesOutput { schedules })
    }

    async fn enrich(&self, record: ScheduleRecord) -> RunplaneResult<ScheduleOutput> {
        let job_id = self.job_id(&record.project, &record.name);
        let next_fire = self.jobs.get_next_fire_time(&job_id).await.ok_or_else(|| {
            RunplaneError::NotFound(format!("schedule {job_id} has no armed job"))
        })?;
        Ok(ScheduleOutput {
            schedule: record,
            next_run_time: Some(next_fire),
        })
    }

    /// Disarm and delete. A live job whose trigger already exhausted was
    /// disarmed by the timer loop, so a missing job is tolerated; a missing
    /// record is the caller's error and surfaces as `NotFound`.
    pub async fn delete_schedule(&self, project: &str, name: &str) -> RunplaneResult<()> {
        match self.jobs.remove_job(&self.job_id(project, name)).await {
            Ok(()) | Err(RunplaneError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        self.store.delete_schedule(project, name).await?;
        info!(project, name, "schedule deleted");
        Ok(())
    }

    /// Rebuild the live job table from the store. Per-record failures are
    /// logged and skipped so one bad record cannot block recovery of the
    /// rest.
    pub async fn reload_schedules(&self) -> RunplaneResult<()> {
        let records = self.store.list_schedules(None, None).await?;
        debug!(count = records.len(), "reloading persisted schedules");
        for record in records {
            let job_id = self.job_id(&record.project, &record.name);
            let action = match self.resolve_action(record.kind, &record.scheduled_object).await {
                Ok(action) => action,
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "cannot resolve schedule action, skipping");
                    continue;
                }
            };
            if let Err(err) = self.jobs.add_job(&job_id, record.cron_trigger, action).await {
                warn!(job_id = %job_id, error = %err, "failed to arm persisted schedule");
            }
        }
        Ok(())
    }

    fn job_id(&self, project: &str, name: &str) -> String {
        format!("{project}{}{name}", self.config.job_id_separator)
    }

    async fn resolve_action(
        &self,
        kind: ScheduleKind,
        scheduled_object: &serde_json::Value,
    ) -> RunplaneResult<JobAction> {
        match kind {
            ScheduleKind::Job => {
                let submitter = Arc::clone(&self.submitter);
                let run_spec = scheduled_object.clone();
                Ok(Arc::new(move || {
                    let submitter = Arc::clone(&submitter);
                    let run_spec = run_spec.clone();
                    async move { submitter.submit_run(run_spec).await }.boxed()
                }))
            }
            ScheduleKind::LocalFunction => {
                let function_name = scheduled_object.as_str().ok_or_else(|| {
                    RunplaneError::InvalidArgument(
                        "local_function schedule requires a function name".into(),
                    )
                })?;
                self.local_functions
                    .read()
                    .await
                    .get(function_name)
                    .cloned()
                    .ok_or_else(|| {
                        RunplaneError::NotImplemented(format!(
                            "no local function registered under {function_name}"
                        ))
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use runplane_infrastructure::SqliteScheduleStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    mock! {
        Submitter {}

        #[async_trait::async_trait]
        impl RunSubmitter for Submitter {
            async fn submit_run(&self, run_spec: serde_json::Value) -> RunplaneResult<()>;
        }
    }

    async fn memory_store() -> Arc<SqliteScheduleStore> {
        Arc::new(SqliteScheduleStore::new_embedded("sqlite::memory:", 1).await.unwrap())
    }

    fn service_with(
        store: Arc<dyn ScheduleRepository>,
        submitter: Arc<dyn RunSubmitter>,
    ) -> Arc<ScheduleService> {
        Arc::new(ScheduleService::new(
            store,
            submitter,
            SchedulerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn job_schedule_fires_the_submitter() {
        let mut submitter = MockSubmitter::new();
        submitter
            .expect_submit_run()
            .withf(|spec| spec["task"] == "train")
            .times(1..)
            .returning(|_| Ok(()));
        let service = service_with(memory_store().await, Arc::new(submitter));
        let periodic = PeriodicTaskRunner::new();
        service.start(&periodic).await;
        service
            .create_schedule(
                "iris",
                "train-hourly",
                ScheduleKind::Job,
                json!({"task": "train"}),
                CronTrigger::default(),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        service.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let mut submitter = MockSubmitter::new();
        submitter.expect_submit_run().returning(|_| Ok(()));
        let service = service_with(memory_store().await, Arc::new(submitter));
        let trigger = CronTrigger::every_minute();
        service
            .create_schedule("iris", "sync", ScheduleKind::Job, json!({}), trigger.clone())
            .await
            .unwrap();
        assert!(matches!(
            service
                .create_schedule("iris", "sync", ScheduleKind::Job, json!({}), trigger)
                .await,
            Err(RunplaneError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn get_overlays_next_run_time() {
        let submitter = MockSubmitter::new();
        let service = service_with(memory_store().await, Arc::new(submitter));
        let periodic = PeriodicTaskRunner::new();
        service.start(&periodic).await;
        service
            .create_schedule(
                "iris",
                "sync",
                ScheduleKind::Job,
                json!({"task": "sync"}),
                CronTrigger::every_minute(),
            )
            .await
            .unwrap();
        let output = service.get_schedule("iris", "sync").await.unwrap();
        assert_eq!(output.schedule.name, "sync");
        assert!(output.next_run_time.is_some());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn persisted_record_without_a_live_job_is_reported_broken() {
        let store = memory_store().await;
        let now = chrono::Utc::now();
        store
            .create_schedule(&ScheduleRecord {
                project: "iris".to_string(),
                name: "orphan".to_string(),
                kind: ScheduleKind::Job,
                scheduled_object: json!({}),
                cron_trigger: CronTrigger::every_minute(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        // never started, so the reload that would arm the record never ran
        let service = service_with(store, Arc::new(MockSubmitter::new()));
        assert!(matches!(
            service.get_schedule("iris", "orphan").await,
            Err(RunplaneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn get_unknown_schedule_is_not_found() {
        let service = service_with(memory_store().await, Arc::new(MockSubmitter::new()));
        assert!(matches!(
            service.get_schedule("iris", "ghost").await,
            Err(RunplaneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_disarms_and_removes_the_record() {
        let submitter = MockSubmitter::new();
        let service = service_with(memory_store().await, Arc::new(submitter));
        let periodic = PeriodicTaskRunner::new();
        service.start(&periodic).await;
        service
            .create_schedule(
                "iris",
                "sync",
                ScheduleKind::Job,
                json!({}),
                CronTrigger::every_minute(),
            )
            .await
            .unwrap();
        service.delete_schedule("iris", "sync").await.unwrap();
        assert!(matches!(
            service.get_schedule("iris", "sync").await,
            Err(RunplaneError::NotFound(_))
        ));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn delete_of_never_created_schedule_is_not_found() {
        let service = service_with(memory_store().await, Arc::new(MockSubmitter::new()));
        assert!(matches!(
            service.delete_schedule("iris", "ghost").await,
            Err(RunplaneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unregistered_local_function_is_rejected_before_persisting() {
        let service = service_with(memory_store().await, Arc::new(MockSubmitter::new()));
        assert!(matches!(
            service
                .create_schedule(
                    "iris",
                    "cleanup",
                    ScheduleKind::LocalFunction,
                    json!("expire_artifacts"),
                    CronTrigger::every_minute(),
                )
                .await,
            Err(RunplaneError::NotImplemented(_))
        ));
        // Nothing was written.
        assert!(service
            .list_schedules(Some("iris"), None)
            .await
            .unwrap()
            .schedules
            .is_empty());
    }

    #[tokio::test]
    async fn registered_local_function_fires() {
        let service = service_with(memory_store().await, Arc::new(MockSubmitter::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        service
            .register_local_function(
                "expire_artifacts",
                Arc::new(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    .boxed()
                }),
            )
            .await;
        let periodic = PeriodicTaskRunner::new();
        service.start(&periodic).await;
        service
            .create_schedule(
                "iris",
                "cleanup",
                ScheduleKind::LocalFunction,
                json!("expire_artifacts"),
                CronTrigger::default(),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        service.shutdown().await;
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn reload_skips_unresolvable_records_and_arms_the_rest() {
        let store = memory_store().await;
        let now = chrono::Utc::now();
        for (name, kind, payload) in [
            ("good", ScheduleKind::Job, json!({"task": "train"})),
            ("broken", ScheduleKind::LocalFunction, json!("unregistered")),
        ] {
            store
                .create_schedule(&ScheduleRecord {
                    project: "iris".to_string(),
                    name: name.to_string(),
                    kind,
                    scheduled_object: payload,
                    cron_trigger: CronTrigger::every_minute(),
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
        }
        let service = service_with(store, Arc::new(MockSubmitter::new()));
        let periodic = PeriodicTaskRunner::new();
        service.start(&periodic).await;
        // the record with no registered callable is skipped, the rest arm
        let good = service.get_schedule("iris", "good").await.unwrap();
        assert!(good.next_run_time.is_some());
        assert!(matches!(
            service.get_schedule("iris", "broken").await,
            Err(RunplaneError::NotFound(_))
        ));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn restart_rearms_persisted_schedules() {
        let store = memory_store().await;
        let first = service_with(store.clone(), Arc::new(MockSubmitter::new()));
        first
            .create_schedule(
                "iris",
                "train-hourly",
                ScheduleKind::Job,
                json!({"task": "train"}),
                CronTrigger::every_minute(),
            )
            .await
            .unwrap();
        first.shutdown().await;

        // A fresh process over the same store recovers the job table.
        let mut submitter = MockSubmitter::new();
        submitter.expect_submit_run().returning(|_| Ok(()));
        let second = service_with(store, Arc::new(submitter));
        let periodic = PeriodicTaskRunner::new();
        second.start(&periodic).await;
        let output = second.get_schedule("iris", "train-hourly").await.unwrap();
        assert!(output.next_run_time.is_some());
        second.shutdown().await;
    }
}
