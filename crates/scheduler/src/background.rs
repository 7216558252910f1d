use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use runplane_core::models::CronTrigger;
use runplane_core::{RunplaneError, RunplaneResult};

/// The action an armed job executes when its trigger fires.
pub type JobAction = Arc<dyn Fn() -> BoxFuture<'static, RunplaneResult<()>> + Send + Sync>;

/// Idle sleep when no job is armed; wakeups cut it short.
const IDLE_SLEEP: StdDuration = StdDuration::from_secs(60);

struct ArmedJob {
    trigger: CronTrigger,
    next_fire: DateTime<Utc>,
    action: JobAction,
    /// Serializes re-entry per job id: a fire that outlives its interval
    /// queues the next one instead of overlapping it.
    gate: Arc<Mutex<()>>,
}

/// Timer-loop-driven job table: the owned replacement for an external
/// background-scheduling library. Jobs are keyed by composite id; the loop
/// sleeps until the earliest next-fire time and dispatches due jobs onto
/// the runtime.
pub struct JobScheduler {
    jobs: Arc<Mutex<HashMap<String, ArmedJob>>>,
    wakeup: Arc<Notify>,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            wakeup: Arc::new(Notify::new()),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    /// Start the timer loop. Jobs may be added before or after.
    pub async fn start(&self) {
        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() {
            debug!("job scheduler already started");
            return;
        }
        let jobs = Arc::clone(&self.jobs);
        let wakeup = Arc::clone(&self.wakeup);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        *handle = Some(tokio::spawn(async move {
            info!("job scheduler loop started");
            loop {
                let now = Utc::now();
                let mut due = Vec::new();
                let earliest;
                {
                    let mut jobs = jobs.lock().await;
                    let mut exhausted = Vec::new();
                    for (id, job) in jobs.iter_mut() {
                        if job.next_fire <= now {
                            due.push((id.clone(), job.action.clone(), job.gate.clone()));
                            match job.trigger.next_fire_time(Some(job.next_fire), now) {
                                Some(next) => job.next_fire = next,
                                None => exhausted.push(id.clone()),
                            }
                        }
                    }
                    for id in &exhausted {
                        jobs.remove(id);
                        info!(job_id = %id, "trigger exhausted, job disarmed");
                    }
                    earliest = jobs.values().map(|job| job.next_fire).min();
                }
                for (id, action, gate) in due {
                    tokio::spawn(async move {
                        let _entry = gate.lock().await;
                        debug!(job_id = %id, "dispatching job");
                        if let Err(err) = (action)().await {
                            warn!(job_id = %id, error = %err, "scheduled job failed");
                        }
                    });
                }
                let sleep_for = earliest
                    .map(|at| (at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO))
                    .unwrap_or(IDLE_SLEEP);
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = wakeup.notified() => {}
                    _ = shutdown_rx.recv() => {
                        info!("job scheduler loop stopped");
                        break;
                    }
                }
            }
        }));
    }

    /// Halt trigger delivery. Armed jobs stay in the table; persisted
    /// definitions are untouched.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Arm a job. An existing job under the same id is replaced, which
    /// makes repeated reloads of the same persisted record harmless.
    pub async fn add_job(
        &self,
        id: &str,
        trigger: CronTrigger,
        action: JobAction,
    ) -> RunplaneResult<()> {
        trigger.validate()?;
        let next_fire = trigger.next_fire_time(None, Utc::now()).ok_or_else(|| {
            RunplaneError::InvalidArgument(format!(
                "trigger for job {id} yields no upcoming fire time"
            ))
        })?;
        debug!(job_id = id, %next_fire, "arming job");
        self.jobs.lock().await.insert(
            id.to_string(),
            ArmedJob {
                trigger,
                next_fire,
                action,
                gate: Arc::new(Mutex::new(())),
            },
        );
        self.wakeup.notify_one();
        Ok(())
    }

    pub async fn remove_job(&self, id: &str) -> RunplaneResult<()> {
        if self.jobs.lock().await.remove(id).is_none() {
            return Err(RunplaneError::NotFound(format!("job {id} is not armed")));
        }
        debug!(job_id = id, "job disarmed");
        self.wakeup.notify_one();
        Ok(())
    }

    pub async fn get_next_fire_time(&self, id: &str) -> Option<DateTime<Utc>> {
        self.jobs.lock().await.get(id).map(|job| job.next_fire)
    }
}
