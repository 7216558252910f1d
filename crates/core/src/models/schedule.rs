use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cron_trigger::CronTrigger;
use crate::errors::{RunplaneError, RunplaneResult};

/// What a schedule executes when its trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Submit a run; the scheduled object is the run specification.
    Job,
    /// Invoke an in-process callable registered under the name the
    /// scheduled object carries. Internal maintenance tasks only.
    LocalFunction,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Job => "job",
            ScheduleKind::LocalFunction => "local_function",
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleKind {
    type Err = RunplaneError;

    fn from_str(s: &str) -> RunplaneResult<Self> {
        match s {
            "job" => Ok(ScheduleKind::Job),
            "local_function" => Ok(ScheduleKind::LocalFunction),
            other => Err(RunplaneError::NotImplemented(format!(
                "unknown schedule kind: {other}"
            ))),
        }
    }
}

/// A persisted schedule definition, keyed by `(project, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub project: String,
    pub name: String,
    pub kind: ScheduleKind,
    pub scheduled_object: serde_json::Value,
    pub cron_trigger: CronTrigger,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A schedule as served to callers: the persisted record overlaid with the
/// live job's computed next fire time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleOutput {
    #[serde(flatten)]
    pub schedule: ScheduleRecord,
    pub next_run_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulesOutput {
    pub schedules: Vec<ScheduleOutput>,
}
