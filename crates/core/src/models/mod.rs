pub mod cron_trigger;
pub mod project;
pub mod schedule;

pub use cron_trigger::{CronField, CronTrigger};
pub use project::{
    DeletionStrategy, Project, ProjectDesiredState, ProjectMetadata, ProjectSpec, ProjectState,
    ProjectStatus, ProjectsFormat, ProjectsOutput,
};
pub use schedule::{ScheduleKind, ScheduleOutput, ScheduleRecord, SchedulesOutput};
