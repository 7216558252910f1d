use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use runplane_core::models::{CronTrigger, ScheduleKind, ScheduleRecord};
use runplane_core::traits::ScheduleRepository;
use runplane_core::{RunplaneError, RunplaneResult};

/// Embedded SQLite store for schedule definitions.
pub struct SqliteScheduleStore {
    pool: SqlitePool,
}

impl SqliteScheduleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an embedded store, initializing the database file and schema.
    pub async fn new_embedded(database_url: &str, max_connections: u32) -> RunplaneResult<Self> {
        debug!(database_url, "creating embedded sqlite schedule store");
        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> RunplaneResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedules (
                project TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                scheduled_object TEXT NOT NULL,
                cron_trigger TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (project, name)
            )
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> RunplaneResult<ScheduleRecord> {
        let kind: String = row.try_get("kind")?;
        let scheduled_object: String = row.try_get("scheduled_object")?;
        let cron_trigger: String = row.try_get("cron_trigger")?;
        Ok(ScheduleRecord {
            project: row.try_get("project")?,
            name: row.try_get("name")?,
            kind: kind.parse()?,
            scheduled_object: serde_json::from_str(&scheduled_object)?,
            cron_trigger: serde_json::from_str::<CronTrigger>(&cron_trigger)?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleStore {
    async fn create_schedule(&self, record: &ScheduleRecord) -> RunplaneResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO schedules
                (project, name, kind, scheduled_object, cron_trigger, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.project)
        .bind(&record.name)
        .bind(record.kind.as_str())
        .bind(record.scheduled_object.to_string())
        .bind(serde_json::to_string(&record.cron_trigger)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(RunplaneError::Conflict(format!(
                    "schedule {}/{} already exists",
                    record.project, record.name
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_schedule(&self, project: &str, name: &str) -> RunplaneResult<ScheduleRecord> {
        let row = sqlx::query("SELECT * FROM schedules WHERE project = ? AND name = ?")
            .bind(project)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Self::row_to_record(&row),
            None => Err(RunplaneError::NotFound(format!(
                "schedule {project}/{name} not found"
            ))),
        }
    }

    async fn list_schedules(
        &self,
        project: Option<&str>,
        kind: Option<ScheduleKind>,
    ) -> RunplaneResult<Vec<ScheduleRecord>> {
        let mut query =
            sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM schedules WHERE 1 = 1");
        if let Some(project) = project {
            query.push(" AND project = ").push_bind(project);
        }
        if let Some(kind) = kind {
            query.push(" AND kind = ").push_bind(kind.as_str());
        }
        query.push(" ORDER BY project, name");
        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn delete_schedule(&self, project: &str, name: &str) -> RunplaneResult<()> {
        let result = sqlx::query("DELETE FROM schedules WHERE project = ? AND name = ?")
            .bind(project)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RunplaneError::NotFound(format!(
                "schedule {project}/{name} not found"
            )));
        }
        Ok(())
    }
}
