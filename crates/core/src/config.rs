use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{RunplaneError, RunplaneResult};

/// Top-level application configuration.
///
/// Loaded from an optional TOML file plus `RUNPLANE_`-prefixed environment
/// variables (`RUNPLANE_PROJECTS__LEADER=http` style). Every field has a
/// default so an empty configuration is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub projects: ProjectsConfig,
    pub scheduler: SchedulerConfig,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            projects: ProjectsConfig::default(),
            scheduler: SchedulerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional file path and the environment.
    pub fn load(path: Option<&Path>) -> RunplaneResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("RUNPLANE")
                .separator("__")
                .try_parsing(true),
        );
        let settings = builder
            .build()
            .map_err(|err| RunplaneError::InvalidArgument(format!("bad configuration: {err}")))?;
        settings
            .try_deserialize()
            .map_err(|err| RunplaneError::InvalidArgument(format!("bad configuration: {err}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://runplane.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Which project leader implementation to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderKind {
    /// The external authoritative project-management service.
    Http,
    /// In-process leader, for tests and leaderless deployments.
    Nop,
}

/// Multi-term label filter semantics for project listing.
///
/// The upstream follower evaluated only the first filter term and returned
/// its result, which contradicts the AND semantics its own scenarios assume.
/// Both behaviors are kept selectable until there is a product decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMatchMode {
    /// Only the first filter term decides the match.
    FirstTerm,
    /// Every filter term must match.
    AllTerms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    pub leader: LeaderKind,
    /// Base URL of the leader API, e.g. `http://leader.example.com:8001`.
    pub api_url: String,
    /// Access key used to build the leader session cookie. Mandatory when
    /// `leader` is `http`.
    pub access_key: Option<String>,
    /// Full-cache sync interval; zero disables the periodic sync.
    #[serde(with = "humantime_serde")]
    pub periodic_sync_interval: Duration,
    pub label_match_mode: LabelMatchMode,
    /// Per-request timeout against the leader API.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Transport-level retry budget per leader request.
    pub transport_retries: u32,
    /// Interval between polls of an asynchronous leader deletion job.
    #[serde(with = "humantime_serde")]
    pub job_poll_interval: Duration,
    /// Poll attempts before a leader deletion job is declared timed out.
    pub job_poll_attempts: u32,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            leader: LeaderKind::Nop,
            api_url: String::new(),
            access_key: None,
            periodic_sync_interval: Duration::from_secs(60),
            label_match_mode: LabelMatchMode::FirstTerm,
            request_timeout: Duration::from_secs(20),
            transport_retries: 3,
            job_poll_interval: Duration::from_secs(5),
            job_poll_attempts: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Literal sequence joining project and schedule name into a job id.
    /// Must never appear inside a legal project or schedule name.
    pub job_id_separator: String,
    /// Interval for the periodic best-effort schedule reload; zero keeps
    /// only the reload performed at startup.
    #[serde(with = "humantime_serde")]
    pub periodic_reload_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            job_id_separator: "-_-".to_string(),
            periodic_reload_interval: Duration::ZERO,
        }
    }
}
