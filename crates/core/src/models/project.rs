use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project as held by the control plane.
///
/// The extra maps round-trip fields this core does not model, so a project
/// that passed through the leader's opaque blob comes back intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub metadata: ProjectMetadata,
    pub spec: ProjectSpec,
    pub status: ProjectStatus,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ProjectMetadata {
                name: name.into(),
                ..ProjectMetadata::default()
            },
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub desired_state: ProjectDesiredState,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ProjectState>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The state a project should be driven toward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectDesiredState {
    #[default]
    Online,
    Offline,
    Archived,
}

/// The state a project was last observed in. May diverge from the desired
/// state while a transition is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    Online,
    Offline,
    Archived,
    Error,
    Unknown,
}

/// Policy governing dependent resources when a project is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionStrategy {
    #[default]
    Restrict,
    Cascade,
}

impl DeletionStrategy {
    /// Wire value transmitted in the deletion-strategy request header.
    pub fn as_header_value(&self) -> &'static str {
        match self {
            DeletionStrategy::Restrict => "restricted",
            DeletionStrategy::Cascade => "cascading",
        }
    }
}

/// Requested representation for project listings.
///
/// Closed by construction: an unknown format string is rejected when this
/// enum is deserialized at the request boundary, so consumers never see
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectsFormat {
    Full,
    NameOnly,
}

/// Project listing result, shaped by the requested format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProjectsOutput {
    Full(Vec<Project>),
    NameOnly(Vec<String>),
}
