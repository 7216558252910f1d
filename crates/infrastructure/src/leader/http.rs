use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use runplane_core::config::ProjectsConfig;
use runplane_core::models::{DeletionStrategy, Project};
use runplane_core::traits::ProjectLeader;
use runplane_core::{RunplaneError, RunplaneResult};

/// Header naming the cascade strategy on project deletion requests.
pub const DELETE_STRATEGY_HEADER: &str = "x-projects-delete-strategy";

/// Attribute under which the leader stores the opaque project blob.
const PROJECT_BLOB_ATTRIBUTE: &str = "runplane_project";

const TERMINAL_JOB_STATES: [&str; 3] = ["completed", "failed", "canceled"];

/// HTTP client against the external authoritative project service.
///
/// Transport-level failures are retried up to the configured budget with
/// linear back-off; application-level error responses are surfaced
/// immediately with the leader's error context attached.
pub struct HttpProjectLeader {
    client: reqwest::Client,
    api_url: String,
    request_timeout: Duration,
    transport_retries: u32,
    job_poll_interval: Duration,
    job_poll_attempts: u32,
}

impl HttpProjectLeader {
    pub fn new(config: &ProjectsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
            transport_retries: config.transport_retries.max(1),
            job_poll_interval: config.job_poll_interval,
            job_poll_attempts: config.job_poll_attempts,
        }
    }

    async fn send_request(
        &self,
        method: Method,
        path: &str,
        session: Option<&str>,
        mut headers: HeaderMap,
        body: Option<&Value>,
    ) -> RunplaneResult<reqwest::Response> {
        let url = format!("{}/api/{}", self.api_url, path);
        if let Some(session) = session {
            let cookie = format!("session={session}");
            // a caller pre-setting a conflicting session cookie is a bug
            if let Some(existing) = headers.get(COOKIE) {
                let existing = existing.to_str().unwrap_or_default();
                if existing.contains("session=") && existing != cookie {
                    return Err(RunplaneError::InvalidArgument(
                        "session cookie already set".to_string(),
                    ));
                }
            }
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&cookie).map_err(|err| {
                    RunplaneError::InvalidArgument(format!("bad session credential: {err}"))
                })?,
            );
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .client
                .request(method.clone(), &url)
                .timeout(self.request_timeout)
                .headers(headers.clone());
            if let Some(body) = body {
                request = request.json(body);
            }
            match request.send().await {
                Ok(response) => return self.check_response(method, path, response).await,
                Err(err) if attempt < self.transport_retries => {
                    warn!(
                        %method,
                        path,
                        attempt,
                        error = %err,
                        "transport failure against project leader, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
                Err(err) => return Err(RunplaneError::Http(err.to_string())),
            }
        }
    }

    async fn check_response(
        &self,
        method: Method,
        path: &str,
        response: reqwest::Response,
    ) -> RunplaneResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // pull whatever error context the leader attached to the body
        let body: Option<Value> = response.json().await.ok();
        let ctx = body
            .as_ref()
            .and_then(|b| b.pointer("/meta/ctx"))
            .map(value_to_compact_string);
        let errors: Vec<String> = body
            .as_ref()
            .and_then(|b| b.get("errors"))
            .and_then(Value::as_array)
            .map(|errs| errs.iter().map(value_to_compact_string).collect())
            .unwrap_or_default();
        warn!(
            %method,
            path,
            status = status.as_u16(),
            ?ctx,
            ?errors,
            "request to project leader failed"
        );
        match status {
            StatusCode::NOT_FOUND => Err(RunplaneError::NotFound(format!(
                "leader has no resource at {path}"
            ))),
            StatusCode::CONFLICT => Err(RunplaneError::Conflict(format!(
                "leader rejected {path}: resource already exists"
            ))),
            _ => Err(RunplaneError::LeaderApi {
                status: status.as_u16(),
                ctx,
                errors,
            }),
        }
    }

    async fn post_project(&self, session: &str, body: &Value) -> RunplaneResult<Project> {
        let response = self
            .send_request(
                Method::POST,
                "projects",
                Some(session),
                HeaderMap::new(),
                Some(body),
            )
            .await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| RunplaneError::Http(err.to_string()))?;
        leader_project_to_project(data_element(&payload)?)
    }

    async fn put_project(
        &self,
        session: &str,
        name: &str,
        body: &Value,
    ) -> RunplaneResult<Project> {
        let response = self
            .send_request(
                Method::PUT,
                &format!("projects/{name}"),
                Some(session),
                HeaderMap::new(),
                Some(body),
            )
            .await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| RunplaneError::Http(err.to_string()))?;
        leader_project_to_project(data_element(&payload)?)
    }

    async fn wait_for_job_completion(&self, session: &str, job_id: &str) -> RunplaneResult<()> {
        for attempt in 1..=self.job_poll_attempts {
            match self.fetch_job_state(session, job_id).await {
                Ok(state) if TERMINAL_JOB_STATES.contains(&state.as_str()) => {
                    debug!(job_id, state, "leader job reached terminal state");
                    return Ok(());
                }
                Ok(state) => {
                    debug!(job_id, state, attempt, "leader job still in progress");
                }
                Err(err) => {
                    debug!(job_id, attempt, error = %err, "failed polling leader job");
                }
            }
            tokio::time::sleep(self.job_poll_interval).await;
        }
        Err(RunplaneError::OperationTimeout(format!(
            "leader job {job_id} did not reach a terminal state within {} attempts",
            self.job_poll_attempts
        )))
    }

    async fn fetch_job_state(&self, session: &str, job_id: &str) -> RunplaneResult<String> {
        let response = self
            .send_request(
                Method::GET,
                &format!("jobs/{job_id}"),
                Some(session),
                HeaderMap::new(),
                None,
            )
            .await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| RunplaneError::Http(err.to_string()))?;
        payload
            .pointer("/data/attributes/state")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                RunplaneError::Internal(format!("leader job {job_id} response carries no state"))
            })
    }
}

#[async_trait]
impl ProjectLeader for HttpProjectLeader {
    async fn create_project(&self, session: &str, project: Project) -> RunplaneResult<Project> {
        debug!(name = project.name(), "creating project on leader");
        let body = generate_request_body(&project)?;
        self.post_project(session, &body).await
    }

    async fn store_project(
        &self,
        session: &str,
        name: &str,
        project: Project,
    ) -> RunplaneResult<Project> {
        debug!(name, "storing project on leader");
        let body = generate_request_body(&project)?;
        // the leader distinguishes create from update; probe first and hide
        // the distinction from the caller
        match self
            .send_request(
                Method::GET,
                &format!("projects/{name}"),
                Some(session),
                HeaderMap::new(),
                None,
            )
            .await
        {
            Ok(_) => self.put_project(session, name, &body).await,
            Err(RunplaneError::NotFound(_)) => self.post_project(session, &body).await,
            Err(err) => Err(err),
        }
    }

    async fn delete_project(
        &self,
        session: &str,
        name: &str,
        deletion_strategy: DeletionStrategy,
    ) -> RunplaneResult<()> {
        debug!(name, strategy = ?deletion_strategy, "deleting project on leader");
        let body = generate_request_body(&Project::new(name))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            DELETE_STRATEGY_HEADER,
            HeaderValue::from_static(deletion_strategy.as_header_value()),
        );
        let response = match self
            .send_request(Method::DELETE, "projects", Some(session), headers, Some(&body))
            .await
        {
            Ok(response) => response,
            Err(RunplaneError::NotFound(_)) => {
                debug!(name, "project not found on leader, considering deletion successful");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let payload: Value = response
            .json()
            .await
            .map_err(|err| RunplaneError::Http(err.to_string()))?;
        let job_id = payload
            .pointer("/data/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                payload
                    .pointer("/data/id")
                    .and_then(Value::as_u64)
                    .map(|id| id.to_string())
            })
            .ok_or_else(|| {
                RunplaneError::Internal("leader deletion response carries no job id".to_string())
            })?;
        self.wait_for_job_completion(session, &job_id).await
    }

    async fn list_projects(&self, session: &str) -> RunplaneResult<Vec<Project>> {
        let response = self
            .send_request(Method::GET, "projects", Some(session), HeaderMap::new(), None)
            .await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| RunplaneError::Http(err.to_string()))?;
        let items = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                RunplaneError::Internal("leader project listing carries no data".to_string())
            })?;
        items.iter().map(leader_project_to_project).collect()
    }

    async fn try_get_service_url(
        &self,
        session: &str,
        kind: &str,
    ) -> RunplaneResult<Option<String>> {
        debug!(kind, "looking up service url on leader");
        let response = self
            .send_request(
                Method::GET,
                "app_services_manifests",
                Some(session),
                HeaderMap::new(),
                None,
            )
            .await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| RunplaneError::Http(err.to_string()))?;
        let manifests = payload
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for manifest in &manifests {
            let services = manifest
                .pointer("/attributes/app_services")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for service in &services {
                let matches_kind =
                    service.pointer("/spec/kind").and_then(Value::as_str) == Some(kind);
                let ready =
                    service.pointer("/status/state").and_then(Value::as_str) == Some("ready");
                let urls = service
                    .pointer("/status/urls")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if matches_kind && ready && !urls.is_empty() {
                    let mut by_scheme = BTreeMap::new();
                    for url in &urls {
                        if let (Some(scheme), Some(url)) = (
                            url.get("kind").and_then(Value::as_str),
                            url.get("url").and_then(Value::as_str),
                        ) {
                            by_scheme.insert(scheme.to_string(), url.to_string());
                        }
                    }
                    // prefer the encrypted scheme
                    for scheme in ["https", "http"] {
                        if let Some(url) = by_scheme.get(scheme) {
                            return Ok(Some(url.clone()));
                        }
                    }
                }
            }
        }
        Ok(None)
    }
}

fn value_to_compact_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn data_element(payload: &Value) -> RunplaneResult<&Value> {
    payload
        .get("data")
        .ok_or_else(|| RunplaneError::Internal("leader response carries no data".to_string()))
}

/// Build the `{"data": {"type": "project", "attributes": {...}}}` envelope
/// the leader expects. First-class attributes travel next to the opaque
/// blob holding everything the leader does not model.
pub(crate) fn generate_request_body(project: &Project) -> RunplaneResult<Value> {
    let mut attributes = json!({
        "name": project.metadata.name,
        "description": project.spec.description,
        "admin_status": project.spec.desired_state,
    });
    attributes[PROJECT_BLOB_ATTRIBUTE] = json!(project_to_blob(project)?);
    if let Some(created) = project.metadata.created {
        attributes["created_at"] = json!(created.to_rfc3339());
    }
    if !project.metadata.labels.is_empty() {
        attributes["labels"] = labels_to_wire(&project.metadata.labels);
    }
    if !project.metadata.annotations.is_empty() {
        attributes["annotations"] = labels_to_wire(&project.metadata.annotations);
    }
    Ok(json!({"data": {"type": "project", "attributes": attributes}}))
}

/// Serialize the project into the opaque blob, stripping the fields the
/// leader keeps first-class so they are not duplicated.
fn project_to_blob(project: &Project) -> RunplaneResult<String> {
    let mut value = serde_json::to_value(project)?;
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("name");
        metadata.remove("created");
        metadata.remove("labels");
        metadata.remove("annotations");
    }
    if let Some(spec) = value.get_mut("spec").and_then(Value::as_object_mut) {
        spec.remove("description");
        spec.remove("desired_state");
    }
    if let Some(status) = value.get_mut("status").and_then(Value::as_object_mut) {
        status.remove("state");
    }
    Ok(value.to_string())
}

fn labels_to_wire(labels: &BTreeMap<String, String>) -> Value {
    Value::Array(
        labels
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect(),
    )
}

fn wire_to_labels(value: &Value) -> BTreeMap<String, String> {
    value
        .as_array()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|label| {
                    Some((
                        label.get("name")?.as_str()?.to_string(),
                        label.get("value")?.as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Translate one leader-side project into the internal schema: parse the
/// blob (name injected first, it is mandatory), then overlay the
/// first-class attributes on top - first-class wins.
pub(crate) fn leader_project_to_project(item: &Value) -> RunplaneResult<Project> {
    let attributes = item
        .get("attributes")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            RunplaneError::Internal("leader project carries no attributes".to_string())
        })?;
    let name = attributes
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RunplaneError::Internal("leader project carries no name".to_string()))?;

    let blob = attributes
        .get(PROJECT_BLOB_ATTRIBUTE)
        .and_then(Value::as_str)
        .unwrap_or("{}");
    let mut value: Value = serde_json::from_str(blob)?;
    if !value.is_object() {
        value = json!({});
    }
    let metadata = value
        .as_object_mut()
        .and_then(|obj| {
            obj.entry("metadata")
                .or_insert_with(|| json!({}))
                .as_object_mut()
        })
        .ok_or_else(|| RunplaneError::Internal("malformed project blob".to_string()))?;
    metadata.insert("name".to_string(), json!(name));
    let mut project: Project = serde_json::from_value(value)?;

    if let Some(created) = attributes.get("created_at").and_then(Value::as_str) {
        let created = DateTime::parse_from_rfc3339(created).map_err(|err| {
            RunplaneError::Internal(format!("leader sent unparseable created_at: {err}"))
        })?;
        project.metadata.created = Some(created.with_timezone(&Utc));
    }
    if let Some(admin_status) = attributes.get("admin_status") {
        project.spec.desired_state = serde_json::from_value(admin_status.clone())?;
    }
    if let Some(operational_status) = attributes.get("operational_status") {
        project.status.state = Some(serde_json::from_value(operational_status.clone())?);
    }
    if let Some(description) = attributes.get("description").and_then(Value::as_str) {
        if !description.is_empty() {
            project.spec.description = Some(description.to_string());
        }
    }
    if let Some(labels) = attributes.get("labels") {
        project.metadata.labels = wire_to_labels(labels);
    }
    if let Some(annotations) = attributes.get("annotations") {
        project.metadata.annotations = wire_to_labels(annotations);
    }
    Ok(project)
}
