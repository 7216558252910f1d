use async_trait::async_trait;

use crate::errors::RunplaneResult;

/// External collaborator that turns a persisted run specification into an
/// actual run when a `job`-kind schedule fires.
#[async_trait]
pub trait RunSubmitter: Send + Sync {
    async fn submit_run(&self, run_spec: serde_json::Value) -> RunplaneResult<()>;
}
