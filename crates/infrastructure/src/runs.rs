use async_trait::async_trait;
use tracing::info;

use runplane_core::traits::RunSubmitter;
use runplane_core::RunplaneResult;

/// Placeholder run submitter wired by the binary. Actual run submission is
/// owned by an external collaborator; this one only records the hand-off.
#[derive(Default)]
pub struct LoggingRunSubmitter;

#[async_trait]
impl RunSubmitter for LoggingRunSubmitter {
    async fn submit_run(&self, run_spec: serde_json::Value) -> RunplaneResult<()> {
        info!(%run_spec, "submitting scheduled run");
        Ok(())
    }
}
