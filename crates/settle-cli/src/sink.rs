use async_trait::async_trait;
use settle_queue::{DispatchedJob, JobSink};
use tracing::info;

/// Sink for the standalone daemon: records each settled job in the log.
///
/// Embedding applications plug their own [`JobSink`] (an idempotent upsert,
/// a webhook) into `settle_queue::Worker` instead.
pub struct LogSink;

#[async_trait]
impl JobSink for LogSink {
    async fn handle(&self, job: DispatchedJob) -> anyhow::Result<()> {
        info!(
            job_id = %job.id,
            retries = job.retries,
            payload = %job.payload,
            "job settled"
        );
        Ok(())
    }
}
