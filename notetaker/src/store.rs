use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Job, JobStage, TranscriptionRecord};

/// Durable job state, as the pipeline needs it.
///
/// Every method is one short, self-contained operation; the orchestrator
/// never holds a store handle across an external call.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load a job by id. `NotFound` if no such job exists.
    async fn load_job(&self, id: Uuid) -> Result<Job>;

    /// Persist a stage transition. Visible to readers as soon as this
    /// returns. Rejects transitions the stage ordering forbids.
    async fn save_stage(&self, id: Uuid, stage: JobStage) -> Result<()>;

    /// Persist the probed media duration, truncated to whole seconds.
    async fn save_duration(&self, id: Uuid, seconds: i64) -> Result<()>;

    /// Persist the job's transcription outcome. At most one record exists
    /// per job; a second save for the same job replaces the first, so a
    /// redelivered run updates rather than duplicates.
    async fn save_transcription(&self, record: &TranscriptionRecord) -> Result<()>;

    /// Whether a durable transcription record already exists for the job.
    async fn has_transcription(&self, id: Uuid) -> Result<bool>;
}
