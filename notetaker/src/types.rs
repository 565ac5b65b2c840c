use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notes::NotesPayload;

/// Where a job's media came from.
///
/// Submission resolves both kinds to an object under the job's media key
/// before the pipeline runs, so processing treats them identically. The
/// original URL is kept for display and auditing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Upload,
    Youtube { url: String },
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Upload => "upload",
            SourceKind::Youtube { .. } => "youtube",
        }
    }
}

/// Processing stage of a job.
///
/// Stages advance monotonically along the declared order; `Failed` is
/// reachable from any non-terminal stage. A terminal stage is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Uploading,
    Uploaded,
    Downloading,
    ExtractingAudio,
    Transcribing,
    GeneratingNotes,
    Completed,
    Failed,
}

impl JobStage {
    /// Stage name as persisted and logged.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Uploading => "uploading",
            JobStage::Uploaded => "uploaded",
            JobStage::Downloading => "downloading",
            JobStage::ExtractingAudio => "extracting_audio",
            JobStage::Transcribing => "transcribing",
            JobStage::GeneratingNotes => "generating_notes",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        }
    }

    /// Parse a persisted stage name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(JobStage::Uploading),
            "uploaded" => Some(JobStage::Uploaded),
            "downloading" => Some(JobStage::Downloading),
            "extracting_audio" => Some(JobStage::ExtractingAudio),
            "transcribing" => Some(JobStage::Transcribing),
            "generating_notes" => Some(JobStage::GeneratingNotes),
            "completed" => Some(JobStage::Completed),
            "failed" => Some(JobStage::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }

    /// Whether moving to `next` keeps the stage ordering monotonic.
    ///
    /// Terminal stages accept no transition. `Failed` is legal from any
    /// non-terminal stage; everything else moves exactly one step forward,
    /// so each stage is entered at most once per run.
    pub fn can_advance_to(&self, next: JobStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == JobStage::Failed {
            return true;
        }
        next.order() == self.order() + 1
    }

    fn order(&self) -> u8 {
        match self {
            JobStage::Uploading => 0,
            JobStage::Uploaded => 1,
            JobStage::Downloading => 2,
            JobStage::ExtractingAudio => 3,
            JobStage::Transcribing => 4,
            JobStage::GeneratingNotes => 5,
            JobStage::Completed => 6,
            JobStage::Failed => 7,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One video's processing lifecycle.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub stage: JobStage,
    pub source: SourceKind,
    /// Object-store key of the raw media. Empty until submission fills it.
    pub media_key: String,
    /// Probed media duration, truncated to whole seconds.
    pub duration_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
    /// Soft-deletion marker. The pipeline never sets or clears it.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A transcript segment with timestamps in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// One carved audio chunk, ready for transcription.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    /// 0-based position within the source audio.
    pub index: usize,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// In-memory result of transcribing one audio artifact, whether a whole
/// file or recombined chunks.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub text: String,
    pub model: String,
    pub segments: Vec<TranscriptSegment>,
}

/// Durable transcription outcome, one per job.
///
/// A successful run fills the transcript fields; a failed run leaves them
/// empty and records the error instead.
#[derive(Debug, Clone)]
pub struct TranscriptionRecord {
    pub job_id: Uuid,
    pub text: Option<String>,
    pub segments: Option<Vec<TranscriptSegment>>,
    pub model: Option<String>,
    /// Transcription-stage duration on success, total run duration on failure.
    pub processing: Option<Duration>,
    pub audio_size: Option<u64>,
    pub notes: Option<NotesPayload>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TranscriptionRecord {
    /// Record for a fully processed job.
    pub fn success(
        job_id: Uuid,
        result: &TranscriptionResult,
        audio_size: u64,
        processing: Duration,
        notes: Option<NotesPayload>,
    ) -> Self {
        Self {
            job_id,
            text: Some(result.text.clone()),
            segments: Some(result.segments.clone()),
            model: Some(result.model.clone()),
            processing: Some(processing),
            audio_size: Some(audio_size),
            notes,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Error-only record for a failed run.
    pub fn failure(job_id: Uuid, error: String, processing: Duration) -> Self {
        Self {
            job_id,
            text: None,
            segments: None,
            model: None,
            processing: Some(processing),
            audio_size: None,
            notes: None,
            error: Some(error),
            created_at: Utc::now(),
        }
    }
}
