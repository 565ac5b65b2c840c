//! SQLite-backed job store.
//!
//! A single rusqlite connection behind a `Mutex`; every store operation
//! is one short lock-take, so no persistence handle is ever held across
//! an external call. WAL mode keeps concurrent readers cheap.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::JobStore;
use crate::types::{Job, JobStage, SourceKind, TranscriptionRecord};

pub mod migrations;

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Persistence(e.to_string())
}

/// Thread-safe SQLite store. Cloning is cheap (inner `Arc`).
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(db_err)?;

        migrations::run_all(&conn)?;

        info!(path = %path.display(), "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Persistence("database lock poisoned".into()))?;
        f(&conn)
    }

    /// Insert a new job row. Used by the submission path and by tests;
    /// the pipeline itself only mutates existing jobs.
    pub fn insert_job(&self, job: &Job) -> Result<()> {
        let youtube_url = match &job.source {
            SourceKind::Youtube { url } => Some(url.clone()),
            SourceKind::Upload => None,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (id, stage, source_type, youtube_url, media_key,
                                   duration_seconds, created_at, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    job.id.to_string(),
                    job.stage.as_str(),
                    job.source.as_str(),
                    youtube_url,
                    job.media_key,
                    job.duration_secs,
                    job.created_at.to_rfc3339(),
                    job.deleted_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// Read back a job's transcription record, if any.
    pub fn load_transcription(&self, job_id: Uuid) -> Result<Option<TranscriptionRecord>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT transcript_text, model_used, processing_ms, audio_size,
                        transcript_segments, notes, error_message, created_at
                 FROM transcriptions WHERE job_id = ?1",
                [job_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)
        })?;

        let Some((text, model, processing_ms, audio_size, segments, notes, error, created_at)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(TranscriptionRecord {
            job_id,
            text,
            segments: segments.as_deref().map(serde_json::from_str).transpose()?,
            model,
            processing: processing_ms.map(|ms| Duration::from_millis(ms as u64)),
            audio_size: audio_size.map(|b| b as u64),
            notes: notes.as_deref().map(serde_json::from_str).transpose()?,
            error,
            created_at: parse_timestamp(&created_at)?,
        }))
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Persistence(format!("bad timestamp {s:?}: {e}")))
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn load_job(&self, id: Uuid) -> Result<Job> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT stage, source_type, youtube_url, media_key,
                        duration_seconds, created_at, deleted_at
                 FROM jobs WHERE id = ?1",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)
        })?;

        let Some((stage, source_type, youtube_url, media_key, duration, created_at, deleted_at)) =
            row
        else {
            return Err(Error::NotFound(format!("job {id} not found")));
        };

        let stage = JobStage::parse(&stage)
            .ok_or_else(|| Error::Persistence(format!("unknown job stage {stage:?}")))?;
        let source = match source_type.as_str() {
            "youtube" => SourceKind::Youtube {
                url: youtube_url.unwrap_or_default(),
            },
            _ => SourceKind::Upload,
        };

        Ok(Job {
            id,
            stage,
            source,
            media_key,
            duration_secs: duration,
            created_at: parse_timestamp(&created_at)?,
            deleted_at: deleted_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }

    async fn save_stage(&self, id: Uuid, stage: JobStage) -> Result<()> {
        let current = self.load_job(id).await?.stage;
        if !current.can_advance_to(stage) {
            return Err(Error::Persistence(format!(
                "illegal stage transition {current} -> {stage} for job {id}"
            )));
        }

        self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET stage = ?1 WHERE id = ?2",
                rusqlite::params![stage.as_str(), id.to_string()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    async fn save_duration(&self, id: Uuid, seconds: i64) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE jobs SET duration_seconds = ?1 WHERE id = ?2",
                    rusqlite::params![seconds, id.to_string()],
                )
                .map_err(db_err)?;
            if updated == 0 {
                return Err(Error::NotFound(format!("job {id} not found")));
            }
            Ok(())
        })
    }

    async fn save_transcription(&self, record: &TranscriptionRecord) -> Result<()> {
        let segments_json = record
            .segments
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let notes_json = record.notes.as_ref().map(serde_json::to_string).transpose()?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO transcriptions
                     (id, job_id, transcript_text, model_used, processing_ms,
                      audio_size, transcript_segments, notes, error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(job_id) DO UPDATE SET
                     transcript_text = excluded.transcript_text,
                     model_used = excluded.model_used,
                     processing_ms = excluded.processing_ms,
                     audio_size = excluded.audio_size,
                     transcript_segments = excluded.transcript_segments,
                     notes = excluded.notes,
                     error_message = excluded.error_message,
                     created_at = excluded.created_at",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    record.job_id.to_string(),
                    record.text,
                    record.model,
                    record.processing.map(|d| d.as_millis() as i64),
                    record.audio_size.map(|b| b as i64),
                    segments_json,
                    notes_json,
                    record.error,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    async fn has_transcription(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM transcriptions WHERE job_id = ?1)",
                [id.to_string()],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::{NotesContent, NotesPayload};
    use crate::types::{TranscriptSegment, TranscriptionResult};

    fn new_job(store: &SqliteStore, stage: JobStage) -> Job {
        let job = Job {
            id: Uuid::new_v4(),
            stage,
            source: SourceKind::Upload,
            media_key: "videos/owner/clip.mp4".to_string(),
            duration_secs: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        store.insert_job(&job).unwrap();
        job
    }

    fn sample_notes() -> NotesPayload {
        NotesPayload {
            schema: "notes.v1".to_string(),
            content: NotesContent {
                summary: "A talk.".to_string(),
                key_points: vec![],
                detailed_notes: "Details.".to_string(),
                takeaways: vec![],
                tags: vec!["talk".to_string()],
                quotes: None,
                questions: None,
                participants: None,
                sentiment_timeline: None,
                themes: None,
                actionable_insights: None,
                chapters: None,
            },
            model_used: "test-model".to_string(),
            processing_time_ms: 42,
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn test_job_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = new_job(&store, JobStage::Uploaded);

        let loaded = store.load_job(job.id).await.unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.stage, JobStage::Uploaded);
        assert_eq!(loaded.media_key, job.media_key);
        assert_eq!(loaded.source, SourceKind::Upload);
        assert!(loaded.duration_secs.is_none());
        assert!(loaded.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_youtube_source_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = Job {
            id: Uuid::new_v4(),
            stage: JobStage::Uploaded,
            source: SourceKind::Youtube {
                url: "https://youtube.com/watch?v=abc".to_string(),
            },
            media_key: "videos/abc.mp4".to_string(),
            duration_secs: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        store.insert_job(&job).unwrap();

        let loaded = store.load_job(job.id).await.unwrap();
        assert_eq!(loaded.source, job.source);
    }

    #[tokio::test]
    async fn test_load_missing_job_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.load_job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stage_persists_and_is_immediately_visible() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = new_job(&store, JobStage::Uploaded);

        store.save_stage(job.id, JobStage::Downloading).await.unwrap();
        assert_eq!(
            store.load_job(job.id).await.unwrap().stage,
            JobStage::Downloading
        );

        store
            .save_stage(job.id, JobStage::ExtractingAudio)
            .await
            .unwrap();
        assert_eq!(
            store.load_job(job.id).await.unwrap().stage,
            JobStage::ExtractingAudio
        );
    }

    #[tokio::test]
    async fn test_rollback_transition_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = new_job(&store, JobStage::Transcribing);

        let err = store
            .save_stage(job.id, JobStage::Downloading)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        // Stage unchanged.
        assert_eq!(
            store.load_job(job.id).await.unwrap().stage,
            JobStage::Transcribing
        );
    }

    #[tokio::test]
    async fn test_failed_reachable_from_in_flight_stage() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = new_job(&store, JobStage::Transcribing);

        store.save_stage(job.id, JobStage::Failed).await.unwrap();
        assert_eq!(store.load_job(job.id).await.unwrap().stage, JobStage::Failed);
    }

    #[tokio::test]
    async fn test_save_duration() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = new_job(&store, JobStage::Downloading);

        store.save_duration(job.id, 93).await.unwrap();
        assert_eq!(store.load_job(job.id).await.unwrap().duration_secs, Some(93));
    }

    #[tokio::test]
    async fn test_transcription_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = new_job(&store, JobStage::Completed);

        assert!(!store.has_transcription(job.id).await.unwrap());

        let result = TranscriptionResult {
            text: "hello world".to_string(),
            model: "whisper-1".to_string(),
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 2.5,
                text: "hello world".to_string(),
            }],
        };
        let record = TranscriptionRecord::success(
            job.id,
            &result,
            123_456,
            Duration::from_secs(7),
            Some(sample_notes()),
        );
        store.save_transcription(&record).await.unwrap();

        assert!(store.has_transcription(job.id).await.unwrap());

        let loaded = store.load_transcription(job.id).unwrap().unwrap();
        assert_eq!(loaded.text.as_deref(), Some("hello world"));
        assert_eq!(loaded.model.as_deref(), Some("whisper-1"));
        assert_eq!(loaded.audio_size, Some(123_456));
        assert_eq!(loaded.processing, Some(Duration::from_secs(7)));
        assert_eq!(loaded.segments.as_ref().unwrap().len(), 1);
        assert_eq!(loaded.notes.as_ref().unwrap().schema, "notes.v1");
        assert!(loaded.error.is_none());
    }

    #[tokio::test]
    async fn test_second_save_replaces_the_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = new_job(&store, JobStage::Transcribing);

        let failure =
            TranscriptionRecord::failure(job.id, "boom".to_string(), Duration::from_secs(1));
        store.save_transcription(&failure).await.unwrap();

        // A redelivered run that succeeds replaces the failure record.
        let result = TranscriptionResult {
            text: "recovered".to_string(),
            model: "whisper-1".to_string(),
            segments: vec![],
        };
        let success =
            TranscriptionRecord::success(job.id, &result, 10, Duration::from_secs(2), None);
        store.save_transcription(&success).await.unwrap();

        let loaded = store.load_transcription(job.id).unwrap().unwrap();
        assert_eq!(loaded.text.as_deref(), Some("recovered"));
        assert!(loaded.error.is_none());

        // Still exactly one record for the job.
        let count: u32 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM transcriptions WHERE job_id = ?1",
                    [job.id.to_string()],
                    |r| r.get(0),
                )
                .map_err(db_err)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
