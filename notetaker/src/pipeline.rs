use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chunk::split_audio;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::media::AudioExtractor;
use crate::notes::NoteGenerator;
use crate::storage::ObjectStore;
use crate::store::JobStore;
use crate::stt::{transcribe_all, SpeechToText};
use crate::types::{Job, JobStage, TranscriptionRecord};

/// Outcome of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The job was driven to `completed` by this run.
    Completed,
    /// A durable transcription already existed; nothing was done.
    /// Expected under the dispatcher's at-least-once redelivery.
    AlreadyProcessed,
}

/// Drives one job end-to-end: fetch media, extract audio, transcribe
/// (chunked when the audio exceeds the size threshold), generate notes,
/// persist the result.
///
/// All collaborators are injected at construction; the pipeline holds no
/// global state and instances are independent, so any number of jobs may
/// run concurrently in separate instances.
pub struct Pipeline {
    store: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    media: Arc<dyn AudioExtractor>,
    stt: Arc<dyn SpeechToText>,
    notes: Arc<dyn NoteGenerator>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        media: Arc<dyn AudioExtractor>,
        stt: Arc<dyn SpeechToText>,
        notes: Arc<dyn NoteGenerator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            objects,
            media,
            stt,
            notes,
            config,
        }
    }

    /// Run one job to a terminal stage.
    ///
    /// Safe under redelivery: if a transcription record already exists the
    /// run is a no-op success. A fatal failure writes an error-only record
    /// and a `failed` stage before the error propagates to the caller.
    pub async fn run(&self, job_id: Uuid) -> Result<RunStatus> {
        if self.store.has_transcription(job_id).await? {
            info!(job_id = %job_id, "job already processed, skipping redelivered run");
            return Ok(RunStatus::AlreadyProcessed);
        }

        // A missing job row propagates as-is: there is nothing to attach
        // a failure record to, and the dispatcher's retry policy applies.
        let job = self.store.load_job(job_id).await?;

        let started = Instant::now();
        let mut temps = TempFiles::default();

        match self.execute(&job, &mut temps).await {
            Ok(()) => {
                info!(job_id = %job_id, "job processed successfully");
                Ok(RunStatus::Completed)
            }
            Err(e) => {
                self.record_failure(job_id, &e, started.elapsed()).await;
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &Job, temps: &mut TempFiles) -> Result<()> {
        // Per-job scratch directory so concurrent jobs never collide.
        let work_dir = self.config.work_dir.join(job.id.to_string());
        tokio::fs::create_dir_all(&work_dir).await?;
        temps.register_dir(work_dir.clone());

        self.transition(job.id, JobStage::Downloading).await?;
        let (media_path, media_size) = self.objects.fetch(&job.media_key, &work_dir).await?;
        temps.register(media_path.clone());
        info!(job_id = %job.id, size_bytes = media_size, "media fetched");

        // Duration is nice-to-have metadata; a probe failure never kills a job.
        match self.media.probe_duration(&media_path).await {
            Ok(duration) => {
                self.store.save_duration(job.id, duration as i64).await?;
                info!(job_id = %job.id, duration_secs = duration, "probed duration");
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "could not probe media duration");
            }
        }

        self.transition(job.id, JobStage::ExtractingAudio).await?;
        let (audio_path, audio_size) = self.media.extract_audio(&media_path).await?;
        temps.register(audio_path.clone());

        self.transition(job.id, JobStage::Transcribing).await?;
        let transcription_started = Instant::now();

        let result = if audio_size > self.config.chunk_threshold_bytes {
            let chunks = split_audio(
                self.media.as_ref(),
                &audio_path,
                audio_size,
                self.config.chunk_threshold_bytes,
                &work_dir,
            )
            .await?;
            for chunk in &chunks {
                if chunk.path != audio_path {
                    temps.register(chunk.path.clone());
                }
            }
            transcribe_all(
                self.stt.clone(),
                chunks,
                self.config.max_concurrent_transcriptions,
            )
            .await?
        } else {
            self.stt.transcribe(&audio_path).await?
        };

        let transcription_time = transcription_started.elapsed();
        info!(
            job_id = %job.id,
            chars = result.text.len(),
            segments = result.segments.len(),
            "transcription complete"
        );

        self.transition(job.id, JobStage::GeneratingNotes).await?;
        let notes = match self.notes.generate(&result.text, &result.segments).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                // Non-fatal: the job completes with a transcript and no notes.
                warn!(job_id = %job.id, error = %e, "note generation failed, completing without notes");
                None
            }
        };

        let record = TranscriptionRecord::success(
            job.id,
            &result,
            audio_size,
            transcription_time,
            notes,
        );
        self.store.save_transcription(&record).await?;
        self.transition(job.id, JobStage::Completed).await?;

        Ok(())
    }

    async fn transition(&self, job_id: Uuid, stage: JobStage) -> Result<()> {
        self.store.save_stage(job_id, stage).await?;
        info!(job_id = %job_id, stage = %stage, "stage transition");
        Ok(())
    }

    /// Best-effort terminal bookkeeping for a fatal error. The original
    /// error is what the caller sees; store failures here are logged,
    /// never allowed to mask it.
    ///
    /// No record existed when the run started (the idempotency guard ran),
    /// so a record present here was written by this run: the failure came
    /// after the transcript was persisted. The error-only upsert would
    /// erase it, so it is skipped.
    async fn record_failure(&self, job_id: Uuid, cause: &Error, elapsed: Duration) {
        error!(job_id = %job_id, error = %cause, "job failed");

        match self.store.has_transcription(job_id).await {
            Ok(true) => {
                warn!(job_id = %job_id, "transcript already persisted, keeping it");
            }
            Ok(false) => {
                let record = TranscriptionRecord::failure(job_id, cause.to_string(), elapsed);
                if let Err(e) = self.store.save_transcription(&record).await {
                    error!(job_id = %job_id, error = %e, "could not persist failure record");
                }
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "could not check for an existing record");
            }
        }

        if let Err(e) = self.store.save_stage(job_id, JobStage::Failed).await {
            error!(job_id = %job_id, error = %e, "could not persist failed stage");
        }
    }
}

/// RAII guard over a run's scratch artifacts. Removes every registered
/// file, then the scratch directories, on every exit path.
#[derive(Default)]
struct TempFiles {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl TempFiles {
    fn register(&mut self, path: PathBuf) {
        self.files.push(path);
    }

    fn register_dir(&mut self, path: PathBuf) {
        self.dirs.push(path);
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.files {
            if !path.exists() {
                continue;
            }
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to clean up temp file");
            }
        }
        // Directories should be empty once their files are gone; anything
        // left behind is an accounting bug worth hearing about.
        for dir in &self.dirs {
            if !dir.exists() {
                continue;
            }
            if let Err(e) = std::fs::remove_dir(dir) {
                warn!(path = %dir.display(), error = %e, "scratch directory not removed");
            }
        }
    }
}
