//! Video note-taking pipeline: fetch uploaded media, extract a
//! speech-optimized audio track, transcribe it (splitting large audio
//! into parallel chunks), generate structured notes, and persist the
//! result with per-stage progress a UI can poll.
//!
//! [`Pipeline`] orchestrates one job per [`Pipeline::run`] call. Its
//! collaborators are traits so workers can mix backends: [`JobStore`]
//! for persistence, [`ObjectStore`] for media retrieval,
//! [`AudioExtractor`] for ffmpeg work, [`SpeechToText`] and
//! [`NoteGenerator`] for the model APIs.

pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod notes;
pub mod pipeline;
pub mod storage;
pub mod store;
pub mod stt;
pub mod types;

pub use config::{NotesConfig, PipelineConfig, SttConfig};
pub use db::SqliteStore;
pub use error::{Error, Result};
pub use media::{AudioExtractor, Ffmpeg};
pub use notes::{ChatApi, NoteGenerator, NotesPayload};
pub use pipeline::{Pipeline, RunStatus};
pub use storage::{FsObjectStore, HttpObjectStore, ObjectStore};
pub use store::JobStore;
pub use stt::{SpeechToText, WhisperApi};
pub use types::{
    ChunkDescriptor, Job, JobStage, SourceKind, TranscriptSegment, TranscriptionRecord,
    TranscriptionResult,
};
