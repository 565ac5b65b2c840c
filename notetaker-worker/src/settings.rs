use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub stt: SttSettings,
    pub notes: NotesSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    /// "fs" for a local media directory, "http" for an object-store gateway.
    pub mode: String,
    pub fs_root: String,
    pub http_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SttSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub fallback_model: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotesSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    pub chunk_threshold_bytes: u64,
    pub max_concurrent_transcriptions: usize,
    pub work_dir: String,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("NOTETAKER"),
            )
            .set_default("database.path", "data/notetaker.db")?
            .set_default("storage.mode", "fs")?
            .set_default("storage.fs_root", "data/media")?
            .set_default("storage.http_base_url", "http://localhost:9000/notetaker")?
            .set_default("stt.base_url", "https://api.openai.com/v1")?
            .set_default("stt.api_key", "")?
            .set_default("stt.model", "whisper-1")?
            .set_default("stt.fallback_model", "gpt-4o-mini-transcribe")?
            .set_default("stt.timeout_secs", 120)?
            .set_default("notes.base_url", "https://openrouter.ai/api/v1")?
            .set_default("notes.api_key", "")?
            .set_default("notes.model", "google/gemini-2.5-flash")?
            .set_default("notes.timeout_secs", 180)?
            .set_default("notes.max_attempts", 3)?
            .set_default("pipeline.chunk_threshold_bytes", 4 * 1024 * 1024)?
            .set_default("pipeline.max_concurrent_transcriptions", 4)?
            .set_default(
                "pipeline.work_dir",
                std::env::temp_dir()
                    .join("notetaker")
                    .to_string_lossy()
                    .into_owned(),
            )?
            .build()?;

        config.try_deserialize()
    }
}
