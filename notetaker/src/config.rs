use std::path::PathBuf;
use std::time::Duration;

/// Tuning knobs for one pipeline run.
///
/// Defaults match the limits the transcription API imposes: 4 MiB chunks
/// stay well under the per-request payload cap, and four concurrent
/// requests keep throughput up without tripping rate limits.
pub struct PipelineConfig {
    /// Audio artifacts larger than this are split before transcription.
    pub chunk_threshold_bytes: u64,
    /// Upper bound on concurrent transcription requests.
    pub max_concurrent_transcriptions: usize,
    /// Scratch directory for downloaded media, extracted audio, and chunks.
    pub work_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_threshold_bytes: 4 * 1024 * 1024,
            max_concurrent_transcriptions: 4,
            work_dir: std::env::temp_dir().join("notetaker"),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_threshold_bytes(mut self, bytes: u64) -> Self {
        self.chunk_threshold_bytes = bytes;
        self
    }

    pub fn max_concurrent_transcriptions(mut self, n: usize) -> Self {
        self.max_concurrent_transcriptions = n;
        self
    }

    pub fn work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = dir;
        self
    }
}

/// Connection settings for the speech-to-text API client.
pub struct SttConfig {
    /// Base URL of an OpenAI-compatible API (e.g. "https://api.openai.com/v1").
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Tried once per call when the primary model fails.
    pub fallback_model: Option<String>,
    pub request_timeout: Duration,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            fallback_model: Some("gpt-4o-mini-transcribe".to_string()),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl SttConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn fallback_model(mut self, model: Option<String>) -> Self {
        self.fallback_model = model;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Connection settings for the note-generation API client.
pub struct NotesConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout: Duration,
    /// Attempts before note generation gives up. Covers both transport
    /// failures and responses that fail schema validation.
    pub max_attempts: u32,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            model: "google/gemini-2.5-flash".to_string(),
            request_timeout: Duration::from_secs(180),
            max_attempts: 3,
        }
    }
}

impl NotesConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}
