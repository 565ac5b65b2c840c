/// All errors that can occur in the notetaker pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("audio extraction error: {0}")]
    Extraction(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("note generation error: {0}")]
    NoteGeneration(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
