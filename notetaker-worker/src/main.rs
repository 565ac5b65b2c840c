mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use notetaker::{
    ChatApi, Ffmpeg, FsObjectStore, HttpObjectStore, NotesConfig, ObjectStore, Pipeline,
    PipelineConfig, RunStatus, SqliteStore, SttConfig, WhisperApi,
};
use uuid::Uuid;

use settings::Settings;

#[derive(Parser)]
#[command(
    name = "notetaker-worker",
    about = "Process one video job: fetch media, transcribe, generate notes"
)]
struct Cli {
    /// Job to process.
    #[arg(long)]
    job_id: Uuid,

    /// Object-store key of the raw media, as carried in the task payload.
    /// The job row is authoritative; this is logged for traceability.
    #[arg(long)]
    source_ref: Option<String>,

    /// Owning user reference, as carried in the task payload.
    #[arg(long)]
    owner_ref: Option<String>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("notetaker=info".parse().unwrap())
                .add_directive("notetaker_worker=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        job_id = %cli.job_id,
        source_ref = cli.source_ref.as_deref().unwrap_or(""),
        owner_ref = cli.owner_ref.as_deref().unwrap_or(""),
        "worker started"
    );

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let store = match SqliteStore::open(Path::new(&settings.database.path)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error opening database {}: {e}", settings.database.path);
            std::process::exit(1);
        }
    };

    let objects: Arc<dyn ObjectStore> = match settings.storage.mode.as_str() {
        "fs" => Arc::new(FsObjectStore::new(&settings.storage.fs_root)),
        "http" => Arc::new(HttpObjectStore::new(&settings.storage.http_base_url)),
        other => {
            eprintln!("Unknown storage mode: {other}");
            eprintln!("Use \"fs\" or \"http\"");
            std::process::exit(1);
        }
    };

    let stt = match WhisperApi::new(
        SttConfig::new()
            .base_url(&settings.stt.base_url)
            .api_key(&settings.stt.api_key)
            .model(&settings.stt.model)
            .fallback_model(settings.stt.fallback_model.clone())
            .request_timeout(Duration::from_secs(settings.stt.timeout_secs)),
    ) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let notes = match ChatApi::new(
        NotesConfig::new()
            .base_url(&settings.notes.base_url)
            .api_key(&settings.notes.api_key)
            .model(&settings.notes.model)
            .request_timeout(Duration::from_secs(settings.notes.timeout_secs))
            .max_attempts(settings.notes.max_attempts),
    ) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let pipeline = Pipeline::new(
        Arc::new(store),
        objects,
        Arc::new(Ffmpeg::new()),
        Arc::new(stt),
        Arc::new(notes),
        PipelineConfig::new()
            .chunk_threshold_bytes(settings.pipeline.chunk_threshold_bytes)
            .max_concurrent_transcriptions(settings.pipeline.max_concurrent_transcriptions)
            .work_dir(PathBuf::from(&settings.pipeline.work_dir)),
    );

    match pipeline.run(cli.job_id).await {
        Ok(RunStatus::Completed) => eprintln!("Job {} completed", cli.job_id),
        Ok(RunStatus::AlreadyProcessed) => {
            eprintln!("Job {} already processed, nothing to do", cli.job_id)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
