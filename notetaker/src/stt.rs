use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SttConfig;
use crate::error::{Error, Result};
use crate::types::{ChunkDescriptor, TranscriptSegment, TranscriptionResult};

/// Speech-to-text over one audio file.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe one audio file, returning text and timestamped segments.
    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptionResult>;

    /// Primary model identifier, reported for merged chunk results.
    fn model(&self) -> &str;
}

/// Client for an OpenAI-compatible `/audio/transcriptions` endpoint.
///
/// Requests `verbose_json` with segment-level timestamps. When the primary
/// model fails and a fallback model is configured, the call is retried
/// once with the fallback; the result then reports the model actually used.
pub struct WhisperApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    fallback_model: Option<String>,
}

impl WhisperApi {
    pub fn new(config: SttConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            model: config.model,
            fallback_model: config.fallback_model,
        })
    }

    async fn request(&self, audio_path: &Path, model: &str) -> Result<TranscriptionResult> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(|e| Error::Transcription(format!("failed to build audio part: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", model.to_string())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        let url = format!("{}/audio/transcriptions", self.base_url);
        debug!(%url, model, path = %audio_path.display(), "sending transcription request");

        let mut request = self.client.post(&url).multipart(form);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body_truncated: String = body.chars().take(1000).collect();
            return Err(Error::Transcription(format!(
                "transcription request failed with status {status}: {body_truncated}"
            )));
        }

        let parsed: TranscriptionResponse = response.json().await?;

        if parsed.text.trim().is_empty() {
            return Err(Error::Transcription("empty transcript returned".into()));
        }

        // Segment text arrives with lead-in whitespace; whitespace-only
        // segments carry no speech and are dropped.
        let segments: Vec<TranscriptSegment> = parsed
            .segments
            .into_iter()
            .filter_map(|s| {
                let text = s.text.trim().to_string();
                if text.is_empty() {
                    None
                } else {
                    Some(TranscriptSegment {
                        start: s.start,
                        end: s.end,
                        text,
                    })
                }
            })
            .collect();

        debug!(segments = segments.len(), chars = parsed.text.len(), "transcription received");

        Ok(TranscriptionResult {
            text: parsed.text,
            model: model.to_string(),
            segments,
        })
    }
}

#[async_trait]
impl SpeechToText for WhisperApi {
    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptionResult> {
        if !audio_path.exists() {
            return Err(Error::NotFound(format!(
                "audio file not found: {}",
                audio_path.display()
            )));
        }

        match self.request(audio_path, &self.model).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if let Some(fallback) = &self.fallback_model {
                    warn!(
                        error = %e,
                        fallback = %fallback,
                        "primary transcription failed, retrying with fallback model"
                    );
                    if let Ok(result) = self.request(audio_path, fallback).await {
                        return Ok(result);
                    }
                }
                Err(e)
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    segments: Vec<ApiSegment>,
}

#[derive(Deserialize)]
struct ApiSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Transcribe all chunks with at most `max_concurrent` calls in flight,
/// then merge the results in chunk-index order.
///
/// Any single failure fails the whole operation; a silently incomplete
/// transcript is worse than a hard failure. Merged segment timestamps are
/// shifted by a running offset that advances to each chunk's last appended
/// segment end, so trimmed lead-in in one chunk never desynchronizes the
/// chunks after it.
pub async fn transcribe_all(
    stt: Arc<dyn SpeechToText>,
    chunks: Vec<ChunkDescriptor>,
    max_concurrent: usize,
) -> Result<TranscriptionResult> {
    if chunks.is_empty() {
        return Err(Error::Transcription("no audio chunks provided".into()));
    }

    info!(
        chunks = chunks.len(),
        max_concurrent, "transcribing chunks"
    );

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut tasks = JoinSet::new();

    for chunk in chunks {
        let stt = stt.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| Error::Transcription("scheduler semaphore closed".into()))?;

            debug!(index = chunk.index, path = %chunk.path.display(), "transcribing chunk");
            let result = stt.transcribe(&chunk.path).await.map_err(|e| {
                Error::Transcription(format!("chunk {} failed: {e}", chunk.index))
            })?;

            Ok::<(usize, TranscriptionResult), Error>((chunk.index, result))
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(|e| Error::Transcription(format!("transcription task panicked: {e}")))??;
        results.push(result);
    }

    // Completion order is arbitrary; the transcript is not.
    results.sort_by_key(|(index, _)| *index);

    let text = results
        .iter()
        .map(|(_, r)| r.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let mut segments: Vec<TranscriptSegment> = Vec::new();
    let mut offset = 0.0_f64;
    for (_, result) in &results {
        for segment in &result.segments {
            segments.push(TranscriptSegment {
                start: segment.start + offset,
                end: segment.end + offset,
                text: segment.text.clone(),
            });
        }
        if !result.segments.is_empty() {
            offset = segments.last().map(|s| s.end).unwrap_or(offset);
        }
    }

    info!(
        chars = text.len(),
        segments = segments.len(),
        "chunk transcriptions merged"
    );

    Ok(TranscriptionResult {
        text,
        model: stt.model().to_string(),
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn chunk(index: usize) -> ChunkDescriptor {
        ChunkDescriptor {
            index,
            path: PathBuf::from(format!("chunk-{index}.mp3")),
            size_bytes: 1024,
        }
    }

    fn segment(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: text.to_string(),
        }
    }

    /// Fake transcriber keyed by the chunk index parsed from the file name.
    struct FakeStt {
        segments_by_index: Vec<Vec<TranscriptSegment>>,
        delays_ms: Vec<u64>,
        fail_index: Option<usize>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        high_water: AtomicUsize,
    }

    impl FakeStt {
        fn new(segments_by_index: Vec<Vec<TranscriptSegment>>) -> Self {
            let n = segments_by_index.len();
            Self {
                segments_by_index,
                delays_ms: vec![5; n],
                fail_index: None,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
            }
        }

        fn delays_ms(mut self, delays: Vec<u64>) -> Self {
            self.delays_ms = delays;
            self
        }

        fn fail_index(mut self, index: usize) -> Self {
            self.fail_index = Some(index);
            self
        }

        fn index_of(path: &Path) -> usize {
            path.file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("chunk-"))
                .and_then(|s| s.parse().ok())
                .expect("fake chunk path")
        }
    }

    #[async_trait]
    impl SpeechToText for FakeStt {
        async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptionResult> {
            let index = Self::index_of(audio_path);
            self.calls.fetch_add(1, Ordering::SeqCst);

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(self.delays_ms[index])).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_index == Some(index) {
                return Err(Error::Transcription("service unavailable".into()));
            }

            Ok(TranscriptionResult {
                text: format!("part{index}"),
                model: "whisper-test".to_string(),
                segments: self.segments_by_index[index].clone(),
            })
        }

        fn model(&self) -> &str {
            "whisper-test"
        }
    }

    #[tokio::test]
    async fn test_merge_order_independent_of_completion_order() {
        // Chunk 0 finishes last, chunk 2 first.
        let stt = Arc::new(
            FakeStt::new(vec![
                vec![segment(0.0, 4.0, "a")],
                vec![segment(0.0, 3.0, "b")],
                vec![segment(0.0, 5.0, "c")],
            ])
            .delays_ms(vec![40, 20, 0]),
        );

        let result = transcribe_all(stt, vec![chunk(0), chunk(1), chunk(2)], 3)
            .await
            .unwrap();

        assert_eq!(result.text, "part0 part1 part2");
        assert_eq!(result.segments.len(), 3);
        for pair in result.segments.windows(2) {
            assert!(pair[1].start >= pair[0].start);
        }
    }

    #[tokio::test]
    async fn test_cumulative_offset_uses_actual_segment_end() {
        // Nominal chunk durations are all 10s, but chunk 1's transcribed
        // span ends at 9.4s. Chunk 2 must be offset by 19.4, not 20.
        let stt = Arc::new(FakeStt::new(vec![
            vec![segment(0.0, 10.0, "first")],
            vec![segment(0.2, 9.4, "second")],
            vec![segment(0.0, 3.0, "third")],
        ]));

        let result = transcribe_all(stt, vec![chunk(0), chunk(1), chunk(2)], 2)
            .await
            .unwrap();

        assert_eq!(result.segments[1].start, 10.2);
        assert_eq!(result.segments[1].end, 19.4);
        assert_eq!(result.segments[2].start, 19.4);
        assert_eq!(result.segments[2].end, 22.4);
    }

    #[tokio::test]
    async fn test_chunk_without_segments_does_not_advance_offset() {
        let stt = Arc::new(FakeStt::new(vec![
            vec![segment(0.0, 8.0, "speech")],
            vec![],
            vec![segment(1.0, 2.0, "more")],
        ]));

        let result = transcribe_all(stt, vec![chunk(0), chunk(1), chunk(2)], 2)
            .await
            .unwrap();

        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].start, 9.0);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_cap() {
        for max_concurrent in [1usize, 2, 5] {
            for count in [1usize, 3, 10] {
                let stt = Arc::new(
                    FakeStt::new(vec![vec![]; count]).delays_ms(vec![10; count]),
                );
                let chunks = (0..count).map(chunk).collect();

                // Empty transcripts are fine here; only scheduling matters.
                let result =
                    transcribe_all(stt.clone(), chunks, max_concurrent).await.unwrap();
                assert_eq!(result.text.split(' ').count(), count);

                let peak = stt.high_water.load(Ordering::SeqCst);
                assert!(
                    peak <= max_concurrent,
                    "peak {peak} exceeded cap {max_concurrent} with {count} chunks"
                );
                assert_eq!(stt.calls.load(Ordering::SeqCst), count);
            }
        }
    }

    #[tokio::test]
    async fn test_single_chunk_failure_fails_the_operation() {
        let stt = Arc::new(
            FakeStt::new(vec![
                vec![segment(0.0, 1.0, "ok")],
                vec![segment(0.0, 1.0, "ok")],
                vec![segment(0.0, 1.0, "ok")],
            ])
            .fail_index(1),
        );

        let err = transcribe_all(stt, vec![chunk(0), chunk(1), chunk(2)], 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transcription(_)));
        assert!(err.to_string().contains("chunk 1"));
    }

    #[tokio::test]
    async fn test_empty_chunk_list_is_an_error() {
        let stt = Arc::new(FakeStt::new(vec![]));
        let err = transcribe_all(stt, Vec::new(), 2).await.unwrap_err();
        assert!(matches!(err, Error::Transcription(_)));
    }

    #[tokio::test]
    async fn test_merged_result_reports_primary_model() {
        let stt = Arc::new(FakeStt::new(vec![vec![], vec![]]));
        let result = transcribe_all(stt, vec![chunk(0), chunk(1)], 2)
            .await
            .unwrap();
        assert_eq!(result.model, "whisper-test");
    }
}
