use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;
use crate::media::AudioExtractor;
use crate::types::ChunkDescriptor;

/// One contiguous time range of a chunk plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRange {
    pub index: usize,
    pub start: f64,
    pub duration: f64,
}

/// Plan equal-duration chunks for an audio artifact.
///
/// Chunk count is `ceil(total_size / max_chunk_bytes)`; the final range is
/// clamped to the true total duration so no carve reads past end-of-stream.
pub fn chunk_plan(total_size: u64, max_chunk_bytes: u64, total_duration: f64) -> Vec<ChunkRange> {
    let num_chunks = total_size.div_ceil(max_chunk_bytes).max(1) as usize;
    let chunk_duration = total_duration / num_chunks as f64;

    (0..num_chunks)
        .map(|i| {
            let start = i as f64 * chunk_duration;
            let duration = if i == num_chunks - 1 {
                total_duration - start
            } else {
                chunk_duration
            };
            ChunkRange {
                index: i,
                start,
                duration,
            }
        })
        .collect()
}

/// Split an audio artifact into chunks no larger (in duration share) than
/// the size threshold warrants.
///
/// Files at or under the threshold come back as a single descriptor
/// wrapping the original artifact — no probing, no re-encoding. Larger
/// files are carved into codec-copied chunk files under `work_dir`. If any
/// carve fails, every chunk file produced so far is removed before the
/// error is returned; a partial chunk set never escapes.
pub async fn split_audio(
    extractor: &dyn AudioExtractor,
    audio_path: &Path,
    audio_size: u64,
    max_chunk_bytes: u64,
    work_dir: &Path,
) -> Result<Vec<ChunkDescriptor>> {
    if audio_size <= max_chunk_bytes {
        info!(size_bytes = audio_size, "audio within chunk threshold, no splitting needed");
        return Ok(vec![ChunkDescriptor {
            index: 0,
            path: audio_path.to_path_buf(),
            size_bytes: audio_size,
        }]);
    }

    let total_duration = extractor.probe_duration(audio_path).await?;
    let ranges = chunk_plan(audio_size, max_chunk_bytes, total_duration);

    info!(
        size_bytes = audio_size,
        num_chunks = ranges.len(),
        "splitting audio into chunks"
    );

    let stem = audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());

    let mut chunks: Vec<ChunkDescriptor> = Vec::with_capacity(ranges.len());

    for range in &ranges {
        let dest = work_dir.join(format!("{stem}_chunk_{:03}.mp3", range.index + 1));

        match extractor
            .extract_range(audio_path, range.start, range.duration, &dest)
            .await
        {
            Ok(size_bytes) => chunks.push(ChunkDescriptor {
                index: range.index,
                path: dest,
                size_bytes,
            }),
            Err(e) => {
                discard_chunks(&chunks);
                return Err(e);
            }
        }
    }

    Ok(chunks)
}

fn discard_chunks(chunks: &[ChunkDescriptor]) {
    for chunk in chunks {
        if let Err(e) = std::fs::remove_file(&chunk.path) {
            warn!(path = %chunk.path.display(), error = %e, "failed to discard chunk file");
        }
    }
}
