use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Media probing and audio extraction.
///
/// All operations take a local path and produce local artifacts; the
/// caller owns cleanup of whatever they return.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Media duration in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Extract a speech-optimized audio track (mono, 16 kHz, 32 kbps MP3).
    /// Returns the audio path and its size in bytes.
    async fn extract_audio(&self, path: &Path) -> Result<(PathBuf, u64)>;

    /// Carve the time range `[start, start + duration)` out of an audio
    /// file into `dest` without re-encoding. Returns the size in bytes.
    async fn extract_range(&self, path: &Path, start: f64, duration: f64, dest: &Path)
        -> Result<u64>;
}

/// ffmpeg/ffprobe subprocess implementation.
pub struct Ffmpeg {
    probe_timeout: Duration,
    extract_timeout: Duration,
    range_timeout: Duration,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(30),
            extract_timeout: Duration::from_secs(300),
            range_timeout: Duration::from_secs(60),
        }
    }
}

impl Ffmpeg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    pub fn range_timeout(mut self, timeout: Duration) -> Self {
        self.range_timeout = timeout;
        self
    }
}

#[async_trait]
impl AudioExtractor for Ffmpeg {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "media file not found: {}",
                path.display()
            )));
        }

        let mut cmd = Command::new("ffprobe");
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path);

        let output = run_tool(cmd, self.probe_timeout, "ffprobe").await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = stdout.trim().parse().map_err(|e| {
            Error::Extraction(format!(
                "could not parse duration {:?}: {e}",
                stdout.trim()
            ))
        })?;

        debug!(path = %path.display(), duration_secs = duration, "probed duration");

        Ok(duration)
    }

    async fn extract_audio(&self, path: &Path) -> Result<(PathBuf, u64)> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "media file not found: {}",
                path.display()
            )));
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        let output_path = path.with_file_name(format!("{stem}_audio.mp3"));

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-i")
            .arg(path)
            .args([
                "-vn",
                "-acodec",
                "libmp3lame",
                "-ac",
                "1",
                "-ar",
                "16000",
                "-b:a",
                "32k",
                "-y",
            ])
            .arg(&output_path);

        run_tool(cmd, self.extract_timeout, "ffmpeg").await?;

        if !output_path.exists() {
            return Err(Error::Extraction("audio file was not created".into()));
        }

        let size = tokio::fs::metadata(&output_path).await?.len();
        info!(path = %output_path.display(), size_bytes = size, "audio extracted");

        Ok((output_path, size))
    }

    async fn extract_range(
        &self,
        path: &Path,
        start: f64,
        duration: f64,
        dest: &Path,
    ) -> Result<u64> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-i")
            .arg(path)
            .args([
                "-ss",
                &start.to_string(),
                "-t",
                &duration.to_string(),
                "-acodec",
                "copy",
                "-y",
            ])
            .arg(dest);

        run_tool(cmd, self.range_timeout, "ffmpeg").await?;

        if !dest.exists() {
            return Err(Error::Extraction(format!(
                "audio chunk was not created: {}",
                dest.display()
            )));
        }

        let size = tokio::fs::metadata(dest).await?.len();
        debug!(path = %dest.display(), start, duration, size_bytes = size, "carved audio range");

        Ok(size)
    }
}

/// Run an external tool with a timeout, mapping failures into `Extraction`.
async fn run_tool(
    mut cmd: Command,
    timeout: Duration,
    tool: &str,
) -> Result<std::process::Output> {
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            Error::Extraction(format!("{tool} timed out after {}s", timeout.as_secs()))
        })?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Extraction(format!(
                    "{tool} not found. Install with: apt install ffmpeg"
                ))
            } else {
                Error::Extraction(format!("failed to run {tool}: {e}"))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Limit error message length to avoid dumping huge stderr
        let stderr_truncated: String = stderr.chars().take(1000).collect();
        return Err(Error::Extraction(format!("{tool} failed: {stderr_truncated}")));
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_missing_file_is_not_found() {
        let ffmpeg = Ffmpeg::new();
        let err = ffmpeg
            .probe_duration(Path::new("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_extract_missing_file_is_not_found() {
        let ffmpeg = Ffmpeg::new();
        let err = ffmpeg
            .extract_audio(Path::new("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
