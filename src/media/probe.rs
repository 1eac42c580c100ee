use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::model::Dimensions;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("unreadable probe output: {0}")]
    Parse(String),

    #[error("image decode failed: {0}")]
    Image(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub dimensions: Option<Dimensions>,
    /// Seconds, as reported by the container.
    pub duration: Option<f64>,
}

/// Reads stream properties from stored files and samples still frames.
#[async_trait::async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe_image(&self, path: &Path) -> Result<Dimensions, ProbeError>;
    async fn probe_video(&self, path: &Path) -> Result<VideoProbe, ProbeError>;
    /// One JPEG-encoded frame at `timestamp` seconds, scaled to `width` keeping aspect ratio.
    async fn extract_frame(
        &self,
        path: &Path,
        timestamp: f64,
        width: u32,
    ) -> Result<Vec<u8>, ProbeError>;
}

/// `image` for stills, `ffprobe`/`ffmpeg` subprocesses for video. Every
/// subprocess is bounded by `timeout` and killed when it expires.
#[derive(Debug, Clone)]
pub struct FfmpegProber {
    ffprobe_path: PathBuf,
    ffmpeg_path: PathBuf,
    timeout: Duration,
}

impl FfmpegProber {
    pub fn new(
        ffprobe_path: impl Into<PathBuf>,
        ffmpeg_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }

    async fn run(&self, tool: &str, mut command: Command) -> Result<Vec<u8>, ProbeError> {
        command.kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ProbeError::Timeout {
                tool: tool.to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|source| ProbeError::Spawn {
                tool: tool.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                tool: tool.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait::async_trait]
impl MediaProber for FfmpegProber {
    async fn probe_image(&self, path: &Path) -> Result<Dimensions, ProbeError> {
        let path = path.to_path_buf();
        let (width, height) = tokio::task::spawn_blocking(move || image::image_dimensions(&path))
            .await
            .map_err(|e| ProbeError::Image(e.to_string()))?
            .map_err(|e| ProbeError::Image(e.to_string()))?;
        Ok(Dimensions { width, height })
    }

    async fn probe_video(&self, path: &Path) -> Result<VideoProbe, ProbeError> {
        let mut command = Command::new(&self.ffprobe_path);
        command
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(path);

        let stdout = self.run("ffprobe", command).await?;
        parse_ffprobe_output(&stdout)
    }

    async fn extract_frame(
        &self,
        path: &Path,
        timestamp: f64,
        width: u32,
    ) -> Result<Vec<u8>, ProbeError> {
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(["-v", "error", "-ss", &format!("{:.3}", timestamp), "-i"])
            .arg(path)
            .args([
                "-vf",
                &format!("scale={}:-1", width),
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-vcodec",
                "mjpeg",
                "-",
            ]);

        let frame = self.run("ffmpeg", command).await?;
        if frame.is_empty() {
            return Err(ProbeError::Parse(format!(
                "ffmpeg produced no frame at {:.3}s",
                timestamp
            )));
        }
        Ok(frame)
    }
}

/// Pull width/height of the first video stream and the container duration
/// out of `ffprobe -print_format json`. Missing fields come back as `None`.
pub fn parse_ffprobe_output(stdout: &[u8]) -> Result<VideoProbe, ProbeError> {
    let probe: serde_json::Value =
        serde_json::from_slice(stdout).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let stream = probe["streams"].get(0);
    let dimensions = stream.and_then(|stream| {
        let width = stream["width"].as_u64()?;
        let height = stream["height"].as_u64()?;
        Some(Dimensions {
            width: u32::try_from(width).ok()?,
            height: u32::try_from(height).ok()?,
        })
    });

    let duration = probe["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0);

    Ok(VideoProbe {
        dimensions,
        duration,
    })
}
