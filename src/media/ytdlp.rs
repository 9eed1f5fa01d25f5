use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Source download capability
#[async_trait]
pub trait VideoDownloader: Send + Sync {
    /// Download the video at `url` into `output` as mp4
    async fn download_video(&self, url: &str, output: &Path, format: &str) -> Result<()>;

    /// Download the automatic caption track for `lang`.
    ///
    /// Returns the path of the written track, `<output_base>.<lang>.vtt`.
    async fn download_subtitles(&self, url: &str, output_base: &Path, lang: &str) -> Result<PathBuf>;
}

/// Caption track path written for a given output base and language
pub fn subtitle_track_path(output_base: &Path, lang: &str) -> PathBuf {
    let mut name = output_base.as_os_str().to_os_string();
    name.push(format!(".{}.vtt", lang));
    PathBuf::from(name)
}

/// `VideoDownloader` backed by the yt-dlp binary
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<()> {
        debug!("{} {}", self.binary.display(), args.join(" "));

        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.lines().last().unwrap_or_default()
            ));
        }

        Ok(())
    }
}

pub fn video_args(url: &str, output: &Path, format: &str) -> Vec<String> {
    vec![
        "--ignore-errors".to_string(),
        "--merge-output-format".to_string(),
        "mp4".to_string(),
        "--geo-bypass".to_string(),
        "--no-check-certificate".to_string(),
        "--force-generic-extractor".to_string(),
        "--format".to_string(),
        format.to_string(),
        "--concurrent-fragments".to_string(),
        "8".to_string(),
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
        url.to_string(),
    ]
}

pub fn subtitle_args(url: &str, output_base: &Path, lang: &str) -> Vec<String> {
    vec![
        "--write-auto-sub".to_string(),
        "--sub-lang".to_string(),
        lang.to_string(),
        "--skip-download".to_string(),
        "--output".to_string(),
        output_base.to_string_lossy().into_owned(),
        url.to_string(),
    ]
}

#[async_trait]
impl VideoDownloader for YtDlp {
    async fn download_video(&self, url: &str, output: &Path, format: &str) -> Result<()> {
        info!("⬇️ Downloading {}", url);
        self.run(video_args(url, output, format)).await?;

        if !output.exists() {
            return Err(anyhow!("yt-dlp produced no file at {}", output.display()));
        }
        Ok(())
    }

    async fn download_subtitles(&self, url: &str, output_base: &Path, lang: &str) -> Result<PathBuf> {
        info!("💬 Downloading '{}' captions for {}", lang, url);
        self.run(subtitle_args(url, output_base, lang)).await?;

        let track = subtitle_track_path(output_base, lang);
        if !track.exists() {
            return Err(anyhow!("no '{}' caption track at {}", lang, track.display()));
        }
        Ok(track)
    }
}
