//! Recording fakes for the media and download capabilities.
//!
//! `MockMediaTool` writes a placeholder file for every output it is asked to
//! produce and tracks the duration of derived slices, so pipeline code can be
//! exercised end to end without the real binaries. A scripted slice failure
//! leaves a truncated output behind, the way an interrupted encoder does.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use super::ytdlp::subtitle_track_path;
use super::{CoverRequest, MediaTool, OverlayRequest, SliceMode, SliceRequest, VideoDownloader};
use crate::errors::{PipelineError, PipelineResult};

/// One recorded media operation
#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    Probe(PathBuf),
    Slice(SliceRequest),
    Burn {
        input: PathBuf,
        captions: PathBuf,
        output: PathBuf,
        /// Caption document as it was on disk at burn time
        captions_content: String,
    },
    Overlay(OverlayRequest),
    Cover(CoverRequest),
}

/// Scriptable `MediaTool`
#[derive(Default)]
pub struct MockMediaTool {
    durations: Mutex<HashMap<PathBuf, Duration>>,
    default_duration: Option<Duration>,
    failing_stages: HashSet<String>,
    failing_outputs: Vec<String>,
    calls: Mutex<Vec<MediaCall>>,
}

impl MockMediaTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe result for one path
    pub fn with_duration(self, path: impl Into<PathBuf>, duration: Duration) -> Self {
        if let Ok(mut durations) = self.durations.lock() {
            durations.insert(path.into(), duration);
        }
        self
    }

    /// Probe result for paths without an explicit duration
    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = Some(duration);
        self
    }

    /// Fail every call of a stage: `probe`, `segment`, `cut`, `burn-in`,
    /// `overlay` or `cover`
    pub fn failing_stage(mut self, stage: &str) -> Self {
        self.failing_stages.insert(stage.to_string());
        self
    }

    /// Fail any operation whose output path contains `fragment`
    pub fn failing_output(mut self, fragment: &str) -> Self {
        self.failing_outputs.push(fragment.to_string());
        self
    }

    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn slices(&self) -> Vec<SliceRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MediaCall::Slice(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn burns(&self) -> Vec<(PathBuf, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MediaCall::Burn {
                    output,
                    captions_content,
                    ..
                } => Some((output, captions_content)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MediaCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn duration_of(&self, path: &Path) -> Option<Duration> {
        self.durations
            .lock()
            .ok()
            .and_then(|durations| durations.get(path).copied())
            .or(self.default_duration)
    }

    fn check(&self, stage: &str, output: &Path) -> PipelineResult<()> {
        let output_text = output.to_string_lossy();
        if self.failing_stages.contains(stage)
            || self
                .failing_outputs
                .iter()
                .any(|fragment| output_text.contains(fragment.as_str()))
        {
            return Err(PipelineError::Encoding {
                tool: "mock".to_string(),
                stage: stage.to_string(),
                detail: format!("scripted failure for {}", output.display()),
            });
        }
        Ok(())
    }

    async fn touch(&self, output: &Path, duration: Option<Duration>) -> PipelineResult<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"media").await?;

        if let (Some(duration), Ok(mut durations)) = (duration, self.durations.lock()) {
            durations.insert(output.to_path_buf(), duration);
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTool for MockMediaTool {
    async fn probe_duration(&self, path: &Path) -> PipelineResult<Duration> {
        self.record(MediaCall::Probe(path.to_path_buf()));

        if self.failing_stages.contains("probe") {
            return Err(PipelineError::DurationProbe {
                path: path.to_path_buf(),
                reason: "scripted failure".to_string(),
            });
        }

        self.duration_of(path).ok_or_else(|| PipelineError::DurationProbe {
            path: path.to_path_buf(),
            reason: "no duration scripted".to_string(),
        })
    }

    async fn extract_slice(&self, request: &SliceRequest) -> PipelineResult<()> {
        self.record(MediaCall::Slice(request.clone()));

        let stage = match request.mode {
            SliceMode::StreamCopy => "segment",
            SliceMode::Reencode => "cut",
        };
        if let Err(e) = self.check(stage, &request.output) {
            self.touch(&request.output, None).await?;
            return Err(e);
        }

        let derived = self
            .duration_of(&request.input)
            .map(|total| total.saturating_sub(request.start).min(request.length))
            .unwrap_or(request.length);
        self.touch(&request.output, Some(derived)).await
    }

    async fn burn_captions(&self, input: &Path, captions: &Path, output: &Path) -> PipelineResult<()> {
        let captions_content = tokio::fs::read_to_string(captions).await.unwrap_or_default();
        self.record(MediaCall::Burn {
            input: input.to_path_buf(),
            captions: captions.to_path_buf(),
            output: output.to_path_buf(),
            captions_content,
        });

        self.check("burn-in", output)?;
        let duration = self.duration_of(input);
        self.touch(output, duration).await
    }

    async fn compose_overlay(&self, request: &OverlayRequest) -> PipelineResult<()> {
        self.record(MediaCall::Overlay(request.clone()));
        self.check("overlay", &request.output)?;
        self.touch(&request.output, None).await
    }

    async fn render_cover(&self, request: &CoverRequest) -> PipelineResult<()> {
        self.record(MediaCall::Cover(request.clone()));
        self.check("cover", &request.output)?;
        self.touch(&request.output, None).await
    }
}

/// Scriptable `VideoDownloader`
#[derive(Default)]
pub struct MockDownloader {
    captions: Option<String>,
    fail_video: bool,
    requests: Mutex<Vec<String>>,
}

impl MockDownloader {
    /// Downloader whose every video carries `captions` as its caption track
    pub fn with_captions(captions: impl Into<String>) -> Self {
        Self {
            captions: Some(captions.into()),
            ..Self::default()
        }
    }

    /// Downloader that finds no caption track
    pub fn without_captions() -> Self {
        Self::default()
    }

    pub fn failing_video(mut self) -> Self {
        self.fail_video = true;
        self
    }

    /// URLs requested so far, videos and caption tracks alike
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, url: &str) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
    }
}

#[async_trait]
impl VideoDownloader for MockDownloader {
    async fn download_video(&self, url: &str, output: &Path, _format: &str) -> Result<()> {
        self.record(url);
        if self.fail_video {
            return Err(anyhow!("scripted download failure for {}", url));
        }
        tokio::fs::write(output, b"source").await?;
        Ok(())
    }

    async fn download_subtitles(&self, url: &str, output_base: &Path, lang: &str) -> Result<PathBuf> {
        self.record(url);
        let captions = self
            .captions
            .as_ref()
            .ok_or_else(|| anyhow!("no '{}' caption track for {}", lang, url))?;

        let track = subtitle_track_path(output_base, lang);
        tokio::fs::write(&track, captions).await?;
        Ok(track)
    }
}
