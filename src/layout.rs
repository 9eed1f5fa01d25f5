//! On-disk layout of one processed video

use std::path::{Path, PathBuf};

use crate::errors::PipelineResult;

pub const HORIZONTAL_DIR: &str = "horizontal";
pub const COVERS_DIR: &str = "covers";
pub const VERTICAL_DIR: &str = "vertical";
pub const HORIZONTAL_PUBLISHABLE_DIR: &str = "horizontal-yt";
pub const STATE_FILE: &str = "state.json";

/// Paths of every artifact produced for a video under `<folder>/<video id>`.
///
/// The presence of the root directory marks the video as processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoLayout {
    root: PathBuf,
    video_id: String,
}

impl VideoLayout {
    pub fn new(channel_folder: impl AsRef<Path>, video_id: &str) -> Self {
        Self {
            root: channel_folder.as_ref().join(video_id),
            video_id: video_id.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn source_video(&self) -> PathBuf {
        self.root.join(format!("{}.mp4", self.video_id))
    }

    /// Output base handed to the caption downloader
    pub fn subtitle_base(&self) -> PathBuf {
        self.root.join(format!("{}.srt", self.video_id))
    }

    pub fn caption_track(&self, lang: &str) -> PathBuf {
        self.root.join(format!("{}.srt.{}.vtt", self.video_id, lang))
    }

    pub fn horizontal_clip(&self, stem: &str) -> PathBuf {
        self.root.join(HORIZONTAL_DIR).join(format!("{}.mp4", stem))
    }

    pub fn metadata_file(&self, stem: &str) -> PathBuf {
        self.root.join(HORIZONTAL_DIR).join(format!("{}.json", stem))
    }

    pub fn cover(&self, stem: &str) -> PathBuf {
        self.root.join(COVERS_DIR).join(format!("{}.jpg", stem))
    }

    pub fn vertical(&self, stem: &str) -> PathBuf {
        self.root.join(VERTICAL_DIR).join(format!("{}.mp4", stem))
    }

    pub fn horizontal_publishable(&self, stem: &str) -> PathBuf {
        self.root
            .join(HORIZONTAL_PUBLISHABLE_DIR)
            .join(format!("{}.mp4", stem))
    }

    /// Working slice for one cut; unique per segment and cut stem
    pub fn temp_clip(&self, segment: u32, stem: &str) -> PathBuf {
        self.root.join(format!("temp_s{}_{}.mp4", segment, stem))
    }

    pub fn temp_captions(&self, segment: u32, stem: &str) -> PathBuf {
        self.root.join(format!("temp_s{}_{}.srt", segment, stem))
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn exists(&self) -> bool {
        self.root.exists()
    }

    /// Create the video directory and the horizontal output directory
    pub async fn create(&self) -> PipelineResult<()> {
        tokio::fs::create_dir_all(self.root.join(HORIZONTAL_DIR)).await?;
        Ok(())
    }

    /// Remove everything produced for the video
    pub async fn reset(&self) -> PipelineResult<()> {
        if self.root.exists() {
            tokio::fs::remove_dir_all(&self.root).await?;
        }
        Ok(())
    }
}
