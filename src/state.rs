use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::publish::PublishedVariant;

/// Stages a video moves through
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VideoStage {
    /// Found in the channel feed
    Discovered,

    /// Source video and caption track are on disk
    Downloaded,

    /// Source split into bounded segments
    Segmented,

    /// Cut windows returned for a segment
    CutsProposed,

    /// Clips and captions written for a segment
    Materialized,

    /// Template variants rendered for a segment
    Rendered,

    /// Publishable variants sent to the target
    Uploaded,

    Completed,
    Skipped,
    Failed,
}

impl VideoStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStage::Completed | VideoStage::Skipped | VideoStage::Failed)
    }

    /// Stages loop once per segment between `Segmented` and `Uploaded`
    pub fn can_transition(&self, next: VideoStage) -> bool {
        use VideoStage::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }

        match (self, next) {
            (Discovered, Downloaded) | (Discovered, Skipped) => true,
            (Downloaded, Segmented) | (Downloaded, Completed) => true,
            (Segmented | CutsProposed | Materialized | Rendered | Uploaded, CutsProposed) => true,
            (Segmented | CutsProposed | Materialized | Rendered | Uploaded, Completed) => true,
            (CutsProposed, Materialized) => true,
            (Materialized, Rendered) => true,
            (Rendered, Uploaded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VideoStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    pub stage: VideoStage,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Outcome of one cut, kept for the run report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CutRecord {
    pub segment: u32,
    pub title: String,
    pub clip: PathBuf,
    pub captioned: bool,
    pub has_metadata: bool,
    pub variants: Vec<String>,
    #[serde(default)]
    pub uploads: Vec<PublishedVariant>,
}

/// Processing history of a single video, stored as `state.json` in its
/// directory. Informational only: the directory itself marks completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoProcessingState {
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    pub channel_id: String,
    pub current_stage: VideoStage,
    pub history: Vec<StageRecord>,
    #[serde(default)]
    pub segments: usize,
    #[serde(default)]
    pub cuts: Vec<CutRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl VideoProcessingState {
    pub fn new(channel_id: &str, video_id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            video_id: video_id.to_string(),
            title: title.to_string(),
            channel_id: channel_id.to_string(),
            current_stage: VideoStage::Discovered,
            history: vec![StageRecord {
                stage: VideoStage::Discovered,
                at: now,
                note: None,
            }],
            segments: 0,
            cuts: Vec::new(),
            error: None,
            last_updated: now,
        }
    }

    /// Move to `stage`, ignoring transitions the stage graph does not allow
    pub fn advance(&mut self, stage: VideoStage, note: Option<String>) -> bool {
        if !self.current_stage.can_transition(stage) {
            warn!(
                "Ignoring transition {} -> {} for video {}",
                self.current_stage, stage, self.video_id
            );
            return false;
        }

        let now = Utc::now();
        self.current_stage = stage;
        self.history.push(StageRecord { stage, at: now, note });
        self.last_updated = now;
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.advance(VideoStage::Failed, Some(error.clone()));
        self.error = Some(error);
    }

    pub fn reached(&self, stage: VideoStage) -> bool {
        self.history.iter().any(|record| record.stage == stage)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json_content = serde_json::to_string_pretty(self)?;
        fs::write(path, json_content)
            .await
            .with_context(|| format!("Failed to write state file {}", path.display()))?;
        debug!("💾 Saved state for video {}", self.video_id);
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let state = serde_json::from_str(&content)?;
        Ok(state)
    }
}
