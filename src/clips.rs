//! Turning proposed cut windows into captioned clip files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{PipelineError, PipelineResult};
use crate::layout::VideoLayout;
use crate::llm::{CutWindow, MetadataGenerator, VideoMetadata};
use crate::media::{MediaTool, SliceMode, SliceRequest};
use crate::segments::MediaSegment;
use crate::subtitles::{select_window, transcript_within, SRTFormatter};

const MAX_STEM_CHARS: usize = 120;

/// A cut that reached its final horizontal artifact
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedCut {
    pub title: String,
    /// Filesystem-safe name shared by every artifact of the cut
    pub stem: String,
    pub window: CutWindow,
    pub segment_index: u32,
    pub clip_path: PathBuf,
    /// Whether captions were burned into `clip_path`
    pub captioned: bool,
    pub metadata: Option<VideoMetadata>,
}

/// Map a cut title onto a filesystem-safe, never empty file stem
pub fn safe_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed: String = collapsed
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();
    let trimmed = trimmed.trim_end().to_string();

    if trimmed.is_empty() {
        "cut".to_string()
    } else {
        trimmed
    }
}

/// Claim a stem not used yet by another cut of the same video
pub fn unique_stem(used: &mut HashSet<String>, title: &str) -> String {
    let base = safe_title(title);
    let mut candidate = base.clone();
    let mut suffix = 2;

    while !used.insert(candidate.to_lowercase()) {
        candidate = format!("{} ({})", base, suffix);
        suffix += 1;
    }

    candidate
}

/// Check a window against the real duration of its segment
pub fn validate_window(window: &CutWindow, segment_duration: Duration) -> PipelineResult<()> {
    let invalid = window.begin_offset() > segment_duration
        || window.end_offset() > segment_duration
        || window.end <= window.begin;

    if invalid {
        return Err(PipelineError::Validation {
            title: window.title.clone(),
            begin: window.begin,
            end: window.end,
            duration: segment_duration,
        });
    }
    Ok(())
}

/// Extracts clip files for the cut windows of a segment
pub struct CutMaterializer {
    media: Arc<dyn MediaTool>,
    metadata: Option<Arc<MetadataGenerator>>,
}

impl CutMaterializer {
    pub fn new(media: Arc<dyn MediaTool>, metadata: Option<Arc<MetadataGenerator>>) -> Self {
        Self { media, metadata }
    }

    /// Materialize every valid cut of `segment`, in the order given.
    ///
    /// Invalid or failing cuts are logged and skipped. Only a failure to
    /// probe the segment itself is returned as an error.
    pub async fn materialize_segment(
        &self,
        layout: &VideoLayout,
        segment: &MediaSegment,
        cuts: &[CutWindow],
        topics: &str,
        used_stems: &mut HashSet<String>,
    ) -> PipelineResult<Vec<MaterializedCut>> {
        let segment_duration = self.media.probe_duration(&segment.media_path).await?;
        let mut materialized = Vec::new();

        for (position, window) in cuts.iter().enumerate() {
            info!(
                "✂️ Cut {}/{} of segment {}: '{}' [{}s, {}s)",
                position + 1,
                cuts.len(),
                segment.index,
                window.title,
                window.begin,
                window.end
            );

            if let Err(e) = validate_window(window, segment_duration) {
                warn!(
                    "Skipping cut of video {} segment {}: {}",
                    layout.video_id(),
                    segment.index,
                    e
                );
                continue;
            }

            let stem = unique_stem(used_stems, &window.title);
            match self
                .materialize_cut(layout, segment, window, &stem, topics)
                .await
            {
                Ok(cut) => materialized.push(cut),
                Err(e) => warn!(
                    "Cut '{}' of video {} segment {} failed at {}: {}",
                    window.title,
                    layout.video_id(),
                    segment.index,
                    e.kind(),
                    e
                ),
            }
        }

        Ok(materialized)
    }

    async fn materialize_cut(
        &self,
        layout: &VideoLayout,
        segment: &MediaSegment,
        window: &CutWindow,
        stem: &str,
        topics: &str,
    ) -> PipelineResult<MaterializedCut> {
        let temp_clip = layout.temp_clip(segment.index, stem);
        let temp_captions = layout.temp_captions(segment.index, stem);
        let clip_path = layout.horizontal_clip(stem);

        if let Some(parent) = clip_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let slice = SliceRequest {
            input: segment.media_path.clone(),
            output: temp_clip.clone(),
            start: window.begin_offset(),
            length: window.length(),
            mode: SliceMode::Reencode,
        };
        if let Err(e) = self.media.extract_slice(&slice).await {
            remove_quietly(&temp_clip).await;
            return Err(e);
        }

        let mut transcript = String::new();
        let mut captions_written = false;

        if let Some(track) = &segment.captions {
            let entries = select_window(&track.entries, window.begin_offset(), window.end_offset());
            transcript = transcript_within(&track.entries, window.begin_offset(), window.end_offset());

            if entries.is_empty() {
                debug!("No captions inside '{}'", window.title);
            } else {
                match SRTFormatter::save_to_file(&entries, &temp_captions).await {
                    Ok(()) => captions_written = true,
                    Err(e) => warn!(
                        "Cut '{}' continues without captions, writing {} failed: {}",
                        window.title,
                        temp_captions.display(),
                        e
                    ),
                }
            }
        }

        let captioned = if captions_written {
            match self
                .media
                .burn_captions(&temp_clip, &temp_captions, &clip_path)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "Burn-in for '{}' of video {} failed, keeping the uncaptioned slice: {}",
                        window.title,
                        layout.video_id(),
                        e
                    );
                    false
                }
            }
        } else {
            false
        };

        remove_quietly(&temp_captions).await;
        if captioned {
            remove_quietly(&temp_clip).await;
        } else if let Err(e) = tokio::fs::rename(&temp_clip, &clip_path).await {
            remove_quietly(&temp_clip).await;
            return Err(e.into());
        }

        let metadata = self
            .describe(layout, window, stem, &transcript, topics)
            .await;

        Ok(MaterializedCut {
            title: window.title.clone(),
            stem: stem.to_string(),
            window: window.clone(),
            segment_index: segment.index,
            clip_path,
            captioned,
            metadata,
        })
    }

    async fn describe(
        &self,
        layout: &VideoLayout,
        window: &CutWindow,
        stem: &str,
        transcript: &str,
        topics: &str,
    ) -> Option<VideoMetadata> {
        let generator = self.metadata.as_ref()?;
        if transcript.is_empty() {
            debug!("No transcript for '{}', skipping metadata", window.title);
            return None;
        }

        let metadata = generator.generate(&window.title, transcript, topics).await?;
        let path = layout.metadata_file(stem);

        match serde_json::to_string_pretty(&metadata) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&path, json).await {
                    warn!("Could not write {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("Could not serialize metadata for '{}': {}", window.title, e),
        }

        Some(metadata)
    }
}

async fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}
