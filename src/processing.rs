use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::clips::CutMaterializer;
use crate::config::{Channel, Config};
use crate::errors::PipelineResult;
use crate::feed::{FeedClient, VideoRef};
use crate::layout::VideoLayout;
use crate::llm::{CutProposer, MetadataGenerator, LLM};
use crate::media::{MediaTool, VideoDownloader};
use crate::publish::{publish_cut, Publisher};
use crate::rendition::{Branding, RenditionPipeline};
use crate::segments::{remove_derived, CaptionTrack, SegmentPlanner};
use crate::state::{CutRecord, VideoProcessingState, VideoStage};
use crate::subtitles::parse_timed_text;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProcessingStatus {
    Completed,
    Failed,
    Skipped,
}

/// Processing result for a single video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoProcessingResult {
    pub video_id: String,
    pub title: String,
    pub status: ProcessingStatus,
    pub final_stage: VideoStage,
    pub segments: usize,
    pub cuts: Vec<CutRecord>,
    pub error_message: Option<String>,
    pub processing_time: Duration,
}

impl VideoProcessingResult {
    fn from_state(state: VideoProcessingState, processing_time: Duration) -> Self {
        let status = match state.current_stage {
            VideoStage::Skipped => ProcessingStatus::Skipped,
            VideoStage::Failed => ProcessingStatus::Failed,
            _ => ProcessingStatus::Completed,
        };
        Self {
            video_id: state.video_id,
            title: state.title,
            status,
            final_stage: state.current_stage,
            segments: state.segments,
            cuts: state.cuts,
            error_message: state.error,
            processing_time,
        }
    }

    pub fn uploaded(&self) -> usize {
        self.cuts
            .iter()
            .flat_map(|cut| cut.uploads.iter())
            .filter(|upload| upload.video_id.is_some())
            .count()
    }
}

/// Run report of one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub channel_id: String,
    pub total: usize,
    pub successful: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_time: Duration,
    pub results: Vec<VideoProcessingResult>,
}

impl ProcessingResult {
    fn collect(channel_id: &str, results: Vec<VideoProcessingResult>, total_time: Duration) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        Self {
            channel_id: channel_id.to_string(),
            total: results.len(),
            successful: count(ProcessingStatus::Completed),
            skipped: count(ProcessingStatus::Skipped),
            failed: count(ProcessingStatus::Failed),
            total_time,
            results,
        }
    }

    pub fn log_summary(&self) {
        let cuts: usize = self.results.iter().map(|r| r.cuts.len()).sum();
        let uploads: usize = self.results.iter().map(|r| r.uploaded()).sum();

        info!("📊 Channel '{}' finished", self.channel_id);
        info!("   Videos: {} total, {} completed, {} skipped, {} failed",
              self.total, self.successful, self.skipped, self.failed);
        info!("   Cuts: {}, uploads: {}", cuts, uploads);
        info!("   Time: {:.2}s", self.total_time.as_secs_f64());

        for result in self.results.iter().filter(|r| r.status == ProcessingStatus::Failed) {
            warn!(
                "   ❌ {}: {} (retry with `exec {} -v={} --force`)",
                result.video_id,
                result.error_message.as_deref().unwrap_or("unknown error"),
                self.channel_id,
                result.video_id
            );
        }
    }
}

/// Runs the download, segment, cut, render and upload steps for the videos
/// of a channel
pub struct ChannelProcessor {
    config: Arc<Config>,
    media: Arc<dyn MediaTool>,
    downloader: Arc<dyn VideoDownloader>,
    cut_llm: Arc<dyn LLM>,
    metadata_llm: Arc<dyn LLM>,
    publisher: Option<Arc<dyn Publisher>>,
    feed: FeedClient,
}

impl ChannelProcessor {
    pub fn new(
        config: Arc<Config>,
        media: Arc<dyn MediaTool>,
        downloader: Arc<dyn VideoDownloader>,
        llm: Arc<dyn LLM>,
    ) -> PipelineResult<Self> {
        info!(
            "🔧 Initializing ChannelProcessor ({} parallel videos, {}s segments)",
            config.performance.max_parallel_videos.max(1),
            config.segments.bound_seconds
        );

        Ok(Self {
            config,
            media,
            downloader,
            metadata_llm: llm.clone(),
            cut_llm: llm,
            publisher: None,
            feed: FeedClient::new()?,
        })
    }

    /// Separate service for metadata requests, which use a shorter timeout
    pub fn with_metadata_llm(mut self, llm: Arc<dyn LLM>) -> Self {
        self.metadata_llm = llm;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_feed(mut self, feed: FeedClient) -> Self {
        self.feed = feed;
        self
    }

    /// Process every channel in order; a failing channel does not stop the rest
    pub async fn process_all(
        &self,
        channels: &[Channel],
        force: bool,
        only_video: Option<&str>,
    ) -> Vec<ProcessingResult> {
        let mut reports = Vec::with_capacity(channels.len());

        for channel in channels {
            match self.process_channel(channel, force, only_video).await {
                Ok(report) => reports.push(report),
                Err(e) => error!("Channel '{}' skipped: {}", channel.id, e),
            }
        }

        reports
    }

    /// Discover the channel's videos and process them
    pub async fn process_channel(
        &self,
        channel: &Channel,
        force: bool,
        only_video: Option<&str>,
    ) -> PipelineResult<ProcessingResult> {
        info!("🚀 Processing channel: {}", channel.name);

        let videos = match only_video {
            Some(video_id) => vec![VideoRef::new(video_id, "")],
            None => self.feed.latest_videos(channel).await?,
        };

        Ok(self.process_videos(channel, videos, force).await)
    }

    /// Process the given videos of a channel with bounded concurrency
    pub async fn process_videos(
        &self,
        channel: &Channel,
        videos: Vec<VideoRef>,
        force: bool,
    ) -> ProcessingResult {
        let start_time = Instant::now();
        let total_videos = videos.len();
        let parallel = self.config.performance.max_parallel_videos.max(1);

        let results: Vec<VideoProcessingResult> = stream::iter(videos.into_iter().enumerate())
            .map(|(index, video)| async move {
                info!("📹 Processing video {}/{}: {}", index + 1, total_videos, video.id);
                self.process_video(channel, &video, force).await
            })
            .buffered(parallel)
            .collect()
            .await;

        let report = ProcessingResult::collect(&channel.id, results, start_time.elapsed());
        report.log_summary();
        report
    }

    /// Process one video; the outcome is always reported, never raised
    pub async fn process_video(
        &self,
        channel: &Channel,
        video: &VideoRef,
        force: bool,
    ) -> VideoProcessingResult {
        let start_time = Instant::now();
        let layout = VideoLayout::new(&channel.folder, &video.id);
        let mut state = VideoProcessingState::new(&channel.id, &video.id, &video.title);

        if layout.exists() {
            if !force {
                info!("⏭️ Video {} already processed, skipping", video.id);
                state.advance(VideoStage::Skipped, None);
                return VideoProcessingResult::from_state(state, start_time.elapsed());
            }

            warn!("♻️ Reprocessing video {}, removing {}", video.id, layout.root().display());
            if let Err(e) = layout.reset().await {
                error!("Could not reset video {}: {}", video.id, e);
                state.fail(e.to_string());
                return VideoProcessingResult::from_state(state, start_time.elapsed());
            }
        }

        match self.run_video(channel, video, &layout, &mut state).await {
            Ok(()) => {
                let published = if state.reached(VideoStage::Uploaded) {
                    ", uploads sent"
                } else {
                    ""
                };
                state.advance(VideoStage::Completed, None);
                info!("✅ Video {} completed with {} cuts{}", video.id, state.cuts.len(), published);
            }
            Err(e) => {
                error!(
                    "Video {} failed after stage {}: {:#}",
                    video.id, state.current_stage, e
                );
                state.fail(format!("{:#}", e));
            }
        }

        if layout.exists() {
            if let Err(e) = state.save(&layout.state_file()).await {
                warn!("Could not save state for video {}: {}", video.id, e);
            }
        }

        VideoProcessingResult::from_state(state, start_time.elapsed())
    }

    async fn run_video(
        &self,
        channel: &Channel,
        video: &VideoRef,
        layout: &VideoLayout,
        state: &mut VideoProcessingState,
    ) -> Result<()> {
        layout
            .create()
            .await
            .with_context(|| format!("Failed to create {}", layout.root().display()))?;

        let source = layout.source_video();
        let url = video.watch_url();
        if source.exists() {
            debug!("Source {} already downloaded", source.display());
        } else {
            info!("⬇️ Downloading video {}", video.id);
            self.downloader
                .download_video(&url, &source, &channel.ytdlp_format)
                .await
                .context("Video download failed")?;
        }

        let captions = self.fetch_captions(channel, &url, layout).await;
        state.advance(VideoStage::Downloaded, None);

        let Some(captions) = captions else {
            warn!("No caption track for video {}, no cuts can be proposed", video.id);
            return Ok(());
        };

        let planner = SegmentPlanner::new(self.media.clone(), self.config.segments.bound());
        let segments = planner
            .split(&source, Some(&captions))
            .await
            .context("Segmentation failed")?;
        state.segments = segments.len();
        state.advance(VideoStage::Segmented, Some(format!("{} segments", segments.len())));

        let retry = self.config.retry;
        let proposer = CutProposer::new(self.cut_llm.clone(), retry);
        let generator = Arc::new(MetadataGenerator::new(self.metadata_llm.clone(), retry));
        let materializer = CutMaterializer::new(self.media.clone(), Some(generator));
        let renditions = RenditionPipeline::new(self.media.clone(), Branding::from_channel(channel));
        let publisher = self
            .publisher
            .as_ref()
            .filter(|_| channel.upload_to_youtube);

        let mut used_stems = HashSet::new();

        for segment in &segments {
            let Some(track) = &segment.captions else {
                warn!("Segment {} of video {} has no captions, skipped", segment.index, video.id);
                continue;
            };

            info!("🧠 Requesting cuts for segment {}/{}", segment.index, segments.len());
            let cuts = proposer
                .propose(&track.document, &channel.topics, channel.excerpts, channel.stretch_time)
                .await;
            state.advance(VideoStage::CutsProposed, Some(format!("segment {}: {} cuts", segment.index, cuts.len())));

            if cuts.is_empty() {
                info!("No interesting cuts found in segment {}", segment.index);
                continue;
            }

            let materialized = match materializer
                .materialize_segment(layout, segment, &cuts, &channel.topics, &mut used_stems)
                .await
            {
                Ok(materialized) => materialized,
                Err(e) => {
                    warn!(
                        "Segment {} of video {} skipped at {}: {}",
                        segment.index,
                        video.id,
                        e.kind(),
                        e
                    );
                    continue;
                }
            };
            state.advance(VideoStage::Materialized, Some(format!("segment {}", segment.index)));

            let mut uploaded_any = false;
            for cut in &materialized {
                let set = renditions.render(layout, cut).await;
                let uploads = match publisher {
                    Some(publisher) => publish_cut(publisher.as_ref(), cut, &set).await,
                    None => Vec::new(),
                };
                uploaded_any |= uploads.iter().any(|upload| upload.video_id.is_some());

                state.cuts.push(CutRecord {
                    segment: segment.index,
                    title: cut.title.clone(),
                    clip: cut.clip_path.clone(),
                    captioned: cut.captioned,
                    has_metadata: cut.metadata.is_some(),
                    variants: set.produced().iter().map(|v| v.to_string()).collect(),
                    uploads,
                });
            }

            state.advance(VideoStage::Rendered, Some(format!("segment {}", segment.index)));
            if uploaded_any {
                state.advance(VideoStage::Uploaded, Some(format!("segment {}", segment.index)));
            }
        }

        if segments.len() > 1 {
            info!("🧹 Cleaning up segment files of video {}", video.id);
        }
        remove_derived(&segments).await;

        Ok(())
    }

    /// Caption track of the video, downloading it when missing
    async fn fetch_captions(
        &self,
        channel: &Channel,
        url: &str,
        layout: &VideoLayout,
    ) -> Option<CaptionTrack> {
        let mut path = layout.caption_track(&channel.subtitle_lang);

        if !path.exists() {
            info!("⬇️ Downloading {} captions", channel.subtitle_lang);
            match self
                .downloader
                .download_subtitles(url, &layout.subtitle_base(), &channel.subtitle_lang)
                .await
            {
                Ok(written) => path = written,
                Err(e) => {
                    warn!("Caption download for {} failed: {:#}", layout.video_id(), e);
                    return None;
                }
            }
        }

        read_caption_track(&path).await
    }
}

async fn read_caption_track(path: &Path) -> Option<CaptionTrack> {
    let document = match tokio::fs::read_to_string(path).await {
        Ok(document) => document,
        Err(e) => {
            warn!("Could not read caption track {}: {}", path.display(), e);
            return None;
        }
    };

    let entries = parse_timed_text(&document);
    if entries.is_empty() {
        warn!("Caption track {} has no entries", path.display());
        return None;
    }

    debug!("Loaded {} caption entries from {}", entries.len(), path.display());
    Some(CaptionTrack {
        path: path.to_path_buf(),
        document,
        entries,
    })
}
