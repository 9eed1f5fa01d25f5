/// Clipforge - short captioned clips from long-form video
///
/// Downloads a channel's latest videos, splits them into bounded segments,
/// asks an LLM for interesting cut windows, and renders captioned clips with
/// branded variants and SEO metadata ready for upload.

pub mod auth;
pub mod clips;
pub mod config;
pub mod errors;
pub mod feed;
pub mod layout;
pub mod llm;
pub mod media;
pub mod processing;
pub mod publish;
pub mod rendition;
pub mod retry;
pub mod segments;
pub mod state;
pub mod subtitles;

// Re-export main types for easy access
pub use crate::auth::{CredentialStore, FileCredentialStore, Token};
pub use crate::clips::{CutMaterializer, MaterializedCut};
pub use crate::config::{Channel, Config, ConfigBuilder};
pub use crate::errors::{PipelineError, PipelineResult};
pub use crate::feed::{FeedClient, VideoRef};
pub use crate::llm::{CutProposer, CutWindow, LLMConfig, LLMProvider, MetadataGenerator, VideoMetadata};
pub use crate::media::{FfmpegTool, MediaTool, VideoDownloader, YtDlp};
pub use crate::processing::{ChannelProcessor, ProcessingResult, VideoProcessingResult};
pub use crate::publish::{Publisher, UploadRequest, YouTubePublisher};
pub use crate::rendition::{RenditionPipeline, RenditionVariant};
pub use crate::retry::RetryPolicy;
pub use crate::segments::{MediaSegment, SegmentPlanner};
pub use crate::state::{VideoProcessingState, VideoStage};
pub use crate::subtitles::{SRTFormatter, SubtitleEntry};
