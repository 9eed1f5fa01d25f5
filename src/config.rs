use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{PipelineError, PipelineResult};
use crate::llm::{LLMConfig, LLMProvider};
use crate::retry::RetryPolicy;

/// Configuration for the clip pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External tool locations
    pub tools: ToolsConfig,

    /// Semantic service settings
    pub llm: LLMConfig,

    /// Retry policy for semantic service calls
    pub retry: RetryPolicy,

    /// Source segmentation
    pub segments: SegmentsConfig,

    /// Encoding settings for every re-encoded artifact
    pub encoding: EncodingConfig,

    /// Publishing credentials
    pub auth: AuthConfig,

    /// Concurrency settings
    pub performance: PerformanceConfig,

    /// Channels to process
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ytdlp: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            ytdlp: PathBuf::from("yt-dlp"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentsConfig {
    /// Longest segment cut from a source, in seconds
    pub bound_seconds: u64,
}

impl Default for SegmentsConfig {
    fn default() -> Self {
        Self { bound_seconds: 1200 }
    }
}

impl SegmentsConfig {
    pub fn bound(&self) -> Duration {
        Duration::from_secs(self.bound_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub tune: String,
    pub crf: u32,
    /// Encoder threads, 0 lets the encoder decide
    pub threads: u32,
    /// `force_style` of the caption burn-in
    pub subtitle_style: String,
    /// Width the cut is scaled to on branded templates
    pub overlay_width: u32,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "ultrafast".to_string(),
            tune: "fastdecode".to_string(),
            crf: 28,
            threads: 0,
            subtitle_style: "FontSize=22,Alignment=2".to_string(),
            overlay_width: 1080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Installed-app client secret downloaded from the provider console
    pub client_secret_file: PathBuf,
    /// Where the access token is persisted
    pub token_file: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_secret_file: PathBuf::from("credentials.json"),
            token_file: PathBuf::from("youtube-token.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Videos of one channel processed at the same time
    pub max_parallel_videos: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_parallel_videos: 1,
        }
    }
}

/// A source channel and the branding of its clips
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Feed identifier, or `v=<video id>` for a single video
    #[serde(default, alias = "Channel_id")]
    pub channel_id: String,
    #[serde(default)]
    pub url: String,
    pub folder: PathBuf,
    #[serde(default, deserialize_with = "non_empty_path")]
    pub video_base_vertical: Option<PathBuf>,
    #[serde(default, deserialize_with = "non_empty_path")]
    pub video_base_horizontal: Option<PathBuf>,
    #[serde(default, deserialize_with = "non_empty_path")]
    pub video_cover: Option<PathBuf>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub topics: String,
    #[serde(default = "default_excerpts")]
    pub excerpts: u32,
    /// Target cut length in minutes
    #[serde(default = "default_stretch_time")]
    pub stretch_time: u32,
    /// Newest videos taken from the feed, 0 for all
    #[serde(default)]
    pub video_limit: usize,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub font: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub font_size: Option<u32>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub font_color: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub font_effect: Option<String>,
    #[serde(default)]
    pub upload_to_youtube: bool,
    #[serde(default = "default_ytdlp_format")]
    pub ytdlp_format: String,
    #[serde(default = "default_subtitle_lang")]
    pub subtitle_lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<String>,
}

fn default_excerpts() -> u32 {
    3
}

fn default_stretch_time() -> u32 {
    1
}

fn default_ytdlp_format() -> String {
    "best".to_string()
}

fn default_subtitle_lang() -> String {
    "pt".to_string()
}

fn non_empty_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn non_empty_path<'de, D>(deserializer: D) -> std::result::Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(non_empty_string(deserializer)?.map(PathBuf::from))
}

/// Accept `36`, `"36"` or `""`
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(u32),
        Text(String),
    }

    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n)),
        Some(NumberOrText::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(NumberOrText::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid number '{}'", text))),
    }
}

impl Channel {
    /// Whether `channel_id` names one video instead of a feed
    pub fn single_video_id(&self) -> Option<&str> {
        self.channel_id.strip_prefix("v=").filter(|id| !id.is_empty())
    }
}

/// Flat JSON layout of older installations
#[derive(Debug, Deserialize)]
struct LegacyConfig {
    #[serde(default)]
    ytdlp: String,
    #[serde(default)]
    ffmpeg: String,
    #[serde(default)]
    ffprobe: String,
    #[serde(default)]
    openai: LegacyOpenAI,
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyOpenAI {
    #[serde(default)]
    key: String,
    #[serde(default)]
    model: String,
}

impl From<LegacyConfig> for Config {
    fn from(legacy: LegacyConfig) -> Self {
        let mut config = Config::default();
        let tool = |value: String, fallback: PathBuf| {
            if value.trim().is_empty() {
                fallback
            } else {
                PathBuf::from(value)
            }
        };

        config.tools = ToolsConfig {
            ffmpeg: tool(legacy.ffmpeg, config.tools.ffmpeg.clone()),
            ffprobe: tool(legacy.ffprobe, config.tools.ffprobe.clone()),
            ytdlp: tool(legacy.ytdlp, config.tools.ytdlp.clone()),
        };
        if !legacy.openai.key.is_empty() {
            config.llm.api_key = Some(legacy.openai.key);
        }
        if !legacy.openai.model.is_empty() {
            config.llm.model = legacy.openai.model;
        }
        config.channels = legacy.channels;
        config
    }
}

const SEARCH_PATHS: [&str; 3] = [
    "clipforge.toml",
    "config/clipforge.toml",
    "~/.config/clipforge/config.toml",
];

const LEGACY_PATH: &str = "config.json";

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

impl Config {
    /// Load configuration from `explicit`, or the first file found in the
    /// search paths, then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => Self::search()?,
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn search() -> Result<Self> {
        let candidates = SEARCH_PATHS
            .iter()
            .map(|path| expand_home(path))
            .chain(std::iter::once(PathBuf::from(LEGACY_PATH)));

        for path in candidates {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Err(anyhow!(
            "No configuration file found (looked for {} and {})",
            SEARCH_PATHS.join(", "),
            LEGACY_PATH
        ))
    }

    /// Load one file; `.json` files use the legacy flat layout
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_legacy_json(&content)
        } else {
            Self::from_toml(&content)
        }
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_legacy_json(content: &str) -> Result<Self> {
        let legacy: LegacyConfig = serde_json::from_str(content)?;
        Ok(legacy.into())
    }

    /// Apply `CLIPFORGE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = lookup("CLIPFORGE_OPENAI_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = lookup("CLIPFORGE_MODEL") {
            self.llm.model = model;
        }
        if let Some(ffmpeg) = lookup("CLIPFORGE_FFMPEG") {
            self.tools.ffmpeg = PathBuf::from(ffmpeg);
        }
        if let Some(ffprobe) = lookup("CLIPFORGE_FFPROBE") {
            self.tools.ffprobe = PathBuf::from(ffprobe);
        }
        if let Some(ytdlp) = lookup("CLIPFORGE_YTDLP") {
            self.tools.ytdlp = PathBuf::from(ytdlp);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.segments.bound_seconds == 0 {
            return Err(PipelineError::Config(
                "segments.bound_seconds must be greater than 0".to_string(),
            ));
        }

        if self.performance.max_parallel_videos == 0 {
            return Err(PipelineError::Config(
                "performance.max_parallel_videos must be greater than 0".to_string(),
            ));
        }

        let cpus = num_cpus::get();
        if self.performance.max_parallel_videos > cpus {
            tracing::warn!(
                "performance.max_parallel_videos ({}) exceeds the {} available cores",
                self.performance.max_parallel_videos,
                cpus
            );
        }

        let has_key = self
            .llm
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        if self.llm.provider == LLMProvider::OpenAI && !has_key {
            return Err(PipelineError::Config(
                "an API key is required for the OpenAI provider (llm.api_key or CLIPFORGE_OPENAI_KEY)"
                    .to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.id.trim().is_empty() {
                return Err(PipelineError::Config("channel with an empty id".to_string()));
            }
            if !seen.insert(channel.id.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate channel id '{}'",
                    channel.id
                )));
            }
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    pub fn find_channel(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.id == id)
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Clip pipeline configuration:\n\
            - Channels: {}\n\
            - LLM: {:?} / {}\n\
            - Retry: {} attempts, base {}ms\n\
            - Segment bound: {}s\n\
            - Parallel videos: {}",
            self.channels.len(),
            self.llm.provider,
            self.llm.model,
            self.retry.max_attempts,
            self.retry.base_delay_ms,
            self.segments.bound_seconds,
            self.performance.max_parallel_videos
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.llm.api_key = Some(api_key.into());
        self
    }

    pub fn with_llm(mut self, llm: LLMConfig) -> Self {
        self.config.llm = llm;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn with_segment_bound(mut self, seconds: u64) -> Self {
        self.config.segments.bound_seconds = seconds;
        self
    }

    pub fn with_tools(mut self, tools: ToolsConfig) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn with_max_parallel_videos(mut self, videos: usize) -> Self {
        self.config.performance.max_parallel_videos = videos;
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.config.channels.push(channel);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
