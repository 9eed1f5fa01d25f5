//! Branded variants derived from a materialized cut.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clips::MaterializedCut;
use crate::config::Channel;
use crate::errors::PipelineResult;
use crate::layout::VideoLayout;
use crate::media::{CoverRequest, MediaTool, OverlayRequest};

pub const DEFAULT_FONT_SIZE: u32 = 36;
pub const DEFAULT_FONT_COLOR: &str = "white";
const WORDS_PER_LINE: usize = 3;

/// Output variants of a cut
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenditionVariant {
    /// Still frame of the cover template with the title on it
    Cover,
    /// Cut centred on the vertical template
    Vertical,
    /// The captioned cut itself
    Horizontal,
    /// Cut centred on the horizontal template, the one published
    HorizontalPublishable,
}

impl RenditionVariant {
    pub fn label(&self) -> &'static str {
        match self {
            RenditionVariant::Cover => "cover",
            RenditionVariant::Vertical => "vertical",
            RenditionVariant::Horizontal => "horizontal",
            RenditionVariant::HorizontalPublishable => "horizontal-publishable",
        }
    }
}

impl fmt::Display for RenditionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Templates and title styling of a channel
#[derive(Debug, Clone, PartialEq)]
pub struct Branding {
    pub cover_template: Option<PathBuf>,
    pub vertical_template: Option<PathBuf>,
    pub horizontal_template: Option<PathBuf>,
    pub font_file: Option<String>,
    pub font_size: u32,
    pub font_color: String,
    pub font_effect: Option<String>,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            cover_template: None,
            vertical_template: None,
            horizontal_template: None,
            font_file: None,
            font_size: DEFAULT_FONT_SIZE,
            font_color: DEFAULT_FONT_COLOR.to_string(),
            font_effect: None,
        }
    }
}

impl Branding {
    pub fn from_channel(channel: &Channel) -> Self {
        Self {
            cover_template: channel.video_cover.clone(),
            vertical_template: channel.video_base_vertical.clone(),
            horizontal_template: channel.video_base_horizontal.clone(),
            font_file: channel.font.clone(),
            font_size: channel.font_size.unwrap_or(DEFAULT_FONT_SIZE),
            font_color: channel
                .font_color
                .clone()
                .unwrap_or_else(|| DEFAULT_FONT_COLOR.to_string()),
            font_effect: channel.font_effect.clone(),
        }
    }
}

/// Break a title onto a new line every three words
pub fn wrap_title(title: &str) -> String {
    let words: Vec<&str> = title.split_whitespace().collect();
    words
        .chunks(WORDS_PER_LINE)
        .map(|line| line.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Artifacts produced for one cut
#[derive(Debug, Clone, PartialEq)]
pub struct RenditionSet {
    pub stem: String,
    pub horizontal: PathBuf,
    pub cover: Option<PathBuf>,
    pub vertical: Option<PathBuf>,
    pub horizontal_publishable: Option<PathBuf>,
    /// Variants whose template was configured but whose rendering failed
    pub failures: Vec<(RenditionVariant, String)>,
}

impl RenditionSet {
    pub fn get(&self, variant: RenditionVariant) -> Option<&Path> {
        match variant {
            RenditionVariant::Cover => self.cover.as_deref(),
            RenditionVariant::Vertical => self.vertical.as_deref(),
            RenditionVariant::Horizontal => Some(self.horizontal.as_path()),
            RenditionVariant::HorizontalPublishable => self.horizontal_publishable.as_deref(),
        }
    }

    pub fn produced(&self) -> Vec<RenditionVariant> {
        [
            RenditionVariant::Horizontal,
            RenditionVariant::Cover,
            RenditionVariant::Vertical,
            RenditionVariant::HorizontalPublishable,
        ]
        .into_iter()
        .filter(|variant| self.get(*variant).is_some())
        .collect()
    }
}

/// Renders every configured variant of a cut
pub struct RenditionPipeline {
    media: Arc<dyn MediaTool>,
    branding: Branding,
}

impl RenditionPipeline {
    pub fn new(media: Arc<dyn MediaTool>, branding: Branding) -> Self {
        Self { media, branding }
    }

    /// Render each variant with a configured template; failures are recorded
    /// per variant and never stop the others
    pub async fn render(&self, layout: &VideoLayout, cut: &MaterializedCut) -> RenditionSet {
        let mut set = RenditionSet {
            stem: cut.stem.clone(),
            horizontal: cut.clip_path.clone(),
            cover: None,
            vertical: None,
            horizontal_publishable: None,
            failures: Vec::new(),
        };

        if let Some(template) = &self.branding.cover_template {
            let output = layout.cover(&cut.stem);
            let request = CoverRequest {
                template: template.clone(),
                output: output.clone(),
                text: wrap_title(&cut.title),
                font_file: self.branding.font_file.clone(),
                font_size: self.branding.font_size,
                font_color: self.branding.font_color.clone(),
                font_effect: self.branding.font_effect.clone(),
            };
            let result = self.run(&output, self.media.render_cover(&request)).await;
            set.cover = self.settle(RenditionVariant::Cover, cut, output, result, &mut set.failures);
        }

        if let Some(template) = &self.branding.vertical_template {
            let output = layout.vertical(&cut.stem);
            let request = OverlayRequest {
                background: template.clone(),
                foreground: cut.clip_path.clone(),
                output: output.clone(),
            };
            let result = self.run(&output, self.media.compose_overlay(&request)).await;
            set.vertical = self.settle(RenditionVariant::Vertical, cut, output, result, &mut set.failures);
        }

        if let Some(template) = &self.branding.horizontal_template {
            let output = layout.horizontal_publishable(&cut.stem);
            let request = OverlayRequest {
                background: template.clone(),
                foreground: cut.clip_path.clone(),
                output: output.clone(),
            };
            let result = self.run(&output, self.media.compose_overlay(&request)).await;
            set.horizontal_publishable = self.settle(
                RenditionVariant::HorizontalPublishable,
                cut,
                output,
                result,
                &mut set.failures,
            );
        }

        set
    }

    async fn run<F>(&self, output: &Path, operation: F) -> PipelineResult<()>
    where
        F: std::future::Future<Output = PipelineResult<()>>,
    {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        operation.await
    }

    fn settle(
        &self,
        variant: RenditionVariant,
        cut: &MaterializedCut,
        output: PathBuf,
        result: PipelineResult<()>,
        failures: &mut Vec<(RenditionVariant, String)>,
    ) -> Option<PathBuf> {
        match result {
            Ok(()) => {
                info!("🎨 {} variant of '{}' ready", variant, cut.title);
                Some(output)
            }
            Err(e) => {
                warn!(
                    "{} variant of '{}' (segment {}) failed: {}",
                    variant, cut.title, cut.segment_index, e
                );
                failures.push((variant, e.to_string()));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CutWindow;
    use crate::media::mock::{MediaCall, MockMediaTool};
    use tempfile::TempDir;

    fn cut(layout: &VideoLayout) -> MaterializedCut {
        MaterializedCut {
            title: "How to pass the closed guard".to_string(),
            stem: "How to pass the closed guard".to_string(),
            window: CutWindow::new("How to pass the closed guard", 0, 60),
            segment_index: 1,
            clip_path: layout.horizontal_clip("How to pass the closed guard"),
            captioned: true,
            metadata: None,
        }
    }

    fn branded() -> Branding {
        Branding {
            cover_template: Some(PathBuf::from("/assets/cover.png")),
            vertical_template: Some(PathBuf::from("/assets/vertical.png")),
            horizontal_template: Some(PathBuf::from("/assets/horizontal.png")),
            ..Branding::default()
        }
    }

    #[test]
    fn test_wrap_title() {
        assert_eq!(wrap_title("How to pass the closed guard"), "How to pass\nthe closed guard");
        assert_eq!(wrap_title("one two"), "one two");
        assert_eq!(wrap_title("a b c d"), "a b c\nd");
        assert_eq!(wrap_title(""), "");
    }

    #[test]
    fn test_branding_defaults() {
        let channel = Channel {
            id: "c".to_string(),
            font_color: Some("yellow".to_string()),
            ..Channel::default()
        };
        let branding = Branding::from_channel(&channel);

        assert_eq!(branding.font_size, DEFAULT_FONT_SIZE);
        assert_eq!(branding.font_color, "yellow");
        assert!(branding.cover_template.is_none());
    }

    #[tokio::test]
    async fn test_all_variants_rendered() {
        let dir = TempDir::new().unwrap();
        let layout = VideoLayout::new(dir.path(), "vid");
        let media = Arc::new(MockMediaTool::new());
        let pipeline = RenditionPipeline::new(media.clone(), branded());

        let set = pipeline.render(&layout, &cut(&layout)).await;

        assert_eq!(set.produced().len(), 4);
        assert!(set.failures.is_empty());
        assert!(layout.cover("How to pass the closed guard").exists());
        assert!(layout.vertical("How to pass the closed guard").exists());
        assert!(layout.horizontal_publishable("How to pass the closed guard").exists());

        let cover = media
            .calls()
            .into_iter()
            .find_map(|call| match call {
                MediaCall::Cover(request) => Some(request),
                _ => None,
            })
            .unwrap();
        assert_eq!(cover.text, "How to pass\nthe closed guard");
        assert_eq!(cover.font_size, 36);
        assert_eq!(cover.font_color, "white");
    }

    #[tokio::test]
    async fn test_variant_failure_is_isolated() {
        let dir = TempDir::new().unwrap();
        let layout = VideoLayout::new(dir.path(), "vid");
        let media = Arc::new(MockMediaTool::new().failing_output("vertical"));
        let pipeline = RenditionPipeline::new(media, branded());

        let set = pipeline.render(&layout, &cut(&layout)).await;

        assert!(set.vertical.is_none());
        assert!(set.cover.is_some());
        assert!(set.horizontal_publishable.is_some());
        assert_eq!(set.failures.len(), 1);
        assert_eq!(set.failures[0].0, RenditionVariant::Vertical);
    }

    #[tokio::test]
    async fn test_unconfigured_templates_are_skipped() {
        let dir = TempDir::new().unwrap();
        let layout = VideoLayout::new(dir.path(), "vid");
        let media = Arc::new(MockMediaTool::new());
        let pipeline = RenditionPipeline::new(media.clone(), Branding::default());

        let set = pipeline.render(&layout, &cut(&layout)).await;

        assert_eq!(set.produced(), vec![RenditionVariant::Horizontal]);
        assert!(media.calls().is_empty());
    }
}
