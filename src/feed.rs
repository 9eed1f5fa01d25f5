//! Discovery of a channel's latest videos through its Atom feed

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Channel;
use crate::errors::{PipelineError, PipelineResult};

pub const FEED_BASE_URL: &str = "https://www.youtube.com/feeds/videos.xml";
pub const WATCH_BASE_URL: &str = "https://www.youtube.com/watch";

/// A video discovered for a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRef {
    pub id: String,
    pub title: String,
}

impl VideoRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }

    pub fn watch_url(&self) -> String {
        format!("{}?v={}", WATCH_BASE_URL, self.id)
    }
}

/// Video identifier of a feed entry id such as `yt:video:abc123`
pub fn extract_video_id(entry_id: &str) -> &str {
    let entry_id = entry_id.trim();
    entry_id.rsplit(':').next().unwrap_or(entry_id)
}

/// Parse an Atom feed into videos, in feed order
pub fn parse_feed(xml: &str) -> PipelineResult<Vec<VideoRef>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| PipelineError::Feed(format!("XML parse error: {}", e)))?;

    let root = doc.root_element();
    if root.tag_name().name() != "feed" {
        return Err(PipelineError::Feed("Root element must be <feed>".to_string()));
    }

    let videos = root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "entry")
        .filter_map(|entry| {
            let child_text = |name: &str| {
                entry
                    .children()
                    .find(|n| n.is_element() && n.tag_name().name() == name)
                    .and_then(|n| n.text())
                    .map(|text| text.trim().to_string())
            };

            let id = child_text("id")?;
            let video_id = extract_video_id(&id);
            if video_id.is_empty() {
                return None;
            }
            Some(VideoRef::new(video_id, child_text("title").unwrap_or_default()))
        })
        .collect();

    Ok(videos)
}

/// Keep the first `limit` videos; zero keeps all
pub fn apply_limit(mut videos: Vec<VideoRef>, limit: usize) -> Vec<VideoRef> {
    if limit > 0 && limit < videos.len() {
        videos.truncate(limit);
    }
    videos
}

/// Fetches channel feeds
pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
}

impl FeedClient {
    pub fn new() -> PipelineResult<Self> {
        Self::with_base_url(FEED_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn feed_url(&self, channel_id: &str) -> String {
        format!(
            "{}?channel_id={}",
            self.base_url,
            urlencoding::encode(channel_id)
        )
    }

    /// Latest videos of a channel, honouring its `video_limit`.
    ///
    /// A `v=<id>` channel id names a single video and needs no request.
    pub async fn latest_videos(&self, channel: &Channel) -> PipelineResult<Vec<VideoRef>> {
        if let Some(video_id) = channel.single_video_id() {
            info!("🎯 Processing specific video: {}", video_id);
            return Ok(vec![VideoRef::new(video_id, "")]);
        }

        let url = self.feed_url(&channel.channel_id);
        debug!("Fetching feed {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::Feed(format!(
                "feed request for '{}' returned {}",
                channel.name,
                response.status()
            )));
        }

        let body = response.text().await?;
        let videos = parse_feed(&body)?;
        if videos.is_empty() {
            return Err(PipelineError::Feed(format!(
                "no videos found for channel '{}'",
                channel.name
            )));
        }

        let total = videos.len();
        let videos = apply_limit(videos, channel.video_limit);
        info!(
            "📺 {} videos in feed of '{}', processing {}",
            total,
            channel.name,
            videos.len()
        );

        Ok(videos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns="http://www.w3.org/2005/Atom">
  <id>yt:channel:UC123</id>
  <title>Channel</title>
  <entry>
    <id>yt:video:aaa111</id>
    <yt:videoId>aaa111</yt:videoId>
    <title>Newest upload</title>
  </entry>
  <entry>
    <id>yt:video:bbb222</id>
    <title>Older upload</title>
  </entry>
  <entry>
    <id>yt:video:ccc333</id>
    <title>Oldest upload</title>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() {
        let videos = parse_feed(FEED).unwrap();

        assert_eq!(videos.len(), 3);
        assert_eq!(videos[0], VideoRef::new("aaa111", "Newest upload"));
        assert_eq!(videos[2].id, "ccc333");
    }

    #[test]
    fn test_extract_video_id() {
        assert_eq!(extract_video_id("yt:video:abc123"), "abc123");
        assert_eq!(extract_video_id("abc123"), "abc123");
        assert_eq!(extract_video_id(" yt:video:x \n"), "x");
    }

    #[test]
    fn test_limit() {
        let videos = parse_feed(FEED).unwrap();
        assert_eq!(apply_limit(videos.clone(), 0).len(), 3);
        assert_eq!(apply_limit(videos.clone(), 2).len(), 2);
        assert_eq!(apply_limit(videos, 10).len(), 3);
    }

    #[test]
    fn test_malformed_feed() {
        assert!(matches!(parse_feed("<feed"), Err(PipelineError::Feed(_))));
        assert!(matches!(parse_feed("<rss></rss>"), Err(PipelineError::Feed(_))));
        assert!(parse_feed("<feed></feed>").unwrap().is_empty());
    }

    #[test]
    fn test_urls() {
        let client = FeedClient::new().unwrap();
        assert_eq!(
            client.feed_url("UC123"),
            "https://www.youtube.com/feeds/videos.xml?channel_id=UC123"
        );
        assert_eq!(
            VideoRef::new("abc", "").watch_url(),
            "https://www.youtube.com/watch?v=abc"
        );
    }

    #[tokio::test]
    async fn test_single_video_channel_needs_no_request() {
        let client = FeedClient::with_base_url("http://127.0.0.1:9/unreachable").unwrap();
        let channel = Channel {
            id: "c".to_string(),
            channel_id: "v=abc123".to_string(),
            ..Channel::default()
        };

        let videos = client.latest_videos(&channel).await.unwrap();
        assert_eq!(videos, vec![VideoRef::new("abc123", "")]);
    }
}
