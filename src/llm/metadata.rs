use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cuts::json_object_slice;
use super::{ChatMessage, LLM};
use crate::retry::{attempt, RetryPolicy};

pub const MAX_DESCRIPTION_CHARS: usize = 250;
pub const MAX_TAGS: usize = 10;
pub const MAX_HASHTAGS: usize = 5;

/// SEO metadata for one cut
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VideoMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl VideoMetadata {
    /// Enforce the publishing limits on a reply from the service
    pub fn normalize(mut self, fallback_title: &str) -> Self {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            self.title = fallback_title.to_string();
        }

        self.description = self
            .description
            .trim()
            .chars()
            .take(MAX_DESCRIPTION_CHARS)
            .collect();

        self.tags = dedup_limited(
            self.tags
                .iter()
                .map(|tag| tag.trim().trim_start_matches('#').trim().to_string()),
            MAX_TAGS,
        );

        self.hashtags = dedup_limited(
            self.hashtags.iter().map(|tag| {
                let bare: String = tag
                    .trim()
                    .trim_start_matches('#')
                    .split_whitespace()
                    .collect();
                if bare.is_empty() {
                    bare
                } else {
                    format!("#{}", bare)
                }
            }),
            MAX_HASHTAGS,
        );

        self
    }
}

/// Keep first occurrences (case-insensitive), drop empties, cap the count
fn dedup_limited(values: impl Iterator<Item = String>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|value| !value.is_empty())
        .filter(|value| seen.insert(value.to_lowercase()))
        .take(limit)
        .collect()
}

/// Asks the LLM for SEO metadata of a cut transcript
pub struct MetadataGenerator {
    llm: Arc<dyn LLM>,
    retry: RetryPolicy,
}

impl MetadataGenerator {
    pub fn new(llm: Arc<dyn LLM>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Generate metadata for a cut, `None` once every attempt has failed
    pub async fn generate(&self, title: &str, transcript: &str, topics: &str) -> Option<VideoMetadata> {
        let messages = vec![
            ChatMessage::system(system_prompt(topics)),
            ChatMessage::user(user_prompt(title, transcript)),
        ];

        let result = attempt(&self.retry, |attempt_number| {
            let messages = messages.clone();
            async move {
                debug!("Requesting metadata for '{}' (attempt {})", title, attempt_number + 1);
                let response = self.llm.chat(messages).await?;
                parse_metadata(&response.content)
            }
        })
        .await;

        match result {
            Ok(metadata) => {
                let metadata = metadata.normalize(title);
                info!("🏷️ Metadata ready for '{}' ({} tags)", title, metadata.tags.len());
                Some(metadata)
            }
            Err(e) => {
                warn!("Metadata generation for '{}' gave up: {:#}", title, e);
                None
            }
        }
    }
}

/// Parse the metadata object from a message body
pub fn parse_metadata(content: &str) -> Result<VideoMetadata> {
    let body = json_object_slice(content).ok_or_else(|| anyhow!("no JSON object in reply"))?;
    serde_json::from_str(body).context("malformed metadata object")
}

fn system_prompt(topics: &str) -> String {
    format!(
        "You are an expert in SEO for YouTube, TikTok and Instagram videos.\n\
         Create optimised metadata for a video clip about \"{topics}\".\n\
         Generate an attractive title, an engaging description limited to {MAX_DESCRIPTION_CHARS} characters, \
         up to {MAX_TAGS} relevant tags and {MAX_HASHTAGS} popular hashtags.\n\
         \n\
         IMPORTANT: write in THE SAME language as the subtitle excerpt. Do not translate."
    )
}

fn user_prompt(title: &str, transcript: &str) -> String {
    format!(
        "Based on this subtitle excerpt:\n\"{transcript}\"\n\n\
         And this original title: \"{title}\"\n\n\
         Return a JSON object with the fields:\n\
         1. title: an attractive SEO-optimised title\n\
         2. description: an engaging description of up to {MAX_DESCRIPTION_CHARS} characters\n\
         3. tags: list of up to {MAX_TAGS} relevant tags, without the # symbol\n\
         4. hashtags: list of {MAX_HASHTAGS} popular hashtags, including the # symbol\n\
         Keep every field in the same language as the subtitle excerpt."
    )
}
