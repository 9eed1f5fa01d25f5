pub mod cuts;
pub mod metadata;
pub mod mock;
pub mod providers;

pub use cuts::{CutProposer, CutWindow};
pub use metadata::{MetadataGenerator, VideoMetadata};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// LLM provider types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LLMProvider {
    OpenAI,
    LMStudio,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Timeout for cut proposal requests
    pub timeout_seconds: u64,
    /// Timeout for metadata requests
    pub metadata_timeout_seconds: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::OpenAI,
            endpoint: Some("https://api.openai.com/v1/chat/completions".to_string()),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: None,
            temperature: None,
            timeout_seconds: 120,
            metadata_timeout_seconds: 60,
        }
    }
}

impl LLMConfig {
    /// Same provider settings with a different request timeout
    pub fn with_timeout(&self, timeout_seconds: u64) -> Self {
        Self {
            timeout_seconds,
            ..self.clone()
        }
    }
}

/// Chat message for LLM communication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// LLM response
#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub content: String,
    pub tokens_used: Option<u32>,
}

/// Trait for LLM providers.
///
/// Implementations request a single JSON object response; a transport
/// failure, non-success status or malformed envelope is an `Err`.
#[async_trait]
pub trait LLM: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse>;
    async fn is_available(&self) -> bool;
    fn provider_type(&self) -> LLMProvider;
}

/// Create LLM instance based on configuration
pub fn create_llm(config: &LLMConfig) -> Result<Box<dyn LLM>> {
    match config.provider {
        LLMProvider::LMStudio => Ok(Box::new(providers::LMStudioProvider::new(config.clone())?)),
        LLMProvider::OpenAI => Ok(Box::new(providers::OpenAIProvider::new(config.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_requires_key() {
        let config = LLMConfig::default();
        assert!(create_llm(&config).is_err());

        let config = LLMConfig {
            api_key: Some("sk-test".to_string()),
            ..LLMConfig::default()
        };
        let llm = create_llm(&config).unwrap();
        assert_eq!(llm.provider_type(), LLMProvider::OpenAI);
    }

    #[test]
    fn test_with_timeout_keeps_provider_settings() {
        let config = LLMConfig {
            model: "m".to_string(),
            ..LLMConfig::default()
        };
        let shorter = config.with_timeout(60);

        assert_eq!(shorter.timeout_seconds, 60);
        assert_eq!(shorter.model, "m");
        assert_eq!(config.timeout_seconds, 120);
    }
}
