//! Scripted LLM implementations for testing.
//!
//! - `MockLLM::scripted(..)` - replays a fixed sequence of replies, then fails
//! - `MockLLM::always(..)` - always answers with the same content
//! - `MockLLM::failing()` - every call fails
//! - `MockLLM::responder(..)` - answers computed from the request messages

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{ChatMessage, LLM, LLMProvider, LLMResponse};

/// One scripted reply
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Successful response carrying this message content
    Content(String),
    /// Failed attempt with this error message
    Fail(String),
}

impl MockReply {
    pub fn content(content: impl Into<String>) -> Self {
        Self::Content(content.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

type Responder = Box<dyn Fn(&[ChatMessage]) -> MockReply + Send + Sync>;

enum Behavior {
    Scripted(Mutex<VecDeque<MockReply>>),
    Responder(Responder),
}

/// Mock LLM that records every request it receives
pub struct MockLLM {
    behavior: Behavior,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLLM {
    /// Replay `replies` in order; calls beyond the script fail
    pub fn scripted(replies: Vec<MockReply>) -> Self {
        Self {
            behavior: Behavior::Scripted(Mutex::new(replies.into())),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `content`
    pub fn always(content: impl Into<String>) -> Self {
        let content = content.into();
        Self::responder(move |_| MockReply::Content(content.clone()))
    }

    /// Fail every call
    pub fn failing() -> Self {
        Self::scripted(Vec::new())
    }

    /// Compute each reply from the request messages
    pub fn responder<F>(respond: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> MockReply + Send + Sync + 'static,
    {
        Self {
            behavior: Behavior::Responder(Box::new(respond)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of chat requests received so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    /// Copy of every request received so far
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn next_reply(&self, messages: &[ChatMessage]) -> MockReply {
        match &self.behavior {
            Behavior::Scripted(queue) => queue
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front())
                .unwrap_or_else(|| MockReply::fail("mock script exhausted")),
            Behavior::Responder(respond) => respond(messages),
        }
    }
}

#[async_trait]
impl LLM for MockLLM {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse> {
        let reply = self.next_reply(&messages);

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages);
        }

        match reply {
            MockReply::Content(content) => Ok(LLMResponse {
                content,
                tokens_used: None,
            }),
            MockReply::Fail(message) => Err(anyhow!(message)),
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::LMStudio
    }
}
