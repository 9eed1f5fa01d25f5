use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChatMessage, LLM};
use crate::retry::{attempt, RetryPolicy};

/// Proposed excerpt of a segment, in whole seconds of the segment's timeline.
///
/// Windows come from an external service and are not trusted: callers
/// validate them against the real segment duration before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutWindow {
    pub title: String,
    #[serde(deserialize_with = "whole_seconds")]
    pub begin: u32,
    #[serde(deserialize_with = "whole_seconds")]
    pub end: u32,
}

impl CutWindow {
    pub fn new(title: impl Into<String>, begin: u32, end: u32) -> Self {
        Self {
            title: title.into(),
            begin,
            end,
        }
    }

    pub fn begin_offset(&self) -> Duration {
        Duration::from_secs(u64::from(self.begin))
    }

    pub fn end_offset(&self) -> Duration {
        Duration::from_secs(u64::from(self.end))
    }

    /// Length of the window, zero when `end <= begin`
    pub fn length(&self) -> Duration {
        Duration::from_secs(u64::from(self.end.saturating_sub(self.begin)))
    }
}

/// Accept integer or fractional non-negative seconds, truncating fractions
fn whole_seconds<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 || value > f64::from(u32::MAX) {
        return Err(serde::de::Error::custom(format!(
            "cut offset out of range: {}",
            value
        )));
    }
    Ok(value.trunc() as u32)
}

#[derive(Debug, Deserialize)]
struct CutsResponse {
    #[serde(default)]
    cuts: Vec<CutWindow>,
}

/// Asks the LLM for interesting excerpts of a caption document
pub struct CutProposer {
    llm: Arc<dyn LLM>,
    retry: RetryPolicy,
}

impl CutProposer {
    pub fn new(llm: Arc<dyn LLM>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Propose cut windows for one segment.
    ///
    /// Transport failures and unparsable replies are retried under the
    /// configured policy. Exhaustion yields an empty list. The order of the
    /// returned windows is the service's order.
    pub async fn propose(
        &self,
        captions: &str,
        topics: &str,
        excerpts: u32,
        stretch_minutes: u32,
    ) -> Vec<CutWindow> {
        let messages = vec![
            ChatMessage::system(system_prompt(topics, excerpts, stretch_minutes)),
            ChatMessage::user(user_prompt(captions, topics, stretch_minutes)),
        ];

        let result = attempt(&self.retry, |attempt_number| {
            let messages = messages.clone();
            async move {
                debug!("Requesting cuts (attempt {})", attempt_number + 1);
                let response = self.llm.chat(messages).await?;
                parse_cuts(&response.content)
            }
        })
        .await;

        match result {
            Ok(cuts) => {
                info!("✂️ Received {} cut proposals", cuts.len());
                cuts
            }
            Err(e) => {
                warn!(
                    "Cut proposal gave up after {} attempts: {:#}",
                    self.retry.max_attempts.max(1),
                    e
                );
                Vec::new()
            }
        }
    }
}

/// Parse the `{"cuts": [...]}` object from a message body
pub fn parse_cuts(content: &str) -> Result<Vec<CutWindow>> {
    let body = json_object_slice(content).ok_or_else(|| anyhow!("no JSON object in reply"))?;
    let parsed: CutsResponse = serde_json::from_str(body).context("malformed cuts object")?;
    Ok(parsed.cuts)
}

/// Outermost `{...}` of a reply, tolerating surrounding prose or code fences
pub(crate) fn json_object_slice(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

fn system_prompt(topics: &str, excerpts: u32, stretch_minutes: u32) -> String {
    format!(
        "You are a professional video editor who analyses subtitles to find compelling excerpts about the topics \"{topics}\".\n\
         Locate multiple excerpts (at least {excerpts}, if possible) that contain relevant discussion of these topics.\n\
         \n\
         Each excerpt should target around {stretch_minutes} minute(s), but prefer natural cut points where a conversation \
         or idea reaches its conclusion. An excerpt may be 1-2 minutes longer or shorter than the target if that keeps a \
         thought complete. Never cut mid-sentence.\n\
         \n\
         Return only a JSON object in the format: \
         {{\"cuts\": [{{\"title\": \"Descriptive title of the cut\", \"begin\": start time in seconds (integer), \"end\": end time in seconds (integer)}}]}}"
    )
}

fn user_prompt(captions: &str, topics: &str, stretch_minutes: u32) -> String {
    format!(
        "Here is the subtitle file:\n\n{captions}\n\n\
         Identify multiple interesting excerpts related to the topics \"{topics}\". \
         Target approximately {stretch_minutes} minute(s) per excerpt, but prioritise natural cut points. \
         Return only the JSON object with the identified cuts."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockLLM, MockReply};
    use tokio::time::Instant;

    const CUTS: &str = r#"{"cuts": [{"title": "Intro", "begin": 0, "end": 95}, {"title": "Deep dive", "begin": 300, "end": 420.7}]}"#;

    #[test]
    fn test_parse_cuts() {
        let cuts = parse_cuts(CUTS).unwrap();
        assert_eq!(
            cuts,
            vec![CutWindow::new("Intro", 0, 95), CutWindow::new("Deep dive", 300, 420)]
        );
    }

    #[test]
    fn test_parse_cuts_tolerates_code_fences() {
        let fenced = format!("```json\n{}\n```", CUTS);
        assert_eq!(parse_cuts(&fenced).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_cuts_rejects_garbage() {
        assert!(parse_cuts("no json here").is_err());
        assert!(parse_cuts(r#"{"cuts": [{"title": "x", "begin": -5, "end": 10}]}"#).is_err());
        assert!(parse_cuts(r#"{"cuts": "nope"}"#).is_err());
        assert_eq!(parse_cuts("{}").unwrap(), Vec::new());
    }

    #[test]
    fn test_window_length() {
        assert_eq!(CutWindow::new("a", 10, 70).length(), Duration::from_secs(60));
        assert_eq!(CutWindow::new("a", 70, 10).length(), Duration::ZERO);
    }

    #[test]
    fn test_prompts_carry_hints() {
        let system = system_prompt("jiu-jitsu", 4, 2);
        assert!(system.contains("\"jiu-jitsu\""));
        assert!(system.contains("at least 4"));
        assert!(system.contains("around 2 minute(s)"));
        assert!(system.contains("\"cuts\""));

        let user = user_prompt("1\n00:00:00,000 --> 00:00:01,000\nhi\n", "jiu-jitsu", 2);
        assert!(user.contains("00:00:00,000 --> 00:00:01,000"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_returns_third_reply() {
        let llm = Arc::new(MockLLM::scripted(vec![
            MockReply::fail("timeout"),
            MockReply::content("not json"),
            MockReply::content(CUTS),
        ]));
        let proposer = CutProposer::new(llm.clone(), RetryPolicy::default());
        let started = Instant::now();

        let cuts = proposer.propose("captions", "topics", 3, 2).await;

        assert_eq!(cuts.len(), 2);
        assert_eq!(cuts[0].title, "Intro");
        assert_eq!(llm.call_count(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_empty_not_error() {
        let llm = Arc::new(MockLLM::failing());
        let proposer = CutProposer::new(llm.clone(), RetryPolicy::default());

        let cuts = proposer.propose("captions", "topics", 3, 2).await;

        assert!(cuts.is_empty());
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_service_order_is_preserved() {
        let reversed = r#"{"cuts": [{"title": "Late", "begin": 500, "end": 560}, {"title": "Early", "begin": 5, "end": 60}]}"#;
        let proposer = CutProposer::new(Arc::new(MockLLM::always(reversed)), RetryPolicy::default());

        let titles: Vec<String> = proposer
            .propose("c", "t", 2, 1)
            .await
            .into_iter()
            .map(|cut| cut.title)
            .collect();

        assert_eq!(titles, vec!["Late", "Early"]);
    }
}
