//! Interpreting model output and bounding the call in time.

use super::provider::{JudgmentProvider, PromptKind};
use crate::error::EngineError;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Judgment {
    /// Go ahead and post this text.
    Reply(String),
    /// The model vetoed (marker, `should_reply: false`, or nothing usable).
    Decline,
    /// Nothing usable came back for a prompt the model may not veto.
    Empty,
}

#[derive(Debug, Deserialize)]
struct StructuredJudgment {
    should_reply: bool,
    #[serde(default)]
    content: Option<String>,
}

/// Pull the first `{...}` block out of text that may be wrapped in a code fence.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

pub fn parse_judgment(raw: &str, marker: &str) -> Judgment {
    let text = raw.trim();
    if text.is_empty() || text.contains(marker) {
        return Judgment::Decline;
    }
    if let Some(json) = extract_json_object(text) {
        if let Ok(structured) = serde_json::from_str::<StructuredJudgment>(json) {
            return match structured.content.map(|c| c.trim().to_string()) {
                Some(content) if structured.should_reply && !content.is_empty() => {
                    Judgment::Reply(content)
                }
                _ => Judgment::Decline,
            };
        }
    }
    Judgment::Reply(text.to_string())
}

/// Like [`parse_judgment`], but the marker and `should_reply: false` are
/// ignored: whatever line the model wrote is the reply.
pub fn parse_reply(raw: &str, marker: &str) -> Judgment {
    let stripped = raw.replace(marker, "");
    let text = stripped.trim();
    if let Some(json) = extract_json_object(text) {
        if let Ok(structured) = serde_json::from_str::<StructuredJudgment>(json) {
            return match structured.content.map(|c| c.trim().to_string()) {
                Some(content) if !content.is_empty() => Judgment::Reply(content),
                _ => Judgment::Empty,
            };
        }
    }
    if text.is_empty() {
        Judgment::Empty
    } else {
        Judgment::Reply(text.to_string())
    }
}

/// Parse with the veto rules `kind` is subject to.
pub fn parse_for(kind: PromptKind, raw: &str, marker: &str) -> Judgment {
    if kind.may_veto() {
        parse_judgment(raw, marker)
    } else {
        parse_reply(raw, marker)
    }
}

/// Ask `provider` with a deadline. Elapsed time maps to `CollaboratorTimeout`.
pub async fn infer_with_timeout(
    provider: &dyn JudgmentProvider,
    context: &[String],
    kind: PromptKind,
    timeout_secs: u64,
    marker: &str,
) -> Result<Judgment, EngineError> {
    let call = provider.infer_judgment(context, kind);
    match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
        Err(_) => Err(EngineError::CollaboratorTimeout {
            operation: "infer_judgment",
            timeout_secs,
        }),
        Ok(Err(e)) => Err(EngineError::Inference(e)),
        Ok(Ok(raw)) => Ok(parse_for(kind, &raw, marker)),
    }
}
