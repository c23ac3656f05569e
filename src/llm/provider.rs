//! Judgment Provider trait — common interface for the language-model backends
//! the engine consults before speaking.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which question the engine is asking the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Unaddressed message: should the bot chime in, and with what?
    AirReading,
    /// The bot was addressed; produce the reply.
    Reply,
    /// Follow-up inside an immersive session.
    ImmersiveContinuation,
    /// Heartbeat found the room lively; produce an unprompted remark.
    HeartbeatInterjection,
    /// Proactive watch elapsed; do the collected lines warrant another remark?
    ProactiveConfirmation,
}

impl PromptKind {
    /// Whether the no-reply marker counts as a veto. A `Reply` is owed an answer.
    pub fn may_veto(self) -> bool {
        !matches!(self, PromptKind::Reply)
    }
}

/// Common interface for judgment providers (OpenAI-compatible HTTP, test doubles).
///
/// Implementations return the raw model text. Timeouts and cancellation are
/// applied by the caller; dropping the future abandons the request.
#[async_trait]
pub trait JudgmentProvider: Send + Sync {
    /// `context` is the recent conversation as `name: text` lines, oldest first.
    async fn infer_judgment(&self, context: &[String], kind: PromptKind) -> Result<String, String>;

    /// Provider identifier (e.g. "openai").
    fn id(&self) -> &str;
}
