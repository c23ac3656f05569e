pub mod config;
pub mod judgment;
pub mod openai;
pub mod prompts;
pub mod provider;

pub use judgment::{infer_with_timeout, parse_for, parse_judgment, parse_reply, Judgment};
pub use openai::OpenAIJudge;
pub use provider::{JudgmentProvider, PromptKind};
