use super::config::JudgeConfig;
use super::prompts;
use super::provider::{JudgmentProvider, PromptKind};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
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

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// OpenAI-compatible `/chat/completions` client used as the judgment backend.
pub struct OpenAIJudge {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    bot_name: String,
    marker: String,
}

impl OpenAIJudge {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        bot_name: &str,
        marker: &str,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            temperature: Some(0.7),
            max_tokens: Some(200),
            bot_name: bot_name.to_string(),
            marker: marker.to_string(),
        }
    }

    /// Build from config. `None` when no API key can be resolved.
    pub fn from_config(cfg: &JudgeConfig, bot_name: &str, marker: &str) -> Option<Self> {
        let api_key = cfg.resolve_api_key()?;
        let mut judge = Self::new(
            api_key,
            cfg.base_url.clone(),
            cfg.model.clone(),
            bot_name,
            marker,
        );
        judge.temperature = cfg.temperature;
        judge.max_tokens = cfg.max_tokens;
        Some(judge)
    }

    /// Swap the HTTP client (e.g. one without system proxy for local endpoints).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Persona + task instruction as the system turn, transcript as the user turn.
    pub fn build_messages(&self, context: &[String], kind: PromptKind) -> Vec<Message> {
        let system = format!(
            "{}\n\n{}",
            prompts::persona(&self.bot_name),
            prompts::instruction(kind, &self.marker)
        );
        let transcript = if context.is_empty() {
            "(no recent messages)".to_string()
        } else {
            context.join("\n")
        };
        vec![Message::system(system), Message::user(transcript)]
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<String, String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!("API Error ({}): {}", status, error_text));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response: {}", e))?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

#[async_trait]
impl JudgmentProvider for OpenAIJudge {
    async fn infer_judgment(&self, context: &[String], kind: PromptKind) -> Result<String, String> {
        tracing::debug!(model = %self.model, ?kind, lines = context.len(), "requesting judgment");
        self.chat(self.build_messages(context, kind)).await
    }

    fn id(&self) -> &str {
        "openai"
    }
}
