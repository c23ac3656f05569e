//! Judgment model configuration — persisted to `judge_config.json`.

use crate::config;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// OpenAI-compatible endpoint root, e.g. `https://api.openai.com/v1`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// API key (direct value).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Or read the key from this environment variable.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            temperature: Some(0.7),
            max_tokens: Some(200),
        }
    }
}

impl JudgeConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        config::resolve_api_key(&self.api_key, &self.api_key_env)
    }
}

pub fn load_config(path: &Path) -> JudgeConfig {
    config::load_json_config(path, "JUDGE")
}

pub fn save_config(path: &Path, cfg: &JudgeConfig) -> Result<(), String> {
    config::save_json_config(path, cfg, "JUDGE")
}
