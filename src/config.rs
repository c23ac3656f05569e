//! Shared config utilities for loading/saving JSON config files,
//! resolving API keys, and the engine's tunables.

use crate::error::EngineError;
use crate::host::GroupListConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Generic load for any Serde config type with a `Default` implementation.
/// Falls back to `T::default()` if the file is missing or unparsable.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<T>(&content) {
            Ok(config) => {
                tracing::info!(label, path = %path.display(), "loaded config");
                config
            }
            Err(error) => {
                tracing::warn!(
                    label,
                    path = %path.display(),
                    %error,
                    "failed to parse config, using defaults"
                );
                T::default()
            }
        },
        Err(_) => {
            tracing::info!(label, path = %path.display(), "no config file, using defaults");
            T::default()
        }
    }
}

/// Generic save for any Serde config type.
pub fn save_json_config<T: Serialize>(path: &Path, config: &T, label: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {}", e))?;
    tracing::info!(label, path = %path.display(), "saved config");
    Ok(())
}

/// Resolve an API key: check the direct `api_key` field first,
/// then fall back to reading the environment variable named in `api_key_env`.
pub fn resolve_api_key(api_key: &Option<String>, api_key_env: &Option<String>) -> Option<String> {
    if let Some(ref key) = api_key {
        if !key.is_empty() {
            return Some(key.clone());
        }
    }
    if let Some(ref env_var) = api_key_env {
        if let Ok(key) = std::env::var(env_var) {
            if !key.is_empty() {
                return Some(key);
            }
        }
    }
    None
}

// ── Engine Config ──────────────────────────────────────

/// Every tunable of the group-chat engine. Missing JSON fields take the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Platform identifier of the bot account. Required.
    pub bot_id: String,
    pub bot_name: String,

    // ── History ──
    /// Maximum records kept per group.
    pub context_window_size: usize,
    /// Records older than this are evicted on insert.
    pub context_max_age_secs: u64,

    // ── Activity ──
    /// Messages per minute at which a window's density saturates.
    pub activity_saturation_per_minute: f64,

    // ── Willingness ──
    pub base_probability: f64,
    /// Uniform jitter applied to `base_probability` per decision.
    pub base_probability_jitter: f64,
    /// Seed for jitter sampling. `None` = entropy.
    pub random_seed: Option<u64>,
    pub willingness_threshold: f64,
    pub consecutive_step_penalty: f64,
    pub max_consecutive_responses: u32,
    pub immersive_boost: f64,

    // ── Mode ──
    pub observation_mode_threshold: f64,
    /// Leave Normal for Observation only below this. `None` = same as entry threshold.
    pub observation_exit_threshold: Option<f64>,
    /// Multiplier applied to the score while observing.
    pub observation_damping: f64,
    pub focus_chat_enabled: bool,
    pub min_interest_score: f64,
    pub focus_timeout_seconds: u64,
    pub focus_max_responses: u32,
    pub focus_boost: f64,
    /// Focus is not entered while the fatigue penalty is above this.
    pub focus_fatigue_ceiling: f64,

    // ── Fatigue ──
    pub fatigue_threshold: u32,
    /// Fraction of the counter shed per elapsed hour.
    pub fatigue_decay_rate: f64,
    /// Hours between unconditional resets.
    pub fatigue_reset_interval: f64,

    // ── Frequency governor ──
    pub frequency_target_per_hour: f64,
    pub frequency_half_life_secs: f64,
    pub frequency_gain: f64,
    pub frequency_max_multiplier: f64,

    // ── Flow energy ──
    pub flow_energy_cap: f64,
    pub flow_energy_gain: f64,
    pub flow_energy_half_life_secs: f64,
    pub flow_energy_weight: f64,
    /// Fraction of `cooldown_seconds` removed at full energy.
    pub flow_cooldown_shrink: f64,
    pub flow_address_bump: f64,

    // ── Air reading ──
    pub air_reading_enabled: bool,
    pub air_reading_no_reply_marker: String,
    /// Posted when a reply the model may not veto comes back empty. Empty = decline.
    pub fallback_reply: String,

    // ── Heartbeat & sessions ──
    pub heartbeat_interval: u64,
    pub heartbeat_threshold: f64,
    pub cooldown_seconds: u64,
    pub enable_immersive_chat: bool,
    pub immersive_chat_timeout: u64,
    pub enable_proactive_reply: bool,
    pub proactive_reply_delay: u64,
    /// Let an explicit address cancel a proactive watch instead of being suppressed.
    pub explicit_address_preempts_session: bool,

    // ── Collaborators ──
    pub inference_timeout_secs: u64,
    pub dispatch_timeout_secs: u64,
    pub impression_delta_per_exchange: f64,

    // ── Lifecycle ──
    pub group_idle_eviction_secs: u64,
    pub command_prefixes: Vec<String>,
    pub group_list: GroupListConfig,
    pub enable_detailed_logging: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bot_id: String::new(),
            bot_name: "Kokoro".to_string(),
            context_window_size: 300,
            context_max_age_secs: 3600,
            activity_saturation_per_minute: 5.0,
            base_probability: 0.3,
            base_probability_jitter: 0.05,
            random_seed: None,
            willingness_threshold: 0.5,
            consecutive_step_penalty: 0.05,
            max_consecutive_responses: 3,
            immersive_boost: 0.15,
            observation_mode_threshold: 0.2,
            observation_exit_threshold: None,
            observation_damping: 0.3,
            focus_chat_enabled: true,
            min_interest_score: 0.6,
            focus_timeout_seconds: 300,
            focus_max_responses: 10,
            focus_boost: 0.15,
            focus_fatigue_ceiling: 0.5,
            fatigue_threshold: 5,
            fatigue_decay_rate: 0.5,
            fatigue_reset_interval: 6.0,
            frequency_target_per_hour: 30.0,
            frequency_half_life_secs: 600.0,
            frequency_gain: 0.5,
            frequency_max_multiplier: 1.6,
            flow_energy_cap: 1.0,
            flow_energy_gain: 0.2,
            flow_energy_half_life_secs: 300.0,
            flow_energy_weight: 0.1,
            flow_cooldown_shrink: 0.4,
            flow_address_bump: 0.1,
            air_reading_enabled: true,
            air_reading_no_reply_marker: "<NO_RESPONSE>".to_string(),
            fallback_reply: "Hm?".to_string(),
            heartbeat_interval: 30,
            heartbeat_threshold: 0.55,
            cooldown_seconds: 10,
            enable_immersive_chat: true,
            immersive_chat_timeout: 120,
            enable_proactive_reply: true,
            proactive_reply_delay: 8,
            explicit_address_preempts_session: false,
            inference_timeout_secs: 20,
            dispatch_timeout_secs: 10,
            impression_delta_per_exchange: 0.02,
            group_idle_eviction_secs: 86_400,
            command_prefixes: vec!["/".to_string()],
            group_list: GroupListConfig::default(),
            enable_detailed_logging: false,
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.bot_id.trim().is_empty() {
            return Err(EngineError::Configuration("bot_id is required".into()));
        }

        let unit_fields = [
            ("base_probability", self.base_probability),
            ("base_probability_jitter", self.base_probability_jitter),
            ("willingness_threshold", self.willingness_threshold),
            ("observation_mode_threshold", self.observation_mode_threshold),
            ("observation_damping", self.observation_damping),
            ("min_interest_score", self.min_interest_score),
            ("focus_boost", self.focus_boost),
            ("focus_fatigue_ceiling", self.focus_fatigue_ceiling),
            ("fatigue_decay_rate", self.fatigue_decay_rate),
            ("heartbeat_threshold", self.heartbeat_threshold),
            ("immersive_boost", self.immersive_boost),
            ("consecutive_step_penalty", self.consecutive_step_penalty),
            ("flow_energy_weight", self.flow_energy_weight),
            ("flow_cooldown_shrink", self.flow_cooldown_shrink),
            ("impression_delta_per_exchange", self.impression_delta_per_exchange),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Configuration(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if let Some(exit) = self.observation_exit_threshold {
            if !(0.0..=self.observation_mode_threshold).contains(&exit) {
                return Err(EngineError::Configuration(format!(
                    "observation_exit_threshold must be within [0, observation_mode_threshold], got {}",
                    exit
                )));
            }
        }

        if self.fatigue_threshold == 0 {
            return Err(EngineError::Configuration(
                "fatigue_threshold must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval == 0 {
            return Err(EngineError::Configuration(
                "heartbeat_interval must be at least 1 second".into(),
            ));
        }
        if self.context_window_size < 3 {
            return Err(EngineError::Configuration(
                "context_window_size must be at least 3".into(),
            ));
        }
        if self.air_reading_no_reply_marker.trim().is_empty() {
            return Err(EngineError::Configuration(
                "air_reading_no_reply_marker must not be empty".into(),
            ));
        }

        let positive_fields = [
            ("activity_saturation_per_minute", self.activity_saturation_per_minute),
            ("fatigue_reset_interval", self.fatigue_reset_interval),
            ("frequency_target_per_hour", self.frequency_target_per_hour),
            ("frequency_half_life_secs", self.frequency_half_life_secs),
            ("flow_energy_cap", self.flow_energy_cap),
            ("flow_energy_half_life_secs", self.flow_energy_half_life_secs),
        ];
        for (name, value) in positive_fields {
            if value <= 0.0 || !value.is_finite() {
                return Err(EngineError::Configuration(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.frequency_max_multiplier < 1.0 {
            return Err(EngineError::Configuration(
                "frequency_max_multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Exit threshold for Normal → Observation.
    pub fn observation_exit(&self) -> f64 {
        self.observation_exit_threshold
            .unwrap_or(self.observation_mode_threshold)
    }
}

pub fn load_engine_config(path: &Path) -> EngineConfig {
    load_json_config(path, "ENGINE")
}

pub fn save_engine_config(path: &Path, config: &EngineConfig) -> Result<(), String> {
    save_json_config(path, config, "ENGINE")
}
