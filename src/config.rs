use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::prompts::DEFAULT_SYSTEM_PROMPT;

pub const DEFAULT_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.3";
pub const FALLBACK_MODEL: &str = "meta-llama/Llama-3.2-3B-Instruct";
pub const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_API_KEY_ENV: &str = "HF_TOKEN";

pub const MAX_NEW_TOKENS: u32 = 512;
pub const TEMPERATURE: f32 = 0.7;
pub const TOP_P: f32 = 0.9;
pub const REPETITION_PENALTY: f32 = 1.05;

pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 1.5);
pub const TOP_P_RANGE: (f32, f32) = (0.0, 1.0);
pub const MAX_TOKENS_RANGE: (u32, u32) = (32, 2048);
pub const MAX_TOKENS_STEP: u32 = 32;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model queried unless the user switches
    pub default_model: String,

    /// Alternate model selectable with `/model fallback`
    pub fallback_model: String,

    /// Inference API root
    pub base_url: String,

    /// Inline credential; takes precedence over `api_key_env`
    pub api_key: Option<String>,

    /// Environment variable holding the bearer credential
    pub api_key_env: String,

    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub system_prompt: String,

    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_model: DEFAULT_MODEL.to_string(),
            fallback_model: FALLBACK_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            max_new_tokens: MAX_NEW_TOKENS,
            temperature: TEMPERATURE,
            top_p: TOP_P,
            repetition_penalty: REPETITION_PENALTY,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Directory holding the config file and the log
    pub fn home_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".hfchat"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("config.toml"))
    }

    /// Load `~/.hfchat/config.toml`, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Get API key from config or environment
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// Per-request generation settings seeded from this config
    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig::new(
            self.system_prompt.clone(),
            self.temperature,
            self.top_p,
            self.max_new_tokens,
        )
        .with_repetition_penalty(self.repetition_penalty)
    }
}

/// Sampling parameters and directive for one request.
///
/// Values are clamped into the ranges the chat controls allow.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub system_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_new_tokens: u32,
    pub repetition_penalty: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Config::default().generation()
    }
}

impl GenerationConfig {
    pub fn new(system_prompt: impl Into<String>, temperature: f32, top_p: f32, max_new_tokens: u32) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            temperature: clamp_temperature(temperature),
            top_p: clamp_top_p(top_p),
            max_new_tokens: clamp_max_tokens(max_new_tokens),
            repetition_penalty: REPETITION_PENALTY,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = clamp_temperature(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = clamp_top_p(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = clamp_max_tokens(max_new_tokens);
        self
    }

    pub fn with_repetition_penalty(mut self, repetition_penalty: f32) -> Self {
        self.repetition_penalty = repetition_penalty;
        self
    }
}

fn clamp_temperature(value: f32) -> f32 {
    if value.is_nan() {
        return TEMPERATURE;
    }
    value.clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1)
}

fn clamp_top_p(value: f32) -> f32 {
    if value.is_nan() {
        return TOP_P;
    }
    value.clamp(TOP_P_RANGE.0, TOP_P_RANGE.1)
}

/// Clamp into range, then snap down onto the slider step.
fn clamp_max_tokens(value: u32) -> u32 {
    let clamped = value.clamp(MAX_TOKENS_RANGE.0, MAX_TOKENS_RANGE.1);
    clamped - (clamped % MAX_TOKENS_STEP)
}
