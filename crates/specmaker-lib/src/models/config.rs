// Generation configuration
// Consumed by the core, owned by the settings layer

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings key under which the configuration is persisted
pub const GENERATION_SETTINGS_KEY: &str = "generation";

/// Default Ollama endpoint
fn default_endpoint() -> String {
    String::from("http://127.0.0.1:11434")
}

/// Default model identifier
fn default_model() -> String {
    String::from("llama3.1:8b")
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    4096
}

/// Default context window, matches the stock Ollama `num_ctx` of 8k models
fn default_context_budget() -> usize {
    8192
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_medium_tier_budget_fraction() -> f64 {
    0.25
}

fn default_max_summary_budget_fraction() -> f64 {
    0.5
}

fn default_high_score() -> u32 {
    4
}

fn default_medium_score() -> u32 {
    2
}

fn default_filler_max_words() -> usize {
    6
}

fn default_max_item_chars() -> usize {
    400
}

/// Tunable thresholds for importance-tier classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierThresholds {
    /// Minimum score for the high tier
    #[serde(default = "default_high_score")]
    pub high_score: u32,
    /// Minimum score for the medium tier
    #[serde(default = "default_medium_score")]
    pub medium_score: u32,
    /// Messages made only of filler phrases up to this length are low tier
    #[serde(default = "default_filler_max_words")]
    pub filler_max_words: usize,
    /// Longest retained item, in characters
    #[serde(default = "default_max_item_chars")]
    pub max_item_chars: usize,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high_score: default_high_score(),
            medium_score: default_medium_score(),
            filler_max_words: default_filler_max_words(),
            max_item_chars: default_max_item_chars(),
        }
    }
}

/// Configuration surface of the generation core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Inference server base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model identifier passed to the server
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Maximum tokens accepted by the server in one request
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
    /// Seconds without stream data before the turn times out
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Newest raw messages kept out of the first summarization attempt
    #[serde(default)]
    pub keep_recent_messages: usize,
    /// Medium-tier content is kept while the summary stays under this share
    /// of the context budget
    #[serde(default = "default_medium_tier_budget_fraction")]
    pub medium_tier_budget_fraction: f64,
    /// Hard ceiling for a summary, as a share of the context budget
    #[serde(default = "default_max_summary_budget_fraction")]
    pub max_summary_budget_fraction: f64,
    #[serde(default)]
    pub tiers: TierThresholds,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            context_budget: default_context_budget(),
            idle_timeout_secs: default_idle_timeout_secs(),
            keep_recent_messages: 0,
            medium_tier_budget_fraction: default_medium_tier_budget_fraction(),
            max_summary_budget_fraction: default_max_summary_budget_fraction(),
            tiers: TierThresholds::default(),
        }
    }
}

impl GenerationConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Token ceiling for medium-tier inclusion
    pub fn medium_tier_budget(&self) -> usize {
        (self.context_budget as f64 * self.medium_tier_budget_fraction) as usize
    }

    /// Token ceiling for a whole summary
    pub fn max_summary_tokens(&self) -> usize {
        (self.context_budget as f64 * self.max_summary_budget_fraction) as usize
    }

    /// Validate ranges before the config is used
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.trim().is_empty() {
            return Err("endpoint cannot be empty".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model cannot be empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature must be within 0..=2, got {}", self.temperature));
        }
        if self.max_output_tokens == 0 {
            return Err("maxOutputTokens must be positive".to_string());
        }
        if self.context_budget == 0 {
            return Err("contextBudget must be positive".to_string());
        }
        if self.idle_timeout_secs == 0 {
            return Err("idleTimeoutSecs must be positive".to_string());
        }
        for (name, value) in [
            ("mediumTierBudgetFraction", self.medium_tier_budget_fraction),
            ("maxSummaryBudgetFraction", self.max_summary_budget_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(format!("{} must be within (0, 1], got {}", name, value));
            }
        }
        if self.tiers.medium_score > self.tiers.high_score {
            return Err("tiers.mediumScore cannot exceed tiers.highScore".to_string());
        }
        Ok(())
    }

    /// Apply `SPECMAKER_*` overrides looked up through `lookup`
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("SPECMAKER_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(model) = lookup("SPECMAKER_MODEL") {
            self.model = model;
        }
        override_parsed(&lookup, "SPECMAKER_TEMPERATURE", &mut self.temperature);
        override_parsed(&lookup, "SPECMAKER_MAX_OUTPUT_TOKENS", &mut self.max_output_tokens);
        override_parsed(&lookup, "SPECMAKER_CONTEXT_BUDGET", &mut self.context_budget);
        override_parsed(&lookup, "SPECMAKER_IDLE_TIMEOUT_SECS", &mut self.idle_timeout_secs);
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("Ignoring invalid value for {}: {:?}", key, raw),
        }
    }
}
