//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. Durations are milliseconds.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One throttle rule: at most `responses` replies per rolling `interval_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub interval_ms: u64,
    pub responses: u32,
}

/// One loop-prevention rule.
///
/// If the last `length` replies were initiated by at most `participants`
/// distinct users, further receives are vetoed until `debounce_ms` passes
/// without a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    pub participants: usize,
    pub length: usize,
    pub debounce_ms: u64,
}

/// Authority levels required for privileged edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Minimum authority to run any edit command.
    pub base: u8,
    /// Edit dialogues written by someone else, or set an explicit writer.
    pub writer: u8,
    /// Edit frozen dialogues, or freeze/unfreeze.
    pub frozen: u8,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base: 2,
            writer: 3,
            frozen: 4,
        }
    }
}

/// Worker runtime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Max queued requests before backpressure applies.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeachConfig {
    /// Prefixes addressing the bot; matched case-insensitively.
    pub nicknames: Vec<String>,
    /// Characters stripped from both ends of a question.
    pub strip_chars: String,
    pub max_redirections: usize,
    pub history_timeout_ms: u64,
    /// Used when a dialogue's own successor timeout is zero.
    pub successor_timeout_ms: u64,
    /// How long a nickname-only message keeps the sender addressed.
    pub activation_timeout_ms: u64,
    pub throttle: Vec<ThrottleConfig>,
    pub prevent_loop: Vec<LoopConfig>,
    /// Auto-merged search groups larger than this collapse to a count.
    pub merge_threshold: usize,
    pub items_per_page: usize,
    /// Zero disables the limit.
    pub max_answer_length: usize,
    pub default_prob_s: f64,
    pub default_prob_a: f64,
    /// Timezone used for dialogue activity windows.
    pub utc_offset_minutes: i32,
    pub authority: AuthorityConfig,
    /// Seed for the weighted draw; `None` seeds from entropy.
    pub seed: Option<u64>,
    pub runtime: RuntimeConfig,
}

impl Default for TeachConfig {
    fn default() -> Self {
        Self {
            nicknames: Vec::new(),
            strip_chars: " \t,.!?;:~，。！？；：～、…".to_string(),
            max_redirections: 3,
            history_timeout_ms: 30 * 60 * 1000,
            successor_timeout_ms: 20 * 1000,
            activation_timeout_ms: 60 * 1000,
            throttle: Vec::new(),
            prevent_loop: vec![LoopConfig {
                participants: 1,
                length: 5,
                debounce_ms: 60 * 1000,
            }],
            merge_threshold: 5,
            items_per_page: 30,
            max_answer_length: 0,
            default_prob_s: 1.0,
            default_prob_a: 0.0,
            utc_offset_minutes: 0,
            authority: AuthorityConfig::default(),
            seed: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl TeachConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&raw)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| Err(ValidationError::InvalidConfig { reason });

        for rule in &self.throttle {
            if rule.interval_ms == 0 || rule.responses == 0 {
                return invalid(format!(
                    "throttle rule needs a positive interval and allowance: {rule:?}"
                ));
            }
        }
        for rule in &self.prevent_loop {
            if rule.length == 0 || rule.participants == 0 {
                return invalid(format!(
                    "loop rule needs positive length and participants: {rule:?}"
                ));
            }
        }
        if self.items_per_page == 0 {
            return invalid("items_per_page must be positive".to_string());
        }
        for value in [self.default_prob_s, self.default_prob_a] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::ProbabilityOutOfRange { value });
            }
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return invalid(format!("utc offset {} out of range", self.utc_offset_minutes));
        }
        Ok(())
    }

    /// Longest loop window, i.e. how many initiators to remember.
    #[must_use]
    pub fn loop_memory(&self) -> usize {
        self.prevent_loop.iter().map(|rule| rule.length).max().unwrap_or(0)
    }
}
