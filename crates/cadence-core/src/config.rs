use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};

/// Top-level Cadence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub google: Option<GoogleConfig>,
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. `~/` is expanded.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.cadence/cadence.db".to_string()
}

/// Reply poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Only sent messages newer than this many days are scanned.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Maximum characters kept from an inbound body.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_poll_interval(),
            retention_days: default_retention_days(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    30
}
fn default_retention_days() -> i64 {
    30
}
fn default_excerpt_chars() -> usize {
    500
}

/// Availability and booking parameters for automated scheduling replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// First bookable hour (local time, inclusive).
    #[serde(default = "default_business_start")]
    pub business_start_hour: u32,
    /// Last bookable hour (local time, exclusive).
    #[serde(default = "default_business_end")]
    pub business_end_hour: u32,
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: i64,
    /// Maximum number of slots listed in an availability reply.
    #[serde(default = "default_max_slots")]
    pub max_slots: usize,
    /// Length of a booked meeting.
    #[serde(default = "default_meeting_minutes")]
    pub meeting_minutes: i64,
    /// Days searched when a reply names no range.
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: i64,
    /// Offset of the owner's local time from UTC.
    #[serde(default)]
    pub utc_offset_hours: i32,
    #[serde(default)]
    pub include_weekends: bool,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            business_start_hour: default_business_start(),
            business_end_hour: default_business_end(),
            slot_minutes: default_slot_minutes(),
            max_slots: default_max_slots(),
            meeting_minutes: default_meeting_minutes(),
            lookahead_days: default_lookahead_days(),
            utc_offset_hours: 0,
            include_weekends: false,
        }
    }
}

fn default_business_start() -> u32 {
    9
}
fn default_business_end() -> u32 {
    17
}
fn default_slot_minutes() -> i64 {
    30
}
fn default_max_slots() -> usize {
    8
}
fn default_meeting_minutes() -> i64 {
    30
}
fn default_lookahead_days() -> i64 {
    5
}

/// Google Workspace API configuration (Gmail + Calendar).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_gmail_base_url")]
    pub gmail_base_url: String,
    #[serde(default = "default_calendar_base_url")]
    pub calendar_base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
}

fn default_gmail_base_url() -> String {
    "https://gmail.googleapis.com/gmail/v1/users/me".to_string()
}
fn default_calendar_base_url() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_calendar_id() -> String {
    "primary".to_string()
}

/// OpenAI-compatible classifier endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_classifier_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_classifier_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_classifier_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_retries() -> u32 {
    2
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on every API call except health.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:18790".to_string()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| CadenceError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: AppConfig =
            toml::from_str(&expanded).map_err(|e| CadenceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let s = &self.scheduling;
        if s.business_start_hour >= s.business_end_hour || s.business_end_hour > 24 {
            return Err(CadenceError::Config(format!(
                "business hours {}..{} are not a valid window",
                s.business_start_hour, s.business_end_hour
            )));
        }
        if s.slot_minutes <= 0 || s.meeting_minutes <= 0 {
            return Err(CadenceError::Config(
                "slot_minutes and meeting_minutes must be positive".into(),
            ));
        }
        if self.poller.interval_secs == 0 {
            return Err(CadenceError::Config("poller.interval_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Resolve the database path (expand ~).
    pub fn db_path(&self) -> PathBuf {
        let p = &self.storage.db_path;
        if let Some(rest) = p.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(p)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.poller.interval_secs, 30);
        assert_eq!(config.poller.retention_days, 30);
        assert_eq!(config.scheduling.max_slots, 8);
        assert_eq!(config.scheduling.slot_minutes, 30);
        assert!(config.google.is_none());
        assert!(config.classifier.is_none());
    }

    #[test]
    fn test_expand_keeps_unknown_vars() {
        let out = expand_env_vars("key = \"${CADENCE_SURELY_UNSET_VAR}\"");
        assert_eq!(out, "key = \"${CADENCE_SURELY_UNSET_VAR}\"");
    }

    #[test]
    fn test_rejects_inverted_business_hours() {
        let err = AppConfig::parse("[scheduling]\nbusiness_start_hour = 18\nbusiness_end_hour = 9\n")
            .unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));
    }

    #[test]
    fn test_db_path_plain() {
        let config = AppConfig::parse("[storage]\ndb_path = \"/tmp/c.db\"\n").unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/c.db"));
    }
}
