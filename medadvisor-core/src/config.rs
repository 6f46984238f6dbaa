// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine configuration
//!
//! Loaded from a TOML file, then overridden by environment variables.
//!
//! ```toml
//! [intent]
//! confidence_threshold = 0.5
//! ambiguity = "reject"
//!
//! [cache]
//! max_entries = 10000
//! ttl_secs = 3600
//!
//! [executor]
//! timeout_ms = 5000
//! retry = { max_attempts = 3, initial_delay_ms = 100 }
//!
//! [neo4j]
//! uri = "http://localhost:7474"
//! ```

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub intent: IntentConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub neo4j: Neo4jConfig,
}

/// What to do when two intents tie for the top score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Surface `AmbiguousIntent` so the caller can ask a clarifying question
    #[default]
    Reject,
    /// Take the first candidate in resolver priority order
    PickTop,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntentConfig {
    /// Minimum confidence for a resolved intent
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Number of prior turns consulted for pronoun/patient resolution
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    #[serde(default)]
    pub ambiguity: AmbiguityPolicy,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            history_window: default_history_window(),
            ambiguity: AmbiguityPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Disabled caches still coalesce concurrent identical queries
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    /// Secondary freshness bound; `None` relies on version stamps only
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: Option<u64>,
}

impl CacheConfig {
    /// TTL as a duration; `0` and absent both disable it
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Fractional jitter applied to each delay (0.1 = +/-10%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Neo4jConfig {
    /// HTTP endpoint of the graph database
    #[serde(default = "default_neo4j_uri")]
    pub uri: String,

    #[serde(default = "default_neo4j_database")]
    pub database: String,

    #[serde(default = "default_neo4j_username")]
    pub username: String,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Full-text index used for medication name resolution
    #[serde(default = "default_fulltext_index")]
    pub fulltext_index: String,

    /// Candidates fetched per entity lookup
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: default_neo4j_uri(),
            database: default_neo4j_database(),
            username: default_neo4j_username(),
            password: None,
            fulltext_index: default_fulltext_index(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

// Default values
fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_history_window() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_ttl_secs() -> Option<u64> {
    Some(3600)
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_neo4j_uri() -> String {
    "http://localhost:7474".to_string()
}

fn default_neo4j_database() -> String {
    "neo4j".to_string()
}

fn default_neo4j_username() -> String {
    "neo4j".to_string()
}

fn default_fulltext_index() -> String {
    "medication_fulltext".to_string()
}

fn default_candidate_limit() -> usize {
    3
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - MEDADVISOR_CONFIDENCE_THRESHOLD: minimum intent confidence (default: 0.5)
    /// - MEDADVISOR_AMBIGUITY: `reject` or `pick_top` (default: reject)
    /// - MEDADVISOR_CACHE_ENABLED: enable the result cache (default: true)
    /// - MEDADVISOR_CACHE_MAX_ENTRIES: cache capacity (default: 10000)
    /// - MEDADVISOR_CACHE_TTL_SECS: cache TTL, `0` disables it (default: 3600)
    /// - MEDADVISOR_QUERY_TIMEOUT_MS: per-attempt timeout (default: 5000)
    /// - MEDADVISOR_MAX_ATTEMPTS: attempts including the first (default: 3)
    /// - NEO4J_URI, NEO4J_DATABASE, NEO4J_USERNAME, NEO4J_PASSWORD
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(&lookup);
        config
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        config.apply_overrides(&|key: &str| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Env takes priority; only variables that are set and parse are applied
    fn apply_overrides<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MEDADVISOR_CONFIDENCE_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.intent.confidence_threshold = v;
        }
        if let Some(v) = lookup("MEDADVISOR_AMBIGUITY") {
            match v.to_lowercase().as_str() {
                "reject" => self.intent.ambiguity = AmbiguityPolicy::Reject,
                "pick_top" => self.intent.ambiguity = AmbiguityPolicy::PickTop,
                other => tracing::warn!(value = other, "Ignoring unknown MEDADVISOR_AMBIGUITY"),
            }
        }
        if let Some(v) = lookup("MEDADVISOR_CACHE_ENABLED").and_then(|v| v.parse().ok()) {
            self.cache.enabled = v;
        }
        if let Some(v) = lookup("MEDADVISOR_CACHE_MAX_ENTRIES").and_then(|v| v.parse().ok()) {
            self.cache.max_entries = v;
        }
        if let Some(v) = lookup("MEDADVISOR_CACHE_TTL_SECS").and_then(|v| v.parse::<u64>().ok()) {
            self.cache.ttl_secs = if v == 0 { None } else { Some(v) };
        }
        if let Some(v) = lookup("MEDADVISOR_QUERY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.executor.timeout_ms = v;
        }
        if let Some(v) = lookup("MEDADVISOR_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.executor.retry.max_attempts = v;
        }
        if let Some(v) = lookup("NEO4J_URI") {
            self.neo4j.uri = bolt_to_http(&v);
        }
        if let Some(v) = lookup("NEO4J_DATABASE") {
            self.neo4j.database = v;
        }
        if let Some(v) = lookup("NEO4J_USERNAME") {
            self.neo4j.username = v;
        }
        if let Some(v) = lookup("NEO4J_PASSWORD") {
            self.neo4j.password = Some(v);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.intent.confidence_threshold) {
            return Err(EngineError::Config(format!(
                "intent.confidence_threshold must be within 0.0..=1.0, got {}",
                self.intent.confidence_threshold
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(EngineError::Config(
                "cache.max_entries must be greater than zero".into(),
            ));
        }
        if self.executor.timeout_ms == 0 {
            return Err(EngineError::Config(
                "executor.timeout_ms must be greater than zero".into(),
            ));
        }
        let retry = &self.executor.retry;
        if retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "executor.retry.max_attempts must be at least 1".into(),
            ));
        }
        if retry.multiplier < 1.0 {
            return Err(EngineError::Config(
                "executor.retry.multiplier must be >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(EngineError::Config(
                "executor.retry.jitter must be within 0.0..=1.0".into(),
            ));
        }
        if !self.neo4j.uri.starts_with("http://") && !self.neo4j.uri.starts_with("https://") {
            return Err(EngineError::Config(format!(
                "neo4j.uri must be an http(s) endpoint, got {}",
                self.neo4j.uri
            )));
        }
        if self.neo4j.candidate_limit == 0 {
            return Err(EngineError::Config(
                "neo4j.candidate_limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Deployments often export the Bolt URI; the engine talks HTTP.
fn bolt_to_http(uri: &str) -> String {
    for scheme in ["bolt://", "neo4j://"] {
        if let Some(rest) = uri.strip_prefix(scheme) {
            let host = rest.split(':').next().unwrap_or(rest);
            return format!("http://{}:7474", host);
        }
    }
    for scheme in ["bolt+s://", "neo4j+s://"] {
        if let Some(rest) = uri.strip_prefix(scheme) {
            let host = rest.split(':').next().unwrap_or(rest);
            return format!("https://{}:7473", host);
        }
    }
    uri.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.intent.history_window, 10);
        assert_eq!(config.cache.ttl_secs, Some(3600));
        assert_eq!(config.executor.retry.max_attempts, 3);
        assert_eq!(config.neo4j.candidate_limit, 3);
        assert_eq!(config.intent.ambiguity, AmbiguityPolicy::Reject);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MEDADVISOR_CACHE_TTL_SECS", "0"),
            ("MEDADVISOR_AMBIGUITY", "pick_top"),
            ("MEDADVISOR_QUERY_TIMEOUT_MS", "750"),
            ("NEO4J_URI", "bolt://graph.internal:7687"),
            ("NEO4J_PASSWORD", "secret"),
            ("MEDADVISOR_MAX_ATTEMPTS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.cache.ttl_secs, None);
        assert_eq!(config.intent.ambiguity, AmbiguityPolicy::PickTop);
        assert_eq!(config.executor.timeout_ms, 750);
        assert_eq!(config.neo4j.uri, "http://graph.internal:7474");
        assert_eq!(config.neo4j.password.as_deref(), Some("secret"));
        assert_eq!(config.executor.retry.max_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.executor.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.intent.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.neo4j.uri = "bolt://localhost:7687".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
            [cache]
            max_entries = 50

            [executor.retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.max_entries, 50);
        assert!(config.cache.enabled);
        assert_eq!(config.executor.retry.max_attempts, 5);
        assert_eq!(config.executor.retry.initial_delay_ms, 100);
        assert_eq!(config.executor.timeout_ms, 5_000);
    }
}
