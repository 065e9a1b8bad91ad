//! Main application configuration
//!
//! This module defines the primary configuration structures for the
//! rank-matchmaker engine, including environment variable and TOML loading
//! plus validation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// How long the oldest queued player waits before stand-ins are injected
    pub wait_threshold_seconds: u64,
    /// Score windows tried in ascending order when filling a role
    pub score_windows: Vec<f64>,
    /// How many fresh snapshots to try when the commit loses a race
    pub max_commit_attempts: u32,
    /// Group roles with equal slot counts into one composite assignment
    pub merge_equal_roles: bool,
    /// Allow one owner to hold several seats (different heroes)
    pub allow_duplicate_owners: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "rank-matchmaker".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            wait_threshold_seconds: 30,
            score_windows: vec![100.0, 250.0, 500.0],
            max_commit_attempts: 3,
            merge_equal_roles: false,
            allow_duplicate_owners: false,
        }
    }
}

impl MatchmakingSettings {
    /// Get the stand-in wait threshold as Duration
    pub fn wait_threshold(&self) -> Duration {
        Duration::from_secs(self.wait_threshold_seconds)
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }

        // Matchmaking settings
        if let Ok(threshold) = env::var("WAIT_THRESHOLD_SECONDS") {
            self.matchmaking.wait_threshold_seconds = threshold
                .parse()
                .map_err(|_| anyhow!("Invalid WAIT_THRESHOLD_SECONDS value: {}", threshold))?;
        }
        if let Ok(windows) = env::var("SCORE_WINDOWS") {
            self.matchmaking.score_windows = parse_score_windows(&windows)?;
        }
        if let Ok(attempts) = env::var("MAX_COMMIT_ATTEMPTS") {
            self.matchmaking.max_commit_attempts = attempts
                .parse()
                .map_err(|_| anyhow!("Invalid MAX_COMMIT_ATTEMPTS value: {}", attempts))?;
        }
        if let Ok(merge) = env::var("MERGE_EQUAL_ROLES") {
            self.matchmaking.merge_equal_roles = merge
                .parse()
                .map_err(|_| anyhow!("Invalid MERGE_EQUAL_ROLES value: {}", merge))?;
        }
        if let Ok(allow) = env::var("ALLOW_DUPLICATE_OWNERS") {
            self.matchmaking.allow_duplicate_owners = allow
                .parse()
                .map_err(|_| anyhow!("Invalid ALLOW_DUPLICATE_OWNERS value: {}", allow))?;
        }

        Ok(())
    }
}

/// Parse a comma separated list of score windows, e.g. `100,250,500`
pub fn parse_score_windows(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f64>()
                .map_err(|_| anyhow!("Invalid SCORE_WINDOWS entry: {}", part))
        })
        .collect()
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.name.is_empty() {
        return Err(anyhow!("Service name cannot be empty"));
    }

    // Validate matchmaking settings
    let windows = &config.matchmaking.score_windows;
    if windows.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(anyhow!("Score windows must be finite and non-negative"));
    }
    if windows.windows(2).any(|pair| pair[0] > pair[1]) {
        return Err(anyhow!("Score windows must be in ascending order"));
    }
    if config.matchmaking.max_commit_attempts == 0 {
        return Err(anyhow!("Max commit attempts must be greater than 0"));
    }

    Ok(())
}
