//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Operator config: ~/.config/fleetmux/config.toml
//! 3. Project config: .fleetmux/config.toml
//!
//! # Example Config
//!
//! ```toml
//! poll_interval_secs = 5
//! idle_threshold_secs = 120
//!
//! [matcher]
//! max_context_usage = 0.9
//! min_confidence = 0.3
//!
//! [capabilities.claude]
//! refactor = 0.97
//! docs = 0.88
//! ```

use std::{collections::HashMap, path::PathBuf, time::Duration};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct OrchestratorConfig {
    /// Detector poll interval, seconds.
    pub poll_interval_secs: u64,
    /// Seconds of unchanged output (after a burst) before a pane is idle.
    pub idle_threshold_secs: u64,
    /// Sliding window within which at most one event per bead is emitted.
    pub dedup_window_secs: u64,
    /// Scrollback lines captured per observation.
    pub capture_lines: u32,
    /// Deadline for each external invocation (tmux, bead CLI), seconds.
    pub command_timeout_secs: u64,
    /// Retries for idempotent external reads after a timeout.
    pub retry_limit: u32,
    /// Spacing between retries, seconds.
    pub retry_spacing_secs: u64,
    /// Capacity of the detector's event channel.
    pub event_channel_capacity: usize,
    /// Multiplexer binary name.
    pub multiplexer: String,
    /// Matcher thresholds.
    pub matcher: MatcherConfig,
    /// Capability score overrides: kind name -> task name -> score.
    pub capabilities: HashMap<String, HashMap<String, f64>>,
}

/// Matcher preflight and threshold settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct MatcherConfig {
    /// Agents above this context usage are not considered. Inclusive bound.
    pub max_context_usage: f64,
    /// Minimum score for an assignment to be emitted.
    pub min_confidence: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_context_usage: 0.9,
            min_confidence: 0.3,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            idle_threshold_secs: 120,
            dedup_window_secs: 5,
            capture_lines: 50,
            command_timeout_secs: 30,
            retry_limit: 3,
            retry_spacing_secs: 10,
            event_channel_capacity: 10,
            multiplexer: "tmux".to_string(),
            matcher: MatcherConfig::default(),
            capabilities: HashMap::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING & VALIDATION
// ═══════════════════════════════════════════════════════════════════════════

impl OrchestratorConfig {
    /// Parse a TOML document into a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the TOML is malformed, contains
    /// unknown keys, or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` on unreadable or invalid content.
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::IoError(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Validate interval and ratio bounds.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` when any bound is violated.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.idle_threshold_secs == 0 {
            return Err(Error::InvalidConfig(
                "idle_threshold_secs must be non-zero".to_string(),
            ));
        }
        if self.capture_lines == 0 {
            return Err(Error::InvalidConfig(
                "capture_lines must be non-zero".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_channel_capacity must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.matcher.max_context_usage) {
            return Err(Error::InvalidConfig(format!(
                "max_context_usage must be within [0, 1], got {}",
                self.matcher.max_context_usage
            )));
        }
        if !(0.0..=1.0).contains(&self.matcher.min_confidence) {
            return Err(Error::InvalidConfig(format!(
                "min_confidence must be within [0, 1], got {}",
                self.matcher.min_confidence
            )));
        }
        self.capabilities
            .values()
            .flat_map(HashMap::values)
            .try_for_each(|score| {
                if (0.0..=1.0).contains(score) {
                    Ok(())
                } else {
                    Err(Error::InvalidConfig(format!(
                        "capability scores must be within [0, 1], got {score}"
                    )))
                }
            })
    }

    /// Detector poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Idle threshold as a `Duration`.
    #[must_use]
    pub const fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    /// Deduplication window as a `Duration`.
    #[must_use]
    pub const fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    /// External command deadline as a `Duration`.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Default path of the operator config file.
///
/// # Errors
///
/// Returns `Error::InvalidConfig` when no home directory can be determined.
pub fn default_config_path() -> Result<PathBuf> {
    ProjectDirs::from("", "", "fleetmux")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .ok_or_else(|| Error::InvalidConfig("unable to determine config directory".to_string()))
}

/// Default path of the durable state file: `<config dir>/fleetmux/state.db`.
///
/// # Errors
///
/// Returns `Error::InvalidConfig` when no home directory can be determined.
pub fn default_state_db_path() -> Result<PathBuf> {
    ProjectDirs::from("", "", "fleetmux")
        .map(|dirs| dirs.config_dir().join("state.db"))
        .ok_or_else(|| Error::InvalidConfig("unable to determine config directory".to_string()))
}

/// Default directory for per-session timeline JSONL files.
///
/// # Errors
///
/// Returns `Error::InvalidConfig` when no home directory can be determined.
pub fn default_timeline_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", "fleetmux")
        .map(|dirs| dirs.config_dir().join("timelines"))
        .ok_or_else(|| Error::InvalidConfig("unable to determine config directory".to_string()))
}
