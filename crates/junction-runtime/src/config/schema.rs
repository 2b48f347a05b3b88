//! Configuration schema definitions.
//!
//! Every section has serde defaults, so an empty file (or no file at all)
//! yields a usable configuration. Durations are given in milliseconds.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JunctionConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Defaults applied to aggregators built by the runtime.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Defaults applied to scatter-gather handlers built by the runtime.
    #[serde(default)]
    pub scatter_gather: ScatterGatherConfig,

    /// Background expiry of stale groups.
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// The shared message-group store.
    #[serde(default)]
    pub store: StoreConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level as a filter directive string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to the corresponding `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` without it.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation of the log file when `output = "file"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global level, overridden by `RUST_LOG` when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, required for `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids in log lines.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in log lines.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target levels, e.g. `junction_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

// =============================================================================
// Components
// =============================================================================

/// Aggregator defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Remove released groups instead of keeping them as completed markers.
    #[serde(default)]
    pub expire_groups_upon_completion: bool,

    /// Release partial groups on expiry instead of discarding them.
    #[serde(default)]
    pub send_partial_result_on_expiry: bool,

    /// Force-complete groups idle for this long.
    #[serde(default)]
    pub group_timeout_ms: Option<u64>,

    /// Remove groups force-completed by the group timeout.
    #[serde(default = "default_true")]
    pub expire_groups_upon_timeout: bool,

    /// Bound on sending to the output and discard channels.
    #[serde(default)]
    pub send_timeout_ms: Option<u64>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            expire_groups_upon_completion: false,
            send_partial_result_on_expiry: false,
            group_timeout_ms: None,
            expire_groups_upon_timeout: true,
            send_timeout_ms: None,
        }
    }
}

impl AggregatorConfig {
    pub fn group_timeout(&self) -> Option<Duration> {
        self.group_timeout_ms.map(Duration::from_millis)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }
}

/// Scatter-gather defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScatterGatherConfig {
    /// How long a request waits for its gathered result.
    #[serde(default = "default_gather_timeout_ms")]
    pub gather_timeout_ms: u64,

    /// Fail requests whose gather times out instead of producing no reply.
    #[serde(default)]
    pub requires_reply: bool,
}

impl Default for ScatterGatherConfig {
    fn default() -> Self {
        Self {
            gather_timeout_ms: default_gather_timeout_ms(),
            requires_reply: false,
        }
    }
}

impl ScatterGatherConfig {
    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }
}

/// Background reaper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Run a reaper over the shared store.
    #[serde(default)]
    pub enabled: bool,

    /// Time between sweeps.
    #[serde(default = "default_reaper_interval_ms")]
    pub interval_ms: u64,

    /// Age after which a group is expired.
    #[serde(default = "default_reaper_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_reaper_interval_ms(),
            timeout_ms: default_reaper_timeout_ms(),
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Message-group store backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process store; groups are lost on restart.
    #[default]
    Memory,
    /// One JSON document per group in a directory.
    File,
}

/// Store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,

    /// Directory for the file store.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Maximum messages per group; memory store only.
    #[serde(default)]
    pub group_capacity: Option<usize>,

    /// Measure expiry from the last modification instead of creation.
    #[serde(default)]
    pub timeout_on_idle: bool,
}

fn default_true() -> bool {
    true
}

fn default_gather_timeout_ms() -> u64 {
    30_000
}

fn default_reaper_interval_ms() -> u64 {
    10_000
}

fn default_reaper_timeout_ms() -> u64 {
    60_000
}
