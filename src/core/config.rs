//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{LscError, Result};

/// Longest accepted tick interval or fetch timeout: one day.
pub const MAX_INTERVAL_MS: u64 = 86_400_000;
/// Longest accepted chart history or insulin effect duration: one week.
pub const MAX_CHART_HOURS: f64 = 168.0;
/// Longest accepted recommendation freshness window: one day.
pub const MAX_FRESHNESS_MINUTES: u64 = 1_440;

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub refresh: RefreshConfig,
    pub chart: ChartConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Refresh pass scheduling knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshConfig {
    /// Runtime wake-up interval.
    pub tick_interval_ms: u64,
    /// Upper bound on a pass's join barrier. `0` waits indefinitely.
    pub fetch_timeout_ms: u64,
}

/// Chart window sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChartConfig {
    /// Minimum horizontal points per charted hour.
    pub minimum_width_per_hour: f64,
    /// History shown even when the future window eats the whole width.
    pub minimum_history_hours: f64,
    /// Insulin effect duration used for the future window.
    pub default_insulin_effect_hours: f64,
    /// Fixed horizontal chrome subtracted from the view width.
    pub horizontal_margin: f64,
    /// View size assumed before the first size change arrives.
    pub initial_width: f64,
    pub initial_height: f64,
}

/// Status-row policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusConfig {
    /// A recommendation is shown only if the loop has not completed within
    /// this many minutes (or dosing is disabled).
    pub recommendation_freshness_minutes: u64,
}

/// Activity log writer tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
    pub channel_capacity: usize,
}

/// Filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            fetch_timeout_ms: 0,
        }
    }
}

impl RefreshConfig {
    /// Tick interval as a `Duration`.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Join-barrier bound, `None` when disabled.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Option<Duration> {
        if self.fetch_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.fetch_timeout_ms))
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            minimum_width_per_hour: 50.0,
            minimum_history_hours: 1.0,
            default_insulin_effect_hours: 4.0,
            horizontal_margin: 0.0,
            initial_width: 375.0,
            initial_height: 667.0,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            recommendation_freshness_minutes: 6,
        }
    }
}

impl StatusConfig {
    /// Freshness window as a chrono duration.
    #[must_use]
    pub fn recommendation_freshness(&self) -> chrono::Duration {
        let minutes = self
            .recommendation_freshness_minutes
            .min(MAX_FRESHNESS_MINUTES);
        i64::try_from(minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 30,
            channel_capacity: 1024,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[LSC-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("lsc").join("config.toml");
        let data = home_dir.join(".local").join("share").join("lsc");
        Self {
            config_file: cfg,
            jsonl_log: data.join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| LscError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(LscError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // refresh
        override_parsed(
            &mut lookup,
            "LSC_REFRESH_TICK_INTERVAL_MS",
            &mut self.refresh.tick_interval_ms,
        )?;
        override_parsed(
            &mut lookup,
            "LSC_REFRESH_FETCH_TIMEOUT_MS",
            &mut self.refresh.fetch_timeout_ms,
        )?;

        // chart
        override_parsed(
            &mut lookup,
            "LSC_CHART_MINIMUM_WIDTH_PER_HOUR",
            &mut self.chart.minimum_width_per_hour,
        )?;
        override_parsed(
            &mut lookup,
            "LSC_CHART_MINIMUM_HISTORY_HOURS",
            &mut self.chart.minimum_history_hours,
        )?;
        override_parsed(
            &mut lookup,
            "LSC_CHART_DEFAULT_INSULIN_EFFECT_HOURS",
            &mut self.chart.default_insulin_effect_hours,
        )?;

        // status
        override_parsed(
            &mut lookup,
            "LSC_STATUS_RECOMMENDATION_FRESHNESS_MINUTES",
            &mut self.status.recommendation_freshness_minutes,
        )?;

        // logging / paths
        override_parsed(
            &mut lookup,
            "LSC_LOGGING_CHANNEL_CAPACITY",
            &mut self.logging.channel_capacity,
        )?;
        if let Some(raw) = lookup("LSC_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.refresh.tick_interval_ms == 0 || self.refresh.tick_interval_ms > MAX_INTERVAL_MS {
            return Err(LscError::InvalidConfig {
                details: format!(
                    "refresh.tick_interval_ms must be within 1..={MAX_INTERVAL_MS}, got {}",
                    self.refresh.tick_interval_ms
                ),
            });
        }
        if self.refresh.fetch_timeout_ms > MAX_INTERVAL_MS {
            return Err(LscError::InvalidConfig {
                details: format!(
                    "refresh.fetch_timeout_ms must be <= {MAX_INTERVAL_MS}, got {}",
                    self.refresh.fetch_timeout_ms
                ),
            });
        }

        for (name, val) in [
            ("minimum_width_per_hour", self.chart.minimum_width_per_hour),
            ("default_insulin_effect_hours", self.chart.default_insulin_effect_hours),
            ("initial_width", self.chart.initial_width),
            ("initial_height", self.chart.initial_height),
        ] {
            if !(val.is_finite() && val > 0.0) {
                return Err(LscError::InvalidConfig {
                    details: format!("chart.{name} must be a positive number, got {val}"),
                });
            }
        }

        for (name, val) in [
            ("minimum_history_hours", self.chart.minimum_history_hours),
            ("horizontal_margin", self.chart.horizontal_margin),
        ] {
            if !(val.is_finite() && val >= 0.0) {
                return Err(LscError::InvalidConfig {
                    details: format!("chart.{name} must be >= 0, got {val}"),
                });
            }
        }

        for (name, val) in [
            ("minimum_history_hours", self.chart.minimum_history_hours),
            ("default_insulin_effect_hours", self.chart.default_insulin_effect_hours),
        ] {
            if val > MAX_CHART_HOURS {
                return Err(LscError::InvalidConfig {
                    details: format!("chart.{name} must be <= {MAX_CHART_HOURS}, got {val}"),
                });
            }
        }

        let freshness = self.status.recommendation_freshness_minutes;
        if freshness == 0 || freshness > MAX_FRESHNESS_MINUTES {
            return Err(LscError::InvalidConfig {
                details: format!(
                    "status.recommendation_freshness_minutes must be within 1..={MAX_FRESHNESS_MINUTES}, got {freshness}"
                ),
            });
        }

        if self.logging.channel_capacity == 0 {
            return Err(LscError::InvalidConfig {
                details: "logging.channel_capacity must be > 0".to_string(),
            });
        }

        if self.logging.max_rotated_files == 0 || self.logging.max_size_bytes == 0 {
            return Err(LscError::InvalidConfig {
                details: "logging.max_rotated_files and logging.max_size_bytes must be > 0"
                    .to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn override_parsed<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<T>().map_err(|error| LscError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}
