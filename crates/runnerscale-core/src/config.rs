//! runnerscale.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};

/// How long a computed desired-replica value stays cached on the status.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(10 * 60);

/// Scale-down delay applied when an autoscaler does not override it.
pub const DEFAULT_SCALE_DOWN_DELAY: Duration = Duration::from_secs(10 * 60);

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Oldest demand snapshot the snapshot evaluator will still trust.
pub const DEFAULT_DEMAND_STALENESS: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_DATA_DIR: &str = "/var/lib/runnerscale";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerscaleConfig {
    pub controller: ControllerConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub cache_duration: Option<String>,
    pub scale_down_delay: Option<String>,
    pub sync_interval: Option<String>,
    pub max_backoff: Option<String>,
    pub demand_staleness: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: Option<PathBuf>,
}

/// Resolved controller timings, with every default applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub cache_duration: Duration,
    pub scale_down_delay: Duration,
    pub sync_interval: Duration,
    pub max_backoff: Duration,
    pub demand_staleness: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            cache_duration: DEFAULT_CACHE_DURATION,
            scale_down_delay: DEFAULT_SCALE_DOWN_DELAY,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            max_backoff: DEFAULT_MAX_BACKOFF,
            demand_staleness: DEFAULT_DEMAND_STALENESS,
        }
    }
}

impl RunnerscaleConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve the `[controller]` section into concrete durations.
    ///
    /// `cache_duration` and `scale_down_delay` are compared against unix
    /// second timestamps, so they must be whole seconds. A zero
    /// `cache_duration` falls back to the default, matching the behavior of
    /// leaving it unset.
    pub fn controller_settings(&self) -> ConfigResult<ControllerSettings> {
        let c = &self.controller;
        let cache_duration = whole_seconds(
            "cache_duration",
            resolve("cache_duration", &c.cache_duration, DEFAULT_CACHE_DURATION)?,
        )?;
        let settings = ControllerSettings {
            cache_duration: if cache_duration.is_zero() {
                DEFAULT_CACHE_DURATION
            } else {
                cache_duration
            },
            scale_down_delay: whole_seconds(
                "scale_down_delay",
                resolve(
                    "scale_down_delay",
                    &c.scale_down_delay,
                    DEFAULT_SCALE_DOWN_DELAY,
                )?,
            )?,
            sync_interval: resolve("sync_interval", &c.sync_interval, DEFAULT_SYNC_INTERVAL)?,
            max_backoff: resolve("max_backoff", &c.max_backoff, DEFAULT_MAX_BACKOFF)?,
            demand_staleness: resolve(
                "demand_staleness",
                &c.demand_staleness,
                DEFAULT_DEMAND_STALENESS,
            )?,
        };
        if settings.sync_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sync_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(settings)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.store
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }
}

fn resolve(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> ConfigResult<Duration> {
    match value {
        None => Ok(default),
        Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
            field,
            value: raw.clone(),
        }),
    }
}

fn whole_seconds(field: &'static str, value: Duration) -> ConfigResult<Duration> {
    if value.subsec_nanos() != 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("{value:?} is not a whole number of seconds"),
        });
    }
    Ok(value)
}
