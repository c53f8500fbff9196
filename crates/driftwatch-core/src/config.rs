//! Reconciliation configuration.
//!
//! All timing knobs are explicit, named values with documented defaults; the
//! windows that used to be hardcoded inline in investigation scripts live
//! here. `validate` enforces the scheduler's safety invariant — the
//! monitoring window must exceed the check interval so consecutive passes
//! overlap and boundary events are seen at least twice.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Correlation window W in seconds. A downstream record must appear
    /// strictly within W of the source event. Default 300 (the empirical
    /// propagation SLA).
    #[serde(default = "default_match_window_secs")]
    pub match_window_secs: u64,

    /// Minutes between scheduled reconciliation passes. Default 55.
    #[serde(default = "default_check_interval_mins")]
    pub check_interval_mins: u64,

    /// Trailing window each pass examines, in minutes. Must exceed
    /// `check_interval_mins`; the difference is the overlap safety margin.
    /// Default 60.
    #[serde(default = "default_monitoring_window_mins")]
    pub monitoring_window_mins: u64,

    /// Success-rate percentage below which a pass raises an ALERT. Default 95.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    /// Success-rate percentage below which a pass raises CRITICAL. Default 80.
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,

    /// Correlation lookups run in batches of this many parallel queries.
    /// Default 10.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between remediation replay calls, in milliseconds. Default 500.
    #[serde(default = "default_replay_delay_ms")]
    pub replay_delay_ms: u64,

    /// Whether scheduled passes replay detected gaps. Default off.
    #[serde(default)]
    pub auto_remediate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            match_window_secs: default_match_window_secs(),
            check_interval_mins: default_check_interval_mins(),
            monitoring_window_mins: default_monitoring_window_mins(),
            alert_threshold: default_alert_threshold(),
            critical_threshold: default_critical_threshold(),
            batch_size: default_batch_size(),
            replay_delay_ms: default_replay_delay_ms(),
            auto_remediate: false,
        }
    }
}

const fn default_match_window_secs() -> u64 {
    300
}
const fn default_check_interval_mins() -> u64 {
    55
}
const fn default_monitoring_window_mins() -> u64 {
    60
}
const fn default_alert_threshold() -> f64 {
    95.0
}
const fn default_critical_threshold() -> f64 {
    80.0
}
const fn default_batch_size() -> usize {
    10
}
const fn default_replay_delay_ms() -> u64 {
    500
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the rest of the system assumes.
    pub fn validate(&self) -> Result<()> {
        if self.match_window_secs == 0 {
            bail!("match_window_secs must be positive");
        }
        if self.check_interval_mins == 0 {
            bail!("check_interval_mins must be positive");
        }
        if self.monitoring_window_mins <= self.check_interval_mins {
            bail!(
                "monitoring_window_mins ({}) must exceed check_interval_mins ({}) \
                 so consecutive passes overlap",
                self.monitoring_window_mins,
                self.check_interval_mins
            );
        }
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if !(0.0..=100.0).contains(&self.alert_threshold)
            || !(0.0..=100.0).contains(&self.critical_threshold)
        {
            bail!("thresholds must be percentages in 0..=100");
        }
        if self.critical_threshold > self.alert_threshold {
            bail!(
                "critical_threshold ({}) must not exceed alert_threshold ({})",
                self.critical_threshold,
                self.alert_threshold
            );
        }
        Ok(())
    }

    /// Correlation window as a chrono duration.
    #[must_use]
    pub fn match_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.match_window_secs).unwrap_or(i64::MAX))
    }

    /// Pass cadence.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_mins * 60)
    }

    /// Trailing window each pass examines.
    #[must_use]
    pub const fn monitoring_window(&self) -> Duration {
        Duration::from_secs(self.monitoring_window_mins * 60)
    }

    /// Pause between replay calls.
    #[must_use]
    pub const fn replay_delay(&self) -> Duration {
        Duration::from_millis(self.replay_delay_ms)
    }
}
