//! Workload configuration and the optional TOML tuning profile.
//!
//! Positional CLI arguments fill the headline knobs (pool size, duration,
//! interval range); a tuning profile can override the rest:
//!
//! ```toml
//! workers = 20
//! acquire_timeout = "2s"
//! probe_timeout = "10s"
//! stats_interval = "30s"
//! worker_stagger = "250ms"
//! error_cap = 25
//! probe_query = "SELECT @@SPID AS SessionID"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{MAX_SPAN, parse_duration, serialize_secs};
use crate::error::{ConfigError, ConfigResult};

/// Cheap round trip used by `release` to decide whether a connection is reusable.
pub const LIVENESS_QUERY: &str = "SELECT 1";

/// The measured operation: returns the server session id and server time.
pub const DEFAULT_PROBE_QUERY: &str =
    "SELECT @@SPID AS SessionID, CONVERT(varchar(23), GETDATE(), 121) AS QueryTime";

/// Everything the workload driver needs besides the target itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadConfig {
    pub pool_size: usize,
    /// Worker count; `None` means one worker per pooled connection.
    pub workers: Option<usize>,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub min_interval: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub max_interval: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub acquire_timeout: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub connect_timeout: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub probe_timeout: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub liveness_timeout: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub stats_interval: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub worker_stagger: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub join_timeout: Duration,
    /// Unique error messages kept by the aggregator.
    pub error_cap: usize,
    pub probe_query: String,
    pub liveness_query: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            workers: None,
            duration: Duration::from_secs(10 * 60),
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(60),
            worker_stagger: Duration::from_millis(100),
            join_timeout: Duration::from_secs(10),
            error_cap: 10,
            probe_query: DEFAULT_PROBE_QUERY.to_string(),
            liveness_query: LIVENESS_QUERY.to_string(),
        }
    }
}

impl WorkloadConfig {
    /// Number of worker tasks to spawn.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(self.pool_size)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool size must be at least 1".into()));
        }
        if self.worker_count() == 0 {
            return Err(ConfigError::Invalid("worker count must be at least 1".into()));
        }
        if self.min_interval > self.max_interval {
            return Err(ConfigError::Invalid(format!(
                "min interval ({:.3}s) exceeds max interval ({:.3}s)",
                self.min_interval.as_secs_f64(),
                self.max_interval.as_secs_f64()
            )));
        }
        for (name, value) in [
            ("duration", self.duration),
            ("acquire timeout", self.acquire_timeout),
            ("connect timeout", self.connect_timeout),
            ("probe timeout", self.probe_timeout),
            ("liveness timeout", self.liveness_timeout),
            ("stats interval", self.stats_interval),
            ("join timeout", self.join_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        for (name, value) in [
            ("duration", self.duration),
            ("max interval", self.max_interval),
            ("stats interval", self.stats_interval),
        ] {
            if value > MAX_SPAN {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {} days",
                    MAX_SPAN.as_secs() / 86_400
                )));
            }
        }
        if self.probe_query.trim().is_empty() || self.liveness_query.trim().is_empty() {
            return Err(ConfigError::Invalid("queries must not be empty".into()));
        }
        Ok(())
    }
}

/// Optional overrides loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TuningProfile {
    pub workers: Option<usize>,
    pub acquire_timeout: Option<String>,
    pub connect_timeout: Option<String>,
    pub probe_timeout: Option<String>,
    pub liveness_timeout: Option<String>,
    pub stats_interval: Option<String>,
    pub worker_stagger: Option<String>,
    pub join_timeout: Option<String>,
    pub error_cap: Option<usize>,
    pub probe_query: Option<String>,
    pub liveness_query: Option<String>,
}

impl TuningProfile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay every field that is set onto `config`.
    pub fn apply(&self, config: &mut WorkloadConfig) -> ConfigResult<()> {
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(cap) = self.error_cap {
            config.error_cap = cap;
        }
        if let Some(q) = &self.probe_query {
            config.probe_query = q.clone();
        }
        if let Some(q) = &self.liveness_query {
            config.liveness_query = q.clone();
        }

        let durations: [(&str, &Option<String>, &mut Duration); 7] = [
            ("acquire_timeout", &self.acquire_timeout, &mut config.acquire_timeout),
            ("connect_timeout", &self.connect_timeout, &mut config.connect_timeout),
            ("probe_timeout", &self.probe_timeout, &mut config.probe_timeout),
            ("liveness_timeout", &self.liveness_timeout, &mut config.liveness_timeout),
            ("stats_interval", &self.stats_interval, &mut config.stats_interval),
            ("worker_stagger", &self.worker_stagger, &mut config.worker_stagger),
            ("join_timeout", &self.join_timeout, &mut config.join_timeout),
        ];
        for (name, raw, slot) in durations {
            if let Some(raw) = raw {
                *slot = parse_duration(raw).ok_or_else(|| {
                    ConfigError::Invalid(format!("{name}: cannot parse duration '{raw}'"))
                })?;
            }
        }
        Ok(())
    }
}
