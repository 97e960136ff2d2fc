use serde::Deserialize;

/// Scheduler and daemon tuning knobs. Every field falls back to a `GANTRY_*`
/// environment variable and then to a built-in default, so a partial YAML
/// config file only needs to name what it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sweep interval in seconds (supports fractional seconds like 0.5)
    pub sweep_interval_secs: f64,

    /// Seconds without a testbed report before it is marked offline
    pub offline_after_secs: i64,

    /// Seconds without a testbed report before its record is deleted
    pub purge_after_secs: i64,

    /// Grace added on top of a definition's execution time when computing
    /// the assignment deadline
    pub grace_period_secs: i64,

    /// Timeout for one dispatch request to a testbed
    pub dispatch_timeout_secs: u64,

    /// Timeout for status probes and abort requests
    pub probe_timeout_secs: u64,

    /// Timeout for one score-command invocation
    pub scoring_timeout_secs: u64,

    /// Maximum concurrent dispatch requests per sweep
    pub max_concurrent_dispatches: usize,

    /// Seconds after which a silent scheduler lease may be taken over
    pub lease_ttl_secs: i64,

    /// Database connection pool size
    pub db_pool_size: u32,

    /// Directory for returned output files
    pub data_dir: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: env_or("GANTRY_SWEEP_INTERVAL_SECS", 3.0),
            offline_after_secs: env_or("GANTRY_OFFLINE_AFTER_SECS", 30),
            purge_after_secs: env_or("GANTRY_PURGE_AFTER_SECS", 600),
            grace_period_secs: env_or("GANTRY_GRACE_PERIOD_SECS", 600),
            dispatch_timeout_secs: env_or("GANTRY_DISPATCH_TIMEOUT_SECS", 15),
            probe_timeout_secs: env_or("GANTRY_PROBE_TIMEOUT_SECS", 5),
            scoring_timeout_secs: env_or("GANTRY_SCORING_TIMEOUT_SECS", 60),
            max_concurrent_dispatches: env_or("GANTRY_MAX_CONCURRENT_DISPATCHES", 8),
            lease_ttl_secs: env_or("GANTRY_LEASE_TTL_SECS", 15),
            db_pool_size: env_or("GANTRY_DB_POOL_SIZE", 5),
            data_dir: env_or("GANTRY_DATA_DIR", "./gantry-data".to_string()),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SchedulerConfig::default();
        assert!(config.sweep_interval_secs > 0.0);
        assert!(config.offline_after_secs < config.purge_after_secs);
        assert!(config.max_concurrent_dispatches > 0);
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_the_rest() {
        let config: SchedulerConfig =
            serde_yaml::from_str("sweep_interval_secs: 0.25\ngrace_period_secs: 10\n")
                .expect("parse config");
        assert_eq!(config.sweep_interval_secs, 0.25);
        assert_eq!(config.grace_period_secs, 10);
        assert_eq!(config.offline_after_secs, SchedulerConfig::default().offline_after_secs);
    }
}
