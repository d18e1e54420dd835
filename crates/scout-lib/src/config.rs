//! Run configuration for the sampler

use crate::error::SpyError;
use std::path::PathBuf;
use std::time::Duration;

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Configuration for one sampling run
///
/// Constructed once by the caller and handed to the coordinator by value.
#[derive(Debug, Clone)]
pub struct SpyConfig {
    /// Namespace to discover pods in (default: `default`)
    pub namespace: Option<String>,
    /// Restrict the run to a single pod
    pub entity_filter: Option<String>,
    /// Write the final table to this file instead of stdout
    pub output_path: Option<PathBuf>,
    /// Redraw the table in place until cancelled
    pub live_refresh: bool,
    /// Interval between provider fetches per stream (default: 15 seconds)
    pub poll_interval: Duration,
    /// Interval between live redraws (default: 1 second)
    pub redraw_interval: Duration,
    /// Upper bound on a single provider fetch (default: 5 seconds)
    pub fetch_timeout: Duration,
    /// Consecutive failures before a stream is marked degraded
    pub max_consecutive_failures: u32,
    /// Budget for finalization after cancellation (default: 10 seconds)
    pub shutdown_timeout: Duration,
    /// Stop on its own after this long
    pub run_for: Option<Duration>,
}

impl Default for SpyConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            entity_filter: None,
            output_path: None,
            live_refresh: false,
            poll_interval: Duration::from_secs(15),
            redraw_interval: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(5),
            max_consecutive_failures: 3,
            shutdown_timeout: Duration::from_secs(10),
            run_for: None,
        }
    }
}

impl SpyConfig {
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Check field combinations the coordinator cannot run with
    pub fn validate(&self) -> Result<(), SpyError> {
        if self.poll_interval.is_zero() {
            return Err(SpyError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }
        if self.live_refresh && self.redraw_interval.is_zero() {
            return Err(SpyError::InvalidConfig(
                "redraw interval must be greater than zero".into(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(SpyError::InvalidConfig(
                "fetch timeout must be greater than zero".into(),
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(SpyError::InvalidConfig(
                "shutdown timeout must be greater than zero".into(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(SpyError::InvalidConfig(
                "max consecutive failures must be at least 1".into(),
            ));
        }
        if self.live_refresh && self.output_path.is_some() {
            return Err(SpyError::InvalidConfig(
                "live refresh draws to the terminal and cannot be combined with an output file"
                    .into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spy_config_default() {
        let config = SpyConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.redraw_interval, Duration::from_secs(1));
        assert_eq!(config.namespace(), "default");
        assert!(!config.live_refresh);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_live_refresh_rejects_output_file() {
        let config = SpyConfig {
            live_refresh: true,
            output_path: Some(PathBuf::from("/tmp/averages.txt")),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SpyError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = SpyConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_shutdown_timeout_rejected() {
        let config = SpyConfig {
            shutdown_timeout: Duration::ZERO,
            ..Default::default()
        };
        match config.validate() {
            Err(SpyError::InvalidConfig(message)) => assert!(message.contains("shutdown timeout")),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }
}
