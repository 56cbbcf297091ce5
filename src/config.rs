//! Election timing configuration.

use crate::error::LeadershipError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs for a [`crate::engine::Topic`].
///
/// Defaults are a 5s heartbeat and a 15s remote timeout: a 3x ratio
/// that tolerates two missed heartbeats. Any ratio below 2x is
/// rejected by [`ElectionConfig::validate`], since a remote leader
/// could otherwise be evicted before it even had a chance to miss a
/// heartbeat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// How often the periodic task ticks: heartbeats while leading,
    /// checks remote staleness otherwise.
    pub periodic_interval: Duration,
    /// How long a remote leader may go without a broadcast before this
    /// engine locally evicts it.
    pub remote_timeout: Duration,
}

impl ElectionConfig {
    pub fn validate(&self) -> Result<(), LeadershipError> {
        if self.periodic_interval.is_zero() {
            return Err(LeadershipError::Configuration(
                "periodic_interval must be greater than zero".to_string(),
            ));
        }
        if self.remote_timeout < self.periodic_interval * 2 {
            return Err(LeadershipError::Configuration(format!(
                "remote_timeout ({:?}) must be at least 2x periodic_interval ({:?})",
                self.remote_timeout, self.periodic_interval
            )));
        }
        Ok(())
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            periodic_interval: Duration::from_millis(5_000),
            remote_timeout: Duration::from_millis(15_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ElectionConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_ratio_below_two() {
        let config = ElectionConfig {
            periodic_interval: Duration::from_millis(5_000),
            remote_timeout: Duration::from_millis(9_000),
        };
        assert!(config.validate().is_err());
    }
}
