//! [`ShieldConfig`] – runtime tuning knobs for the shield service.
//!
//! All values have working defaults; deployments override the ones their
//! downstream contract requires (notably the export-limit range, which the
//! vendor documents inconsistently across firmware generations).

use std::ops::RangeInclusive;
use std::time::Duration;

use gridshield_kernel::ValidatorConfig;

/// Tuning knobs consumed by [`ShieldService`][crate::service::ShieldService].
#[derive(Debug, Clone)]
pub struct ShieldConfig {
    /// Maximum admitted-but-unpurged requests.
    pub capacity: usize,
    /// Minimum spacing between the starts of consecutive dispatch attempts.
    pub min_dispatch_interval: Duration,
    /// Per-attempt bound on the cloud call.
    pub dispatch_timeout: Duration,
    /// Retries after the first failed attempt before a request is terminal.
    pub max_retries: u32,
    /// Backoff after the n-th failure is `backoff_base × n`.
    pub backoff_base: Duration,
    /// How long settled requests stay visible before purge.
    pub retention: Duration,
    /// How often the retention sweep runs.
    pub purge_interval: Duration,
    /// Status bus buffer size.
    pub bus_capacity: usize,
    /// Legal export-limit values, in watts.
    pub export_limit_range: RangeInclusive<u32>,
}

impl ShieldConfig {
    /// The validation bounds carved out of this config.
    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            export_limit_range: self.export_limit_range.clone(),
        }
    }
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            min_dispatch_interval: Duration::from_secs(2),
            dispatch_timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_secs(5),
            retention: Duration::from_secs(60),
            purge_interval: Duration::from_secs(5),
            bus_capacity: 256,
            export_limit_range: 0..=10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ShieldConfig::default();
        assert_eq!(config.capacity, 50);
        assert_eq!(config.min_dispatch_interval, Duration::from_secs(2));
        assert_eq!(config.dispatch_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base, Duration::from_secs(5));
        assert_eq!(config.retention, Duration::from_secs(60));
        assert_eq!(config.export_limit_range, 0..=10_000);
    }

    #[test]
    fn validator_config_carries_the_export_range() {
        let config = ShieldConfig {
            export_limit_range: 1..=20_000,
            ..ShieldConfig::default()
        };
        assert_eq!(config.validator_config().export_limit_range, 1..=20_000);
    }
}
