//! Configuration for the reconciliation core.
//!
//! All tunables are explicit construction-time values; nothing reads ambient
//! global state.

use crate::domain::money::Currency;
use std::time::Duration;

/// Configuration injected into the core components at construction.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Fixed numeric prefix of every issued control number.
    pub code_prefix: String,

    /// Number of random digits appended after the time-derived digits.
    pub code_random_digits: usize,

    /// Retry budget for the collision loop during code generation.
    pub generation_attempts: u32,

    /// Default payment window of a new control number.
    pub default_expiry: chrono::Duration,

    /// Default overall validity window of a new control number.
    pub default_validity: chrono::Duration,

    /// Upper bound on `batch_generate` counts.
    pub max_batch_size: usize,

    /// Lifetime granted to an activated service entitlement, if bounded.
    pub service_duration: Option<chrono::Duration>,

    /// Timeout applied to every provider adapter call.
    pub provider_timeout: Duration,

    /// Currency of this deployment.
    pub currency: Currency,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            code_prefix: "994".to_string(),
            code_random_digits: 6,
            generation_attempts: 5,
            default_expiry: chrono::Duration::hours(24),
            default_validity: chrono::Duration::days(7),
            max_batch_size: 1000,
            service_duration: Some(chrono::Duration::days(30)),
            provider_timeout: Duration::from_secs(10),
            currency: Currency::Tzs,
        }
    }
}

/// Builder for [`CoreConfig`].
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
        }
    }

    pub fn code_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.code_prefix = prefix.into();
        self
    }

    pub fn generation_attempts(mut self, attempts: u32) -> Self {
        self.config.generation_attempts = attempts;
        self
    }

    pub fn default_expiry(mut self, window: chrono::Duration) -> Self {
        self.config.default_expiry = window;
        self
    }

    pub fn default_validity(mut self, window: chrono::Duration) -> Self {
        self.config.default_validity = window;
        self
    }

    pub fn max_batch_size(mut self, bound: usize) -> Self {
        self.config.max_batch_size = bound;
        self
    }

    pub fn service_duration(mut self, duration: Option<chrono::Duration>) -> Self {
        self.config.service_duration = duration;
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.config.provider_timeout = timeout;
        self
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.config.currency = currency;
        self
    }

    pub fn build(self) -> CoreConfig {
        self.config
    }
}

impl Default for CoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.default_expiry, chrono::Duration::hours(24));
        assert_eq!(config.default_validity, chrono::Duration::days(7));
        assert_eq!(config.generation_attempts, 5);
        assert_eq!(config.max_batch_size, 1000);
    }

    #[test]
    fn test_builder_overrides() {
        let config = CoreConfigBuilder::new()
            .code_prefix("77")
            .generation_attempts(3)
            .provider_timeout(Duration::from_millis(250))
            .build();

        assert_eq!(config.code_prefix, "77");
        assert_eq!(config.generation_attempts, 3);
        assert_eq!(config.provider_timeout, Duration::from_millis(250));
        // Untouched fields keep their defaults
        assert_eq!(config.max_batch_size, 1000);
    }
}
