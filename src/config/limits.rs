//! Rate limit and stream lifecycle configuration.

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Daily message quotas and stream registration lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Messages per UTC day for anonymous callers
    #[serde(default = "default_anonymous_daily")]
    pub anonymous_daily: u32,

    /// Messages per UTC day for authenticated callers
    #[serde(default = "default_authenticated_daily")]
    pub authenticated_daily: u32,

    /// Seconds a stream registration stays resumable
    #[serde(default = "default_stream_ttl")]
    pub stream_ttl_secs: u64,

    /// Character budget for generated chat titles
    #[serde(default = "default_title_budget")]
    pub title_max_chars: usize,
}

impl LimitsConfig {
    /// Quota for a caller given their anonymity flag.
    pub fn daily_limit(&self, is_anonymous: bool) -> u32 {
        if is_anonymous {
            self.anonymous_daily
        } else {
            self.authenticated_daily
        }
    }

    /// Stream registration TTL as Duration.
    pub fn stream_ttl(&self) -> Duration {
        Duration::from_secs(self.stream_ttl_secs)
    }

    /// Validate limit configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.anonymous_daily == 0 || self.authenticated_daily == 0 {
            return Err(ValidationError::InvalidRateLimit);
        }
        if self.stream_ttl_secs == 0 {
            return Err(ValidationError::InvalidStreamTtl);
        }
        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            anonymous_daily: default_anonymous_daily(),
            authenticated_daily: default_authenticated_daily(),
            stream_ttl_secs: default_stream_ttl(),
            title_max_chars: default_title_budget(),
        }
    }
}

fn default_anonymous_daily() -> u32 {
    10
}

fn default_authenticated_daily() -> u32 {
    50
}

fn default_stream_ttl() -> u64 {
    300
}

fn default_title_budget() -> usize {
    80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_quota_is_lower() {
        let limits = LimitsConfig::default();
        assert!(limits.daily_limit(true) < limits.daily_limit(false));
        assert_eq!(limits.daily_limit(true), 10);
        assert_eq!(limits.daily_limit(false), 50);
    }

    #[test]
    fn zero_quota_fails_validation() {
        let limits = LimitsConfig {
            anonymous_daily: 0,
            ..Default::default()
        };
        assert!(limits.validate().is_err());
    }
}
