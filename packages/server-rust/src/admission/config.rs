//! Rate limiter configuration.

/// Token-bucket parameters applied to every client identity.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    /// Burst size: tokens held by a fresh or fully idle client.
    pub capacity: u32,
    /// Steady-state refill rate in requests per second.
    pub refill_rate: f64,
    /// When `false`, every request is admitted without touching the registry.
    pub enabled: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            refill_rate: 2.0,
            enabled: true,
        }
    }
}

/// Rejected limiter parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("limiter burst must be a positive integer")]
    ZeroCapacity,
    #[error("limiter rate must be a positive, finite number of requests per second, got {0}")]
    InvalidRate(f64),
}

impl LimiterConfig {
    /// Checks that the bucket parameters describe a usable limiter.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the capacity is zero or the rate is not a
    /// positive finite number.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(ConfigError::InvalidRate(self.refill_rate));
        }
        Ok(())
    }
}
