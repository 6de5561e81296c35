use crate::error::{BookingError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

/// Runtime settings for the reservation engine.
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | STAYLINE_TAX_RATE | 0.20 | Tax applied to base + options |
/// | STAYLINE_PROCESSOR_TIMEOUT_MS | 10000 | Bound on each payment processor call |
/// | STAYLINE_SESSION_RETRY_BACKOFF_MS | 250 | Pause before retrying a timed-out session request |
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub tax_rate: Decimal,
    pub processor_timeout: Duration,
    pub session_retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.20),
            processor_timeout: Duration::from_millis(10_000),
            session_retry_backoff: Duration::from_millis(250),
        }
    }
}

impl EngineConfig {
    /// Loads settings from the environment, keeping defaults for anything unset,
    /// unparsable or out of range.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tax_rate: std::env::var("STAYLINE_TAX_RATE")
                .ok()
                .and_then(|v| v.trim().parse::<Decimal>().ok())
                .filter(|rate| !rate.is_sign_negative())
                .unwrap_or(defaults.tax_rate),
            processor_timeout: std::env::var("STAYLINE_PROCESSOR_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.processor_timeout),
            session_retry_backoff: std::env::var("STAYLINE_SESSION_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.session_retry_backoff),
        }
    }

    /// Sets the tax rate. Negative rates are rejected.
    pub fn with_tax_rate(mut self, tax_rate: Decimal) -> Result<Self> {
        if tax_rate.is_sign_negative() {
            return Err(BookingError::InvalidRequest(format!(
                "tax rate must not be negative, got {}",
                tax_rate
            )));
        }
        self.tax_rate = tax_rate;
        Ok(self)
    }

    pub fn with_processor_timeout(mut self, timeout: Duration) -> Self {
        self.processor_timeout = timeout;
        self
    }

    pub fn with_session_retry_backoff(mut self, backoff: Duration) -> Self {
        self.session_retry_backoff = backoff;
        self
    }
}
