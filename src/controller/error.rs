//! Error types for the database controllers

use std::time::Duration;

use thiserror::Error;

use crate::driver::DriverError;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Driver unavailable (will retry): {0}")]
    DriverTransient(DriverError),

    #[error("Driver protocol error: {0}")]
    DriverFatal(DriverError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        if e.is_transient() {
            Error::DriverTransient(e)
        } else {
            Error::DriverFatal(e)
        }
    }
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                // Network and other errors are retryable
                _ => true,
            },
            Error::DriverTransient(_) => true,
            Error::DriverFatal(_) => false,
            Error::ValidationError(_) => false,
            Error::NotReady(_) => true,
            // The referenced record might appear later
            Error::NotFound(_) => true,
            Error::FinalizerError(_) => true,
            Error::MissingObjectKey(_) => false,
        }
    }

    /// Check if this is a 404 from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(e) if crate::store::is_not_found(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_delay_secs = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        // Past the cap the base may overflow to infinity, which turns jitter into NaN
        if !base_delay_secs.is_finite() || base_delay_secs >= max_delay_secs {
            return self.max_delay;
        }

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(max_delay_secs);

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Terminal errors wait for the record to change
            self.max_delay
        }
    }
}
