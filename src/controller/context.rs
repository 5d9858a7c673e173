use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use kube::runtime::controller::Action;
use tracing::{error, warn};

use crate::controller::error::{BackoffConfig, Error};
use crate::driver::DriverGateway;
use crate::health::HealthState;
use crate::store::{KubeStore, Store};

/// Shared context for the controllers
pub struct Context<S: Store = KubeStore> {
    /// Record store (the API server in production)
    pub store: S,
    /// Driver access
    pub driver: DriverGateway,
    /// Name the driver reported at startup; records for other drivers are skipped
    pub driver_name: String,
    /// Health state for recording metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
    /// Requeue policy for failed reconciliations
    pub backoff: BackoffConfig,
    /// Consecutive failures per object key
    failures: Mutex<HashMap<String, u32>>,
}

impl<S: Store> Context<S> {
    pub fn new(store: S, driver: DriverGateway, driver_name: impl Into<String>) -> Self {
        Self {
            store,
            driver,
            driver_name: driver_name.into(),
            health_state: None,
            backoff: BackoffConfig::default(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_health_state(mut self, health_state: Option<Arc<HealthState>>) -> Self {
        self.health_state = health_state;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether a record naming `driver_name` belongs to this operator's driver
    pub fn owns_driver(&self, driver_name: &str) -> bool {
        self.driver_name.eq_ignore_ascii_case(driver_name)
    }

    /// Record a successful reconciliation
    pub fn record_success(&self, controller: &str, key: &str, duration_secs: f64) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(ref state) = self.health_state {
            state.metrics.record_reconcile(controller, duration_secs);
            state.touch_reconcile();
        }
    }

    /// Record a failed reconciliation and return how many failed in a row before it
    pub fn record_failure(&self, controller: &str, key: &str) -> u32 {
        if let Some(ref state) = self.health_state {
            state.metrics.record_error(controller);
        }
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.to_string()).or_insert(0);
        let attempt = *count;
        *count = count.saturating_add(1);
        attempt
    }

    /// Drop the failure streak of a record that no longer exists
    pub fn forget(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Consecutive failures currently recorded for `key`
    pub fn failure_count(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Shared error policy: exponential backoff keyed by consecutive failures
    pub fn requeue_after_error(&self, controller: &str, key: &str, error: &Error) -> Action {
        let attempt = self.record_failure(controller, key);
        let delay = self.backoff.delay_for_error(error, attempt);

        if error.is_retryable() {
            warn!(
                controller,
                object = key,
                attempt,
                "Retryable error: {}, requeuing in {:?}",
                error,
                delay
            );
        } else {
            error!(
                controller,
                object = key,
                "Non-retryable error: {}, requeuing in {:?}",
                error,
                delay
            );
        }

        Action::requeue(delay)
    }
}

/// Failure-tracking key for a record
pub fn object_key(kind: &str, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{kind}/{ns}/{name}"),
        None => format!("{kind}/{name}"),
    }
}
