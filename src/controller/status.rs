//! Status and conditions management for Database resources
//!
//! This module provides utilities for managing Kubernetes-style conditions
//! and writing the status subresource.

use chrono::Utc;

use crate::controller::error::Result;
use crate::crd::{Condition, Database, DatabaseStatus};
use crate::store::Store;

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// External database is provisioned and its id recorded
    pub const READY: &str = "Ready";
    /// Provisioning or teardown is in progress
    pub const PROGRESSING: &str = "Progressing";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Condition reasons
pub mod reasons {
    pub const PROVISIONING: &str = "Provisioning";
    pub const DATABASE_READY: &str = "DatabaseReady";
    pub const EXISTING_DATABASE: &str = "ExistingDatabase";
    pub const FAILED_TO_CREATE: &str = "FailedToCreateDatabase";
    pub const DELETING: &str = "Deleting";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't.
    ///
    /// `lastTransitionTime` only moves when the status changes.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = now;
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
                observed_generation: self.generation,
            });
        }
        self
    }

    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        let status = if is_ready {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::READY, status, reason, message)
    }

    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        let status = if is_progressing {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::PROGRESSING, status, reason, message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Status writer for a Database record.
///
/// Writes are conditional on the record's resourceVersion; a 409 surfaces
/// as a `KubeError` for the caller to turn into a short requeue.
pub struct StatusManager<'a, S: Store> {
    database: &'a Database,
    store: &'a S,
}

impl<'a, S: Store> StatusManager<'a, S> {
    pub fn new(database: &'a Database, store: &'a S) -> Self {
        Self { database, store }
    }

    fn current(&self) -> DatabaseStatus {
        self.database.status.clone().unwrap_or_default()
    }

    fn conditions(&self) -> ConditionBuilder {
        ConditionBuilder::from_existing(self.current().conditions, self.database.metadata.generation)
    }

    /// Write the status subresource
    pub async fn update(&self, status: DatabaseStatus) -> Result<Database> {
        let mut obj = self.database.clone();
        obj.status = Some(status);
        Ok(self.store.replace_status(&obj).await?)
    }

    /// External database is provisioned under `database_id`
    pub async fn set_ready(&self, database_id: &str, reason: &str) -> Result<Database> {
        let conditions = self
            .conditions()
            .ready(true, reason, "Database is provisioned")
            .progressing(false, reason, "Provisioning complete")
            .build();

        self.update(DatabaseStatus {
            ready: true,
            database_id: Some(database_id.to_string()),
            conditions,
            observed_generation: self.database.metadata.generation,
        })
        .await
    }

    /// Provisioning failed; the id, if any, is kept
    pub async fn set_failed(&self, reason: &str, message: &str) -> Result<Database> {
        let current = self.current();
        let conditions = self
            .conditions()
            .ready(false, reason, message)
            .progressing(false, reason, message)
            .build();

        self.update(DatabaseStatus {
            ready: false,
            database_id: current.database_id,
            conditions,
            observed_generation: self.database.metadata.generation,
        })
        .await
    }

    /// Teardown has started
    pub async fn set_deleting(&self) -> Result<Database> {
        let current = self.current();
        let conditions = self
            .conditions()
            .ready(false, reasons::DELETING, "Database is being deleted")
            .progressing(true, reasons::DELETING, "Waiting for teardown")
            .build();

        self.update(DatabaseStatus {
            ready: false,
            database_id: current.database_id,
            conditions,
            observed_generation: current.observed_generation,
        })
        .await
    }
}
