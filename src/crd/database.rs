//! Database CRD definition
//!
//! A Database is the cluster-scoped record of one external database instance.
//! It is normally spawned by the request reconciler from a DatabaseRequest and
//! is the only record that calls the driver to provision or deprovision.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Database is the Schema for the databases API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "database.plural.sh",
    version = "v1alpha1",
    kind = "Database",
    plural = "databases",
    shortname = "db",
    status = "DatabaseStatus",
    printcolumn = r#"{"name":"Driver", "type":"string", "jsonPath":".spec.driverName"}"#,
    printcolumn = r#"{"name":"Class", "type":"string", "jsonPath":".spec.databaseClassName"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Name of the driver responsible for this database
    pub driver_name: String,

    /// Class the database was created from
    #[serde(default)]
    pub database_class_name: String,

    /// Opaque driver parameters copied from the class
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// What happens to the external database when this record is deleted
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Adopt an already provisioned external database instead of creating one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_database_id: Option<String>,

    /// Request this database was spawned for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_request: Option<DatabaseRequestRef>,
}

/// Non-owning back-reference from a Database to its originating request.
///
/// Always resolved with a fresh read; either side may be deleted on its own.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRequestRef {
    pub name: String,
    pub namespace: String,
}

/// Deletion policy for the external database
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Deprovision the external database through the driver
    Delete,
    /// Leave the external database in place
    #[default]
    Retain,
}

impl std::fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeletionPolicy::Delete => write!(f, "Delete"),
            DeletionPolicy::Retain => write!(f, "Retain"),
        }
    }
}

/// Status of the Database resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    /// Whether the external database is provisioned
    #[serde(default)]
    pub ready: bool,

    /// Identifier assigned by the driver; set at most once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_id: Option<String>,

    /// Conditions representing the current state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Last observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Lifecycle state derived from a Database record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatabaseState {
    /// Not yet seen by the lifecycle controller
    New,
    /// Finalizer placed, external database not yet confirmed
    Provisioning,
    /// External database provisioned and id recorded
    Ready,
    /// Deletion requested, teardown in progress
    Deleting,
}

impl std::fmt::Display for DatabaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseState::New => write!(f, "New"),
            DatabaseState::Provisioning => write!(f, "Provisioning"),
            DatabaseState::Ready => write!(f, "Ready"),
            DatabaseState::Deleting => write!(f, "Deleting"),
        }
    }
}

impl Database {
    /// External id, if one has been recorded
    pub fn database_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.database_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// True once the external database is provisioned and its id recorded
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready) && self.database_id().is_some()
    }

    /// Current lifecycle state
    pub fn state(&self) -> DatabaseState {
        if self.metadata.deletion_timestamp.is_some() {
            DatabaseState::Deleting
        } else if self.is_ready() {
            DatabaseState::Ready
        } else if self
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty())
        {
            DatabaseState::Provisioning
        } else {
            DatabaseState::New
        }
    }
}
