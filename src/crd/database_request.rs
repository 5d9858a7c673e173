//! DatabaseRequest CRD definition
//!
//! A DatabaseRequest is the namespaced, user-facing ask for a database. It
//! either names a DatabaseClass to provision from or an existing Database to
//! bind to.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DatabaseRequest is the Schema for the databaserequests API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "database.plural.sh",
    version = "v1alpha1",
    kind = "DatabaseRequest",
    plural = "databaserequests",
    shortname = "dbreq",
    namespaced,
    status = "DatabaseRequestStatus",
    printcolumn = r#"{"name":"Class", "type":"string", "jsonPath":".spec.databaseClassName"}"#,
    printcolumn = r#"{"name":"Database", "type":"string", "jsonPath":".status.databaseName"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRequestSpec {
    /// Class to provision a new database from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_class_name: Option<String>,

    /// Existing Database record to bind to instead of provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_database_name: Option<String>,
}

/// Where a request gets its database from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestSource<'a> {
    /// Provision from the named DatabaseClass
    Class(&'a str),
    /// Bind to the named, already existing Database
    Existing(&'a str),
}

impl DatabaseRequestSpec {
    /// Resolve the request source; exactly one of the two fields must be set.
    pub fn source(&self) -> Result<RequestSource<'_>, String> {
        let class = self
            .database_class_name
            .as_deref()
            .filter(|s| !s.is_empty());
        let existing = self
            .existing_database_name
            .as_deref()
            .filter(|s| !s.is_empty());

        match (class, existing) {
            (Some(class), None) => Ok(RequestSource::Class(class)),
            (None, Some(existing)) => Ok(RequestSource::Existing(existing)),
            (Some(_), Some(_)) => Err(
                "only one of databaseClassName and existingDatabaseName may be set".to_string(),
            ),
            (None, None) => {
                Err("one of databaseClassName or existingDatabaseName must be set".to_string())
            }
        }
    }
}

/// Status of the DatabaseRequest resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRequestStatus {
    /// Whether the linked database is provisioned
    #[serde(default)]
    pub ready: bool,

    /// Name of the linked Database; never changes once set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
}

impl DatabaseRequest {
    /// Linked database name, if one has been recorded
    pub fn database_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.database_name.as_deref())
            .filter(|n| !n.is_empty())
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }
}
