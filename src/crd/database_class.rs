//! DatabaseClass and DatabaseAccessClass CRD definitions
//!
//! Classes are cluster-scoped templates selected by requests and accesses.
//! They are treated as immutable once referenced.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::DeletionPolicy;

/// DatabaseClass is the Schema for the databaseclasses API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "database.plural.sh",
    version = "v1alpha1",
    kind = "DatabaseClass",
    plural = "databaseclasses",
    printcolumn = r#"{"name":"Driver", "type":"string", "jsonPath":".spec.driverName"}"#,
    printcolumn = r#"{"name":"DeletionPolicy", "type":"string", "jsonPath":".spec.deletionPolicy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClassSpec {
    /// Driver that provisions databases of this class
    pub driver_name: String,

    /// Opaque driver parameters passed to CreateDatabase
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// Deletion policy stamped onto spawned databases
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

/// DatabaseAccessClass is the Schema for the databaseaccessclasses API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "database.plural.sh",
    version = "v1alpha1",
    kind = "DatabaseAccessClass",
    plural = "databaseaccessclasses",
    printcolumn = r#"{"name":"Driver", "type":"string", "jsonPath":".spec.driverName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseAccessClassSpec {
    /// Driver that grants access for this class
    pub driver_name: String,

    /// Authentication type requested from the driver
    #[serde(default)]
    pub authentication_type: AuthenticationType,

    /// Opaque driver parameters passed to GrantAccess
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Authentication mechanism for granted credentials
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum AuthenticationType {
    /// Driver decides
    #[default]
    Unknown,
    /// Static key/password credentials
    Key,
    /// Workload identity, no static secret material
    Iam,
}
