//! DatabaseAccess CRD definition
//!
//! A DatabaseAccess asks for credentials against the database behind a
//! DatabaseRequest in the same namespace. Granted credentials land in a
//! Secret named by `credentialsSecretName`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DatabaseAccess is the Schema for the databaseaccesses API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "database.plural.sh",
    version = "v1alpha1",
    kind = "DatabaseAccess",
    plural = "databaseaccesses",
    shortname = "dba",
    namespaced,
    status = "DatabaseAccessStatus",
    printcolumn = r#"{"name":"Request", "type":"string", "jsonPath":".spec.databaseRequestName"}"#,
    printcolumn = r#"{"name":"Secret", "type":"string", "jsonPath":".spec.credentialsSecretName"}"#,
    printcolumn = r#"{"name":"Granted", "type":"boolean", "jsonPath":".status.accessGranted"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseAccessSpec {
    /// DatabaseRequest in the same namespace whose database is accessed
    pub database_request_name: String,

    /// Class selecting the driver and grant parameters
    pub database_access_class_name: String,

    /// Secret that receives the credentials
    #[serde(default)]
    pub credentials_secret_name: String,
}

/// Status of the DatabaseAccess resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseAccessStatus {
    /// Whether credentials have been granted and stored
    #[serde(default)]
    pub access_granted: bool,

    /// Account identifier returned by the driver; set at most once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl DatabaseAccess {
    pub fn account_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.account_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Granted and holding an account id
    pub fn is_granted(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.access_granted) && self.account_id().is_some()
    }

    /// Stable driver account name derived from the record name
    pub fn account_name(&self) -> String {
        format!("account-{}", self.metadata.name.as_deref().unwrap_or_default())
    }
}
