//! Driver protocol: wire types and the [`Provisioner`] trait
//!
//! A driver is an out-of-process backend that provisions external databases
//! and mints credentials. The operator only ever talks to it through
//! [`DriverGateway`], which wraps any [`Provisioner`]:
//!
//! - [`ProvisionerClient`] - JSON over HTTP/1.1 on a Unix domain socket
//! - [`FakeProvisioner`] - in-memory driver used by `fake-driver` and tests
//!
//! Errors on the wire are a [`Status`] carrying a [`Code`], mirroring the
//! usual RPC status codes so drivers can report idempotency outcomes
//! (`AlreadyExists`, `NotFound`) distinctly from failures.

pub mod client;
pub mod fake;
pub mod gateway;
pub mod server;

pub use client::{ClientError, ProvisionerClient};
pub use fake::FakeProvisioner;
pub use gateway::{DriverError, DriverGateway, Outcome};

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crd::AuthenticationType;

/// Credential entry the operator copies into the credentials secret
pub const CREDENTIAL_KEY: &str = "cred";

/// Driver status codes
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    Unimplemented,
    Internal,
    Unavailable,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Cancelled => "Cancelled",
            Code::Unknown => "Unknown",
            Code::InvalidArgument => "InvalidArgument",
            Code::DeadlineExceeded => "DeadlineExceeded",
            Code::NotFound => "NotFound",
            Code::AlreadyExists => "AlreadyExists",
            Code::PermissionDenied => "PermissionDenied",
            Code::ResourceExhausted => "ResourceExhausted",
            Code::FailedPrecondition => "FailedPrecondition",
            Code::Aborted => "Aborted",
            Code::Unimplemented => "Unimplemented",
            Code::Internal => "Internal",
            Code::Unavailable => "Unavailable",
        }
    }

    /// Whether a retry of the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Code::Unavailable
                | Code::DeadlineExceeded
                | Code::Cancelled
                | Code::Aborted
                | Code::ResourceExhausted
        )
    }

    /// HTTP status used for this code on the socket transport
    pub fn http_status(&self) -> u16 {
        match self {
            Code::InvalidArgument | Code::FailedPrecondition => 400,
            Code::PermissionDenied => 403,
            Code::NotFound => 404,
            Code::AlreadyExists | Code::Aborted => 409,
            Code::ResourceExhausted => 429,
            Code::Cancelled => 499,
            Code::Unimplemented => 501,
            Code::Unavailable => 503,
            Code::DeadlineExceeded => 504,
            Code::Unknown | Code::Internal => 500,
        }
    }

    /// Best-effort code for an error response without a decodable status body
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Code::InvalidArgument,
            403 => Code::PermissionDenied,
            404 => Code::NotFound,
            409 => Code::AlreadyExists,
            429 => Code::ResourceExhausted,
            499 => Code::Cancelled,
            501 => Code::Unimplemented,
            502 | 503 => Code::Unavailable,
            504 => Code::DeadlineExceeded,
            _ => Code::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error status returned by a driver
#[derive(thiserror::Error, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,

    /// Optional payload; for `AlreadyExists` this may carry the response body
    /// of the call that originally succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// The five driver operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GetInfo,
    CreateDatabase,
    DeleteDatabase,
    GrantAccess,
    RevokeAccess,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetInfo => "GetInfo",
            Operation::CreateDatabase => "CreateDatabase",
            Operation::DeleteDatabase => "DeleteDatabase",
            Operation::GrantAccess => "GrantAccess",
            Operation::RevokeAccess => "RevokeAccess",
        }
    }

    /// Request path on the socket transport
    pub fn path(&self) -> String {
        format!("/v1/{}", self.as_str())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GetInfoRequest {}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GetInfoResponse {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatabaseRequest {
    /// Unique, stable name; drivers use it as the idempotency key
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatabaseResponse {
    #[serde(default)]
    pub database_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDatabaseRequest {
    pub database_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DeleteDatabaseResponse {}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrantAccessRequest {
    pub database_id: String,
    /// Account name; drivers use it as the idempotency key
    pub name: String,
    #[serde(default)]
    pub authentication_type: AuthenticationType,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Secret material for one credential
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CredentialDetails {
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrantAccessResponse {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialDetails>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevokeAccessRequest {
    pub database_id: String,
    pub account_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RevokeAccessResponse {}

/// A database provisioning backend.
///
/// A successful call may still return no body (`Ok(None)`); the gateway
/// decides whether that is acceptable for the operation.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn get_info(&self, req: GetInfoRequest) -> Result<Option<GetInfoResponse>, Status>;

    async fn create_database(
        &self,
        req: CreateDatabaseRequest,
    ) -> Result<Option<CreateDatabaseResponse>, Status>;

    async fn delete_database(
        &self,
        req: DeleteDatabaseRequest,
    ) -> Result<Option<DeleteDatabaseResponse>, Status>;

    async fn grant_access(
        &self,
        req: GrantAccessRequest,
    ) -> Result<Option<GrantAccessResponse>, Status>;

    async fn revoke_access(
        &self,
        req: RevokeAccessRequest,
    ) -> Result<Option<RevokeAccessResponse>, Status>;
}
