//! Facade over a [`Provisioner`] that normalizes driver results
//!
//! Every call runs under a deadline and is abandoned when the operator-wide
//! cancellation token fires. Status codes are folded into:
//!
//! - [`Outcome::Success`], [`Outcome::AlreadyExists`], [`Outcome::NotFound`]
//!   for the idempotency paths the reconcilers handle explicitly
//! - [`DriverError::Transient`] for anything worth retrying
//! - [`DriverError::Fatal`] for protocol violations and unexpected codes

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    Code, CreateDatabaseRequest, CreateDatabaseResponse, DeleteDatabaseRequest, GetInfoRequest,
    GrantAccessRequest, GrantAccessResponse, Operation, Provisioner, RevokeAccessRequest, Status,
};
use crate::crd::AuthenticationType;
use crate::health::HealthState;

/// Default per-call deadline
pub const DEFAULT_DRIVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Normalized result of a driver call
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    /// The driver already holds the resource; the body of the original call
    /// is included when the driver returned it
    AlreadyExists(Option<T>),
    NotFound,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("transient driver failure in {op}: {message}")]
    Transient { op: Operation, message: String },

    #[error("driver protocol error in {op}: {message}")]
    Fatal { op: Operation, message: String },
}

impl DriverError {
    pub fn fatal(op: Operation, message: impl Into<String>) -> Self {
        DriverError::Fatal {
            op,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient { .. })
    }
}

/// Raw reply before the per-operation body rules are applied
enum Reply<T> {
    Body(Option<T>),
    AlreadyExists(Option<T>),
    NotFound,
}

/// Fold a driver status into a reply or an error
fn classify<T: DeserializeOwned>(op: Operation, status: Status) -> Result<Reply<T>, DriverError> {
    match status.code {
        Code::AlreadyExists => {
            let body = status
                .details
                .and_then(|details| serde_json::from_value(details).ok());
            Ok(Reply::AlreadyExists(body))
        }
        Code::NotFound => Ok(Reply::NotFound),
        code if code.is_transient() => Err(DriverError::Transient {
            op,
            message: format!("{code}: {}", status.message),
        }),
        code => Err(DriverError::Fatal {
            op,
            message: format!("{code}: {}", status.message),
        }),
    }
}

fn outcome_label<T>(result: &Result<Reply<T>, DriverError>) -> &'static str {
    match result {
        Ok(Reply::Body(_)) => "success",
        Ok(Reply::AlreadyExists(_)) => "already_exists",
        Ok(Reply::NotFound) => "not_found",
        Err(DriverError::Transient { .. }) => "transient",
        Err(DriverError::Fatal { .. }) => "fatal",
    }
}

/// A success must carry a body
fn require_body<T>(op: Operation, reply: Reply<T>) -> Result<Outcome<T>, DriverError> {
    match reply {
        Reply::Body(Some(body)) => Ok(Outcome::Success(body)),
        Reply::Body(None) => Err(DriverError::fatal(op, "driver returned an empty response")),
        Reply::AlreadyExists(body) => Ok(Outcome::AlreadyExists(body)),
        Reply::NotFound => Ok(Outcome::NotFound),
    }
}

fn discard_body<T>(reply: Reply<T>) -> Outcome<()> {
    match reply {
        Reply::Body(_) => Outcome::Success(()),
        Reply::AlreadyExists(_) => Outcome::AlreadyExists(Some(())),
        Reply::NotFound => Outcome::NotFound,
    }
}

/// Deadline-bounded, cancellable access to a driver
#[derive(Clone)]
pub struct DriverGateway {
    provisioner: Arc<dyn Provisioner>,
    timeout: Duration,
    cancel: CancellationToken,
    health_state: Option<Arc<HealthState>>,
}

impl DriverGateway {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            timeout: DEFAULT_DRIVER_TIMEOUT,
            cancel: CancellationToken::new(),
            health_state: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn invoke<T, F>(&self, op: Operation, call: F) -> Result<Reply<T>, DriverError>
    where
        T: DeserializeOwned,
        F: Future<Output = Result<Option<T>, Status>>,
    {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(DriverError::Transient {
                op,
                message: "operator is shutting down".to_string(),
            }),
            res = tokio::time::timeout(self.timeout, call) => match res {
                Err(_) => Err(DriverError::Transient {
                    op,
                    message: format!("no response within {:?}", self.timeout),
                }),
                Ok(Ok(body)) => Ok(Reply::Body(body)),
                Ok(Err(status)) => classify(op, status),
            },
        };

        let label = outcome_label(&result);
        match &result {
            Err(e) => warn!(operation = %op, error = %e, "Driver call failed"),
            Ok(_) => debug!(operation = %op, outcome = label, "Driver call completed"),
        }
        if let Some(ref state) = self.health_state {
            state.metrics.record_driver_call(op.as_str(), label);
        }
        result
    }

    /// Driver name reported by GetInfo
    pub async fn get_info(&self) -> Result<String, DriverError> {
        let op = Operation::GetInfo;
        let reply = self
            .invoke(op, self.provisioner.get_info(GetInfoRequest::default()))
            .await?;
        match require_body(op, reply)? {
            Outcome::Success(info) if !info.name.is_empty() => Ok(info.name),
            Outcome::Success(_) => Err(DriverError::fatal(op, "driver reported an empty name")),
            other => Err(DriverError::fatal(
                op,
                format!("unexpected outcome {other:?}"),
            )),
        }
    }

    pub async fn create_database(
        &self,
        name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<Outcome<CreateDatabaseResponse>, DriverError> {
        let op = Operation::CreateDatabase;
        let req = CreateDatabaseRequest {
            name: name.to_string(),
            parameters: parameters.clone(),
        };
        let reply = self.invoke(op, self.provisioner.create_database(req)).await?;
        require_body(op, reply)
    }

    pub async fn delete_database(&self, database_id: &str) -> Result<Outcome<()>, DriverError> {
        let req = DeleteDatabaseRequest {
            database_id: database_id.to_string(),
        };
        let reply = self
            .invoke(Operation::DeleteDatabase, self.provisioner.delete_database(req))
            .await?;
        Ok(discard_body(reply))
    }

    pub async fn grant_access(
        &self,
        database_id: &str,
        account_name: &str,
        authentication_type: AuthenticationType,
        parameters: &BTreeMap<String, String>,
    ) -> Result<Outcome<GrantAccessResponse>, DriverError> {
        let op = Operation::GrantAccess;
        let req = GrantAccessRequest {
            database_id: database_id.to_string(),
            name: account_name.to_string(),
            authentication_type,
            parameters: parameters.clone(),
        };
        let reply = self.invoke(op, self.provisioner.grant_access(req)).await?;
        require_body(op, reply)
    }

    pub async fn revoke_access(
        &self,
        database_id: &str,
        account_id: &str,
    ) -> Result<Outcome<()>, DriverError> {
        let req = RevokeAccessRequest {
            database_id: database_id.to_string(),
            account_id: account_id.to_string(),
        };
        let reply = self
            .invoke(Operation::RevokeAccess, self.provisioner.revoke_access(req))
            .await?;
        Ok(discard_body(reply))
    }
}
