//! Wait condition helpers for the operator's resources

use std::time::Duration;

use kube::runtime::wait::{Condition, await_condition};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use thiserror::Error;

use database_operator::crd::{Database, DatabaseAccess, DatabaseRequest};

/// How long provisioning through the fake driver may take
pub const READY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum WaitError {
    #[error("Timeout waiting for condition")]
    Timeout,

    #[error("Watch error: {0}")]
    Watch(#[from] kube::runtime::wait::Error),
}

pub fn request_ready() -> impl Condition<DatabaseRequest> {
    |obj: Option<&DatabaseRequest>| obj.is_some_and(DatabaseRequest::is_ready)
}

pub fn database_ready() -> impl Condition<Database> {
    |obj: Option<&Database>| obj.is_some_and(Database::is_ready)
}

pub fn access_granted() -> impl Condition<DatabaseAccess> {
    |obj: Option<&DatabaseAccess>| obj.is_some_and(DatabaseAccess::is_granted)
}

/// Wait for `condition` on `name`, bounded by `timeout`
pub async fn wait_for<K>(
    api: Api<K>,
    name: &str,
    condition: impl Condition<K>,
    timeout: Duration,
) -> Result<(), WaitError>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
{
    tokio::time::timeout(timeout, await_condition(api, name, condition))
        .await
        .map_err(|_| WaitError::Timeout)??;
    Ok(())
}

/// Wait until `name` no longer exists
pub async fn wait_for_deletion<K>(api: Api<K>, name: &str, timeout: Duration) -> Result<(), WaitError>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
{
    wait_for(api, name, |obj: Option<&K>| obj.is_none(), timeout).await
}
