//! Driver gateway deadlines and the Unix socket transport

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

use database_operator::Error;
use database_operator::crd::{AuthenticationType, DeletionPolicy};
use database_operator::driver::server::serve;
use database_operator::driver::{
    CREDENTIAL_KEY, DriverError, DriverGateway, FakeProvisioner, Operation, Outcome,
    ProvisionerClient,
};

use crate::common::*;

#[tokio::test(start_paused = true)]
async fn test_timeout_is_transient() {
    let driver = Arc::new(ScriptedProvisioner::new(DRIVER));
    driver.hang();
    let gateway = DriverGateway::new(driver.clone()).with_timeout(Duration::from_millis(50));

    let err = gateway
        .create_database("small-r1", &BTreeMap::new())
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
    assert_eq!(driver.calls(Operation::CreateDatabase), 1);
}

#[tokio::test]
async fn test_cancellation_is_transient() {
    let driver = Arc::new(ScriptedProvisioner::new(DRIVER));
    driver.hang();
    let token = CancellationToken::new();
    let gateway = DriverGateway::new(driver).with_cancellation(token.clone());
    token.cancel();

    let err = gateway.delete_database("db-1").await.unwrap_err();
    assert!(matches!(err, DriverError::Transient { .. }), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_hung_driver_fails_reconcile_with_retryable_error() {
    let driver = Arc::new(ScriptedProvisioner::new(DRIVER));
    let ctx =
        test_context_with(DriverGateway::new(driver.clone()).with_timeout(Duration::from_secs(1)));
    seed(&ctx, database_class("small", DRIVER, DeletionPolicy::Delete)).await;
    seed(&ctx, class_request(NS, "r1", "small")).await;
    run_request(&ctx, NS, "r1").await.unwrap();
    driver.hang();

    let err = run_database(&ctx, "small-r1").await.unwrap_err();
    assert!(matches!(err, Error::DriverTransient(_)), "{err}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_get_info_requires_a_name() {
    let gateway = DriverGateway::new(Arc::new(ScriptedProvisioner::new("")));
    let err = gateway.get_info().await.unwrap_err();
    assert!(!err.is_transient(), "{err}");
}

#[tokio::test]
async fn test_unreachable_socket_is_transient() {
    let dir = tempfile::tempdir().unwrap();
    let address = format!("unix://{}", dir.path().join("missing.sock").display());
    let gateway = DriverGateway::new(Arc::new(ProvisionerClient::new(&address).unwrap()));

    let err = gateway.get_info().await.unwrap_err();
    assert!(err.is_transient(), "{err}");
}

#[test]
fn test_only_unix_addresses_are_accepted() {
    assert!(ProvisionerClient::new("tcp://127.0.0.1:9000").is_err());
    assert!(ProvisionerClient::new("unix://").is_err());
    assert!(ProvisionerClient::new("unix:///tmp/driver.sock").is_ok());
}

#[tokio::test]
async fn test_socket_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("driver.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(
        listener,
        Arc::new(FakeProvisioner::new("fake")),
        shutdown.clone(),
    ));

    let client = ProvisionerClient::new(&format!("unix://{}", path.display())).unwrap();
    let gateway = DriverGateway::new(Arc::new(client));

    assert_eq!(gateway.get_info().await.unwrap(), "fake");

    let created = match gateway
        .create_database("small-r1", &BTreeMap::new())
        .await
        .unwrap()
    {
        Outcome::Success(created) => created,
        other => panic!("expected Success, got {other:?}"),
    };

    // A repeated create carries the original id back through the error body
    match gateway
        .create_database("small-r1", &BTreeMap::new())
        .await
        .unwrap()
    {
        Outcome::AlreadyExists(Some(existing)) => {
            assert_eq!(existing.database_id, created.database_id)
        }
        other => panic!("expected AlreadyExists, got {other:?}"),
    }

    let grant = match gateway
        .grant_access(
            &created.database_id,
            "account-a1",
            AuthenticationType::Key,
            &BTreeMap::new(),
        )
        .await
        .unwrap()
    {
        Outcome::Success(grant) => grant,
        other => panic!("expected Success, got {other:?}"),
    };
    assert!(grant.credentials.contains_key(CREDENTIAL_KEY));

    assert!(matches!(
        gateway
            .revoke_access(&created.database_id, &grant.account_id)
            .await
            .unwrap(),
        Outcome::Success(())
    ));
    assert!(matches!(
        gateway.delete_database(&created.database_id).await.unwrap(),
        Outcome::Success(())
    ));
    assert!(matches!(
        gateway.delete_database(&created.database_id).await.unwrap(),
        Outcome::NotFound
    ));

    shutdown.cancel();
    server.await.unwrap().unwrap();
}
