//! Unit tests for the DatabaseAccess reconciler

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;

use database_operator::controller::{
    ACCESS_FINALIZER, DATABASE_ACCESS_FINALIZER, SECRET_FINALIZER, has_finalizer,
};
use database_operator::crd::{AuthenticationType, Database, DatabaseAccess, DeletionPolicy};
use database_operator::driver::{
    Code, CredentialDetails, GrantAccessRequest, GrantAccessResponse, Operation, Provisioner,
    Status,
};
use database_operator::{Error, Store};

use crate::common::*;

fn setup() -> (Arc<ScriptedProvisioner>, TestContext) {
    let driver = Arc::new(ScriptedProvisioner::new(DRIVER));
    let ctx = test_context(driver.clone());
    (driver, ctx)
}

/// Classes `small` and `rw`, request `r1` reconciled until its database is ready
async fn ready_chain(ctx: &TestContext) {
    seed(ctx, database_class("small", DRIVER, DeletionPolicy::Delete)).await;
    seed(ctx, access_class("rw", DRIVER)).await;
    seed(ctx, class_request(NS, "r1", "small")).await;
    run_request(ctx, NS, "r1").await.unwrap();
    run_database(ctx, "small-r1").await.unwrap();
}

fn secret_value(secret: &Secret, key: &str) -> String {
    let data = secret.data.as_ref().unwrap();
    String::from_utf8(data.get(key).unwrap().0.clone()).unwrap()
}

#[tokio::test]
async fn test_grant_writes_secret_and_status() {
    let (driver, ctx) = setup();
    ready_chain(&ctx).await;
    seed(&ctx, database_access(NS, "a1", "r1", "rw", "c1")).await;

    let action = run_access(&ctx, NS, "a1").await.unwrap();
    assert_eq!(action, Action::await_change());

    let secret: Secret = fetch(&ctx, Some(NS), "c1").await.unwrap();
    assert_eq!(secret.type_.as_deref(), Some("Opaque"));
    assert!(has_finalizer(&secret, SECRET_FINALIZER));
    assert_eq!(secret_value(&secret, "username"), "account-a1");
    assert!(!secret_value(&secret, "password").is_empty());

    let access: DatabaseAccess = fetch(&ctx, Some(NS), "a1").await.unwrap();
    assert!(access.is_granted());
    assert!(access.account_id().is_some());
    assert!(has_finalizer(&access, ACCESS_FINALIZER));

    let database: Database = fetch(&ctx, None, "small-r1").await.unwrap();
    assert!(has_finalizer(&database, DATABASE_ACCESS_FINALIZER));
    assert_eq!(driver.calls(Operation::GrantAccess), 1);
}

#[tokio::test]
async fn test_grant_is_idempotent() {
    let (driver, ctx) = setup();
    ready_chain(&ctx).await;
    seed(&ctx, database_access(NS, "a1", "r1", "rw", "c1")).await;

    run_access(&ctx, NS, "a1").await.unwrap();
    let first: DatabaseAccess = fetch(&ctx, Some(NS), "a1").await.unwrap();
    run_access(&ctx, NS, "a1").await.unwrap();
    let second: DatabaseAccess = fetch(&ctx, Some(NS), "a1").await.unwrap();

    assert_eq!(first.account_id(), second.account_id());
    assert_eq!(driver.calls(Operation::GrantAccess), 1);
    assert_eq!(ctx.store.count::<Secret>(), 1);
}

#[tokio::test]
async fn test_no_grant_before_database_is_ready() {
    let (driver, ctx) = setup();
    seed(&ctx, database_class("small", DRIVER, DeletionPolicy::Delete)).await;
    seed(&ctx, access_class("rw", DRIVER)).await;
    seed(&ctx, class_request(NS, "r1", "small")).await;
    seed(&ctx, database_access(NS, "a1", "r1", "rw", "c1")).await;

    // Request exists but has not been reconciled
    let err = run_access(&ctx, NS, "a1").await.unwrap_err();
    assert!(matches!(err, Error::NotReady(_)), "{err}");
    assert!(err.is_retryable());

    // Database spawned but not yet provisioned
    run_request(&ctx, NS, "r1").await.unwrap();
    let err = run_access(&ctx, NS, "a1").await.unwrap_err();
    assert!(matches!(err, Error::NotReady(_)), "{err}");

    assert_eq!(driver.total_calls(), 0);
    assert_eq!(ctx.store.count::<Secret>(), 0);
    let access: DatabaseAccess = fetch(&ctx, Some(NS), "a1").await.unwrap();
    assert!(!has_finalizer(&access, ACCESS_FINALIZER));
}

#[tokio::test]
async fn test_missing_references_are_not_found() {
    let (driver, ctx) = setup();
    seed(&ctx, database_access(NS, "a1", "r1", "rw", "c1")).await;

    let err = run_access(&ctx, NS, "a1").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "missing class: {err}");

    seed(&ctx, access_class("rw", DRIVER)).await;
    let err = run_access(&ctx, NS, "a1").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "missing request: {err}");

    assert_eq!(driver.total_calls(), 0);
}

#[tokio::test]
async fn test_missing_secret_name_is_validation_error() {
    let (driver, ctx) = setup();
    ready_chain(&ctx).await;
    seed(&ctx, database_access(NS, "a1", "r1", "rw", "")).await;

    let err = run_access(&ctx, NS, "a1").await.unwrap_err();
    assert!(matches!(err, Error::ValidationError(_)));
    assert!(!err.is_retryable());
    assert_eq!(driver.calls(Operation::GrantAccess), 0);
}

#[tokio::test]
async fn test_other_driver_is_skipped() {
    let (driver, ctx) = setup();
    seed(&ctx, access_class("ro", "other")).await;
    seed(&ctx, database_access(NS, "a1", "r1", "ro", "c1")).await;

    let action = run_access(&ctx, NS, "a1").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(driver.total_calls(), 0);
}

#[tokio::test]
async fn test_missing_cred_entry_is_fatal() {
    let (driver, ctx) = setup();
    ready_chain(&ctx).await;
    seed(&ctx, database_access(NS, "a1", "r1", "rw", "c1")).await;
    driver.script(
        Operation::GrantAccess,
        Script::Grant(GrantAccessResponse {
            account_id: "acct-1".to_string(),
            credentials: BTreeMap::from([(
                "other".to_string(),
                CredentialDetails {
                    secrets: BTreeMap::from([("token".to_string(), "t".to_string())]),
                },
            )]),
        }),
    );

    let err = run_access(&ctx, NS, "a1").await.unwrap_err();
    assert!(matches!(err, Error::DriverFatal(_)), "{err}");
    assert!(!err.is_retryable());

    assert_eq!(ctx.store.count::<Secret>(), 0);
    let access: DatabaseAccess = fetch(&ctx, Some(NS), "a1").await.unwrap();
    assert!(!access.is_granted());
}

#[tokio::test]
async fn test_existing_grant_is_reused() {
    let (driver, ctx) = setup();
    ready_chain(&ctx).await;
    seed(&ctx, database_access(NS, "a1", "r1", "rw", "c1")).await;

    let database: Database = fetch(&ctx, None, "small-r1").await.unwrap();
    let original = driver
        .backend()
        .grant_access(GrantAccessRequest {
            database_id: database.database_id().unwrap().to_string(),
            name: "account-a1".to_string(),
            authentication_type: AuthenticationType::Key,
            parameters: BTreeMap::new(),
        })
        .await
        .unwrap()
        .unwrap();

    run_access(&ctx, NS, "a1").await.unwrap();

    let access: DatabaseAccess = fetch(&ctx, Some(NS), "a1").await.unwrap();
    assert_eq!(access.account_id(), Some(original.account_id.as_str()));
    let secret: Secret = fetch(&ctx, Some(NS), "c1").await.unwrap();
    assert_eq!(
        secret_value(&secret, "password"),
        original.credentials["cred"].secrets["password"]
    );
    assert_eq!(driver.backend().grant_count().await, 1);
}

#[tokio::test]
async fn test_already_exists_without_credentials_is_fatal() {
    let (driver, ctx) = setup();
    ready_chain(&ctx).await;
    seed(&ctx, database_access(NS, "a1", "r1", "rw", "c1")).await;
    driver.fail_next(
        Operation::GrantAccess,
        Status::new(Code::AlreadyExists, "account exists"),
    );

    let err = run_access(&ctx, NS, "a1").await.unwrap_err();
    assert!(matches!(err, Error::DriverFatal(_)), "{err}");
    assert!(!err.is_retryable());

    assert_eq!(ctx.store.count::<Secret>(), 0);
    let access: DatabaseAccess = fetch(&ctx, Some(NS), "a1").await.unwrap();
    assert!(!access.is_granted());
    assert!(!has_finalizer(&access, ACCESS_FINALIZER));
    let database: Database = fetch(&ctx, None, "small-r1").await.unwrap();
    assert!(!has_finalizer(&database, DATABASE_ACCESS_FINALIZER));
}

#[tokio::test]
async fn test_delete_revokes_and_removes_secret() {
    let (driver, ctx) = setup();
    ready_chain(&ctx).await;
    seed(&ctx, database_access(NS, "a1", "r1", "rw", "c1")).await;
    run_access(&ctx, NS, "a1").await.unwrap();

    ctx.store
        .delete::<DatabaseAccess>(Some(NS), "a1")
        .await
        .unwrap();
    let action = run_access(&ctx, NS, "a1").await.unwrap();
    assert_eq!(action, Action::await_change());

    assert!(fetch::<DatabaseAccess>(&ctx, Some(NS), "a1").await.is_none());
    assert!(fetch::<Secret>(&ctx, Some(NS), "c1").await.is_none());
    assert_eq!(driver.calls(Operation::RevokeAccess), 1);
    assert_eq!(driver.backend().grant_count().await, 0);
}

#[tokio::test]
async fn test_delete_ungranted_access_skips_driver() {
    let (driver, ctx) = setup();
    seed(&ctx, database_access(NS, "a1", "r1", "rw", "c1")).await;

    ctx.store
        .delete::<DatabaseAccess>(Some(NS), "a1")
        .await
        .unwrap();

    // No finalizer was ever placed, so the record is already gone
    assert!(fetch::<DatabaseAccess>(&ctx, Some(NS), "a1").await.is_none());
    run_access(&ctx, NS, "a1").await.unwrap();
    assert_eq!(driver.total_calls(), 0);
}
