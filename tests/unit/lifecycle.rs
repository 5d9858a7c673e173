//! End-to-end lifecycle across all three reconcilers

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;

use database_operator::crd::{Database, DatabaseAccess, DatabaseRequest, DeletionPolicy};
use database_operator::driver::Operation;
use database_operator::Store;

use crate::common::*;

async fn provisioned(ctx: &TestContext) {
    seed(ctx, database_class("small", DRIVER, DeletionPolicy::Delete)).await;
    seed(ctx, access_class("rw", DRIVER)).await;
    seed(ctx, class_request(NS, "r1", "small")).await;
    seed(ctx, database_access(NS, "a1", "r1", "rw", "c1")).await;
    settle(ctx, 3).await;
}

fn position(history: &[Operation], op: Operation) -> usize {
    history.iter().position(|c| *c == op).unwrap()
}

#[tokio::test]
async fn test_provision_grant_and_teardown() {
    let driver = Arc::new(ScriptedProvisioner::new(DRIVER));
    let ctx = test_context(driver.clone());
    provisioned(&ctx).await;

    let request: DatabaseRequest = fetch(&ctx, Some(NS), "r1").await.unwrap();
    assert!(request.is_ready());
    assert_eq!(request.database_name(), Some("small-r1"));
    let database: Database = fetch(&ctx, None, "small-r1").await.unwrap();
    assert!(database.is_ready());
    let access: DatabaseAccess = fetch(&ctx, Some(NS), "a1").await.unwrap();
    assert!(access.is_granted());
    assert!(fetch::<Secret>(&ctx, Some(NS), "c1").await.is_some());
    assert_eq!(driver.backend().database_count().await, 1);
    assert_eq!(driver.backend().grant_count().await, 1);

    ctx.store
        .delete::<DatabaseRequest>(Some(NS), "r1")
        .await
        .unwrap();
    settle(&ctx, 4).await;

    assert_eq!(ctx.store.count::<DatabaseRequest>(), 0);
    assert_eq!(ctx.store.count::<Database>(), 0);
    assert_eq!(ctx.store.count::<DatabaseAccess>(), 0);
    assert_eq!(ctx.store.count::<Secret>(), 0);
    assert_eq!(driver.backend().database_count().await, 0);
    assert_eq!(driver.backend().grant_count().await, 0);

    // Grants are revoked before the database they live in is dropped
    let history = driver.history();
    assert!(position(&history, Operation::RevokeAccess) < position(&history, Operation::DeleteDatabase));
}

#[tokio::test]
async fn test_database_waits_for_dependent_access() {
    let driver = Arc::new(ScriptedProvisioner::new(DRIVER));
    let ctx = test_context(driver.clone());
    provisioned(&ctx).await;

    ctx.store.delete::<Database>(None, "small-r1").await.unwrap();

    let action = run_database(&ctx, "small-r1").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    assert!(fetch::<Database>(&ctx, None, "small-r1").await.is_some());
    assert_eq!(driver.calls(Operation::DeleteDatabase), 0);

    // The dependent access was asked to go away
    let access: DatabaseAccess = fetch(&ctx, Some(NS), "a1").await.unwrap();
    assert!(access.metadata.deletion_timestamp.is_some());

    // A deleting database refuses new grants
    seed(&ctx, database_access(NS, "a2", "r1", "rw", "c2")).await;
    assert!(run_access(&ctx, NS, "a2").await.is_err());

    run_access(&ctx, NS, "a1").await.unwrap();
    assert!(fetch::<DatabaseAccess>(&ctx, Some(NS), "a1").await.is_none());

    run_database(&ctx, "small-r1").await.unwrap();
    assert!(fetch::<Database>(&ctx, None, "small-r1").await.is_none());
    assert_eq!(driver.calls(Operation::DeleteDatabase), 1);
}

#[tokio::test]
async fn test_requests_in_other_namespaces_are_independent() {
    let driver = Arc::new(ScriptedProvisioner::new(DRIVER));
    let ctx = test_context(driver.clone());
    seed(&ctx, database_class("small", DRIVER, DeletionPolicy::Delete)).await;
    seed(&ctx, class_request("team-a", "r1", "small")).await;
    seed(&ctx, class_request("team-b", "r2", "small")).await;

    settle(&ctx, 2).await;

    for (ns, name, database) in [("team-a", "r1", "small-r1"), ("team-b", "r2", "small-r2")] {
        let request: DatabaseRequest = fetch(&ctx, Some(ns), name).await.unwrap();
        assert!(request.is_ready(), "{ns}/{name}");
        assert_eq!(request.database_name(), Some(database));
    }
    assert_eq!(driver.backend().database_count().await, 2);
}
