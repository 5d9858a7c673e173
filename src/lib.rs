pub mod config;
pub mod controller;
pub mod crd;
pub mod driver;
pub mod health;
pub mod store;

pub use config::{FakeDriverConfig, OperatorConfig};
pub use controller::{
    ACCESS_FINALIZER, BackoffConfig, Context, DATABASE_ACCESS_FINALIZER, DATABASE_FINALIZER,
    Error, REQUEST_FINALIZER, Result, SECRET_FINALIZER, access_error_policy,
    database_error_policy, reconcile_access, reconcile_database, reconcile_request,
    request_error_policy,
};
pub use crd::{Database, DatabaseAccess, DatabaseAccessClass, DatabaseClass, DatabaseRequest};
pub use driver::{DriverGateway, FakeProvisioner, Provisioner, ProvisionerClient};
pub use health::{HealthState, Metrics};
pub use store::{KubeStore, MemoryStore, Store};

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;

use controller::{ACCESS_CONTROLLER, DATABASE_CONTROLLER, REQUEST_CONTROLLER, object_key};

/// Helper to create a namespaced or cluster-wide API based on scope.
pub(crate) fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Log the result of one reconciliation from a controller stream.
///
/// The controller never reconciles an object again once it is gone from the
/// cache, so its failure streak is dropped here.
fn log_result<K, E, Q>(
    ctx: &Context,
    kind: &str,
    controller: &str,
    result: std::result::Result<(ObjectRef<K>, Action), ControllerError<E, Q>>,
) where
    K: Resource,
    E: std::error::Error + 'static,
    Q: std::error::Error + 'static,
{
    match result {
        Ok((obj, _action)) => {
            tracing::debug!(controller, "Reconciled: {}", obj.name);
        }
        Err(ControllerError::ObjectNotFound(obj)) => {
            ctx.forget(&object_key(kind, obj.namespace.as_deref(), &obj.name));
            tracing::debug!(controller, "Object no longer exists: {}", obj.name);
        }
        Err(e) => {
            tracing::error!(controller, "Reconciliation error: {:?}", e);
        }
    }
}

/// Run the DatabaseRequest controller.
///
/// Watches DatabaseRequest resources and the Databases spawned for them. When
/// `namespace` is `Some(ns)`, only watches requests in that namespace. Stops
/// when the driver gateway's cancellation token fires.
pub async fn run_request_controller_scoped(ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for DatabaseRequest resources (scope: {})",
        scope_msg
    );

    let client = ctx.store.client().clone();
    let shutdown = ctx.driver.cancellation().clone();
    let requests: Api<DatabaseRequest> = scoped_api(client.clone(), namespace);
    let databases: Api<Database> = Api::all(client);

    let watcher_config = WatcherConfig::default().any_semantic();

    // Databases are cluster-scoped and cannot be owned by a namespaced request;
    // map them back through the non-owning reference instead
    Controller::new(requests, watcher_config.clone())
        .watches(databases, watcher_config, |database: Database| {
            database
                .spec
                .database_request
                .map(|r| ObjectRef::<DatabaseRequest>::new(&r.name).within(&r.namespace))
        })
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile_request, request_error_policy, ctx.clone())
        .for_each(|result| {
            log_result(&ctx, "DatabaseRequest", REQUEST_CONTROLLER, result);
            futures::future::ready(())
        })
        .await;

    tracing::info!("DatabaseRequest controller stopped");
}

/// Run the Database controller.
///
/// Databases are cluster-scoped; `namespace` only narrows the DatabaseAccess
/// watch used to notice dependents draining.
pub async fn run_database_controller_scoped(ctx: Arc<Context>, namespace: Option<&str>) {
    tracing::info!("Starting controller for Database resources");

    let client = ctx.store.client().clone();
    let shutdown = ctx.driver.cancellation().clone();
    let databases: Api<Database> = Api::all(client.clone());
    let accesses: Api<DatabaseAccess> = scoped_api(client, namespace);

    let watcher_config = WatcherConfig::default().any_semantic();

    let controller = Controller::new(databases, watcher_config.clone());
    let database_store = controller.store();

    controller
        .watches(accesses, watcher_config, move |access: DatabaseAccess| {
            let ns = access.namespace().unwrap_or_default();
            database_store
                .state()
                .into_iter()
                .filter(|db| {
                    db.spec.database_request.as_ref().is_some_and(|r| {
                        r.namespace == ns && r.name == access.spec.database_request_name
                    })
                })
                .map(|db| ObjectRef::from_obj(&*db))
                .collect::<Vec<_>>()
        })
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile_database, database_error_policy, ctx.clone())
        .for_each(|result| {
            log_result(&ctx, "Database", DATABASE_CONTROLLER, result);
            futures::future::ready(())
        })
        .await;

    tracing::info!("Database controller stopped");
}

/// Run the DatabaseAccess controller with optional namespace scoping.
///
/// Requests becoming ready re-trigger the accesses that reference them.
pub async fn run_access_controller_scoped(ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for DatabaseAccess resources (scope: {})",
        scope_msg
    );

    let client = ctx.store.client().clone();
    let shutdown = ctx.driver.cancellation().clone();
    let accesses: Api<DatabaseAccess> = scoped_api(client.clone(), namespace);
    let requests: Api<DatabaseRequest> = scoped_api(client, namespace);

    let watcher_config = WatcherConfig::default().any_semantic();

    let controller = Controller::new(accesses, watcher_config.clone());
    let access_store = controller.store();

    controller
        .watches(requests, watcher_config, move |request: DatabaseRequest| {
            let ns = request.namespace();
            let name = request.name_any();
            access_store
                .state()
                .into_iter()
                .filter(|a| a.namespace() == ns && a.spec.database_request_name == name)
                .map(|a| ObjectRef::from_obj(&*a))
                .collect::<Vec<_>>()
        })
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile_access, access_error_policy, ctx.clone())
        .for_each(|result| {
            log_result(&ctx, "DatabaseAccess", ACCESS_CONTROLLER, result);
            futures::future::ready(())
        })
        .await;

    tracing::info!("DatabaseAccess controller stopped");
}
