//! Record builders and helpers that drive the reconcilers against a
//! [`MemoryStore`].
//!
//! ```rust,ignore
//! let driver = Arc::new(ScriptedProvisioner::new(DRIVER));
//! let ctx = test_context(driver.clone());
//! seed(&ctx, database_class("small", DRIVER, DeletionPolicy::Delete)).await;
//! seed(&ctx, class_request(NS, "r1", "small")).await;
//! settle(&ctx, 5).await;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use kube::core::ObjectMeta;
use kube::runtime::controller::Action;

use database_operator::crd::{
    AuthenticationType, Database, DatabaseAccess, DatabaseAccessClass, DatabaseAccessClassSpec,
    DatabaseAccessSpec, DatabaseClass, DatabaseClassSpec, DatabaseRequest, DatabaseRequestSpec,
    DatabaseSpec, DeletionPolicy,
};
use database_operator::driver::{DriverGateway, Provisioner};
use database_operator::store::{MemoryStore, Record, Store};
use database_operator::{Context, Result, reconcile_access, reconcile_database, reconcile_request};

/// Driver name every fixture uses unless a test says otherwise
pub const DRIVER: &str = "fake";

/// Namespace for namespaced fixtures
pub const NS: &str = "default";

pub type TestContext = Arc<Context<MemoryStore>>;

/// Context over an empty [`MemoryStore`] whose driver reports [`DRIVER`]
pub fn test_context(provisioner: Arc<dyn Provisioner>) -> TestContext {
    test_context_with(DriverGateway::new(provisioner))
}

pub fn test_context_with(driver: DriverGateway) -> TestContext {
    Arc::new(Context::new(MemoryStore::new(), driver, DRIVER))
}

/// Store a record, then its status if it carries one
pub async fn seed<K: Record>(ctx: &TestContext, obj: K) -> K {
    let created = ctx.store.create(&obj).await.unwrap();
    let status = serde_json::to_value(&obj).unwrap().get("status").cloned();
    match status {
        Some(status) if !status.is_null() => {
            let mut value = serde_json::to_value(&created).unwrap();
            value["status"] = status;
            let with_status: K = serde_json::from_value(value).unwrap();
            ctx.store.replace_status(&with_status).await.unwrap()
        }
        _ => created,
    }
}

pub async fn fetch<K: Record>(ctx: &TestContext, namespace: Option<&str>, name: &str) -> Option<K> {
    ctx.store.get::<K>(namespace, name).await.unwrap()
}

pub fn database_class(name: &str, driver: &str, deletion_policy: DeletionPolicy) -> DatabaseClass {
    DatabaseClass::new(
        name,
        DatabaseClassSpec {
            driver_name: driver.to_string(),
            parameters: BTreeMap::from([("tier".to_string(), "small".to_string())]),
            deletion_policy,
        },
    )
}

pub fn access_class(name: &str, driver: &str) -> DatabaseAccessClass {
    DatabaseAccessClass::new(
        name,
        DatabaseAccessClassSpec {
            driver_name: driver.to_string(),
            authentication_type: AuthenticationType::Key,
            parameters: BTreeMap::new(),
        },
    )
}

fn namespaced(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

pub fn class_request(namespace: &str, name: &str, class: &str) -> DatabaseRequest {
    DatabaseRequest {
        metadata: namespaced(namespace, name),
        spec: DatabaseRequestSpec {
            database_class_name: Some(class.to_string()),
            existing_database_name: None,
        },
        status: None,
    }
}

pub fn existing_request(namespace: &str, name: &str, database: &str) -> DatabaseRequest {
    DatabaseRequest {
        metadata: namespaced(namespace, name),
        spec: DatabaseRequestSpec {
            database_class_name: None,
            existing_database_name: Some(database.to_string()),
        },
        status: None,
    }
}

pub fn database_access(
    namespace: &str,
    name: &str,
    request: &str,
    class: &str,
    secret: &str,
) -> DatabaseAccess {
    DatabaseAccess {
        metadata: namespaced(namespace, name),
        spec: DatabaseAccessSpec {
            database_request_name: request.to_string(),
            database_access_class_name: class.to_string(),
            credentials_secret_name: secret.to_string(),
        },
        status: None,
    }
}

/// Database that adopts an already provisioned external id
pub fn existing_database(name: &str, driver: &str, database_id: &str) -> Database {
    Database::new(
        name,
        DatabaseSpec {
            driver_name: driver.to_string(),
            database_class_name: String::new(),
            parameters: BTreeMap::new(),
            deletion_policy: DeletionPolicy::Retain,
            existing_database_id: Some(database_id.to_string()),
            database_request: None,
        },
    )
}

pub async fn run_request(ctx: &TestContext, namespace: &str, name: &str) -> Result<Action> {
    let request = DatabaseRequest {
        metadata: namespaced(namespace, name),
        spec: DatabaseRequestSpec::default(),
        status: None,
    };
    reconcile_request(Arc::new(request), ctx.clone()).await
}

pub async fn run_database(ctx: &TestContext, name: &str) -> Result<Action> {
    let database = Database::new(name, DatabaseSpec::default());
    reconcile_database(Arc::new(database), ctx.clone()).await
}

pub async fn run_access(ctx: &TestContext, namespace: &str, name: &str) -> Result<Action> {
    let access = DatabaseAccess {
        metadata: namespaced(namespace, name),
        spec: DatabaseAccessSpec::default(),
        status: None,
    };
    reconcile_access(Arc::new(access), ctx.clone()).await
}

/// Run every controller over every record, `rounds` times, ignoring errors.
///
/// Stands in for the watch-driven controllers reaching a fixed point.
pub async fn settle(ctx: &TestContext, rounds: usize) {
    for _ in 0..rounds {
        for request in ctx.store.list::<DatabaseRequest>(None).await.unwrap() {
            let ns = request.namespace().unwrap();
            let _ = run_request(ctx, &ns, &request.name_any()).await;
        }
        for database in ctx.store.list::<Database>(None).await.unwrap() {
            let _ = run_database(ctx, &database.name_any()).await;
        }
        for access in ctx.store.list::<DatabaseAccess>(None).await.unwrap() {
            let ns = access.namespace().unwrap();
            let _ = run_access(ctx, &ns, &access.name_any()).await;
        }
    }
}
