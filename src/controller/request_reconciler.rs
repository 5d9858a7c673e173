//! Reconciler for DatabaseRequest resources
//!
//! A class-based request spawns exactly one Database named
//! `{class}-{request}`; the link is recorded in `status.databaseName` and
//! never changes afterwards. A request naming an existing Database binds to
//! it directly. Readiness of a spawned database is propagated back by the
//! database reconciler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::core::ObjectMeta;
use kube::runtime::controller::Action;
use tracing::{debug, info, instrument, warn};

use crate::controller::CONFLICT_REQUEUE;
use crate::controller::context::{Context, object_key};
use crate::controller::error::{Error, Result};
use crate::controller::finalizer::{
    REQUEST_FINALIZER, ensure_finalizer, has_finalizer, remove_finalizer,
};
use crate::crd::{
    Database, DatabaseClass, DatabaseRequest, DatabaseRequestRef, DatabaseRequestStatus,
    DatabaseSpec, DatabaseStatus, RequestSource,
};
use crate::store::{Store, is_already_exists, is_conflict, is_not_found};

/// Controller name used in logs and metrics
pub const REQUEST_CONTROLLER: &str = "databaserequest";

/// Re-check interval while a spawned database is being provisioned or torn down
const PENDING_REQUEUE: Duration = Duration::from_secs(30);

/// Name of the Database spawned for a class-based request
pub fn database_name_for(class_name: &str, request_name: &str) -> String {
    format!("{class_name}-{request_name}")
}

/// Reconcile a DatabaseRequest
#[instrument(skip(request, ctx), fields(name = %request.name_any(), namespace = request.namespace().unwrap_or_default()))]
pub async fn reconcile_request<S: Store>(
    request: Arc<DatabaseRequest>,
    ctx: Arc<Context<S>>,
) -> Result<Action> {
    let start = Instant::now();
    let ns = request
        .namespace()
        .ok_or(Error::MissingObjectKey("namespace"))?;
    let name = request.name_any();

    let action = reconcile_inner(&ctx, &ns, &name).await?;

    let key = object_key("DatabaseRequest", Some(&ns), &name);
    ctx.record_success(REQUEST_CONTROLLER, &key, start.elapsed().as_secs_f64());
    Ok(action)
}

/// Error policy for the request controller
pub fn request_error_policy<S: Store>(
    request: Arc<DatabaseRequest>,
    error: &Error,
    ctx: Arc<Context<S>>,
) -> Action {
    let key = object_key(
        "DatabaseRequest",
        request.namespace().as_deref(),
        &request.name_any(),
    );
    ctx.requeue_after_error(REQUEST_CONTROLLER, &key, error)
}

async fn reconcile_inner<S: Store>(ctx: &Context<S>, ns: &str, name: &str) -> Result<Action> {
    // Work from a fresh read; the cached copy may be stale or already gone
    let Some(request) = ctx.store.get::<DatabaseRequest>(Some(ns), name).await? else {
        debug!("DatabaseRequest no longer exists");
        return Ok(Action::await_change());
    };

    if request.metadata.deletion_timestamp.is_some() {
        return handle_deletion(ctx, &request, ns, name).await;
    }

    if request.is_ready() {
        debug!("DatabaseRequest already ready");
        return Ok(Action::await_change());
    }

    match request.spec.source().map_err(Error::ValidationError)? {
        RequestSource::Class(class_name) => {
            provision_from_class(ctx, &request, ns, name, class_name).await
        }
        RequestSource::Existing(database_name) => {
            bind_existing(ctx, ns, name, database_name).await
        }
    }
}

async fn provision_from_class<S: Store>(
    ctx: &Context<S>,
    request: &DatabaseRequest,
    ns: &str,
    name: &str,
    class_name: &str,
) -> Result<Action> {
    let class = ctx
        .store
        .get::<DatabaseClass>(None, class_name)
        .await?
        .ok_or_else(|| Error::ValidationError(format!("DatabaseClass {class_name} not found")))?;

    let database_name = request
        .database_name()
        .map(str::to_string)
        .unwrap_or_else(|| database_name_for(class_name, name));

    // Existence probe guards against a second create on re-delivery
    let existing = match ctx.store.get::<Database>(None, &database_name).await? {
        Some(database) => Some(database),
        None => {
            let database = build_database(&class, class_name, &database_name, ns, name);
            match ctx.store.create(&database).await {
                Ok(_) => {
                    info!(database = %database_name, "Created Database");
                    None
                }
                Err(e) if is_already_exists(&e) => {
                    debug!(database = %database_name, "Database created concurrently");
                    ctx.store.get::<Database>(None, &database_name).await?
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    // Databases are cluster-scoped; a same-named request in another namespace
    // must not adopt one spawned for someone else
    if let Some(database) = existing.filter(|db| !spawned_for(db, ns, name)) {
        let owner = database
            .spec
            .database_request
            .map(|r| format!("{}/{}", r.namespace, r.name))
            .unwrap_or_else(|| "no request".to_string());
        return Err(Error::ValidationError(format!(
            "Database {database_name} already exists for {owner}"
        )));
    }

    let request: DatabaseRequest =
        ensure_finalizer(&ctx.store, Some(ns), name, REQUEST_FINALIZER).await?;

    if request.is_ready() || request.database_name() == Some(database_name.as_str()) {
        return Ok(Action::requeue(PENDING_REQUEUE));
    }
    write_status(ctx, request, &database_name, false).await
}

async fn bind_existing<S: Store>(
    ctx: &Context<S>,
    ns: &str,
    name: &str,
    database_name: &str,
) -> Result<Action> {
    if ctx
        .store
        .get::<Database>(None, database_name)
        .await?
        .is_none()
    {
        return Err(Error::NotFound(format!("Database {database_name}")));
    }

    let request: DatabaseRequest =
        ensure_finalizer(&ctx.store, Some(ns), name, REQUEST_FINALIZER).await?;
    info!(database = %database_name, "Binding to existing Database");
    write_status(ctx, request, database_name, true).await
}

async fn write_status<S: Store>(
    ctx: &Context<S>,
    mut request: DatabaseRequest,
    database_name: &str,
    ready: bool,
) -> Result<Action> {
    request.status = Some(DatabaseRequestStatus {
        ready,
        database_name: Some(database_name.to_string()),
    });

    match ctx.store.replace_status(&request).await {
        Ok(_) if ready => Ok(Action::await_change()),
        Ok(_) => Ok(Action::requeue(PENDING_REQUEUE)),
        Err(e) if is_conflict(&e) => {
            debug!("Conflict writing DatabaseRequest status, requeuing");
            Ok(Action::requeue(CONFLICT_REQUEUE))
        }
        Err(e) => Err(e.into()),
    }
}

fn build_database(
    class: &DatabaseClass,
    class_name: &str,
    database_name: &str,
    ns: &str,
    request_name: &str,
) -> Database {
    Database {
        metadata: ObjectMeta {
            name: Some(database_name.to_string()),
            ..Default::default()
        },
        spec: DatabaseSpec {
            driver_name: class.spec.driver_name.clone(),
            database_class_name: class_name.to_string(),
            parameters: class.spec.parameters.clone(),
            deletion_policy: class.spec.deletion_policy,
            existing_database_id: None,
            database_request: Some(DatabaseRequestRef {
                name: request_name.to_string(),
                namespace: ns.to_string(),
            }),
        },
        status: Some(DatabaseStatus::default()),
    }
}

/// Whether `database` was spawned for the request `ns/name`
fn spawned_for(database: &Database, ns: &str, name: &str) -> bool {
    database
        .spec
        .database_request
        .as_ref()
        .is_some_and(|r| r.namespace == ns && r.name == name)
}

async fn handle_deletion<S: Store>(
    ctx: &Context<S>,
    request: &DatabaseRequest,
    ns: &str,
    name: &str,
) -> Result<Action> {
    if !has_finalizer(request, REQUEST_FINALIZER) {
        return Ok(Action::await_change());
    }

    if let Ok(RequestSource::Class(class_name)) = request.spec.source() {
        let database_name = request
            .database_name()
            .map(str::to_string)
            .unwrap_or_else(|| database_name_for(class_name, name));

        if let Some(database) = ctx.store.get::<Database>(None, &database_name).await? {
            if spawned_for(&database, ns, name) {
                if database.metadata.deletion_timestamp.is_none() {
                    info!(database = %database_name, "Deleting spawned Database");
                    match ctx.store.delete::<Database>(None, &database_name).await {
                        Ok(()) => {}
                        Err(e) if is_not_found(&e) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                // The database reconciler releases our finalizer once deprovisioned
                debug!(database = %database_name, "Waiting for Database teardown");
                return Ok(Action::requeue(PENDING_REQUEUE));
            }
            warn!(database = %database_name, "Database was not spawned for this request, leaving it in place");
        }
    }

    remove_finalizer::<_, DatabaseRequest>(&ctx.store, Some(ns), name, REQUEST_FINALIZER).await?;
    info!("Released DatabaseRequest");
    Ok(Action::await_change())
}
