//! Reconciler for Database resources
//!
//! Provisions the external database through the driver, records its id and
//! propagates readiness to the originating DatabaseRequest. On deletion the
//! dependent DatabaseAccess records are drained first, then the external
//! database is deprovisioned, then the finalizers are released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, info, instrument, warn};

use crate::controller::CONFLICT_REQUEUE;
use crate::controller::context::{Context, object_key};
use crate::controller::error::{Error, Result};
use crate::controller::finalizer::{
    DATABASE_ACCESS_FINALIZER, DATABASE_FINALIZER, REQUEST_FINALIZER, ensure_finalizer,
    has_finalizer, remove_finalizer,
};
use crate::controller::status::{StatusManager, condition_types, find_condition, reasons};
use crate::crd::{
    Database, DatabaseAccess, DatabaseRequest, DatabaseRequestStatus, DatabaseState,
    DeletionPolicy,
};
use crate::driver::{DriverError, Operation, Outcome};
use crate::store::{Store, is_conflict, is_not_found};

/// Controller name used in logs and metrics
pub const DATABASE_CONTROLLER: &str = "database";

/// Re-check interval while dependent accesses are draining
const DEPENDENTS_REQUEUE: Duration = Duration::from_secs(5);

/// Reconcile a Database
#[instrument(skip(database, ctx), fields(name = %database.name_any()))]
pub async fn reconcile_database<S: Store>(
    database: Arc<Database>,
    ctx: Arc<Context<S>>,
) -> Result<Action> {
    let start = Instant::now();
    let name = database.name_any();

    let action = reconcile_inner(&ctx, &name).await?;

    let key = object_key("Database", None, &name);
    ctx.record_success(DATABASE_CONTROLLER, &key, start.elapsed().as_secs_f64());
    Ok(action)
}

/// Error policy for the database controller
pub fn database_error_policy<S: Store>(
    database: Arc<Database>,
    error: &Error,
    ctx: Arc<Context<S>>,
) -> Action {
    let key = object_key("Database", None, &database.name_any());
    ctx.requeue_after_error(DATABASE_CONTROLLER, &key, error)
}

async fn reconcile_inner<S: Store>(ctx: &Context<S>, name: &str) -> Result<Action> {
    let Some(database) = ctx.store.get::<Database>(None, name).await? else {
        debug!("Database no longer exists");
        return Ok(Action::await_change());
    };

    if !ctx.owns_driver(&database.spec.driver_name) {
        debug!(
            driver = %database.spec.driver_name,
            "Database belongs to another driver, skipping"
        );
        return Ok(Action::await_change());
    }

    let state = database.state();
    debug!(state = %state, "Reconciling Database");

    match state {
        DatabaseState::Deleting => handle_deletion(ctx, &database, name).await,
        DatabaseState::Ready => propagate_to_request(ctx, &database, name).await,
        DatabaseState::New | DatabaseState::Provisioning => provision(ctx, name).await,
    }
}

async fn provision<S: Store>(ctx: &Context<S>, name: &str) -> Result<Action> {
    // The finalizer goes on first so the external database cannot outlive the record
    let database: Database = ensure_finalizer(&ctx.store, None, name, DATABASE_FINALIZER).await?;
    let status = StatusManager::new(&database, &ctx.store);

    let existing = database
        .spec
        .existing_database_id
        .as_deref()
        .filter(|id| !id.is_empty());

    let (database_id, reason) = if let Some(id) = existing {
        info!(database_id = %id, "Adopting existing external database");
        (id.to_string(), reasons::EXISTING_DATABASE)
    } else if let Some(id) = database.database_id() {
        (id.to_string(), reasons::DATABASE_READY)
    } else {
        match create_external(ctx, &database, name).await {
            Ok(id) => (id, reasons::DATABASE_READY),
            Err(e @ Error::DriverFatal(_)) => {
                mark_failed(&status, &database, &e).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        }
    };

    let database = match status.set_ready(&database_id, reason).await {
        Ok(updated) => updated,
        Err(Error::KubeError(e)) if is_conflict(&e) => {
            debug!("Conflict writing Database status, requeuing");
            return Ok(Action::requeue(CONFLICT_REQUEUE));
        }
        Err(e) => return Err(e),
    };
    info!(database_id = %database_id, "Database is ready");

    propagate_to_request(ctx, &database, name).await
}

/// Call CreateDatabase and extract a usable id
async fn create_external<S: Store>(
    ctx: &Context<S>,
    database: &Database,
    name: &str,
) -> Result<String> {
    let op = Operation::CreateDatabase;
    let response = match ctx
        .driver
        .create_database(name, &database.spec.parameters)
        .await?
    {
        Outcome::Success(response) => response,
        Outcome::AlreadyExists(Some(response)) => {
            info!("External database already exists, reusing its id");
            response
        }
        Outcome::AlreadyExists(None) => {
            return Err(DriverError::fatal(op, "database already exists but no id was returned").into());
        }
        Outcome::NotFound => {
            return Err(DriverError::fatal(op, "unexpected NotFound").into());
        }
    };

    if response.database_id.is_empty() {
        return Err(DriverError::fatal(op, "driver returned an empty database id").into());
    }
    Ok(response.database_id)
}

/// Best-effort Ready=False condition for a failed provisioning attempt
async fn mark_failed<S: Store>(status: &StatusManager<'_, S>, database: &Database, error: &Error) {
    let message = error.to_string();
    let unchanged = database
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, condition_types::READY))
        .is_some_and(|c| c.reason == reasons::FAILED_TO_CREATE && c.message == message);
    if unchanged {
        return;
    }
    if let Err(e) = status.set_failed(reasons::FAILED_TO_CREATE, &message).await {
        warn!(error = %e, "Failed to record provisioning failure");
    }
}

/// Copy readiness and the database name into the originating request
async fn propagate_to_request<S: Store>(
    ctx: &Context<S>,
    database: &Database,
    name: &str,
) -> Result<Action> {
    let Some(reference) = database.spec.database_request.as_ref() else {
        return Ok(Action::await_change());
    };

    let Some(mut request) = ctx
        .store
        .get::<DatabaseRequest>(Some(&reference.namespace), &reference.name)
        .await?
    else {
        debug!(request = %reference.name, "Originating DatabaseRequest is gone");
        return Ok(Action::await_change());
    };

    if request.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    match request.database_name() {
        Some(linked) if linked != name => {
            warn!(request = %reference.name, linked = %linked, "DatabaseRequest is linked to another Database");
            return Ok(Action::await_change());
        }
        Some(_) if request.is_ready() => return Ok(Action::await_change()),
        _ => {}
    }

    request.status = Some(DatabaseRequestStatus {
        ready: true,
        database_name: Some(name.to_string()),
    });
    match ctx.store.replace_status(&request).await {
        Ok(_) => {
            info!(request = %reference.name, namespace = %reference.namespace, "DatabaseRequest is ready");
            Ok(Action::await_change())
        }
        Err(e) if is_conflict(&e) => {
            debug!("Conflict writing DatabaseRequest status, requeuing");
            Ok(Action::requeue(CONFLICT_REQUEUE))
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle_deletion<S: Store>(
    ctx: &Context<S>,
    database: &Database,
    name: &str,
) -> Result<Action> {
    info!("Handling Database deletion");

    if has_finalizer(database, DATABASE_ACCESS_FINALIZER) {
        let remaining = drain_accesses(ctx, database).await?;
        if remaining > 0 {
            info!(remaining, "Waiting for dependent DatabaseAccess records");
            mark_deleting(ctx, database).await;
            return Ok(Action::requeue(DEPENDENTS_REQUEUE));
        }
        remove_finalizer::<_, Database>(&ctx.store, None, name, DATABASE_ACCESS_FINALIZER)
            .await?;
    }

    if has_finalizer(database, DATABASE_FINALIZER) {
        if database.spec.deletion_policy == DeletionPolicy::Delete {
            delete_external(ctx, database).await?;
        } else {
            info!(policy = %database.spec.deletion_policy, "Retaining external database");
        }
        remove_finalizer::<_, Database>(&ctx.store, None, name, DATABASE_FINALIZER).await?;
    }

    if let Some(reference) = database.spec.database_request.as_ref() {
        match remove_finalizer::<_, DatabaseRequest>(
            &ctx.store,
            Some(&reference.namespace),
            &reference.name,
            REQUEST_FINALIZER,
        )
        .await
        {
            Ok(_) => {}
            Err(e) => warn!(request = %reference.name, error = %e, "Failed to release DatabaseRequest"),
        }
    }

    info!("Database teardown complete");
    Ok(Action::await_change())
}

/// Issue deletes for accesses of the originating request; returns how many are still tearing down
async fn drain_accesses<S: Store>(ctx: &Context<S>, database: &Database) -> Result<usize> {
    let Some(reference) = database.spec.database_request.as_ref() else {
        return Ok(0);
    };

    let accesses: Vec<DatabaseAccess> = ctx
        .store
        .list::<DatabaseAccess>(Some(&reference.namespace))
        .await?
        .into_iter()
        .filter(|a| a.spec.database_request_name == reference.name)
        .collect();

    // Accesses without finalizers disappear on delete; only the rest are waited on
    let pending = accesses.iter().filter(|a| !a.finalizers().is_empty()).count();

    for access in &accesses {
        if access.metadata.deletion_timestamp.is_some() {
            continue;
        }
        let access_name = access.name_any();
        info!(access = %access_name, "Deleting dependent DatabaseAccess");
        match ctx
            .store
            .delete::<DatabaseAccess>(Some(&reference.namespace), &access_name)
            .await
        {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(pending)
}

async fn delete_external<S: Store>(ctx: &Context<S>, database: &Database) -> Result<()> {
    let Some(database_id) = database.database_id() else {
        info!("No external database was provisioned");
        return Ok(());
    };

    match ctx.driver.delete_database(database_id).await? {
        Outcome::NotFound => info!(database_id, "External database already gone"),
        _ => info!(database_id, "Deleted external database"),
    }
    Ok(())
}

/// Best-effort Deleting condition while teardown waits on dependents
async fn mark_deleting<S: Store>(ctx: &Context<S>, database: &Database) {
    let already = database
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, condition_types::READY))
        .is_some_and(|c| c.reason == reasons::DELETING);
    if already {
        return;
    }
    if let Err(e) = StatusManager::new(database, &ctx.store).set_deleting().await {
        debug!(error = %e, "Could not record Deleting condition");
    }
}
