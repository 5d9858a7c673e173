//! Reconciler for DatabaseAccess resources
//!
//! Grants credentials once the chain DatabaseAccess -> DatabaseRequest ->
//! Database is ready and writes them into the named Secret. Teardown revokes
//! the grant, removes the Secret and only then releases the access.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use kube::runtime::controller::Action;
use tracing::{debug, info, instrument, warn};

use crate::controller::CONFLICT_REQUEUE;
use crate::controller::context::{Context, object_key};
use crate::controller::error::{Error, Result};
use crate::controller::finalizer::{
    ACCESS_FINALIZER, DATABASE_ACCESS_FINALIZER, SECRET_FINALIZER, ensure_finalizer,
    has_finalizer, remove_finalizer,
};
use crate::crd::{
    Database, DatabaseAccess, DatabaseAccessClass, DatabaseAccessStatus, DatabaseRequest,
};
use crate::driver::{CREDENTIAL_KEY, DriverError, GrantAccessResponse, Operation, Outcome};
use crate::store::{Store, is_already_exists, is_conflict, is_not_found};

/// Controller name used in logs and metrics
pub const ACCESS_CONTROLLER: &str = "databaseaccess";

/// Reconcile a DatabaseAccess
#[instrument(skip(access, ctx), fields(name = %access.name_any(), namespace = access.namespace().unwrap_or_default()))]
pub async fn reconcile_access<S: Store>(
    access: Arc<DatabaseAccess>,
    ctx: Arc<Context<S>>,
) -> Result<Action> {
    let start = Instant::now();
    let ns = access
        .namespace()
        .ok_or(Error::MissingObjectKey("namespace"))?;
    let name = access.name_any();

    let action = reconcile_inner(&ctx, &ns, &name).await?;

    let key = object_key("DatabaseAccess", Some(&ns), &name);
    ctx.record_success(ACCESS_CONTROLLER, &key, start.elapsed().as_secs_f64());
    Ok(action)
}

/// Error policy for the access controller
pub fn access_error_policy<S: Store>(
    access: Arc<DatabaseAccess>,
    error: &Error,
    ctx: Arc<Context<S>>,
) -> Action {
    let key = object_key(
        "DatabaseAccess",
        access.namespace().as_deref(),
        &access.name_any(),
    );
    ctx.requeue_after_error(ACCESS_CONTROLLER, &key, error)
}

async fn reconcile_inner<S: Store>(ctx: &Context<S>, ns: &str, name: &str) -> Result<Action> {
    let Some(access) = ctx.store.get::<DatabaseAccess>(Some(ns), name).await? else {
        debug!("DatabaseAccess no longer exists");
        return Ok(Action::await_change());
    };

    if access.metadata.deletion_timestamp.is_some() {
        return teardown(ctx, &access, ns, name).await;
    }

    if access.is_granted() {
        debug!("Access already granted");
        return Ok(Action::await_change());
    }

    grant(ctx, &access, ns, name).await
}

/// Resolved grant target
struct Target {
    class: DatabaseAccessClass,
    database_name: String,
    database_id: String,
}

/// Check every precondition for granting; `None` means the record belongs to
/// another driver
async fn resolve_target<S: Store>(
    ctx: &Context<S>,
    access: &DatabaseAccess,
    ns: &str,
) -> Result<Option<Target>> {
    if access.spec.credentials_secret_name.is_empty() {
        return Err(Error::ValidationError(
            "credentialsSecretName must be set".to_string(),
        ));
    }

    let class_name = &access.spec.database_access_class_name;
    let class = ctx
        .store
        .get::<DatabaseAccessClass>(None, class_name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("DatabaseAccessClass {class_name}")))?;

    if !ctx.owns_driver(&class.spec.driver_name) {
        debug!(driver = %class.spec.driver_name, "DatabaseAccess belongs to another driver, skipping");
        return Ok(None);
    }

    let request_name = &access.spec.database_request_name;
    let request = ctx
        .store
        .get::<DatabaseRequest>(Some(ns), request_name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("DatabaseRequest {ns}/{request_name}")))?;

    let database_name = match request.database_name() {
        Some(database_name) if request.is_ready() => database_name.to_string(),
        _ => {
            return Err(Error::NotReady(format!(
                "DatabaseRequest {ns}/{request_name} is not ready"
            )));
        }
    };

    let database = ctx
        .store
        .get::<Database>(None, &database_name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Database {database_name}")))?;

    if database.metadata.deletion_timestamp.is_some() {
        return Err(Error::NotReady(format!(
            "Database {database_name} is being deleted"
        )));
    }
    let database_id = match database.database_id() {
        Some(id) if database.is_ready() => id.to_string(),
        _ => {
            return Err(Error::NotReady(format!(
                "Database {database_name} is not ready"
            )));
        }
    };

    Ok(Some(Target {
        class,
        database_name,
        database_id,
    }))
}

async fn grant<S: Store>(
    ctx: &Context<S>,
    access: &DatabaseAccess,
    ns: &str,
    name: &str,
) -> Result<Action> {
    let Some(target) = resolve_target(ctx, access, ns).await? else {
        return Ok(Action::await_change());
    };

    let account_name = access.account_name();
    let op = Operation::GrantAccess;
    let response = match ctx
        .driver
        .grant_access(
            &target.database_id,
            &account_name,
            target.class.spec.authentication_type,
            &target.class.spec.parameters,
        )
        .await?
    {
        Outcome::Success(response) => response,
        Outcome::AlreadyExists(Some(response)) => {
            info!(account = %account_name, "Access already granted by driver, reusing credentials");
            response
        }
        Outcome::AlreadyExists(None) => {
            return Err(DriverError::fatal(op, "access already exists but no credentials were returned").into());
        }
        Outcome::NotFound => {
            return Err(DriverError::fatal(op, "unexpected NotFound").into());
        }
    };

    let secrets = credential_secrets(&response)?;
    let secret_name = &access.spec.credentials_secret_name;
    ensure_secret(ctx, ns, secret_name, secrets).await?;

    ensure_finalizer::<_, Database>(&ctx.store, None, &target.database_name, DATABASE_ACCESS_FINALIZER)
        .await?;
    let mut access: DatabaseAccess =
        ensure_finalizer(&ctx.store, Some(ns), name, ACCESS_FINALIZER).await?;

    // accountId is written at most once
    let account_id = access
        .account_id()
        .map(str::to_string)
        .unwrap_or(response.account_id);
    access.status = Some(DatabaseAccessStatus {
        access_granted: true,
        account_id: Some(account_id),
    });

    match ctx.store.replace_status(&access).await {
        Ok(_) => {
            info!(secret = %secret_name, "Access granted");
            Ok(Action::await_change())
        }
        Err(e) if is_conflict(&e) => {
            debug!("Conflict writing DatabaseAccess status, requeuing");
            Ok(Action::requeue(CONFLICT_REQUEUE))
        }
        Err(e) => Err(e.into()),
    }
}

/// Secret material of the `cred` entry
fn credential_secrets(response: &GrantAccessResponse) -> Result<&BTreeMap<String, String>> {
    let op = Operation::GrantAccess;
    if response.account_id.is_empty() {
        return Err(DriverError::fatal(op, "driver returned an empty account id").into());
    }
    response
        .credentials
        .get(CREDENTIAL_KEY)
        .map(|c| &c.secrets)
        .ok_or_else(|| {
            DriverError::fatal(op, format!("credentials carry no {CREDENTIAL_KEY:?} entry")).into()
        })
}

/// Create the credentials secret unless one already exists under that name
async fn ensure_secret<S: Store>(
    ctx: &Context<S>,
    ns: &str,
    secret_name: &str,
    secrets: &BTreeMap<String, String>,
) -> Result<()> {
    if ctx
        .store
        .get::<Secret>(Some(ns), secret_name)
        .await?
        .is_some()
    {
        debug!(secret = %secret_name, "Credentials secret already exists");
        return Ok(());
    }

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: Some(ns.to_string()),
            finalizers: Some(vec![SECRET_FINALIZER.to_string()]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            secrets
                .iter()
                .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
                .collect(),
        ),
        ..Default::default()
    };

    match ctx.store.create(&secret).await {
        Ok(_) => {
            info!(secret = %secret_name, "Created credentials secret");
            Ok(())
        }
        Err(e) if is_already_exists(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Resolve the external database id behind an access, if the chain still exists
async fn resolve_database_id<S: Store>(
    ctx: &Context<S>,
    access: &DatabaseAccess,
    ns: &str,
) -> Result<Option<String>> {
    let Some(request) = ctx
        .store
        .get::<DatabaseRequest>(Some(ns), &access.spec.database_request_name)
        .await?
    else {
        return Ok(None);
    };
    let Some(database_name) = request.database_name() else {
        return Ok(None);
    };
    let database = ctx.store.get::<Database>(None, database_name).await?;
    Ok(database.and_then(|db| db.database_id().map(str::to_string)))
}

async fn teardown<S: Store>(
    ctx: &Context<S>,
    access: &DatabaseAccess,
    ns: &str,
    name: &str,
) -> Result<Action> {
    if !has_finalizer(access, ACCESS_FINALIZER) {
        return Ok(Action::await_change());
    }

    let class = ctx
        .store
        .get::<DatabaseAccessClass>(None, &access.spec.database_access_class_name)
        .await?;
    if let Some(class) = class.as_ref() {
        if !ctx.owns_driver(&class.spec.driver_name) {
            debug!(driver = %class.spec.driver_name, "DatabaseAccess belongs to another driver, skipping");
            return Ok(Action::await_change());
        }
    }

    info!("Revoking DatabaseAccess");

    if let Some(account_id) = access.account_id() {
        match resolve_database_id(ctx, access, ns).await? {
            Some(database_id) => match ctx.driver.revoke_access(&database_id, account_id).await? {
                Outcome::NotFound => info!(account_id, "Grant already revoked"),
                _ => info!(account_id, "Revoked grant"),
            },
            None => warn!(account_id, "Target database is gone, skipping revoke"),
        }
    }

    let secret_name = &access.spec.credentials_secret_name;
    if !secret_name.is_empty() {
        match ctx.store.delete::<Secret>(Some(ns), secret_name).await {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }
        remove_finalizer::<_, Secret>(&ctx.store, Some(ns), secret_name, SECRET_FINALIZER).await?;
        debug!(secret = %secret_name, "Removed credentials secret");
    }

    remove_finalizer::<_, DatabaseAccess>(&ctx.store, Some(ns), name, ACCESS_FINALIZER).await?;
    info!("DatabaseAccess released");
    Ok(Action::await_change())
}
