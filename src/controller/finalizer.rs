//! Finalizer bookkeeping shared by all controllers
//!
//! Adds and removes are read-modify-write cycles conditional on the
//! `resourceVersion` just read. On a 409 the cycle starts over from a fresh
//! read, up to [`FINALIZER_RETRIES`] times.

use kube::{Resource, ResourceExt};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::store::{Record, Store, is_conflict, is_not_found};

/// External database must be deprovisioned before the Database goes away
pub const DATABASE_FINALIZER: &str = "database.plural.sh/database-protection";

/// Dependent DatabaseAccess grants exist on the Database
pub const DATABASE_ACCESS_FINALIZER: &str =
    "database.plural.sh/databaseaccess-database-protection";

/// Spawned Database has not been cleaned up yet
pub const REQUEST_FINALIZER: &str = "database.plural.sh/databaserequest-protection";

/// Grant teardown has not run yet
pub const ACCESS_FINALIZER: &str = "database.plural.sh/databaseaccess-protection";

/// Credentials secret is owned by a grant
pub const SECRET_FINALIZER: &str = "database.plural.sh/secret-protection";

/// Attempts before giving up on a contended finalizer write
pub const FINALIZER_RETRIES: usize = 5;

/// Check if the record carries `finalizer`
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add `finalizer` if absent and return the fresh record.
///
/// Adding to a missing record is a `NotFound` error.
pub async fn ensure_finalizer<S, K>(
    store: &S,
    namespace: Option<&str>,
    name: &str,
    finalizer: &str,
) -> Result<K>
where
    S: Store,
    K: Record,
{
    for attempt in 1..=FINALIZER_RETRIES {
        let mut obj: K = store.get(namespace, name).await?.ok_or_else(|| {
            Error::NotFound(format!("{} {} (adding finalizer)", K::kind(&()), name))
        })?;

        if has_finalizer(&obj, finalizer) {
            return Ok(obj);
        }
        obj.finalizers_mut().push(finalizer.to_string());

        match store.replace(&obj).await {
            Ok(updated) => {
                debug!(kind = %K::kind(&()), name, finalizer, "Added finalizer");
                return Ok(updated);
            }
            Err(e) if is_conflict(&e) => {
                debug!(kind = %K::kind(&()), name, finalizer, attempt, "Conflict adding finalizer, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::FinalizerError(format!(
        "could not add {} to {} {} after {} attempts",
        finalizer,
        K::kind(&()),
        name,
        FINALIZER_RETRIES
    )))
}

/// Remove `finalizer` if present and return the fresh record.
///
/// A missing record, or one without the finalizer, is a successful no-op.
/// Returns `None` when the record does not exist.
pub async fn remove_finalizer<S, K>(
    store: &S,
    namespace: Option<&str>,
    name: &str,
    finalizer: &str,
) -> Result<Option<K>>
where
    S: Store,
    K: Record,
{
    for attempt in 1..=FINALIZER_RETRIES {
        let Some(mut obj) = store.get::<K>(namespace, name).await? else {
            return Ok(None);
        };

        if !has_finalizer(&obj, finalizer) {
            return Ok(Some(obj));
        }
        obj.finalizers_mut().retain(|f| f != finalizer);

        match store.replace(&obj).await {
            Ok(updated) => {
                debug!(kind = %K::kind(&()), name, finalizer, "Removed finalizer");
                return Ok(Some(updated));
            }
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) if is_conflict(&e) => {
                debug!(kind = %K::kind(&()), name, finalizer, attempt, "Conflict removing finalizer, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::FinalizerError(format!(
        "could not remove {} from {} {} after {} attempts",
        finalizer,
        K::kind(&()),
        name,
        FINALIZER_RETRIES
    )))
}
