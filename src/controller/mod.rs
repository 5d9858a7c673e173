pub mod access_reconciler;
pub mod context;
pub mod database_reconciler;
pub mod error;
pub mod finalizer;
pub mod request_reconciler;
pub mod status;

use std::time::Duration;

pub use access_reconciler::{ACCESS_CONTROLLER, access_error_policy, reconcile_access};
pub use context::{Context, object_key};
pub use database_reconciler::{DATABASE_CONTROLLER, database_error_policy, reconcile_database};
pub use error::{BackoffConfig, Error, Result};
pub use finalizer::{
    ACCESS_FINALIZER, DATABASE_ACCESS_FINALIZER, DATABASE_FINALIZER, FINALIZER_RETRIES,
    REQUEST_FINALIZER, SECRET_FINALIZER, ensure_finalizer, has_finalizer, remove_finalizer,
};
pub use request_reconciler::{
    REQUEST_CONTROLLER, database_name_for, reconcile_request, request_error_policy,
};
pub use status::{ConditionBuilder, StatusManager};

/// Requeue delay after losing an optimistic-concurrency race on a status write
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);
