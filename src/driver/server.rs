//! Serve any [`Provisioner`] over a Unix domain socket
//!
//! The counterpart of [`ProvisionerClient`](super::ProvisionerClient): one
//! `POST /v1/<Operation>` route per driver call. Errors are returned as a
//! JSON [`Status`] with an HTTP status derived from its code.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

use super::{
    CreateDatabaseRequest, DeleteDatabaseRequest, GetInfoRequest, GrantAccessRequest, Operation,
    Provisioner, RevokeAccessRequest, Status,
};

type SharedProvisioner = Arc<dyn Provisioner>;

fn reply<T: Serialize>(op: Operation, result: Result<Option<T>, Status>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(status) => {
            tracing::debug!(operation = %op, code = %status.code, message = %status.message, "Driver call rejected");
            let code = StatusCode::from_u16(status.code.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (code, Json(status)).into_response()
        }
    }
}

async fn get_info(
    State(provisioner): State<SharedProvisioner>,
    Json(req): Json<GetInfoRequest>,
) -> Response {
    reply(Operation::GetInfo, provisioner.get_info(req).await)
}

async fn create_database(
    State(provisioner): State<SharedProvisioner>,
    Json(req): Json<CreateDatabaseRequest>,
) -> Response {
    reply(
        Operation::CreateDatabase,
        provisioner.create_database(req).await,
    )
}

async fn delete_database(
    State(provisioner): State<SharedProvisioner>,
    Json(req): Json<DeleteDatabaseRequest>,
) -> Response {
    reply(
        Operation::DeleteDatabase,
        provisioner.delete_database(req).await,
    )
}

async fn grant_access(
    State(provisioner): State<SharedProvisioner>,
    Json(req): Json<GrantAccessRequest>,
) -> Response {
    reply(Operation::GrantAccess, provisioner.grant_access(req).await)
}

async fn revoke_access(
    State(provisioner): State<SharedProvisioner>,
    Json(req): Json<RevokeAccessRequest>,
) -> Response {
    reply(Operation::RevokeAccess, provisioner.revoke_access(req).await)
}

/// Create the driver router
pub fn router(provisioner: SharedProvisioner) -> Router {
    Router::new()
        .route(&Operation::GetInfo.path(), post(get_info))
        .route(&Operation::CreateDatabase.path(), post(create_database))
        .route(&Operation::DeleteDatabase.path(), post(delete_database))
        .route(&Operation::GrantAccess.path(), post(grant_access))
        .route(&Operation::RevokeAccess.path(), post(revoke_access))
        .with_state(provisioner)
}

/// Serve `provisioner` on `listener` until `shutdown` fires
pub async fn serve(
    listener: UnixListener,
    provisioner: SharedProvisioner,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(provisioner))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
