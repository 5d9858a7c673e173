//! Driver client over a Unix domain socket
//!
//! Each call is a single HTTP/1.1 `POST /v1/<Operation>` with a JSON body on
//! a fresh connection. A 2xx response carries the response body (possibly
//! `null`); anything else carries a JSON [`Status`].
//!
//! Connection and transport failures are reported as `Unavailable`, so the
//! gateway treats a missing or restarting driver as transient.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper::client::conn::http1;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tracing::{debug, trace};

use super::{
    Code, CreateDatabaseRequest, CreateDatabaseResponse, DeleteDatabaseRequest,
    DeleteDatabaseResponse, GetInfoRequest, GetInfoResponse, GrantAccessRequest,
    GrantAccessResponse, Operation, Provisioner, RevokeAccessRequest, RevokeAccessResponse, Status,
};

const UNIX_SCHEME: &str = "unix://";

/// Errors constructing a driver client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("address must be a unix domain socket, found {0:?}")]
    UnsupportedScheme(String),

    #[error("address {0:?} has no socket path")]
    MissingPath(String),
}

/// Parse a `unix://` address into a socket path
pub fn socket_path(address: &str) -> Result<PathBuf, ClientError> {
    let path = address
        .strip_prefix(UNIX_SCHEME)
        .ok_or_else(|| ClientError::UnsupportedScheme(address.to_string()))?;
    if path.is_empty() {
        return Err(ClientError::MissingPath(address.to_string()));
    }
    Ok(PathBuf::from(path))
}

/// [`Provisioner`] speaking to a driver process on a local socket
#[derive(Clone, Debug)]
pub struct ProvisionerClient {
    socket: PathBuf,
}

impl ProvisionerClient {
    /// Build a client for a `unix://` address; other schemes are rejected
    pub fn new(address: &str) -> Result<Self, ClientError> {
        Ok(Self {
            socket: socket_path(address)?,
        })
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn call<Req, Resp>(&self, op: Operation, req: &Req) -> Result<Option<Resp>, Status>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(req)
            .map_err(|e| Status::new(Code::Internal, format!("encode request: {e}")))?;

        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            Status::new(
                Code::Unavailable,
                format!("connect {}: {e}", self.socket.display()),
            )
        })?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| Status::new(Code::Unavailable, format!("handshake: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Driver connection closed");
            }
        });

        let request = Request::builder()
            .method("POST")
            .uri(op.path())
            .header(HOST, "localhost")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| Status::new(Code::Internal, format!("build request: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| Status::new(Code::Unavailable, format!("send request: {e}")))?;
        let http_status = response.status();

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Status::new(Code::Unavailable, format!("read response: {e}")))?
            .to_bytes();

        trace!(
            operation = %op,
            status = http_status.as_u16(),
            body = %String::from_utf8_lossy(&body),
            "Driver response"
        );

        if http_status.is_success() {
            if body.is_empty() {
                return Ok(None);
            }
            return serde_json::from_slice::<Option<Resp>>(&body)
                .map_err(|e| Status::new(Code::Internal, format!("decode response: {e}")));
        }

        Err(serde_json::from_slice::<Status>(&body).unwrap_or_else(|_| {
            Status::new(
                Code::from_http_status(http_status.as_u16()),
                String::from_utf8_lossy(&body).into_owned(),
            )
        }))
    }
}

#[async_trait]
impl Provisioner for ProvisionerClient {
    async fn get_info(&self, req: GetInfoRequest) -> Result<Option<GetInfoResponse>, Status> {
        self.call(Operation::GetInfo, &req).await
    }

    async fn create_database(
        &self,
        req: CreateDatabaseRequest,
    ) -> Result<Option<CreateDatabaseResponse>, Status> {
        self.call(Operation::CreateDatabase, &req).await
    }

    async fn delete_database(
        &self,
        req: DeleteDatabaseRequest,
    ) -> Result<Option<DeleteDatabaseResponse>, Status> {
        self.call(Operation::DeleteDatabase, &req).await
    }

    async fn grant_access(
        &self,
        req: GrantAccessRequest,
    ) -> Result<Option<GrantAccessResponse>, Status> {
        self.call(Operation::GrantAccess, &req).await
    }

    async fn revoke_access(
        &self,
        req: RevokeAccessRequest,
    ) -> Result<Option<RevokeAccessResponse>, Status> {
        self.call(Operation::RevokeAccess, &req).await
    }
}
