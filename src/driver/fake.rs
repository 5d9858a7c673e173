//! In-memory driver
//!
//! Keeps databases keyed by name and grants keyed by (database id, account
//! name), so repeated calls behave like a real idempotent backend:
//! duplicate creates and grants answer `AlreadyExists` with the original
//! body in `details`, deleting an unknown id answers `NotFound`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::info;

use super::{
    CREDENTIAL_KEY, Code, CreateDatabaseRequest, CreateDatabaseResponse, CredentialDetails,
    DeleteDatabaseRequest, DeleteDatabaseResponse, GetInfoRequest, GetInfoResponse,
    GrantAccessRequest, GrantAccessResponse, Provisioner, RevokeAccessRequest,
    RevokeAccessResponse, Status,
};

const ID_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .filter_map(|_| alphabet.get(rng.random_range(0..alphabet.len())))
        .map(|&b| char::from(b))
        .collect()
}

/// Database ids start with a letter so they are valid identifiers everywhere
pub fn make_database_id() -> String {
    format!(
        "{}{}",
        random_string(LETTERS, 1),
        random_string(ID_ALPHABET, 9)
    )
}

fn already_exists<T: serde::Serialize>(message: &str, body: &T) -> Status {
    let status = Status::new(Code::AlreadyExists, message);
    match serde_json::to_value(body) {
        Ok(details) => status.with_details(details),
        Err(_) => status,
    }
}

#[derive(Default)]
struct State {
    /// database name -> database id
    databases: BTreeMap<String, String>,
    /// (database id, account name) -> grant
    grants: BTreeMap<(String, String), GrantAccessResponse>,
}

pub struct FakeProvisioner {
    name: String,
    state: Mutex<State>,
}

impl FakeProvisioner {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub async fn database_count(&self) -> usize {
        self.state.lock().await.databases.len()
    }

    pub async fn grant_count(&self) -> usize {
        self.state.lock().await.grants.len()
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn get_info(&self, _req: GetInfoRequest) -> Result<Option<GetInfoResponse>, Status> {
        if self.name.is_empty() {
            return Err(Status::new(
                Code::InvalidArgument,
                "provisioner name is empty",
            ));
        }
        Ok(Some(GetInfoResponse {
            name: self.name.clone(),
        }))
    }

    async fn create_database(
        &self,
        req: CreateDatabaseRequest,
    ) -> Result<Option<CreateDatabaseResponse>, Status> {
        info!(name = %req.name, "Create database");
        if req.name.is_empty() {
            return Err(Status::new(Code::InvalidArgument, "database name is empty"));
        }

        let mut state = self.state.lock().await;
        if let Some(id) = state.databases.get(&req.name) {
            let body = CreateDatabaseResponse {
                database_id: id.clone(),
            };
            return Err(already_exists("database already exists", &body));
        }

        let database_id = make_database_id();
        state.databases.insert(req.name, database_id.clone());
        Ok(Some(CreateDatabaseResponse { database_id }))
    }

    async fn delete_database(
        &self,
        req: DeleteDatabaseRequest,
    ) -> Result<Option<DeleteDatabaseResponse>, Status> {
        info!(database_id = %req.database_id, "Delete database");
        let mut state = self.state.lock().await;
        let name = state
            .databases
            .iter()
            .find(|(_, id)| **id == req.database_id)
            .map(|(name, _)| name.clone());

        match name {
            Some(name) => {
                state.databases.remove(&name);
                state.grants.retain(|(db, _), _| *db != req.database_id);
                Ok(Some(DeleteDatabaseResponse {}))
            }
            None => Err(Status::new(Code::NotFound, "database not found")),
        }
    }

    async fn grant_access(
        &self,
        req: GrantAccessRequest,
    ) -> Result<Option<GrantAccessResponse>, Status> {
        info!(database_id = %req.database_id, account = %req.name, "Grant access");
        if req.database_id.is_empty() || req.name.is_empty() {
            return Err(Status::new(
                Code::InvalidArgument,
                "database id and account name are required",
            ));
        }

        let key = (req.database_id.clone(), req.name.clone());
        let mut state = self.state.lock().await;
        if let Some(existing) = state.grants.get(&key) {
            return Err(already_exists("access already granted", existing));
        }

        let grant = GrantAccessResponse {
            account_id: format!("acct-{}", random_string(ID_ALPHABET, 10)),
            credentials: BTreeMap::from([(
                CREDENTIAL_KEY.to_string(),
                CredentialDetails {
                    secrets: BTreeMap::from([
                        ("username".to_string(), req.name.clone()),
                        ("password".to_string(), random_string(ID_ALPHABET, 24)),
                    ]),
                },
            )]),
        };
        state.grants.insert(key, grant.clone());
        Ok(Some(grant))
    }

    async fn revoke_access(
        &self,
        req: RevokeAccessRequest,
    ) -> Result<Option<RevokeAccessResponse>, Status> {
        info!(database_id = %req.database_id, account_id = %req.account_id, "Revoke access");
        let mut state = self.state.lock().await;
        state.grants.retain(|(db, _), grant| {
            !(*db == req.database_id && grant.account_id == req.account_id)
        });
        Ok(Some(RevokeAccessResponse {}))
    }
}
