//! Driver double that records every call and plays back scripted failures,
//! delegating everything else to [`FakeProvisioner`].

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use database_operator::driver::{
    CreateDatabaseRequest, CreateDatabaseResponse, DeleteDatabaseRequest, DeleteDatabaseResponse,
    FakeProvisioner, GetInfoRequest, GetInfoResponse, GrantAccessRequest, GrantAccessResponse,
    Operation, Provisioner, RevokeAccessRequest, RevokeAccessResponse, Status,
};

/// What the next call of an operation answers instead of the fake backend
#[derive(Clone, Debug)]
pub enum Script {
    Fail(Status),
    Grant(GrantAccessResponse),
}

pub struct ScriptedProvisioner {
    backend: FakeProvisioner,
    calls: Mutex<Vec<Operation>>,
    scripts: Mutex<HashMap<Operation, VecDeque<Script>>>,
    hang: AtomicBool,
}

impl ScriptedProvisioner {
    pub fn new(name: &str) -> Self {
        Self {
            backend: FakeProvisioner::new(name),
            calls: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            hang: AtomicBool::new(false),
        }
    }

    /// Queue a scripted answer for the next call of `op`
    pub fn script(&self, op: Operation, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(script);
    }

    pub fn fail_next(&self, op: Operation, status: Status) {
        self.script(op, Script::Fail(status));
    }

    /// Every later call never answers
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    /// Operations in call order
    pub fn history(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn backend(&self) -> &FakeProvisioner {
        &self.backend
    }

    async fn enter(&self, op: Operation) -> Option<Script> {
        self.calls.lock().unwrap().push(op);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl Provisioner for ScriptedProvisioner {
    async fn get_info(&self, req: GetInfoRequest) -> Result<Option<GetInfoResponse>, Status> {
        match self.enter(Operation::GetInfo).await {
            Some(Script::Fail(status)) => Err(status),
            _ => self.backend.get_info(req).await,
        }
    }

    async fn create_database(
        &self,
        req: CreateDatabaseRequest,
    ) -> Result<Option<CreateDatabaseResponse>, Status> {
        match self.enter(Operation::CreateDatabase).await {
            Some(Script::Fail(status)) => Err(status),
            _ => self.backend.create_database(req).await,
        }
    }

    async fn delete_database(
        &self,
        req: DeleteDatabaseRequest,
    ) -> Result<Option<DeleteDatabaseResponse>, Status> {
        match self.enter(Operation::DeleteDatabase).await {
            Some(Script::Fail(status)) => Err(status),
            _ => self.backend.delete_database(req).await,
        }
    }

    async fn grant_access(
        &self,
        req: GrantAccessRequest,
    ) -> Result<Option<GrantAccessResponse>, Status> {
        match self.enter(Operation::GrantAccess).await {
            Some(Script::Fail(status)) => Err(status),
            Some(Script::Grant(response)) => Ok(Some(response)),
            None => self.backend.grant_access(req).await,
        }
    }

    async fn revoke_access(
        &self,
        req: RevokeAccessRequest,
    ) -> Result<Option<RevokeAccessResponse>, Status> {
        match self.enter(Operation::RevokeAccess).await {
            Some(Script::Fail(status)) => Err(status),
            _ => self.backend.revoke_access(req).await,
        }
    }
}
