//! CRD installation helpers for integration tests

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::wait::{await_condition, conditions};
use kube::{Api, Client, CustomResourceExt};
use thiserror::Error;

use database_operator::crd::{
    Database, DatabaseAccess, DatabaseAccessClass, DatabaseClass, DatabaseRequest,
};

#[derive(Error, Debug)]
pub enum CrdError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("CRD establishment timeout: {0}")]
    EstablishmentTimeout(String),

    #[error("Wait error: {0}")]
    WaitError(#[from] kube::runtime::wait::Error),
}

/// Every CRD the operator serves, generated from the Rust types
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        DatabaseClass::crd(),
        DatabaseAccessClass::crd(),
        Database::crd(),
        DatabaseRequest::crd(),
        DatabaseAccess::crd(),
    ]
}

/// Install (or update) all CRDs and wait until they are established
pub async fn install_crds(client: Client) -> Result<(), CrdError> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let params = PatchParams::apply("integration-test").force();

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!("Installing CRD {}...", name);
        crds.patch(&name, &params, &Patch::Apply(&crd)).await?;

        let establish = await_condition(crds.clone(), &name, conditions::is_crd_established());
        tokio::time::timeout(Duration::from_secs(30), establish)
            .await
            .map_err(|_| CrdError::EstablishmentTimeout(name.clone()))??;
    }

    tracing::info!("CRDs installed and established");
    Ok(())
}
