use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use database_operator::health::{HealthState, run_health_server};
use database_operator::{
    Context, DriverGateway, KubeStore, OperatorConfig, ProvisionerClient,
    run_access_controller_scoped, run_database_controller_scoped, run_request_controller_scoped,
};

/// Lease configuration
const LEASE_NAME: &str = "database-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Upper bound on waiting for controllers to drain after cancellation
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    let config = OperatorConfig::parse();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in config.log_directives() {
        filter = filter.add_directive(directive.parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting database-operator");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health_state = Arc::new(HealthState::new());
    let shutdown = CancellationToken::new();

    // Start health server immediately (probes should work even as non-leader)
    let health_handle = {
        let health_state = health_state.clone();
        let addr = config.health_addr;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, addr).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let provisioner = ProvisionerClient::new(&config.driver_addr)?;
    info!(socket = %provisioner.socket().display(), "Using driver socket");
    let driver = DriverGateway::new(Arc::new(provisioner))
        .with_timeout(config.driver_timeout())
        .with_cancellation(shutdown.clone())
        .with_health_state(health_state.clone());

    let driver_name = if config.disable_driver_controllers {
        String::new()
    } else {
        let name = driver.get_info().await?;
        info!(driver = %name, "Driver identified");
        name
    };

    let lease_handle = if config.leader_elect {
        Some(acquire_leadership(client.clone(), shutdown.clone()).await)
    } else {
        None
    };

    let ctx = Arc::new(
        Context::new(KubeStore::new(client), driver, driver_name)
            .with_health_state(Some(health_state.clone())),
    );
    let namespace = config.namespace.clone();

    let mut controllers: Vec<JoinHandle<()>> = Vec::new();
    if !config.disable_request_controller {
        let (ctx, ns) = (ctx.clone(), namespace.clone());
        controllers.push(tokio::spawn(async move {
            run_request_controller_scoped(ctx, ns.as_deref()).await;
        }));
    }
    if !config.disable_driver_controllers {
        let (db_ctx, db_ns) = (ctx.clone(), namespace.clone());
        controllers.push(tokio::spawn(async move {
            run_database_controller_scoped(db_ctx, db_ns.as_deref()).await;
        }));
        let (access_ctx, access_ns) = (ctx.clone(), namespace.clone());
        controllers.push(tokio::spawn(async move {
            run_access_controller_scoped(access_ctx, access_ns.as_deref()).await;
        }));
    }
    if controllers.is_empty() {
        warn!("All controllers are disabled");
    }

    health_state.set_ready(true).await;

    let all_controllers = futures::future::join_all(controllers);
    tokio::pin!(all_controllers);
    let mut controllers_done = false;

    tokio::select! {
        results = &mut all_controllers => {
            controllers_done = true;
            for result in results {
                if let Err(e) = result {
                    error!("Controller task panicked: {}", e);
                }
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        _ = shutdown.cancelled() => {
            info!("Lost leadership, shutting down");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
        }
    }

    // Stop receiving new work and abort in-flight driver calls
    health_state.set_ready(false).await;
    shutdown.cancel();
    if let Some(handle) = lease_handle {
        handle.abort();
    }

    if !controllers_done
        && tokio::time::timeout(
            Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS),
            &mut all_controllers,
        )
        .await
        .is_err()
    {
        warn!(
            "Controllers did not stop within {}s",
            SHUTDOWN_GRACE_PERIOD_SECS
        );
    }

    info!("Operator stopped");
    Ok(())
}

fn lease_lock(client: Client, namespace: &str, holder_id: &str) -> LeaseLock {
    LeaseLock::new(
        client,
        namespace,
        LeaseLockParams {
            holder_id: holder_id.to_string(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
        },
    )
}

/// Block until this instance holds the lease, then keep renewing it in the
/// background. Losing the lease cancels `shutdown`.
async fn acquire_leadership(client: Client, shutdown: CancellationToken) -> JoinHandle<()> {
    // Get pod identity for leader election
    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    });

    info!(
        holder_id = %pod_name,
        namespace = %namespace,
        lease_name = LEASE_NAME,
        "Initializing leader election"
    );

    let lock = lease_lock(client, &namespace, &pod_name);

    info!("Waiting to acquire leadership...");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                break;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;

            match lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => {
                    error!("Lost leadership! Shutting down...");
                    shutdown.cancel();
                    return;
                }
                Err(e) => {
                    error!("Failed to renew lease: {}. Shutting down...", e);
                    shutdown.cancel();
                    return;
                }
            }
        }
    })
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
