//! Command-line configuration for the operator and the fake driver

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// Default driver socket address
pub const DEFAULT_DRIVER_ADDR: &str = "unix:///var/lib/database/database.sock";

/// Reconciles DatabaseRequest, Database and DatabaseAccess resources
#[derive(Parser, Debug, Clone)]
#[command(name = "database-operator")]
#[command(author, version, about, long_about = None)]
pub struct OperatorConfig {
    /// Driver socket address (only unix:// is supported).
    #[arg(long, env = "DRIVER_ADDR", default_value = DEFAULT_DRIVER_ADDR)]
    pub driver_addr: String,

    /// Acquire a coordination.k8s.io Lease before reconciling.
    #[arg(long)]
    pub leader_elect: bool,

    /// Verbose logging for this crate.
    #[arg(long)]
    pub debug: bool,

    /// Deadline for a single driver call, in seconds.
    #[arg(long, env = "DRIVER_TIMEOUT_SECS", default_value_t = 30)]
    pub driver_timeout_secs: u64,

    /// Address for /healthz, /readyz and /metrics.
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    pub health_addr: SocketAddr,

    /// Only watch this namespace (cluster-wide when unset).
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Do not run the DatabaseRequest controller.
    #[arg(long)]
    pub disable_request_controller: bool,

    /// Do not run the Database and DatabaseAccess controllers.
    #[arg(long)]
    pub disable_driver_controllers: bool,
}

impl OperatorConfig {
    pub fn driver_timeout(&self) -> Duration {
        Duration::from_secs(self.driver_timeout_secs)
    }

    /// `EnvFilter` directives for the configured verbosity
    pub fn log_directives(&self) -> [&'static str; 3] {
        let own = if self.debug {
            "database_operator=debug"
        } else {
            "database_operator=info"
        };
        [own, "kube=info", "kube_leader_election=info"]
    }
}

/// Serves an in-memory driver on a local socket
#[derive(Parser, Debug, Clone)]
#[command(name = "fake-driver")]
#[command(author, version, about, long_about = None)]
pub struct FakeDriverConfig {
    /// Socket address to listen on (only unix:// is supported).
    #[arg(long, env = "DRIVER_ADDR", default_value = DEFAULT_DRIVER_ADDR)]
    pub driver_addr: String,

    /// Name reported by GetInfo.
    #[arg(long, env = "DRIVER_NAME", default_value = "fake")]
    pub name: String,
}
