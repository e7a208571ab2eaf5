//! berthd — the Berth daemon.
//!
//! Single binary that assembles the deployment subsystems:
//! - State store (redb)
//! - Docker container runtime
//! - Self-signed certificate issuer
//! - nginx proxy manager
//! - Orchestrator + allocator
//! - Background reconciler
//!
//! # Usage
//!
//! ```text
//! berthd run --config /etc/berth/berth.toml
//! ```
//!
//! External collaborators (the HTTP API, auth, bundle uploads) talk to
//! the orchestrator; this binary only hosts the core and its
//! reconciliation loop.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use berth_certs::{CertSettings, SelfSignedIssuer};
use berth_orchestrator::{
    Allocator, DeploymentLocks, Orchestrator, OrchestratorSettings, Reconciler,
};
use berth_proxy::NginxManager;
use berth_runtime::DockerRuntime;
use berth_state::StateStore;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::BerthConfig;

#[derive(Parser)]
#[command(name = "berthd", about = "Berth deployment daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "/etc/berth/berth.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,berthd=debug,berth=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
    }
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    info!("Berth daemon starting");

    let config = if config_path.exists() {
        BerthConfig::load(&config_path)?
    } else {
        info!(path = ?config_path, "no configuration file, using defaults");
        let defaults = BerthConfig::default();
        defaults.validate()?;
        defaults
    };

    std::fs::create_dir_all(&config.data_directory)?;
    std::fs::create_dir_all(&config.application_directory)?;
    std::fs::create_dir_all(&config.cert_destination)?;
    let db_path = PathBuf::from(&config.data_directory).join("berth.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let operation_timeout = Duration::from_secs(config.operation_timeout_secs);

    // State store.
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Container runtime.
    let runtime = Arc::new(DockerRuntime::new(&config.docker_socket, operation_timeout));
    info!(socket = %config.docker_socket, "container runtime initialized");

    // Certificate issuer.
    let issuer = SelfSignedIssuer::new(CertSettings {
        validity_days: config.cert_validity_days,
        organization: config.cert_organization.clone(),
        organizational_unit: config.cert_organizational_unit.clone(),
        locality: config.cert_locality.clone(),
        province: config.cert_province.clone(),
        country: config.cert_country.clone(),
    });

    // Proxy manager.
    let proxy = NginxManager::new(
        state.clone(),
        &config.nginx_sites_destination,
        &config.cert_destination,
        config.nginx_reload_command.clone(),
        operation_timeout,
    );
    info!(sites = %config.nginx_sites_destination, "proxy manager initialized");

    // Orchestrator.
    let allocator = Allocator::new(state.clone(), &config.url_base)
        .with_port_range(config.port_range_min..config.port_range_max);
    let locks = DeploymentLocks::new();
    let sidecar_delete_policy = config
        .sidecar_policy()
        .ok_or_else(|| anyhow::anyhow!("invalid sidecar_delete_policy"))?;
    let _orchestrator = Orchestrator::new(
        state.clone(),
        runtime.clone(),
        proxy,
        issuer,
        allocator,
        locks.clone(),
        OrchestratorSettings {
            app_image: config.app_image.clone(),
            mongo_image: config.mongo_image.clone(),
            auto_manage_mongodb: config.auto_manage_mongodb,
            mongodb_url: config.mongodb_url.clone(),
            mongodb_oplog_url: config.mongodb_oplog_url.clone(),
            stop_timeout_secs: 10,
            sidecar_delete_policy,
        },
    );
    info!("orchestrator initialized");

    // ── Start background tasks ─────────────────────────────────

    let reconciler = Reconciler::new(
        state,
        runtime,
        locks,
        Duration::from_secs(config.reconcile_interval_secs),
    )
    .spawn();
    info!(
        interval = config.reconcile_interval_secs,
        "reconciler started"
    );

    // ── Wait for shutdown ──────────────────────────────────────

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    reconciler.shutdown().await;
    info!("Berth daemon stopped");
    Ok(())
}
