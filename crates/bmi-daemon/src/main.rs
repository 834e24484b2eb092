//! Long-running BMI daemon: rebuilds export mappings at boot, then serves
//! orchestration commands to CLI clients.

use anyhow::{Context, Result};
use bmi_core::{
    logging, BmiConfig, CommandRouter, DnsmasqLeases, FileCatalog, Services,
};
use bmi_iet::SystemIetService;
use bmi_rbd::SystemRbdBackend;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, select, signal, task};

mod server;

/// Entry point for the Tokio runtime; logs failures before exit.
#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if let Err(err) = run().await {
        error!("daemon exit: {err:?}");
        std::process::exit(1);
    }
}

/// Load configuration, wire collaborators, and serve until interrupted.
async fn run() -> Result<()> {
    logging::init("info");
    let config_path = BmiConfig::resolve_path();
    let config = BmiConfig::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    info!("BMI daemon booting (config: {})", config.path.display());

    let router = Arc::new(build_router(&config)?);

    // Device ids do not survive a reboot; refresh the ledger before serving.
    let boot_router = router.clone();
    let remade = task::spawn_blocking(move || boot_router.services().exports.remake_mappings())
        .await
        .context("join remake_mappings worker")?;
    if let Err(err) = remade {
        error!("failed to remake export mappings at boot: {err}");
    }

    let addr: SocketAddr = config
        .daemon
        .listen
        .parse()
        .with_context(|| format!("parse daemon.listen `{}`", config.daemon.listen))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    let handler: server::Handler = Arc::new(move |request| router.handle(&request));
    select! {
        res = server::serve(listener, handler) => res?,
        _ = signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}

fn build_router(config: &BmiConfig) -> Result<CommandRouter> {
    let catalog = FileCatalog::open(&config.catalog.path)
        .with_context(|| format!("open catalog {}", config.catalog.path))?;
    let storage = SystemRbdBackend::from_config(config).context("initialise rbd backend")?;
    let service = SystemIetService::from_config(config).context("initialise export service")?;
    let leases = DnsmasqLeases::new(&config.dhcp.leases_path);

    let services = Services::new(
        config,
        Arc::new(catalog),
        Arc::new(storage),
        Arc::new(service),
        bmi_hil::session_factory(config),
        Arc::new(leases),
    );
    Ok(CommandRouter::standard(Arc::new(services)))
}
