//! Mesh node binary.
//!
//! Runs one forwarding node: a pool of outstanding listen requests against
//! the packet driver, the forwarding engine deciding local delivery,
//! unicast relay, or flood for each packet, and a receive task draining
//! transmissions arriving over the radio link. The kernel driver and the
//! radio machinery are external collaborators; this binary wires the
//! in-process simulation endpoints against the same seams a deployment
//! binds platform implementations to.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use mesh_driver::sim::SimDriver;
use mesh_driver::{DeviceHandle, DriverError, ListOp};
use mesh_forward::{EngineConfig, ForwardError, ForwardingEngine, LocalStack};
use mesh_lowpan::Eui64;
use mesh_routing::RoutingTable;
use mesh_transport::{MemTransport, Neighbor, NeighborSet, RadioTransport, ReceivedTransmission};
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::MeshConfig;
use logging::MeshLogFormatter;

/// IPv6 mesh node over a low-MTU radio link
#[derive(Parser, Debug)]
#[command(name = "ble-mesh", version, about = "IPv6 mesh node over a low-MTU radio link")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "ble-mesh.yaml")]
    config: std::path::PathBuf,

    /// Override the node's link-local address
    #[arg(long)]
    local_address: Option<Ipv6Addr>,

    /// Override the bound on one listen wait, e.g. 10s
    #[arg(long)]
    listen_timeout: Option<humantime::Duration>,

    /// Override the bound on one transmission attempt, e.g. 5s
    #[arg(long)]
    attempt_timeout: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Host-stack injection over the driver's synchronous control call. Each
/// injection opens its own short-lived synchronous handle, which the
/// control call closes on return.
struct DriverStack {
    driver: Arc<SimDriver>,
    device_path: String,
}

#[async_trait]
impl LocalStack for DriverStack {
    async fn inject_inbound(&self, packet: &[u8]) -> bool {
        match DeviceHandle::open(self.driver.as_ref(), &self.device_path, false) {
            Ok(handle) => handle.inject_inbound(packet),
            Err(err) => {
                warn!(%err, "could not open driver for inbound injection");
                false
            }
        }
    }
}

type NodeEngine = ForwardingEngine<MemTransport, DriverStack>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(MeshLogFormatter::new("ble-mesh".to_string()))
        .init();

    let mut config = MeshConfig::load_from_file(&args.config)?;
    if let Some(address) = args.local_address {
        config.local_address = address;
    }
    if let Some(timeout) = args.listen_timeout {
        config.listen_timeout_secs = timeout.as_secs();
    }
    if let Some(timeout) = args.attempt_timeout {
        config.attempt_timeout_secs = timeout.as_secs();
    }

    component_info!(
        "node",
        "starting mesh node at {} (device {})",
        config.local_address,
        config.device_path
    );

    let driver = Arc::new(SimDriver::new(&config.device_path));

    // The driver must be reachable or the service cannot start at all.
    DeviceHandle::open(driver.as_ref(), &config.device_path, false)
        .context("packet driver unavailable")?;

    // Tell the driver which peers belong to the mesh.
    for neighbor in &config.neighbors {
        let handle = DeviceHandle::open(driver.as_ref(), &config.device_path, false)
            .context("packet driver unavailable")?;
        if !handle.mutate_list(ListOp::MeshAdd, &neighbor.address) {
            warn!(address = %neighbor.address, "driver rejected mesh list entry");
        }
    }

    let table = Arc::new(RoutingTable::from_routes(
        config.local_address,
        config.routes.clone(),
    ));

    let link = MemTransport::new();
    let inbound = link.register(config.local_address);
    let endpoint = link.endpoint(config.local_address);

    let neighbors = Arc::new(NeighborSet::new());
    for neighbor in &config.neighbors {
        neighbors
            .insert(Neighbor::new(neighbor.address, neighbor.device_id.clone()))
            .await;
    }
    for neighbor in endpoint.discover().await {
        neighbors.insert(neighbor).await;
    }
    component_info!("node", "{} neighbors reachable", neighbors.len().await);

    let local_iid = match Eui64::from_link_local(&config.local_address) {
        Some(iid) => iid,
        None => {
            warn!(
                "local address {} is not link-local; address elision disabled",
                config.local_address
            );
            Eui64([0u8; 8])
        }
    };

    let engine: Arc<NodeEngine> = Arc::new(ForwardingEngine::new(
        table,
        neighbors,
        endpoint,
        DriverStack {
            driver: Arc::clone(&driver),
            device_path: config.device_path.clone(),
        },
        local_iid,
        EngineConfig {
            attempt_timeout: config.attempt_timeout(),
            settle_interval: config.settle_interval(),
            flood_policy: config.flood_policy,
        },
    ));

    let handle = Arc::new(
        DeviceHandle::open(driver.as_ref(), &config.device_path, true)
            .context("packet driver unavailable")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    // The initial batch of listen requests, spaced out so the driver can
    // pend each one before the next arrives.
    for slot in 0..config.outstanding_listens {
        tasks.spawn(listen_slot(
            slot,
            Arc::clone(&handle),
            Arc::clone(&engine),
            config.listen_timeout(),
        ));
        tokio::time::sleep(config.listen_spacing()).await;
    }

    tasks.spawn(radio_receive(
        inbound,
        Arc::clone(&engine),
        shutdown_rx.clone(),
    ));

    component_info!(
        "node",
        "forwarding loop running with {} outstanding listens",
        config.outstanding_listens
    );

    tokio::signal::ctrl_c().await?;
    component_info!("node", "shutdown requested");

    // Cancel outstanding I/O; every pending listen still resolves exactly
    // once, so the loop tasks observe the cancellation and exit.
    let _ = shutdown_tx.send(true);
    handle.close();

    let drain = async {
        while tasks.join_next().await.is_some() {}
    };
    if tokio::time::timeout(config.shutdown_grace(), drain)
        .await
        .is_err()
    {
        warn!("grace period elapsed before the loop drained; aborting");
        tasks.abort_all();
    }

    component_info!("node", "mesh node stopped");
    Ok(())
}

/// One slot of the listen pool: wait on the outstanding request, hand a
/// completed packet to the engine, then issue the replacement listen. A
/// timed-out wait retries the same request; per-packet errors never end
/// the loop.
async fn listen_slot(
    slot: usize,
    handle: Arc<DeviceHandle>,
    engine: Arc<NodeEngine>,
    listen_timeout: Duration,
) {
    loop {
        let request = match handle.begin_listen() {
            Ok(request) => request,
            Err(DriverError::Closed) => {
                debug!(slot, "driver handle closed; listen slot exiting");
                return;
            }
            Err(err) => {
                warn!(slot, %err, "could not issue listen request");
                return;
            }
        };

        loop {
            match request.wait(listen_timeout).await {
                Ok(packet) => {
                    dispatch(&engine, &packet).await;
                    break;
                }
                Err(DriverError::Timeout) => {
                    debug!(slot, "no packet within the listen bound; waiting again");
                }
                Err(DriverError::Cancelled) => {
                    debug!(slot, "listen cancelled; slot exiting");
                    return;
                }
                Err(err) => {
                    warn!(slot, %err, "listen failed; issuing a replacement");
                    break;
                }
            }
        }
    }
}

/// Drain transmissions arriving over the radio link into the engine.
async fn radio_receive(
    mut inbound: mpsc::UnboundedReceiver<ReceivedTransmission>,
    engine: Arc<NodeEngine>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("radio receive task exiting");
                return;
            }
            transmission = inbound.recv() => {
                let Some(transmission) = transmission else { return };
                match engine.handle_received(&transmission).await {
                    Ok(disposition) => debug!(?disposition, "radio packet handled"),
                    Err(err) => log_drop(&err),
                }
            }
        }
    }
}

/// Hand one driver packet to the engine; errors drop the packet and the
/// loop continues.
async fn dispatch(engine: &NodeEngine, packet: &[u8]) {
    match engine.handle_packet(packet).await {
        Ok(disposition) => debug!(?disposition, "driver packet handled"),
        Err(err) => log_drop(&err),
    }
}

/// Per-packet failures are logged with their kind and otherwise swallowed;
/// only startup can abort the service.
fn log_drop(err: &ForwardError) {
    match err {
        ForwardError::Codec(err) => warn!(%err, "dropping malformed packet"),
        ForwardError::Routing(err) => warn!(%err, "dropping unroutable packet"),
        ForwardError::Transmission { neighbor, source } => {
            warn!(%neighbor, %source, "transmission failed; packet dropped")
        }
    }
}
