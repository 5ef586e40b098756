//! `vrouter daemon`: hold the host's liveness lease, bind its subnet and
//! serve status until shutdown or lease loss.

use anyhow::{Context, Result, anyhow};
use clap::Args;
use ipnet::Ipv4Net;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use vrouter_common::SubnetBlock;
use vrouter_common::constants::LIVENESS_VALUE;

use crate::context::AppContext;
use crate::lease::LeaseManager;
use crate::registry::{self, OverlayRegistry};
use crate::routes::{self, StatusState};
use crate::store::CoordinationStore;

#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Hostname to use in daemon mode (defaults to the system hostname)
    #[arg(short = 'n', long, env = "HOSTNAME")]
    pub hostname: Option<String>,

    /// Advertise this ip/mask as the host's router interface
    #[arg(short = 'i', long, value_parser = parse_hostip)]
    pub hostip: Option<Ipv4Net>,

    /// Status listen address (overrides config)
    #[arg(long, env = "VROUTER_STATUS_ADDR")]
    pub status_addr: Option<String>,
}

fn parse_hostip(s: &str) -> Result<Ipv4Net, String> {
    registry::parse_interface(s).ok_or_else(|| format!("invalid ip/mask '{s}'"))
}

/// Read the host's assigned block and advertise its interface address
pub async fn bind_host_net<S: CoordinationStore>(
    registry: &OverlayRegistry<S>,
    hostname: &str,
    hostip: Option<Ipv4Net>,
) -> Result<SubnetBlock> {
    let block = registry
        .get_host_assignment(hostname)
        .await
        .with_context(|| format!("Failed to bind ipnet for {hostname}, not initialized?"))?;

    match hostip {
        Some(ip) => registry
            .put_interface_ip(hostname, ip)
            .await
            .with_context(|| format!("Failed to advertise interface {ip}"))?,
        None => warn!(host = %hostname, "No --hostip given, interface address not advertised"),
    }

    Ok(block)
}

pub async fn run(ctx: &AppContext, args: DaemonArgs) -> Result<()> {
    let hostname = super::resolve_hostname(args.hostname)?;
    let key = ctx.registry.liveness_key(&hostname);

    // Start keepalive first
    let mut lease = LeaseManager::new(ctx.store().clone(), key, LIVENESS_VALUE, ctx.config.lease.ttl())?
        .with_retry_backoff(ctx.config.lease.retry_backoff());
    lease
        .claim()
        .await
        .with_context(|| format!("Error to keepalive as {hostname}, other instance running?"))?;
    info!(
        key = %lease.key(),
        state = %lease.state(),
        revision = ?lease.revision(),
        interval = ?lease.renewal_interval(),
        "Keepalive started"
    );
    let lease_status = lease.subscribe();

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut lease_task = tokio::spawn(lease.run(shutdown_tx.subscribe()));

    let block = match bind_host_net(&ctx.registry, &hostname, args.hostip).await {
        Ok(block) => block,
        Err(e) => {
            let _ = shutdown_tx.send(());
            let _ = lease_task.await;
            return Err(e);
        }
    };
    info!(host = %hostname, block = %block, "Requested bridge ip");

    let status_addr = args.status_addr.unwrap_or_else(|| ctx.config.status_addr.clone());
    let listener = match tokio::net::TcpListener::bind(&status_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = shutdown_tx.send(());
            let _ = lease_task.await;
            return Err(e).with_context(|| format!("Failed to bind status listener on {status_addr}"));
        }
    };
    info!("🚀 Status endpoint listening on {}", status_addr);

    let app = routes::create_router(
        StatusState {
            registry: ctx.registry.clone(),
            hostname: hostname.clone(),
            block,
            interface: args.hostip,
            lease: lease_status,
        },
        ctx.config.request_timeout(),
    );
    let mut server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
    });

    let outcome = tokio::select! {
        res = &mut lease_task => {
            // The lease only ends on its own when ownership is lost
            let _ = shutdown_tx.send(());
            match res {
                Ok(Ok(state)) => Err(anyhow!("Lease renewal stopped unexpectedly in state {state}")),
                Ok(Err(e)) => Err(anyhow::Error::new(e).context("Unexpected lost our node lock")),
                Err(join) => Err(anyhow::Error::new(join).context("Lease task failed")),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("🛑 Shutdown signal received");
            let _ = shutdown_tx.send(());
            match lease_task.await {
                Ok(Ok(state)) => {
                    info!(state = %state, "Lease stopped");
                    Ok(())
                }
                // Losing the lease is fatal even while shutting down
                Ok(Err(e)) => Err(anyhow::Error::new(e).context("Lease lost during shutdown")),
                Err(join) => Err(anyhow::Error::new(join).context("Lease task failed")),
            }
        }
    };

    match server.await {
        Ok(Err(e)) => warn!(error = %e, "Status server error"),
        Err(e) => warn!(error = %e, "Status server task failed"),
        Ok(Ok(())) => {}
    }

    outcome
}
