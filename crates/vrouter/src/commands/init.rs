//! `vrouter init`: allocate one block per host and persist the assignments.

use anyhow::{Context, Result, bail};
use clap::Args;
use vrouter_common::SubnetBlock;

use crate::context::AppContext;
use crate::registry::{self, WriteOutcome};
use crate::subnet;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Comma separated machine list, e.g. host1,host2,host3
    #[arg(value_name = "MACHINES")]
    pub hosts: String,

    /// Cell CIDR carved into per-host blocks
    #[arg(short = 'c', long = "cellnet")]
    pub cellnet: Option<String>,

    /// The whole overlay network CIDR
    #[arg(short = 'o', long = "overlay")]
    pub overlay: Option<String>,

    /// Give every host a fixed /N block instead of the smallest split
    #[arg(short = 'p', long = "cell-prefix")]
    pub cell_prefix: Option<u8>,

    /// Only compare the registry against a fresh allocation, write nothing
    #[arg(long, conflicts_with = "reset")]
    pub verify: bool,

    /// Delete the listed hosts' existing assignments before writing
    #[arg(long)]
    pub reset: bool,
}

/// Split the machine list, rejecting empty entries and duplicates
pub fn parse_hosts(machines: &str) -> Result<Vec<String>> {
    let hosts: Vec<String> = machines.split(',').map(|h| h.trim().to_string()).collect();

    if hosts.iter().all(String::is_empty) {
        bail!("Empty machine list specified");
    }
    if let Some(pos) = hosts.iter().position(String::is_empty) {
        bail!("Empty machine name at position {}", pos + 1);
    }
    for (i, host) in hosts.iter().enumerate() {
        registry::validate_segment("host", host)?;
        if hosts[..i].contains(host) {
            bail!("Machine {host} listed more than once");
        }
    }

    Ok(hosts)
}

pub async fn run(ctx: &AppContext, args: InitArgs) -> Result<()> {
    let hosts = parse_hosts(&args.hosts)?;

    let cellnet: SubnetBlock = args
        .cellnet
        .as_deref()
        .unwrap_or(&ctx.config.default_cellnet)
        .parse()
        .context("Invalid --cellnet")?;
    let overlay: SubnetBlock = args
        .overlay
        .as_deref()
        .unwrap_or(&ctx.config.default_overlay)
        .parse()
        .context("Invalid --overlay")?;

    let blocks = match args.cell_prefix {
        Some(prefix) => subnet::allocate_fixed(cellnet, hosts.len(), prefix),
        None => subnet::allocate(cellnet, hosts.len()),
    }
    .with_context(|| format!("Cannot allocate {} blocks from {cellnet}", hosts.len()))?;
    let assignments = subnet::assign(&hosts, &blocks);

    if args.verify {
        let stored = ctx.registry.host_assignments(&hosts).await?;
        let drift = subnet::verify(&assignments, &stored);
        for m in &drift {
            match m.stored {
                Some(stored) => println!("{}: expected {}, registry has {stored}", m.host, m.expected),
                None => println!("{}: expected {}, registry has nothing", m.host, m.expected),
            }
        }
        if !drift.is_empty() {
            bail!("{} of {} hosts differ from the computed allocation", drift.len(), hosts.len());
        }
        println!("all {} hosts match {cellnet}", hosts.len());
        return Ok(());
    }

    if args.reset {
        for host in &hosts {
            match ctx.registry.delete_host_assignment(host).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to reset {host}")),
            }
        }
    }

    tracing::info!(cellnet = %cellnet, overlay = %overlay, hosts = hosts.len(), "vrouter init");
    let report = registry::bootstrap(&ctx.registry, &assignments, overlay).await?;

    for (assignment, outcome) in &report.hosts {
        let note = match outcome {
            WriteOutcome::Written => "",
            WriteOutcome::AlreadyExists => " (already initialized)",
        };
        println!("{}\t{}{note}", assignment.host, assignment.block);
    }
    println!(
        "vrouter init {cellnet}: {} keys written, {} already present",
        report.written(),
        report.skipped()
    );

    Ok(())
}
