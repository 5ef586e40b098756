//! `vrouter show`: print what the registry holds for the overlay and one host.

use anyhow::Result;
use clap::Args;

use crate::context::AppContext;
use crate::store::CoordinationStore;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Host to describe (defaults to the system hostname)
    #[arg(short = 'n', long, env = "HOSTNAME")]
    pub hostname: Option<String>,
}

fn render<T: std::fmt::Display>(value: vrouter_common::Result<T>) -> Result<String> {
    match value {
        Ok(v) => Ok(v.to_string()),
        Err(e) if e.is_not_found() => Ok("<not initialized>".to_string()),
        Err(e) => Err(e.into()),
    }
}

pub async fn run(ctx: &AppContext, args: ShowArgs) -> Result<()> {
    println!("overlay\t{}", render(ctx.registry.get_overlay_config().await)?);

    let host = super::resolve_hostname(args.hostname)?;
    println!("host\t{host}");
    println!("bridge\t{}", render(ctx.registry.get_host_assignment(&host).await)?);
    println!("interface\t{}", render(ctx.registry.get_interface_ip(&host).await)?);

    let alive = ctx.store().get(&ctx.registry.liveness_key(&host)).await;
    println!("lease\t{}", render(alive.map(|e| format!("alive (revision {})", e.revision)))?);

    Ok(())
}
