//! Command handlers. Each takes the shared [`AppContext`](crate::context::AppContext)
//! and its own parsed arguments.

use anyhow::{Context, Result, anyhow};

use crate::registry;

pub mod daemon;
pub mod init;
pub mod service;
pub mod show;

/// The explicit `--hostname`, or the machine's own name when none was given
pub fn resolve_hostname(explicit: Option<String>) -> Result<String> {
    let hostname = match explicit {
        Some(name) => name,
        None => gethostname::gethostname()
            .into_string()
            .map_err(|raw| anyhow!("System hostname {raw:?} is not valid UTF-8"))?,
    };
    registry::validate_segment("host", &hostname).context("Unusable hostname, pass --hostname")?;
    Ok(hostname)
}
