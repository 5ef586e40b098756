//! Shared constants for vrouter components.

/// Default coordination store URL
pub const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379";

/// Default root of every key written by vrouter
pub const DEFAULT_REGISTRY_PREFIX: &str = "/vrouter";

/// Default parent block carved into per-host cells
pub const DEFAULT_SUBNET: &str = "10.0.0.0/16";

/// Default daemon status listen address
pub const DEFAULT_STATUS_ADDR: &str = "127.0.0.1:8899";

/// Liveness key TTL (seconds)
pub const LIVENESS_TTL_SECS: u64 = 5;

/// Value stored under a liveness key
pub const LIVENESS_VALUE: &str = "alive";

/// Per-request store timeout (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2_000;

/// Delay between renewal attempts after a connection error (milliseconds)
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

/// Smallest renewal interval the lease manager will schedule (seconds)
pub const MIN_RENEWAL_INTERVAL_SECS: u64 = 1;

/// Longest prefix handed to a host; keeps network, broadcast, gateway and one host
pub const MAX_BLOCK_PREFIX: u8 = 30;

/// Registry key layout, relative to the registry prefix.
///
/// Every helper takes the prefix so several registries can share one store.
pub mod registry_keys {
    /// Liveness keys: {prefix}/host/{hostname}
    pub const HOST_DIR: &str = "host";

    /// Per-host state: {prefix}/hosts/{hostname}/bridge
    pub const HOSTS_DIR: &str = "hosts";

    /// Router state: {prefix}/router/...
    pub const ROUTER_DIR: &str = "router";

    /// Service descriptors: {prefix}/services/{name}
    pub const SERVICES_DIR: &str = "services";

    /// Store-wide revision counter used by backends without native revisions
    pub const REVISION_COUNTER: &str = "__revision";

    fn join(prefix: &str, rest: &str) -> String {
        format!("{}/{}", prefix.trim_end_matches('/'), rest)
    }

    pub fn liveness(prefix: &str, hostname: &str) -> String {
        join(prefix, &format!("{HOST_DIR}/{hostname}"))
    }

    pub fn bridge_info(prefix: &str, hostname: &str) -> String {
        join(prefix, &format!("{HOSTS_DIR}/{hostname}/bridge"))
    }

    pub fn router_overlay(prefix: &str) -> String {
        join(prefix, &format!("{ROUTER_DIR}/overlay"))
    }

    pub fn router_interface(prefix: &str, hostname: &str) -> String {
        join(prefix, &format!("{ROUTER_DIR}/interfaces/{hostname}"))
    }

    pub fn services_dir(prefix: &str) -> String {
        join(prefix, SERVICES_DIR)
    }

    pub fn service(prefix: &str, name: &str) -> String {
        join(prefix, &format!("{SERVICES_DIR}/{name}"))
    }

    pub fn revision_counter(prefix: &str) -> String {
        join(prefix, REVISION_COUNTER)
    }
}
