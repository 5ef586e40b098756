//! Overlay registry: the key schema on top of the coordination store.
//!
//! Assignments, the overlay block and interface bindings are create-once.
//! Changing any of them means deleting the key first, never overwriting it.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use vrouter_common::constants::registry_keys;
use vrouter_common::{HostAssignment, Result, ServiceDescriptor, SubnetBlock, VrouterError};

use crate::store::CoordinationStore;

/// Typed accessors for everything vrouter keeps under the registry prefix
#[derive(Clone)]
pub struct OverlayRegistry<S: CoordinationStore> {
    store: S,
    prefix: String,
}

impl<S: CoordinationStore> OverlayRegistry<S> {
    pub fn new(store: S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Key of a host's liveness lease
    pub fn liveness_key(&self, hostname: &str) -> String {
        registry_keys::liveness(&self.prefix, hostname)
    }

    // === Host assignments ===

    pub async fn put_host_assignment(&self, host: &str, block: SubnetBlock) -> Result<u64> {
        validate_segment("host", host)?;
        let key = registry_keys::bridge_info(&self.prefix, host);
        let revision = self.store.create(&key, &block.to_string(), None).await?;
        tracing::info!(host = %host, block = %block, revision, "Host assignment written");
        Ok(revision)
    }

    pub async fn get_host_assignment(&self, host: &str) -> Result<SubnetBlock> {
        let key = registry_keys::bridge_info(&self.prefix, host);
        let entry = self.store.get(&key).await?;
        parse_stored_block(&key, &entry.value)
    }

    /// Remove a host's assignment so bootstrap can assign it again
    pub async fn delete_host_assignment(&self, host: &str) -> Result<()> {
        let key = registry_keys::bridge_info(&self.prefix, host);
        self.store.delete(&key, false).await?;
        tracing::info!(host = %host, "Host assignment deleted");
        Ok(())
    }

    /// Stored assignment for each host, `None` where unset
    pub async fn host_assignments(&self, hosts: &[String]) -> Result<Vec<(String, Option<SubnetBlock>)>> {
        let mut found = Vec::with_capacity(hosts.len());
        for host in hosts {
            let block = match self.get_host_assignment(host).await {
                Ok(block) => Some(block),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            found.push((host.clone(), block));
        }
        Ok(found)
    }

    // === Overlay ===

    pub async fn put_overlay_config(&self, overlay: SubnetBlock) -> Result<u64> {
        let key = registry_keys::router_overlay(&self.prefix);
        let revision = self.store.create(&key, &overlay.to_string(), None).await?;
        tracing::info!(overlay = %overlay, revision, "Overlay block written");
        Ok(revision)
    }

    pub async fn get_overlay_config(&self) -> Result<SubnetBlock> {
        let key = registry_keys::router_overlay(&self.prefix);
        let entry = self.store.get(&key).await?;
        parse_stored_block(&key, &entry.value)
    }

    // === Interface bindings ===

    /// Advertise the address a host routes overlay traffic through.
    ///
    /// Re-advertising the same address is accepted so a restarted daemon
    /// can bind again; a different address is `AlreadyExists`.
    pub async fn put_interface_ip(&self, host: &str, ip: Ipv4Net) -> Result<()> {
        let key = registry_keys::router_interface(&self.prefix, host);
        let value = ip.to_string();

        match self.store.create(&key, &value, None).await {
            Ok(revision) => {
                tracing::info!(host = %host, ip = %ip, revision, "Interface address advertised");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                let current = self.store.get(&key).await?;
                if current.value == value {
                    tracing::info!(host = %host, ip = %ip, "Interface address already advertised");
                    Ok(())
                } else {
                    tracing::error!(
                        host = %host,
                        advertised = %current.value,
                        requested = %ip,
                        "Interface address conflicts with registry"
                    );
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_interface_ip(&self, host: &str) -> Result<Ipv4Net> {
        let key = registry_keys::router_interface(&self.prefix, host);
        let entry = self.store.get(&key).await?;
        parse_interface(&entry.value)
            .ok_or_else(|| VrouterError::Store(format!("malformed address '{}' at {key}", entry.value)))
    }

    // === Services ===

    pub async fn add_service(&self, descriptor: &ServiceDescriptor) -> Result<u64> {
        validate_segment("service", &descriptor.name)?;
        let key = registry_keys::service(&self.prefix, &descriptor.name);
        let revision = self.store.create(&key, &descriptor.to_value()?, None).await?;
        tracing::info!(service = %descriptor.name, revision, "Service added");
        Ok(revision)
    }

    pub async fn delete_service(&self, name: &str) -> Result<()> {
        validate_segment("service", name)?;
        let key = registry_keys::service(&self.prefix, name);
        self.store.delete(&key, true).await?;
        tracing::info!(service = %name, "Service deleted");
        Ok(())
    }

    /// Every registered service, sorted by name
    pub async fn list_services(&self) -> Result<Vec<ServiceDescriptor>> {
        let dir = registry_keys::services_dir(&self.prefix);
        let mut services = self
            .store
            .list(&dir)
            .await?
            .iter()
            .map(|entry| ServiceDescriptor::from_value(&entry.value))
            .collect::<Result<Vec<_>>>()?;
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }
}

fn parse_stored_block(key: &str, value: &str) -> Result<SubnetBlock> {
    value
        .parse()
        .map_err(|_| VrouterError::Store(format!("malformed CIDR '{value}' at {key}")))
}

/// Accepts `ip/mask` or a bare address (treated as /32)
pub fn parse_interface(value: &str) -> Option<Ipv4Net> {
    value
        .parse::<Ipv4Net>()
        .ok()
        .or_else(|| value.parse::<Ipv4Addr>().ok().map(Ipv4Net::from))
}

/// Host and service names become key segments, so they must not contain separators
pub fn validate_segment(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(VrouterError::InvalidInput(format!("invalid {what} name '{name}'")));
    }
    Ok(())
}

/// Outcome of writing one key during bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    AlreadyExists,
}

/// What a bootstrap run wrote and skipped
#[derive(Debug, Default, Clone)]
pub struct InitReport {
    pub hosts: Vec<(HostAssignment, WriteOutcome)>,
    pub overlay: Option<WriteOutcome>,
}

impl InitReport {
    pub fn written(&self) -> usize {
        self.hosts
            .iter()
            .filter(|(_, o)| *o == WriteOutcome::Written)
            .count()
            + usize::from(self.overlay == Some(WriteOutcome::Written))
    }

    pub fn skipped(&self) -> usize {
        self.hosts
            .iter()
            .filter(|(_, o)| *o == WriteOutcome::AlreadyExists)
            .count()
            + usize::from(self.overlay == Some(WriteOutcome::AlreadyExists))
    }
}

/// Persist precomputed assignments and the overlay block.
///
/// `AlreadyExists` on any key is logged and skipped so a rerun only fills in
/// what is missing. Every other error aborts the run.
pub async fn bootstrap<S: CoordinationStore>(
    registry: &OverlayRegistry<S>,
    assignments: &[HostAssignment],
    overlay: SubnetBlock,
) -> Result<InitReport> {
    let mut report = InitReport::default();

    for assignment in assignments {
        tracing::info!(host = %assignment.host, block = %assignment.block, "Initializing host");
        let outcome = match registry
            .put_host_assignment(&assignment.host, assignment.block)
            .await
        {
            Ok(_) => WriteOutcome::Written,
            Err(e) if e.is_already_exists() => {
                tracing::warn!(host = %assignment.host, error = %e, "Host already initialized, skipping");
                WriteOutcome::AlreadyExists
            }
            Err(e) => return Err(e),
        };
        report.hosts.push((assignment.clone(), outcome));
    }

    tracing::info!(overlay = %overlay, "Initializing overlay network");
    report.overlay = Some(match registry.put_overlay_config(overlay).await {
        Ok(_) => WriteOutcome::Written,
        Err(e) if e.is_already_exists() => {
            tracing::warn!(error = %e, "Overlay already initialized, skipping");
            WriteOutcome::AlreadyExists
        }
        Err(e) => return Err(e),
    });

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::subnet;

    fn registry() -> OverlayRegistry<MemoryStore> {
        OverlayRegistry::new(MemoryStore::new(), "/vrouter")
    }

    fn block(s: &str) -> SubnetBlock {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_host_assignment_is_create_once() {
        let reg = registry();
        reg.put_host_assignment("h1", block("10.0.0.0/18")).await.unwrap();

        let err = reg
            .put_host_assignment("h1", block("10.0.64.0/18"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(reg.get_host_assignment("h1").await.unwrap(), block("10.0.0.0/18"));

        reg.delete_host_assignment("h1").await.unwrap();
        assert!(reg.get_host_assignment("h1").await.unwrap_err().is_not_found());
        reg.put_host_assignment("h1", block("10.0.64.0/18")).await.unwrap();
    }

    #[tokio::test]
    async fn test_overlay_config_is_create_once() {
        let reg = registry();
        assert!(reg.get_overlay_config().await.unwrap_err().is_not_found());

        reg.put_overlay_config(block("10.0.0.0/8")).await.unwrap();
        let before = reg.store().get("/vrouter/router/overlay").await.unwrap();

        let err = reg.put_overlay_config(block("172.16.0.0/12")).await.unwrap_err();
        assert!(err.is_already_exists());

        let after = reg.store().get("/vrouter/router/overlay").await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after.value.as_bytes(), b"10.0.0.0/8");
    }

    #[tokio::test]
    async fn test_malformed_assignment_is_store_error() {
        let reg = registry();
        reg.store()
            .create("/vrouter/hosts/h1/bridge", "garbage", None)
            .await
            .unwrap();
        assert!(matches!(
            reg.get_host_assignment("h1").await,
            Err(VrouterError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_interface_ip_rebind() {
        let reg = registry();
        let ip: Ipv4Net = "192.168.1.10/24".parse().unwrap();
        reg.put_interface_ip("h1", ip).await.unwrap();
        reg.put_interface_ip("h1", ip).await.unwrap();
        assert_eq!(reg.get_interface_ip("h1").await.unwrap(), ip);

        let other: Ipv4Net = "192.168.1.11/24".parse().unwrap();
        assert!(reg.put_interface_ip("h1", other).await.unwrap_err().is_already_exists());
    }

    #[test]
    fn test_parse_interface() {
        assert_eq!(parse_interface("10.1.2.3/16").unwrap().prefix_len(), 16);
        assert_eq!(parse_interface("10.1.2.3").unwrap().prefix_len(), 32);
        assert!(parse_interface("nope").is_none());
    }

    #[tokio::test]
    async fn test_services_lifecycle() {
        let reg = registry();
        assert!(reg.list_services().await.unwrap().is_empty());

        let web = ServiceDescriptor::new("web").with_attribute("port", "80");
        let db = ServiceDescriptor::new("db").with_attribute("port", "5432");
        reg.add_service(&web).await.unwrap();
        reg.add_service(&db).await.unwrap();
        assert!(reg.add_service(&web).await.unwrap_err().is_already_exists());

        let names: Vec<String> = reg
            .list_services()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["db", "web"]);

        reg.delete_service("web").await.unwrap();
        assert!(reg.delete_service("web").await.unwrap_err().is_not_found());
        assert_eq!(reg.list_services().await.unwrap(), vec![db]);
    }

    #[tokio::test]
    async fn test_service_names_are_single_segments() {
        let reg = registry();
        let bad = ServiceDescriptor::new("a/b");
        assert!(matches!(reg.add_service(&bad).await, Err(VrouterError::InvalidInput(_))));
        assert!(matches!(reg.delete_service("").await, Err(VrouterError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_host_names_are_single_segments() {
        let reg = registry();
        for host in ["a/b", "a b", ""] {
            let result = reg.put_host_assignment(host, block("10.0.0.0/18")).await;
            assert!(matches!(result, Err(VrouterError::InvalidInput(_))), "{host:?}");
        }
        assert!(reg.store().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_twice_writes_nothing_new() {
        let reg = registry();
        let hosts = vec!["a".to_string(), "b".to_string()];
        let blocks = subnet::allocate(block("10.0.0.0/16"), hosts.len()).unwrap();
        let assignments = subnet::assign(&hosts, &blocks);
        let overlay = block("10.0.0.0/8");

        let first = bootstrap(&reg, &assignments, overlay).await.unwrap();
        assert_eq!(first.written(), 3);
        assert_eq!(first.skipped(), 0);
        assert_eq!(reg.store().len(), 3);
        let snapshot = reg.store().list("/vrouter").await.unwrap();

        let second = bootstrap(&reg, &assignments, overlay).await.unwrap();
        assert_eq!(second.written(), 0);
        assert_eq!(second.skipped(), 3);
        assert_eq!(reg.store().list("/vrouter").await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_bootstrap_fills_in_missing_hosts() {
        let reg = registry();
        reg.put_host_assignment("a", block("10.0.0.0/18")).await.unwrap();

        let hosts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let blocks = subnet::allocate(block("10.0.0.0/16"), hosts.len()).unwrap();
        let report = bootstrap(&reg, &subnet::assign(&hosts, &blocks), block("10.0.0.0/8"))
            .await
            .unwrap();

        assert_eq!(report.hosts[0].1, WriteOutcome::AlreadyExists);
        assert_eq!(report.hosts[1].1, WriteOutcome::Written);
        assert_eq!(report.written(), 3);
        assert_eq!(reg.get_host_assignment("c").await.unwrap(), block("10.0.128.0/18"));
    }
}
