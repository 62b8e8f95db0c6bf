//! Service registry with lock-free node snapshots.
//!
//! Readers (proxy, load balancer) load an `Arc` snapshot of the node list
//! and never block. The health checker is the only writer of health state,
//! which lives in per-node atomics; node-list *membership* changes go
//! through a per-service mutex and publish a fresh copy-on-write snapshot.

use crate::models::service::{DiscoveryMode, HealthState, NodeConfig, ServiceDef};
use arc_swap::ArcSwap;
use log::info;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Runtime state of one upstream node.
///
/// Configuration fields are immutable for the lifetime of the snapshot;
/// health and counters are atomics so probe results never require
/// republishing the list. Counters are monotonic within a probe round —
/// the checker is single-writer per service.
#[derive(Debug)]
pub struct NodeState {
    pub config: NodeConfig,
    health: AtomicU8,
    consecutive_successes: AtomicU32,
    consecutive_failures: AtomicU32,
    /// Unix millis of the last probe; 0 = never probed.
    last_probe_ms: AtomicU64,
    /// In-flight request count for the least-connections strategy.
    active_connections: AtomicU64,
}

const HEALTH_HEALTHY: u8 = 0;
const HEALTH_UNHEALTHY: u8 = 1;
const HEALTH_UNKNOWN: u8 = 2;

fn health_to_u8(state: HealthState) -> u8 {
    match state {
        HealthState::Healthy => HEALTH_HEALTHY,
        HealthState::Unhealthy => HEALTH_UNHEALTHY,
        HealthState::Unknown => HEALTH_UNKNOWN,
    }
}

fn health_from_u8(raw: u8) -> HealthState {
    match raw {
        HEALTH_HEALTHY => HealthState::Healthy,
        HEALTH_UNHEALTHY => HealthState::Unhealthy,
        _ => HealthState::Unknown,
    }
}

impl NodeState {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            health: AtomicU8::new(HEALTH_UNKNOWN),
            consecutive_successes: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_probe_ms: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
        }
    }

    pub fn health(&self) -> HealthState {
        health_from_u8(self.health.load(Ordering::Relaxed))
    }

    /// Enabled and not known-unhealthy. `Unknown` nodes receive traffic so
    /// a cold start does not blackhole every request until the first probe
    /// round completes.
    pub fn is_eligible(&self) -> bool {
        self.config.enabled && self.health() != HealthState::Unhealthy
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn last_probe_ms(&self) -> u64 {
        self.last_probe_ms.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn begin_request(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn end_request(&self) {
        // Saturating: a reload may republish nodes mid-request.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Applies one probe verdict. Returns the new health state when the
    /// corresponding threshold was crossed and the node flipped.
    pub fn record_probe(
        &self,
        success: bool,
        healthy_threshold: u32,
        unhealthy_threshold: u32,
    ) -> Option<HealthState> {
        self.last_probe_ms.store(
            chrono::Utc::now().timestamp_millis() as u64,
            Ordering::Relaxed,
        );

        if success {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
            if self.health() != HealthState::Healthy && successes >= healthy_threshold {
                self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
                return Some(HealthState::Healthy);
            }
        } else {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if self.health() != HealthState::Unhealthy && failures >= unhealthy_threshold {
                self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed);
                return Some(HealthState::Unhealthy);
            }
        }
        None
    }
}

/// One registered service: immutable definition plus the published node
/// snapshot.
pub struct ServiceEntry {
    pub def: ServiceDef,
    nodes: ArcSwap<Vec<Arc<NodeState>>>,
    /// Serializes membership updates; health mutation bypasses it.
    update_lock: Mutex<()>,
}

impl ServiceEntry {
    fn new(def: ServiceDef) -> Self {
        let nodes: Vec<Arc<NodeState>> = def
            .nodes
            .iter()
            .cloned()
            .map(|cfg| Arc::new(NodeState::new(cfg)))
            .collect();
        Self {
            def,
            nodes: ArcSwap::from_pointee(nodes),
            update_lock: Mutex::new(()),
        }
    }

    /// Lock-free snapshot of all nodes.
    pub fn snapshot(&self) -> Arc<Vec<Arc<NodeState>>> {
        self.nodes.load_full()
    }

    /// Enabled, non-unhealthy nodes from the current snapshot.
    pub fn eligible_nodes(&self) -> Vec<Arc<NodeState>> {
        self.snapshot()
            .iter()
            .filter(|n| n.is_eligible())
            .cloned()
            .collect()
    }

    /// Replaces the node membership (dynamic discovery, admin updates).
    ///
    /// Nodes whose `host:port` survives keep their health state and
    /// counters; new nodes start `Unknown`. Only meaningful for services
    /// with `dynamic` discovery, but safe for any.
    pub fn replace_nodes(&self, configs: Vec<NodeConfig>) {
        let _guard = match self.update_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current = self.snapshot();
        let next: Vec<Arc<NodeState>> = configs
            .into_iter()
            .map(|cfg| {
                current
                    .iter()
                    .find(|n| n.config.address() == cfg.address() && n.config.protocol == cfg.protocol)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(NodeState::new(cfg)))
            })
            .collect();
        info!(
            "service {} republished node list ({} nodes)",
            self.def.id,
            next.len()
        );
        self.nodes.store(Arc::new(next));
    }
}

/// All services of one pipeline generation, keyed by service id.
pub struct ServiceRegistry {
    services: ahash::HashMap<String, Arc<ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new(defs: &[ServiceDef]) -> Self {
        let services = defs
            .iter()
            .map(|def| (def.id.clone(), Arc::new(ServiceEntry::new(def.clone()))))
            .collect();
        Self { services }
    }

    pub fn get(&self, service_id: &str) -> Option<Arc<ServiceEntry>> {
        self.services.get(service_id).cloned()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<ServiceEntry>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Services with dynamic discovery enabled.
    pub fn dynamic_services(&self) -> Vec<Arc<ServiceEntry>> {
        self.services
            .values()
            .filter(|e| e.def.discovery == DiscoveryMode::Dynamic)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::service::LoadBalancingStrategy;

    fn node_config(host: &str, port: u16) -> NodeConfig {
        NodeConfig {
            host: host.to_string(),
            port,
            protocol: "http".to_string(),
            weight: 1,
            enabled: true,
        }
    }

    fn service(id: &str, nodes: Vec<NodeConfig>) -> ServiceDef {
        ServiceDef {
            id: id.to_string(),
            name: id.to_string(),
            discovery: DiscoveryMode::Static,
            strategy: LoadBalancingStrategy::RoundRobin,
            health: None,
            circuit_breaker: None,
            nodes,
        }
    }

    #[test]
    fn unknown_nodes_are_eligible() {
        let registry = ServiceRegistry::new(&[service("s", vec![node_config("h", 9001)])]);
        let entry = registry.get("s").unwrap();
        assert_eq!(entry.eligible_nodes().len(), 1);
        assert_eq!(entry.snapshot()[0].health(), HealthState::Unknown);
    }

    #[test]
    fn threshold_flips_health_down_and_up() {
        let node = NodeState::new(node_config("h", 9001));

        assert_eq!(node.record_probe(false, 3, 2), None);
        assert_eq!(node.record_probe(false, 3, 2), Some(HealthState::Unhealthy));
        assert!(!node.is_eligible());

        // Recovery needs healthy_threshold consecutive successes.
        assert_eq!(node.record_probe(true, 3, 2), None);
        assert_eq!(node.record_probe(true, 3, 2), None);
        assert_eq!(node.record_probe(true, 3, 2), Some(HealthState::Healthy));
        assert!(node.is_eligible());
    }

    #[test]
    fn failure_resets_success_streak() {
        let node = NodeState::new(node_config("h", 9001));
        assert_eq!(node.record_probe(false, 3, 2), None);
        assert_eq!(node.record_probe(false, 3, 2), Some(HealthState::Unhealthy));

        assert_eq!(node.record_probe(true, 3, 2), None);
        assert_eq!(node.record_probe(true, 3, 2), None);
        assert_eq!(node.record_probe(false, 3, 2), None);
        // Streak restarted; two more successes are not enough.
        assert_eq!(node.record_probe(true, 3, 2), None);
        assert_eq!(node.record_probe(true, 3, 2), None);
        assert_eq!(node.health(), HealthState::Unhealthy);
    }

    #[test]
    fn replace_nodes_preserves_surviving_state() {
        let registry = ServiceRegistry::new(&[service(
            "s",
            vec![node_config("a", 9001), node_config("b", 9001)],
        )]);
        let entry = registry.get("s").unwrap();

        // Flip node a unhealthy.
        let snapshot = entry.snapshot();
        let a = snapshot
            .iter()
            .find(|n| n.config.host == "a")
            .unwrap()
            .clone();
        a.record_probe(false, 3, 1);
        assert_eq!(a.health(), HealthState::Unhealthy);

        // Replace membership: keep a, drop b, add c.
        entry.replace_nodes(vec![node_config("a", 9001), node_config("c", 9001)]);
        let snapshot = entry.snapshot();
        assert_eq!(snapshot.len(), 2);
        let a_again = snapshot.iter().find(|n| n.config.host == "a").unwrap();
        assert_eq!(a_again.health(), HealthState::Unhealthy, "state was lost");
        let c = snapshot.iter().find(|n| n.config.host == "c").unwrap();
        assert_eq!(c.health(), HealthState::Unknown);
    }

    #[test]
    fn connection_counter_saturates_at_zero() {
        let node = NodeState::new(node_config("h", 9001));
        node.begin_request();
        node.end_request();
        node.end_request();
        assert_eq!(node.active_connections(), 0);
    }

    #[test]
    fn disabled_nodes_are_never_eligible() {
        let mut cfg = node_config("h", 9001);
        cfg.enabled = false;
        let registry = ServiceRegistry::new(&[service("s", vec![cfg])]);
        assert!(registry.get("s").unwrap().eligible_nodes().is_empty());
    }
}
