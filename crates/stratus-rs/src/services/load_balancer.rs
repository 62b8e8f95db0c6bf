//! Load balancing strategies for selecting upstream nodes.
//!
//! Every strategy is a pure selection over the healthy-enabled snapshot the
//! proxy hands it; the only cross-request state a strategy owns is its own
//! cursor. Returning `None` means no node is selectable and maps to `503`
//! at the proxy.

use crate::models::service::LoadBalancingStrategy;
use crate::services::registry::NodeState;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Request attributes a strategy may consult.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancerInput<'a> {
    /// Client IP for `IpHash`.
    pub client_ip: Option<&'a str>,
    /// Affinity key for `ConsistentHash` (user id, limiter key, path).
    pub hash_key: Option<&'a str>,
}

/// Node selection strategy.
///
/// Implementations must never select a node that is absent from `nodes`;
/// the caller has already filtered out disabled and unhealthy nodes.
pub trait LoadBalancer: Send + Sync {
    fn select(&self, nodes: &[Arc<NodeState>], input: BalancerInput<'_>) -> Option<Arc<NodeState>>;
}

/// Round-robin: even circular distribution.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, nodes: &[Arc<NodeState>], _input: BalancerInput<'_>) -> Option<Arc<NodeState>> {
        if nodes.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % nodes.len();
        Some(nodes[index].clone())
    }
}

/// Weighted round-robin over an expanded slot list.
///
/// A node with weight `w` occupies `w` consecutive slots; the cursor walks
/// the slots circularly, so `{A:2, B:1}` yields `A A B A A B ...` — an
/// exact 2:1 split over any full cycle.
#[derive(Debug, Default)]
pub struct WeightedRoundRobinBalancer {
    counter: AtomicUsize,
}

impl LoadBalancer for WeightedRoundRobinBalancer {
    fn select(&self, nodes: &[Arc<NodeState>], _input: BalancerInput<'_>) -> Option<Arc<NodeState>> {
        if nodes.is_empty() {
            return None;
        }
        let total: usize = nodes.iter().map(|n| n.config.weight.max(1) as usize).sum();
        let mut slot = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        for node in nodes {
            let weight = node.config.weight.max(1) as usize;
            if slot < weight {
                return Some(node.clone());
            }
            slot -= weight;
        }
        // Unreachable: slot < total by construction.
        nodes.first().cloned()
    }
}

/// Uniform random selection.
#[derive(Debug, Default)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn select(&self, nodes: &[Arc<NodeState>], _input: BalancerInput<'_>) -> Option<Arc<NodeState>> {
        use rand::Rng;
        if nodes.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..nodes.len());
        Some(nodes[index].clone())
    }
}

/// Fewest in-flight requests wins; ties go to the earlier node.
#[derive(Debug, Default)]
pub struct LeastConnectionsBalancer;

impl LoadBalancer for LeastConnectionsBalancer {
    fn select(&self, nodes: &[Arc<NodeState>], _input: BalancerInput<'_>) -> Option<Arc<NodeState>> {
        nodes
            .iter()
            .min_by_key(|n| n.active_connections())
            .cloned()
    }
}

/// Sticky sessions by client IP hash.
#[derive(Debug, Default)]
pub struct IpHashBalancer;

fn hash_str(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl LoadBalancer for IpHashBalancer {
    fn select(&self, nodes: &[Arc<NodeState>], input: BalancerInput<'_>) -> Option<Arc<NodeState>> {
        if nodes.is_empty() {
            return None;
        }
        match input.client_ip {
            Some(ip) => {
                let index = (hash_str(ip) as usize) % nodes.len();
                Some(nodes[index].clone())
            }
            None => nodes.first().cloned(),
        }
    }
}

/// Hash-ring placement with virtual nodes.
///
/// Each node contributes [`VIRTUAL_NODES`] ring points derived from its
/// address, so the ring is a deterministic function of the node set: a
/// membership change only remaps keys whose ring segment was touched, and
/// keys away from the change keep their node.
#[derive(Debug, Default)]
pub struct ConsistentHashBalancer;

/// Ring points per node.
const VIRTUAL_NODES: u32 = 64;

impl ConsistentHashBalancer {
    fn build_ring(nodes: &[Arc<NodeState>]) -> BTreeMap<u64, usize> {
        let mut ring = BTreeMap::new();
        for (index, node) in nodes.iter().enumerate() {
            let address = node.config.address();
            for replica in 0..VIRTUAL_NODES {
                ring.insert(hash_str(&format!("{}#{}", address, replica)), index);
            }
        }
        ring
    }
}

impl LoadBalancer for ConsistentHashBalancer {
    fn select(&self, nodes: &[Arc<NodeState>], input: BalancerInput<'_>) -> Option<Arc<NodeState>> {
        if nodes.is_empty() {
            return None;
        }
        let key = match input.hash_key.or(input.client_ip) {
            Some(key) => key,
            None => return nodes.first().cloned(),
        };
        let ring = Self::build_ring(nodes);
        let point = hash_str(key);
        let index = ring
            .range(point..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, idx)| *idx)?;
        Some(nodes[index].clone())
    }
}

/// Factory for creating load balancers based on strategy.
pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    pub fn create(strategy: LoadBalancingStrategy) -> Arc<dyn LoadBalancer> {
        match strategy {
            LoadBalancingStrategy::RoundRobin => Arc::new(RoundRobinBalancer::default()),
            LoadBalancingStrategy::WeightedRoundRobin => {
                Arc::new(WeightedRoundRobinBalancer::default())
            }
            LoadBalancingStrategy::Random => Arc::new(RandomBalancer),
            LoadBalancingStrategy::LeastConnections => Arc::new(LeastConnectionsBalancer),
            LoadBalancingStrategy::IpHash => Arc::new(IpHashBalancer),
            LoadBalancingStrategy::ConsistentHash => Arc::new(ConsistentHashBalancer),
        }
    }
}
