//! Background health checking of upstream nodes.
//!
//! One tokio task per service with a health spec. Each tick probes every
//! enabled node of the service concurrently with the configured method,
//! path and timeout, feeds the verdicts into the node's consecutive
//! counters, and logs threshold transitions. The checker is the only
//! writer of node health state.

use crate::models::service::{HealthCheckSpec, HealthState};
use crate::pipeline::Closable;
use crate::services::registry::{NodeState, ServiceEntry, ServiceRegistry};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owns the probe tasks for one pipeline generation.
///
/// Created by the generation builder, closed by the retirement path after
/// the generation has been displaced. Closing stops the tasks at their next
/// scheduling point and joins them.
pub struct HealthChecker {
    stop_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthChecker {
    /// Spawns one probe loop per service that carries a health spec.
    pub fn start(registry: &ServiceRegistry) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        // Shared probe client; per-request timeouts come from each spec.
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .build()
            .unwrap_or_default();

        let mut handles = Vec::new();
        for entry in registry.entries() {
            let Some(spec) = entry.def.health.clone() else {
                continue;
            };
            debug!(
                "starting health checker for service {} every {}s",
                entry.def.id, spec.interval_secs
            );
            handles.push(tokio::spawn(Self::run_service_loop(
                client.clone(),
                entry.clone(),
                spec,
                stop_rx.clone(),
            )));
        }

        Self {
            stop_tx,
            handles: Mutex::new(handles),
        }
    }

    /// Number of live probe tasks.
    pub fn task_count(&self) -> usize {
        match self.handles.lock() {
            Ok(handles) => handles.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    async fn run_service_loop(
        client: reqwest::Client,
        entry: Arc<ServiceEntry>,
        spec: HealthCheckSpec,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_secs(spec.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    // Stop on signal or on a dropped sender.
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    Self::probe_round(&client, &entry, &spec).await;
                }
            }
        }
        debug!("health checker for service {} stopped", entry.def.id);
    }

    /// Probes every enabled node of the service concurrently.
    async fn probe_round(client: &reqwest::Client, entry: &ServiceEntry, spec: &HealthCheckSpec) {
        let nodes = entry.snapshot();
        let probes = nodes
            .iter()
            .filter(|node| node.config.enabled)
            .map(|node| Self::probe_node(client, node.clone(), entry.def.id.clone(), spec));
        futures::future::join_all(probes).await;
    }

    async fn probe_node(
        client: &reqwest::Client,
        node: Arc<NodeState>,
        service_id: String,
        spec: &HealthCheckSpec,
    ) {
        let url = format!("{}{}", node.config.base_url(), spec.path);
        let method = reqwest::Method::from_bytes(spec.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);

        let outcome = client
            .request(method, &url)
            .timeout(Duration::from_secs(spec.timeout_secs))
            .send()
            .await;

        let success = match &outcome {
            Ok(response) => spec.expected_codes.contains(&response.status().as_u16()),
            Err(_) => false,
        };

        if let Some(transition) =
            node.record_probe(success, spec.healthy_threshold, spec.unhealthy_threshold)
        {
            match transition {
                HealthState::Healthy => info!(
                    "service {} node {} is healthy again",
                    service_id,
                    node.config.address()
                ),
                HealthState::Unhealthy => warn!(
                    "service {} node {} marked unhealthy ({})",
                    service_id,
                    node.config.address(),
                    outcome
                        .as_ref()
                        .map(|r| r.status().to_string())
                        .unwrap_or_else(|e| e.to_string())
                ),
                HealthState::Unknown => {}
            }
        }
    }
}

#[async_trait]
impl Closable for HealthChecker {
    async fn close(&self) -> Result<(), String> {
        let _ = self.stop_tx.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = match self.handles.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    return Err(format!("health checker task panicked: {}", e));
                }
            }
        }
        Ok(())
    }
}
