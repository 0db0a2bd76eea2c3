//! Node health background worker.
//!
//! Refreshes the node status cache on a periodic interval so the read-only
//! views stay current between autoscale decisions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::controller::Controller;

pub struct NodeHealthWorker {
    controller: Arc<Controller>,
    interval: Duration,
}

impl NodeHealthWorker {
    pub fn new(controller: Arc<Controller>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
        }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting node health worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // the first tick completes immediately; startup already refreshed
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.controller.refresh_node_status().await {
                        Ok(statuses) => {
                            let unhealthy = statuses.values().filter(|s| !s.is_healthy()).count();
                            debug!(nodes = statuses.len(), unhealthy, "Node health refreshed");
                        }
                        Err(e) => warn!(error = %e, "Node health refresh failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Node health worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use arha_reconcile::{FrequencyLimit, NodeStatus, ServiceSpec};

    use super::*;
    use crate::agent::RecordingAgentChannel;
    use crate::controller::Collaborators;
    use crate::health::StaticNodeHealth;
    use crate::inventory::NodeInventory;
    use crate::launcher::MockLauncher;
    use crate::scheduler::PlannerSettings;
    use crate::store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn test_worker_refreshes_until_shutdown() {
        let spec = ServiceSpec {
            service_type: "pose".to_string(),
            frequency_limit: FrequencyLimit::new(20.0, 10.0),
            work_ability: [("gpu-a".to_string(), 70.0)].into_iter().collect(),
            gpu_memory_request: 2,
        };
        let health = Arc::new(StaticNodeHealth::healthy());
        health.set("gpu-a", NodeStatus::Unhealthy);
        let controller = Arc::new(Controller::new(
            Collaborators {
                store: Arc::new(MemoryStore::with_specs(vec![spec])),
                launcher: Arc::new(MockLauncher::new()),
                health,
                agents: Arc::new(RecordingAgentChannel::new()),
            },
            NodeInventory::new(),
            PlannerSettings::default(),
        ));

        let worker = NodeHealthWorker::new(controller.clone(), Duration::from_secs(30));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_secs(31)).await;
        let snapshot = controller.node_status().await;
        assert_eq!(snapshot.nodes.get("gpu-a"), Some(&NodeStatus::Unhealthy));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
