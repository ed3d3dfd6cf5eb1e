use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::Store;
use log::{debug, info, warn};
use tokio::{sync::watch::Receiver, time::sleep};

use crate::routes::RouteTable;

use super::{node::NodeIdentity, reconciler::RouteReconciler};

pub enum LoopCommand {
    Continue,
    Break,
}

/// Runs reconcile passes on node changes, after failures and on a fixed
/// resync interval. Passes never overlap.
pub struct RouteSynchronizer<T: RouteTable> {
    reconciler: RouteReconciler<T>,
    nodes: Store<Node>,
    refresh_signal: Receiver<()>,
    resync_interval: Duration,
    retry_delay: Duration,
}

impl<T: RouteTable> RouteSynchronizer<T> {
    pub fn new(
        reconciler: RouteReconciler<T>,
        nodes: Store<Node>,
        refresh_signal: Receiver<()>,
        resync_interval: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            reconciler,
            nodes,
            refresh_signal,
            resync_interval,
            retry_delay,
        }
    }

    pub async fn start(&mut self) {
        info!("Waiting for the node list...");

        if self.refresh_signal.changed().await.is_err() {
            warn!("Node reflector stopped before listing the nodes!");
            return;
        }

        info!("Starting route synchronization...");

        loop {
            let delay = self.synchronize().await;

            if let LoopCommand::Break = self.wait(delay).await {
                break;
            }
        }

        info!("Exiting route synchronization...");
    }

    async fn synchronize(&mut self) -> Duration {
        let nodes = self
            .nodes
            .state()
            .iter()
            .filter_map(|node| NodeIdentity::from_node(node))
            .collect::<Vec<_>>();

        debug!("Synchronizing routes for {} nodes...", nodes.len());

        match self.reconciler.reconcile(&nodes).await {
            Ok(summary) => {
                match summary.mutations() {
                    0 => debug!("Routes are up to date ({summary})"),
                    _ => info!("Routes synchronized! ({summary})"),
                }

                self.resync_interval
            }
            Err(err) => {
                warn!(
                    "Route synchronization failed, retrying in {}s! {err}",
                    self.retry_delay.as_secs()
                );

                self.retry_delay
            }
        }
    }

    async fn wait(&mut self, delay: Duration) -> LoopCommand {
        tokio::select! {
            changed = self.refresh_signal.changed() => match changed {
                Ok(()) => LoopCommand::Continue,
                Err(_) => LoopCommand::Break,
            },
            _ = sleep(delay) => LoopCommand::Continue,
        }
    }
}
