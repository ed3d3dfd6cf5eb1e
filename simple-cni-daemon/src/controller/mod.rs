use kube::Client;
use log::{debug, info};
use tokio::join;

use crate::{command::CommandRunner, config::DaemonConfig, routes::ip::IpRouteTable};

use self::{
    bootstrap::prepare_node,
    node::start_node_reflector,
    reconciler::{error::ReconcilerError, RouteReconciler},
    synchronizer::RouteSynchronizer,
};

pub mod bootstrap;
pub mod node;
pub mod reconciler;
pub mod synchronizer;

pub async fn main_controller(client: Client, config: DaemonConfig) -> Result<(), ReconcilerError> {
    let runner = CommandRunner::default();
    let context = prepare_node(&client, &config, &runner).await?;
    let mut reconciler = RouteReconciler::new(IpRouteTable::new(runner), context);
    let seeded = reconciler.bootstrap().await?;

    info!(
        "Took over {seeded} existing routes on {}",
        reconciler.context().link
    );

    for route in reconciler.installed() {
        debug!("Taking over route {route}");
    }

    let (reflector, nodes, refresh_signal) = start_node_reflector(&client);
    let mut synchronizer = RouteSynchronizer::new(
        reconciler,
        nodes,
        refresh_signal,
        config.resync_interval,
        config.retry_delay,
    );

    join!(reflector, synchronizer.start());

    Ok(())
}
