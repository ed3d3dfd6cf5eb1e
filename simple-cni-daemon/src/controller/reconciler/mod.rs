use std::{collections::BTreeMap, fmt::Display};

use ipnet::Ipv4Net;
use log::{debug, info, warn};

use crate::{
    controller::node::NodeIdentity,
    routes::{RouteEntry, RouteTable},
};

use self::{context::ReconcilerContext, error::ReconcilerError};

pub mod context;
pub mod error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ReconcileSummary {
    pub fn mutations(&self) -> usize {
        self.added + self.replaced + self.deleted
    }
}

impl Display for ReconcileSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} replaced, {} deleted, {} unchanged",
            self.added, self.replaced, self.deleted, self.unchanged
        )
    }
}

/// Keeps one kernel route per remote node subnet on the primary link.
///
/// `installed` mirrors what this reconciler believes the kernel holds. It is
/// seeded from the kernel on bootstrap and again after any failed pass.
pub struct RouteReconciler<T: RouteTable> {
    table: T,
    context: ReconcilerContext,
    installed: BTreeMap<Ipv4Net, RouteEntry>,
    stale: bool,
}

impl<T: RouteTable> RouteReconciler<T> {
    pub fn new(table: T, context: ReconcilerContext) -> Self {
        Self {
            table,
            context,
            installed: BTreeMap::new(),
            stale: true,
        }
    }

    pub fn context(&self) -> &ReconcilerContext {
        &self.context
    }

    pub fn installed(&self) -> impl Iterator<Item = &RouteEntry> {
        self.installed.values()
    }

    /// Seeds the mirror from the kernel and returns the number of routes
    /// taken over.
    pub async fn bootstrap(&mut self) -> Result<usize, ReconcilerError> {
        let routes = self.table.list(&self.context.link).await?;

        self.installed = routes
            .into_iter()
            .filter(|route| self.context.owns_destination(&route.destination))
            .map(|route| (route.destination, route))
            .collect();
        self.stale = false;

        Ok(self.installed.len())
    }

    pub async fn reconcile(
        &mut self,
        nodes: &[NodeIdentity],
    ) -> Result<ReconcileSummary, ReconcilerError> {
        if self.stale {
            info!("Re-reading routes of {}...", self.context.link);
            self.bootstrap().await?;
        }

        let desired = desired_routes(&self.context, nodes);
        let result = self.apply(&desired).await;

        if result.is_err() {
            self.stale = true;
        }

        result
    }

    async fn apply(
        &mut self,
        desired: &BTreeMap<Ipv4Net, RouteEntry>,
    ) -> Result<ReconcileSummary, ReconcilerError> {
        let mut summary = ReconcileSummary::default();

        for (destination, route) in desired {
            match self.installed.get(destination) {
                Some(installed) if installed == route => summary.unchanged += 1,
                Some(installed) => {
                    info!("Replacing route {installed} with {route}...");

                    self.table.replace(route).await?;
                    summary.replaced += 1;
                }
                None => {
                    info!("Adding route {route}...");

                    match self.table.add(route).await {
                        Ok(()) => summary.added += 1,
                        Err(err) if err.stderr_contains("File exists") => {
                            debug!("Route to {destination} already exists, replacing it");

                            self.table.replace(route).await?;
                            summary.replaced += 1;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }

            self.installed.insert(*destination, route.clone());
        }

        let leftovers = self
            .installed
            .values()
            .filter(|route| !desired.contains_key(&route.destination))
            .cloned()
            .collect::<Vec<_>>();

        for route in leftovers {
            info!("Removing route {route}...");

            match self.table.delete(&route).await {
                Ok(()) => {}
                Err(err) if err.stderr_contains("No such process") => {
                    debug!("Route {route} was already gone");
                }
                Err(err) => return Err(err.into()),
            }

            self.installed.remove(&route.destination);
            summary.deleted += 1;
        }

        Ok(summary)
    }
}

/// One route per remote node with a known subnet and internal address.
pub fn desired_routes(
    context: &ReconcilerContext,
    nodes: &[NodeIdentity],
) -> BTreeMap<Ipv4Net, RouteEntry> {
    let mut nodes = nodes.iter().collect::<Vec<_>>();
    nodes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut routes = BTreeMap::new();

    for node in nodes {
        if node.name == context.node_name {
            continue;
        }

        let (subnet, internal_ip) = match (node.subnet, node.internal_ip) {
            (Some(subnet), Some(internal_ip)) => (subnet, internal_ip),
            _ => continue,
        };

        if let Some(existing) = routes.get(&subnet) {
            warn!(
                "Node '{}' claims {subnet} already routed via {existing}, skipping it!",
                node.name
            );
            continue;
        }

        routes.insert(subnet, RouteEntry::via(subnet, internal_ip, &context.link));
    }

    routes
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use simple_cni_core::os::KernelError;

    use crate::{
        controller::node::NodeIdentity,
        routes::{RouteEntry, RouteTable},
    };

    use super::{context::ReconcilerContext, desired_routes, RouteReconciler};

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        Add(RouteEntry),
        Replace(RouteEntry),
        Delete(RouteEntry),
    }

    #[derive(Default)]
    struct TableState {
        routes: Vec<RouteEntry>,
        calls: Vec<Call>,
        fail_list: bool,
        fail_on: Option<String>,
    }

    #[derive(Clone, Default)]
    struct MockRouteTable {
        state: Arc<Mutex<TableState>>,
    }

    impl MockRouteTable {
        fn with_routes(routes: Vec<RouteEntry>) -> Self {
            let table = Self::default();
            table.state.lock().unwrap().routes = routes;
            table
        }

        fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        fn clear_calls(&self) {
            self.state.lock().unwrap().calls.clear();
        }

        fn fail_on(&self, destination: Option<&str>) {
            self.state.lock().unwrap().fail_on = destination.map(str::to_owned);
        }

        fn record(&self, call: Call, route: &RouteEntry) -> Result<(), KernelError> {
            let mut state = self.state.lock().unwrap();

            if state.fail_on.as_deref() == Some(route.destination.to_string().as_str()) {
                return Err(KernelError::CommandFailed {
                    command: format!("ip route {route}"),
                    stderr: "RTNETLINK answers: Network is unreachable".into(),
                });
            }

            state.routes.retain(|r| r.destination != route.destination);
            if !matches!(call, Call::Delete(_)) {
                state.routes.push(route.clone());
            }
            state.calls.push(call);

            Ok(())
        }
    }

    #[async_trait]
    impl RouteTable for MockRouteTable {
        async fn list(&self, device: &str) -> Result<Vec<RouteEntry>, KernelError> {
            let state = self.state.lock().unwrap();

            if state.fail_list {
                return Err(KernelError::Timeout(format!("ip route show dev {device}")));
            }

            Ok(state
                .routes
                .iter()
                .filter(|route| route.device == device)
                .cloned()
                .collect())
        }

        async fn add(&self, route: &RouteEntry) -> Result<(), KernelError> {
            self.record(Call::Add(route.clone()), route)
        }

        async fn replace(&self, route: &RouteEntry) -> Result<(), KernelError> {
            self.record(Call::Replace(route.clone()), route)
        }

        async fn delete(&self, route: &RouteEntry) -> Result<(), KernelError> {
            self.record(Call::Delete(route.clone()), route)
        }
    }

    fn context() -> ReconcilerContext {
        ReconcilerContext {
            node_name: "worker-1".into(),
            cluster_cidr: "10.244.0.0/16".parse().unwrap(),
            subnet: "10.244.1.0/24".parse().unwrap(),
            link: "eth0".into(),
        }
    }

    fn node(name: &str, subnet: Option<&str>, ip: Option<&str>) -> NodeIdentity {
        NodeIdentity {
            name: name.into(),
            subnet: subnet.map(|subnet| subnet.parse().unwrap()),
            internal_ip: ip.map(|ip| ip.parse().unwrap()),
        }
    }

    fn route(destination: &str, gateway: &str) -> RouteEntry {
        RouteEntry::via(destination.parse().unwrap(), gateway.parse().unwrap(), "eth0")
    }

    fn cluster() -> Vec<NodeIdentity> {
        vec![
            node("worker-1", Some("10.244.1.0/24"), Some("192.168.1.11")),
            node("worker-2", Some("10.244.2.0/24"), Some("192.168.1.12")),
            node("worker-3", Some("10.244.3.0/24"), Some("192.168.1.13")),
            node("worker-4", None, Some("192.168.1.14")),
            node("worker-5", Some("10.244.5.0/24"), None),
        ]
    }

    #[test]
    fn desired_routes_skip_self_and_incomplete_nodes() {
        let routes = desired_routes(&context(), &cluster());

        assert_eq!(
            routes.into_values().collect::<Vec<_>>(),
            vec![
                route("10.244.2.0/24", "192.168.1.12"),
                route("10.244.3.0/24", "192.168.1.13"),
            ]
        );
    }

    #[test]
    fn conflicting_subnet_is_routed_to_one_node() {
        let mut nodes = cluster();
        nodes.push(node("worker-0", Some("10.244.2.0/24"), Some("192.168.1.10")));

        let routes = desired_routes(&context(), &nodes);

        assert_eq!(routes.len(), 2);
        assert_eq!(
            routes.values().next(),
            Some(&route("10.244.2.0/24", "192.168.1.10"))
        );
    }

    #[tokio::test]
    async fn bootstrap_takes_over_cluster_routes_only() {
        let table = MockRouteTable::with_routes(vec![
            route("10.244.2.0/24", "192.168.1.12"),
            route("10.244.1.0/24", "192.168.1.11"),
            route("172.16.0.0/12", "192.168.1.1"),
            RouteEntry::via(
                "10.244.7.0/24".parse().unwrap(),
                "10.8.0.1".parse().unwrap(),
                "wg0",
            ),
        ]);
        let mut reconciler = RouteReconciler::new(table, context());

        assert_eq!(reconciler.bootstrap().await.unwrap(), 1);
        assert_eq!(
            reconciler.installed().cloned().collect::<Vec<_>>(),
            vec![route("10.244.2.0/24", "192.168.1.12")]
        );
    }

    #[tokio::test]
    async fn second_pass_performs_no_mutations() {
        let table = MockRouteTable::default();
        let mut reconciler = RouteReconciler::new(table.clone(), context());
        reconciler.bootstrap().await.unwrap();

        let first = reconciler.reconcile(&cluster()).await.unwrap();

        assert_eq!(first.added, 2);
        assert_eq!(
            table.calls(),
            vec![
                Call::Add(route("10.244.2.0/24", "192.168.1.12")),
                Call::Add(route("10.244.3.0/24", "192.168.1.13")),
            ]
        );

        table.clear_calls();
        let second = reconciler.reconcile(&cluster()).await.unwrap();

        assert_eq!(second.mutations(), 0);
        assert_eq!(second.unchanged, 2);
        assert!(table.calls().is_empty());
    }

    #[tokio::test]
    async fn changed_gateway_is_replaced_and_removed_node_deleted_once() {
        let table = MockRouteTable::with_routes(vec![
            route("10.244.2.0/24", "192.168.1.99"),
            route("10.244.3.0/24", "192.168.1.13"),
            route("10.244.8.0/24", "192.168.1.18"),
        ]);
        let mut reconciler = RouteReconciler::new(table.clone(), context());
        reconciler.bootstrap().await.unwrap();

        let summary = reconciler.reconcile(&cluster()).await.unwrap();

        assert_eq!(summary.replaced, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(
            table.calls(),
            vec![
                Call::Replace(route("10.244.2.0/24", "192.168.1.12")),
                Call::Delete(route("10.244.8.0/24", "192.168.1.18")),
            ]
        );

        table.clear_calls();
        reconciler.reconcile(&cluster()).await.unwrap();

        assert!(table.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_mutation_aborts_the_pass_and_mirrors_only_successes() {
        let table = MockRouteTable::with_routes(vec![route("10.244.8.0/24", "192.168.1.18")]);
        let mut reconciler = RouteReconciler::new(table.clone(), context());
        reconciler.bootstrap().await.unwrap();

        table.fail_on(Some("10.244.3.0/24"));

        assert!(reconciler.reconcile(&cluster()).await.is_err());
        assert_eq!(
            table.calls(),
            vec![Call::Add(route("10.244.2.0/24", "192.168.1.12"))]
        );
        assert_eq!(
            reconciler.installed().cloned().collect::<Vec<_>>(),
            vec![
                route("10.244.2.0/24", "192.168.1.12"),
                route("10.244.8.0/24", "192.168.1.18"),
            ]
        );

        table.fail_on(None);
        table.clear_calls();
        let summary = reconciler.reconcile(&cluster()).await.unwrap();

        assert_eq!(summary.unchanged, 1);
        assert_eq!(
            table.calls(),
            vec![
                Call::Add(route("10.244.3.0/24", "192.168.1.13")),
                Call::Delete(route("10.244.8.0/24", "192.168.1.18")),
            ]
        );
    }

    #[tokio::test]
    async fn list_failure_aborts_before_any_mutation() {
        let table = MockRouteTable::default();
        let mut reconciler = RouteReconciler::new(table.clone(), context());

        table.state.lock().unwrap().fail_list = true;

        assert!(reconciler.reconcile(&cluster()).await.is_err());
        assert!(table.calls().is_empty());
    }

    #[tokio::test]
    async fn route_removed_behind_our_back_is_restored_after_failure() {
        let table = MockRouteTable::default();
        let mut reconciler = RouteReconciler::new(table.clone(), context());
        reconciler.bootstrap().await.unwrap();
        reconciler.reconcile(&cluster()).await.unwrap();

        table
            .state
            .lock()
            .unwrap()
            .routes
            .retain(|route| route.destination.to_string() != "10.244.2.0/24");
        table.fail_on(Some("10.244.9.0/24"));

        let mut nodes = cluster();
        nodes.push(node("worker-9", Some("10.244.9.0/24"), Some("192.168.1.19")));

        assert!(reconciler.reconcile(&nodes).await.is_err());

        table.fail_on(None);
        table.clear_calls();
        reconciler.reconcile(&nodes).await.unwrap();

        assert_eq!(
            table.calls(),
            vec![
                Call::Add(route("10.244.2.0/24", "192.168.1.12")),
                Call::Add(route("10.244.9.0/24", "192.168.1.19")),
            ]
        );
    }
}
