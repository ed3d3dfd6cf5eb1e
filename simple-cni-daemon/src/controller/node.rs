use std::{collections::HashMap, net::Ipv4Addr, time::Duration};

use futures::{Future, StreamExt, TryStreamExt};
use ipnet::Ipv4Net;
use k8s_openapi::api::core::v1::{Node, NodeSpec, NodeStatus};
use kube::{
    runtime::{
        reflector::{self, reflector, Store},
        watcher::{watcher, Config, Event},
    },
    Api, Client, ResourceExt,
};
use log::{debug, warn};
use tokio::sync::watch::{self, Receiver};

const INTERNAL_IP_ADDRESS_TYPE: &str = "InternalIP";
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// The parts of a node that decide its route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    pub name: String,
    pub subnet: Option<Ipv4Net>,
    pub internal_ip: Option<Ipv4Addr>,
}

impl NodeIdentity {
    pub fn from_node(node: &Node) -> Option<Self> {
        let name = node.metadata.name.clone()?;
        let subnet = node.spec.as_ref().and_then(|spec| {
            spec.pod_cidr
                .iter()
                .chain(spec.pod_cidrs.iter().flatten())
                .find_map(|cidr| cidr.parse::<Ipv4Net>().ok())
                .map(|net| net.trunc())
        });
        let internal_ip = node
            .status
            .as_ref()
            .and_then(|status| status.addresses.as_ref())
            .and_then(|addresses| {
                addresses
                    .iter()
                    .filter(|address| address.type_ == INTERNAL_IP_ADDRESS_TYPE)
                    .find_map(|address| address.address.parse::<Ipv4Addr>().ok())
            });

        Some(Self {
            name,
            subnet,
            internal_ip,
        })
    }
}

/// Whether a node change can move a subnet to another gateway. A change that
/// can't be classified always counts.
pub fn should_reconcile(previous: Option<&NodeIdentity>, current: Option<&NodeIdentity>) -> bool {
    match (previous, current) {
        (Some(previous), Some(current)) => {
            previous.subnet != current.subnet || previous.internal_ip != current.internal_ip
        }
        _ => true,
    }
}

/// Tracks the last seen identity of every node and tells which watch events
/// are worth a reconcile pass. Nothing passes before the first full list.
#[derive(Debug, Default)]
pub struct NodeChangeFilter {
    nodes: HashMap<String, NodeIdentity>,
    listed: bool,
}

impl NodeChangeFilter {
    pub fn observe(&mut self, event: &Event<Node>) -> bool {
        match event {
            Event::Applied(node) => {
                let current = NodeIdentity::from_node(node);
                let previous = match &current {
                    Some(identity) => self.nodes.insert(identity.name.clone(), identity.clone()),
                    None => None,
                };

                self.listed && should_reconcile(previous.as_ref(), current.as_ref())
            }
            Event::Deleted(node) => {
                let previous = self.nodes.remove(&node.name_any());

                self.listed && should_reconcile(previous.as_ref(), None)
            }
            Event::Restarted(nodes) => {
                self.nodes = nodes
                    .iter()
                    .filter_map(NodeIdentity::from_node)
                    .map(|identity| (identity.name.clone(), identity))
                    .collect();
                self.listed = true;

                true
            }
        }
    }
}

fn strip_node(node: &mut Node) {
    node.managed_fields_mut().clear();
    node.annotations_mut().clear();
    node.labels_mut().clear();
    node.finalizers_mut().clear();
    node.owner_references_mut().clear();

    node.spec = node.spec.take().map(|spec| NodeSpec {
        pod_cidr: spec.pod_cidr,
        pod_cidrs: spec.pod_cidrs,
        ..Default::default()
    });

    let addresses = node
        .status
        .as_ref()
        .and_then(|status| status.addresses.to_owned());

    node.status = Some(NodeStatus {
        addresses,
        ..Default::default()
    })
}

pub fn start_node_reflector(
    client: &Client,
) -> (impl Future<Output = ()>, Store<Node>, Receiver<()>) {
    let (tx, rx) = watch::channel::<()>(());
    let watcher = watcher(Api::<Node>::all(client.clone()), Config::default())
        .map_ok(|event| event.modify(strip_node));
    let (store, writer) = reflector::store();
    let mut filter = NodeChangeFilter::default();

    let reflector = reflector(writer, watcher).for_each(move |event| {
        let failed = match event {
            Ok(event) => {
                if filter.observe(&event) && tx.send(()).is_err() {
                    debug!("Route synchronizer is gone, dropping node change");
                }
                false
            }
            Err(err) => {
                warn!("Node watch failed! {err}");
                true
            }
        };

        async move {
            if failed {
                tokio::time::sleep(WATCH_RETRY_DELAY).await;
            }
        }
    });

    (reflector, store, rx)
}
