use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use log::{debug, info};
use simple_cni_core::{
    assignment::SubnetAssignment,
    ip::Subnet,
    os::{
        command_line,
        linux::{parse_links, LinkInfo, IP_COMMAND},
        KernelError,
    },
};

use crate::{command::CommandRunner, config::DaemonConfig, firewall::ensure_node_rules};

use super::{
    node::NodeIdentity,
    reconciler::{context::ReconcilerContext, error::ReconcilerError},
};

/// Prepares this node for pods: publishes its subnet, brings up the bridge
/// with the gateway address and optionally installs the firewall rules.
pub async fn prepare_node(
    client: &Client,
    config: &DaemonConfig,
    runner: &CommandRunner,
) -> Result<ReconcilerContext, ReconcilerError> {
    let node = Api::<Node>::all(client.clone())
        .get(&config.node_name)
        .await
        .map_err(ReconcilerError::KubeApiError)?;

    let identity = NodeIdentity::from_node(&node)
        .ok_or_else(|| ReconcilerError::MissingNodeData(config.node_name.clone(), "name"))?;
    let subnet = identity.subnet.ok_or_else(|| {
        ReconcilerError::MissingNodeData(identity.name.clone(), "IPv4 pod CIDR")
    })?;
    let internal_ip = identity.internal_ip.ok_or_else(|| {
        ReconcilerError::MissingNodeData(identity.name.clone(), "InternalIP address")
    })?;
    let subnet = Subnet::new(subnet)?;

    info!(
        "Node '{}' owns {subnet} and is reachable at {internal_ip}",
        identity.name
    );

    SubnetAssignment {
        subnet: subnet.net(),
        bridge: config.bridge.clone(),
    }
    .publish(&config.subnet_file)?;

    let link = find_primary_link(runner, &internal_ip)
        .await?
        .ok_or(ReconcilerError::MissingPrimaryLink(internal_ip))?;

    info!("Using {link} as the primary link");

    ensure_bridge(runner, &config.bridge, config.mtu, subnet.gateway_net()).await?;

    if config.enable_iptables {
        ensure_node_rules(runner, &config.bridge, &link, subnet.net()).await?;
    }

    Ok(ReconcilerContext {
        node_name: identity.name,
        cluster_cidr: config.cluster_cidr,
        subnet: subnet.net(),
        link,
    })
}

async fn find_primary_link(
    runner: &CommandRunner,
    address: &Ipv4Addr,
) -> Result<Option<String>, KernelError> {
    let args = ["-4", "-json", "addr", "show"];
    let raw = runner.ip(&args).await?;
    let links = parse_links(&command_line(IP_COMMAND, &args), &raw)?;

    Ok(link_with_address(links, address))
}

fn link_with_address(links: Vec<LinkInfo>, address: &Ipv4Addr) -> Option<String> {
    links
        .into_iter()
        .find(|link| link.has_address(address))
        .map(|link| link.ifname)
}

/// Creates the bridge if needed and makes sure it carries the gateway address
/// and is up.
async fn ensure_bridge(
    runner: &CommandRunner,
    name: &str,
    mtu: u32,
    gateway: Ipv4Net,
) -> Result<(), KernelError> {
    let mtu = mtu.to_string();
    let gateway = gateway.to_string();

    match runner.ip(&["link", "show", "dev", name]).await {
        Ok(_) => debug!("Bridge {name} already exists"),
        Err(KernelError::CommandFailed { .. }) => {
            info!("Creating bridge {name}...");

            match runner
                .ip(&["link", "add", "name", name, "mtu", &mtu, "type", "bridge"])
                .await
            {
                Err(err) if err.stderr_contains("File exists") => (),
                result => {
                    result?;
                }
            }
        }
        Err(err) => return Err(err),
    }

    runner.ip(&["addr", "replace", &gateway, "dev", name]).await?;
    runner.ip(&["link", "set", name, "up"]).await?;

    Ok(())
}
