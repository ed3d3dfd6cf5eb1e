use std::{net::Ipv4Addr, path::Path};

use ipnet::Ipv4Net;
use log::{debug, info};

use crate::os::{
    linux::{ip, ip_netns, link_exists, link_mac, list_addresses},
    KernelError,
};

const HOST_VETH_PREFIX: &str = "veth";

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VethPair {
    pub host_name: String,
    pub container_name: String,
    pub container_mac: Option<String>,
}

/// Creates the bridge if needed and makes sure it carries the gateway address
/// and is up.
pub fn ensure_bridge(name: &str, mtu: u32, gateway: Ipv4Net) -> Result<(), KernelError> {
    let mtu = mtu.to_string();
    let gateway = gateway.to_string();

    if link_exists(None, name)? {
        debug!("Bridge {name} already exists");
    } else {
        info!("Creating bridge {name}...");

        match ip(&["link", "add", "name", name, "mtu", &mtu, "type", "bridge"]) {
            Err(err) if err.stderr_contains("File exists") => (),
            result => {
                result?;
            }
        }
    }

    ip(&["addr", "replace", &gateway, "dev", name])?;
    ip(&["link", "set", name, "up"])?;

    Ok(())
}

/// Host-side name of the veth pair. The name only depends on its inputs, so
/// it comes out the same across plugin builds and hosts.
pub fn host_veth_name(container_id: &str, if_name: &str) -> String {
    let mut name = Vec::with_capacity(container_id.len() + if_name.len() + 1);
    name.extend_from_slice(container_id.as_bytes());
    name.push(0);
    name.extend_from_slice(if_name.as_bytes());

    format!("{HOST_VETH_PREFIX}{:08x}", fnv1a(&name))
}

// 32-bit FNV-1a
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Creates a veth pair with `if_name` inside `netns` and its peer attached to
/// `bridge`, then gives the container side `address` and a default route via
/// `gateway`.
pub fn setup_veth(
    netns: &Path,
    bridge: &str,
    mtu: u32,
    container_id: &str,
    if_name: &str,
    address: Ipv4Net,
    gateway: Ipv4Addr,
) -> Result<VethPair, KernelError> {
    let host_name = host_veth_name(container_id, if_name);
    let mtu = mtu.to_string();
    let address = address.to_string();
    let gateway = gateway.to_string();

    info!("Creating {if_name} <-> {host_name} veth pair...");

    ip_netns(
        netns,
        &[
            "link", "add", if_name, "mtu", &mtu, "type", "veth", "peer", "name", &host_name,
            "mtu", &mtu,
        ],
    )?;
    // pid 1 lives in the host namespace
    ip_netns(netns, &["link", "set", &host_name, "netns", "1"])?;
    ip_netns(netns, &["addr", "add", &address, "dev", if_name])?;
    ip_netns(netns, &["link", "set", if_name, "up"])?;
    ip_netns(
        netns,
        &["route", "add", "default", "via", &gateway, "dev", if_name],
    )?;

    ip(&["link", "set", &host_name, "master", bridge])?;
    ip(&["link", "set", &host_name, "up"])?;

    Ok(VethPair {
        container_mac: link_mac(netns, if_name)?,
        host_name,
        container_name: if_name.to_owned(),
    })
}

/// Removing the container side takes the host peer with it. A namespace or
/// interface that is already gone is not an error.
pub fn delete_veth(netns: &Path, if_name: &str) -> Result<(), KernelError> {
    if !netns.exists() {
        debug!("Network namespace {netns:?} is gone, nothing to delete");
        return Ok(());
    }

    match ip_netns(netns, &["link", "del", if_name]) {
        Ok(_) => {
            info!("Deleted {if_name} from {netns:?}");
            Ok(())
        }
        Err(err) if err.stderr_contains("Cannot find device") => Ok(()),
        Err(err) => Err(err),
    }
}

pub fn check_veth(netns: &Path, if_name: &str, address: &Ipv4Addr) -> Result<bool, KernelError> {
    Ok(list_addresses(Some(netns), Some(if_name))?
        .iter()
        .any(|link| link.has_address(address)))
}
