use std::{
    net::Ipv4Addr,
    path::Path,
};

use serde::Deserialize;

use super::{command_line, run, KernelError};

pub const IP_COMMAND: &str = "ip";
pub const NSENTER_COMMAND: &str = "nsenter";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LinkInfo {
    pub ifname: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub addr_info: Vec<AddrInfo>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AddrInfo {
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub local: Option<Ipv4Addr>,
    #[serde(default)]
    pub prefixlen: Option<u8>,
}

impl LinkInfo {
    pub fn has_address(&self, address: &Ipv4Addr) -> bool {
        self.addr_info
            .iter()
            .any(|info| info.local.as_ref() == Some(address))
    }
}

pub fn ip(args: &[&str]) -> Result<String, KernelError> {
    run(IP_COMMAND, args)
}

/// Runs `ip` inside the network namespace mounted at `netns`.
pub fn ip_netns(netns: &Path, args: &[&str]) -> Result<String, KernelError> {
    let net_arg = format!("--net={}", netns.to_string_lossy());
    let mut nsenter_args = vec![net_arg.as_str(), "--", IP_COMMAND];
    nsenter_args.extend_from_slice(args);

    run(NSENTER_COMMAND, &nsenter_args)
}

pub fn parse_links(command: &str, raw: &str) -> Result<Vec<LinkInfo>, KernelError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(raw).map_err(|err| KernelError::InvalidOutput(command.to_owned(), err))
}

/// IPv4 addresses of every link, or of a single `device`.
pub fn list_addresses(netns: Option<&Path>, device: Option<&str>) -> Result<Vec<LinkInfo>, KernelError> {
    let mut args = vec!["-4", "-json", "addr", "show"];

    if let Some(device) = device {
        args.extend_from_slice(&["dev", device]);
    }

    let raw = match netns {
        Some(netns) => ip_netns(netns, &args)?,
        None => ip(&args)?,
    };

    parse_links(&command_line(IP_COMMAND, &args), &raw)
}

pub fn link_exists(netns: Option<&Path>, name: &str) -> Result<bool, KernelError> {
    let args = ["link", "show", "dev", name];
    let result = match netns {
        Some(netns) => ip_netns(netns, &args),
        None => ip(&args),
    };

    match result {
        Ok(_) => Ok(true),
        Err(KernelError::CommandFailed { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

pub fn link_mac(netns: &Path, name: &str) -> Result<Option<String>, KernelError> {
    let args = ["-json", "link", "show", "dev", name];
    let raw = ip_netns(netns, &args)?;

    Ok(parse_links(&command_line(IP_COMMAND, &args), &raw)?
        .into_iter()
        .next()
        .and_then(|link| link.address))
}
