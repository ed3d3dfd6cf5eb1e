use std::{path::PathBuf, time::Duration};

use ipnet::Ipv4Net;
use thiserror::Error;

use crate::cli::Cli;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cluster CIDR is required!")]
    MissingClusterCidr,
    #[error("'{}' is not a valid cluster CIDR!", .0)]
    InvalidClusterCidr(String),
    #[error("Node name is empty! Pass --node or set NODE_NAME.")]
    MissingNodeName,
    #[error("MTU {} is out of range!", .0)]
    InvalidMtu(u32),
}

/// Validated daemon settings. Built before anything touches the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaemonConfig {
    pub cluster_cidr: Ipv4Net,
    pub node_name: String,
    pub enable_iptables: bool,
    pub bridge: String,
    pub mtu: u32,
    pub subnet_file: PathBuf,
    pub resync_interval: Duration,
    pub retry_delay: Duration,
}

impl TryFrom<&Cli> for DaemonConfig {
    type Error = ConfigError;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        let cluster_cidr = match cli.cluster_cidr.as_deref() {
            None | Some("") => return Err(ConfigError::MissingClusterCidr),
            Some(cidr) => cidr
                .parse::<Ipv4Net>()
                .map_err(|_| ConfigError::InvalidClusterCidr(cidr.to_owned()))?
                .trunc(),
        };

        let node_name = cli
            .node
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(ConfigError::MissingNodeName)?
            .to_owned();

        if cli.mtu < 68 || cli.mtu > 65535 {
            return Err(ConfigError::InvalidMtu(cli.mtu));
        }

        Ok(Self {
            cluster_cidr,
            node_name,
            enable_iptables: cli.enable_iptables,
            bridge: cli.bridge.clone(),
            mtu: cli.mtu,
            subnet_file: cli.subnet_file.clone(),
            resync_interval: Duration::from_secs(cli.resync_interval),
            retry_delay: Duration::from_secs(cli.retry_delay),
        })
    }
}
