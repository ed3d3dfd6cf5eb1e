use std::path::PathBuf;

use clap::Parser;
use simple_cni_core::{assignment::DEFAULT_SUBNET_FILE, DEFAULT_BRIDGE_NAME, DEFAULT_MTU};

pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 5 * 60;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// CIDR range containing the pod subnets of every node
    #[arg(long)]
    pub cluster_cidr: Option<String>,
    /// name of the node this daemon runs on
    #[arg(long, env = "NODE_NAME")]
    pub node: Option<String>,
    /// add iptables forward and masquerade rules
    #[arg(long)]
    pub enable_iptables: bool,
    /// name of the local bridge the pods are attached to
    #[arg(long, default_value = DEFAULT_BRIDGE_NAME)]
    pub bridge: String,
    /// MTU of the local bridge
    #[arg(long, default_value_t = DEFAULT_MTU)]
    pub mtu: u32,
    /// where to publish the node subnet for the plugin
    #[arg(long, default_value = DEFAULT_SUBNET_FILE)]
    pub subnet_file: PathBuf,
    /// seconds between full route synchronizations
    #[arg(long, default_value_t = DEFAULT_RESYNC_INTERVAL_SECS)]
    pub resync_interval: u64,
    /// seconds to wait before retrying a failed synchronization
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_SECS)]
    pub retry_delay: u64,
    /// enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose_logging: bool,
}
