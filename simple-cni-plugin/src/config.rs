use std::{
    io,
    path::{Path, PathBuf},
};

use log::debug;
use serde::Deserialize;
use simple_cni_core::{
    assignment::{SubnetAssignment, DEFAULT_SUBNET_FILE},
    ip::Subnet,
    ipam::{IpAllocator, IpamError},
    store::{AddressStore, DEFAULT_DATA_DIR},
    DEFAULT_MTU,
};
use thiserror::Error;

use crate::{cni::DEFAULT_CNI_VERSION, error::PluginError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read the network configuration! Reason: {}", .0)]
    Read(io::Error),
    #[error("Couldn't parse the network configuration! Reason: {}", .0)]
    Decode(serde_json::Error),
    #[error("Network configuration is missing '{}'!", .0)]
    MissingField(&'static str),
}

/// Network configuration passed by the runtime on stdin.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    #[serde(default = "default_cni_version")]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub subnet_file: Option<PathBuf>,
    #[serde(default)]
    pub mtu: Option<u32>,
}

fn default_cni_version() -> String {
    DEFAULT_CNI_VERSION.to_owned()
}

impl NetConf {
    pub fn from_slice(raw: &[u8]) -> Result<Self, ConfigError> {
        let conf: NetConf = serde_json::from_slice(raw).map_err(ConfigError::Decode)?;

        if conf.name.is_empty() {
            return Err(ConfigError::MissingField("name"));
        }

        Ok(conf)
    }

    pub fn from_reader(reader: impl io::Read) -> Result<Self, ConfigError> {
        let mut raw = Vec::new();
        let mut reader = reader;

        reader.read_to_end(&mut raw).map_err(ConfigError::Read)?;

        Self::from_slice(&raw)
    }
}

/// Runtime configuration merged with the subnet published by the daemon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginConfig {
    pub net: NetConf,
    pub assignment: SubnetAssignment,
}

impl PluginConfig {
    pub fn load(net: NetConf) -> Result<Self, PluginError> {
        let subnet_file = net
            .subnet_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SUBNET_FILE));

        debug!("Reading subnet assignment from {subnet_file:?}");

        let assignment = SubnetAssignment::read(&subnet_file)?;

        Ok(Self { net, assignment })
    }

    pub fn data_dir(&self) -> &Path {
        self.net
            .data_dir
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_DATA_DIR))
    }

    pub fn mtu(&self) -> u32 {
        self.net.mtu.unwrap_or(DEFAULT_MTU)
    }

    pub fn bridge(&self) -> &str {
        &self.assignment.bridge
    }

    pub fn allocator(&self) -> Result<IpAllocator, PluginError> {
        let subnet = Subnet::new(self.assignment.subnet).map_err(IpamError::from)?;

        Ok(IpAllocator::with_subnet(subnet))
    }

    pub fn open_store(&self) -> Result<AddressStore, PluginError> {
        Ok(AddressStore::open(self.data_dir(), &self.net.name)?)
    }
}
