use std::{fs, io, path::Path};

use ipnet::Ipv4Net;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::durable::write_atomically;

pub const DEFAULT_SUBNET_FILE: &str = "/run/simple-cni-plugin/subnet.json";

#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("No subnet assignment found at {:?}! Is the daemon running on this node?", .0)]
    MissingAssignment(String),
    #[error("Subnet assignment I/O failed! Reason: {}", .0)]
    Io(io::Error),
    #[error("Subnet assignment is corrupted! Reason: {}", .0)]
    Corrupt(serde_json::Error),
}

/// The subnet and bridge of this node, published by the daemon for plugin
/// invocations that have no cluster access.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubnetAssignment {
    pub subnet: Ipv4Net,
    pub bridge: String,
}

impl SubnetAssignment {
    pub fn publish(&self, path: &Path) -> Result<(), AssignmentError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(AssignmentError::Io)?;
        }

        let raw = serde_json::to_vec(self).map_err(AssignmentError::Corrupt)?;
        write_atomically(path, &raw).map_err(AssignmentError::Io)?;

        info!("Published {} subnet of {} bridge to {path:?}", self.subnet, self.bridge);

        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, AssignmentError> {
        let raw = fs::read(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => {
                AssignmentError::MissingAssignment(path.to_string_lossy().into_owned())
            }
            _ => AssignmentError::Io(err),
        })?;

        serde_json::from_slice(&raw).map_err(AssignmentError::Corrupt)
    }
}
