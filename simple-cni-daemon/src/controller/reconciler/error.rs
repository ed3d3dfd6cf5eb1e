use std::net::Ipv4Addr;

use simple_cni_core::{assignment::AssignmentError, ip::SubnetError, os::KernelError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Couldn't retrieve the Node! Reason: {}", .0)]
    KubeApiError(kube::Error),
    #[error("Node '{}' has no {}!", .0, .1)]
    MissingNodeData(String, &'static str),
    #[error("No link carries the {} node address!", .0)]
    MissingPrimaryLink(Ipv4Addr),
    #[error("Node subnet is unusable! Reason: {}", .0)]
    InvalidSubnet(#[from] SubnetError),
    #[error("Couldn't publish the node subnet! Reason: {}", .0)]
    Assignment(#[from] AssignmentError),
    #[error("Kernel operation failed! Reason: {}", .0)]
    KernelOperationError(#[from] KernelError),
}
