use simple_cni_core::{
    assignment::AssignmentError, ipam::IpamError, os::KernelError, store::StoreError,
};
use thiserror::Error;

use crate::config::ConfigError;

// well-known CNI error codes
const CODE_UNKNOWN_CONTAINER: u32 = 3;
const CODE_INVALID_ENVIRONMENT: u32 = 4;
const CODE_IO_FAILURE: u32 = 5;
const CODE_DECODE_FAILURE: u32 = 6;
const CODE_INVALID_CONFIG: u32 = 7;
const CODE_TRY_AGAIN_LATER: u32 = 11;

// plugin specific codes start at 100
const CODE_KERNEL_OPERATION: u32 = 100;
const CODE_POOL_EXHAUSTED: u32 = 101;
const CODE_INTERFACE_MISMATCH: u32 = 102;
const CODE_INTERNAL: u32 = 999;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Invalid CNI environment: {}!", .0)]
    Environment(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error(transparent)]
    Ipam(IpamError),
    #[error("Network operation failed! Reason: {}", .0)]
    Kernel(#[from] KernelError),
    #[error("Interface {} doesn't carry the {} address!", .0, .1)]
    InterfaceMismatch(String, String),
    #[error("Couldn't encode the result! Reason: {}", .0)]
    Encode(serde_json::Error),
}

impl From<IpamError> for PluginError {
    fn from(value: IpamError) -> Self {
        Self::Ipam(value)
    }
}

impl From<StoreError> for PluginError {
    fn from(value: StoreError) -> Self {
        Self::Ipam(IpamError::Store(value))
    }
}

impl PluginError {
    pub fn code(&self) -> u32 {
        match self {
            PluginError::Environment(_) => CODE_INVALID_ENVIRONMENT,
            PluginError::Config(err) => match err {
                ConfigError::Read(_) => CODE_IO_FAILURE,
                ConfigError::Decode(_) => CODE_DECODE_FAILURE,
                ConfigError::MissingField(_) => CODE_INVALID_CONFIG,
            },
            PluginError::Assignment(err) => match err {
                AssignmentError::MissingAssignment(_) => CODE_TRY_AGAIN_LATER,
                AssignmentError::Io(_) => CODE_IO_FAILURE,
                AssignmentError::Corrupt(_) => CODE_DECODE_FAILURE,
            },
            PluginError::Ipam(err) => match err {
                IpamError::InvalidSubnet(_) => CODE_INVALID_CONFIG,
                IpamError::AddressOverflow(_) => CODE_POOL_EXHAUSTED,
                IpamError::AddressPoolExhausted(_) => CODE_POOL_EXHAUSTED,
                IpamError::NotFound(_) => CODE_UNKNOWN_CONTAINER,
                IpamError::Store(StoreError::Io(_)) => CODE_IO_FAILURE,
                IpamError::Store(StoreError::Corrupt(_, _)) => CODE_DECODE_FAILURE,
            },
            PluginError::Kernel(_) => CODE_KERNEL_OPERATION,
            PluginError::InterfaceMismatch(_, _) => CODE_INTERFACE_MISMATCH,
            PluginError::Encode(_) => CODE_INTERNAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use ipnet::Ipv4Net;
    use simple_cni_core::{ipam::IpamError, store::StoreError};

    use super::PluginError;

    #[test]
    fn errors_map_to_cni_codes() {
        let exhausted: Ipv4Net = "10.244.1.0/30".parse().unwrap();

        assert_eq!(PluginError::Environment("CNI_COMMAND".into()).code(), 4);
        assert_eq!(
            PluginError::from(IpamError::AddressPoolExhausted(exhausted)).code(),
            101
        );
        assert_eq!(PluginError::from(IpamError::NotFound("c1".into())).code(), 3);
        assert_eq!(
            PluginError::from(StoreError::Io(io::Error::from(io::ErrorKind::PermissionDenied)))
                .code(),
            5
        );
    }
}
