use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use thiserror::Error;

pub mod subnet;

pub use subnet::Subnet;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubnetError {
    #[error("'{}' is not a valid IPv4 subnet!", .0)]
    InvalidSubnet(String),
    #[error("Address after {} doesn't belong to the subnet!", .0)]
    AddressOverflow(Ipv4Addr),
}

/// Parses a route destination the way `ip(8)` prints it: a bare address is a
/// host route.
pub fn parse_destination(value: &str) -> Option<Ipv4Net> {
    match value.contains('/') {
        true => value.parse::<Ipv4Net>().ok().map(|net| net.trunc()),
        false => value
            .parse::<Ipv4Addr>()
            .ok()
            .and_then(|address| Ipv4Net::new(address, 32).ok()),
    }
}
