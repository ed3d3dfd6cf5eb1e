use std::{fmt::Display, net::Ipv4Addr};

use async_trait::async_trait;
use ipnet::Ipv4Net;
use simple_cni_core::os::KernelError;

pub mod ip;

/// A kernel route as far as the reconciler cares about it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteEntry {
    pub destination: Ipv4Net,
    pub gateway: Option<Ipv4Addr>,
    pub device: String,
}

impl RouteEntry {
    pub fn via(destination: Ipv4Net, gateway: Ipv4Addr, device: &str) -> Self {
        Self {
            destination,
            gateway: Some(gateway),
            device: device.to_owned(),
        }
    }
}

impl Display for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.gateway {
            Some(gateway) => write!(f, "{} via {} dev {}", self.destination, gateway, self.device),
            None => write!(f, "{} dev {}", self.destination, self.device),
        }
    }
}

/// Route operations of the main routing table.
#[async_trait]
pub trait RouteTable: Send + Sync {
    async fn list(&self, device: &str) -> Result<Vec<RouteEntry>, KernelError>;
    async fn add(&self, route: &RouteEntry) -> Result<(), KernelError>;
    async fn replace(&self, route: &RouteEntry) -> Result<(), KernelError>;
    async fn delete(&self, route: &RouteEntry) -> Result<(), KernelError>;
}

#[cfg(test)]
mod tests {
    use super::RouteEntry;

    #[test]
    fn route_is_displayed_like_ip_route() {
        let route = RouteEntry::via(
            "10.244.2.0/24".parse().unwrap(),
            "192.168.1.12".parse().unwrap(),
            "eth0",
        );

        assert_eq!(route.to_string(), "10.244.2.0/24 via 192.168.1.12 dev eth0");
    }
}
