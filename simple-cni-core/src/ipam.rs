use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use log::{debug, info};
use thiserror::Error;

use crate::{
    ip::{Subnet, SubnetError},
    store::{AddressStore, LockedStore, StoreError},
};

#[derive(Debug, Error)]
pub enum IpamError {
    #[error("'{}' is not a valid IPv4 subnet!", .0)]
    InvalidSubnet(String),
    #[error("Address after {} doesn't belong to the subnet!", .0)]
    AddressOverflow(Ipv4Addr),
    #[error("The address pool of {} was exhausted!", .0)]
    AddressPoolExhausted(Ipv4Net),
    #[error("Container '{}' has no address assigned!", .0)]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SubnetError> for IpamError {
    fn from(value: SubnetError) -> Self {
        match value {
            SubnetError::InvalidSubnet(subnet) => Self::InvalidSubnet(subnet),
            SubnetError::AddressOverflow(address) => Self::AddressOverflow(address),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub address: Ipv4Addr,
    pub created: bool,
}

/// Hands out addresses of one subnet, round-robin from the last allocation.
///
/// Every operation takes the store lock for its whole duration, so concurrent
/// plugin invocations against the same network see each other's writes.
#[derive(Clone, Copy, Debug)]
pub struct IpAllocator {
    subnet: Subnet,
}

impl IpAllocator {
    pub fn new(subnet: &str) -> Result<Self, IpamError> {
        Ok(Self::with_subnet(subnet.parse()?))
    }

    pub fn with_subnet(subnet: Subnet) -> Self {
        Self { subnet }
    }

    pub fn subnet(&self) -> &Subnet {
        &self.subnet
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.subnet.gateway()
    }

    pub fn next_address(&self, address: Ipv4Addr) -> Result<Ipv4Addr, IpamError> {
        Ok(self.subnet.next_address(address)?)
    }

    pub fn allocate(
        &self,
        store: &AddressStore,
        container_id: &str,
        if_name: &str,
    ) -> Result<Ipv4Addr, IpamError> {
        Ok(self.allocate_lease(store, container_id, if_name)?.address)
    }

    /// Like [`IpAllocator::allocate`], but tells whether this call created
    /// the lease or found one the container already owned.
    pub fn allocate_lease(
        &self,
        store: &AddressStore,
        container_id: &str,
        if_name: &str,
    ) -> Result<Allocation, IpamError> {
        let mut locked = store.lock()?;

        if let Some(address) = locked.lookup_by_container(container_id) {
            debug!("Container '{container_id}' already owns {address}");
            return Ok(Allocation {
                address,
                created: false,
            });
        }

        let address = self.find_free_address(&locked)?;

        locked.add(address, container_id, if_name)?;

        info!("Allocated {address} address for '{container_id}'!");

        Ok(Allocation {
            address,
            created: true,
        })
    }

    pub fn release(&self, store: &AddressStore, container_id: &str) -> Result<(), IpamError> {
        let mut locked = store.lock()?;

        match locked.remove(container_id)? {
            Some(ip) => info!("Released {ip} address of '{container_id}'!"),
            None => debug!("Container '{container_id}' had no address to release"),
        }

        Ok(())
    }

    pub fn check(&self, store: &AddressStore, container_id: &str) -> Result<Ipv4Addr, IpamError> {
        store
            .lock()?
            .lookup_by_container(container_id)
            .ok_or_else(|| IpamError::NotFound(container_id.to_owned()))
    }

    /// Walks forward from the last allocated address, wrapping around to the
    /// gateway once. The starting point is the last address the walk looks at.
    fn find_free_address(&self, store: &LockedStore) -> Result<Ipv4Addr, IpamError> {
        let gateway = self.subnet.gateway();
        let start = store
            .last()
            .filter(|last| self.subnet.is_host(last) && *last != gateway)
            .unwrap_or(gateway);
        let mut current = start;
        let mut wrapped = false;

        loop {
            let next = match self.subnet.next_address(current) {
                Ok(next) => next,
                Err(_) if start != gateway && !wrapped => {
                    debug!("Reached the end of {}, wrapping around", self.subnet);

                    wrapped = true;
                    current = gateway;
                    continue;
                }
                Err(_) => break,
            };

            if next != gateway && !store.contains(&next) {
                return Ok(next);
            }

            if next == start {
                break;
            }

            current = next;
        }

        Err(IpamError::AddressPoolExhausted(self.subnet.net()))
    }
}
