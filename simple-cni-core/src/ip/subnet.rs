use std::{
    fmt::{Display, Formatter},
    net::Ipv4Addr,
    str::FromStr,
};

use ipnet::Ipv4Net;

use super::SubnetError;

/// A node-owned IPv4 block with its reserved gateway.
///
/// The gateway is the first address after the network address. For prefixes
/// up to /30 the broadcast address doesn't belong to the host range, so it is
/// never handed out either.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subnet {
    net: Ipv4Net,
    gateway: Ipv4Addr,
}

impl Subnet {
    pub fn new(net: Ipv4Net) -> Result<Self, SubnetError> {
        let net = net.trunc();
        let gateway = next_host(&net, net.network())
            .map_err(|_| SubnetError::InvalidSubnet(net.to_string()))?;

        Ok(Self { net, gateway })
    }

    pub fn net(&self) -> Ipv4Net {
        self.net
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    pub fn contains(&self, address: &Ipv4Addr) -> bool {
        self.net.contains(address)
    }

    /// Whether `address` can be assigned to an interface: inside the subnet
    /// and neither the network nor the broadcast address.
    pub fn is_host(&self, address: &Ipv4Addr) -> bool {
        self.contains(address)
            && *address != self.net.network()
            && (self.prefix_len() >= 31 || *address != self.net.broadcast())
    }

    /// `address` with this subnet's prefix, as assigned to an interface.
    pub fn interface_net(&self, address: Ipv4Addr) -> Ipv4Net {
        // prefix_len comes from a valid network, so this can't fail
        Ipv4Net::new(address, self.net.prefix_len()).unwrap_or(self.net)
    }

    pub fn gateway_net(&self) -> Ipv4Net {
        self.interface_net(self.gateway)
    }

    pub fn next_address(&self, address: Ipv4Addr) -> Result<Ipv4Addr, SubnetError> {
        next_host(&self.net, address)
    }
}

fn next_host(net: &Ipv4Net, address: Ipv4Addr) -> Result<Ipv4Addr, SubnetError> {
    let next = u32::from(address)
        .checked_add(1)
        .map(Ipv4Addr::from)
        .ok_or(SubnetError::AddressOverflow(address))?;

    if !net.contains(&next) {
        return Err(SubnetError::AddressOverflow(address));
    }

    if net.prefix_len() < 31 && next == net.broadcast() {
        return Err(SubnetError::AddressOverflow(address));
    }

    Ok(next)
}

impl FromStr for Subnet {
    type Err = SubnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net = s
            .trim()
            .parse::<Ipv4Net>()
            .map_err(|_| SubnetError::InvalidSubnet(s.to_owned()))?;

        Self::new(net)
    }
}

impl Display for Subnet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", self.net))
    }
}

impl From<Subnet> for Ipv4Net {
    fn from(value: Subnet) -> Self {
        value.net
    }
}
