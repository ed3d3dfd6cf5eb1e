use ipnet::Ipv4Net;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerContext {
    pub node_name: String,
    pub cluster_cidr: Ipv4Net,
    pub subnet: Ipv4Net,
    pub link: String,
}

impl ReconcilerContext {
    /// Routes inside the cluster range on the primary link belong to us,
    /// except the one for our own subnet.
    pub fn owns_destination(&self, destination: &Ipv4Net) -> bool {
        self.cluster_cidr.contains(destination) && *destination != self.subnet
    }
}
