use std::path::Path;

use log::{info, warn};
use simple_cni_core::{
    bridge::{delete_veth, ensure_bridge, setup_veth},
    ipam::{Allocation, IpAllocator},
    os::KernelError,
    store::AddressStore,
};

use crate::{
    cni::{CniArgs, CniResult},
    config::PluginConfig,
    error::PluginError,
};

pub fn add(args: &CniArgs, config: &PluginConfig) -> Result<CniResult, PluginError> {
    let netns = args.require_netns()?;
    let allocator = config.allocator()?;
    let store = config.open_store()?;
    let subnet = allocator.subnet();

    let lease = allocator.allocate_lease(&store, &args.container_id, &args.if_name)?;
    let address = lease.address;

    let veth = with_rollback(&allocator, &store, args, netns, lease, || {
        ensure_bridge(config.bridge(), config.mtu(), subnet.gateway_net())?;

        setup_veth(
            netns,
            config.bridge(),
            config.mtu(),
            &args.container_id,
            &args.if_name,
            subnet.interface_net(address),
            subnet.gateway(),
        )
    })?;

    info!(
        "Attached '{}' to {} with {address}",
        args.container_id,
        config.bridge()
    );

    Ok(CniResult::new(
        &config.net.cni_version,
        &veth,
        netns,
        subnet.interface_net(address),
        subnet.gateway(),
    ))
}

/// Runs `attach`, undoing what this ADD created if it fails. A lease the
/// container already owned before the call is kept.
fn with_rollback<T>(
    allocator: &IpAllocator,
    store: &AddressStore,
    args: &CniArgs,
    netns: &Path,
    lease: Allocation,
    attach: impl FnOnce() -> Result<T, KernelError>,
) -> Result<T, PluginError> {
    let err = match attach() {
        Ok(attached) => return Ok(attached),
        Err(err) => err,
    };

    if !lease.created {
        warn!(
            "Keeping {} of '{}' after a failed ADD",
            lease.address, args.container_id
        );
        return Err(err.into());
    }

    // an interface that already existed isn't ours to remove
    if !err.stderr_contains("File exists") {
        if let Err(cleanup_err) = delete_veth(netns, &args.if_name) {
            warn!(
                "Couldn't remove {} after a failed ADD! {cleanup_err}",
                args.if_name
            );
        }
    }

    if let Err(release_err) = allocator.release(store, &args.container_id) {
        warn!(
            "Couldn't release {} after a failed ADD! {release_err}",
            lease.address
        );
    }

    Err(err.into())
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, path::Path};

    use simple_cni_core::{
        ipam::{IpAllocator, IpamError},
        os::KernelError,
        store::AddressStore,
    };

    use crate::{
        cni::{CniArgs, CniCommand},
        error::PluginError,
    };

    use super::with_rollback;

    const MISSING_NETNS: &str = "/var/run/netns/does-not-exist";

    fn args(container_id: &str) -> CniArgs {
        CniArgs {
            command: CniCommand::Add,
            container_id: container_id.into(),
            netns: Some(MISSING_NETNS.into()),
            if_name: "eth0".into(),
        }
    }

    fn failed_attach() -> Result<(), KernelError> {
        Err(KernelError::CommandFailed {
            command: "ip link add eth0 type veth".into(),
            stderr: "RTNETLINK answers: Operation not permitted".into(),
        })
    }

    #[test]
    fn failed_attach_releases_a_fresh_lease() {
        let dir = tempfile::tempdir().unwrap();
        let store = AddressStore::open(dir.path(), "kubenet").unwrap();
        let allocator = IpAllocator::new("10.244.1.0/24").unwrap();
        let lease = allocator.allocate_lease(&store, "c1", "eth0").unwrap();

        let result = with_rollback(
            &allocator,
            &store,
            &args("c1"),
            Path::new(MISSING_NETNS),
            lease,
            failed_attach,
        );

        assert!(matches!(result, Err(PluginError::Kernel(_))));
        assert!(matches!(
            allocator.check(&store, "c1"),
            Err(IpamError::NotFound(_))
        ));
    }

    #[test]
    fn failed_attach_keeps_an_existing_lease() {
        let dir = tempfile::tempdir().unwrap();
        let store = AddressStore::open(dir.path(), "kubenet").unwrap();
        let allocator = IpAllocator::new("10.244.1.0/24").unwrap();

        allocator.allocate(&store, "c1", "eth0").unwrap();
        let lease = allocator.allocate_lease(&store, "c1", "eth0").unwrap();
        assert!(!lease.created);

        let result = with_rollback(
            &allocator,
            &store,
            &args("c1"),
            Path::new(MISSING_NETNS),
            lease,
            failed_attach,
        );

        assert!(matches!(result, Err(PluginError::Kernel(_))));
        assert_eq!(
            allocator.check(&store, "c1").unwrap(),
            Ipv4Addr::new(10, 244, 1, 2)
        );
    }

    #[test]
    fn successful_attach_keeps_the_lease() {
        let dir = tempfile::tempdir().unwrap();
        let store = AddressStore::open(dir.path(), "kubenet").unwrap();
        let allocator = IpAllocator::new("10.244.1.0/24").unwrap();
        let lease = allocator.allocate_lease(&store, "c1", "eth0").unwrap();

        let attached = with_rollback(
            &allocator,
            &store,
            &args("c1"),
            Path::new(MISSING_NETNS),
            lease,
            || Ok("veth"),
        )
        .unwrap();

        assert_eq!(attached, "veth");
        assert_eq!(allocator.check(&store, "c1").unwrap(), lease.address);
    }
}
