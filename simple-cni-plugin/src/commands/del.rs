use log::debug;
use simple_cni_core::bridge::delete_veth;

use crate::{cni::CniArgs, config::PluginConfig, error::PluginError};

/// Releases the container address, then removes its interface if the
/// namespace is still around. Repeated calls succeed.
pub fn del(args: &CniArgs, config: &PluginConfig) -> Result<(), PluginError> {
    let allocator = config.allocator()?;
    let store = config.open_store()?;

    allocator.release(&store, &args.container_id)?;

    match &args.netns {
        Some(netns) => delete_veth(netns, &args.if_name)?,
        None => debug!("No namespace given for '{}'", args.container_id),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use simple_cni_core::assignment::SubnetAssignment;

    use crate::{
        cni::{CniArgs, CniCommand},
        config::{NetConf, PluginConfig},
        error::PluginError,
    };

    use super::del;

    fn config(data_dir: &std::path::Path) -> PluginConfig {
        PluginConfig {
            net: NetConf {
                cni_version: "1.0.0".into(),
                name: "kubenet".into(),
                plugin_type: "simple-cni-plugin".into(),
                data_dir: Some(data_dir.to_owned()),
                subnet_file: None,
                mtu: None,
            },
            assignment: SubnetAssignment {
                subnet: "10.244.1.0/24".parse().unwrap(),
                bridge: "cni0".into(),
            },
        }
    }

    fn args(container_id: &str) -> CniArgs {
        CniArgs {
            command: CniCommand::Del,
            container_id: container_id.into(),
            netns: None,
            if_name: "eth0".into(),
        }
    }

    #[test]
    fn del_releases_the_address_and_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let allocator = config.allocator().unwrap();
        let store = config.open_store().unwrap();

        allocator.allocate(&store, "c1", "eth0").unwrap();

        del(&args("c1"), &config).unwrap();
        del(&args("c1"), &config).unwrap();

        assert!(matches!(
            allocator.check(&store, "c1").map_err(PluginError::from),
            Err(err) if err.code() == 3
        ));
    }
}
