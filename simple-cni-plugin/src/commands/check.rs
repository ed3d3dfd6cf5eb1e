use simple_cni_core::bridge::check_veth;

use crate::{cni::CniArgs, config::PluginConfig, error::PluginError};

pub fn check(args: &CniArgs, config: &PluginConfig) -> Result<(), PluginError> {
    let netns = args.require_netns()?;
    let allocator = config.allocator()?;
    let store = config.open_store()?;

    let address = allocator.check(&store, &args.container_id)?;

    if !check_veth(netns, &args.if_name, &address)? {
        return Err(PluginError::InterfaceMismatch(
            args.if_name.clone(),
            address.to_string(),
        ));
    }

    Ok(())
}
