use std::net::Ipv4Addr;

use async_trait::async_trait;
use log::warn;
use serde::Deserialize;
use simple_cni_core::{
    ip::parse_destination,
    os::{command_line, linux::IP_COMMAND, KernelError},
};

use crate::command::CommandRunner;

use super::{RouteEntry, RouteTable};

#[derive(Debug, Deserialize)]
struct RawRoute {
    dst: String,
    #[serde(default)]
    gateway: Option<Ipv4Addr>,
    #[serde(default)]
    dev: Option<String>,
}

/// Routes through `ip(8)`, every call bounded by a deadline.
pub struct IpRouteTable {
    runner: CommandRunner,
}

impl IpRouteTable {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn mutate(&self, verb: &str, route: &RouteEntry) -> Result<(), KernelError> {
        let destination = route.destination.to_string();
        let gateway = route.gateway.map(|gateway| gateway.to_string());
        let mut args = vec!["-4", "route", verb, destination.as_str()];

        if let Some(gateway) = gateway.as_deref() {
            args.extend_from_slice(&["via", gateway]);
        }

        args.extend_from_slice(&["dev", route.device.as_str()]);

        self.runner.ip(&args).await.map(|_| ())
    }
}

#[async_trait]
impl RouteTable for IpRouteTable {
    async fn list(&self, device: &str) -> Result<Vec<RouteEntry>, KernelError> {
        let args = ["-4", "-json", "route", "show", "dev", device];
        let raw = self.runner.ip(&args).await?;

        parse_routes(&command_line(IP_COMMAND, &args), &raw, device)
    }

    async fn add(&self, route: &RouteEntry) -> Result<(), KernelError> {
        self.mutate("add", route).await
    }

    async fn replace(&self, route: &RouteEntry) -> Result<(), KernelError> {
        self.mutate("replace", route).await
    }

    async fn delete(&self, route: &RouteEntry) -> Result<(), KernelError> {
        self.mutate("del", route).await
    }
}

/// `ip -json route show dev X` leaves out the device, so `device` fills it in.
/// The default route is skipped.
pub fn parse_routes(command: &str, raw: &str, device: &str) -> Result<Vec<RouteEntry>, KernelError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let routes: Vec<RawRoute> = serde_json::from_str(raw)
        .map_err(|err| KernelError::InvalidOutput(command.to_owned(), err))?;

    Ok(routes
        .into_iter()
        .filter_map(|route| match parse_destination(&route.dst) {
            Some(destination) => Some(RouteEntry {
                destination,
                gateway: route.gateway,
                device: route.dev.unwrap_or_else(|| device.to_owned()),
            }),
            None => {
                if route.dst != "default" {
                    warn!("Skipping route with unexpected destination '{}'", route.dst);
                }
                None
            }
        })
        .collect())
}
