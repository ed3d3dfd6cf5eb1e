use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
    str::FromStr,
};

use ipnet::Ipv4Net;
use serde::Serialize;
use simple_cni_core::bridge::VethPair;

use crate::error::PluginError;

pub const DEFAULT_CNI_VERSION: &str = "1.0.0";
pub const SUPPORTED_VERSIONS: &[&str] = &["0.3.0", "0.3.1", "0.4.0", "1.0.0"];

const COMMAND_VAR: &str = "CNI_COMMAND";
const CONTAINER_ID_VAR: &str = "CNI_CONTAINERID";
const NETNS_VAR: &str = "CNI_NETNS";
const IFNAME_VAR: &str = "CNI_IFNAME";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CniCommand {
    Add,
    Del,
    Check,
    Version,
}

impl FromStr for CniCommand {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Self::Add),
            "DEL" => Ok(Self::Del),
            "CHECK" => Ok(Self::Check),
            "VERSION" => Ok(Self::Version),
            other => Err(PluginError::Environment(format!(
                "unknown {COMMAND_VAR} '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CniArgs {
    pub command: CniCommand,
    pub container_id: String,
    pub netns: Option<PathBuf>,
    pub if_name: String,
}

impl CniArgs {
    pub fn from_env() -> Result<Self, PluginError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PluginError> {
        let require = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| PluginError::Environment(format!("{key} must be set")))
        };

        let command = require(COMMAND_VAR)?.parse()?;

        if command == CniCommand::Version {
            return Ok(Self {
                command,
                container_id: String::new(),
                netns: None,
                if_name: String::new(),
            });
        }

        let netns = lookup(NETNS_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        if netns.is_none() && command != CniCommand::Del {
            return Err(PluginError::Environment(format!("{NETNS_VAR} must be set")));
        }

        Ok(Self {
            command,
            container_id: require(CONTAINER_ID_VAR)?,
            netns,
            if_name: require(IFNAME_VAR)?,
        })
    }

    pub fn require_netns(&self) -> Result<&Path, PluginError> {
        self.netns
            .as_deref()
            .ok_or_else(|| PluginError::Environment(format!("{NETNS_VAR} must be set")))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    pub cni_version: String,
    pub interfaces: Vec<CniInterface>,
    pub ips: Vec<CniIpConfig>,
    pub routes: Vec<CniRoute>,
}

#[derive(Debug, Serialize)]
pub struct CniInterface {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CniIpConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'static str>,
    pub address: Ipv4Net,
    pub gateway: Ipv4Addr,
    pub interface: usize,
}

#[derive(Debug, Serialize)]
pub struct CniRoute {
    pub dst: Ipv4Net,
    pub gw: Ipv4Addr,
}

impl CniResult {
    pub fn new(
        cni_version: &str,
        veth: &VethPair,
        netns: &Path,
        address: Ipv4Net,
        gateway: Ipv4Addr,
    ) -> Self {
        // only pre-0.4 results carry the ip version
        let version = match cni_version.starts_with("0.3") {
            true => Some("4"),
            false => None,
        };

        Self {
            cni_version: cni_version.to_owned(),
            interfaces: vec![
                CniInterface {
                    name: veth.host_name.clone(),
                    mac: None,
                    sandbox: None,
                },
                CniInterface {
                    name: veth.container_name.clone(),
                    mac: veth.container_mac.clone(),
                    sandbox: Some(netns.to_string_lossy().into_owned()),
                },
            ],
            ips: vec![CniIpConfig {
                version,
                address,
                gateway,
                interface: 1,
            }],
            routes: vec![CniRoute {
                dst: Ipv4Net::default(),
                gw: gateway,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CniVersionInfo {
    pub cni_version: &'static str,
    pub supported_versions: &'static [&'static str],
}

impl Default for CniVersionInfo {
    fn default() -> Self {
        Self {
            cni_version: DEFAULT_CNI_VERSION,
            supported_versions: SUPPORTED_VERSIONS,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CniErrorReply {
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl CniErrorReply {
    pub fn new(cni_version: &str, error: &PluginError) -> Self {
        Self {
            cni_version: cni_version.to_owned(),
            code: error.code(),
            msg: error.to_string(),
            details: format!("{error:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::Path};

    use simple_cni_core::bridge::VethPair;

    use super::{CniArgs, CniCommand, CniResult, CniVersionInfo};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        move |key| vars.get(key).cloned()
    }

    #[test]
    fn add_requires_full_environment() {
        let args = CniArgs::from_lookup(lookup(&[
            ("CNI_COMMAND", "ADD"),
            ("CNI_CONTAINERID", "c1"),
            ("CNI_NETNS", "/var/run/netns/c1"),
            ("CNI_IFNAME", "eth0"),
        ]))
        .unwrap();

        assert_eq!(args.command, CniCommand::Add);
        assert_eq!(args.container_id, "c1");
        assert_eq!(args.require_netns().unwrap(), Path::new("/var/run/netns/c1"));

        assert!(CniArgs::from_lookup(lookup(&[
            ("CNI_COMMAND", "ADD"),
            ("CNI_CONTAINERID", "c1"),
            ("CNI_IFNAME", "eth0"),
        ]))
        .is_err());
    }

    #[test]
    fn del_tolerates_missing_netns() {
        let args = CniArgs::from_lookup(lookup(&[
            ("CNI_COMMAND", "DEL"),
            ("CNI_CONTAINERID", "c1"),
            ("CNI_NETNS", ""),
            ("CNI_IFNAME", "eth0"),
        ]))
        .unwrap();

        assert_eq!(args.netns, None);
    }

    #[test]
    fn version_needs_only_the_command() {
        let args = CniArgs::from_lookup(lookup(&[("CNI_COMMAND", "VERSION")])).unwrap();

        assert_eq!(args.command, CniCommand::Version);
        assert!(CniArgs::from_lookup(lookup(&[("CNI_COMMAND", "GC")])).is_err());
    }

    #[test]
    fn result_matches_cni_format() {
        let veth = VethPair {
            host_name: "veth1a2b3c4d".into(),
            container_name: "eth0".into(),
            container_mac: Some("0a:58:0a:f4:01:02".into()),
        };
        let result = CniResult::new(
            "1.0.0",
            &veth,
            Path::new("/var/run/netns/c1"),
            "10.244.1.2/24".parse().unwrap(),
            "10.244.1.1".parse().unwrap(),
        );
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["cniVersion"], "1.0.0");
        assert_eq!(json["ips"][0]["address"], "10.244.1.2/24");
        assert_eq!(json["ips"][0]["gateway"], "10.244.1.1");
        assert_eq!(json["ips"][0]["interface"], 1);
        assert!(json["ips"][0].get("version").is_none());
        assert_eq!(json["interfaces"][1]["sandbox"], "/var/run/netns/c1");
        assert_eq!(json["routes"][0]["dst"], "0.0.0.0/0");
    }

    #[test]
    fn legacy_results_carry_ip_version() {
        let veth = VethPair {
            host_name: "veth1a2b3c4d".into(),
            container_name: "eth0".into(),
            container_mac: None,
        };
        let result = CniResult::new(
            "0.3.1",
            &veth,
            Path::new("/var/run/netns/c1"),
            "10.244.1.2/24".parse().unwrap(),
            "10.244.1.1".parse().unwrap(),
        );

        assert_eq!(serde_json::to_value(&result).unwrap()["ips"][0]["version"], "4");
    }

    #[test]
    fn version_info_lists_supported_versions() {
        let json = serde_json::to_value(CniVersionInfo::default()).unwrap();

        assert_eq!(json["supportedVersions"][3], "1.0.0");
    }
}
