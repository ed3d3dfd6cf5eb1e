use std::fmt::Display;

use ipnet::Ipv4Net;
use log::{debug, info};
use simple_cni_core::os::KernelError;

use crate::command::CommandRunner;

const IPTABLES_COMMAND: &str = "iptables";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirewallRule {
    pub table: &'static str,
    pub chain: &'static str,
    pub rule: Vec<String>,
}

impl FirewallRule {
    fn new(table: &'static str, chain: &'static str, rule: &[&str]) -> Self {
        Self {
            table,
            chain,
            rule: rule.iter().map(|part| part.to_string()).collect(),
        }
    }

    fn args<'a>(&'a self, action: &'a str) -> Vec<&'a str> {
        let mut args = vec!["-t", self.table, action, self.chain];
        args.extend(self.rule.iter().map(String::as_str));
        args
    }
}

impl Display for FirewallRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "-t {} {} {}", self.table, self.chain, self.rule.join(" "))
    }
}

/// Forwarding through the bridge and the primary link, plus masquerading of
/// pod traffic leaving the node.
pub fn node_rules(bridge: &str, link: &str, subnet: Ipv4Net) -> Vec<FirewallRule> {
    let subnet = subnet.to_string();

    vec![
        FirewallRule::new("filter", "FORWARD", &["-i", bridge, "-j", "ACCEPT"]),
        FirewallRule::new("filter", "FORWARD", &["-i", link, "-j", "ACCEPT"]),
        FirewallRule::new("nat", "POSTROUTING", &["-s", &subnet, "-j", "MASQUERADE"]),
    ]
}

/// Appends `rule` unless an identical one is already present.
pub async fn ensure_rule(runner: &CommandRunner, rule: &FirewallRule) -> Result<(), KernelError> {
    match runner.run(IPTABLES_COMMAND, &rule.args("-C")).await {
        Ok(_) => {
            debug!("Firewall rule {rule} already present");
            return Ok(());
        }
        Err(KernelError::CommandFailed { .. }) => (),
        Err(err) => return Err(err),
    }

    info!("Adding firewall rule {rule}...");

    runner
        .run(IPTABLES_COMMAND, &rule.args("-A"))
        .await
        .map(|_| ())
}

pub async fn ensure_node_rules(
    runner: &CommandRunner,
    bridge: &str,
    link: &str,
    subnet: Ipv4Net,
) -> Result<(), KernelError> {
    for rule in node_rules(bridge, link, subnet) {
        ensure_rule(runner, &rule).await?;
    }

    Ok(())
}
