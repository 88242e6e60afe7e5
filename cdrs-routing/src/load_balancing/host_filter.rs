use fxhash::FxHashSet;
use std::net::{IpAddr, SocketAddr};

use crate::cluster::topology::Node;
use crate::error::{Error, Result};
use crate::load_balancing::{PlanContext, PlanStage, Tier};

/// Set of host matches. An IP address matches a node on any port, a socket address only on the
/// exact port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HostRule {
    ips: FxHashSet<IpAddr>,
    addresses: FxHashSet<SocketAddr>,
}

impl HostRule {
    fn parse(hosts: &[String]) -> Result<Self> {
        let mut rule = HostRule::default();
        for host in hosts {
            let host = host.trim();
            if let Ok(address) = host.parse::<SocketAddr>() {
                rule.addresses.insert(address);
            } else if let Ok(ip) = host.parse::<IpAddr>() {
                rule.ips.insert(ip);
            } else {
                return Err(Error::Configuration(format!(
                    "Invalid host filter entry: {host}"
                )));
            }
        }

        Ok(rule)
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.addresses.is_empty()
    }

    #[inline]
    fn matches(&self, address: SocketAddr) -> bool {
        self.addresses.contains(&address) || self.ips.contains(&address.ip())
    }
}

/// Host and datacenter whitelist/blacklist rules. A node is permitted only if it passes every
/// active rule; rules with an empty match set are inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterChain {
    host_blacklist: HostRule,
    host_whitelist: HostRule,
    datacenter_blacklist: FxHashSet<String>,
    datacenter_whitelist: FxHashSet<String>,
}

impl FilterChain {
    pub fn new(
        host_whitelist: &[String],
        host_blacklist: &[String],
        datacenter_whitelist: Vec<String>,
        datacenter_blacklist: Vec<String>,
    ) -> Result<Self> {
        Ok(FilterChain {
            host_blacklist: HostRule::parse(host_blacklist)?,
            host_whitelist: HostRule::parse(host_whitelist)?,
            datacenter_blacklist: datacenter_blacklist.into_iter().collect(),
            datacenter_whitelist: datacenter_whitelist.into_iter().collect(),
        })
    }

    /// Checks if no rule is active.
    pub fn is_empty(&self) -> bool {
        self.host_blacklist.is_empty()
            && self.host_whitelist.is_empty()
            && self.datacenter_blacklist.is_empty()
            && self.datacenter_whitelist.is_empty()
    }

    /// Evaluates rules in order: host blacklist, host whitelist, datacenter blacklist,
    /// datacenter whitelist.
    pub fn permits(&self, node: &Node) -> bool {
        let address = node.broadcast_rpc_address();
        let datacenter = node.datacenter();

        if !self.host_blacklist.is_empty() && self.host_blacklist.matches(address) {
            return false;
        }

        if !self.host_whitelist.is_empty() && !self.host_whitelist.matches(address) {
            return false;
        }

        if !self.datacenter_blacklist.is_empty() && self.datacenter_blacklist.contains(datacenter)
        {
            return false;
        }

        self.datacenter_whitelist.is_empty() || self.datacenter_whitelist.contains(datacenter)
    }
}

/// Drops candidates not permitted by the filter chain.
pub struct HostFilterStage {
    filter_chain: FilterChain,
}

impl HostFilterStage {
    pub fn new(filter_chain: FilterChain) -> Self {
        HostFilterStage { filter_chain }
    }
}

impl PlanStage for HostFilterStage {
    fn narrow(&self, tier: &mut Tier, _context: &PlanContext) {
        tier.nodes.retain(|node| self.filter_chain.permits(node));
    }
}
