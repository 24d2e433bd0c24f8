//! Dial-time protection for outgoing requests: hostname resolution runs
//! through a filtering resolver that refuses to hand the connection pool any
//! blocklisted or non-global address, so redirects cannot steer the fetcher
//! into internal endpoints.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use ipnet::IpNet;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::warn;

use crate::error::UnfurlError;

/// Policy applied to every resolved address before dialing.
#[derive(Debug, Clone, Default)]
pub struct IpFilter {
    /// Refuse any address that is not global unicast (loopback, multicast,
    /// link-local, unspecified).
    pub global_unicast_only: bool,
    /// Refuse addresses contained in any of these networks.
    pub blocked_networks: Vec<IpNet>,
}

impl IpFilter {
    /// Builds a filter from CIDR strings such as `10.0.0.0/8`.
    pub fn from_cidrs<I, S>(cidrs: I, global_unicast_only: bool) -> Result<Self, UnfurlError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut blocked = Vec::new();
        for cidr in cidrs {
            let cidr = cidr.as_ref().trim();
            if cidr.is_empty() {
                continue;
            }
            let net: IpNet = cidr
                .parse()
                .map_err(|e| UnfurlError::Config(format!("bad CIDR {cidr:?}: {e}")))?;
            blocked.push(net);
        }
        Ok(IpFilter {
            global_unicast_only,
            blocked_networks: blocked,
        })
    }

    /// Checks a single resolved address against the policy.
    pub fn allows(&self, ip: IpAddr) -> bool {
        if self.global_unicast_only && !is_global_unicast(ip) {
            return false;
        }
        !self.blocked_networks.iter().any(|net| net.contains(&ip))
    }
}

/// Global unicast in the BSD socket sense: anything that is not loopback,
/// multicast, link-local or the unspecified address. Private ranges count as
/// global unicast; block those with CIDR rules instead.
fn is_global_unicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            !(v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                || is_ipv6_link_local(&v6))
        }
    }
}

fn is_ipv6_link_local(ip: &Ipv6Addr) -> bool {
    // fe80::/10
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// DNS resolver that filters every address through an [`IpFilter`] before
/// the HTTP client may dial it. Failing any single address fails the whole
/// lookup; partially-filtered answers would make connection behavior depend
/// on resolver ordering.
pub struct FilteringResolver {
    filter: Arc<IpFilter>,
}

impl FilteringResolver {
    pub fn new(filter: IpFilter) -> Self {
        FilteringResolver {
            filter: Arc::new(filter),
        }
    }
}

impl Resolve for FilteringResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let filter = self.filter.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
                .collect();
            for addr in &addrs {
                if !filter.allows(addr.ip()) {
                    warn!(host = %host, ip = %addr.ip(), "refusing to dial blocklisted address");
                    return Err(format!("address {} for host {host} is blocked", addr.ip()).into());
                }
            }
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}
