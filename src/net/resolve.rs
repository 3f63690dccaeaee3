use std::{
    fmt, io,
    net::{IpAddr, Ipv4Addr, ToSocketAddrs},
    str::FromStr,
    sync::Arc,
};

use log::debug;

use crate::error::{PingError, Result};
use crate::probe::Family;

/// Address family the caller wants a hostname resolved to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Network {
    /// Whatever the resolver yields first
    #[default]
    Ip,
    Ip4,
    Ip6,
}

impl Network {
    fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Network::Ip4,
            IpAddr::V6(_) => Network::Ip6,
        }
    }

    fn accepts(self, addr: &IpAddr) -> bool {
        match self {
            Network::Ip => true,
            Network::Ip4 => addr.is_ipv4(),
            Network::Ip6 => addr.is_ipv6(),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ip" => Ok(Network::Ip),
            "ip4" => Ok(Network::Ip4),
            "ip6" => Ok(Network::Ip6),
            _ => Err(format!("unknown network {s:?} (expected ip, ip4 or ip6)")),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Ip => f.write_str("ip"),
            Network::Ip4 => f.write_str("ip4"),
            Network::Ip6 => f.write_str("ip6"),
        }
    }
}

/// Hostname lookup facility.
pub trait Resolve: Send + Sync {
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolves through the system resolver (`getaddrinfo` on unix).
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        Ok((host, 0).to_socket_addrs()?.map(|sa| sa.ip()).collect())
    }
}

/// The ping target: the text the caller supplied and the address it
/// resolved to.
#[derive(Clone)]
pub struct Target {
    addr: String,
    ip_addr: IpAddr,
    network: Network,
    // Set by the caller, as opposed to learned from a literal
    explicit_network: bool,
    resolver: Arc<dyn Resolve>,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("addr", &self.addr)
            .field("ip_addr", &self.ip_addr)
            .field("network", &self.network)
            .field("explicit_network", &self.explicit_network)
            .finish()
    }
}

impl Target {
    pub fn new(addr: &str) -> Result<Self> {
        Self::resolve(addr, Network::Ip, Arc::new(SystemResolver))
    }

    /// Resolve `addr` under `network`. `Ip4` and `Ip6` are strict filters;
    /// `Ip` lets a literal establish the preference for later hostnames.
    pub fn resolve(addr: &str, network: Network, resolver: Arc<dyn Resolve>) -> Result<Self> {
        let mut target = Self {
            addr: String::new(),
            ip_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            network,
            explicit_network: network != Network::Ip,
            resolver,
        };
        target.set_addr(addr)?;
        Ok(target)
    }

    pub fn set_addr(&mut self, addr: &str) -> Result<()> {
        let (ip, literal) = resolve(
            addr,
            self.network,
            self.explicit_network,
            self.resolver.as_ref(),
        )?;
        if literal && !self.explicit_network {
            self.network = Network::of(&ip);
        }
        self.ip_addr = ip;
        self.addr = addr.to_string();
        Ok(())
    }

    /// Skip resolution; both the text and the resolved form become `ip`.
    pub fn set_ip_addr(&mut self, ip: IpAddr) {
        self.addr = ip.to_string();
        self.ip_addr = ip;
        if !self.explicit_network {
            self.network = Network::of(&ip);
        }
    }

    /// Takes effect on the next `set_addr`. `Ip` drops any preference,
    /// including one learned from a literal.
    pub fn set_network(&mut self, network: Network) {
        self.network = network;
        self.explicit_network = network != Network::Ip;
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn ip_addr(&self) -> IpAddr {
        self.ip_addr
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn family(&self) -> Family {
        Family::of(&self.ip_addr)
    }
}

// Returns the address and whether `addr` was a literal. Without `strict`,
// `network` only orders the lookup results.
fn resolve(
    addr: &str,
    network: Network,
    strict: bool,
    resolver: &dyn Resolve,
) -> Result<(IpAddr, bool)> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        if strict && !network.accepts(&ip) {
            return Err(PingError::address(
                addr,
                format!("literal does not belong to network {network}"),
            ));
        }
        return Ok((ip, true));
    }

    // Strings shaped like literals must parse strictly; never hand them to
    // the resolver, which may accept legacy forms such as "127.1".
    if looks_like_literal(addr) {
        return Err(PingError::address(addr, "malformed IP address literal"));
    }
    if !is_valid_hostname(addr) {
        return Err(PingError::address(addr, "not a valid hostname"));
    }

    let candidates = resolver
        .lookup(addr)
        .map_err(|e| PingError::address(addr, format!("lookup failed: {e}")))?;
    debug!("Resolved {addr} to {candidates:?}");

    let preferred = candidates.iter().find(|ip| network.accepts(ip)).copied();
    let chosen = if strict {
        preferred
    } else {
        preferred.or_else(|| candidates.first().copied())
    };
    chosen
        .map(|ip| (ip, false))
        .ok_or_else(|| PingError::address(addr, format!("no {network} address found")))
}

fn looks_like_literal(addr: &str) -> bool {
    addr.contains(':') || addr.chars().all(|c| c.is_ascii_digit() || c == '.')
}

// RFC 1123 hostname: dot-separated labels of letters, digits and inner hyphens
fn is_valid_hostname(addr: &str) -> bool {
    let name = addr.strip_suffix('.').unwrap_or(addr);
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        net::{Ipv4Addr, Ipv6Addr},
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Default)]
    struct StaticResolver {
        hosts: HashMap<&'static str, Vec<IpAddr>>,
        lookups: AtomicUsize,
    }

    impl StaticResolver {
        fn with(mut self, host: &'static str, addrs: &[IpAddr]) -> Self {
            self.hosts.insert(host, addrs.to_vec());
            self
        }
    }

    impl Resolve for StaticResolver {
        fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.hosts
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))
        }
    }

    const V4: IpAddr = IpAddr::V4(Ipv4Addr::new(142, 250, 72, 100));
    const V6: IpAddr = IpAddr::V6(Ipv6Addr::new(0x2607, 0xf8b0, 0, 0, 0, 0, 0, 0x200e));

    fn resolver() -> Arc<StaticResolver> {
        Arc::new(
            StaticResolver::default()
                .with("www.google.com", &[V4, V6])
                .with("dual.example", &[V6, V4])
                .with("ipv6.google.com", &[V6])
                .with("localhost", &[IpAddr::V4(Ipv4Addr::LOCALHOST)]),
        )
    }

    #[test]
    fn test_hostname_keeps_input_text() {
        for host in ["www.google.com", "localhost"] {
            let target = Target::resolve(host, Network::Ip, resolver()).unwrap();
            assert_eq!(target.addr(), host);
            assert_ne!(target.ip_addr().to_string(), host);
            assert!(target.ip_addr().is_ipv4());
        }
    }

    #[test]
    fn test_literals_resolve_to_themselves() {
        let mut target = Target::resolve("127.0.0.1", Network::Ip, resolver()).unwrap();
        assert_eq!(target.family(), Family::V4);
        assert_eq!(target.addr(), "127.0.0.1");

        target.set_addr("::1").unwrap();
        assert_eq!(target.family(), Family::V6);
        assert_eq!(target.ip_addr(), IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn test_literal_establishes_family_preference() {
        let mut target = Target::resolve("127.0.0.1", Network::Ip, resolver()).unwrap();
        assert_eq!(target.network(), Network::Ip4);
        target.set_addr("dual.example").unwrap();
        assert_eq!(target.ip_addr(), V4);

        target.set_addr("::1").unwrap();
        assert_eq!(target.network(), Network::Ip6);
        target.set_addr("dual.example").unwrap();
        assert_eq!(target.ip_addr(), V6);

        // A learned preference still falls back to the other family
        target.set_addr("127.0.0.1").unwrap();
        target.set_addr("ipv6.google.com").unwrap();
        assert_eq!(target.ip_addr(), V6);
    }

    #[test]
    fn test_explicit_network_wins_over_literal() {
        let mut target = Target::resolve("www.google.com", Network::Ip6, resolver()).unwrap();
        assert!(target.set_addr("127.0.0.1").is_err());
        assert_eq!(target.network(), Network::Ip6);

        target.set_network(Network::Ip);
        target.set_addr("127.0.0.1").unwrap();
        assert_eq!(target.network(), Network::Ip4);
        target.set_addr("dual.example").unwrap();
        assert_eq!(target.ip_addr(), V4);
    }

    #[test]
    fn test_set_addr_switches_family() {
        let mut target = Target::resolve("www.google.com", Network::Ip, resolver()).unwrap();
        assert!(target.ip_addr().is_ipv4());
        target.set_addr("ipv6.google.com").unwrap();
        assert!(target.ip_addr().is_ipv6());
        assert_eq!(target.addr(), "ipv6.google.com");
    }

    #[test]
    fn test_network_preference() {
        let mut target = Target::resolve("www.google.com", Network::Ip6, resolver()).unwrap();
        assert_eq!(target.ip_addr(), V6);

        target.set_network(Network::Ip4);
        target.set_addr("www.google.com").unwrap();
        assert_eq!(target.ip_addr(), V4);

        let err = target.set_addr("ipv6.google.com").unwrap_err();
        assert!(matches!(err, PingError::Address { .. }));
        // A failed set_addr leaves the previous target in place
        assert_eq!(target.addr(), "www.google.com");
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        let resolver = resolver();
        for bad in ["127.0.0.0.1", "127..0.0.1", "wtf", ":::1", "ipv5.google.com"] {
            let err = Target::resolve(bad, Network::Ip, resolver.clone()).unwrap_err();
            assert!(matches!(err, PingError::Address { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn test_malformed_literals_never_reach_resolver() {
        let resolver = resolver();
        for bad in ["127.0.0.0.1", "127..0.0.1", ":::1", "1234", "-bad-.com", ""] {
            assert!(Target::resolve(bad, Network::Ip, resolver.clone()).is_err());
        }
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_ip_addr_bypasses_resolution() {
        let resolver = resolver();
        let mut target = Target::resolve("localhost", Network::Ip, resolver.clone()).unwrap();
        target.set_ip_addr(V4);
        assert_eq!(target.addr(), V4.to_string());
        assert_eq!(target.ip_addr(), V4);
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 1);
    }

    // Needs a working system resolver
    #[ignore]
    #[test]
    fn test_system_resolver_localhost() {
        let target = Target::new("localhost").unwrap();
        assert_eq!(target.addr(), "localhost");
        assert!(target.ip_addr().is_loopback());
    }
}
