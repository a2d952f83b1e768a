use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

pub const DEFAULT_LOCAL_NETWORKS: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "::1/128",
    "fc00::/7",
];

/// An address block in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = prefix_mask(self.prefix_len, 32) as u32;
                u32::from(net) & mask == u32::from(*addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = prefix_mask(self.prefix_len, 128);
                u128::from(net) & mask == u128::from(*addr) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask(prefix_len: u8, width: u32) -> u128 {
    if prefix_len == 0 {
        return 0;
    }
    let all = if width == 128 { u128::MAX } else { (1u128 << width) - 1 };
    all & !((1u128 << (width - u32::from(prefix_len))) - 1)
}

impl FromStr for Cidr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (s, None),
        };
        let network: IpAddr = addr
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid network address '{}': {}", addr, e))?;
        let width = if network.is_ipv4() { 32 } else { 128 };
        let prefix_len = match len {
            Some(len) => len
                .trim()
                .parse::<u8>()
                .map_err(|e| anyhow::anyhow!("Invalid prefix length '{}': {}", len, e))?,
            None => width,
        };
        if prefix_len > width {
            anyhow::bail!("Prefix length {} exceeds {} bits in '{}'", prefix_len, width, s);
        }
        Ok(Cidr {
            network,
            prefix_len,
        })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Parse an address as stored in the event log; a bare address or the network part of a block.
pub fn parse_address(text: &str) -> Option<IpAddr> {
    let addr = text.split_once('/').map_or(text, |(addr, _)| addr);
    addr.trim().parse().ok()
}

pub fn is_local(addr: &IpAddr, local_networks: &[Cidr]) -> bool {
    local_networks.iter().any(|net| net.contains(addr))
}

pub fn default_local_networks() -> Vec<Cidr> {
    DEFAULT_LOCAL_NETWORKS
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_block_membership() {
        let net: Cidr = "128.175.0.0/16".parse().unwrap();
        assert!(net.contains(&"128.175.13.4".parse().unwrap()));
        assert!(!net.contains(&"128.176.0.1".parse().unwrap()));
        assert!(!net.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn odd_prefix_lengths() {
        let net: Cidr = "172.16.0.0/12".parse().unwrap();
        assert!(net.contains(&"172.31.255.255".parse().unwrap()));
        assert!(!net.contains(&"172.32.0.0".parse().unwrap()));

        let everything: Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(everything.contains(&"203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn ipv6_blocks() {
        let net: Cidr = "fc00::/7".parse().unwrap();
        assert!(net.contains(&"fd12:3456::1".parse().unwrap()));
        assert!(!net.contains(&"2001:db8::1".parse().unwrap()));

        let host: Cidr = "::1".parse().unwrap();
        assert_eq!(host.to_string(), "::1/128");
    }

    #[test]
    fn rejects_malformed_blocks() {
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("not-an-address/8".parse::<Cidr>().is_err());
        assert!("10.0.0.0/x".parse::<Cidr>().is_err());
    }

    #[test]
    fn address_parsing_accepts_blocks() {
        assert_eq!(parse_address("192.0.2.7/32"), Some("192.0.2.7".parse().unwrap()));
        assert_eq!(parse_address(" 192.0.2.7 "), Some("192.0.2.7".parse().unwrap()));
        assert_eq!(parse_address("garbage"), None);
    }

    #[test]
    fn defaults_cover_private_ranges() {
        let nets = default_local_networks();
        assert_eq!(nets.len(), DEFAULT_LOCAL_NETWORKS.len());
        assert!(is_local(&"10.1.2.3".parse().unwrap(), &nets));
        assert!(is_local(&"192.168.4.4".parse().unwrap(), &nets));
        assert!(!is_local(&"8.8.8.8".parse().unwrap(), &nets));
    }
}
