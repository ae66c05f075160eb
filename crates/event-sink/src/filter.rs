//! Negative address filter.
//!
//! Addresses inside any configured prefix are never annotated. Typical entries
//! are the overlay network the event sink itself is reached through, so that
//! machines are not annotated with their tunnel address.

use crate::error::FilterError;
use ipnet::IpNet;
use std::net::IpAddr;

/// Entry value that stands for "no prefix"; lets deployments pass an
/// explicit empty list through tooling that cannot express one.
pub const NO_PREFIX_SENTINEL: &str = "-";

/// Whether `address` lies inside any of `prefixes`.
///
/// Containment is inclusive of the network and broadcast addresses, and never
/// matches across address families.
pub fn is_excluded(address: IpAddr, prefixes: &[IpNet]) -> bool {
    prefixes.iter().any(|prefix| prefix.contains(&address))
}

/// Immutable set of excluded prefixes, built once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegativeFilter {
    prefixes: Vec<IpNet>,
}

impl NegativeFilter {
    pub fn new(prefixes: Vec<IpNet>) -> Self {
        Self { prefixes }
    }

    /// Parses CIDR entries in order, skipping [`NO_PREFIX_SENTINEL`].
    ///
    /// The first malformed entry fails the whole filter.
    pub fn parse<I, S>(entries: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefixes = Vec::new();

        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry == NO_PREFIX_SENTINEL {
                continue;
            }

            let prefix = entry.parse::<IpNet>().map_err(|source| FilterError {
                prefix: entry.to_string(),
                source,
            })?;
            prefixes.push(prefix);
        }

        Ok(Self { prefixes })
    }

    pub fn is_excluded(&self, address: IpAddr) -> bool {
        is_excluded(address, &self.prefixes)
    }

    pub fn prefixes(&self) -> &[IpNet] {
        &self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_filter_never_excludes() {
        let filter = NegativeFilter::default();
        for addr in ["10.0.0.1", "0.0.0.0", "255.255.255.255", "::1", "fe80::1"] {
            assert!(!filter.is_excluded(ip(addr)), "{addr}");
        }
    }

    #[test]
    fn test_containment_includes_network_and_broadcast() {
        let filter = NegativeFilter::parse(["10.0.0.0/8"]).unwrap();
        assert!(filter.is_excluded(ip("10.0.0.0")));
        assert!(filter.is_excluded(ip("10.1.2.3")));
        assert!(filter.is_excluded(ip("10.255.255.255")));
        assert!(!filter.is_excluded(ip("11.0.0.0")));
        assert!(!filter.is_excluded(ip("9.255.255.255")));
    }

    #[test]
    fn test_address_family_must_match() {
        let filter = NegativeFilter::parse(["0.0.0.0/0"]).unwrap();
        assert!(filter.is_excluded(ip("192.168.1.1")));
        assert!(!filter.is_excluded(ip("::ffff:192.168.1.1")));
        assert!(!filter.is_excluded(ip("fd00::1")));

        let filter = NegativeFilter::parse(["fdae:41e4:649b:9303::/64"]).unwrap();
        assert!(filter.is_excluded(ip("fdae:41e4:649b:9303::1")));
        assert!(!filter.is_excluded(ip("fdae:41e4:649b:9304::1")));
        assert!(!filter.is_excluded(ip("10.0.0.1")));
    }

    #[test]
    fn test_any_prefix_matches() {
        let filter = NegativeFilter::parse(["192.168.0.0/16", "172.16.0.0/12", "fd00::/8"]).unwrap();
        assert!(filter.is_excluded(ip("172.20.1.1")));
        assert!(filter.is_excluded(ip("fd12::1")));
        assert!(!filter.is_excluded(ip("10.0.0.1")));
    }

    #[test]
    fn test_host_prefix() {
        let filter = NegativeFilter::parse(["10.5.0.1/32"]).unwrap();
        assert!(filter.is_excluded(ip("10.5.0.1")));
        assert!(!filter.is_excluded(ip("10.5.0.2")));
    }

    #[test]
    fn test_sentinel_is_skipped() {
        let filter = NegativeFilter::parse(["-", "10.0.0.0/8", " - "]).unwrap();
        assert_eq!(filter.prefixes().len(), 1);
        assert!(NegativeFilter::parse(["-"]).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_prefix_fails() {
        for bad in ["10.0.0.0", "10.0.0.0/33", "banana", "", "fd00::/129"] {
            let err = NegativeFilter::parse(["10.0.0.0/8", bad]).unwrap_err();
            assert_eq!(err.prefix, bad);
        }
    }
}
