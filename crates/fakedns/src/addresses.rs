//! The address resolution cache: which IPv4 address a hostname has,
//! and which hostname an address has.
//!
//! Static tables from the configuration always win.  Anything else
//! gets the configured default, unless dynamic assignment is on, in
//! which case each new hostname is given a random address from a
//! range and keeps it for the rest of the run.

use rand::Rng;
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::metrics::*;
use crate::settings::Settings;
use crate::store::{self, SharedMappingStore};

/// An inclusive range of IPv4 addresses, written `min-max`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AddressRange {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl AddressRange {
    /// `None` if `start` comes after `end`.
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        (self.start..=self.end).contains(&address)
    }

    /// Pick an address uniformly at random, treating addresses as
    /// big-endian 32 bit integers.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Ipv4Addr {
        Ipv4Addr::from(rng.gen_range(u32::from(self.start)..=u32::from(self.end)))
    }
}

impl Default for AddressRange {
    fn default() -> Self {
        Self {
            start: Ipv4Addr::new(10, 10, 10, 0),
            end: Ipv4Addr::new(10, 10, 10, 255),
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for AddressRange {
    type Err = AddressRangeFromStr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s.split_once('-').ok_or(AddressRangeFromStr::NoSeparator)?;
        let start = start
            .trim()
            .parse()
            .map_err(|_| AddressRangeFromStr::BadAddress)?;
        let end = end
            .trim()
            .parse()
            .map_err(|_| AddressRangeFromStr::BadAddress)?;
        Self::new(start, end).ok_or(AddressRangeFromStr::Backwards)
    }
}

/// Errors that can arise when converting a `&str` into an
/// `AddressRange`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, thiserror::Error)]
pub enum AddressRangeFromStr {
    #[error("expected two addresses separated by '-'")]
    NoSeparator,

    #[error("not a dotted-quad IPv4 address")]
    BadAddress,

    #[error("first address is after the second")]
    Backwards,
}

impl<'de> Deserialize<'de> for AddressRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AddressRangeVisitor;

        impl Visitor<'_> for AddressRangeVisitor {
            type Value = AddressRange;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an address range like 10.10.10.0-10.10.10.255")
            }

            fn visit_str<E>(self, v: &str) -> Result<AddressRange, E>
            where
                E: de::Error,
            {
                v.parse()
                    .map_err(|_| de::Error::invalid_value(Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_str(AddressRangeVisitor)
    }
}

/// Where new hostnames get their addresses from, and where those
/// addresses are remembered.
#[derive(Debug, Clone)]
pub struct DynamicAssignment {
    pub store: SharedMappingStore,
    pub range: AddressRange,
}

#[derive(Debug, Clone)]
pub struct AddressCache {
    host_to_ip: HashMap<String, Ipv4Addr>,
    ip_to_host: HashMap<Ipv4Addr, String>,
    default_ip: Ipv4Addr,
    default_hostname: String,
    dynamic: Option<DynamicAssignment>,
}

impl AddressCache {
    /// A cache with the static tables and defaults from the settings,
    /// and no dynamic assignment.  If a table names the same key twice
    /// the first entry is used.
    pub fn new(settings: &Settings) -> Self {
        let mut host_to_ip = HashMap::with_capacity(settings.static_host_to_ip.len());
        for entry in &settings.static_host_to_ip {
            host_to_ip
                .entry(entry.name.hostname.to_ascii_lowercase())
                .or_insert(entry.address);
        }

        let mut ip_to_host = HashMap::with_capacity(settings.static_ip_to_host.len());
        for entry in &settings.static_ip_to_host {
            ip_to_host
                .entry(entry.address)
                .or_insert_with(|| entry.name.hostname.to_ascii_lowercase());
        }

        Self {
            host_to_ip,
            ip_to_host,
            default_ip: settings.default_ip,
            default_hostname: settings.default_fqdn(),
            dynamic: None,
        }
    }

    #[must_use]
    pub fn with_dynamic_assignment(self, store: SharedMappingStore, range: AddressRange) -> Self {
        Self {
            dynamic: Some(DynamicAssignment { store, range }),
            ..self
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.is_some()
    }

    /// The address of a hostname.  With dynamic assignment on, an
    /// unseen hostname is given a new random address, which is
    /// written to the store.
    ///
    /// # Errors
    ///
    /// If a new assignment cannot be written to the store.
    pub fn resolve_address(&self, hostname: &str) -> Result<Ipv4Addr, store::Error> {
        let hostname = hostname.to_ascii_lowercase();

        if let Some(address) = self.host_to_ip.get(&hostname) {
            return Ok(*address);
        }

        let Some(dynamic) = &self.dynamic else {
            return Ok(self.default_ip);
        };

        let assignment = dynamic
            .store
            .insert_if_absent(&hostname, || dynamic.range.pick(&mut rand::thread_rng()))?;
        if assignment.is_new() {
            tracing::debug!(%hostname, address = %assignment.address(), "assigned address");
            DYNAMIC_ASSIGNMENTS_TOTAL.inc();
        } else {
            STORE_HIT_TOTAL.inc();
        }

        Ok(assignment.address())
    }

    /// The hostname of the address encoded in a reverse lookup name,
    /// like `5.0.0.10.in-addr.arpa`.  Names which do not start with
    /// four octets get the default hostname.
    pub fn resolve_hostname(&self, reverse_name: &str) -> String {
        let Some(address) = reverse_name_to_address(&reverse_name.to_ascii_lowercase()) else {
            return self.default_hostname.clone();
        };

        if let Some(hostname) = self.ip_to_host.get(&address) {
            return hostname.clone();
        }

        if let Some(dynamic) = &self.dynamic {
            if let Some(hostname) = dynamic.store.lookup_hostname(address) {
                STORE_HIT_TOTAL.inc();
                return hostname;
            }
        }

        self.default_hostname.clone()
    }
}

/// Reverse the first four labels of a reverse lookup name into an
/// address.  Anything after them (normally `in-addr.arpa`) is
/// ignored.
pub fn reverse_name_to_address(reverse_name: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut labels = reverse_name.split('.');
    for octet in octets.iter_mut().rev() {
        *octet = labels.next()?.parse().ok()?;
    }
    Some(Ipv4Addr::from(octets))
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::settings::{Name, StaticHost};

    fn static_host(name: &str, address: Ipv4Addr) -> StaticHost {
        StaticHost {
            name: Name {
                hostname: name.to_string(),
            },
            address,
        }
    }

    fn settings() -> Settings {
        Settings {
            default_ip: Ipv4Addr::new(127, 0, 0, 2),
            static_host_to_ip: vec![
                static_host("foo.test", Ipv4Addr::new(10, 0, 0, 5)),
                static_host("foo.test", Ipv4Addr::new(10, 0, 0, 99)),
            ],
            static_ip_to_host: vec![static_host("gateway.test", Ipv4Addr::new(10, 0, 0, 1))],
            ..Settings::default()
        }
    }

    fn range(start: [u8; 4], end: [u8; 4]) -> AddressRange {
        AddressRange::new(Ipv4Addr::from(start), Ipv4Addr::from(end)).unwrap()
    }

    #[test]
    fn range_parses() {
        assert_eq!(
            Ok(range([10, 10, 10, 0], [10, 10, 10, 255])),
            "10.10.10.0-10.10.10.255".parse()
        );
        assert_eq!(
            Ok(range([10, 0, 0, 1], [10, 0, 0, 1])),
            "10.0.0.1 - 10.0.0.1".parse()
        );
    }

    #[test]
    fn range_rejects_garbage() {
        assert_eq!(
            Err(AddressRangeFromStr::NoSeparator),
            "10.0.0.1".parse::<AddressRange>()
        );
        assert_eq!(
            Err(AddressRangeFromStr::BadAddress),
            "10.0.0.256-10.0.0.300".parse::<AddressRange>()
        );
        assert_eq!(
            Err(AddressRangeFromStr::Backwards),
            "10.0.0.9-10.0.0.1".parse::<AddressRange>()
        );
    }

    #[test]
    fn range_pick_is_inclusive() {
        let single = range([192, 168, 1, 1], [192, 168, 1, 1]);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(Ipv4Addr::new(192, 168, 1, 1), single.pick(&mut rng));

        let wide = range([10, 0, 255, 250], [10, 1, 0, 5]);
        for _ in 0..1000 {
            assert!(wide.contains(wide.pick(&mut rng)));
        }
    }

    #[test]
    fn range_display() {
        assert_eq!(
            "10.10.10.0-10.10.10.255",
            AddressRange::default().to_string()
        );
    }

    #[test]
    fn reverse_names() {
        assert_eq!(
            Some(Ipv4Addr::new(10, 0, 0, 5)),
            reverse_name_to_address("5.0.0.10.in-addr.arpa")
        );
        assert_eq!(
            Some(Ipv4Addr::new(1, 2, 3, 4)),
            reverse_name_to_address("4.3.2.1")
        );
        assert_eq!(None, reverse_name_to_address("3.2.1"));
        assert_eq!(None, reverse_name_to_address("x.0.0.10.in-addr.arpa"));
        assert_eq!(None, reverse_name_to_address("256.0.0.10.in-addr.arpa"));
    }

    #[test]
    fn static_address_any_case() {
        let cache = AddressCache::new(&settings());

        for name in ["foo.test", "FOO.test", "Foo.Test"] {
            assert_eq!(
                Ipv4Addr::new(10, 0, 0, 5),
                cache.resolve_address(name).unwrap()
            );
        }
    }

    #[test]
    fn default_address_without_dynamic_assignment() {
        let cache = AddressCache::new(&settings());

        assert_eq!(
            Ipv4Addr::new(127, 0, 0, 2),
            cache.resolve_address("unknown.test").unwrap()
        );
    }

    #[test]
    fn static_beats_dynamic() {
        let store = SharedMappingStore::in_memory();
        let cache = AddressCache::new(&settings())
            .with_dynamic_assignment(store.clone(), AddressRange::default());

        assert_eq!(
            Ipv4Addr::new(10, 0, 0, 5),
            cache.resolve_address("foo.test").unwrap()
        );
        assert!(store.is_empty());
    }

    #[test]
    fn dynamic_assignment_is_stable() {
        let store = SharedMappingStore::in_memory();
        let dynamic_range = range([10, 10, 10, 0], [10, 10, 10, 255]);
        let cache = AddressCache::new(&settings())
            .with_dynamic_assignment(store.clone(), dynamic_range);

        let first = cache.resolve_address("bar.test").unwrap();
        let second = cache.resolve_address("BAR.TEST").unwrap();

        assert_eq!(first, second);
        assert!(dynamic_range.contains(first));
        assert_eq!(1, store.len());
    }

    #[test]
    fn static_hostname() {
        let cache = AddressCache::new(&settings());

        assert_eq!(
            "gateway.test",
            cache.resolve_hostname("1.0.0.10.in-addr.arpa")
        );
    }

    #[test]
    fn default_hostname() {
        let cache = AddressCache::new(&settings());

        assert_eq!(
            "www.inetsim.org",
            cache.resolve_hostname("9.9.9.9.in-addr.arpa")
        );
        assert_eq!("www.inetsim.org", cache.resolve_hostname("not-reverse.test"));
    }

    #[test]
    fn dynamic_hostname_round_trip() {
        let store = SharedMappingStore::in_memory();
        let cache = AddressCache::new(&settings())
            .with_dynamic_assignment(store, range([10, 10, 10, 42], [10, 10, 10, 42]));

        cache.resolve_address("bar.test").unwrap();

        assert_eq!("bar.test", cache.resolve_hostname("42.10.10.10.in-addr.arpa"));
        assert_eq!(
            "www.inetsim.org",
            cache.resolve_hostname("43.10.10.10.in-addr.arpa")
        );
    }
}
