use config::{Config, ConfigError, Environment, File};
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::Deserialize;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use dns_types::protocol::types::DomainName;

use crate::addresses::AddressRange;

/// Prefix for environment variable overrides: `FAKEDNS_RANDOM_IP=true`
/// sets `random_ip`.
pub const ENV_PREFIX: &str = "FAKEDNS";

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Tag carried by every audit line.
    pub service_name: String,
    pub bind_address: Ipv4Addr,
    pub bind_port: u16,
    /// Answer to CHAOS-class version queries.
    pub version: String,
    /// Give unknown hostnames a random address from `random_range`,
    /// instead of `default_ip`.
    pub random_ip: bool,
    pub random_range: AddressRange,
    pub default_ip: Ipv4Addr,
    pub default_hostname: String,
    pub default_domainname: String,
    /// Kept as lists: the first entry for a name, or for an address,
    /// wins.
    pub static_host_to_ip: Vec<StaticHost>,
    pub static_ip_to_host: Vec<StaticHost>,
    /// Where dynamically assigned addresses are remembered.  Emptied
    /// at startup.
    pub cache_file: PathBuf,
    /// Serve prometheus metrics on this address, if set.
    pub metrics_address: Option<SocketAddr>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_name: "dns_53_tcp_udp".to_string(),
            bind_address: Ipv4Addr::LOCALHOST,
            bind_port: 53,
            version: "INetSim DNS Server".to_string(),
            random_ip: false,
            random_range: AddressRange::default(),
            default_ip: Ipv4Addr::LOCALHOST,
            default_hostname: "www".to_string(),
            default_domainname: "inetsim.org".to_string(),
            static_host_to_ip: Vec::new(),
            static_ip_to_host: Vec::new(),
            cache_file: PathBuf::from("dns_cache.txt"),
            metrics_address: None,
        }
    }
}

impl Settings {
    /// Load settings from an optional YAML file, then apply any
    /// `FAKEDNS_*` environment variables on top.  Anything unset
    /// keeps its default.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or a value does not parse.
    pub fn new(filename: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = filename {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// The hostname handed out for addresses nothing else knows about.
    pub fn default_fqdn(&self) -> String {
        format!("{}.{}", self.default_hostname, self.default_domainname)
    }
}

/// One entry of a static mapping table.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct StaticHost {
    pub name: Name,
    pub address: Ipv4Addr,
}

/// A hostname, checked to be a valid domain name and normalised to
/// lower case without the trailing dot.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Name {
    pub hostname: String,
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NameVisitor;

        impl Visitor<'_> for NameVisitor {
            type Value = Name;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a hostname")
            }

            fn visit_str<E>(self, v: &str) -> Result<Name, E>
            where
                E: de::Error,
            {
                match v.parse::<DomainName>() {
                    Ok(domain) if !domain.is_root() => {
                        let dotted = domain.to_dotted_string();
                        Ok(Name {
                            hostname: dotted.trim_end_matches('.').to_string(),
                        })
                    }
                    _ => Err(de::Error::invalid_value(
                        Unexpected::Str(v),
                        &"a valid domain name",
                    )),
                }
            }
        }

        deserializer.deserialize_str(NameVisitor)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn settings_from_yaml(yaml: &str) -> Result<Settings, ConfigError> {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        Settings::new(Some(file.path()))
    }

    #[test]
    fn missing_keys_use_defaults() {
        let settings = settings_from_yaml("bind_port: 5353\n").unwrap();

        assert_eq!(5353, settings.bind_port);
        assert_eq!(Settings::default().bind_address, settings.bind_address);
        assert_eq!("www.inetsim.org", settings.default_fqdn());
        assert!(!settings.random_ip);
    }

    #[test]
    fn parses_full_file() {
        let settings = settings_from_yaml(
            "service_name: dns_test
bind_address: 10.10.10.1
random_ip: true
random_range: 192.168.0.1-192.168.0.9
static_host_to_ip:
  - name: Foo.Test
    address: 10.0.0.5
static_ip_to_host:
  - name: bar.test.
    address: 10.0.0.6
",
        )
        .unwrap();

        assert_eq!("dns_test", settings.service_name);
        assert_eq!(Ipv4Addr::new(10, 10, 10, 1), settings.bind_address);
        assert!(settings.random_ip);
        assert_eq!(
            AddressRange::new(Ipv4Addr::new(192, 168, 0, 1), Ipv4Addr::new(192, 168, 0, 9)),
            Some(settings.random_range)
        );
        assert_eq!(
            vec![StaticHost {
                name: Name {
                    hostname: "foo.test".to_string()
                },
                address: Ipv4Addr::new(10, 0, 0, 5),
            }],
            settings.static_host_to_ip
        );
        assert_eq!("bar.test", settings.static_ip_to_host[0].name.hostname);
    }

    #[test]
    fn rejects_backwards_range() {
        assert!(settings_from_yaml("random_range: 10.0.0.9-10.0.0.1\n").is_err());
    }

    #[test]
    fn rejects_bad_static_name() {
        assert!(settings_from_yaml(
            "static_host_to_ip:\n  - name: foo..test\n    address: 10.0.0.5\n"
        )
        .is_err());
    }
}
