use crate::error::ConfigError;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::str::FromStr;
use typed_builder::TypedBuilder;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_DELETE_QUEUE_CAPACITY: usize = 10;

/// Process-wide settings, built once at startup.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Settings {
    /// Prefix joined with a short code to form the public short URL.
    #[builder(default = DEFAULT_BASE_URL.to_string(), setter(into))]
    base_url: String,
    /// Callers allowed to read aggregate stats. `None` denies everyone.
    #[builder(default)]
    trusted_subnet: Option<TrustedSubnet>,
    /// HMAC key for identity cookies.
    #[builder(setter(into))]
    cookie_key: String,
    #[builder(default = DEFAULT_DELETE_QUEUE_CAPACITY)]
    delete_queue_capacity: usize,
}

impl Settings {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn trusted_subnet(&self) -> Option<&TrustedSubnet> {
        self.trusted_subnet.as_ref()
    }

    pub fn cookie_key(&self) -> &str {
        &self.cookie_key
    }

    pub fn delete_queue_capacity(&self) -> usize {
        self.delete_queue_capacity
    }
}

/// An IPv4 or IPv6 network in CIDR notation, e.g. `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    network: IpAddr,
    prefix: u8,
}

impl TrustedSubnet {
    pub fn new(network: IpAddr, prefix: u8) -> Result<Self, ConfigError> {
        let max = max_prefix(&network);
        if prefix > max {
            return Err(ConfigError::PrefixTooLong { prefix, max });
        }
        Ok(Self { network, prefix })
    }

    /// Whether `ip` lies inside the subnet. IPv4-mapped IPv6 addresses are
    /// matched as IPv4.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip.to_canonical()) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                u32::from(network) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                u128::from(network) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for TrustedSubnet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidSubnet(s.to_string());

        let (address, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let network: IpAddr = address.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;

        Self::new(network, prefix)
    }
}

impl Display for TrustedSubnet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}
