//! Host network address resolution

use if_addrs::Interface;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// Sentinel MAC reported when no usable interface exists
pub const NO_MAC: &str = "00:00:00:00:00:00";

/// Address info reported to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub ip: Ipv4Addr,
    pub mac: String,
}

impl NetworkInfo {
    /// The "no network" sentinel
    pub fn unavailable() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            mac: NO_MAC.into(),
        }
    }
}

/// Resolves the device's current address info
///
/// Interfaces can change while the process runs, so callers resolve on demand.
pub trait NetworkProbe: Send + Sync {
    fn resolve(&self) -> NetworkInfo;
}

/// Probe backed by the host's interface table
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNetwork;

impl NetworkProbe for SystemNetwork {
    fn resolve(&self) -> NetworkInfo {
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!("Interface enumeration failed: {}", e);
                return NetworkInfo::unavailable();
            }
        };

        let Some((name, ip)) = first_external_ipv4(&interfaces) else {
            return NetworkInfo::unavailable();
        };

        let mac = match mac_address::mac_address_by_name(name) {
            Ok(Some(mac)) => mac.to_string().to_lowercase(),
            Ok(None) => NO_MAC.into(),
            Err(e) => {
                debug!("MAC lookup for {} failed: {}", name, e);
                NO_MAC.into()
            }
        };

        NetworkInfo { ip, mac }
    }
}

/// First non-loopback IPv4 interface, in enumeration order
fn first_external_ipv4(interfaces: &[Interface]) -> Option<(&str, Ipv4Addr)> {
    interfaces.iter().find_map(|iface| match iface.ip() {
        IpAddr::V4(ip) if !iface.is_loopback() => Some((iface.name.as_str(), ip)),
        _ => None,
    })
}
