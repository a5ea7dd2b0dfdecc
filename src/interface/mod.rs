//! Host interface discovery.
//!
//! Enumeration goes through `pnet::datalink`; selecting the interfaces that
//! match a host specification is a pure function over that list so it can
//! be exercised without touching the host.

use std::net::IpAddr;

use macaddr::MacAddr6;
use pnet::datalink;

use crate::error::CaptureError;

/// Host specifications that select every interface.
const ANY_HOST: [&str; 4] = ["", "0.0.0.0", "[::]", "::"];

/// A network interface usable for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub index: u32,
    pub mac: Option<MacAddr6>,
    pub mtu: Option<u32>,
    /// Assigned addresses, without prefix length.
    pub ips: Vec<IpAddr>,
}

impl NetInterface {
    /// Hardware address as `aa:bb:cc:dd:ee:ff`, or an empty string.
    pub fn hardware_addr(&self) -> String {
        self.mac
            .map(|mac| {
                mac.as_bytes()
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(":")
            })
            .unwrap_or_default()
    }

    /// Whether `host` names this interface itself (name, index or hardware
    /// address) rather than a peer.
    pub fn is_device(&self, host: &str) -> bool {
        if host.is_empty() {
            return false;
        }
        host == self.name
            || host == self.index.to_string()
            || (self.mac.is_some() && host.eq_ignore_ascii_case(&self.hardware_addr()))
    }

    fn has_ip(&self, host: &str) -> bool {
        self.ips.iter().any(|ip| ip.to_string() == host)
    }
}

/// List every interface that is up and has at least one address.
pub fn enumerate() -> Vec<NetInterface> {
    datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.ips.is_empty())
        .map(|iface| NetInterface {
            mtu: read_mtu(&iface.name),
            mac: iface.mac.map(|mac| MacAddr6::from(mac.octets())),
            ips: iface.ips.iter().map(|net| net.ip()).collect(),
            index: iface.index,
            name: iface.name,
        })
        .collect()
}

/// Narrow `all` down to the interfaces matching `host`.
///
/// Any-address specifications keep the whole list. Otherwise the first
/// interface whose name, index, hardware address or one of its addresses
/// equals `host` is selected on its own.
pub fn select_interfaces(
    all: Vec<NetInterface>,
    host: &str,
) -> Result<Vec<NetInterface>, CaptureError> {
    if ANY_HOST.contains(&host) {
        if all.is_empty() {
            return Err(CaptureError::NoInterfaces);
        }
        return Ok(all);
    }

    all.into_iter()
        .find(|iface| iface.is_device(host) || iface.has_ip(host))
        .map(|iface| vec![iface])
        .ok_or_else(|| CaptureError::InterfaceNotFound(host.to_string()))
}

#[cfg(target_os = "linux")]
fn read_mtu(name: &str) -> Option<u32> {
    std::fs::read_to_string(format!("/sys/class/net/{}/mtu", name))
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(not(target_os = "linux"))]
fn read_mtu(_name: &str) -> Option<u32> {
    None
}
