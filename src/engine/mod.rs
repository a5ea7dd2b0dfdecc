//! Capture engine abstraction.
//!
//! The listener only depends on the traits defined here; `PcapEngine`
//! provides the libpcap backend and tests substitute a scripted engine.

mod pcap_engine;

#[cfg(test)]
pub(crate) mod mock;

pub use pcap_engine::PcapEngine;

use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime};

use pcap_file::DataLink;

use crate::error::EngineError;

/// Data link type of a capture, as registered with tcpdump.org.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkType(pub u32);

impl LinkType {
    pub const NULL: LinkType = LinkType(0);
    pub const ETHERNET: LinkType = LinkType(1);
    pub const PPP: LinkType = LinkType(9);
    pub const RAW: LinkType = LinkType(101);
    pub const IEEE802_11: LinkType = LinkType(105);
    pub const LOOP: LinkType = LinkType(108);
    pub const LINUX_SLL: LinkType = LinkType(113);
    pub const IEEE802_11_RADIOTAP: LinkType = LinkType(127);
    pub const IPV4: LinkType = LinkType(228);
    pub const IPV6: LinkType = LinkType(229);
    pub const LINUX_SLL2: LinkType = LinkType(276);
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DataLink::from(self.0) {
            DataLink::Unknown(value) => write!(f, "LINKTYPE({})", value),
            known => write!(f, "{:?}", known),
        }
    }
}

/// Capture metadata of a single packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureInfo {
    pub timestamp: SystemTime,
    /// Bytes actually captured.
    pub caplen: u32,
    /// Length of the packet on the wire.
    pub len: u32,
}

/// A captured packet. Decoding is left to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub info: CaptureInfo,
    pub link_type: LinkType,
    pub data: Vec<u8>,
}

/// Entry point of a capture backend.
pub trait CaptureEngine: Send + Sync {
    /// Create an unactivated handle for a live device.
    fn inactive(&self, device: &str) -> Result<Box<dyn InactiveHandle>, EngineError>;

    /// Open a capture file for replay.
    fn open_offline(&self, path: &Path) -> Result<Box<dyn ActiveHandle>, EngineError>;
}

/// A handle being configured. Every setter may fail independently.
pub trait InactiveHandle: Send {
    fn set_timestamp_source(&mut self, name: &str) -> Result<(), EngineError>;

    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), EngineError>;

    /// Returns `EngineError::MonitorUnsupported` when the device has no
    /// monitor mode.
    fn set_monitor_mode(&mut self, enabled: bool) -> Result<(), EngineError>;

    fn set_snaplen(&mut self, snaplen: u32) -> Result<(), EngineError>;

    fn set_buffer_size(&mut self, bytes: u32) -> Result<(), EngineError>;

    /// `None` blocks reads until a packet arrives.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), EngineError>;

    fn activate(self: Box<Self>) -> Result<Box<dyn ActiveHandle>, EngineError>;
}

/// An activated handle yielding packets.
pub trait ActiveHandle: Send {
    /// Compile and attach a BPF filter.
    fn set_filter(&mut self, filter: &str) -> Result<(), EngineError>;

    fn link_type(&self) -> LinkType;

    /// Read the next packet.
    ///
    /// `Ok(None)` signals the end of the stream. `EngineError::Timeout`
    /// means no packet arrived within the buffer timeout.
    fn next_packet(&mut self) -> Result<Option<Packet>, EngineError>;

    /// Release the underlying capture resource.
    fn close(self: Box<Self>);
}
