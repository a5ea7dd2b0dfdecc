//! libpcap-based capture engine.

use std::ffi::{c_int, c_void};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap::{Active, Capture, Inactive, Offline, Precision, TimestampType};
use tracing::{debug, warn};

use super::{ActiveHandle, CaptureEngine, CaptureInfo, InactiveHandle, LinkType, Packet};
use crate::error::EngineError;

/// Timestamp source names accepted by libpcap.
const TIMESTAMP_SOURCES: [(&str, TimestampType); 5] = [
    ("host", TimestampType::Host),
    ("host_lowprec", TimestampType::HostLowPrec),
    ("host_hiprec", TimestampType::HostHighPrec),
    ("adapter", TimestampType::Adapter),
    ("adapter_unsynced", TimestampType::AdapterUnsynced),
];

/// `PCAP_TSTAMP_PRECISION_NANO` from pcap/pcap.h.
const TSTAMP_PRECISION_NANO: c_int = 1;

extern "C" {
    // Provided by the libpcap the `pcap` crate links against (1.5.0+).
    fn pcap_get_tstamp_precision(p: *mut c_void) -> c_int;
}

/// Whether the handle reports timestamps in nanoseconds. libpcap silently
/// keeps microseconds when the requested precision is unavailable.
fn reports_nanos<P>(handle: *mut P) -> bool {
    // SAFETY: `handle` comes from a live `Capture`, borrowed by the caller.
    unsafe { pcap_get_tstamp_precision(handle.cast()) == TSTAMP_PRECISION_NANO }
}

/// Capture engine backed by the system libpcap.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcapEngine;

impl PcapEngine {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureEngine for PcapEngine {
    fn inactive(&self, device: &str) -> Result<Box<dyn InactiveHandle>, EngineError> {
        let capture = Capture::from_device(device).map_err(pcap_error)?;
        Ok(Box::new(PcapInactive {
            device: device.to_string(),
            capture,
            settings: Settings::default(),
        }))
    }

    fn open_offline(&self, path: &Path) -> Result<Box<dyn ActiveHandle>, EngineError> {
        let capture =
            Capture::from_file_with_precision(path, Precision::Nano).map_err(pcap_error)?;
        let link_type = link_type_of(capture.get_datalink());
        let nanos = reports_nanos(capture.as_ptr());
        Ok(Box::new(PcapHandle {
            source: Source::File(capture),
            link_type,
            nanos,
        }))
    }
}

/// Settings recorded before activation.
///
/// libpcap applies them all at activation, so they are kept until then
/// and replayed if activation has to be retried.
#[derive(Debug, Default, Clone)]
struct Settings {
    tstamp: Option<TimestampType>,
    promisc: bool,
    rfmon: bool,
    snaplen: Option<i32>,
    buffer_size: Option<i32>,
    timeout_ms: Option<i32>,
}

impl Settings {
    fn apply(&self, mut capture: Capture<Inactive>, rfmon: bool) -> Capture<Inactive> {
        capture = capture.precision(Precision::Nano).promisc(self.promisc);
        if let Some(tstamp) = self.tstamp {
            capture = capture.tstamp_type(tstamp);
        }
        #[cfg(not(windows))]
        if rfmon {
            capture = capture.rfmon(true);
        }
        #[cfg(windows)]
        let _ = rfmon;
        if let Some(snaplen) = self.snaplen {
            capture = capture.snaplen(snaplen);
        }
        if let Some(size) = self.buffer_size {
            capture = capture.buffer_size(size);
        }
        if let Some(ms) = self.timeout_ms {
            capture = capture.timeout(ms);
        }
        capture
    }
}

struct PcapInactive {
    device: String,
    capture: Capture<Inactive>,
    settings: Settings,
}

impl InactiveHandle for PcapInactive {
    fn set_timestamp_source(&mut self, name: &str) -> Result<(), EngineError> {
        let tstamp = TIMESTAMP_SOURCES
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|(_, tstamp)| *tstamp)
            .ok_or_else(|| EngineError::UnknownTimestampSource {
                name: name.to_string(),
                supported: TIMESTAMP_SOURCES
                    .iter()
                    .map(|(known, _)| *known)
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;
        self.settings.tstamp = Some(tstamp);
        Ok(())
    }

    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), EngineError> {
        self.settings.promisc = enabled;
        Ok(())
    }

    fn set_monitor_mode(&mut self, enabled: bool) -> Result<(), EngineError> {
        if cfg!(windows) && enabled {
            return Err(EngineError::MonitorUnsupported);
        }
        self.settings.rfmon = enabled;
        Ok(())
    }

    fn set_snaplen(&mut self, snaplen: u32) -> Result<(), EngineError> {
        self.settings.snaplen = Some(to_i32("snapshot length", u64::from(snaplen))?);
        Ok(())
    }

    fn set_buffer_size(&mut self, bytes: u32) -> Result<(), EngineError> {
        self.settings.buffer_size = Some(to_i32("buffer size", u64::from(bytes))?);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), EngineError> {
        self.settings.timeout_ms = match timeout {
            Some(timeout) => {
                let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                // libpcap treats 0 as "block forever"; keep sub-millisecond timeouts live.
                Some(to_i32("buffer timeout (ms)", ms.max(1))?)
            }
            None => None,
        };
        Ok(())
    }

    fn activate(self: Box<Self>) -> Result<Box<dyn ActiveHandle>, EngineError> {
        let PcapInactive {
            device,
            capture,
            settings,
        } = *self;

        let capture = match settings.apply(capture, settings.rfmon).open() {
            Ok(capture) => capture,
            Err(err) if settings.rfmon => {
                // libpcap reports missing monitor support only at activation
                // time; retry without it and treat success as "unsupported".
                debug!("Activation with monitor mode failed on {}: {}", device, err);
                let fresh = Capture::from_device(device.as_str()).map_err(pcap_error)?;
                let capture = settings
                    .apply(fresh, false)
                    .open()
                    .map_err(|_| pcap_error(err))?;
                warn!(
                    "Monitor mode is not supported on {}, capturing without it",
                    device
                );
                capture
            }
            Err(err) => return Err(pcap_error(err)),
        };

        let link_type = link_type_of(capture.get_datalink());
        let nanos = reports_nanos(capture.as_ptr());
        if !nanos {
            debug!("{} reports microsecond timestamps", device);
        }
        Ok(Box::new(PcapHandle {
            source: Source::Live(capture),
            link_type,
            nanos,
        }))
    }
}

enum Source {
    Live(Capture<Active>),
    File(Capture<Offline>),
}

struct PcapHandle {
    source: Source,
    link_type: LinkType,
    /// The fractional timestamp field holds nanoseconds rather than microseconds.
    nanos: bool,
}

impl ActiveHandle for PcapHandle {
    fn set_filter(&mut self, filter: &str) -> Result<(), EngineError> {
        let result = match &mut self.source {
            Source::Live(capture) => capture.filter(filter, true),
            Source::File(capture) => capture.filter(filter, true),
        };
        result.map_err(pcap_error)
    }

    fn link_type(&self) -> LinkType {
        self.link_type
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, EngineError> {
        let link_type = self.link_type;
        let nanos = self.nanos;
        let next = match &mut self.source {
            Source::Live(capture) => capture.next_packet(),
            Source::File(capture) => capture.next_packet(),
        };

        match next {
            Ok(packet) => {
                let ts = packet.header.ts;
                let timestamp = timestamp_of(ts.tv_sec as u64, ts.tv_usec as u32, nanos);
                Ok(Some(Packet {
                    info: CaptureInfo {
                        timestamp,
                        caplen: packet.header.caplen,
                        len: packet.header.len,
                    },
                    link_type,
                    data: packet.data.to_vec(),
                }))
            }
            Err(pcap::Error::NoMorePackets) => Ok(None),
            Err(pcap::Error::TimeoutExpired) => Err(EngineError::Timeout),
            Err(e) => Err(pcap_error(e)),
        }
    }

    fn close(self: Box<Self>) {
        // Dropping the capture calls pcap_close.
        drop(self);
    }
}

/// Convert a pcap timestamp whose fraction is in nanoseconds or microseconds.
fn timestamp_of(secs: u64, fraction: u32, nanos: bool) -> SystemTime {
    let subsec = if nanos {
        Duration::from_nanos(u64::from(fraction))
    } else {
        Duration::from_micros(u64::from(fraction))
    };
    UNIX_EPOCH + Duration::from_secs(secs) + subsec
}

fn pcap_error(err: pcap::Error) -> EngineError {
    EngineError::Pcap(err.to_string())
}

fn link_type_of(link: pcap::Linktype) -> LinkType {
    LinkType(u32::try_from(link.0).unwrap_or(LinkType::ETHERNET.0))
}

fn to_i32(what: &'static str, value: u64) -> Result<i32, EngineError> {
    i32::try_from(value).map_err(|_| EngineError::OutOfRange { what, value })
}
