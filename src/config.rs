//! Capture configuration values.
//!
//! Plain configuration handed to the listener. Nothing here talks to the
//! capture engine; validation beyond parsing happens at activation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Transport layers a listener can filter on.
pub const TRANSPORT_LAYERS: [&str; 1] = ["tcp"];

/// Options applied to every yet-to-be-activated capture handle.
///
/// Changing options after `Listener::activate` has no effect on handles
/// that are already active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Capture traffic not addressed to this host.
    pub promiscuous: bool,
    /// Put wireless devices into monitor mode where supported.
    pub monitor: bool,
    /// Use a fixed 64 KiB snapshot length instead of one derived from the MTU.
    pub override_snaplen: bool,
    /// Packet buffer timeout. `None` or zero blocks until packets arrive.
    pub buffer_timeout: Option<Duration>,
    /// Engine timestamp source name (e.g. `host`, `adapter`).
    pub timestamp_source: Option<String>,
    /// Kernel buffer size in bytes.
    pub buffer_size: Option<u32>,
    /// Explicit BPF filter; replaces the derived one.
    pub bpf_filter: Option<String>,
}

impl CaptureOptions {
    /// Effective buffer timeout; `None` means block forever.
    pub fn timeout(&self) -> Option<Duration> {
        self.buffer_timeout.filter(|t| !t.is_zero())
    }
}

/// Where packets are acquired from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureSource {
    /// Live capture on the resolved host interfaces.
    #[default]
    Live,
    /// Replay of a capture file; the host specification is the file path.
    File,
}

impl FromStr for CaptureSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "libpcap" => Ok(CaptureSource::Live),
            "pcap_file" => Ok(CaptureSource::File),
            other => Err(format!("invalid engine {}", other)),
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureSource::Live => write!(f, "libpcap"),
            CaptureSource::File => write!(f, "pcap_file"),
        }
    }
}

/// Transport protocol used in the derived filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Tcp,
}

impl Transport {
    /// Look up a transport by name. Unknown or empty names fall back to TCP.
    pub fn from_name(name: &str) -> Self {
        match name {
            "tcp" => Transport::Tcp,
            _ => Transport::Tcp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => TRANSPORT_LAYERS[0],
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a human-readable byte size such as `512`, `64kb` or `10MB`.
pub fn parse_size(input: &str) -> Result<u32, String> {
    let lower = input.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (digits, unit) = lower.split_at(split);

    if digits.is_empty() {
        return Err(format!("invalid size: {}", input));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size: {}", input))?;

    let multiplier: u64 = match unit.trim() {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        _ => return Err(format!("invalid size unit in {}", input)),
    };

    value
        .checked_mul(multiplier)
        .and_then(|bytes| u32::try_from(bytes).ok())
        .ok_or_else(|| format!("size too large: {}", input))
}

#[cfg(test)]
mod tests {
    use super::*;

    mod capture_source_tests {
        use super::*;

        #[test]
        fn parses_engine_names() {
            assert_eq!("".parse::<CaptureSource>(), Ok(CaptureSource::Live));
            assert_eq!("libpcap".parse::<CaptureSource>(), Ok(CaptureSource::Live));
            assert_eq!("pcap_file".parse::<CaptureSource>(), Ok(CaptureSource::File));
        }

        #[test]
        fn rejects_unknown_engine() {
            let err = "raw_socket".parse::<CaptureSource>().unwrap_err();
            assert_eq!(err, "invalid engine raw_socket");
        }

        #[test]
        fn displays_engine_names() {
            assert_eq!(CaptureSource::Live.to_string(), "libpcap");
            assert_eq!(CaptureSource::File.to_string(), "pcap_file");
        }
    }

    mod transport_tests {
        use super::*;

        #[test]
        fn tcp_is_recognized() {
            assert_eq!(Transport::from_name("tcp"), Transport::Tcp);
        }

        #[test]
        fn unknown_falls_back_to_tcp() {
            assert_eq!(Transport::from_name("udp"), Transport::Tcp);
            assert_eq!(Transport::from_name(""), Transport::Tcp);
        }
    }

    mod options_tests {
        use super::*;

        #[test]
        fn zero_timeout_blocks_forever() {
            let opts = CaptureOptions {
                buffer_timeout: Some(Duration::ZERO),
                ..Default::default()
            };
            assert_eq!(opts.timeout(), None);
        }

        #[test]
        fn explicit_timeout_kept() {
            let opts = CaptureOptions {
                buffer_timeout: Some(Duration::from_millis(250)),
                ..Default::default()
            };
            assert_eq!(opts.timeout(), Some(Duration::from_millis(250)));
        }
    }

    mod parse_size_tests {
        use super::*;

        #[test]
        fn plain_bytes() {
            assert_eq!(parse_size("4096"), Ok(4096));
            assert_eq!(parse_size("10b"), Ok(10));
        }

        #[test]
        fn units_are_case_insensitive() {
            assert_eq!(parse_size("64kb"), Ok(64 * 1024));
            assert_eq!(parse_size("10MB"), Ok(10 * 1024 * 1024));
            assert_eq!(parse_size("1g"), Ok(1 << 30));
        }

        #[test]
        fn rejects_garbage() {
            assert!(parse_size("").is_err());
            assert!(parse_size("mb").is_err());
            assert!(parse_size("10 parsecs").is_err());
        }

        #[test]
        fn rejects_overflow() {
            assert!(parse_size("8gb").is_err());
        }
    }
}
