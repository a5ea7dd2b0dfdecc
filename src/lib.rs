//! rawcap - multi-interface packet capture
//!
//! Resolves the interfaces matching a host specification, opens a capture
//! handle on each (or replays a capture file), and merges their packets
//! into one stream consumed by a single handler.

pub mod config;
pub mod dump;
pub mod engine;
pub mod error;
pub mod filter;
pub mod interface;
pub mod listener;

pub use config::{parse_size, CaptureOptions, CaptureSource, Transport};
pub use dump::{dump_handler, ErrorCallback, DUMP_SNAPLEN};
pub use engine::{CaptureInfo, LinkType, Packet};
pub use error::{CaptureError, EngineError, HandleError, Stage};
pub use interface::NetInterface;
pub use listener::Listener;
