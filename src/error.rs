use std::fmt;

use thiserror::Error;

/// Errors reported by a capture engine backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The device cannot be put into monitor mode. Tolerated by the activator.
    #[error("monitor mode is not supported")]
    MonitorUnsupported,

    #[error("unknown timestamp source {name:?}, supported: {supported}")]
    UnknownTimestampSource { name: String, supported: String },

    /// A read returned without a packet; the caller may retry.
    #[error("read timeout expired")]
    Timeout,

    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: u64 },

    #[error("{0}")]
    Pcap(String),
}

/// The step of handle setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    InactiveHandle,
    TimestampSource,
    Promiscuous,
    Monitor,
    SnapLen,
    BufferSize,
    BufferTimeout,
    Activate,
    Filter,
    OpenFile,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::InactiveHandle => "inactive handle",
            Stage::TimestampSource => "timestamp source",
            Stage::Promiscuous => "promiscuous mode",
            Stage::Monitor => "monitor mode",
            Stage::SnapLen => "snapshot length",
            Stage::BufferSize => "handle buffer size",
            Stage::BufferTimeout => "handle buffer timeout",
            Stage::Activate => "activate device",
            Stage::Filter => "BPF filter",
            Stage::OpenFile => "open pcap file",
        };
        f.write_str(name)
    }
}

/// A single interface (or file) that could not be turned into an active handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} error: {source}, interface: {target:?}")]
pub struct HandleError {
    /// Interface name or capture file path.
    pub target: String,
    pub stage: Stage,
    #[source]
    pub source: EngineError,
}

impl HandleError {
    pub fn new(target: impl Into<String>, stage: Stage, source: EngineError) -> Self {
        Self {
            target: target.into(),
            stage,
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("can not find interface with addr, name or index {0}")]
    InterfaceNotFound(String),

    #[error("no network interface is up with an address")]
    NoInterfaces,

    #[error("pcap handles error:{}", join_failures(.0))]
    NoHandles(Vec<HandleError>),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error("listener has no active handles, activate it first")]
    NotActivated,

    #[error("listener is already reading packets")]
    AlreadyListening,

    #[error("listening cancelled")]
    Cancelled,
}

fn join_failures(failures: &[HandleError]) -> String {
    failures.iter().map(|e| format!("\n{}", e)).collect()
}
