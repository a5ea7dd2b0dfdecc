//! Turning resolved interfaces (or a capture file) into active handles.

use std::path::Path;

use tracing::{debug, info, warn};

use super::Listener;
use crate::config::{CaptureOptions, CaptureSource};
use crate::engine::ActiveHandle;
use crate::error::{CaptureError, EngineError, HandleError, Stage};
use crate::filter::{build_filter, normalize_filter};
use crate::interface::NetInterface;

/// Handle key used for offline captures.
pub const FILE_HANDLE_KEY: &str = "pcap_file";

/// Bytes added to the MTU to cover link-layer headers.
const SNAPLEN_SLACK: u32 = 200;

/// Snapshot length used when the override flag is set.
const OVERRIDE_SNAPLEN: u32 = (64 << 10) + SNAPLEN_SLACK;

impl Listener {
    /// Open capture handles for the configured source.
    ///
    /// Must be called before `listen`, after options have been set. In live
    /// mode interfaces that fail are skipped; activation only fails when no
    /// handle could be opened at all.
    pub fn activate(&self) -> Result<(), CaptureError> {
        match self.source {
            CaptureSource::Live => self.activate_live(),
            CaptureSource::File => self.activate_file(),
        }
    }

    /// Filter attached to the handle for `iface` (`None` for capture files).
    pub fn filter_for(&self, iface: Option<&NetInterface>) -> String {
        if let Some(filter) = self.options.bpf_filter.as_deref().filter(|f| !f.is_empty()) {
            return normalize_filter(filter);
        }
        // A capture file has no interface for the host to refer to, and the
        // host specification is the file path, so no host clause applies.
        let host = if iface.is_some() { self.host.as_str() } else { "" };
        build_filter(self.transport, self.port, self.track_response, host, iface)
    }

    fn activate_live(&self) -> Result<(), CaptureError> {
        let mut failures = Vec::new();
        for iface in &self.interfaces {
            match self.open_live_handle(iface) {
                Ok(handle) => {
                    info!("Capturing on {} ({})", iface.name, handle.link_type());
                    self.dispatcher.insert(iface.name.as_str(), handle);
                }
                Err(e) => {
                    warn!("Skipping interface: {}", e);
                    failures.push(e);
                }
            }
        }

        if self.dispatcher.len() == 0 {
            return Err(CaptureError::NoHandles(failures));
        }
        info!(
            "Activated {} of {} interfaces",
            self.dispatcher.len(),
            self.interfaces.len()
        );
        Ok(())
    }

    fn activate_file(&self) -> Result<(), CaptureError> {
        let path = Path::new(&self.host);
        let mut handle = self
            .engine
            .open_offline(path)
            .map_err(|e| HandleError::new(self.host.as_str(), Stage::OpenFile, e))?;

        let filter = self.filter_for(None);
        debug!("Applying filter {} to {}", filter, self.host);
        if let Err(e) = handle.set_filter(&filter) {
            handle.close();
            return Err(HandleError::new(self.host.as_str(), Stage::Filter, e).into());
        }

        info!("Replaying {} ({})", self.host, handle.link_type());
        self.dispatcher.insert(FILE_HANDLE_KEY, handle);
        Ok(())
    }

    fn open_live_handle(&self, iface: &NetInterface) -> Result<Box<dyn ActiveHandle>, HandleError> {
        let name = iface.name.as_str();
        let opts = &self.options;
        let at = |stage: Stage| move |e: EngineError| HandleError::new(name, stage, e);

        let mut inactive = self.engine.inactive(name).map_err(at(Stage::InactiveHandle))?;

        if let Some(source) = opts.timestamp_source.as_deref().filter(|s| !s.is_empty()) {
            inactive
                .set_timestamp_source(source)
                .map_err(at(Stage::TimestampSource))?;
        }
        if opts.promiscuous {
            inactive
                .set_promiscuous(true)
                .map_err(at(Stage::Promiscuous))?;
        }
        if opts.monitor {
            match inactive.set_monitor_mode(true) {
                Ok(()) => {}
                Err(EngineError::MonitorUnsupported) => {
                    debug!("Monitor mode unsupported on {}, ignoring", name);
                }
                Err(e) => return Err(at(Stage::Monitor)(e)),
            }
        }
        if let Some(snaplen) = snaplen_for(opts, iface) {
            inactive.set_snaplen(snaplen).map_err(at(Stage::SnapLen))?;
        }
        if let Some(size) = opts.buffer_size.filter(|size| *size > 0) {
            inactive
                .set_buffer_size(size)
                .map_err(at(Stage::BufferSize))?;
        }
        inactive
            .set_timeout(opts.timeout())
            .map_err(at(Stage::BufferTimeout))?;

        let mut handle = inactive.activate().map_err(at(Stage::Activate))?;

        let filter = self.filter_for(Some(iface));
        debug!("Applying filter {} to {}", filter, name);
        if let Err(e) = handle.set_filter(&filter) {
            handle.close();
            return Err(at(Stage::Filter)(e));
        }
        Ok(handle)
    }
}

/// Snapshot length for `iface`, or `None` to keep the engine default.
fn snaplen_for(opts: &CaptureOptions, iface: &NetInterface) -> Option<u32> {
    if opts.override_snaplen {
        return Some(OVERRIDE_SNAPLEN);
    }
    iface
        .mtu
        .filter(|mtu| *mtu > 0)
        .map(|mtu| mtu + SNAPLEN_SLACK)
}
