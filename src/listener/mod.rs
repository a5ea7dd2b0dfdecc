//! The capture listener.
//!
//! A `Listener` resolves the interfaces matching a host specification,
//! activates one capture handle per interface (or one for a capture file),
//! and feeds every packet from every handle to a single handler.
//!
//! ```no_run
//! # async fn run() -> Result<(), rawcap::CaptureError> {
//! use rawcap::{CaptureSource, Listener};
//!
//! let listener = Listener::new("", 80, "tcp", CaptureSource::Live, false)?;
//! listener.activate()?;
//! listener
//!     .listen(async { let _ = tokio::signal::ctrl_c().await; }, |packet| {
//!         println!("{} bytes", packet.info.len);
//!     })
//!     .await
//! # }
//! ```

mod activate;
mod dispatch;

pub use activate::FILE_HANDLE_KEY;
pub use dispatch::CHANNEL_CAPACITY;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::{CaptureOptions, CaptureSource, Transport};
use crate::engine::{CaptureEngine, LinkType, Packet, PcapEngine};
use crate::error::CaptureError;
use crate::interface::{self, NetInterface};
use dispatch::Dispatcher;

/// Captures traffic from live interfaces or a capture file.
pub struct Listener {
    transport: Transport,
    source: CaptureSource,
    /// Interface name, hardware address, index or IP address; the file
    /// path in file mode.
    host: String,
    /// 0 captures every port.
    port: u16,
    track_response: bool,
    options: CaptureOptions,
    interfaces: Vec<NetInterface>,
    engine: Arc<dyn CaptureEngine>,
    dispatcher: Arc<Dispatcher>,
    /// Flipped to `true` once `listen` starts reading packets.
    reading: watch::Sender<bool>,
}

impl Listener {
    /// Create a listener backed by libpcap.
    ///
    /// Unknown transports fall back to TCP. In live mode the host
    /// interfaces are enumerated and narrowed to those matching `host`.
    pub fn new(
        host: &str,
        port: u16,
        transport: &str,
        source: CaptureSource,
        track_response: bool,
    ) -> Result<Self, CaptureError> {
        let available = match source {
            CaptureSource::Live => interface::enumerate(),
            CaptureSource::File => Vec::new(),
        };
        Self::with_engine(
            host,
            port,
            transport,
            source,
            track_response,
            Arc::new(PcapEngine::new()),
            available,
        )
    }

    /// Create a listener on a custom engine, selecting from `available`
    /// interfaces instead of the host's.
    pub fn with_engine(
        host: &str,
        port: u16,
        transport: &str,
        source: CaptureSource,
        track_response: bool,
        engine: Arc<dyn CaptureEngine>,
        available: Vec<NetInterface>,
    ) -> Result<Self, CaptureError> {
        let interfaces = match source {
            CaptureSource::Live => interface::select_interfaces(available, host)?,
            CaptureSource::File => Vec::new(),
        };
        let (reading, _) = watch::channel(false);

        Ok(Self {
            transport: Transport::from_name(transport),
            source,
            host: host.to_string(),
            port,
            track_response,
            options: CaptureOptions::default(),
            interfaces,
            engine,
            dispatcher: Arc::new(Dispatcher::new()),
            reading,
        })
    }

    /// Set the options for handles that are yet to be activated.
    pub fn set_options(&mut self, options: CaptureOptions) {
        self.options = options;
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn source(&self) -> CaptureSource {
        self.source
    }

    /// Interfaces selected for live capture. Empty in file mode.
    pub fn interfaces(&self) -> &[NetInterface] {
        &self.interfaces
    }

    /// Keys of the handles that are still registered, sorted.
    pub fn handle_keys(&self) -> Vec<String> {
        self.dispatcher.keys()
    }

    /// Link type shared by every activated handle, or `None` when nothing is
    /// activated or the handles disagree.
    pub fn link_type(&self) -> Option<LinkType> {
        match self.dispatcher.link_types().as_slice() {
            [link] => Some(*link),
            _ => None,
        }
    }

    /// Whether `listen` has started reading packets.
    pub fn is_reading(&self) -> bool {
        *self.reading.borrow()
    }

    /// Wait until `listen` has started reading packets. Returns immediately
    /// once it has, for any number of callers.
    pub async fn reading(&self) {
        let mut rx = self.reading.subscribe();
        // The sender lives as long as `self`, so this cannot fail early.
        let _ = rx.wait_for(|reading| *reading).await;
    }

    /// Read packets from every active handle and pass each to `handler`
    /// until `cancel` completes or every handle reaches end of stream.
    ///
    /// Must be called after `activate`. Returns `CaptureError::Cancelled`
    /// when `cancel` fires first, `Ok(())` when the handles are exhausted.
    /// Packets from one handle arrive in capture order; packets from
    /// different handles interleave in arrival order.
    pub async fn listen<F, H>(&self, cancel: F, mut handler: H) -> Result<(), CaptureError>
    where
        F: Future<Output = ()>,
        H: FnMut(Packet),
    {
        if self.dispatcher.len() == 0 {
            return Err(CaptureError::NotActivated);
        }
        let mut packets = self
            .dispatcher
            .take_receiver()
            .ok_or(CaptureError::AlreadyListening)?;

        let producers = self.dispatcher.start();
        debug!("Started {} drain threads", producers);
        self.reading.send_replace(true);

        tokio::pin!(cancel);
        let mut delivered: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => {
                    self.dispatcher.shutdown();
                    info!("Listener cancelled after {} packets", delivered);
                    return Err(CaptureError::Cancelled);
                }
                packet = packets.recv() => match packet {
                    Some(packet) => {
                        handler(packet);
                        delivered += 1;
                    }
                    None => {
                        info!("All capture handles exhausted after {} packets", delivered);
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Run `listen` on a Tokio task.
    ///
    /// The returned channel yields the error `listen` ended with, if any,
    /// and closes once it finishes. Must be called within a Tokio runtime.
    pub fn listen_background<F, H>(
        self: &Arc<Self>,
        cancel: F,
        handler: H,
    ) -> mpsc::Receiver<CaptureError>
    where
        F: Future<Output = ()> + Send + 'static,
        H: FnMut(Packet) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let listener = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = listener.listen(cancel, handler).await {
                let _ = tx.send(e).await;
            }
        });
        rx
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.dispatcher.shutdown();
    }
}
