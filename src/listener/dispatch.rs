//! Fan-in of every active handle into one bounded packet channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::{ActiveHandle, LinkType, Packet};
use crate::error::EngineError;

/// Capacity of the shared packet channel. A full channel blocks the drain
/// threads, which in turn leaves packets in the engine's buffers.
pub const CHANNEL_CAPACITY: usize = 1000;

/// Handles keyed by interface name (or `pcap_file`), plus the channel they
/// feed. A `None` slot is a handle checked out by its drain thread.
struct HandleSet {
    handles: HashMap<String, Option<Box<dyn ActiveHandle>>>,
    /// Master sender; dropped when the last handle is released.
    packets: Option<mpsc::Sender<Packet>>,
}

pub(crate) struct Dispatcher {
    set: Mutex<HandleSet>,
    receiver: Mutex<Option<mpsc::Receiver<Packet>>>,
    shutdown: AtomicBool,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            set: Mutex::new(HandleSet {
                handles: HashMap::new(),
                packets: Some(tx),
            }),
            receiver: Mutex::new(Some(rx)),
            shutdown: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleSet> {
        // A drain thread never panics while holding the lock, but stay usable if one did.
        self.set.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an active handle. A handle already stored under `key` is closed.
    pub fn insert(&self, key: impl Into<String>, handle: Box<dyn ActiveHandle>) {
        let previous = self.lock().handles.insert(key.into(), Some(handle));
        if let Some(Some(previous)) = previous {
            previous.close();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.lock().handles.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Distinct link types of the handles not yet being drained.
    pub fn link_types(&self) -> Vec<LinkType> {
        let mut types: Vec<_> = self
            .lock()
            .handles
            .values()
            .flatten()
            .map(|handle| handle.link_type())
            .collect();
        types.sort_by_key(|link| link.0);
        types.dedup();
        types
    }

    /// Take the consuming end of the packet channel. Only the first caller gets it.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Packet>> {
        self.receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Ask every drain thread to stop. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Spawn one drain thread per registered handle not yet being drained.
    /// Returns the number of threads started.
    pub fn start(self: &Arc<Self>) -> usize {
        let mut set = self.lock();
        let Some(packets) = set.packets.clone() else {
            return 0;
        };

        let mut started = 0;
        let mut failed = Vec::new();
        for (key, slot) in set.handles.iter_mut() {
            let Some(handle) = slot.take() else {
                continue;
            };

            let dispatcher = Arc::clone(self);
            let thread_key = key.clone();
            let tx = packets.clone();
            let spawned = thread::Builder::new()
                .name(format!("drain-{}", key))
                .spawn(move || dispatcher.drain(thread_key, handle, tx));

            match spawned {
                Ok(_) => started += 1,
                Err(e) => {
                    warn!("Failed to spawn drain thread for {}: {}", key, e);
                    failed.push(key.clone());
                }
            }
        }

        // The handle moved into the failed spawn closure and was dropped with it.
        for key in failed {
            Self::remove(&mut set, &key);
        }
        started
    }

    /// Pump packets from `handle` into the shared channel until shutdown,
    /// end of stream, or the consumer going away.
    fn drain(&self, key: String, mut handle: Box<dyn ActiveHandle>, tx: mpsc::Sender<Packet>) {
        let mut forwarded: u64 = 0;
        loop {
            if self.is_shutdown() {
                debug!("Drain for {} observed shutdown", key);
                break;
            }
            match handle.next_packet() {
                Ok(Some(packet)) => {
                    if tx.blocking_send(packet).is_err() {
                        debug!("Packet consumer for {} went away", key);
                        break;
                    }
                    forwarded += 1;
                }
                Ok(None) => {
                    debug!("End of stream on {}", key);
                    break;
                }
                Err(EngineError::Timeout) => {
                    if tx.is_closed() {
                        debug!("Packet consumer for {} went away", key);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Read error on {}: {}", key, e);
                    break;
                }
            }
        }

        drop(tx);
        self.release(&key);
        handle.close();
        debug!("Closed handle {} after {} packets", key, forwarded);
    }

    /// Deregister `key`. Closes the packet channel when no handle remains.
    fn release(&self, key: &str) {
        let mut set = self.lock();
        Self::remove(&mut set, key);
    }

    fn remove(set: &mut HandleSet, key: &str) {
        if set.handles.remove(key).is_some() && set.handles.is_empty() {
            // Closing inside the critical section: exactly one release sees the set empty.
            if set.packets.take().is_some() {
                debug!("Last handle released, closing packet channel");
            }
        }
    }
}
