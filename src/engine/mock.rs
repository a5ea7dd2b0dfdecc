//! Scripted capture engine for tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{ActiveHandle, CaptureEngine, CaptureInfo, InactiveHandle, LinkType, Packet};
use crate::error::{EngineError, Stage};

/// Behaviour of one scripted device or file.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    pub packets: Vec<Packet>,
    /// Fail this setup stage with a generic engine error.
    pub fail_at: Option<Stage>,
    pub monitor_unsupported: bool,
    /// Keep timing out after the scripted packets instead of ending the stream.
    pub endless: bool,
}

impl MockDevice {
    pub fn with_packets(packets: Vec<Packet>) -> Self {
        Self {
            packets,
            ..Default::default()
        }
    }

    pub fn failing(stage: Stage) -> Self {
        Self {
            fail_at: Some(stage),
            ..Default::default()
        }
    }

    pub fn endless(packets: Vec<Packet>) -> Self {
        Self {
            packets,
            endless: true,
            ..Default::default()
        }
    }
}

/// What the engine observed, shared with the test.
#[derive(Debug, Default)]
pub struct Journal {
    /// (device, filter) pairs in attach order.
    pub filters: Mutex<Vec<(String, String)>>,
    /// (device, snaplen) pairs.
    pub snaplens: Mutex<Vec<(String, u32)>>,
    pub timeouts: Mutex<Vec<(String, Option<Duration>)>>,
    pub closed: AtomicUsize,
}

impl Journal {
    pub fn filters(&self) -> Vec<(String, String)> {
        self.filters.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MockEngine {
    devices: HashMap<String, MockDevice>,
    files: HashMap<PathBuf, MockDevice>,
    pub journal: Arc<Journal>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, name: &str, device: MockDevice) -> Self {
        self.devices.insert(name.to_string(), device);
        self
    }

    pub fn file(mut self, path: &str, device: MockDevice) -> Self {
        self.files.insert(PathBuf::from(path), device);
        self
    }
}

fn fail(device: &MockDevice, stage: Stage) -> Result<(), EngineError> {
    if device.fail_at == Some(stage) {
        return Err(EngineError::Pcap(format!("scripted {} failure", stage)));
    }
    Ok(())
}

impl CaptureEngine for MockEngine {
    fn inactive(&self, name: &str) -> Result<Box<dyn InactiveHandle>, EngineError> {
        let device = self
            .devices
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Pcap(format!("{}: No such device exists", name)))?;
        fail(&device, Stage::InactiveHandle)?;
        Ok(Box::new(MockInactive {
            name: name.to_string(),
            device,
            journal: self.journal.clone(),
        }))
    }

    fn open_offline(&self, path: &Path) -> Result<Box<dyn ActiveHandle>, EngineError> {
        let device = self.files.get(path).cloned().ok_or_else(|| {
            EngineError::Pcap(format!("{}: No such file or directory", path.display()))
        })?;
        fail(&device, Stage::OpenFile)?;
        Ok(Box::new(MockActive::new(
            path.display().to_string(),
            device,
            self.journal.clone(),
        )))
    }
}

struct MockInactive {
    name: String,
    device: MockDevice,
    journal: Arc<Journal>,
}

impl InactiveHandle for MockInactive {
    fn set_timestamp_source(&mut self, _name: &str) -> Result<(), EngineError> {
        fail(&self.device, Stage::TimestampSource)
    }

    fn set_promiscuous(&mut self, _enabled: bool) -> Result<(), EngineError> {
        fail(&self.device, Stage::Promiscuous)
    }

    fn set_monitor_mode(&mut self, _enabled: bool) -> Result<(), EngineError> {
        if self.device.monitor_unsupported {
            return Err(EngineError::MonitorUnsupported);
        }
        fail(&self.device, Stage::Monitor)
    }

    fn set_snaplen(&mut self, snaplen: u32) -> Result<(), EngineError> {
        fail(&self.device, Stage::SnapLen)?;
        self.journal
            .snaplens
            .lock()
            .unwrap()
            .push((self.name.clone(), snaplen));
        Ok(())
    }

    fn set_buffer_size(&mut self, _bytes: u32) -> Result<(), EngineError> {
        fail(&self.device, Stage::BufferSize)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), EngineError> {
        fail(&self.device, Stage::BufferTimeout)?;
        self.journal
            .timeouts
            .lock()
            .unwrap()
            .push((self.name.clone(), timeout));
        Ok(())
    }

    fn activate(self: Box<Self>) -> Result<Box<dyn ActiveHandle>, EngineError> {
        fail(&self.device, Stage::Activate)?;
        Ok(Box::new(MockActive::new(self.name, self.device, self.journal)))
    }
}

struct MockActive {
    name: String,
    device: MockDevice,
    queue: VecDeque<Packet>,
    journal: Arc<Journal>,
}

impl MockActive {
    fn new(name: String, device: MockDevice, journal: Arc<Journal>) -> Self {
        let queue = device.packets.iter().cloned().collect();
        Self {
            name,
            device,
            queue,
            journal,
        }
    }
}

impl ActiveHandle for MockActive {
    fn set_filter(&mut self, filter: &str) -> Result<(), EngineError> {
        fail(&self.device, Stage::Filter)?;
        self.journal
            .filters
            .lock()
            .unwrap()
            .push((self.name.clone(), filter.to_string()));
        Ok(())
    }

    fn link_type(&self) -> LinkType {
        LinkType::ETHERNET
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, EngineError> {
        if let Some(packet) = self.queue.pop_front() {
            return Ok(Some(packet));
        }
        if self.device.endless {
            thread::sleep(Duration::from_millis(1));
            return Err(EngineError::Timeout);
        }
        Ok(None)
    }

    fn close(self: Box<Self>) {
        self.journal.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Build a small packet whose payload identifies its origin and sequence.
pub fn packet(origin: u8, seq: u8) -> Packet {
    let data = vec![origin, seq, 0xde, 0xad];
    Packet {
        info: CaptureInfo {
            timestamp: timestamp(u64::from(seq)),
            caplen: data.len() as u32,
            len: data.len() as u32,
        },
        link_type: LinkType::ETHERNET,
        data,
    }
}

pub fn timestamp(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::new(1_700_000_000 + secs, 123_456_789)
}
