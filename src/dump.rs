//! Writing captured packets to a pcap file.

use std::io::{self, Write};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::UNIX_EPOCH;

use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::{DataLink, Endianness, PcapError, TsResolution};
use tracing::{debug, warn};

use crate::engine::{LinkType, Packet};

/// Snapshot length recorded in dump file headers. Longer frames are truncated.
pub const DUMP_SNAPLEN: u32 = 65536;

/// Write failures queued for the error callback; later ones are dropped.
const ERROR_BACKLOG: usize = 64;

/// Callback receiving record write failures.
pub type ErrorCallback = Arc<dyn Fn(io::Error) + Send + Sync>;

fn dump_header(link: LinkType) -> PcapHeader {
    PcapHeader {
        version_major: 2,
        version_minor: 4,
        ts_correction: 0,
        ts_accuracy: 0,
        snaplen: DUMP_SNAPLEN,
        datalink: DataLink::from(link.0),
        ts_resolution: TsResolution::NanoSecond,
        endianness: Endianness::Little,
    }
}

fn io_error(err: PcapError) -> io::Error {
    match err {
        PcapError::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

fn write_record<W: Write>(writer: &mut PcapWriter<W>, packet: &Packet) -> io::Result<()> {
    let since_epoch = packet
        .info
        .timestamp
        .duration_since(UNIX_EPOCH)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let data = &packet.data[..packet.data.len().min(DUMP_SNAPLEN as usize)];
    let orig_len = packet.info.len.max(data.len() as u32);

    writer
        .write_packet(&PcapPacket::new(since_epoch, orig_len, data))
        .map(|_| ())
        .map_err(io_error)
}

/// Start the thread that feeds write failures to `callback`. It exits once
/// the returned sender is dropped.
fn spawn_reporter(callback: ErrorCallback) -> Option<SyncSender<io::Error>> {
    let (tx, rx) = mpsc::sync_channel::<io::Error>(ERROR_BACKLOG);
    let spawned = thread::Builder::new()
        .name("dump-errors".to_string())
        .spawn(move || {
            for err in rx {
                callback(err);
            }
        });

    match spawned {
        Ok(_) => Some(tx),
        Err(e) => {
            warn!("Failed to start dump error reporter: {}", e);
            None
        }
    }
}

/// Build a packet handler that appends every packet to `out` as a pcap file.
///
/// The file header is written immediately with nanosecond timestamps; a
/// missing link type is recorded as Ethernet. Record write failures are
/// queued to `on_error`, which runs on its own thread, and never stop the
/// handler.
pub fn dump_handler<W>(
    out: W,
    link: Option<LinkType>,
    on_error: Option<ErrorCallback>,
) -> io::Result<impl FnMut(Packet) + Send>
where
    W: Write + Send,
{
    let header = dump_header(link.unwrap_or(LinkType::ETHERNET));
    let mut writer = PcapWriter::with_header(out, header).map_err(io_error)?;
    let errors = on_error.and_then(spawn_reporter);

    Ok(move |packet: Packet| {
        let Err(e) = write_record(&mut writer, &packet) else {
            return;
        };
        debug!("Failed to write packet to dump: {}", e);
        if let Some(errors) = &errors {
            if let Err(TrySendError::Full(_)) = errors.try_send(e) {
                debug!("Dump error backlog full, dropping error");
            }
        }
    })
}
