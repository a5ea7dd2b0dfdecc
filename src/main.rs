//! rawcap - capture TCP traffic on every matching interface.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rawcap::{dump_handler, parse_size, CaptureError, CaptureOptions, CaptureSource, Listener};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rawcap")]
#[command(about = "Capture packets from network interfaces or a pcap file")]
struct Cli {
    /// Capture engine: libpcap (live) or pcap_file (replay)
    #[arg(short, long, default_value = "libpcap")]
    engine: CaptureSource,

    /// Interface name, index, MAC or IP address; the file path for pcap_file
    #[arg(short = 'i', long, default_value = "")]
    host: String,

    /// Port to capture, 0 for every port
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Transport layer protocol
    #[arg(short, long, default_value = "tcp")]
    transport: String,

    /// Capture responses as well as requests
    #[arg(long)]
    track_response: bool,

    /// Enable promiscuous mode
    #[arg(long)]
    promisc: bool,

    /// Enable monitor mode on wireless interfaces
    #[arg(long)]
    monitor: bool,

    /// Use a 64 KiB snapshot length instead of one derived from the MTU
    #[arg(long)]
    override_snaplen: bool,

    /// Packet buffer timeout in milliseconds, 0 blocks until packets arrive
    #[arg(long, default_value_t = 0)]
    buffer_timeout: u64,

    /// Timestamp source (host, host_lowprec, host_hiprec, adapter, ...)
    #[arg(long)]
    timestamp_type: Option<String>,

    /// Kernel buffer size, e.g. 2mb
    #[arg(long, value_parser = parse_size)]
    buffer_size: Option<u32>,

    /// Custom BPF filter replacing the derived one
    #[arg(long)]
    bpf_filter: Option<String>,

    /// Write captured packets to this pcap file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> CaptureOptions {
        CaptureOptions {
            promiscuous: self.promisc,
            monitor: self.monitor,
            override_snaplen: self.override_snaplen,
            buffer_timeout: Some(Duration::from_millis(self.buffer_timeout)),
            timestamp_source: self.timestamp_type.clone(),
            buffer_size: self.buffer_size,
            bpf_filter: self.bpf_filter.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "rawcap=debug" } else { "rawcap=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut listener = Listener::new(
        &cli.host,
        cli.port,
        &cli.transport,
        cli.engine,
        cli.track_response,
    )
    .context("Failed to resolve capture interfaces")?;
    listener.set_options(cli.options());
    listener.activate().context("Failed to activate capture")?;

    for iface in listener.interfaces() {
        tracing::debug!("Selected {} (index {}, {:?})", iface.name, iface.index, iface.ips);
    }

    let cancel = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl-C, stopping capture");
    };

    let result = match &cli.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let target = path.display().to_string();
            let on_error: rawcap::dump::ErrorCallback = Arc::new(move |e: std::io::Error| {
                tracing::error!("Failed to write packet to {}: {}", target, e);
            });
            let link = listener.link_type();
            if link.is_none() {
                tracing::warn!("Handles disagree on link type, recording Ethernet");
            }
            let mut out = BufWriter::new(file);
            let handler = dump_handler(&mut out, link, Some(on_error))
                .with_context(|| format!("Failed to write header to {}", path.display()))?;
            tracing::info!("Writing packets to {}", path.display());
            let result = listener.listen(cancel, handler).await;
            out.flush()
                .with_context(|| format!("Failed to flush {}", path.display()))?;
            result
        }
        None => {
            listener
                .listen(cancel, |packet| {
                    tracing::info!(
                        "{} bytes ({} captured, {})",
                        packet.info.len,
                        packet.info.caplen,
                        packet.link_type
                    );
                })
                .await
        }
    };

    match result {
        Ok(()) | Err(CaptureError::Cancelled) => Ok(()),
        Err(e) => Err(e).context("Capture failed"),
    }
}
