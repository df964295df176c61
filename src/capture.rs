//! Capture sources: one blocking producer per configured interface or file.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hickory_proto::rr::RecordType;
use pcap::{Activated, Capture, Precision};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::CaptureSettings;
use crate::decode::{LinkKind, extract_dns_question};
use crate::event::DnsQueryEvent;
use crate::normalizer::DomainNormalizer;

/// Prefix selecting offline replay of a capture file instead of a live device.
const FILE_SOURCE_PREFIX: &str = "file:";

/// A frame as delivered by the capture backend.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub timestamp: DateTime<Utc>,
    pub data: Bytes,
}

/// Anything that yields captured frames, filter already applied.
pub trait FrameSource: Send {
    fn link_kind(&self) -> LinkKind;

    /// Next frame; `Ok(None)` once the source is exhausted or closed.
    /// An `Err` is terminal.
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;
}

/// libpcap-backed source, live device or offline file.
///
/// Live devices are read with a timeout so that a quiet interface still
/// notices `stop` within `read_timeout_ms`.
pub struct PcapSource {
    name: String,
    capture: Capture<dyn Activated>,
    link: LinkKind,
    stop: Arc<AtomicBool>,
}

impl PcapSource {
    /// Opens `source` and installs the filter. Both steps failing is fatal for
    /// the caller.
    pub fn open(source: &str, settings: &CaptureSettings, stop: Arc<AtomicBool>) -> Result<Self> {
        let mut capture: Capture<dyn Activated> =
            if let Some(path) = source.strip_prefix(FILE_SOURCE_PREFIX) {
                Capture::from_file_with_precision(Path::new(path), Precision::Nano)
                    .with_context(|| format!("open capture file {path}"))?
                    .into()
            } else {
                Capture::from_device(source)
                    .with_context(|| format!("lookup capture device {source}"))?
                    .promisc(settings.promiscuous)
                    .snaplen(settings.snaplen)
                    .immediate_mode(settings.immediate_mode)
                    .timeout(settings.read_timeout_ms)
                    .precision(Precision::Nano)
                    .open()
                    .with_context(|| format!("open capture device {source}"))?
                    .into()
            };

        capture
            .filter(&settings.filter, true)
            .with_context(|| format!("install filter {:?} on {source}", settings.filter))?;

        let link = LinkKind::from_dlt(capture.get_datalink().0);
        if let LinkKind::Unsupported(dlt) = link {
            warn!(source = %source, dlt, "unsupported link type, frames will be dropped");
        }
        info!(source = %source, filter = %settings.filter, "capture opened");

        Ok(Self {
            name: source.to_string(),
            capture,
            link,
            stop,
        })
    }
}

impl FrameSource for PcapSource {
    fn link_kind(&self) -> LinkKind {
        self.link
    }

    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        loop {
            match self.capture.next_packet() {
                Ok(packet) => {
                    let ts = packet.header.ts;
                    // with nanosecond precision tv_usec carries nanoseconds
                    let timestamp =
                        DateTime::from_timestamp(ts.tv_sec as i64, ts.tv_usec as u32)
                            .unwrap_or_else(Utc::now);
                    return Ok(Some(CapturedFrame {
                        timestamp,
                        data: Bytes::copy_from_slice(packet.data),
                    }));
                }
                Err(pcap::Error::TimeoutExpired) => {
                    if self.stop.load(Ordering::Relaxed) {
                        return Ok(None);
                    }
                }
                Err(pcap::Error::NoMorePackets) => return Ok(None),
                Err(err) => {
                    return Err(err).with_context(|| format!("read from {}", self.name));
                }
            }
        }
    }
}

/// Per-source producer loop: frames in, normalized events out.
pub struct CaptureSource {
    name: String,
    frames: Box<dyn FrameSource>,
    normalizer: Arc<DomainNormalizer>,
    stop: Arc<AtomicBool>,
}

/// Counters reported when a source loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureReport {
    pub frames: u64,
    pub events: u64,
    pub skipped: u64,
}

impl CaptureSource {
    pub fn new(
        name: impl Into<String>,
        frames: Box<dyn FrameSource>,
        normalizer: Arc<DomainNormalizer>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: name.into(),
            frames,
            normalizer,
            stop,
        }
    }

    /// Runs until the source is exhausted or fails, the channel closes, or
    /// `stop` is raised.
    ///
    /// Blocks on a full channel, so this must run on a blocking thread.
    pub fn run(mut self, tx: mpsc::Sender<DnsQueryEvent>) -> CaptureReport {
        let mut report = CaptureReport::default();
        let link = self.frames.link_kind();

        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!(source = %self.name, "stop requested, ending capture");
                break;
            }
            let frame = match self.frames.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!(source = %self.name, "capture source closed");
                    break;
                }
                Err(err) => {
                    error!(source = %self.name, error = %format!("{err:#}"), "capture source failed");
                    break;
                }
            };
            report.frames += 1;

            let Some((source_address, question)) = extract_dns_question(link, &frame.data) else {
                report.skipped += 1;
                continue;
            };

            let normalized_domain = self.normalizer.normalize(&question.qname);
            let event = DnsQueryEvent {
                timestamp: frame.timestamp,
                raw_domain: question.qname,
                normalized_domain,
                query_type: RecordType::from(question.qtype),
                source_address,
            };

            if tx.blocking_send(event).is_err() {
                info!(source = %self.name, "event channel closed, stopping capture");
                break;
            }
            report.events += 1;
        }

        debug!(
            source = %self.name,
            frames = report.frames,
            events = report.events,
            skipped = report.skipped,
            "capture loop finished"
        );
        report
    }
}
