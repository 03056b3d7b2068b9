//! The ingestion path: read a chunk, scan it, decode each completed frame
//! and offer it to the sink, strictly in that order and one chunk at a
//! time. Reads happen on the async task; scanning and decoding happen on
//! the blocking pool.

use tokio_util::sync::CancellationToken;

use crate::{
    decoder::FrameDecode,
    error::{BusError, BusResult},
    scanner::{FrameScanner, ScanStats},
    sink::{FrameSink, Offer},
    source::ByteSource,
};

/// Default size of a single pipe read.
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// Why the ingestion loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestEnd {
    EndOfStream,
    Cancelled,
    /// Every receiver was dropped.
    ConsumerGone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestReport {
    pub scan: ScanStats,
    pub decoded: u64,
    pub decode_failures: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub end: IngestEnd,
}

#[derive(Clone, Copy, Default)]
struct Counts {
    decoded: u64,
    decode_failures: u64,
    accepted: u64,
    rejected: u64,
    closed: bool,
}

/// Scanner, decoder and sink travel together to the blocking pool for
/// every chunk and come back when it is done.
struct Stage<D: FrameDecode> {
    scanner: FrameScanner,
    decoder: D,
    sink: FrameSink<D::Output>,
    counts: Counts,
}

impl<D: FrameDecode> Stage<D> {
    fn process(&mut self, chunk: &[u8]) {
        let decoder = &mut self.decoder;
        let sink = &self.sink;
        let counts = &mut self.counts;
        self.scanner.feed(chunk, |raw| {
            if counts.closed {
                return;
            }
            let sequence = raw.sequence;
            let frame = match decoder.decode(raw) {
                Ok(frame) => frame,
                Err(e) => {
                    counts.decode_failures += 1;
                    log::debug!("frame {} dropped: {}", sequence, e);
                    return;
                }
            };
            counts.decoded += 1;
            match sink.offer(frame) {
                Offer::Accepted => counts.accepted += 1,
                Offer::Rejected => counts.rejected += 1,
                Offer::Closed => counts.closed = true,
            }
        });
    }
}

pub struct Ingest<D: FrameDecode> {
    /// `None` only after a decoder panicked mid-chunk.
    stage: Option<Stage<D>>,
    read_size: usize,
}

impl<D: FrameDecode + 'static> Ingest<D> {
    pub fn new(scanner: FrameScanner, decoder: D, sink: FrameSink<D::Output>) -> Self {
        Self {
            stage: Some(Stage {
                scanner,
                decoder,
                sink,
                counts: Counts::default(),
            }),
            read_size: DEFAULT_READ_SIZE,
        }
    }

    pub fn with_read_size(mut self, read_size: usize) -> BusResult<Self> {
        if read_size == 0 {
            return Err(BusError::config("read size must be positive"));
        }
        self.read_size = read_size;
        Ok(self)
    }

    pub fn scanner(&self) -> Option<&FrameScanner> {
        self.stage.as_ref().map(|stage| &stage.scanner)
    }

    /// Runs until the source ends, `cancel` fires or the consumer goes away.
    ///
    /// Each chunk is scanned, decoded and offered on the blocking pool so a
    /// slow decode never stalls the runtime; chunks are still handled one
    /// at a time and in order. A pending read is dropped as soon as
    /// `cancel` fires and the source is aborted; a chunk already being
    /// decoded finishes first. Whatever partial frame the scanner holds is
    /// discarded, never decoded. Only a failing read (or a panicking
    /// decoder) is returned as an error.
    pub async fn run<S: ByteSource>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> BusResult<IngestReport> {
        let Some(mut stage) = self.stage.take() else {
            return Err(BusError::Task("ingestion stage lost to a decoder panic".to_string()));
        };
        stage.counts = Counts::default();
        let mut buf = vec![0u8; self.read_size];

        let outcome = loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                read = source.read_chunk(&mut buf) => Some(read),
            };

            let n = match read {
                None => {
                    log::info!("ingestion cancelled after frame {}", stage.scanner.last_sequence());
                    source.abort();
                    stage.scanner.reset();
                    break Ok(IngestEnd::Cancelled);
                }
                Some(Ok(0)) => {
                    stage.scanner.finish();
                    break Ok(IngestEnd::EndOfStream);
                }
                Some(Ok(n)) => n,
                Some(Err(e)) => {
                    log::error!("byte source failed: {}", e);
                    source.abort();
                    stage.scanner.reset();
                    break Err(BusError::Source(e));
                }
            };

            let joined = tokio::task::spawn_blocking(move || {
                stage.process(&buf[..n]);
                (stage, buf)
            })
            .await;
            (stage, buf) = match joined {
                Ok(parts) => parts,
                Err(e) => {
                    log::error!("frame decoding panicked: {}", e);
                    source.abort();
                    return Err(e.into());
                }
            };

            if stage.counts.closed {
                log::info!("frame consumer is gone, stopping ingestion");
                source.abort();
                stage.scanner.reset();
                break Ok(IngestEnd::ConsumerGone);
            }
        };

        let scan = stage.scanner.stats();
        let counts = stage.counts;
        self.stage = Some(stage);

        Ok(IngestReport {
            scan,
            decoded: counts.decoded,
            decode_failures: counts.decode_failures,
            accepted: counts.accepted,
            rejected: counts.rejected,
            end: outcome?,
        })
    }
}

#[cfg(test)]
#[path = "ingest_test.rs"]
mod ingest_test;
