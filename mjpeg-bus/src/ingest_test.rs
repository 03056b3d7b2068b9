use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::{
    decoder::JpegDecoder,
    frame::Sequenced,
    scanner::{FrameScanner, JPEG_EOI, JPEG_SOI, RawFrame, ScannerConfig},
    sink::frame_channel,
    source::ReaderSource,
    test_util::{corrupt_fixture, jpeg_fixture},
};

// ============================================================================
// Helpers
// ============================================================================

enum Tail {
    EndOfStream,
    Fail,
    Hang,
}

/// Hands out pre-cut chunks, then behaves as `tail` says.
struct ScriptedSource {
    chunks: VecDeque<Vec<u8>>,
    tail: Tail,
    aborted: bool,
}

impl ScriptedSource {
    fn new(data: &[u8], chunk_size: usize, tail: Tail) -> Self {
        Self {
            chunks: data.chunks(chunk_size).map(|c| c.to_vec()).collect(),
            tail,
            aborted: false,
        }
    }
}

impl ByteSource for ScriptedSource {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.aborted {
            return Ok(0);
        }
        if let Some(chunk) = self.chunks.pop_front() {
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk[n..].to_vec());
            }
            return Ok(n);
        }
        match self.tail {
            Tail::EndOfStream => Ok(0),
            Tail::Fail => Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe torn down")),
            Tail::Hang => std::future::pending().await,
        }
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

/// Counts frames created and released by the decoder.
#[derive(Clone, Default)]
struct Ledger {
    created: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

struct Tracked {
    seq: u64,
    released: Arc<AtomicUsize>,
}

impl Sequenced for Tracked {
    fn sequence(&self) -> u64 {
        self.seq
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct TrackingDecoder {
    ledger: Ledger,
}

impl FrameDecode for TrackingDecoder {
    type Output = Tracked;

    fn decode(&mut self, frame: RawFrame<'_>) -> BusResult<Tracked> {
        self.ledger.created.fetch_add(1, Ordering::SeqCst);
        Ok(Tracked {
            seq: frame.sequence,
            released: Arc::clone(&self.ledger.released),
        })
    }
}

fn marker_frame(body: &[u8]) -> Vec<u8> {
    let mut out = JPEG_SOI.to_vec();
    out.extend_from_slice(body);
    out.extend_from_slice(&JPEG_EOI);
    out
}

// ------------------------------------------------------------------------
// Full pipeline with real JPEGs
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_k_frames_are_delivered_in_order() {
    let mut data = Vec::new();
    for i in 0..5u8 {
        data.extend(jpeg_fixture(8, 8, [i * 40, 10, 200]));
    }
    let (sink, mut rx) = frame_channel(16).unwrap();
    let mut ingest = Ingest::new(FrameScanner::default(), JpegDecoder::default(), sink)
        .with_read_size(13)
        .unwrap();
    let mut source = ReaderSource::new(io::Cursor::new(data));

    let report = ingest.run(&mut source, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.end, IngestEnd::EndOfStream);
    assert_eq!(report.decoded, 5);
    assert_eq!(report.accepted, 5);
    assert_eq!(report.scan.frames, 5);
    drop(ingest);

    let mut seqs = Vec::new();
    while let Some(frame) = rx.try_recv_latest() {
        // everything was queued at once, so only the newest survives
        seqs.push(frame.sequence);
        assert_eq!((frame.width, frame.height), (8, 8));
    }
    assert_eq!(seqs, vec![5]);
    assert_eq!(rx.stats().displaced, 4);
}

#[tokio::test]
async fn test_corrupt_frame_leaves_a_sequence_gap() {
    let mut data = jpeg_fixture(8, 8, [1, 2, 3]);
    data.extend(corrupt_fixture());
    data.extend(jpeg_fixture(8, 8, [4, 5, 6]));
    let (sink, rx) = frame_channel(16).unwrap();
    let mut ingest = Ingest::new(FrameScanner::default(), JpegDecoder::default(), sink);
    let mut source = ScriptedSource::new(&data, 5, Tail::EndOfStream);

    let report = ingest.run(&mut source, &CancellationToken::new()).await.unwrap();
    drop(ingest);

    assert_eq!(report.scan.frames, 3);
    assert_eq!(report.decode_failures, 1);
    assert_eq!(report.decoded, 2);
    let seqs: Vec<u64> = rx
        .map(|frame| frame.sequence)
        .collect::<Vec<_>>()
        .await;
    // the stream yields the freshest; both were queued before we looked
    assert_eq!(seqs, vec![3]);
}

#[tokio::test]
async fn test_frames_after_oversized_one_still_decode() {
    let mut data = marker_frame(&[0x11; 5000]);
    data.extend(jpeg_fixture(4, 4, [9, 9, 9]));
    let max = data.len() - 5000;
    let scanner = FrameScanner::new(ScannerConfig::jpeg(max).unwrap());
    let (sink, mut rx) = frame_channel(4).unwrap();
    let mut ingest = Ingest::new(scanner, JpegDecoder::default(), sink);
    let mut source = ScriptedSource::new(&data, 64, Tail::EndOfStream);

    let report = ingest.run(&mut source, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.scan.oversized, 1);
    assert_eq!(report.decoded, 1);
    assert_eq!(rx.try_recv_latest().unwrap().sequence, 1);
}

// ------------------------------------------------------------------------
// Termination
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_source_error_is_terminal() {
    let data = marker_frame(b"one");
    let ledger = Ledger::default();
    let (sink, _rx) = frame_channel(4).unwrap();
    let mut ingest = Ingest::new(
        FrameScanner::default(),
        TrackingDecoder {
            ledger: ledger.clone(),
        },
        sink,
    );
    let mut source = ScriptedSource::new(&data, 2, Tail::Fail);

    let result = ingest.run(&mut source, &CancellationToken::new()).await;

    assert!(matches!(result, Err(BusError::Source(_))));
    assert!(source.aborted);
    assert_eq!(ledger.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_end_of_stream_mid_frame_decodes_nothing() {
    let mut data = marker_frame(b"whole");
    data.extend_from_slice(&JPEG_SOI);
    data.extend_from_slice(b"partial");
    let ledger = Ledger::default();
    let (sink, _rx) = frame_channel(4).unwrap();
    let mut ingest = Ingest::new(
        FrameScanner::default(),
        TrackingDecoder {
            ledger: ledger.clone(),
        },
        sink,
    );
    let mut source = ScriptedSource::new(&data, 3, Tail::EndOfStream);

    let report = ingest.run(&mut source, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.end, IngestEnd::EndOfStream);
    assert_eq!(report.scan.truncated, 1);
    assert_eq!(ledger.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropped_receiver_stops_ingestion() {
    let mut data = Vec::new();
    for _ in 0..10 {
        data.extend(marker_frame(b"x"));
    }
    let ledger = Ledger::default();
    let (sink, rx) = frame_channel(4).unwrap();
    drop(rx);
    let mut ingest = Ingest::new(
        FrameScanner::default(),
        TrackingDecoder {
            ledger: ledger.clone(),
        },
        sink,
    );
    let mut source = ScriptedSource::new(&data, data.len(), Tail::Hang);

    let report = ingest.run(&mut source, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.end, IngestEnd::ConsumerGone);
    assert!(source.aborted);
    assert_eq!(ledger.created.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_mid_stream_releases_every_frame() {
    let mut data = Vec::new();
    for i in 0..6u8 {
        data.extend(marker_frame(&[i; 20]));
    }
    // a frame still in flight when we cancel
    data.extend_from_slice(&JPEG_SOI);
    data.extend_from_slice(&[0x42; 30]);

    let ledger = Ledger::default();
    let (sink, rx) = frame_channel(4).unwrap();
    let mut ingest = Ingest::new(
        FrameScanner::default(),
        TrackingDecoder {
            ledger: ledger.clone(),
        },
        sink,
    );
    let mut source = ScriptedSource::new(&data, 9, Tail::Hang);
    let cancel = CancellationToken::new();

    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        let report = ingest.run(&mut source, &task_cancel).await;
        (report, source.aborted, ingest.scanner().map(|s| s.buffered()))
    });

    let created = Arc::clone(&ledger.created);
    tokio::time::timeout(Duration::from_secs(5), async move {
        while created.load(Ordering::SeqCst) < 6 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    let (report, aborted, buffered) = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    let report = report.unwrap();

    assert_eq!(report.end, IngestEnd::Cancelled);
    assert_eq!(report.accepted, 4);
    assert_eq!(report.rejected, 2);
    assert_eq!(report.scan.truncated, 0);
    assert!(aborted);
    assert_eq!(buffered, Some(0));

    drop(rx);
    assert_eq!(ledger.created.load(Ordering::SeqCst), 6);
    assert_eq!(ledger.released.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_zero_read_size_is_rejected() {
    let (sink, _rx) = frame_channel(1).unwrap();
    let ingest = Ingest::new(FrameScanner::default(), JpegDecoder::default(), sink);
    assert!(matches!(
        ingest.with_read_size(0),
        Err(BusError::Config(_))
    ));
}
