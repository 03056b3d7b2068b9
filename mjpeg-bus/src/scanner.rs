//! Frame boundary recovery for a concatenated MJPEG byte stream.
//!
//! The transcoder writes JPEG images back to back (`-f image2pipe`), and the
//! pipe hands them to us in reads of arbitrary size. The scanner keeps one
//! byte of look-back so a marker split across two reads is still seen, and
//! accumulates the in-progress frame in a buffer that is reused for every
//! frame.
//!
//! ```text
//!  read N            read N+1          read N+2
//! ┌──────────────┐ ┌───────────────┐ ┌─────────────────┐
//! │..FF│D8 body..│ │..body..FF│D9 FF│ │D8 body FF D9 ...│
//! └──────────────┘ └───────────────┘ └─────────────────┘
//!      └── SOI ──────────────── EOI ┘   └ SOI split ┘
//! ```

use bytes::BytesMut;

use crate::error::{BusError, BusResult};

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
/// Default ceiling for a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

const INITIAL_CAPACITY: usize = 80 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScannerConfig {
    start_marker: [u8; 2],
    end_marker: [u8; 2],
    max_frame_size: usize,
}

impl ScannerConfig {
    pub fn new(
        start_marker: [u8; 2],
        end_marker: [u8; 2],
        max_frame_size: usize,
    ) -> BusResult<Self> {
        if max_frame_size == 0 {
            return Err(BusError::config("max frame size must be positive"));
        }
        if max_frame_size < start_marker.len() + end_marker.len() {
            return Err(BusError::config(format!(
                "max frame size {} cannot hold both markers",
                max_frame_size
            )));
        }
        if start_marker == end_marker {
            return Err(BusError::config("start and end markers must differ"));
        }
        // a marker like [x, x] matches on overlapping pairs and cannot be
        // located with a single byte of look-back
        for marker in [start_marker, end_marker] {
            if marker[0] == marker[1] {
                return Err(BusError::config(format!(
                    "marker {:02X}{:02X} repeats its first byte",
                    marker[0], marker[1]
                )));
            }
        }
        // chained markers such as AA BB / BB CC share a byte, so one pair
        // would close the frame the other just opened
        if start_marker[1] == end_marker[0] || end_marker[1] == start_marker[0] {
            return Err(BusError::config(format!(
                "markers {:02X}{:02X} and {:02X}{:02X} overlap",
                start_marker[0], start_marker[1], end_marker[0], end_marker[1]
            )));
        }
        Ok(Self {
            start_marker,
            end_marker,
            max_frame_size,
        })
    }

    /// JPEG SOI/EOI framing with the given size ceiling.
    pub fn jpeg(max_frame_size: usize) -> BusResult<Self> {
        Self::new(JPEG_SOI, JPEG_EOI, max_frame_size)
    }

    pub fn start_marker(&self) -> [u8; 2] {
        self.start_marker
    }

    pub fn end_marker(&self) -> [u8; 2] {
        self.end_marker
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            start_marker: JPEG_SOI,
            end_marker: JPEG_EOI,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Capturing,
}

/// Counters for everything the scanner recovered from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub bytes: u64,
    /// Frames delimited by a start and end marker.
    pub frames: u64,
    /// Partial frames dropped because a new start marker arrived first.
    pub resyncs: u64,
    /// Frames dropped for exceeding the size ceiling.
    pub oversized: u64,
    /// End markers seen outside of a frame.
    pub orphan_ends: u64,
    /// Partial frames dropped at end of stream.
    pub truncated: u64,
}

/// A complete frame, start marker through end marker inclusive.
///
/// Borrowed from the scanner (or the chunk being scanned) for the duration
/// of the callback only.
#[derive(Debug)]
pub struct RawFrame<'a> {
    pub sequence: u64,
    pub data: &'a [u8],
}

pub struct FrameScanner {
    config: ScannerConfig,
    state: ScanState,
    buf: BytesMut,
    prev: Option<u8>,
    frame_counter: u64,
    stats: ScanStats,
}

impl FrameScanner {
    pub fn new(config: ScannerConfig) -> Self {
        let capacity = INITIAL_CAPACITY.min(config.max_frame_size);
        Self {
            config,
            state: ScanState::Idle,
            buf: BytesMut::with_capacity(capacity),
            prev: None,
            frame_counter: 0,
            stats: ScanStats::default(),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Bytes of the in-progress frame held in the accumulator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Allocated size of the accumulator. Grows, never shrinks.
    pub fn buffer_capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Sequence number of the last completed frame (0 before the first).
    pub fn last_sequence(&self) -> u64 {
        self.frame_counter
    }

    /// Scans one chunk, calling `on_frame` for every frame it completes.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_frame: F)
    where
        F: FnMut(RawFrame<'_>),
    {
        self.stats.bytes += chunk.len() as u64;
        let [s0, s1] = self.config.start_marker;
        let [e0, e1] = self.config.end_marker;
        let max = self.config.max_frame_size;

        // where the current frame's bytes begin inside this chunk
        let mut run_start = match self.state {
            ScanState::Capturing => Some(0),
            ScanState::Idle => None,
        };
        let mut prev = self.prev;

        for (i, &byte) in chunk.iter().enumerate() {
            let Some(last) = prev.replace(byte) else {
                continue;
            };

            if last == s0 && byte == s1 {
                if self.state == ScanState::Capturing {
                    self.stats.resyncs += 1;
                    log::debug!(
                        "start marker inside frame, dropping {} partial bytes",
                        self.buf.len() + i - run_start.unwrap_or(0)
                    );
                }
                self.buf.clear();
                self.state = ScanState::Capturing;
                if i == 0 {
                    // marker straddles the previous read
                    self.buf.extend_from_slice(&[last]);
                    run_start = Some(0);
                } else {
                    run_start = Some(i - 1);
                }
            } else if last == e0 && byte == e1 {
                if self.state == ScanState::Idle {
                    self.stats.orphan_ends += 1;
                    continue;
                }

                let segment = &chunk[run_start.unwrap_or(0)..=i];
                let frame_len = self.buf.len() + segment.len();
                run_start = None;
                self.state = ScanState::Idle;
                if frame_len > max {
                    self.drop_oversized(frame_len);
                    continue;
                }

                self.frame_counter += 1;
                self.stats.frames += 1;
                let sequence = self.frame_counter;
                if self.buf.is_empty() {
                    on_frame(RawFrame {
                        sequence,
                        data: segment,
                    });
                } else {
                    self.buf.extend_from_slice(segment);
                    on_frame(RawFrame {
                        sequence,
                        data: &self.buf,
                    });
                    self.buf.clear();
                }
            }
        }
        self.prev = prev;

        if self.state == ScanState::Capturing {
            let tail = &chunk[run_start.unwrap_or(0)..];
            let frame_len = self.buf.len() + tail.len();
            if frame_len > max {
                self.state = ScanState::Idle;
                self.drop_oversized(frame_len);
            } else {
                self.buf.extend_from_slice(tail);
            }
        }
    }

    /// Ends the stream. A frame still being captured is incomplete and is
    /// discarded. Returns whether anything was dropped.
    pub fn finish(&mut self) -> bool {
        let dropped = self.state == ScanState::Capturing;
        if dropped {
            self.stats.truncated += 1;
            log::warn!(
                "stream ended inside a frame, dropping {} incomplete bytes",
                self.buf.len()
            );
        }
        self.reset();
        dropped
    }

    /// Abandons any partial frame and forgets the look-back byte. Counters
    /// are kept so sequence numbers stay unique across resets.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = ScanState::Idle;
        self.prev = None;
    }

    fn drop_oversized(&mut self, frame_len: usize) {
        self.stats.oversized += 1;
        log::warn!(
            "frame exceeds {} bytes (at least {}), dropped; waiting for next start marker",
            self.config.max_frame_size,
            frame_len
        );
        self.buf.clear();
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}

#[cfg(test)]
#[path = "scanner_test.rs"]
mod scanner_test;
