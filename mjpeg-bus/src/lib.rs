//! Turns the MJPEG byte stream of a transcoder subprocess into decoded
//! frames for a consumer that may be slower than the producer.
//!
//! ```text
//! ByteSource ─▶ FrameScanner ─▶ FrameDecode ─▶ FrameSink ═▶ FrameReceiver
//!  (stdout)      (SOI..EOI)      (JPEG→BGRA)    (bounded)    (freshest wins)
//! ```

pub mod args;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod latency;
pub mod locate;
pub mod platform;
pub mod scanner;
pub mod session;
pub mod sink;
pub mod source;

#[cfg(test)]
mod test_util;

pub use error::{BusError, BusResult};
pub use frame::{DecodedFrame, PixelFormat, Sequenced};
pub use latency::{LatencyLevel, LatencyProfile};
pub use session::{RecorderSession, SessionOptions, SessionReport};
pub use sink::{FrameReceiver, FrameSink, frame_channel};
