//! The recording loop on top of `mjpeg-bus`.
//!
//! ```text
//! ffmpeg ─▶ RecorderSession ─▶ FrameReceiver ─▶ consume ─┬─▶ FpsMeter (log)
//!                                                        └─▶ SnapshotWriter (every n-th)
//! ```

pub mod fps;
pub mod recorder;
pub mod snapshot;
