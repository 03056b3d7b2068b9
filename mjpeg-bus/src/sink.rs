//! Bounded hand-off between the ingestion loop and a slower consumer.
//!
//! The producer never waits: when the queue is full the new frame is
//! released on the spot. The consumer drains everything that is queued each
//! time it looks and keeps only the newest frame, so it never works through
//! a stale backlog. Frames that lose either way are dropped (and thereby
//! freed) immediately.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{BusError, BusResult},
    frame::Sequenced,
};

pub const DEFAULT_SINK_CAPACITY: usize = 8;

/// Result of [`FrameSink::offer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// Queue full; the frame was released.
    Rejected,
    /// Consumer gone; the frame was released.
    Closed,
}

#[derive(Debug, Default)]
struct SinkCounters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    displaced: AtomicU64,
    delivered: AtomicU64,
    released: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Frames queued by the producer.
    pub accepted: u64,
    /// Frames released because the queue was full.
    pub rejected: u64,
    /// Queued frames skipped in favour of a fresher one.
    pub displaced: u64,
    /// Frames handed to the consumer.
    pub delivered: u64,
    /// Frames released when the receiver shut down.
    pub released: u64,
}

impl SinkCounters {
    fn snapshot(&self) -> SinkStats {
        SinkStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            displaced: self.displaced.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

/// Creates a sink/receiver pair holding at most `capacity` frames.
pub fn frame_channel<T: Sequenced>(capacity: usize) -> BusResult<(FrameSink<T>, FrameReceiver<T>)> {
    if capacity == 0 {
        return Err(BusError::config("sink capacity must be positive"));
    }
    let (writer, reader) = mpsc::channel(capacity);
    let counters = Arc::new(SinkCounters::default());
    Ok((
        FrameSink {
            writer,
            counters: Arc::clone(&counters),
        },
        FrameReceiver {
            inner: reader,
            counters,
        },
    ))
}

pub struct FrameSink<T> {
    writer: mpsc::Sender<T>,
    counters: Arc<SinkCounters>,
}

impl<T> Clone for FrameSink<T> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<T: Sequenced> FrameSink<T> {
    /// Queues `frame` without waiting.
    pub fn offer(&self, frame: T) -> Offer {
        match self.writer.try_send(frame) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Offer::Accepted
            }
            Err(TrySendError::Full(frame)) => {
                log::debug!("sink full, releasing frame {}", frame.sequence());
                drop(frame);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Offer::Rejected
            }
            Err(TrySendError::Closed(frame)) => {
                drop(frame);
                Offer::Closed
            }
        }
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.writer.max_capacity() - self.writer.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.writer.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }

    pub fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }
}

pub struct FrameReceiver<T> {
    inner: mpsc::Receiver<T>,
    counters: Arc<SinkCounters>,
}

impl<T: Sequenced> FrameReceiver<T> {
    /// Waits for a frame and returns the newest one queued, releasing any
    /// older ones. `None` once every sink is gone and the queue is empty.
    pub async fn recv_latest(&mut self) -> Option<T> {
        let first = self.inner.recv().await?;
        Some(self.keep_latest(first))
    }

    /// Like [`recv_latest`](Self::recv_latest) but returns `None` instead of
    /// waiting.
    pub fn try_recv_latest(&mut self) -> Option<T> {
        let first = self.inner.try_recv().ok()?;
        Some(self.keep_latest(first))
    }

    /// Closes the queue and releases everything still in it.
    pub fn close_and_drain(&mut self) -> usize {
        self.release_queued()
    }

    /// Calls `on_frame` with the freshest frame each time one is available
    /// until the producer finishes or `cancel` fires. The callee owns each
    /// frame. Returns how many queued frames were released on the way out.
    pub async fn run<F>(mut self, cancel: CancellationToken, mut on_frame: F) -> usize
    where
        F: FnMut(u64, T),
    {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = self.recv_latest() => match frame {
                    Some(frame) => on_frame(frame.sequence(), frame),
                    None => break,
                },
            }
        }
        self.close_and_drain()
    }

    pub fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }

    fn keep_latest(&mut self, mut latest: T) -> T {
        while let Ok(next) = self.inner.try_recv() {
            let stale = std::mem::replace(&mut latest, next);
            log::trace!("skipping stale frame {}", stale.sequence());
            drop(stale);
            self.counters.displaced.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        latest
    }
}

/// Each item is the freshest frame available at poll time.
impl<T: Sequenced> Stream for FrameReceiver<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(this.keep_latest(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> FrameReceiver<T> {
    fn release_queued(&mut self) -> usize {
        self.inner.close();
        let mut released = 0;
        while let Ok(frame) = self.inner.try_recv() {
            drop(frame);
            released += 1;
        }
        self.counters
            .released
            .fetch_add(released as u64, Ordering::Relaxed);
        released
    }
}

impl<T> Drop for FrameReceiver<T> {
    fn drop(&mut self) {
        self.release_queued();
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;
