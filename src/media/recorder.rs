use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use anyhow::Context;
use futures::StreamExt;
use mjpeg_bus::{
    args::TranscoderArgs,
    decoder::JpegDecoder,
    frame_channel,
    locate::locate_transcoder,
    platform::HostPlatform,
    sink::SinkStats,
    DecodedFrame, FrameReceiver, RecorderSession, SessionOptions, SessionReport,
};
use tokio_util::sync::CancellationToken;

use crate::{config::RecorderConfig, media::fps::FpsMeter, media::snapshot::SnapshotWriter};

/// What the consumer saw over one recording.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerSummary {
    pub frames: u64,
    pub last_sequence: u64,
    pub snapshots: u64,
    pub sink: SinkStats,
}

#[derive(Debug)]
pub struct RecorderSummary {
    pub session: SessionReport,
    pub consumer: ConsumerSummary,
}

/// Runs one transcoder session and consumes its frames until the
/// transcoder exits or the recorder is cancelled.
pub struct Recorder {
    config: RecorderConfig,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Builds the transcoder command line for `platform` from the config.
    pub fn session_options(&self, platform: HostPlatform) -> anyhow::Result<SessionOptions> {
        let input = self.config.input_source()?;
        let output = self.config.output_options()?;
        let latency = self.config.latency_level()?;
        let args = TranscoderArgs::build(&platform, &input, &output, latency)?;
        let program = locate_transcoder(platform, self.config.ffmpeg_path.as_deref())?;

        let mut options = SessionOptions::new(program, args.into_vec());
        options.scanner = self.config.scanner_config()?;
        options.shutdown_timeout = self.config.shutdown_timeout();
        Ok(options)
    }

    /// Detects the host, locates the transcoder and records.
    pub async fn start(&self) -> anyhow::Result<Option<RecorderSummary>> {
        let options = self.session_options(HostPlatform::detect())?;
        self.run(options).await
    }

    /// Records from an already assembled command. Returns `None` when the
    /// recorder is already running.
    pub async fn run(&self, options: SessionOptions) -> anyhow::Result<Option<RecorderSummary>> {
        if self.started.swap(true, Ordering::Relaxed) {
            log::warn!("Recorder already started");
            return Ok(None);
        }
        let result = self.record(options).await;
        self.started.store(false, Ordering::Relaxed);
        result.map(Some)
    }

    async fn record(&self, options: SessionOptions) -> anyhow::Result<RecorderSummary> {
        let snapshots = match &self.config.snapshot {
            Some(s) => Some(SnapshotWriter::new(&s.dir, s.every)?),
            None => None,
        };

        let (sink, receiver) = frame_channel(self.config.sink_capacity)?;
        log::info!("Recorder: starting {}", options.program.display());
        let session = RecorderSession::start(options, JpegDecoder::default(), sink)
            .context("start transcoder")?;

        let mut consumer = tokio::spawn(consume(receiver, self.cancel.child_token(), snapshots));

        let (session, consumer) = tokio::select! {
            _ = self.cancel.cancelled() => {
                log::info!("Recorder: cancelled");
                let report = session.stop().await?;
                (report, (&mut consumer).await?)
            }
            consumed = &mut consumer => {
                log::info!("Recorder: stream ended");
                (session.wait().await?, consumed?)
            }
        };

        if let Some(ingest) = &session.ingest {
            log::info!(
                "Recorder: {} frames decoded, {} failed, {} rejected, {} resyncs",
                ingest.decoded,
                ingest.decode_failures,
                ingest.rejected,
                ingest.scan.resyncs
            );
        }
        Ok(RecorderSummary { session, consumer })
    }
}

/// Takes the freshest frame each time one is ready until the sink closes
/// or `cancel` fires.
async fn consume(
    mut receiver: FrameReceiver<DecodedFrame>,
    cancel: CancellationToken,
    snapshots: Option<SnapshotWriter>,
) -> ConsumerSummary {
    let mut meter = FpsMeter::new();
    let mut summary = ConsumerSummary::default();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = receiver.next() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        summary.frames += 1;
        summary.last_sequence = frame.sequence;
        if let Some(reading) = meter.tick(Instant::now()) {
            log::info!(
                "Recorder: {:.1} fps (avg {:.1}), latest {}",
                reading.current,
                reading.average,
                frame
            );
        }

        if let Some(writer) = &snapshots {
            if writer.is_due(summary.frames) {
                match writer.save(&frame).await {
                    Ok(_) => summary.snapshots += 1,
                    Err(e) => log::warn!("Recorder: snapshot failed: {:#}", e),
                }
            }
        }
    }

    receiver.close_and_drain();
    summary.sink = receiver.stats();
    summary
}

#[cfg(test)]
#[path = "recorder_test.rs"]
mod recorder_test;
