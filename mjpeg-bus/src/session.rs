use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{ChildStderr, Command},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    decoder::FrameDecode,
    error::{BusError, BusResult},
    ingest::{DEFAULT_READ_SIZE, Ingest, IngestReport},
    scanner::{FrameScanner, ScannerConfig},
    sink::FrameSink,
    source::ProcessSource,
};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to run one transcoder process.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub scanner: ScannerConfig,
    pub read_size: usize,
    pub shutdown_timeout: Duration,
}

impl SessionOptions {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            scanner: ScannerConfig::default(),
            read_size: DEFAULT_READ_SIZE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub struct SessionReport {
    /// `None` when shutdown timed out before the loop reported back.
    pub ingest: Option<IngestReport>,
    pub exit_status: Option<ExitStatus>,
    pub timed_out: bool,
}

type Outcome = (BusResult<IngestReport>, Option<ExitStatus>);

/// One running transcoder feeding one sink.
///
/// The process and the ingestion loop live on a spawned task; the session
/// only holds the cancellation token and the task handle. Dropping the
/// session without stopping it cancels the task and kills the process.
pub struct RecorderSession {
    cancel: CancellationToken,
    handle: Option<JoinHandle<Outcome>>,
    pid: Option<u32>,
    shutdown_timeout: Duration,
}

impl RecorderSession {
    /// Spawns the transcoder and starts ingesting its stdout.
    pub fn start<D>(options: SessionOptions, decoder: D, sink: FrameSink<D::Output>) -> BusResult<Self>
    where
        D: FrameDecode + 'static,
    {
        let mut ingest = Ingest::new(FrameScanner::new(options.scanner), decoder, sink)
            .with_read_size(options.read_size)?;

        log::info!(
            "starting transcoder: {} {}",
            options.program.display(),
            options.args.join(" ")
        );
        let mut child = Command::new(&options.program)
            .args(&options.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(BusError::Spawn)?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }
        let mut source = ProcessSource::from_child(child)?;
        let pid = source.id();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = ingest.run(&mut source, &task_cancel).await;
            let status = match source.wait().await {
                Ok(status) => {
                    log::info!("transcoder exited: {}", status);
                    Some(status)
                }
                Err(e) => {
                    log::error!("wait for transcoder: {}", e);
                    None
                }
            };
            (result, status)
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
            pid,
            shutdown_timeout: options.shutdown_timeout,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Fires when the session is stopped. Useful to tie a consumer's
    /// lifetime to the session.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Waits for the transcoder to finish on its own.
    pub async fn wait(mut self) -> BusResult<SessionReport> {
        let Some(handle) = self.handle.take() else {
            return Err(BusError::Task("session already joined".to_string()));
        };
        let (result, exit_status) = handle.await?;
        Ok(SessionReport {
            ingest: Some(result?),
            exit_status,
            timed_out: false,
        })
    }

    /// Cancels ingestion and kills the transcoder, waiting at most the
    /// shutdown timeout. Running out of time is reported, not an error.
    pub async fn stop(mut self) -> BusResult<SessionReport> {
        self.cancel.cancel();
        let Some(mut handle) = self.handle.take() else {
            return Err(BusError::Task("session already joined".to_string()));
        };

        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(joined) => {
                let (result, exit_status) = joined?;
                Ok(SessionReport {
                    ingest: Some(result?),
                    exit_status,
                    timed_out: false,
                })
            }
            Err(_) => {
                log::warn!(
                    "transcoder did not shut down within {:?}, abandoning it",
                    self.shutdown_timeout
                );
                handle.abort();
                Ok(SessionReport {
                    ingest: None,
                    exit_status: None,
                    timed_out: true,
                })
            }
        }
    }
}

impl Drop for RecorderSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log::debug!(target: "transcoder", "{}", line),
            Ok(None) => break,
            Err(e) => {
                log::debug!(target: "transcoder", "stderr closed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
