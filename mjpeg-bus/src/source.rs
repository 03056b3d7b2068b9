use std::{future::Future, io, process::ExitStatus};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, ChildStdout},
};

use crate::error::{BusError, BusResult};

/// Where the ingestion loop pulls its bytes from.
///
/// Chunk sizes carry no meaning; a read may end anywhere inside a frame or
/// a marker. Dropping a pending `read_chunk` future must be safe, which is
/// how a read is interrupted on cancellation.
pub trait ByteSource: Send {
    /// Reads into `buf`, returning the number of bytes written. `Ok(0)`
    /// means end of stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Stops the producer. Reads after an abort report end of stream.
    fn abort(&mut self);
}

/// Any async reader, e.g. a socket or an in-memory buffer.
pub struct ReaderSource<R> {
    reader: Option<R>,
}

impl<R> ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.reader.is_none()
    }
}

impl<R> ByteSource for ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf).await,
            None => Ok(0),
        }
    }

    fn abort(&mut self) {
        self.reader = None;
    }
}

/// The transcoder's stdout. Aborting kills the child, since closing our end
/// of the pipe alone may leave it blocked on capture.
pub struct ProcessSource {
    child: Child,
    stdout: Option<ChildStdout>,
}

impl ProcessSource {
    /// Takes over `child`, whose stdout must have been piped.
    pub fn from_child(mut child: Child) -> BusResult<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BusError::config("transcoder stdout is not piped"))?;
        Ok(Self {
            child,
            stdout: Some(stdout),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Waits for the child to exit, closing the pipe first.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.stdout = None;
        self.child.wait().await
    }
}

impl ByteSource for ProcessSource {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.read(buf).await,
            None => Ok(0),
        }
    }

    fn abort(&mut self) {
        self.stdout = None;
        if let Err(e) = self.child.start_kill() {
            // already reaped
            log::debug!("kill transcoder: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_source_reads_until_eof() {
        let mut source = ReaderSource::new(&b"abcdef"[..]);
        let mut buf = [0u8; 4];

        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 2);
        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_aborted_reader_reports_end_of_stream() {
        let mut source = ReaderSource::new(&b"abcdef"[..]);
        let mut buf = [0u8; 4];

        source.abort();

        assert!(source.is_aborted());
        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_source_abort_kills_child() {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdout(std::process::Stdio::piped())
            .spawn()
            .unwrap();
        let mut source = ProcessSource::from_child(child).unwrap();

        source.abort();
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), source.wait())
            .await
            .unwrap()
            .unwrap();

        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_source_requires_piped_stdout() {
        let child = tokio::process::Command::new("true")
            .stdout(std::process::Stdio::null())
            .spawn()
            .unwrap();

        assert!(matches!(
            ProcessSource::from_child(child),
            Err(BusError::Config(_))
        ));
    }
}
