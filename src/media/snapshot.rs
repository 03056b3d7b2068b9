use std::path::PathBuf;

use anyhow::Context;
use bytes::Bytes;
use jpeg_encoder::{ColorType, Encoder};
use mjpeg_bus::{DecodedFrame, PixelFormat};

pub const SNAPSHOT_QUALITY: u8 = 85;

/// Writes every n-th delivered frame to disk as a JPEG.
#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    dir: PathBuf,
    every: u64,
    quality: u8,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> anyhow::Result<Self> {
        if every == 0 {
            anyhow::bail!("snapshot interval must be positive");
        }
        Ok(Self {
            dir: dir.into(),
            every,
            quality: SNAPSHOT_QUALITY,
        })
    }

    /// Whether the `delivered`-th frame handed to the consumer is due.
    pub fn is_due(&self, delivered: u64) -> bool {
        delivered > 0 && delivered % self.every == 0
    }

    pub fn path_for(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("frame-{:08}.jpg", sequence))
    }

    /// Encodes `frame` on the blocking pool and returns the file written.
    pub async fn save(&self, frame: &DecodedFrame) -> anyhow::Result<PathBuf> {
        let width = u16::try_from(frame.width)
            .with_context(|| format!("frame width {} too large for jpeg", frame.width))?;
        let height = u16::try_from(frame.height)
            .with_context(|| format!("frame height {} too large for jpeg", frame.height))?;
        let color = match frame.format {
            PixelFormat::Bgra8 => ColorType::Bgra,
            PixelFormat::Rgba8 => ColorType::Rgba,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create {}", self.dir.display()))?;

        let path = self.path_for(frame.sequence);
        // shares the frame buffer with the blocking task
        let data: Bytes = frame.data.clone();
        let quality = self.quality;
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let encoder = Encoder::new_file(&target, quality)?;
            encoder.encode(&data, width, height, color)?;
            Ok(())
        })
        .await?
        .with_context(|| format!("write snapshot {}", path.display()))?;

        log::debug!("Recorder: snapshot {} saved", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lite-recorder-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(SnapshotWriter::new("snapshots", 0).is_err());
    }

    #[test]
    fn test_is_due_every_nth_frame() {
        let writer = SnapshotWriter::new("snapshots", 3).unwrap();
        let due: Vec<u64> = (0..10).filter(|n| writer.is_due(*n)).collect();
        assert_eq!(due, vec![3, 6, 9]);
        assert_eq!(
            writer.path_for(42),
            Path::new("snapshots").join("frame-00000042.jpg")
        );
    }

    #[tokio::test]
    async fn test_save_writes_a_jpeg() {
        let dir = scratch_dir("snapshot");
        let writer = SnapshotWriter::new(&dir, 1).unwrap();
        let frame = DecodedFrame::new(7, vec![0x40; 8 * 4 * 4], 8, 4, PixelFormat::Bgra8);

        let path = writer.save(&frame).await.unwrap();

        assert_eq!(path, dir.join("frame-00000007.jpg"));
        let written = std::fs::read(&path).unwrap();
        assert_eq!(&written[..2], &[0xFF, 0xD8]);
        assert_eq!(&written[written.len() - 2..], &[0xFF, 0xD9]);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
