use std::fmt::{Display, Formatter};

use bytes::Bytes;

/// Anything that carries a frame sequence number through the sink.
pub trait Sequenced {
    fn sequence(&self) -> u64;
}

/// Fixed 32-bit pixel layouts a decoded frame can be normalised to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// B, G, R, A byte order (the little-endian ARGB word layout).
    #[default]
    Bgra8,
    /// R, G, B, A byte order.
    Rgba8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }
}

/// A decoded bitmap ready for display.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub sequence: u64,
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl DecodedFrame {
    pub fn new(sequence: u64, data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * format.bytes_per_pixel()
        );
        Self {
            sequence,
            data: Bytes::from(data),
            width,
            height,
            format,
        }
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Pixel at `(x, y)` in the frame's own byte order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * self.format.bytes_per_pixel();
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl Sequenced for DecodedFrame {
    fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Display for DecodedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "DecodedFrame seq: {}, {}x{}, format: {:?}, data_len: {}",
            self.sequence,
            self.width,
            self.height,
            self.format,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_lookup() {
        let data = vec![
            1, 2, 3, 255, 4, 5, 6, 255, //
            7, 8, 9, 255, 10, 11, 12, 255,
        ];
        let frame = DecodedFrame::new(3, data, 2, 2, PixelFormat::Bgra8);
        assert_eq!(frame.stride(), 8);
        assert_eq!(frame.pixel(1, 1), Some([10, 11, 12, 255]));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.sequence(), 3);
    }

    #[test]
    fn test_display() {
        let frame = DecodedFrame::new(7, vec![0; 4], 1, 1, PixelFormat::Rgba8);
        assert_eq!(
            frame.to_string(),
            "DecodedFrame seq: 7, 1x1, format: Rgba8, data_len: 4"
        );
    }
}
