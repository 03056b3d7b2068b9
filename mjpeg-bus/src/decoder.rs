use image::{DynamicImage, ImageFormat};

use crate::{
    error::BusResult,
    frame::{DecodedFrame, PixelFormat, Sequenced},
    scanner::RawFrame,
};

/// Turns a delimited frame into whatever the sink carries.
///
/// The ingestion loop treats every error as a dropped frame; the sequence
/// number of a failed frame is simply never delivered.
pub trait FrameDecode: Send {
    type Output: Sequenced + Send + 'static;

    fn decode(&mut self, frame: RawFrame<'_>) -> BusResult<Self::Output>;
}

/// Decodes JPEG frames into a fixed 32-bit pixel layout.
#[derive(Clone, Debug, Default)]
pub struct JpegDecoder {
    target: PixelFormat,
}

impl JpegDecoder {
    pub fn new(target: PixelFormat) -> Self {
        Self { target }
    }

    pub fn target(&self) -> PixelFormat {
        self.target
    }
}

impl FrameDecode for JpegDecoder {
    type Output = DecodedFrame;

    fn decode(&mut self, frame: RawFrame<'_>) -> BusResult<DecodedFrame> {
        let image = image::load_from_memory_with_format(frame.data, ImageFormat::Jpeg)?;
        let (width, height) = (image.width(), image.height());
        let data = normalize(image, self.target);
        Ok(DecodedFrame::new(
            frame.sequence,
            data,
            width,
            height,
            self.target,
        ))
    }
}

/// Converts a decoded image to `target`. 32-bit RGBA input is reordered in
/// place; every other layout costs exactly one converting copy.
fn normalize(image: DynamicImage, target: PixelFormat) -> Vec<u8> {
    match image {
        DynamicImage::ImageRgba8(buf) => {
            let mut data = buf.into_raw();
            if target == PixelFormat::Bgra8 {
                for px in data.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
            }
            data
        }
        DynamicImage::ImageRgb8(buf) => {
            let src = buf.as_raw();
            let mut data = Vec::with_capacity(src.len() / 3 * 4);
            for px in src.chunks_exact(3) {
                let (r, g, b) = (px[0], px[1], px[2]);
                match target {
                    PixelFormat::Bgra8 => data.extend_from_slice(&[b, g, r, 0xFF]),
                    PixelFormat::Rgba8 => data.extend_from_slice(&[r, g, b, 0xFF]),
                }
            }
            data
        }
        DynamicImage::ImageLuma8(buf) => {
            let src = buf.as_raw();
            let mut data = Vec::with_capacity(src.len() * 4);
            for &v in src {
                data.extend_from_slice(&[v, v, v, 0xFF]);
            }
            data
        }
        other => normalize(DynamicImage::ImageRgba8(other.to_rgba8()), target),
    }
}
