use image::{Rgb, RgbImage};

use crate::scanner::{JPEG_EOI, JPEG_SOI};

/// A solid-colour baseline JPEG.
pub(crate) fn jpeg_fixture(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(rgb));
    let mut data = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut data, 90)
        .encode_image(&img)
        .unwrap();
    data
}

/// Marker-delimited bytes that are not a decodable JPEG.
pub(crate) fn corrupt_fixture() -> Vec<u8> {
    let mut data = JPEG_SOI.to_vec();
    data.extend_from_slice(&[0x13, 0x37, 0x00, 0x42]);
    data.extend_from_slice(&JPEG_EOI);
    data
}
