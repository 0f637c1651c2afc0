//! Frame payload to upright grayscale image conversion.

use std::io::Cursor;

use image::{imageops, GrayImage, ImageFormat};
use jpeg_decoder::{Decoder, PixelFormat as JpegFormat};

use super::frame::{FrameMetadata, PixelFormat, Rotation};
use crate::recognition::RecognitionError;

/// Decode a frame payload into an 8-bit luma image, ignoring rotation.
pub fn decode_luma(data: &[u8], meta: &FrameMetadata) -> Result<GrayImage, RecognitionError> {
    if let Some(expected) = meta.expected_len() {
        if data.len() < expected {
            return Err(RecognitionError::Decode(format!(
                "{:?} frame {}x{} needs {} bytes, got {}",
                meta.format,
                meta.width,
                meta.height,
                expected,
                data.len()
            )));
        }
    }

    let (width, height) = (meta.width as usize, meta.height as usize);
    let stride = meta.stride as usize;
    if stride < width * meta.format.bytes_per_pixel() as usize {
        return Err(RecognitionError::Decode(format!(
            "stride {stride} too small for {width} {:?} pixels",
            meta.format
        )));
    }

    let luma: Vec<u8> = match meta.format {
        PixelFormat::Mjpeg => return decode_jpeg(data),
        PixelFormat::Gray8 | PixelFormat::Nv12 => {
            // NV12 starts with a full-resolution Y plane
            plane_rows(data, stride, height)
                .flat_map(|row| row[..width].iter().copied())
                .collect()
        }
        PixelFormat::Yuyv4 => plane_rows(data, stride, height)
            .flat_map(|row| row[..width * 2].iter().step_by(2).copied())
            .collect(),
        PixelFormat::Rgb24 => plane_rows(data, stride, height)
            .flat_map(|row| row[..width * 3].chunks_exact(3).map(|p| bt601(p[0], p[1], p[2])))
            .collect(),
        PixelFormat::Bgr24 => plane_rows(data, stride, height)
            .flat_map(|row| row[..width * 3].chunks_exact(3).map(|p| bt601(p[2], p[1], p[0])))
            .collect(),
    };

    GrayImage::from_raw(meta.width, meta.height, luma)
        .ok_or_else(|| RecognitionError::Decode("luma buffer size mismatch".into()))
}

/// Rotate clockwise so the content reads upright.
pub fn upright(image: GrayImage, rotation: Rotation) -> GrayImage {
    match rotation {
        Rotation::Deg0 => image,
        Rotation::Deg90 => imageops::rotate90(&image),
        Rotation::Deg180 => imageops::rotate180(&image),
        Rotation::Deg270 => imageops::rotate270(&image),
    }
}

pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>, RecognitionError> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| RecognitionError::Decode(e.to_string()))?;
    Ok(out.into_inner())
}

fn decode_jpeg(data: &[u8]) -> Result<GrayImage, RecognitionError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| RecognitionError::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| RecognitionError::Decode("jpeg header missing".into()))?;

    let luma: Vec<u8> = match info.pixel_format {
        JpegFormat::L8 => pixels,
        // Big-endian samples; keep the high byte
        JpegFormat::L16 => pixels.chunks_exact(2).map(|p| p[0]).collect(),
        JpegFormat::RGB24 => pixels
            .chunks_exact(3)
            .map(|p| bt601(p[0], p[1], p[2]))
            .collect(),
        JpegFormat::CMYK32 => pixels
            .chunks_exact(4)
            .map(|p| {
                let k = u16::from(p[3]);
                let channel = |c: u8| ((255 - u16::from(c)) * (255 - k) / 255) as u8;
                bt601(channel(p[0]), channel(p[1]), channel(p[2]))
            })
            .collect(),
    };

    GrayImage::from_raw(u32::from(info.width), u32::from(info.height), luma)
        .ok_or_else(|| RecognitionError::Decode("jpeg buffer size mismatch".into()))
}

fn plane_rows(data: &[u8], stride: usize, height: usize) -> impl Iterator<Item = &[u8]> {
    data.chunks(stride.max(1)).take(height)
}

// ITU-R BT.601 weights
fn bt601(r: u8, g: u8, b: u8) -> u8 {
    ((299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000) as u8
}
