//! Frame → image bytes

use std::borrow::Cow;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder as _};
use thiserror::Error;

use crate::capture::{FrameBuffer, PixelFormat};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Frame has no pixels")]
    EmptyFrame,
    #[error("Frame data is {actual} bytes, expected {expected}")]
    Truncated { expected: usize, actual: usize },
    #[error("Failed to encode {format:?}: {source}")]
    Codec {
        format: SnapshotFormat,
        #[source]
        source: image::ImageError,
    },
    #[error("Failed to encode WebP: {0}")]
    WebP(String),
}

/// Output formats served over HTTP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Jpeg,
    WebP,
}

impl SnapshotFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Jpeg => "jpg",
            SnapshotFormat::WebP => "webp",
        }
    }

    pub const fn content_type(self) -> &'static str {
        match self {
            SnapshotFormat::Jpeg => "image/jpeg",
            SnapshotFormat::WebP => "image/webp",
        }
    }
}

/// Pluggable codec used by the snapshot handlers
pub trait FrameEncoder: Send + Sync {
    fn encode(
        &self,
        frame: &FrameBuffer,
        format: SnapshotFormat,
        quality: u8,
    ) -> Result<Vec<u8>, EncodeError>;
}

/// JPEG through the `image` crate, lossy WebP through libwebp.
///
/// `quality` (1..=100) applies to both.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageEncoder;

impl FrameEncoder for ImageEncoder {
    fn encode(
        &self,
        frame: &FrameBuffer,
        format: SnapshotFormat,
        quality: u8,
    ) -> Result<Vec<u8>, EncodeError> {
        let (pixels, color) = normalized_pixels(frame)?;
        let (width, height) = (frame.width(), frame.height());
        let quality = quality.clamp(1, 100);

        match format {
            SnapshotFormat::Jpeg => {
                let mut out = Vec::with_capacity(pixels.len() / 8);
                JpegEncoder::new_with_quality(&mut out, quality)
                    .write_image(&pixels, width, height, color)
                    .map_err(|source| EncodeError::Codec { format, source })?;
                Ok(out)
            }
            SnapshotFormat::WebP => {
                // libwebp takes RGB only
                let rgb: Cow<'_, [u8]> = match color {
                    ExtendedColorType::L8 => {
                        Cow::Owned(pixels.iter().flat_map(|&l| [l, l, l]).collect())
                    }
                    _ => pixels,
                };
                let encoded = webp::Encoder::from_rgb(&rgb, width, height)
                    .encode_simple(false, f32::from(quality))
                    .map_err(|e| EncodeError::WebP(format!("{e:?}")))?;
                Ok(encoded.to_vec())
            }
        }
    }
}

/// Pixel data in a layout both codecs accept: packed RGB or 8-bit luma.
fn normalized_pixels(
    frame: &FrameBuffer,
) -> Result<(Cow<'_, [u8]>, ExtendedColorType), EncodeError> {
    let meta = frame.meta();
    if meta.is_degenerate() {
        return Err(EncodeError::EmptyFrame);
    }

    let expected = meta.byte_len();
    let data = frame.data();
    if data.len() < expected {
        return Err(EncodeError::Truncated {
            expected,
            actual: data.len(),
        });
    }
    let data = &data[..expected];

    Ok(match meta.format {
        PixelFormat::Rgb24 => (Cow::Borrowed(data), ExtendedColorType::Rgb8),
        PixelFormat::Gray8 => (Cow::Borrowed(data), ExtendedColorType::L8),
        PixelFormat::Bgr24 => {
            let rgb: Vec<u8> = data.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0]]).collect();
            (Cow::Owned(rgb), ExtendedColorType::Rgb8)
        }
        PixelFormat::Rgba32 => {
            let rgb: Vec<u8> = data.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect();
            (Cow::Owned(rgb), ExtendedColorType::Rgb8)
        }
    })
}
