// 帧编码

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageError, RgbImage};
use thiserror::Error;

/// 默认JPEG质量
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] ImageError),

    #[error("Cannot encode an empty frame")]
    EmptyFrame,

    #[error("Encoder failed: {0}")]
    Other(String),
}

/// 输出帧编码器
pub trait FrameEncoder: Send + Sync + 'static {
    fn encode(&self, image: &RgbImage) -> Result<Bytes, EncodeError>;
}

pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegFrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, image: &RgbImage) -> Result<Bytes, EncodeError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EncodeError::EmptyFrame);
        }

        let mut buffer = Vec::with_capacity(image.width() as usize * image.height() as usize / 4);
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
        encoder.encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )?;

        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_encodes_jpeg() {
        let encoder = JpegFrameEncoder::default();
        let image = RgbImage::from_pixel(32, 32, Rgb([200, 100, 50]));

        let data = encoder.encode(&image).unwrap();
        // SOI / EOI 标记
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
        assert_eq!(&data[data.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&data).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 32));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let encoder = JpegFrameEncoder::default();
        assert!(matches!(
            encoder.encode(&RgbImage::new(0, 0)),
            Err(EncodeError::EmptyFrame)
        ));
    }

    #[test]
    fn test_quality_clamped() {
        assert_eq!(JpegFrameEncoder::new(0).quality(), 1);
        assert_eq!(JpegFrameEncoder::new(150).quality(), 100);
    }
}
