//! In-process image encoder abstraction
//!
//! Provides a trait-based encoder system that allows:
//! - One encoder per output format the raster backend emits
//! - Consistent quality settings across formats
//! - Object-safe dynamic dispatch from the pipeline

use std::io::Cursor;

use image::ImageEncoder as _;

use crate::capabilities::BackendKind;
use crate::error::EngineError;
use crate::format::OutputFormat;

/// Quality settings for image encoding
#[derive(Debug, Clone, Copy)]
pub struct EncoderQuality {
    /// Quality value (1-100, where 100 is best quality)
    pub quality: u8,
}

impl Default for EncoderQuality {
    fn default() -> Self {
        Self {
            quality: crate::constants::DEFAULT_ENCODE_QUALITY,
        }
    }
}

impl EncoderQuality {
    /// Create quality settings with specified quality level
    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

/// Result of encoding an image
#[derive(Debug)]
pub struct EncodedImage {
    /// The encoded image data
    pub data: Vec<u8>,
    /// The output format
    pub format: OutputFormat,
    /// Content-Type header value
    pub media_type: &'static str,
}

impl EncodedImage {
    pub fn new(data: Vec<u8>, format: OutputFormat) -> Self {
        let media_type = format.media_type();
        Self {
            data,
            format,
            media_type,
        }
    }
}

/// Trait for image encoders
///
/// Implementations encode raw RGBA pixel data (4 bytes per pixel) to one
/// specific format. The trait is object-safe to allow dynamic dispatch.
pub trait ImageEncoder: Send + Sync {
    /// The output format this encoder produces
    fn format(&self) -> OutputFormat;

    /// Encode raw RGBA image data to the target format
    fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        quality: EncoderQuality,
    ) -> Result<EncodedImage, EngineError>;

    /// Check if this encoder supports transparency
    fn supports_transparency(&self) -> bool;
}

fn encode_failed(format: OutputFormat, message: impl std::fmt::Display) -> EngineError {
    EngineError::execution(
        BackendKind::Raster,
        format!("failed to encode {}: {}", format, message),
    )
}

/// JPEG encoder. Alpha is discarded: JPEG has no transparency.
pub struct JpegEncoder;

impl ImageEncoder for JpegEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Jpg
    }

    fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        quality: EncoderQuality,
    ) -> Result<EncodedImage, EngineError> {
        let rgb = rgba_to_rgb(data);
        let mut output = Cursor::new(Vec::new());
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality.quality)
            .write_image(&rgb, width, height, image::ColorType::Rgb8)
            .map_err(|e| encode_failed(OutputFormat::Jpg, e))?;
        Ok(EncodedImage::new(output.into_inner(), OutputFormat::Jpg))
    }

    fn supports_transparency(&self) -> bool {
        false
    }
}

pub struct PngEncoder;

impl ImageEncoder for PngEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Png
    }

    fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        _quality: EncoderQuality,
    ) -> Result<EncodedImage, EngineError> {
        let mut output = Cursor::new(Vec::new());
        image::codecs::png::PngEncoder::new(&mut output)
            .write_image(data, width, height, image::ColorType::Rgba8)
            .map_err(|e| encode_failed(OutputFormat::Png, e))?;
        Ok(EncodedImage::new(output.into_inner(), OutputFormat::Png))
    }

    fn supports_transparency(&self) -> bool {
        true
    }
}

/// WebP encoder.
///
/// WebP output is lossless on every backend (the external tools get no
/// `-quality` flag for it either), so the quality setting does not apply.
pub struct WebPEncoder;

impl ImageEncoder for WebPEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Webp
    }

    fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        _quality: EncoderQuality,
    ) -> Result<EncodedImage, EngineError> {
        let mut output = Cursor::new(Vec::new());
        image::codecs::webp::WebPEncoder::new_lossless(&mut output)
            .write_image(data, width, height, image::ColorType::Rgba8)
            .map_err(|e| encode_failed(OutputFormat::Webp, e))?;
        Ok(EncodedImage::new(output.into_inner(), OutputFormat::Webp))
    }

    fn supports_transparency(&self) -> bool {
        true
    }
}

pub struct TiffEncoder;

impl ImageEncoder for TiffEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Tif
    }

    fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        _quality: EncoderQuality,
    ) -> Result<EncodedImage, EngineError> {
        let mut output = Cursor::new(Vec::new());
        image::codecs::tiff::TiffEncoder::new(&mut output)
            .write_image(data, width, height, image::ColorType::Rgba8)
            .map_err(|e| encode_failed(OutputFormat::Tif, e))?;
        Ok(EncodedImage::new(output.into_inner(), OutputFormat::Tif))
    }

    fn supports_transparency(&self) -> bool {
        true
    }
}

pub struct GifEncoder;

impl ImageEncoder for GifEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Gif
    }

    fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        _quality: EncoderQuality,
    ) -> Result<EncodedImage, EngineError> {
        let mut output = Cursor::new(Vec::new());
        image::codecs::gif::GifEncoder::new(&mut output)
            .encode(data, width, height, image::ColorType::Rgba8)
            .map_err(|e| encode_failed(OutputFormat::Gif, e))?;
        Ok(EncodedImage::new(output.into_inner(), OutputFormat::Gif))
    }

    fn supports_transparency(&self) -> bool {
        true
    }
}

pub struct BmpEncoder;

impl ImageEncoder for BmpEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Bmp
    }

    fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        _quality: EncoderQuality,
    ) -> Result<EncodedImage, EngineError> {
        let mut output = Cursor::new(Vec::new());
        image::codecs::bmp::BmpEncoder::new(&mut output)
            .encode(data, width, height, image::ColorType::Rgba8)
            .map_err(|e| encode_failed(OutputFormat::Bmp, e))?;
        Ok(EncodedImage::new(output.into_inner(), OutputFormat::Bmp))
    }

    fn supports_transparency(&self) -> bool {
        false
    }
}

/// Factory for creating encoders based on output format
pub struct EncoderFactory;

impl EncoderFactory {
    /// Create an encoder for the specified output format.
    ///
    /// Formats outside the raster backend's output set (JP2, PDF) have no
    /// in-process encoder; the capability matrix keeps them from being
    /// requested, and asking anyway is an unsupported-output error.
    pub fn create(format: OutputFormat) -> Result<Box<dyn ImageEncoder>, EngineError> {
        match format {
            OutputFormat::Jpg => Ok(Box::new(JpegEncoder)),
            OutputFormat::Png => Ok(Box::new(PngEncoder)),
            OutputFormat::Webp => Ok(Box::new(WebPEncoder)),
            OutputFormat::Tif => Ok(Box::new(TiffEncoder)),
            OutputFormat::Gif => Ok(Box::new(GifEncoder)),
            OutputFormat::Bmp => Ok(Box::new(BmpEncoder)),
            OutputFormat::Jp2 | OutputFormat::Pdf => {
                Err(EngineError::UnsupportedOutputFormat { format })
            }
        }
    }
}

/// Convert RGBA to RGB by discarding alpha channel
fn rgba_to_rgb(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for chunk in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&chunk[..3]);
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2x2 RGBA checkerboard
    fn test_pixels() -> Vec<u8> {
        vec![
            255, 0, 0, 255, // red
            0, 255, 0, 255, // green
            0, 0, 255, 255, // blue
            255, 255, 255, 255, // white
        ]
    }

    #[test]
    fn test_encoder_quality_clamps_values() {
        assert_eq!(EncoderQuality::with_quality(150).quality, 100);
        assert_eq!(EncoderQuality::with_quality(0).quality, 1);
        assert_eq!(EncoderQuality::with_quality(90).quality, 90);
    }

    #[test]
    fn test_factory_covers_raster_output_set() {
        for format in crate::capabilities::raster_output_formats() {
            let encoder = EncoderFactory::create(format).unwrap();
            assert_eq!(encoder.format(), format);
        }
    }

    #[test]
    fn test_factory_rejects_formats_without_encoder() {
        assert!(matches!(
            EncoderFactory::create(OutputFormat::Jp2),
            Err(EngineError::UnsupportedOutputFormat { .. })
        ));
        assert!(matches!(
            EncoderFactory::create(OutputFormat::Pdf),
            Err(EngineError::UnsupportedOutputFormat { .. })
        ));
    }

    #[test]
    fn test_jpeg_encoder_produces_jpeg_magic() {
        let encoded = JpegEncoder
            .encode(&test_pixels(), 2, 2, EncoderQuality::default())
            .unwrap();
        assert_eq!(&encoded.data[0..2], &[0xFF, 0xD8]);
        assert_eq!(encoded.media_type, "image/jpeg");
    }

    #[test]
    fn test_png_encoder_produces_png_magic() {
        let encoded = PngEncoder
            .encode(&test_pixels(), 2, 2, EncoderQuality::default())
            .unwrap();
        assert_eq!(&encoded.data[0..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[test]
    fn test_webp_encoder_produces_riff_container() {
        let encoded = WebPEncoder
            .encode(&test_pixels(), 2, 2, EncoderQuality::default())
            .unwrap();
        assert_eq!(&encoded.data[0..4], b"RIFF");
        assert_eq!(&encoded.data[8..12], b"WEBP");
    }

    #[test]
    fn test_tiff_encoder_produces_tiff_header() {
        let encoded = TiffEncoder
            .encode(&test_pixels(), 2, 2, EncoderQuality::default())
            .unwrap();
        assert!(encoded.data.starts_with(b"II\x2A\x00") || encoded.data.starts_with(b"MM\x00\x2A"));
    }

    #[test]
    fn test_gif_encoder_produces_gif_header() {
        let encoded = GifEncoder
            .encode(&test_pixels(), 2, 2, EncoderQuality::default())
            .unwrap();
        assert!(encoded.data.starts_with(b"GIF8"));
    }

    #[test]
    fn test_bmp_encoder_produces_bmp_header() {
        let encoded = BmpEncoder
            .encode(&test_pixels(), 2, 2, EncoderQuality::default())
            .unwrap();
        assert!(encoded.data.starts_with(b"BM"));
    }

    #[test]
    fn test_rgba_to_rgb_drops_alpha() {
        let rgb = rgba_to_rgb(&[255, 128, 64, 255, 0, 0, 0, 128]);
        assert_eq!(rgb, vec![255, 128, 64, 0, 0, 0]);
    }
}
