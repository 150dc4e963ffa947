//! Source and output format registry
//!
//! Identifies a source image's codec from its leading bytes and/or a declared
//! file extension, and maps codecs to canonical names, extensions, and media
//! types. Magic-byte detection always wins over the declared extension,
//! because extensions are untrusted client input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A decodable source codec.
///
/// `Unknown` is the sentinel returned by [`detect`] for unrecognized input.
/// Callers must treat it as a terminal client-facing error, never as a
/// retryable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Jpg,
    Png,
    Tif,
    Jp2,
    Gif,
    Bmp,
    Webp,
    Pdf,
    Unknown,
}

impl SourceFormat {
    /// All concrete (non-sentinel) source formats.
    pub const ALL: [SourceFormat; 8] = [
        SourceFormat::Jpg,
        SourceFormat::Png,
        SourceFormat::Tif,
        SourceFormat::Jp2,
        SourceFormat::Gif,
        SourceFormat::Bmp,
        SourceFormat::Webp,
        SourceFormat::Pdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Tif => "tif",
            Self::Jp2 => "jp2",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Webp => "webp",
            Self::Pdf => "pdf",
            Self::Unknown => "unknown",
        }
    }

    /// Recognized file extensions, primary first.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Jpg => &["jpg", "jpeg"],
            Self::Png => &["png"],
            Self::Tif => &["tif", "tiff", "ptif"],
            Self::Jp2 => &["jp2", "j2k", "jpx"],
            Self::Gif => &["gif"],
            Self::Bmp => &["bmp"],
            Self::Webp => &["webp"],
            Self::Pdf => &["pdf"],
            Self::Unknown => &[],
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Jpg => "image/jpeg",
            Self::Png => "image/png",
            Self::Tif => "image/tiff",
            Self::Jp2 => "image/jp2",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Webp => "image/webp",
            Self::Pdf => "application/pdf",
            Self::Unknown => "application/octet-stream",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Look up a format by file extension (case-insensitive, no leading dot).
    pub fn from_extension(ext: &str) -> SourceFormat {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.extensions().contains(&ext.as_str()))
            .unwrap_or(SourceFormat::Unknown)
    }

    /// The image registry's equivalent format, for in-process decoding.
    /// `None` for formats the registry cannot decode (JP2, PDF).
    pub fn to_image_format(&self) -> Option<image::ImageFormat> {
        match self {
            Self::Jpg => Some(image::ImageFormat::Jpeg),
            Self::Png => Some(image::ImageFormat::Png),
            Self::Tif => Some(image::ImageFormat::Tiff),
            Self::Gif => Some(image::ImageFormat::Gif),
            Self::Bmp => Some(image::ImageFormat::Bmp),
            Self::Webp => Some(image::ImageFormat::WebP),
            Self::Jp2 | Self::Pdf | Self::Unknown => None,
        }
    }

    /// Look up a format by declared media type.
    pub fn from_media_type(media_type: &str) -> SourceFormat {
        match media_type.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Self::Jpg,
            "image/png" => Self::Png,
            "image/tiff" => Self::Tif,
            "image/jp2" | "image/jpeg2000" | "image/jpx" => Self::Jp2,
            "image/gif" => Self::Gif,
            "image/bmp" | "image/x-bmp" | "image/x-ms-bmp" => Self::Bmp,
            "image/webp" => Self::Webp,
            "application/pdf" => Self::Pdf,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An encodable output codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpg,
    Png,
    Tif,
    Gif,
    Jp2,
    Webp,
    Bmp,
    Pdf,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 8] = [
        OutputFormat::Jpg,
        OutputFormat::Png,
        OutputFormat::Tif,
        OutputFormat::Gif,
        OutputFormat::Jp2,
        OutputFormat::Webp,
        OutputFormat::Bmp,
        OutputFormat::Pdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Tif => "tif",
            Self::Gif => "gif",
            Self::Jp2 => "jp2",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Pdf => "pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Jpg => "image/jpeg",
            Self::Png => "image/png",
            Self::Tif => "image/tiff",
            Self::Gif => "image/gif",
            Self::Jp2 => "image/jp2",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Pdf => "application/pdf",
        }
    }

    /// Whether encoders for this format take a lossy quality setting.
    ///
    /// WebP is deliberately absent: every backend encodes it lossless, so
    /// the same request never diverges in encoding mode between backends.
    pub fn is_lossy(&self) -> bool {
        matches!(self, Self::Jpg | Self::Jp2)
    }

    /// Container formats that can hold more than one page or frame.
    pub fn supports_multiple_pages(&self) -> bool {
        matches!(self, Self::Pdf | Self::Tif | Self::Gif)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "png" => Ok(Self::Png),
            "tif" | "tiff" => Ok(Self::Tif),
            "gif" => Ok(Self::Gif),
            "jp2" => Ok(Self::Jp2),
            "webp" => Ok(Self::Webp),
            "bmp" => Ok(Self::Bmp),
            "pdf" => Ok(Self::Pdf),
            other => Err(EngineError::unsupported_format(other)),
        }
    }
}

/// Byte prefix length [`detect`] needs to classify every known format.
pub const DETECT_PREFIX_LEN: usize = 16;

/// Identify a source format from its leading bytes and/or declared extension.
///
/// Magic-byte signatures take precedence; the extension is only consulted
/// when no signature matches (e.g. a truncated prefix). Returns
/// [`SourceFormat::Unknown`] when neither identifies the input.
pub fn detect(prefix: &[u8], declared_extension: Option<&str>) -> SourceFormat {
    if let Some(format) = detect_magic(prefix) {
        return format;
    }
    if let Some(ext) = declared_extension {
        return SourceFormat::from_extension(ext);
    }
    SourceFormat::Unknown
}

fn detect_magic(prefix: &[u8]) -> Option<SourceFormat> {
    if prefix.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(SourceFormat::Jpg);
    }
    if prefix.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(SourceFormat::Png);
    }
    if prefix.starts_with(b"II\x2A\x00")
        || prefix.starts_with(b"MM\x00\x2A")
        || prefix.starts_with(b"II\x2B\x00")
        || prefix.starts_with(b"MM\x00\x2B")
    {
        return Some(SourceFormat::Tif);
    }
    // JP2 container signature box, or a bare JPEG 2000 codestream (SOC + SIZ)
    if prefix.starts_with(&[0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A])
        || prefix.starts_with(&[0xFF, 0x4F, 0xFF, 0x51])
    {
        return Some(SourceFormat::Jp2);
    }
    if prefix.starts_with(b"GIF87a") || prefix.starts_with(b"GIF89a") {
        return Some(SourceFormat::Gif);
    }
    if prefix.len() >= 12 && prefix.starts_with(b"RIFF") && &prefix[8..12] == b"WEBP" {
        return Some(SourceFormat::Webp);
    }
    if prefix.starts_with(b"BM") {
        return Some(SourceFormat::Bmp);
    }
    if prefix.starts_with(b"%PDF-") {
        return Some(SourceFormat::Pdf);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_jpeg_magic() {
        assert_eq!(detect(&[0xFF, 0xD8, 0xFF, 0xE0], None), SourceFormat::Jpg);
    }

    #[test]
    fn test_detect_png_magic() {
        let prefix = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(detect(&prefix, None), SourceFormat::Png);
    }

    #[test]
    fn test_detect_tiff_both_endians() {
        assert_eq!(detect(b"II\x2A\x00\x08\x00", None), SourceFormat::Tif);
        assert_eq!(detect(b"MM\x00\x2A\x00\x08", None), SourceFormat::Tif);
    }

    #[test]
    fn test_detect_bigtiff() {
        assert_eq!(detect(b"II\x2B\x00\x08\x00", None), SourceFormat::Tif);
    }

    #[test]
    fn test_detect_jp2_signature_box() {
        let prefix = [
            0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
        ];
        assert_eq!(detect(&prefix, None), SourceFormat::Jp2);
    }

    #[test]
    fn test_detect_raw_j2k_codestream() {
        assert_eq!(detect(&[0xFF, 0x4F, 0xFF, 0x51], None), SourceFormat::Jp2);
    }

    #[test]
    fn test_detect_webp_needs_riff_and_fourcc() {
        assert_eq!(
            detect(b"RIFF\x24\x00\x00\x00WEBPVP8 ", None),
            SourceFormat::Webp
        );
        // RIFF alone is not WebP (could be AVI/WAV)
        assert_eq!(
            detect(b"RIFF\x24\x00\x00\x00WAVEfmt ", None),
            SourceFormat::Unknown
        );
    }

    #[test]
    fn test_magic_beats_extension() {
        // PNG bytes declared as .jpg: bytes win
        let prefix = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(detect(&prefix, Some("jpg")), SourceFormat::Png);
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(detect(&[0x00, 0x01], Some("tiff")), SourceFormat::Tif);
        assert_eq!(detect(&[0x00, 0x01], Some(".JPEG")), SourceFormat::Jpg);
    }

    #[test]
    fn test_unknown_sentinel() {
        assert_eq!(detect(&[0x00, 0x01, 0x02], None), SourceFormat::Unknown);
        assert_eq!(detect(&[0x00], Some("xyz")), SourceFormat::Unknown);
        assert!(!SourceFormat::Unknown.is_known());
    }

    #[test]
    fn test_from_media_type() {
        assert_eq!(SourceFormat::from_media_type("image/jpeg"), SourceFormat::Jpg);
        assert_eq!(SourceFormat::from_media_type("image/jp2"), SourceFormat::Jp2);
        assert_eq!(
            SourceFormat::from_media_type("text/html"),
            SourceFormat::Unknown
        );
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("jpeg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpg);
        assert_eq!("tiff".parse::<OutputFormat>().unwrap(), OutputFormat::Tif);
        assert_eq!("webp".parse::<OutputFormat>().unwrap(), OutputFormat::Webp);
        assert!("tga".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_media_types() {
        assert_eq!(OutputFormat::Jpg.media_type(), "image/jpeg");
        assert_eq!(OutputFormat::Pdf.media_type(), "application/pdf");
    }

    #[test]
    fn test_lossy_formats() {
        assert!(OutputFormat::Jpg.is_lossy());
        assert!(OutputFormat::Jp2.is_lossy());
        assert!(!OutputFormat::Png.is_lossy());
        // lossless across every backend, so no quality setting applies
        assert!(!OutputFormat::Webp.is_lossy());
    }

    #[test]
    fn test_multi_page_formats() {
        assert!(OutputFormat::Pdf.supports_multiple_pages());
        assert!(OutputFormat::Tif.supports_multiple_pages());
        assert!(!OutputFormat::Jpg.supports_multiple_pages());
    }
}
