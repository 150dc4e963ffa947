//! Tile and resolution-level discovery
//!
//! Pyramidal formats (tiled TIFF, JPEG2000) carry pre-downsampled resolution
//! levels and internal tiles that allow decoding work proportional to the
//! requested output instead of the full source resolution. This module
//! enumerates those levels; for everything else it reports the single
//! full-image entry so callers can treat tiled and untiled sources uniformly.

use std::io::Cursor;

use thiserror::Error;

use crate::error::EngineError;
use crate::format::SourceFormat;

pub mod jp2;
pub mod tiff;

/// One resolution level of a source image.
///
/// `tile_width`/`tile_height` equal the level dimensions when the level is
/// not internally tiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileDescriptor {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl TileDescriptor {
    pub fn untiled(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile_width: width,
            tile_height: height,
        }
    }

    pub fn is_tiled(&self) -> bool {
        self.tile_width != self.width || self.tile_height != self.height
    }
}

/// Structural parse failure inside a tiled container.
///
/// Distinct from "parseable but untiled", which is not an error.
#[derive(Debug, Error)]
pub enum TileParseError {
    #[error("truncated data while reading {0}")]
    Truncated(&'static str),
    #[error("malformed structure: {0}")]
    Malformed(&'static str),
}

/// Enumerate resolution levels for formats that can be introspected.
///
/// Returns `Ok(None)` for formats without a pyramidal container structure.
/// A stream that does not parse as the declared format is a format-mismatch
/// error, which callers must not confuse with an untiled source.
pub fn pyramid(
    data: &[u8],
    format: SourceFormat,
) -> Result<Option<Vec<TileDescriptor>>, EngineError> {
    match format {
        SourceFormat::Tif => tiff::levels(data).map(Some).map_err(|e| mismatch(format, e)),
        SourceFormat::Jp2 => jp2::levels(data).map(Some).map_err(|e| mismatch(format, e)),
        _ => Ok(None),
    }
}

/// Full-resolution pixel dimensions of a source, without decoding pixels.
///
/// TIFF and JPEG2000 dimensions come from the container headers; other
/// raster formats are read through the image registry. PDF has no intrinsic
/// pixel dimensions and is rejected here; backends that rasterize PDF
/// determine dimensions themselves.
pub fn dimensions(data: &[u8], format: SourceFormat) -> Result<(u32, u32), EngineError> {
    match format {
        SourceFormat::Tif | SourceFormat::Jp2 => {
            let levels = match format {
                SourceFormat::Tif => tiff::levels(data),
                _ => jp2::levels(data),
            }
            .map_err(|e| mismatch(format, e))?;
            let full = levels.first().ok_or_else(|| {
                mismatch(format, TileParseError::Malformed("no resolution levels"))
            })?;
            Ok((full.width, full.height))
        }
        SourceFormat::Pdf | SourceFormat::Unknown => Err(EngineError::unsupported_format(
            format!("cannot read pixel dimensions of {} without rasterizing", format),
        )),
        _ => {
            let image_format = format
                .to_image_format()
                .ok_or_else(|| EngineError::unsupported_format(format.as_str()))?;
            image::io::Reader::with_format(Cursor::new(data), image_format)
                .into_dimensions()
                .map_err(|e| {
                    EngineError::unsupported_format(format!(
                        "stream does not parse as declared {} source: {}",
                        format, e
                    ))
                })
        }
    }
}

fn mismatch(format: SourceFormat, err: TileParseError) -> EngineError {
    EngineError::unsupported_format(format!(
        "stream does not parse as declared {} source: {}",
        format, err
    ))
}

/// Pick the smallest resolution level whose dimensions cover the target.
///
/// Levels must be ordered from highest to lowest resolution. Falls back to
/// the full-resolution level when even it is smaller than the target
/// (an upscale request).
pub fn select_decode_level(levels: &[TileDescriptor], target: (u32, u32)) -> (u32, u32) {
    let (tw, th) = target;
    levels
        .iter()
        .rev()
        .find(|level| level.width >= tw && level.height >= th)
        .or_else(|| levels.first())
        .map(|level| (level.width, level.height))
        .unwrap_or(target)
}

/// The `(tile width, tile height)` sequence a processor advertises, one per
/// resolution level.
pub fn tile_size_entries(levels: &[TileDescriptor]) -> Vec<(u32, u32)> {
    levels
        .iter()
        .map(|level| (level.tile_width, level.tile_height))
        .collect()
}
