//! Geometry engine
//!
//! Parses-level transformation values (region, size, rotation, quality) are
//! resolved here into absolute pixel operations validated against actual
//! source dimensions. Resolution is pure arithmetic: backends never
//! re-interpret a request, they execute the resolved plan, so results are
//! deterministic across backends.

use std::collections::HashSet;

use crate::capabilities::ProcessorFeature;
use crate::error::EngineError;
use crate::format::OutputFormat;

/// An absolute pixel rectangle, fully clipped to source bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_full(&self, source_width: u32, source_height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width == source_width && self.height == source_height
    }
}

/// The portion of the source image to extract, before scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Region {
    /// The whole image.
    Full,
    /// The largest centered square.
    Square,
    /// Absolute pixel rectangle.
    Pixels { x: u32, y: u32, width: u32, height: u32 },
    /// Rectangle in percentages of the full source dimensions.
    Percent { x: f64, y: f64, width: f64, height: f64 },
}

/// Target pixel dimensions of the extracted region after scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Size {
    /// Keep the region's native dimensions.
    Full,
    /// Scale both dimensions by a percentage of the region size.
    Percent(f64),
    /// Fit to a width, height follows the aspect ratio.
    Width(u32),
    /// Fit to a height, width follows the aspect ratio.
    Height(u32),
    /// Aspect-preserving best fit touching the given box from inside.
    BestFit { width: u32, height: u32 },
    /// Exact dimensions, aspect ratio ignored.
    Forced { width: u32, height: u32 },
    /// Upper-bound box; the largest aspect-preserving size within it.
    Confined { width: u32, height: u32 },
}

/// Rotation in degrees plus an orthogonal mirror flag.
///
/// Mirroring is applied before rotation, always, so the composition is
/// backend-independent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    /// Degrees clockwise, `0.0 <= degrees < 360.0`.
    pub degrees: f64,
    pub mirror: bool,
}

impl Rotation {
    pub fn none() -> Self {
        Self {
            degrees: 0.0,
            mirror: false,
        }
    }

    pub fn is_no_op(&self) -> bool {
        self.degrees == 0.0 && !self.mirror
    }

    pub fn is_multiple_of_90(&self) -> bool {
        self.degrees % 90.0 == 0.0
    }
}

/// Color rendering mode of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// Whatever the source provides.
    Default,
    Color,
    Gray,
    Bitonal,
}

/// A parsed transformation request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    pub region: Region,
    pub size: Size,
    pub rotation: Rotation,
    pub quality: Quality,
    pub format: OutputFormat,
}

impl TransformRequest {
    /// The feature flags this request needs from a backend, excluding
    /// `SizeAboveFull` which depends on resolved geometry and is checked by
    /// the pipeline after resolution.
    pub fn required_features(&self) -> HashSet<ProcessorFeature> {
        let mut features = HashSet::new();
        match self.region {
            Region::Full => {}
            Region::Square => {
                features.insert(ProcessorFeature::RegionSquare);
            }
            Region::Pixels { .. } => {
                features.insert(ProcessorFeature::RegionByPixels);
            }
            Region::Percent { .. } => {
                features.insert(ProcessorFeature::RegionByPercent);
            }
        }
        match self.size {
            Size::Full => {}
            Size::Percent(_) => {
                features.insert(ProcessorFeature::SizeByPercent);
            }
            Size::Width(_) => {
                features.insert(ProcessorFeature::SizeByWidth);
            }
            Size::Height(_) => {
                features.insert(ProcessorFeature::SizeByHeight);
            }
            Size::BestFit { .. } => {
                features.insert(ProcessorFeature::SizeByWidthHeight);
            }
            Size::Forced { .. } => {
                features.insert(ProcessorFeature::SizeByForcedWidthHeight);
            }
            Size::Confined { .. } => {
                features.insert(ProcessorFeature::SizeByConfinedWidthHeight);
            }
        }
        if self.rotation.mirror {
            features.insert(ProcessorFeature::Mirroring);
        }
        if self.rotation.degrees != 0.0 {
            if self.rotation.is_multiple_of_90() {
                features.insert(ProcessorFeature::RotationBy90s);
            } else {
                features.insert(ProcessorFeature::RotationArbitrary);
            }
        }
        features
    }
}

/// Resource bounds applied during resolution.
#[derive(Debug, Clone, Copy)]
pub struct SizeLimits {
    pub max_width: u32,
    pub max_height: u32,
    /// Cap on source `width * height` before any decode is attempted.
    pub max_source_pixels: u64,
}

/// Resolve a region against actual source dimensions.
///
/// Percentage values are fractions of the full source dimensions. Rectangles
/// extending past an edge are clipped, not rejected; a rectangle whose origin
/// lies outside the source is invalid geometry, as is any zero-area result.
pub fn resolve_region(
    region: &Region,
    source_width: u32,
    source_height: u32,
) -> Result<Rect, EngineError> {
    if source_width == 0 || source_height == 0 {
        return Err(EngineError::invalid_geometry("source has zero area"));
    }
    let rect = match *region {
        Region::Full => Rect::full(source_width, source_height),
        Region::Square => {
            let side = source_width.min(source_height);
            Rect {
                x: (source_width - side) / 2,
                y: (source_height - side) / 2,
                width: side,
                height: side,
            }
        }
        Region::Pixels { x, y, width, height } => {
            clip(x, y, width, height, source_width, source_height)?
        }
        Region::Percent { x, y, width, height } => {
            for v in [x, y, width, height] {
                if !v.is_finite() || v < 0.0 {
                    return Err(EngineError::invalid_geometry(
                        "percentage region values must be finite and non-negative",
                    ));
                }
            }
            let px = percent_of(x, source_width);
            let py = percent_of(y, source_height);
            let pw = percent_of(width, source_width);
            let ph = percent_of(height, source_height);
            clip(px, py, pw, ph, source_width, source_height)?
        }
    };
    if rect.width == 0 || rect.height == 0 {
        return Err(EngineError::invalid_geometry("region resolves to zero area"));
    }
    Ok(rect)
}

fn percent_of(value: f64, dimension: u32) -> u32 {
    (value / 100.0 * f64::from(dimension)).round() as u32
}

fn clip(
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    source_width: u32,
    source_height: u32,
) -> Result<Rect, EngineError> {
    if x >= source_width || y >= source_height {
        return Err(EngineError::invalid_geometry(format!(
            "region origin ({}, {}) lies outside the {}x{} source",
            x, y, source_width, source_height
        )));
    }
    Ok(Rect {
        x,
        y,
        width: width.min(source_width - x),
        height: height.min(source_height - y),
    })
}

/// Resolve a size against the already-resolved region rectangle.
///
/// Aspect-derived dimensions round to nearest with a 1px floor. Forced sizes
/// are used verbatim. Any size exceeding the configured limits is rejected
/// outright; the engine never silently caps.
pub fn resolve_size(
    size: &Size,
    region: &Rect,
    limits: &SizeLimits,
) -> Result<(u32, u32), EngineError> {
    let rw = f64::from(region.width);
    let rh = f64::from(region.height);
    let (width, height) = match *size {
        Size::Full => (region.width, region.height),
        Size::Percent(pct) => {
            if !pct.is_finite() || pct <= 0.0 {
                return Err(EngineError::invalid_geometry(
                    "scale percentage must be positive",
                ));
            }
            (scaled(rw, pct / 100.0), scaled(rh, pct / 100.0))
        }
        Size::Width(w) => {
            if w == 0 {
                return Err(EngineError::invalid_geometry("width must be positive"));
            }
            (w, scaled(rh, f64::from(w) / rw))
        }
        Size::Height(h) => {
            if h == 0 {
                return Err(EngineError::invalid_geometry("height must be positive"));
            }
            (scaled(rw, f64::from(h) / rh), h)
        }
        Size::BestFit { width, height } | Size::Confined { width, height } => {
            if width == 0 || height == 0 {
                return Err(EngineError::invalid_geometry(
                    "bounding box must have positive dimensions",
                ));
            }
            let scale = (f64::from(width) / rw).min(f64::from(height) / rh);
            (scaled(rw, scale), scaled(rh, scale))
        }
        Size::Forced { width, height } => {
            if width == 0 || height == 0 {
                return Err(EngineError::invalid_geometry(
                    "forced dimensions must be positive",
                ));
            }
            (width, height)
        }
    };
    if width > limits.max_width || height > limits.max_height {
        return Err(EngineError::invalid_geometry(format!(
            "resolved size {}x{} exceeds the configured maximum {}x{}",
            width, height, limits.max_width, limits.max_height
        )));
    }
    Ok((width, height))
}

fn scaled(dimension: f64, factor: f64) -> u32 {
    ((dimension * factor).round() as u32).max(1)
}
