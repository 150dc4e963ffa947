//! Pipeline orchestration
//!
//! Turns a validated transformation request into a [`TransformPlan`]: the
//! fully-resolved absolute operations every backend executes verbatim, in a
//! fixed stage order (decode at a chosen level → crop → scale → mirror →
//! rotate → quality → encode). Validation fails fast — capability mismatches
//! are caught here before any decode work happens, and never downgraded to a
//! best-effort result.

use std::collections::HashSet;

use crate::capabilities::ProcessorFeature;
use crate::error::EngineError;
use crate::format::OutputFormat;
use crate::geometry::{self, Quality, Rect, SizeLimits, TransformRequest};
use crate::tiles::{self, TileDescriptor};

/// Absolute, backend-independent description of one transformation job.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPlan {
    pub source_width: u32,
    pub source_height: u32,
    /// Crop rectangle in full-resolution pixel coordinates.
    pub region: Rect,
    /// Final output dimensions after scaling.
    pub target_width: u32,
    pub target_height: u32,
    /// Applied before rotation, always.
    pub mirror: bool,
    /// Degrees clockwise; `0.0` means no rotation.
    pub degrees: f64,
    pub quality: Quality,
    pub format: OutputFormat,
    /// Resolution level worth decoding: the smallest available level that
    /// still covers the target. Advisory for backends that can only decode
    /// at full resolution.
    pub decode_width: u32,
    pub decode_height: u32,
}

impl TransformPlan {
    pub fn is_identity_crop(&self) -> bool {
        self.region.is_full(self.source_width, self.source_height)
    }

    pub fn is_identity_scale(&self) -> bool {
        self.target_width == self.region.width && self.target_height == self.region.height
    }
}

/// Check a request against a backend's declared capability sets, without
/// touching the source.
///
/// Failure ordering is fixed: unsupported output format, then unsupported
/// feature. Processors run this before reading source headers or spawning
/// any tool, so a capability mismatch never costs a decode or a subprocess.
pub fn validate_capabilities(
    request: &TransformRequest,
    features: &HashSet<ProcessorFeature>,
    outputs: &HashSet<OutputFormat>,
) -> Result<(), EngineError> {
    if !outputs.contains(&request.format) {
        return Err(EngineError::UnsupportedOutputFormat {
            format: request.format,
        });
    }

    let required = request.required_features();
    // Deterministic reporting order for the first missing capability.
    for feature in ProcessorFeature::ALL {
        if required.contains(&feature) && !features.contains(&feature) {
            return Err(EngineError::UnsupportedFeature { feature });
        }
    }
    Ok(())
}

/// Validate a request against a backend's declared capabilities and resolve
/// it to absolute pixel operations.
///
/// Failure ordering is fixed: unsupported output format, then unsupported
/// feature (both via [`validate_capabilities`]), then invalid geometry. An
/// upscale beyond the region's native resolution additionally requires
/// `SizeAboveFull`; it is rejected, never silently capped.
pub fn plan(
    request: &TransformRequest,
    levels: &[TileDescriptor],
    features: &HashSet<ProcessorFeature>,
    outputs: &HashSet<OutputFormat>,
    limits: &SizeLimits,
) -> Result<TransformPlan, EngineError> {
    validate_capabilities(request, features, outputs)?;

    if !request.rotation.degrees.is_finite()
        || request.rotation.degrees < 0.0
        || request.rotation.degrees >= 360.0
    {
        return Err(EngineError::invalid_geometry(
            "rotation must satisfy 0 <= degrees < 360",
        ));
    }

    let full = levels
        .first()
        .ok_or_else(|| EngineError::invalid_geometry("source has no resolution levels"))?;
    let (source_width, source_height) = (full.width, full.height);
    if u64::from(source_width) * u64::from(source_height) > limits.max_source_pixels {
        return Err(EngineError::invalid_geometry(format!(
            "source dimensions {}x{} exceed the configured pixel limit",
            source_width, source_height
        )));
    }

    let region = geometry::resolve_region(&request.region, source_width, source_height)?;
    let (target_width, target_height) = geometry::resolve_size(&request.size, &region, limits)?;

    if (target_width > region.width || target_height > region.height)
        && !features.contains(&ProcessorFeature::SizeAboveFull)
    {
        return Err(EngineError::UnsupportedFeature {
            feature: ProcessorFeature::SizeAboveFull,
        });
    }

    let (decode_width, decode_height) =
        tiles::select_decode_level(levels, (target_width, target_height));

    Ok(TransformPlan {
        source_width,
        source_height,
        region,
        target_width,
        target_height,
        mirror: request.rotation.mirror,
        degrees: request.rotation.degrees,
        quality: request.quality,
        format: request.format,
        decode_width,
        decode_height,
    })
}
