//! Capability matrix
//!
//! The authoritative per-(backend, source format) table of supported output
//! formats and protocol features. The in-process raster backend has a fixed,
//! hard-coded table; external tools are probed once through their own
//! self-report (`gm version`, `identify -list format`) because their codec
//! support depends on how the binary was built. A failed probe marks the
//! backend entirely unavailable for the life of the process — the matrix
//! never guesses and never re-probes per request.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::EngineError;
use crate::format::{OutputFormat, SourceFormat};

pub mod probe;

/// A concrete decode/encode engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process decode/encode through the image registry.
    Raster,
    /// External `gm` tool driven over piped standard I/O.
    GraphicsMagick,
    /// External `magick` tool driven over piped standard I/O.
    ImageMagick,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raster => "raster",
            Self::GraphicsMagick => "graphicsmagick",
            Self::ImageMagick => "imagemagick",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One legal variant of a geometry request. Closed set: a backend advertises
/// exactly the variants it can execute for a given source format, and a
/// processor rejects any request needing a flag outside that set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorFeature {
    Mirroring,
    RegionByPixels,
    RegionByPercent,
    RegionSquare,
    RotationBy90s,
    RotationArbitrary,
    SizeByWidth,
    SizeByHeight,
    SizeByPercent,
    SizeByWidthHeight,
    SizeByForcedWidthHeight,
    SizeByConfinedWidthHeight,
    SizeAboveFull,
}

impl ProcessorFeature {
    pub const ALL: [ProcessorFeature; 13] = [
        ProcessorFeature::Mirroring,
        ProcessorFeature::RegionByPixels,
        ProcessorFeature::RegionByPercent,
        ProcessorFeature::RegionSquare,
        ProcessorFeature::RotationBy90s,
        ProcessorFeature::RotationArbitrary,
        ProcessorFeature::SizeByWidth,
        ProcessorFeature::SizeByHeight,
        ProcessorFeature::SizeByPercent,
        ProcessorFeature::SizeByWidthHeight,
        ProcessorFeature::SizeByForcedWidthHeight,
        ProcessorFeature::SizeByConfinedWidthHeight,
        ProcessorFeature::SizeAboveFull,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mirroring => "mirroring",
            Self::RegionByPixels => "region_by_pixels",
            Self::RegionByPercent => "region_by_percent",
            Self::RegionSquare => "region_square",
            Self::RotationBy90s => "rotation_by_90s",
            Self::RotationArbitrary => "rotation_arbitrary",
            Self::SizeByWidth => "size_by_width",
            Self::SizeByHeight => "size_by_height",
            Self::SizeByPercent => "size_by_percent",
            Self::SizeByWidthHeight => "size_by_width_height",
            Self::SizeByForcedWidthHeight => "size_by_forced_width_height",
            Self::SizeByConfinedWidthHeight => "size_by_confined_width_height",
            Self::SizeAboveFull => "size_above_full",
        }
    }
}

impl fmt::Display for ProcessorFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an external tool's self-report said it can read and write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCapabilities {
    pub source_formats: HashSet<SourceFormat>,
    pub output_formats: HashSet<OutputFormat>,
}

/// Process-wide capability table. The only shared state in the engine:
/// each external backend is probed at most once, then the entry is frozen
/// and shared read-only.
pub struct CapabilityMatrix {
    gm_path: String,
    magick_path: String,
    probe_timeout: Duration,
    gm: OnceCell<Result<Arc<ToolCapabilities>, String>>,
    magick: OnceCell<Result<Arc<ToolCapabilities>, String>>,
}

impl CapabilityMatrix {
    pub fn new(gm_path: String, magick_path: String, probe_timeout: Duration) -> Self {
        Self {
            gm_path,
            magick_path,
            probe_timeout,
            gm: OnceCell::new(),
            magick: OnceCell::new(),
        }
    }

    /// Output formats a backend can encode for the given source format.
    /// Empty when the backend cannot read the source format at all.
    pub async fn supported_outputs(
        &self,
        backend: BackendKind,
        source: SourceFormat,
    ) -> Result<HashSet<OutputFormat>, EngineError> {
        match backend {
            BackendKind::Raster => Ok(if raster_source_formats().contains(&source) {
                raster_output_formats()
            } else {
                HashSet::new()
            }),
            BackendKind::GraphicsMagick | BackendKind::ImageMagick => {
                let tool = self.tool(backend).await?;
                Ok(if tool.source_formats.contains(&source) {
                    tool.output_formats.clone()
                } else {
                    HashSet::new()
                })
            }
        }
    }

    /// Protocol features a backend can execute for the given source format.
    ///
    /// Always keyed on the pair: a backend may rotate one codec arbitrarily
    /// and another only in 90° steps.
    pub async fn supported_features(
        &self,
        backend: BackendKind,
        source: SourceFormat,
    ) -> Result<HashSet<ProcessorFeature>, EngineError> {
        if !self.supports_source(backend, source).await? {
            return Ok(HashSet::new());
        }
        Ok(match backend {
            BackendKind::Raster => raster_features(),
            BackendKind::GraphicsMagick => graphicsmagick_features(source),
            BackendKind::ImageMagick => imagemagick_features(source),
        })
    }

    /// Whether the backend can decode the given source format.
    pub async fn supports_source(
        &self,
        backend: BackendKind,
        source: SourceFormat,
    ) -> Result<bool, EngineError> {
        match backend {
            BackendKind::Raster => Ok(raster_source_formats().contains(&source)),
            BackendKind::GraphicsMagick | BackendKind::ImageMagick => {
                Ok(self.tool(backend).await?.source_formats.contains(&source))
            }
        }
    }

    /// Whether the backend can serve requests at all. Raster always can;
    /// an external tool can once its probe has succeeded.
    pub async fn is_available(&self, backend: BackendKind) -> bool {
        match backend {
            BackendKind::Raster => true,
            BackendKind::GraphicsMagick | BackendKind::ImageMagick => {
                self.tool(backend).await.is_ok()
            }
        }
    }

    async fn tool(&self, backend: BackendKind) -> Result<Arc<ToolCapabilities>, EngineError> {
        let report = match backend {
            BackendKind::GraphicsMagick => {
                self.gm
                    .get_or_init(|| async {
                        probe::probe_graphicsmagick(&self.gm_path, self.probe_timeout)
                            .await
                            .map(Arc::new)
                            .map_err(|reason| {
                                tracing::warn!(
                                    backend = %BackendKind::GraphicsMagick,
                                    %reason,
                                    "capability probe failed; backend disabled for this process"
                                );
                                reason
                            })
                    })
                    .await
            }
            BackendKind::ImageMagick => {
                self.magick
                    .get_or_init(|| async {
                        probe::probe_imagemagick(&self.magick_path, self.probe_timeout)
                            .await
                            .map(Arc::new)
                            .map_err(|reason| {
                                tracing::warn!(
                                    backend = %BackendKind::ImageMagick,
                                    %reason,
                                    "capability probe failed; backend disabled for this process"
                                );
                                reason
                            })
                    })
                    .await
            }
            BackendKind::Raster => unreachable!("raster backend has a static table"),
        };
        report
            .clone()
            .map_err(|reason| EngineError::unavailable(backend, reason))
    }
}

/// Formats the image registry decodes in-process.
pub fn raster_source_formats() -> HashSet<SourceFormat> {
    HashSet::from([
        SourceFormat::Jpg,
        SourceFormat::Png,
        SourceFormat::Tif,
        SourceFormat::Gif,
        SourceFormat::Bmp,
        SourceFormat::Webp,
    ])
}

/// Formats the in-process encoder family emits.
pub fn raster_output_formats() -> HashSet<OutputFormat> {
    HashSet::from([
        OutputFormat::Jpg,
        OutputFormat::Png,
        OutputFormat::Tif,
        OutputFormat::Gif,
        OutputFormat::Bmp,
        OutputFormat::Webp,
    ])
}

fn full_feature_set() -> HashSet<ProcessorFeature> {
    ProcessorFeature::ALL.into_iter().collect()
}

/// The raster path composes crops, flips and 90° rotations directly on the
/// decoded buffer; it has no arbitrary-angle rotation.
fn raster_features() -> HashSet<ProcessorFeature> {
    let mut features = full_feature_set();
    features.remove(&ProcessorFeature::RotationArbitrary);
    features
}

/// GraphicsMagick's command set predates square regions and confined
/// sizing; its JPEG 2000 delegate only rotates in 90° steps.
fn graphicsmagick_features(source: SourceFormat) -> HashSet<ProcessorFeature> {
    let mut features = full_feature_set();
    features.remove(&ProcessorFeature::RegionSquare);
    features.remove(&ProcessorFeature::SizeByConfinedWidthHeight);
    if source == SourceFormat::Jp2 {
        features.remove(&ProcessorFeature::RotationArbitrary);
    }
    features
}

fn imagemagick_features(_source: SourceFormat) -> HashSet<ProcessorFeature> {
    full_feature_set()
}
