//! In-process raster backend
//!
//! Decodes through the image registry, scales with a Lanczos3 convolution,
//! and composes crop/mirror/rotation/quality directly on the decoded
//! buffer. All stages execute against the resolved plan, so output is
//! pixel-identical to any other backend executing the same plan.

use std::collections::HashSet;
use std::num::NonZeroU32;

use async_trait::async_trait;
use bytes::Bytes;
use fast_image_resize::{FilterType, Image, PixelType, ResizeAlg, Resizer};
use image::DynamicImage;

use crate::capabilities::{BackendKind, ProcessorFeature};
use crate::constants::BITONAL_THRESHOLD;
use crate::error::EngineError;
use crate::format::{OutputFormat, SourceFormat};
use crate::geometry::{Quality, TransformRequest};
use crate::metrics::TransformMetrics;
use crate::pipeline::{self, TransformPlan};
use crate::tiles::{self, TileDescriptor};

use super::encoder::{EncoderFactory, EncoderQuality};
use super::{ProcessedImage, Processor, ProcessorContext};

pub struct RasterProcessor {
    source_format: SourceFormat,
    context: ProcessorContext,
    source: Option<Bytes>,
}

impl RasterProcessor {
    pub(crate) fn new(source_format: SourceFormat, context: ProcessorContext) -> Self {
        Self {
            source_format,
            context,
            source: None,
        }
    }

    fn source(&self) -> Result<&Bytes, EngineError> {
        self.source.as_ref().ok_or(EngineError::SourceNotBound)
    }

    /// Resolution levels of the bound source. This backend parses container
    /// headers itself, so tiled TIFF and JPEG2000 pyramids are visible even
    /// though decoding always happens at full resolution.
    fn levels(&self) -> Result<Vec<TileDescriptor>, EngineError> {
        let source = self.source()?;
        match tiles::pyramid(source, self.source_format)? {
            Some(levels) => Ok(levels),
            None => {
                let (width, height) = tiles::dimensions(source, self.source_format)?;
                Ok(vec![TileDescriptor::untiled(width, height)])
            }
        }
    }

    fn decode(&self, source: &[u8]) -> Result<DynamicImage, EngineError> {
        let image_format = self
            .source_format
            .to_image_format()
            .ok_or_else(|| EngineError::unsupported_format(self.source_format.as_str()))?;
        image::load_from_memory_with_format(source, image_format).map_err(|e| {
            EngineError::execution(BackendKind::Raster, format!("decode failed: {}", e))
        })
    }

    fn execute(&self, plan: &TransformPlan, source: &[u8]) -> Result<ProcessedImage, EngineError> {
        let img = self.decode(source)?;

        let img = if plan.is_identity_crop() {
            img
        } else {
            img.crop_imm(
                plan.region.x,
                plan.region.y,
                plan.region.width,
                plan.region.height,
            )
        };

        let img = if plan.is_identity_scale() {
            img
        } else {
            resize(&img, plan.target_width, plan.target_height)?
        };

        // Mirror before rotation, always.
        let img = if plan.mirror { img.fliph() } else { img };
        let img = match plan.degrees {
            d if d == 0.0 => img,
            d if d == 90.0 => img.rotate90(),
            d if d == 180.0 => img.rotate180(),
            d if d == 270.0 => img.rotate270(),
            d => {
                return Err(EngineError::execution(
                    BackendKind::Raster,
                    format!("rotation by {}° is not available in this backend", d),
                ))
            }
        };

        let (out_width, out_height) = (img.width(), img.height());
        let rgba = match plan.quality {
            Quality::Default | Quality::Color => img.to_rgba8(),
            Quality::Gray => DynamicImage::ImageLuma8(img.to_luma8()).to_rgba8(),
            Quality::Bitonal => {
                let mut luma = img.to_luma8();
                for pixel in luma.pixels_mut() {
                    pixel.0[0] = if pixel.0[0] >= BITONAL_THRESHOLD { 255 } else { 0 };
                }
                DynamicImage::ImageLuma8(luma).to_rgba8()
            }
        };

        let encoder = EncoderFactory::create(plan.format)?;
        let encoded = encoder.encode(
            &rgba.into_raw(),
            out_width,
            out_height,
            EncoderQuality::with_quality(self.context.default_quality),
        )?;
        Ok(ProcessedImage {
            data: encoded.data,
            media_type: encoded.media_type,
        })
    }
}

#[async_trait]
impl Processor for RasterProcessor {
    fn backend(&self) -> BackendKind {
        BackendKind::Raster
    }

    fn source_format(&self) -> SourceFormat {
        self.source_format
    }

    fn bind_source(&mut self, source: Bytes) {
        self.source = Some(source);
    }

    async fn available_output_formats(&self) -> Result<HashSet<OutputFormat>, EngineError> {
        self.context
            .matrix
            .supported_outputs(BackendKind::Raster, self.source_format)
            .await
    }

    async fn supported_features(&self) -> Result<HashSet<ProcessorFeature>, EngineError> {
        self.context
            .matrix
            .supported_features(BackendKind::Raster, self.source_format)
            .await
    }

    async fn tile_sizes(&self) -> Result<Vec<(u32, u32)>, EngineError> {
        Ok(tiles::tile_size_entries(&self.levels()?))
    }

    async fn process(&mut self, request: &TransformRequest) -> Result<ProcessedImage, EngineError> {
        let started = std::time::Instant::now();
        let result = async {
            let source = self.source()?.clone();
            let outputs = self.available_output_formats().await?;
            let features = self.supported_features().await?;
            // Capability mismatches are rejected before the source is even
            // parsed for dimensions.
            pipeline::validate_capabilities(request, &features, &outputs)?;
            let levels = self.levels()?;
            let plan = pipeline::plan(request, &levels, &features, &outputs, &self.context.limits)?;
            self.execute(&plan, &source)
        }
        .await;

        match &result {
            Ok(output) => {
                TransformMetrics::global().record_success(
                    BackendKind::Raster,
                    request.format,
                    started.elapsed(),
                );
                tracing::debug!(
                    format = %request.format,
                    bytes = output.data.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "raster transformation complete"
                );
            }
            Err(e) => {
                TransformMetrics::global().record_failure(BackendKind::Raster, e.kind());
            }
        }
        result
    }
}

/// Resize with a Lanczos3 convolution over RGBA pixels.
fn resize(img: &DynamicImage, target_w: u32, target_h: u32) -> Result<DynamicImage, EngineError> {
    let resize_failed = |message: String| EngineError::execution(BackendKind::Raster, message);

    let src_width = NonZeroU32::new(img.width())
        .ok_or_else(|| resize_failed("source width is 0".to_string()))?;
    let src_height = NonZeroU32::new(img.height())
        .ok_or_else(|| resize_failed("source height is 0".to_string()))?;
    let dst_width = NonZeroU32::new(target_w)
        .ok_or_else(|| resize_failed("target width is 0".to_string()))?;
    let dst_height = NonZeroU32::new(target_h)
        .ok_or_else(|| resize_failed("target height is 0".to_string()))?;

    let src_image = Image::from_vec_u8(
        src_width,
        src_height,
        img.to_rgba8().into_raw(),
        PixelType::U8x4,
    )
    .map_err(|e| resize_failed(format!("failed to create source image: {:?}", e)))?;

    let mut dst_image = Image::new(dst_width, dst_height, PixelType::U8x4);
    let mut resizer = Resizer::new(ResizeAlg::Convolution(FilterType::Lanczos3));
    resizer
        .resize(&src_image.view(), &mut dst_image.view_mut())
        .map_err(|e| resize_failed(format!("resize operation failed: {:?}", e)))?;

    let rgba_image = image::RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| resize_failed("failed to assemble output buffer".to_string()))?;
    Ok(DynamicImage::ImageRgba8(rgba_image))
}
