//! GraphicsMagick / ImageMagick backends
//!
//! Both tools share the same invocation shape: one `convert` run with the
//! resolved crop/scale/mirror/rotate/quality/format parameters encoded as
//! arguments, source bytes fed on stdin (`fmt:-`) and encoded output read
//! from stdout (`fmt:-`). PDF sources are the exception: Ghostscript needs
//! seekable input, so they go through a scoped temp file that is removed on
//! every exit path. Neither tool exposes its pyramid structure, so tile
//! discovery reports the single full-image entry.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::capabilities::{BackendKind, ProcessorFeature};
use crate::constants::PDF_RASTER_DPI;
use crate::error::EngineError;
use crate::format::{OutputFormat, SourceFormat};
use crate::geometry::{Quality, TransformRequest};
use crate::metrics::TransformMetrics;
use crate::pipeline::{self, TransformPlan};
use crate::tiles::{self, TileDescriptor};

use super::command::{self, CommandError};
use super::{ProcessedImage, Processor, ProcessorContext};

pub struct MagickProcessor {
    backend: BackendKind,
    binary: String,
    source_format: SourceFormat,
    context: ProcessorContext,
    source: Option<Bytes>,
}

impl MagickProcessor {
    pub(crate) fn graphicsmagick(
        source_format: SourceFormat,
        binary: String,
        context: ProcessorContext,
    ) -> Self {
        Self {
            backend: BackendKind::GraphicsMagick,
            binary,
            source_format,
            context,
            source: None,
        }
    }

    pub(crate) fn imagemagick(
        source_format: SourceFormat,
        binary: String,
        context: ProcessorContext,
    ) -> Self {
        Self {
            backend: BackendKind::ImageMagick,
            binary,
            source_format,
            context,
            source: None,
        }
    }

    fn source(&self) -> Result<&Bytes, EngineError> {
        self.source.as_ref().ok_or(EngineError::SourceNotBound)
    }

    fn execution_error(&self, error: CommandError) -> EngineError {
        EngineError::execution(self.backend, error.to_string())
    }

    fn timeout(&self) -> Duration {
        self.context.command_timeout
    }

    /// Full-image dimensions of the bound source.
    ///
    /// Raster container headers are sniffed in-memory; PDF has no pixel
    /// dimensions until rasterized, so the tool's own `identify` reports
    /// the page size at the configured density.
    async fn source_dimensions(&self) -> Result<(u32, u32), EngineError> {
        let source = self.source()?;
        if self.source_format != SourceFormat::Pdf {
            return tiles::dimensions(source, self.source_format);
        }

        let file = command::write_temp_source(source, &self.context.temp_dir)
            .await
            .map_err(|e| self.execution_error(e))?;
        let input = format!("pdf:{}[0]", file.path().display());
        let args = vec![
            "identify".to_string(),
            "-density".to_string(),
            PDF_RASTER_DPI.to_string(),
            "-format".to_string(),
            "%w %h".to_string(),
            input,
        ];
        let stdout = command::capture_stdout(&self.binary, &args, self.timeout())
            .await
            .map_err(|e| self.execution_error(e))?;
        parse_identify_dimensions(&String::from_utf8_lossy(&stdout))
            .ok_or_else(|| EngineError::execution(self.backend, "identify returned no dimensions"))
    }

    async fn levels(&self) -> Result<Vec<TileDescriptor>, EngineError> {
        let (width, height) = self.source_dimensions().await?;
        Ok(vec![TileDescriptor::untiled(width, height)])
    }

    async fn execute(&self, plan: &TransformPlan) -> Result<ProcessedImage, EngineError> {
        let source = self.source()?.clone();
        let quality = self.context.default_quality;
        let stdout = if self.source_format == SourceFormat::Pdf {
            let file = command::write_temp_source(&source, &self.context.temp_dir)
                .await
                .map_err(|e| self.execution_error(e))?;
            let args = build_convert_args(
                plan,
                self.source_format,
                self.backend,
                Some(file.path()),
                quality,
            );
            command::capture_stdout(&self.binary, &args, self.timeout())
                .await
                .map_err(|e| self.execution_error(e))?
            // temp file dropped (and deleted) here, after the tool exits
        } else {
            let args = build_convert_args(plan, self.source_format, self.backend, None, quality);
            command::pipe_through(&self.binary, &args, &source, self.timeout())
                .await
                .map_err(|e| self.execution_error(e))?
        };
        Ok(ProcessedImage {
            data: stdout,
            media_type: plan.format.media_type(),
        })
    }
}

#[async_trait]
impl Processor for MagickProcessor {
    fn backend(&self) -> BackendKind {
        self.backend
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
            .supported_outputs(self.backend, self.source_format)
            .await
    }

    async fn supported_features(&self) -> Result<HashSet<ProcessorFeature>, EngineError> {
        self.context
            .matrix
            .supported_features(self.backend, self.source_format)
            .await
    }

    /// These tools cannot introspect tiling, so a tiled source still yields
    /// the single full-image entry rather than an error.
    async fn tile_sizes(&self) -> Result<Vec<(u32, u32)>, EngineError> {
        Ok(tiles::tile_size_entries(&self.levels().await?))
    }

    async fn process(&mut self, request: &TransformRequest) -> Result<ProcessedImage, EngineError> {
        let started = std::time::Instant::now();
        let result = async {
            self.source()?;
            let outputs = self.available_output_formats().await?;
            let features = self.supported_features().await?;
            // Capability mismatches are rejected before `levels()` can spawn
            // an identify subprocess for PDF sources.
            pipeline::validate_capabilities(request, &features, &outputs)?;
            let levels = self.levels().await?;
            let plan = pipeline::plan(request, &levels, &features, &outputs, &self.context.limits)?;
            self.execute(&plan).await
        }
        .await;

        match &result {
            Ok(output) => {
                TransformMetrics::global().record_success(
                    self.backend,
                    request.format,
                    started.elapsed(),
                );
                tracing::debug!(
                    backend = %self.backend,
                    format = %request.format,
                    bytes = output.data.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "external tool transformation complete"
                );
            }
            Err(e) => {
                TransformMetrics::global().record_failure(self.backend, e.kind());
            }
        }
        result
    }
}

/// Encode a resolved plan as a single `convert` invocation.
///
/// Operation order mirrors the pipeline contract: crop, resize, mirror
/// (`-flop`), rotate, quality adjustment, encode. `!` on the resize forces
/// the exact resolved dimensions; the geometry engine already settled the
/// aspect-ratio question. `quality` is the operator-configured encode
/// quality and only applies to lossy output formats.
fn build_convert_args(
    plan: &TransformPlan,
    source_format: SourceFormat,
    backend: BackendKind,
    source_file: Option<&Path>,
    quality: u8,
) -> Vec<String> {
    let mut args = vec!["convert".to_string()];

    match source_file {
        Some(path) => {
            args.push("-density".to_string());
            args.push(PDF_RASTER_DPI.to_string());
            args.push(format!("{}:{}[0]", source_format, path.display()));
        }
        None => args.push(format!("{}:-", source_format)),
    }

    if !plan.is_identity_crop() {
        args.push("-crop".to_string());
        args.push(format!(
            "{}x{}+{}+{}",
            plan.region.width, plan.region.height, plan.region.x, plan.region.y
        ));
        if backend == BackendKind::ImageMagick {
            args.push("+repage".to_string());
        }
    }

    if !plan.is_identity_scale() {
        args.push("-resize".to_string());
        args.push(format!("{}x{}!", plan.target_width, plan.target_height));
    }

    if plan.mirror {
        args.push("-flop".to_string());
    }

    if plan.degrees != 0.0 {
        args.push("-rotate".to_string());
        args.push(format!("{}", plan.degrees));
    }

    match plan.quality {
        Quality::Default | Quality::Color => {}
        Quality::Gray => {
            args.push("-colorspace".to_string());
            args.push("Gray".to_string());
        }
        Quality::Bitonal => {
            args.push("-monochrome".to_string());
        }
    }

    if plan.format.is_lossy() {
        args.push("-quality".to_string());
        args.push(quality.to_string());
    }

    args.push(format!("{}:-", plan.format));
    args
}

fn parse_identify_dimensions(stdout: &str) -> Option<(u32, u32)> {
    let mut tokens = stdout.split_whitespace();
    let width = tokens.next()?.parse().ok()?;
    let height = tokens.next()?.parse().ok()?;
    Some((width, height))
}
