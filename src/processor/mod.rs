//! Processor abstraction
//!
//! A [`Processor`] is the per-request unit binding one source byte stream
//! and its detected format to one backend. Instances are created fresh for
//! every transformation job, never pooled or shared: they hold per-request
//! mutable state and are not safe for concurrent use. Callers needing
//! parallel transformations of the same source create independent
//! instances, each with its own copy of the bytes.
//!
//! Lifecycle: construct via [`ProcessorFactory::for_source`] → `bind_source`
//! → query capabilities/tile sizes as needed → `process` once → discard.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::capabilities::{BackendKind, CapabilityMatrix, ProcessorFeature};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::format::{OutputFormat, SourceFormat};
use crate::geometry::{SizeLimits, TransformRequest};

pub mod command;
pub mod encoder;
pub mod magick;
pub mod raster;

/// Result of a completed transformation: encoded bytes plus the content
/// type the resource layer should serve them with.
#[derive(Debug)]
pub struct ProcessedImage {
    pub data: Vec<u8>,
    pub media_type: &'static str,
}

/// One transformation job bound to one backend.
#[async_trait]
pub trait Processor: Send {
    fn backend(&self) -> BackendKind;

    fn source_format(&self) -> SourceFormat;

    /// Bind the source byte stream. Must be called before `tile_sizes` or
    /// `process`; those operations report a state error otherwise.
    /// Capability queries only need the format and work unbound.
    fn bind_source(&mut self, source: Bytes);

    /// Output formats this backend can encode for the bound source format.
    /// Delegates to the capability matrix; always equals the matrix entry.
    async fn available_output_formats(&self) -> Result<HashSet<OutputFormat>, EngineError>;

    /// Protocol features this backend can execute for the bound source
    /// format. Delegates to the capability matrix.
    async fn supported_features(&self) -> Result<HashSet<ProcessorFeature>, EngineError>;

    /// Tile sizes per resolution level, highest resolution first; a single
    /// full-image entry for untiled sources or backends that cannot
    /// introspect tiling. Idempotent: the in-memory source is never
    /// consumed, so repeated calls return identical results.
    async fn tile_sizes(&self) -> Result<Vec<(u32, u32)>, EngineError>;

    /// Execute the full pipeline once. Fails fast on capability mismatches
    /// before any decode work; never degrades a request.
    async fn process(&mut self, request: &TransformRequest) -> Result<ProcessedImage, EngineError>;
}

/// Everything a processor needs besides its source: the shared matrix and
/// the engine's resource settings.
#[derive(Clone)]
pub(crate) struct ProcessorContext {
    pub matrix: Arc<CapabilityMatrix>,
    pub limits: SizeLimits,
    pub default_quality: u8,
    pub command_timeout: Duration,
    pub temp_dir: PathBuf,
}

/// Constructs a fresh, non-shared [`Processor`] per job.
///
/// Backend selection is a config-driven policy: an ordered preference list
/// per source format, filtered by availability and per-format support in
/// the capability matrix. The factory owns the matrix and is the natural
/// long-lived, shareable object; processors are not.
pub struct ProcessorFactory {
    config: Arc<EngineConfig>,
    matrix: Arc<CapabilityMatrix>,
}

impl ProcessorFactory {
    pub fn new(config: EngineConfig) -> Self {
        // Crash recovery: remove source temp files a previous process left
        // behind before any new ones are created.
        if let Err(e) = command::sweep_temp_dir(&config.temp_dir) {
            tracing::warn!(error = %e, dir = %config.temp_dir.display(), "temp dir sweep failed");
        }
        let matrix = Arc::new(CapabilityMatrix::new(
            config.backends.gm_path.clone(),
            config.backends.magick_path.clone(),
            config.backends.probe_timeout(),
        ));
        Self {
            config: Arc::new(config),
            matrix,
        }
    }

    /// The process-wide capability matrix, for service-description documents.
    pub fn matrix(&self) -> Arc<CapabilityMatrix> {
        self.matrix.clone()
    }

    /// Construct a processor for the given source format, trying each
    /// configured backend in preference order. Unavailable backends are
    /// skipped (their probe failure is already cached); a format no backend
    /// can decode is an unsupported-format error.
    pub async fn for_source(
        &self,
        format: SourceFormat,
    ) -> Result<Box<dyn Processor>, EngineError> {
        if !format.is_known() {
            return Err(EngineError::unsupported_format(format.as_str()));
        }
        let context = self.context();
        for backend in self.config.selection_order(format) {
            if !self.matrix.is_available(backend).await {
                tracing::debug!(%backend, %format, "skipping unavailable backend");
                continue;
            }
            if !self.matrix.supports_source(backend, format).await? {
                continue;
            }
            tracing::debug!(%backend, %format, "selected backend");
            let processor: Box<dyn Processor> = match backend {
                BackendKind::Raster => {
                    Box::new(raster::RasterProcessor::new(format, context.clone()))
                }
                BackendKind::GraphicsMagick => Box::new(magick::MagickProcessor::graphicsmagick(
                    format,
                    self.config.backends.gm_path.clone(),
                    context.clone(),
                )),
                BackendKind::ImageMagick => Box::new(magick::MagickProcessor::imagemagick(
                    format,
                    self.config.backends.magick_path.clone(),
                    context.clone(),
                )),
            };
            return Ok(processor);
        }
        Err(EngineError::unsupported_format(format!(
            "{} (no configured backend can decode it)",
            format
        )))
    }

    fn context(&self) -> ProcessorContext {
        ProcessorContext {
            matrix: self.matrix.clone(),
            limits: self.config.limits.to_size_limits(),
            default_quality: self.config.default_quality,
            command_timeout: self.config.backends.command_timeout(),
            temp_dir: self.config.temp_dir.clone(),
        }
    }
}
