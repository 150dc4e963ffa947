// Tessera image delivery engine
//
// Detects source image formats, negotiates per-backend capabilities,
// resolves region/size/rotation/quality geometry against real source
// dimensions, and executes a deterministic transformation pipeline through
// interchangeable backends (in-process raster, GraphicsMagick, ImageMagick).
// The HTTP layer, identifier resolution and derivative caching are external
// collaborators; this crate's surface is the processor and capability APIs.

pub mod capabilities;
pub mod config;
pub mod constants;
pub mod error;
pub mod format;
pub mod geometry;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod tiles;

pub use capabilities::{BackendKind, CapabilityMatrix, ProcessorFeature};
pub use config::EngineConfig;
pub use error::EngineError;
pub use format::{detect, OutputFormat, SourceFormat};
pub use geometry::{Quality, Region, Rotation, Size, TransformRequest};
pub use pipeline::TransformPlan;
pub use processor::{ProcessedImage, Processor, ProcessorFactory};
pub use tiles::TileDescriptor;
