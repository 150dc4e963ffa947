//! Engine error taxonomy
//!
//! Every failure the engine reports is one of these typed variants, so the
//! resource layer can map errors to distinct client-visible outcomes without
//! inspecting free-text messages. Capability mismatches are always reported,
//! never papered over with a degraded result.

use thiserror::Error;

use crate::capabilities::{BackendKind, ProcessorFeature};
use crate::format::OutputFormat;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Source bytes/extension did not resolve to a supported format.
    /// Terminal client error; never retried.
    #[error("Unsupported source format: {format}")]
    UnsupportedFormat { format: String },

    /// The request needs a feature absent from the bound backend's feature
    /// set for this source format. Terminal; the missing capability is named.
    #[error("Backend does not support {feature} for this source format")]
    UnsupportedFeature { feature: ProcessorFeature },

    /// The requested output format is not in the backend's output set for
    /// this source format.
    #[error("Backend cannot encode {format} output for this source format")]
    UnsupportedOutputFormat { format: OutputFormat },

    /// Malformed or out-of-bounds region/size/rotation. Terminal client error.
    #[error("Invalid geometry: {message}")]
    InvalidGeometry { message: String },

    /// An operation requiring the source stream was called before
    /// `bind_source`.
    #[error("No source bound to processor")]
    SourceNotBound,

    /// The backend's capability self-report failed at startup/first use.
    /// Cached for the process lifetime; the backend is excluded from
    /// selection rather than re-probed per request.
    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: BackendKind, reason: String },

    /// Subprocess failure, timeout, or decode/encode fault. May be transient;
    /// the caller may retry with a different backend if one is configured.
    #[error("Backend {backend} execution failed: {message}")]
    BackendExecution { backend: BackendKind, message: String },

    /// Source stream unreadable; propagated unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Maps engine errors to HTTP status codes.
    ///
    /// Status mapping:
    /// - UnsupportedFormat, UnsupportedOutputFormat → 415 (Unsupported Media Type)
    /// - UnsupportedFeature → 501 (Not Implemented)
    /// - InvalidGeometry → 400 (Bad Request)
    /// - BackendUnavailable → 503 (Service Unavailable)
    /// - BackendExecution → 502 (Bad Gateway)
    /// - SourceNotBound, Io → 500 (Internal Server Error)
    pub fn to_http_status(&self) -> u16 {
        match self {
            EngineError::UnsupportedFormat { .. }
            | EngineError::UnsupportedOutputFormat { .. } => 415,
            EngineError::UnsupportedFeature { .. } => 501,
            EngineError::InvalidGeometry { .. } => 400,
            EngineError::BackendUnavailable { .. } => 503,
            EngineError::BackendExecution { .. } => 502,
            EngineError::SourceNotBound | EngineError::Io(_) => 500,
        }
    }

    /// Whether a retry against a differently-configured backend could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::BackendExecution { .. })
    }

    /// Stable variant label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnsupportedFormat { .. } => "unsupported_format",
            EngineError::UnsupportedFeature { .. } => "unsupported_feature",
            EngineError::UnsupportedOutputFormat { .. } => "unsupported_output_format",
            EngineError::InvalidGeometry { .. } => "invalid_geometry",
            EngineError::SourceNotBound => "source_not_bound",
            EngineError::BackendUnavailable { .. } => "backend_unavailable",
            EngineError::BackendExecution { .. } => "backend_execution",
            EngineError::Io(_) => "io",
        }
    }

    pub fn unsupported_format(format: impl Into<String>) -> Self {
        EngineError::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        EngineError::InvalidGeometry {
            message: message.into(),
        }
    }

    pub fn unavailable(backend: BackendKind, reason: impl Into<String>) -> Self {
        EngineError::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    pub fn execution(backend: BackendKind, message: impl Into<String>) -> Self {
        EngineError::BackendExecution {
            backend,
            message: message.into(),
        }
    }
}
