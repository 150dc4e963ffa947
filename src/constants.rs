// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers improves maintainability
// and makes it easier to understand and modify defaults.

// =============================================================================
// Backend tool defaults
// =============================================================================

/// Default GraphicsMagick binary name (resolved via PATH)
pub const DEFAULT_GM_PATH: &str = "gm";

/// Default ImageMagick binary name (resolved via PATH)
pub const DEFAULT_MAGICK_PATH: &str = "magick";

/// Default timeout for a single external tool invocation, in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a capability self-report probe, in seconds
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Output limits
// =============================================================================

/// Default maximum output width in pixels
pub const DEFAULT_MAX_OUTPUT_WIDTH: u32 = 10_000;

/// Default maximum output height in pixels
pub const DEFAULT_MAX_OUTPUT_HEIGHT: u32 = 10_000;

/// Default maximum source pixel count (image bomb protection)
pub const DEFAULT_MAX_SOURCE_PIXELS: u64 = 400_000_000;

// =============================================================================
// Temporary files
// =============================================================================

/// Prefix for temp files handed to tools that require seekable input.
/// The startup sweep removes any leftover file carrying this prefix.
pub const TEMP_FILE_PREFIX: &str = "tessera-src-";

// =============================================================================
// Encoding defaults
// =============================================================================

/// Default quality for lossy output formats (JPEG, JP2)
pub const DEFAULT_ENCODE_QUALITY: u8 = 80;

/// Bitonal threshold on the 0-255 luma scale
pub const BITONAL_THRESHOLD: u8 = 128;

/// Rasterization density passed to Ghostscript-backed PDF decoding, in DPI
pub const PDF_RASTER_DPI: u32 = 150;
