//! Capability probes for external tools
//!
//! Each external backend self-reports what its binary was built with, and
//! the brittle text parsing of those reports is isolated here behind one
//! probe function per tool. Probes run at most once per process; the matrix
//! caches the result either way.
//!
//! GraphicsMagick reports optional codec support in the "Feature Support"
//! block of `gm version`. ImageMagick lists per-format read/write modes in
//! `magick identify -list format`.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::format::{OutputFormat, SourceFormat};
use crate::processor::command;

use super::ToolCapabilities;

pub async fn probe_graphicsmagick(
    binary: &str,
    timeout: Duration,
) -> Result<ToolCapabilities, String> {
    let args = vec!["version".to_string()];
    let stdout = command::capture_stdout(binary, &args, timeout)
        .await
        .map_err(|e| e.to_string())?;
    let report = parse_gm_version(&String::from_utf8_lossy(&stdout))?;
    tracing::info!(
        binary,
        sources = report.source_formats.len(),
        outputs = report.output_formats.len(),
        "GraphicsMagick capability probe succeeded"
    );
    Ok(report)
}

pub async fn probe_imagemagick(
    binary: &str,
    timeout: Duration,
) -> Result<ToolCapabilities, String> {
    let args = ["identify", "-list", "format"]
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    let stdout = command::capture_stdout(binary, &args, timeout)
        .await
        .map_err(|e| e.to_string())?;
    let report = parse_identify_formats(&String::from_utf8_lossy(&stdout))?;
    tracing::info!(
        binary,
        sources = report.source_formats.len(),
        outputs = report.output_formats.len(),
        "ImageMagick capability probe succeeded"
    );
    Ok(report)
}

/// Parse the "Feature Support" block of `gm version` output.
///
/// Rows look like `JPEG-2000                    yes`. Only the optional
/// codecs appear in the block; BMP and GIF are part of the core build and
/// are always present.
pub fn parse_gm_version(output: &str) -> Result<ToolCapabilities, String> {
    let mut caps = ToolCapabilities::default();
    caps.source_formats.insert(SourceFormat::Bmp);
    caps.source_formats.insert(SourceFormat::Gif);
    caps.output_formats.insert(OutputFormat::Bmp);
    caps.output_formats.insert(OutputFormat::Gif);

    let mut in_features = false;
    let mut saw_section = false;
    for line in output.lines() {
        let line = line.trim();
        if line.contains("Feature Support") {
            in_features = true;
            saw_section = true;
            continue;
        }
        if line.contains("Host type:") {
            break;
        }
        if !in_features || !line.ends_with("yes") {
            continue;
        }
        let Some(name) = line.split_whitespace().next() else {
            continue;
        };
        match name {
            "JPEG-2000" => {
                caps.source_formats.insert(SourceFormat::Jp2);
                caps.output_formats.insert(OutputFormat::Jp2);
            }
            "JPEG" => {
                caps.source_formats.insert(SourceFormat::Jpg);
                caps.output_formats.insert(OutputFormat::Jpg);
            }
            "PNG" => {
                caps.source_formats.insert(SourceFormat::Png);
                caps.output_formats.insert(OutputFormat::Png);
            }
            "TIFF" => {
                caps.source_formats.insert(SourceFormat::Tif);
                caps.output_formats.insert(OutputFormat::Tif);
            }
            "WebP" => {
                caps.source_formats.insert(SourceFormat::Webp);
                caps.output_formats.insert(OutputFormat::Webp);
            }
            "Ghostscript" => {
                caps.source_formats.insert(SourceFormat::Pdf);
                caps.output_formats.insert(OutputFormat::Pdf);
            }
            _ => {}
        }
    }

    if !saw_section {
        return Err("gm version output has no Feature Support section".to_string());
    }
    Ok(caps)
}

/// Parse `identify -list format` output.
///
/// Rows look like `JPEG* JPEG rw-   Joint Photographic Experts Group…`;
/// the mode column gates read (source) vs write (output) support.
pub fn parse_identify_formats(output: &str) -> Result<ToolCapabilities, String> {
    static MODE: OnceLock<Regex> = OnceLock::new();
    let mode_re = MODE.get_or_init(|| Regex::new(r"^[r-][w-][+-]$").expect("static pattern"));

    let mut caps = ToolCapabilities::default();
    let mut matched_rows = 0usize;
    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        let Some(name) = tokens.next() else { continue };
        let Some(mode) = tokens.find(|t| mode_re.is_match(t)) else {
            continue;
        };
        matched_rows += 1;
        let name = name.trim_end_matches('*').to_ascii_uppercase();
        let (source, out) = match name.as_str() {
            "JPEG" | "JPG" => (SourceFormat::Jpg, OutputFormat::Jpg),
            "PNG" => (SourceFormat::Png, OutputFormat::Png),
            "TIFF" | "TIF" => (SourceFormat::Tif, OutputFormat::Tif),
            "JP2" => (SourceFormat::Jp2, OutputFormat::Jp2),
            "GIF" => (SourceFormat::Gif, OutputFormat::Gif),
            "BMP" => (SourceFormat::Bmp, OutputFormat::Bmp),
            "WEBP" => (SourceFormat::Webp, OutputFormat::Webp),
            "PDF" => (SourceFormat::Pdf, OutputFormat::Pdf),
            _ => continue,
        };
        if mode.contains('r') {
            caps.source_formats.insert(source);
        }
        if mode.contains('w') {
            caps.output_formats.insert(out);
        }
    }

    if matched_rows == 0 {
        return Err("identify -list format output has no format rows".to_string());
    }
    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GM_VERSION_FULL: &str = "\
GraphicsMagick 1.3.42 2023-09-23 Q16 http://www.GraphicsMagick.org/
Copyright (C) 2002-2023 GraphicsMagick Group.

Feature Support:
  Native Thread Safe           yes
  Large Memory Files           yes
  Large File Support           yes
  BZIP                         yes
  DPS                          no
  FlashPix                     no
  FreeType                     yes
  Ghostscript (Library)        yes
  JBIG                         no
  JPEG-2000                    yes
  JPEG                         yes
  Little CMS                   yes
  Loadable Modules             no
  Solaris mtmalloc             no
  Google perftools tcmalloc    no
  OpenMP                       yes (201511 \"4.5\")
  PNG                          yes
  TIFF                         yes
  TRIO                         no
  Solaris umem                 no
  WebP                         yes
  WMF                          yes
  X11                          no
  XML                          yes
  ZLIB                         yes

Host type: x86_64-pc-linux-gnu
";

    const GM_VERSION_MINIMAL: &str = "\
GraphicsMagick 1.3.42 2023-09-23 Q16 http://www.GraphicsMagick.org/

Feature Support:
  JPEG-2000                    no
  JPEG                         yes
  PNG                          yes
  TIFF                         no
  WebP                         no
  Ghostscript (Library)        no

Host type: x86_64-pc-linux-gnu
";

    #[test]
    fn test_parse_gm_full_build() {
        let caps = parse_gm_version(GM_VERSION_FULL).unwrap();
        for format in [
            SourceFormat::Jpg,
            SourceFormat::Png,
            SourceFormat::Tif,
            SourceFormat::Jp2,
            SourceFormat::Webp,
            SourceFormat::Pdf,
            SourceFormat::Bmp,
            SourceFormat::Gif,
        ] {
            assert!(caps.source_formats.contains(&format), "missing {format}");
        }
        assert!(caps.output_formats.contains(&OutputFormat::Jp2));
        assert!(caps.output_formats.contains(&OutputFormat::Pdf));
    }

    #[test]
    fn test_parse_gm_minimal_build_drops_no_codecs() {
        let caps = parse_gm_version(GM_VERSION_MINIMAL).unwrap();
        assert!(caps.source_formats.contains(&SourceFormat::Jpg));
        assert!(caps.source_formats.contains(&SourceFormat::Png));
        assert!(!caps.source_formats.contains(&SourceFormat::Tif));
        assert!(!caps.source_formats.contains(&SourceFormat::Jp2));
        assert!(!caps.source_formats.contains(&SourceFormat::Pdf));
        // core formats always present
        assert!(caps.source_formats.contains(&SourceFormat::Bmp));
        assert!(caps.source_formats.contains(&SourceFormat::Gif));
    }

    #[test]
    fn test_parse_gm_rows_after_host_type_ignored() {
        let output = format!("{}\n  JPEG-2000  yes\n", GM_VERSION_MINIMAL);
        let caps = parse_gm_version(&output).unwrap();
        assert!(!caps.source_formats.contains(&SourceFormat::Jp2));
    }

    #[test]
    fn test_parse_gm_without_feature_section_is_malformed() {
        assert!(parse_gm_version("GraphicsMagick 1.3.42\n").is_err());
        assert!(parse_gm_version("").is_err());
    }

    const IDENTIFY_FORMATS: &str = "\
   Format  Module    Mode  Description
-------------------------------------------------------------------------------
      3FR  DNG       r--   Hasselblad CFV/H3D39II
      BMP* BMP       rw-   Microsoft Windows bitmap image
      GIF* GIF       rw+   CompuServe graphics interchange format
      JP2* JP2       rw-   JPEG-2000 File Format Syntax (2.1.0)
     JPEG* JPEG      rw-   Joint Photographic Experts Group JFIF format
      PDF* PDF       -w+   Portable Document Format
      PNG* PNG       rw-   Portable Network Graphics
     TIFF* TIFF      rw+   Tagged Image File Format
     WEBP* WEBP      rw-   WebP Image Format

* native blob support
";

    #[test]
    fn test_parse_identify_read_write_modes() {
        let caps = parse_identify_formats(IDENTIFY_FORMATS).unwrap();
        assert!(caps.source_formats.contains(&SourceFormat::Jp2));
        assert!(caps.source_formats.contains(&SourceFormat::Tif));
        assert!(caps.output_formats.contains(&OutputFormat::Webp));
        // PDF row is write-only in this build
        assert!(!caps.source_formats.contains(&SourceFormat::Pdf));
        assert!(caps.output_formats.contains(&OutputFormat::Pdf));
        // unknown formats are ignored, not errors
        assert!(!caps
            .source_formats
            .iter()
            .any(|f| f.as_str() == "3fr"));
    }

    #[test]
    fn test_parse_identify_garbage_is_malformed() {
        assert!(parse_identify_formats("command not found\n").is_err());
        assert!(parse_identify_formats("").is_err());
    }
}
