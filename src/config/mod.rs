// Configuration module

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::capabilities::BackendKind;
use crate::constants::{
    DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_ENCODE_QUALITY, DEFAULT_GM_PATH, DEFAULT_MAGICK_PATH,
    DEFAULT_MAX_OUTPUT_HEIGHT, DEFAULT_MAX_OUTPUT_WIDTH, DEFAULT_MAX_SOURCE_PIXELS,
    DEFAULT_PROBE_TIMEOUT_SECS,
};
use crate::format::SourceFormat;
use crate::geometry::SizeLimits;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backends: BackendsConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    /// Directory for temp files handed to tools needing seekable input.
    /// Swept for stale engine files at startup.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Quality for lossy output formats when the request leaves it to us.
    #[serde(default = "default_quality")]
    pub default_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// GraphicsMagick binary (name on PATH or absolute path)
    #[serde(default = "default_gm_path")]
    pub gm_path: String,

    /// ImageMagick 7 binary
    #[serde(default = "default_magick_path")]
    pub magick_path: String,

    /// Hard timeout for one external tool invocation, in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Timeout for the one-shot capability probes, in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Ordered backend preference per source format. Formats without an
    /// entry use the built-in order.
    #[serde(default)]
    pub preference: HashMap<SourceFormat, Vec<BackendKind>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum resolved output width (requests beyond it are rejected)
    #[serde(default = "default_max_output_width")]
    pub max_output_width: u32,

    /// Maximum resolved output height
    #[serde(default = "default_max_output_height")]
    pub max_output_height: u32,

    /// Maximum source pixel count accepted for decoding
    #[serde(default = "default_max_source_pixels")]
    pub max_source_pixels: u64,
}

fn default_gm_path() -> String {
    DEFAULT_GM_PATH.to_string()
}

fn default_magick_path() -> String {
    DEFAULT_MAGICK_PATH.to_string()
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

fn default_max_output_width() -> u32 {
    DEFAULT_MAX_OUTPUT_WIDTH
}

fn default_max_output_height() -> u32 {
    DEFAULT_MAX_OUTPUT_HEIGHT
}

fn default_max_source_pixels() -> u64 {
    DEFAULT_MAX_SOURCE_PIXELS
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_quality() -> u8 {
    DEFAULT_ENCODE_QUALITY
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            gm_path: default_gm_path(),
            magick_path: default_magick_path(),
            command_timeout_secs: default_command_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            preference: HashMap::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_output_width: default_max_output_width(),
            max_output_height: default_max_output_height(),
            max_source_pixels: default_max_source_pixels(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backends: BackendsConfig::default(),
            limits: LimitsConfig::default(),
            temp_dir: default_temp_dir(),
            default_quality: default_quality(),
        }
    }
}

impl BackendsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl LimitsConfig {
    pub fn to_size_limits(&self) -> SizeLimits {
        SizeLimits {
            max_width: self.max_output_width,
            max_height: self.max_output_height,
            max_source_pixels: self.max_source_pixels,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML string, substituting `${ENV_VAR}`
    /// references from the process environment first.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        let substituted = substitute_env_vars(yaml)?;
        let config: EngineConfig =
            serde_yaml::from_str(&substituted).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backends.gm_path.trim().is_empty() {
            return Err("backends.gm_path must not be empty".to_string());
        }
        if self.backends.magick_path.trim().is_empty() {
            return Err("backends.magick_path must not be empty".to_string());
        }
        if self.backends.command_timeout_secs == 0 {
            return Err("backends.command_timeout_secs must be positive".to_string());
        }
        if self.backends.probe_timeout_secs == 0 {
            return Err("backends.probe_timeout_secs must be positive".to_string());
        }
        if self.limits.max_output_width == 0 || self.limits.max_output_height == 0 {
            return Err("limits.max_output_* must be positive".to_string());
        }
        if self.limits.max_source_pixels == 0 {
            return Err("limits.max_source_pixels must be positive".to_string());
        }
        if !(1..=100).contains(&self.default_quality) {
            return Err("default_quality must be 1-100".to_string());
        }
        for (format, backends) in &self.backends.preference {
            if backends.is_empty() {
                return Err(format!("backends.preference.{} must not be empty", format));
            }
        }
        Ok(())
    }

    /// Ordered backends to try for a source format: the configured override
    /// when present, otherwise the built-in policy. Raster is preferred for
    /// everything it decodes; formats it cannot decode lead with the
    /// external tools.
    pub fn selection_order(&self, format: SourceFormat) -> Vec<BackendKind> {
        if let Some(order) = self.backends.preference.get(&format) {
            return order.clone();
        }
        match format {
            SourceFormat::Jp2 | SourceFormat::Pdf => {
                vec![BackendKind::GraphicsMagick, BackendKind::ImageMagick]
            }
            _ => vec![
                BackendKind::Raster,
                BackendKind::GraphicsMagick,
                BackendKind::ImageMagick,
            ],
        }
    }
}

/// Substitute `${VAR}` references with environment variable values.
/// Unset variables are an error rather than silently becoming empty.
fn substitute_env_vars(input: &str) -> Result<String, String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern");
    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;
    for captures in pattern.captures_iter(input) {
        let whole = captures.get(0).expect("capture 0 always present");
        let name = &captures[1];
        let value = std::env::var(name)
            .map_err(|_| format!("environment variable {} is not set", name))?;
        result.push_str(&input[last_end..whole.start()]);
        result.push_str(&value);
        last_end = whole.end();
    }
    result.push_str(&input[last_end..]);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config.backends.gm_path, "gm");
        assert_eq!(config.backends.magick_path, "magick");
        assert_eq!(config.default_quality, 80);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = r#"
backends:
  gm_path: /opt/gm/bin/gm
  command_timeout_secs: 10
limits:
  max_output_width: 2048
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.backends.gm_path, "/opt/gm/bin/gm");
        assert_eq!(config.backends.command_timeout_secs, 10);
        assert_eq!(config.limits.max_output_width, 2048);
        // untouched fields keep defaults
        assert_eq!(config.limits.max_output_height, 10_000);
    }

    #[test]
    fn test_preference_overrides_selection_order() {
        let yaml = r#"
backends:
  preference:
    tif: [imagemagick, raster]
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.selection_order(SourceFormat::Tif),
            vec![BackendKind::ImageMagick, BackendKind::Raster]
        );
        // other formats keep the built-in order
        assert_eq!(
            config.selection_order(SourceFormat::Jpg)[0],
            BackendKind::Raster
        );
    }

    #[test]
    fn test_builtin_order_prefers_tools_for_jp2_and_pdf() {
        let config = EngineConfig::default();
        assert_eq!(
            config.selection_order(SourceFormat::Jp2)[0],
            BackendKind::GraphicsMagick
        );
        assert!(!config
            .selection_order(SourceFormat::Pdf)
            .contains(&BackendKind::Raster));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let yaml = "backends:\n  command_timeout_secs: 0\n";
        assert!(EngineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_quality_out_of_range_rejected() {
        let yaml = "default_quality: 0\n";
        assert!(EngineConfig::from_yaml(yaml).is_err());
        let yaml = "default_quality: 101\n";
        assert!(EngineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("TESSERA_TEST_GM", "/usr/local/bin/gm");
        let yaml = "backends:\n  gm_path: ${TESSERA_TEST_GM}\n";
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.backends.gm_path, "/usr/local/bin/gm");
    }

    #[test]
    fn test_unset_env_var_is_an_error() {
        let yaml = "backends:\n  gm_path: ${TESSERA_TEST_UNSET_VARIABLE}\n";
        assert!(EngineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_config_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, "default_quality: 92").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_quality, 92);
    }
}
