//! Configuration System using Figment
//!
//! Strongly-typed settings for an acquisition station. Configuration is
//! loaded from:
//! 1. `config/lasesnap.toml` (base configuration)
//! 2. Environment variables prefixed with `LASESNAP_`, nested keys separated
//!    by a double underscore (`LASESNAP_STORAGE__OUTPUT_DIR=/data/out`)
//!
//! Every field has a default, so a missing file yields a usable station
//! profile.
//!
//! The settle and inter-shot delays of the sequencer are intentionally absent:
//! they are fixed by the instrument and live as constants in
//! [`crate::sequencer`].
//!
//! # Example
//! ```no_run
//! use lasesnap::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Watching {}", settings.storage.watch_dir.display());
//! # Ok::<(), lasesnap::error::SnapError>(())
//! ```

use crate::cube::render::DEFAULT_RGB_BANDS;
use crate::error::{AppResult, SnapError};
use crate::hardware::discovery::{DEFAULT_SOURCE_MARKER, DEFAULT_TRIGGER_MARKERS};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/lasesnap.toml";

/// Top-level station configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Device discovery and transport settings
    #[serde(default)]
    pub devices: DeviceConfig,
    /// Where the imaging instrument writes and where results go
    #[serde(default)]
    pub storage: StorageConfig,
    /// Layout and rendering of hyperspectral cubes
    #[serde(default)]
    pub cube: CubeConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Device discovery and transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Substring that must appear in the light source identity string
    #[serde(default = "default_source_marker")]
    pub source_marker: String,
    /// Substrings accepted in a serial port description for the trigger
    #[serde(default = "default_trigger_markers")]
    pub trigger_markers: Vec<String>,
    /// Baud rate of the trigger microcontroller
    #[serde(default = "default_trigger_baud_rate")]
    pub trigger_baud_rate: u32,
    /// Delay after opening the trigger port before writing (board reset)
    #[serde(default = "default_trigger_settle_ms")]
    pub trigger_settle_ms: u64,
    /// I/O timeout for the light source session
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
}

/// Storage locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory the imaging instrument writes one folder per shot into
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,
    /// Directory renamed copies and combined outputs are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Cube layout inside an output folder and false-color band choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeConfig {
    /// Sub-directory of each shot folder holding the cube pair
    #[serde(default = "default_cube_subdir")]
    pub subdir: PathBuf,
    /// Glob matched against header file names inside `subdir`
    #[serde(default = "default_header_pattern")]
    pub header_pattern: String,
    /// Band indices mapped to red, green and blue
    #[serde(default = "default_rgb_bands")]
    pub rgb_bands: Vec<usize>,
}

// Default value functions
fn default_name() -> String {
    "LaseSnap".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_source_marker() -> String {
    DEFAULT_SOURCE_MARKER.to_string()
}

fn default_trigger_markers() -> Vec<String> {
    DEFAULT_TRIGGER_MARKERS
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_trigger_baud_rate() -> u32 {
    9600
}

fn default_trigger_settle_ms() -> u64 {
    2000
}

fn default_source_timeout_ms() -> u64 {
    5000
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("capture")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_cube_subdir() -> PathBuf {
    PathBuf::from("results")
}

fn default_header_pattern() -> String {
    "REFLECTANCE_*.hdr".to_string()
}

fn default_rgb_bands() -> Vec<usize> {
    DEFAULT_RGB_BANDS.to_vec()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            source_marker: default_source_marker(),
            trigger_markers: default_trigger_markers(),
            trigger_baud_rate: default_trigger_baud_rate(),
            trigger_settle_ms: default_trigger_settle_ms(),
            source_timeout_ms: default_source_timeout_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            subdir: default_cube_subdir(),
            header_pattern: default_header_pattern(),
            rgb_bands: default_rgb_bands(),
        }
    }
}

impl CubeConfig {
    /// The configured bands as an (R, G, B) triple.
    ///
    /// Only meaningful after [`Settings::validate`] has passed.
    pub fn rgb(&self) -> AppResult<[usize; 3]> {
        match self.rgb_bands.as_slice() {
            [r, g, b] => Ok([*r, *g, *b]),
            other => Err(SnapError::Configuration(format!(
                "rgb_bands must list exactly three bands, got {}",
                other.len()
            ))),
        }
    }
}

impl Settings {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables can override configuration with prefix `LASESNAP_`
    /// Example: `LASESNAP_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LASESNAP_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SnapError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.devices.source_marker.trim().is_empty() {
            return Err(SnapError::Configuration(
                "source_marker must not be empty".to_string(),
            ));
        }

        if self.devices.trigger_markers.is_empty()
            || self.devices.trigger_markers.iter().any(|m| m.trim().is_empty())
        {
            return Err(SnapError::Configuration(
                "trigger_markers must list at least one non-empty marker".to_string(),
            ));
        }

        if self.devices.trigger_baud_rate == 0 {
            return Err(SnapError::Configuration(
                "trigger_baud_rate must be positive".to_string(),
            ));
        }

        self.cube.rgb()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.cube.rgb().unwrap(), [29, 19, 9]);
        assert_eq!(settings.devices.trigger_baud_rate, 9600);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.application.name, "LaseSnap");
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[storage]
watch_dir = "/mnt/camera"

[cube]
rgb_bands = [40, 25, 10]
"#
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.storage.watch_dir, PathBuf::from("/mnt/camera"));
        assert_eq!(settings.storage.output_dir, PathBuf::from("output"));
        assert_eq!(settings.cube.rgb().unwrap(), [40, 25, 10]);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        assert!(matches!(
            settings.validate(),
            Err(SnapError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_two_band_rendering() {
        let mut settings = Settings::default();
        settings.cube.rgb_bands = vec![1, 2];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_empty_trigger_markers() {
        let mut settings = Settings::default();
        settings.devices.trigger_markers.clear();
        assert!(settings.validate().is_err());
    }
}
