//! Layered application settings.
//!
//! Settings are resolved through `figment` in three layers, later layers
//! overriding earlier ones:
//!
//! 1. serde defaults (every field has one, so no file is required),
//! 2. an optional TOML file (`opt_scan.toml` by default),
//! 3. environment variables prefixed with `OPT_SCAN_`, with `__` separating
//!    nesting levels (e.g. `OPT_SCAN_SCAN__STEP_COUNT=400`).
//!
//! The structs here only carry *defaults and instrument-independent knobs*;
//! per-session parameters are validated separately when a `ScanConfig` is
//! built from them.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::AppResult;

/// Default session parameters for the scan orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Number of angular positions per revolution.
    pub step_count: usize,
    /// Generate synthetic projections instead of driving hardware.
    pub demo_mode: bool,
    /// Update the reconstruction after every captured frame.
    pub live_reconstruction: bool,
    /// Persist each captured frame.
    pub save_frames: bool,
    /// Retain every frame in memory instead of only the most recent one.
    pub keep_frames_in_memory: bool,
    /// Side length of synthetic demo-mode frames, in pixels.
    pub demo_frame_size: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            step_count: 400,
            demo_mode: false,
            live_reconstruction: true,
            save_frames: false,
            keep_frames_in_memory: false,
            demo_frame_size: 128,
        }
    }
}

/// Detector-related settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorSettings {
    /// Exposure duration hint in microseconds, used when the detector
    /// cannot report one.
    pub exposure_us: u64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self { exposure_us: 50_000 }
    }
}

/// Rotator-related settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RotatorSettings {
    /// Motor steps per full revolution (used by the mock rotator; real
    /// hardware reports its own value).
    pub steps_per_revolution: u32,
}

impl Default for RotatorSettings {
    fn default() -> Self {
        Self {
            steps_per_revolution: 3200,
        }
    }
}

/// Illumination stability diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StabilitySettings {
    /// Side length of the square corner windows, in pixels.
    pub corner_window: usize,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self { corner_window: 50 }
    }
}

/// Reconstruction engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconstructionSettings {
    /// Interpolation used when sampling the filtered profile: "linear" or
    /// "cubic".
    pub interpolation: String,
    /// Row of each frame fed to the reconstruction. Out-of-range values are
    /// corrected to the frame's mid-line at runtime.
    pub line_index: i64,
}

impl Default for ReconstructionSettings {
    fn default() -> Self {
        Self {
            interpolation: "linear".to_string(),
            line_index: -1,
        }
    }
}

/// Correction-frame acquisition settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrectionSettings {
    /// Number of captures averaged into one correction frame.
    pub averages: usize,
    /// Standard-deviation cutoff separating hot pixels from the background.
    pub sigma_cutoff: f64,
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        Self {
            averages: 10,
            sigma_cutoff: 5.0,
        }
    }
}

/// Persistence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root directory under which session folders are created.
    pub root: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: "./opt_data".to_string(),
        }
    }
}

/// Top-level application settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Scan orchestrator defaults.
    pub scan: ScanSettings,
    /// Detector settings.
    pub detector: DetectorSettings,
    /// Rotator settings.
    pub rotator: RotatorSettings,
    /// Stability monitor settings.
    pub stability: StabilitySettings,
    /// Reconstruction engine settings.
    pub reconstruction: ReconstructionSettings,
    /// Correction acquisition settings.
    pub correction: CorrectionSettings,
    /// Persistence settings.
    pub storage: StorageSettings,
}

impl Settings {
    /// Loads settings from defaults, an optional TOML file, and the
    /// environment.
    pub fn new(config_path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment.merge(Toml::file("opt_scan.toml"));
        }
        let settings = figment
            .merge(Env::prefixed("OPT_SCAN_").split("__"))
            .extract()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.scan.step_count, 400);
        assert_eq!(settings.stability.corner_window, 50);
        assert_eq!(settings.reconstruction.interpolation, "linear");
        assert!(!settings.scan.demo_mode);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scan]\nstep_count = 16\ndemo_mode = true").unwrap();
        writeln!(file, "[stability]\ncorner_window = 8").unwrap();

        let settings = Settings::new(Some(file.path())).unwrap();
        assert_eq!(settings.scan.step_count, 16);
        assert!(settings.scan.demo_mode);
        assert_eq!(settings.stability.corner_window, 8);
        // Untouched sections keep their defaults.
        assert_eq!(settings.rotator.steps_per_revolution, 3200);
    }
}
