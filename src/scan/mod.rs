//! Scan session model and orchestration.
//!
//! [`ScanConfig`] captures the validated parameters of one session;
//! [`engine::ScanEngine`] is the event-driven state machine that executes
//! it; [`phantom`] generates the deterministic synthetic projections used
//! in demo mode. Observers subscribe to [`ScanEvent`]s over a broadcast
//! channel rather than touching live session state.

pub mod engine;
pub mod phantom;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::Settings;
use crate::core::Frame;
use crate::correction::CorrectionStats;
use crate::error::{AppResult, ScanError};
use crate::monitor::StabilityTrace;
use crate::recon::{Interpolation, ReconImage};

pub use engine::{DetectorSource, FrameSource, ScanEngine, SinogramSource};

/// Lifecycle state of the scan orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    /// No session active.
    Idle,
    /// A session is running, awaiting motion completion for the current
    /// step.
    Running,
    /// Interruption requested; the session stops after the in-flight step.
    Stopping,
}

/// Validated parameters for one scan session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Number of angular positions per revolution.
    pub step_count: usize,
    /// Exposure duration hint in microseconds, used when the detector
    /// cannot report one.
    pub exposure_hint_us: u64,
    /// Use the synthetic projection source instead of the detector.
    pub demo_mode: bool,
    /// Update the reconstruction after every captured frame.
    pub live_reconstruction: bool,
    /// Persist each captured frame.
    pub save_frames: bool,
    /// Retain every frame in memory instead of only the most recent one.
    pub keep_frames_in_memory: bool,
    /// Frame row fed to the reconstruction. Out-of-range values (including
    /// negative ones) are corrected to the frame's mid-line at runtime.
    pub reconstruction_line_index: i64,
    /// Interpolation used by the reconstruction engine.
    pub interpolation: Interpolation,
    /// Side length of the stability monitor's corner windows.
    pub corner_window: usize,
    /// Side length of synthetic demo-mode frames, in pixels.
    pub demo_frame_size: usize,
    /// Operator confirmation that an uneven angular pitch is acceptable.
    pub accept_uneven_pitch: bool,
}

impl ScanConfig {
    /// Builds a config from application settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            step_count: settings.scan.step_count,
            exposure_hint_us: settings.detector.exposure_us,
            demo_mode: settings.scan.demo_mode,
            live_reconstruction: settings.scan.live_reconstruction,
            save_frames: settings.scan.save_frames,
            keep_frames_in_memory: settings.scan.keep_frames_in_memory,
            reconstruction_line_index: settings.reconstruction.line_index,
            interpolation: Interpolation::from_name(&settings.reconstruction.interpolation)
                .unwrap_or_default(),
            corner_window: settings.stability.corner_window,
            demo_frame_size: settings.scan.demo_frame_size,
            accept_uneven_pitch: false,
        }
    }

    /// Validates the config against the rotator's steps-per-revolution.
    ///
    /// An uneven pitch is rejected with [`ScanError::HardwareMismatch`]
    /// until the operator confirms it via `accept_uneven_pitch`.
    pub fn validate(&self, steps_per_revolution: u32) -> AppResult<()> {
        if self.step_count == 0 {
            return Err(ScanError::Configuration(
                "step count must be positive".to_string(),
            ));
        }
        if steps_per_revolution == 0 {
            return Err(ScanError::Configuration(
                "rotator reports zero steps per revolution".to_string(),
            ));
        }
        if steps_per_revolution as usize % self.step_count != 0 && !self.accept_uneven_pitch {
            return Err(ScanError::HardwareMismatch {
                step_count: self.step_count,
                steps_per_revolution,
            });
        }
        Ok(())
    }
}

/// Absolute rotator target positions for a session.
///
/// Length `step_count`, starting at 0, strictly increasing with constant
/// pitch `steps_per_revolution / step_count` (within integer rounding).
pub fn step_table(step_count: usize, steps_per_revolution: u32) -> Vec<u32> {
    let pitch = steps_per_revolution as f64 / step_count as f64;
    (0..step_count)
        .map(|i| (i as f64 * pitch).round() as u32)
        .collect()
}

/// End-of-session summary handed to observers and the session report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Unique session identifier.
    pub id: Uuid,
    /// Configured number of steps.
    pub step_count: usize,
    /// Steps advanced through (equals `step_count` for a full run).
    pub steps_completed: usize,
    /// Frames that produced usable data.
    pub frames_captured: usize,
    /// Whether the session ended on an interruption request.
    pub interrupted: bool,
    /// Whether the session used the synthetic projection source.
    pub demo_mode: bool,
    /// Session start time.
    pub started: DateTime<Utc>,
    /// Session end time.
    pub finished: DateTime<Utc>,
}

/// Events emitted to observers over the broadcast bus.
///
/// Every payload is an owned snapshot (`Arc`-shared where large), so a
/// consumer never reads live session state mid-update.
#[derive(Clone, Debug)]
pub enum ScanEvent {
    /// A named frame became available.
    FrameReady {
        /// Display label (e.g. "projection", "hot_pixel").
        label: String,
        /// The frame.
        frame: Arc<Frame>,
        /// Originating step.
        step: usize,
    },
    /// The stability trace gained an entry.
    StabilityUpdated {
        /// Snapshot of the full trace.
        trace: Arc<StabilityTrace>,
    },
    /// The reconstruction accumulator was updated.
    ReconstructionUpdated {
        /// Snapshot of the accumulator.
        image: Arc<ReconImage>,
        /// Step whose projection was folded in.
        step: usize,
    },
    /// Progress of the demo-mode synthetic precomputation.
    PhantomProgress {
        /// Projections synthesized so far.
        done: usize,
        /// Total projections to synthesize.
        total: usize,
    },
    /// A correction acquisition finished.
    CorrectionReady {
        /// Statistics of the averaged correction frame.
        stats: CorrectionStats,
    },
    /// The session finalized.
    SessionDone {
        /// End-of-session summary.
        summary: SessionSummary,
    },
}

/// Creates the observer event bus.
pub fn event_channel(capacity: usize) -> (broadcast::Sender<ScanEvent>, broadcast::Receiver<ScanEvent>) {
    broadcast::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_table_scenario() {
        // stepCount=8, stepsPerRevolution=3200
        assert_eq!(
            step_table(8, 3200),
            vec![0, 400, 800, 1200, 1600, 2000, 2400, 2800]
        );
    }

    #[test]
    fn test_step_table_properties() {
        for (count, rev) in [(3, 100u32), (7, 3200), (400, 3200), (16, 1000)] {
            let steps = step_table(count, rev);
            assert_eq!(steps.len(), count);
            assert_eq!(steps[0], 0);
            for pair in steps.windows(2) {
                assert!(pair[1] > pair[0], "steps must be strictly increasing");
            }
            let pitch = rev as f64 / count as f64;
            for (i, &s) in steps.iter().enumerate() {
                assert!((s as f64 - i as f64 * pitch).abs() <= 0.5);
            }
        }
    }

    #[test]
    fn test_validate_rejects_zero_steps() {
        let mut config = ScanConfig::from_settings(&Settings::default());
        config.step_count = 0;
        assert!(matches!(
            config.validate(3200),
            Err(ScanError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_uneven_pitch_needs_confirmation() {
        let mut config = ScanConfig::from_settings(&Settings::default());
        config.step_count = 7;
        assert!(matches!(
            config.validate(3200),
            Err(ScanError::HardwareMismatch { .. })
        ));
        config.accept_uneven_pitch = true;
        assert!(config.validate(3200).is_ok());
    }
}
