//! The event-driven scan orchestrator.
//!
//! [`ScanEngine`] drives one complete OPT session as a state machine. It
//! never polls the hardware: after issuing a motion command it performs no
//! work for the session until the rotator's completion notification is
//! delivered into [`ScanEngine::on_motion_complete`], the sole re-entry
//! point. Processing after motion completion — capture, stability update,
//! reconstruction update, persistence, advancement — is synchronous and
//! not interruptible mid-step.
//!
//! Because step `i + 1`'s motion command is only issued once step `i`'s
//! processing has fully completed, the hardware is never driven faster
//! than the reconstruction and I/O pipeline can consume.
//!
//! Cancellation is cooperative: [`ScanEngine::request_interruption`] sets a
//! flag that is consulted exactly once per step, after processing and
//! before the next motion command, so the rotator is always left at a
//! position it actually reached.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Duration;
use uuid::Uuid;

use crate::core::{Detector, Frame, FrameOrigin, Rotator};
use crate::error::{AppResult, ScanError};
use crate::monitor::{
    timing::TimingReport, MarkKind, StabilityMonitor, StabilityTrace, TimingMonitor,
};
use crate::recon::{ReconImage, ReconstructionEngine};
use crate::scan::phantom::SyntheticProjections;
use crate::scan::{step_table, ScanConfig, ScanEvent, ScanState, SessionSummary};
use crate::storage::{frame_filename, session_folder_name, ScanStore};

/// Timing categories bracketing the per-step pipeline.
const CAT_MOTION: &str = "motion";
const CAT_CAPTURE: &str = "capture";
const CAT_STABILITY: &str = "stability";
const CAT_RECONSTRUCTION: &str = "reconstruction";
const CAT_SAVE: &str = "save";

/// Shared handle to the detector collaborator.
pub type SharedDetector = Arc<Mutex<Box<dyn Detector>>>;
/// Shared handle to the rotator collaborator.
pub type SharedRotator = Arc<Mutex<Box<dyn Rotator>>>;

// =============================================================================
// Frame sources
// =============================================================================

/// Where each step's frame comes from; chosen once at `start()`.
#[async_trait]
pub trait FrameSource: Send {
    /// Produces the frame for `step`.
    async fn capture(&mut self, step: usize) -> AppResult<Frame>;
}

/// Hardware frame source: reads the detector's most recent frame.
pub struct DetectorSource {
    detector: SharedDetector,
    exposure: Duration,
}

impl DetectorSource {
    /// Creates a source reading from `detector`, settling for
    /// `exposure_us` before each read.
    pub fn new(detector: SharedDetector, exposure_us: u64) -> Self {
        Self {
            detector,
            exposure: Duration::from_micros(exposure_us.max(1)),
        }
    }
}

#[async_trait]
impl FrameSource for DetectorSource {
    async fn capture(&mut self, step: usize) -> AppResult<Frame> {
        // Let the sensor integrate a fresh exposure at the new position;
        // reading immediately would return the previous position's frame.
        tokio::time::sleep(self.exposure).await;
        let mut frame = self.detector.lock().await.latest_frame().await?;
        frame.step = step;
        frame.origin = FrameOrigin::Hardware;
        Ok(frame)
    }
}

/// Demo frame source: replays the precomputed synthetic projections.
pub struct SinogramSource {
    projections: SyntheticProjections,
}

impl SinogramSource {
    /// Wraps a precomputed projection stack.
    pub fn new(projections: SyntheticProjections) -> Self {
        Self { projections }
    }
}

#[async_trait]
impl FrameSource for SinogramSource {
    async fn capture(&mut self, step: usize) -> AppResult<Frame> {
        let mut frame = self
            .projections
            .frame(step)
            .cloned()
            .ok_or_else(|| {
                ScanError::Processing(format!(
                    "no synthetic projection for step {} ({} available)",
                    step,
                    self.projections.len()
                ))
            })?;
        frame.timestamp = Utc::now();
        Ok(frame)
    }
}

// =============================================================================
// Session state
// =============================================================================

/// Mutable state of the one active session.
struct ActiveSession {
    id: Uuid,
    started: DateTime<Utc>,
    config: ScanConfig,
    steps: Vec<u32>,
    current_step: usize,
    frames_captured: usize,
    source: Box<dyn FrameSource>,
    frames: Vec<Arc<Frame>>,
    stability: StabilityMonitor,
    recon: Option<ReconstructionEngine>,
    line_index: Option<usize>,
    save_dir: Option<PathBuf>,
}

/// Everything a finished session leaves behind for reporting.
pub struct CompletedRun {
    /// End-of-session summary.
    pub summary: SessionSummary,
    /// Full stability trace.
    pub stability: StabilityTrace,
    /// Finalized timing report.
    pub timing: TimingReport,
    /// Frames retained per the session's memory mode.
    pub frames: Vec<Arc<Frame>>,
    /// Final reconstruction, when live reconstruction was enabled.
    pub reconstruction: Option<ReconImage>,
    /// Session folder (relative to the store root) when saving was on.
    pub save_dir: Option<PathBuf>,
}

// =============================================================================
// Engine
// =============================================================================

/// Event-driven orchestrator for one OPT session at a time.
pub struct ScanEngine {
    detector: SharedDetector,
    rotator: SharedRotator,
    store: Arc<dyn ScanStore>,
    events: broadcast::Sender<ScanEvent>,
    config: Option<ScanConfig>,
    state: ScanState,
    session: Option<ActiveSession>,
    timing: TimingMonitor,
    last_run: Option<CompletedRun>,
}

impl ScanEngine {
    /// Creates an idle engine wired to its collaborators.
    pub fn new(
        detector: SharedDetector,
        rotator: SharedRotator,
        store: Arc<dyn ScanStore>,
        events: broadcast::Sender<ScanEvent>,
    ) -> Self {
        Self {
            detector,
            rotator,
            store,
            events,
            config: None,
            state: ScanState::Idle,
            session: None,
            timing: TimingMonitor::new(),
            last_run: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// True while a session is active (including while stopping).
    pub fn is_running(&self) -> bool {
        self.state != ScanState::Idle
    }

    /// Index of the step currently awaiting motion completion (0 when
    /// idle).
    pub fn current_step(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.current_step)
    }

    /// The stored configuration, if any.
    pub fn config(&self) -> Option<&ScanConfig> {
        self.config.as_ref()
    }

    /// Subscribes to the observer event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Takes the artifacts of the most recently finished session.
    pub fn take_last_run(&mut self) -> Option<CompletedRun> {
        self.last_run.take()
    }

    /// Validates and stores session parameters.
    ///
    /// Fails with `Configuration` for an invalid step count, with
    /// `HardwareMismatch` for an unconfirmed uneven pitch, and with
    /// `AlreadyRunning` while a session is active.
    pub async fn configure(&mut self, config: ScanConfig) -> AppResult<()> {
        if self.state != ScanState::Idle {
            return Err(ScanError::AlreadyRunning);
        }
        let steps_per_revolution = self.rotator.lock().await.steps_per_revolution();
        config.validate(steps_per_revolution)?;
        info!(
            "Configured scan: {} steps over {} rotator steps/revolution{}{}",
            config.step_count,
            steps_per_revolution,
            if config.demo_mode { ", demo mode" } else { "" },
            if config.live_reconstruction {
                ", live reconstruction"
            } else {
                ""
            },
        );
        self.config = Some(config);
        Ok(())
    }

    /// Starts the configured session and issues the first motion command.
    ///
    /// Fails with `AlreadyRunning` while a session is active, leaving the
    /// running session untouched.
    pub async fn start(&mut self) -> AppResult<()> {
        if self.state != ScanState::Idle {
            return Err(ScanError::AlreadyRunning);
        }
        let config = self
            .config
            .clone()
            .ok_or_else(|| ScanError::Configuration("session not configured".to_string()))?;
        let steps = {
            let rotator = self.rotator.lock().await;
            step_table(config.step_count, rotator.steps_per_revolution())
        };
        let first_target = steps[0];

        let source: Box<dyn FrameSource> = if config.demo_mode {
            info!(
                "Synthesizing {} demo projections of {}x{} pixels",
                config.step_count, config.demo_frame_size, config.demo_frame_size
            );
            let events = self.events.clone();
            let projections = SyntheticProjections::generate(
                config.step_count,
                config.demo_frame_size,
                |done, total| {
                    // Ignore errors if no observers are subscribed.
                    let _ = events.send(ScanEvent::PhantomProgress { done, total });
                },
            );
            Box::new(SinogramSource::new(projections))
        } else {
            let mut detector = self.detector.lock().await;
            detector.start_acquisition().await?;
            let exposure_us = match detector.exposure_us() {
                0 => config.exposure_hint_us,
                reported => reported,
            };
            Box::new(DetectorSource::new(self.detector.clone(), exposure_us))
        };

        let save_dir = if config.save_frames {
            let dir = PathBuf::from(session_folder_name());
            match self.store.ensure_dir(&dir).await {
                Ok(()) => Some(dir),
                Err(e) => {
                    warn!("Could not create session directory: {e}; frame saving disabled");
                    None
                }
            }
        } else {
            None
        };

        let recon = if config.live_reconstruction {
            Some(ReconstructionEngine::new(
                config.step_count,
                config.interpolation,
            )?)
        } else {
            None
        };

        self.timing.start();
        let session = ActiveSession {
            id: Uuid::new_v4(),
            started: Utc::now(),
            stability: StabilityMonitor::new(config.corner_window),
            recon,
            line_index: None,
            source,
            frames: Vec::new(),
            save_dir,
            current_step: 0,
            frames_captured: 0,
            steps,
            config,
        };
        info!("Session {} started", session.id);
        self.session = Some(session);
        self.state = ScanState::Running;

        self.timing.mark(CAT_MOTION, 0, MarkKind::Begin);
        let first_move = self.rotator.lock().await.move_absolute(first_target).await;
        if let Err(e) = first_move {
            error!("First motion command failed: {e}");
            if let Some(session) = self.session.take() {
                self.finalize(session, true).await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Requests a cooperative stop.
    ///
    /// The flag is consulted once per step, after the in-flight step's
    /// processing completes and before the next motion command would be
    /// issued.
    pub fn request_interruption(&mut self) {
        if self.state == ScanState::Running {
            info!("Interruption requested; stopping after the in-flight step");
            self.state = ScanState::Stopping;
        }
    }

    /// The sole re-entry point from the rotator collaborator.
    ///
    /// No-ops when no session is active. Otherwise captures and processes
    /// one frame, then advances to the next step or finalizes the session.
    pub async fn on_motion_complete(&mut self) -> AppResult<()> {
        if self.state == ScanState::Idle {
            return Ok(());
        }
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        let step = session.current_step;
        self.timing.mark(CAT_MOTION, step, MarkKind::End);

        self.timing.mark(CAT_CAPTURE, step, MarkKind::Begin);
        let captured = session.source.capture(step).await;
        self.timing.mark(CAT_CAPTURE, step, MarkKind::End);

        match captured {
            Ok(frame) if !frame.is_empty() => {
                self.process_frame(&mut session, frame, step).await;
            }
            Ok(_) => {
                // Known acquisition-layer behavior: the step still advances.
                warn!("Step {step} produced no usable frame; advancing without it");
            }
            Err(e) => {
                warn!("Frame capture failed at step {step}: {e}; advancing without it");
            }
        }

        session.current_step += 1;

        if self.state == ScanState::Stopping {
            let interrupted = session.current_step < session.config.step_count;
            info!("Session stopping after step {step}");
            self.finalize(session, interrupted).await;
            return Ok(());
        }

        if session.current_step < session.config.step_count {
            let next = session.current_step;
            let target = session.steps[next];
            self.timing.mark(CAT_MOTION, next, MarkKind::Begin);
            let moved = self.rotator.lock().await.move_absolute(target).await;
            match moved {
                Ok(()) => {
                    self.session = Some(session);
                    Ok(())
                }
                Err(e) => {
                    error!("Motion command for step {next} failed: {e}; finalizing session");
                    self.finalize(session, true).await;
                    Err(e)
                }
            }
        } else {
            self.finalize(session, false).await;
            Ok(())
        }
    }

    /// Runs the per-frame pipeline: retention, stability, reconstruction,
    /// persistence. Failures degrade gracefully; none aborts the session.
    async fn process_frame(&mut self, session: &mut ActiveSession, frame: Frame, step: usize) {
        let frame = Arc::new(frame);
        if !session.config.keep_frames_in_memory {
            session.frames.clear();
        }
        session.frames.push(frame.clone());
        session.frames_captured += 1;
        let _ = self.events.send(ScanEvent::FrameReady {
            label: "projection".to_string(),
            frame: frame.clone(),
            step,
        });

        self.timing.mark(CAT_STABILITY, step, MarkKind::Begin);
        match session.stability.update(&frame) {
            Ok(_) => {
                let _ = self.events.send(ScanEvent::StabilityUpdated {
                    trace: Arc::new(session.stability.snapshot()),
                });
            }
            Err(e) => warn!("Stability update failed at step {step}: {e}"),
        }
        self.timing.mark(CAT_STABILITY, step, MarkKind::End);

        if let Some(recon) = session.recon.as_mut() {
            let requested = session.config.reconstruction_line_index;
            let line_index = *session
                .line_index
                .get_or_insert_with(|| resolve_line_index(requested, frame.height));
            self.timing.mark(CAT_RECONSTRUCTION, step, MarkKind::Begin);
            match frame.line(line_index) {
                Some(line) => match recon.update(&line, step) {
                    Ok(()) => {
                        let _ = self.events.send(ScanEvent::ReconstructionUpdated {
                            image: Arc::new(recon.snapshot()),
                            step,
                        });
                    }
                    Err(e) => warn!("Reconstruction update failed at step {step}: {e}"),
                },
                None => warn!("Reconstruction line {line_index} missing in frame at step {step}"),
            }
            self.timing.mark(CAT_RECONSTRUCTION, step, MarkKind::End);
        }

        if let Some(dir) = session.save_dir.clone() {
            self.timing.mark(CAT_SAVE, step, MarkKind::Begin);
            let path = dir.join(frame_filename(step));
            if let Err(e) = self.store.write_image(&frame, &path).await {
                warn!(
                    "Failed to persist frame {step} to '{}': {e}; session continues",
                    path.display()
                );
            }
            self.timing.mark(CAT_SAVE, step, MarkKind::End);
        }
    }

    /// Stops acquisition, finalizes the timing report, and returns the
    /// engine to `Idle`.
    async fn finalize(&mut self, session: ActiveSession, interrupted: bool) {
        if !session.config.demo_mode {
            if let Err(e) = self.detector.lock().await.stop_acquisition().await {
                warn!("Failed to stop detector acquisition: {e}");
            }
        }
        self.timing.finish();
        let timing = self.timing.build_report();

        let summary = SessionSummary {
            id: session.id,
            step_count: session.config.step_count,
            steps_completed: session.current_step,
            frames_captured: session.frames_captured,
            interrupted,
            demo_mode: session.config.demo_mode,
            started: session.started,
            finished: Utc::now(),
        };
        info!(
            "Session {} finished: {}/{} steps, {} frames{}",
            summary.id,
            summary.steps_completed,
            summary.step_count,
            summary.frames_captured,
            if interrupted { " (interrupted)" } else { "" },
        );
        let _ = self.events.send(ScanEvent::SessionDone {
            summary: summary.clone(),
        });

        self.last_run = Some(CompletedRun {
            summary,
            stability: session.stability.snapshot(),
            timing,
            frames: session.frames,
            reconstruction: session.recon.as_ref().map(|r| r.snapshot()),
            save_dir: session.save_dir,
        });
        self.state = ScanState::Idle;
    }
}

/// Clamps a requested reconstruction line index to the frame, correcting
/// out-of-range values to the mid-line.
fn resolve_line_index(requested: i64, height: usize) -> usize {
    if requested >= 0 && (requested as usize) < height {
        requested as usize
    } else {
        let corrected = height / 2;
        warn!(
            "Reconstruction line index {requested} out of range for frame height {height}; corrected to {corrected}"
        );
        corrected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_line_index_in_range() {
        assert_eq!(resolve_line_index(0, 100), 0);
        assert_eq!(resolve_line_index(99, 100), 99);
    }

    #[test]
    fn test_resolve_line_index_corrects_to_mid_line() {
        assert_eq!(resolve_line_index(-1, 100), 50);
        assert_eq!(resolve_line_index(100, 100), 50);
        assert_eq!(resolve_line_index(7, 5), 2);
    }
}
