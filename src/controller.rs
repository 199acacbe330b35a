//! The session controller: the boundary component of the scanner core.
//!
//! `ScanController` owns the scan engine and its collaborators, exposes
//! start/stop and the correction-acquisition operations to the (excluded)
//! UI layer, and drives the motion-event loop that delivers rotator
//! notifications into the engine. On session completion it gathers hardware
//! metadata, the stability trace, and the timing report into one
//! [`SessionReport`] and persists it as a single artifact per session.

use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::config::Settings;
use crate::core::{Detector, Rotator};
use crate::correction::{acquire_correction, CorrectionKind, CorrectionStats};
use crate::error::{AppResult, ScanError};
use crate::metadata::{SessionMetadata, SessionMetadataBuilder};
use crate::monitor::{timing::TimingReport, StabilityTrace};
use crate::scan::engine::{CompletedRun, ScanEngine, SharedDetector, SharedRotator};
use crate::scan::{event_channel, ScanConfig, ScanEvent, ScanState, SessionSummary};
use crate::storage::{session_folder_name, ScanStore};

/// The single structured artifact persisted at the end of a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionReport {
    /// Hardware/software context.
    pub metadata: SessionMetadata,
    /// End-of-session summary.
    pub summary: SessionSummary,
    /// Illumination stability trace.
    pub stability: StabilityTrace,
    /// Per-category timing statistics.
    pub timing: TimingReport,
}

/// External-facing controller for one scanner.
pub struct ScanController {
    engine: ScanEngine,
    detector: SharedDetector,
    rotator: SharedRotator,
    store: Arc<dyn ScanStore>,
    events: broadcast::Sender<ScanEvent>,
    settings: Settings,
    sample_name: String,
}

impl ScanController {
    /// Wires a controller to its collaborators.
    pub fn new(
        detector: Box<dyn Detector>,
        rotator: Box<dyn Rotator>,
        store: Arc<dyn ScanStore>,
        settings: Settings,
    ) -> Self {
        let (events, _) = event_channel(256);
        let detector: SharedDetector = Arc::new(Mutex::new(detector));
        let rotator: SharedRotator = Arc::new(Mutex::new(rotator));
        let engine = ScanEngine::new(
            detector.clone(),
            rotator.clone(),
            store.clone(),
            events.clone(),
        );
        Self {
            engine,
            detector,
            rotator,
            store,
            events,
            settings,
            sample_name: "unnamed sample".to_string(),
        }
    }

    /// Sets the sample name recorded in session metadata.
    pub fn set_sample_name(&mut self, name: &str) {
        self.sample_name = name.to_string();
    }

    /// Subscribes to the observer event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Current engine state.
    pub fn state(&self) -> ScanState {
        self.engine.state()
    }

    /// True while a session is active.
    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Direct access to the engine, for callers that deliver motion
    /// notifications themselves.
    pub fn engine_mut(&mut self) -> &mut ScanEngine {
        &mut self.engine
    }

    /// Validates and stores session parameters.
    pub async fn configure(&mut self, config: ScanConfig) -> AppResult<()> {
        self.engine.configure(config).await
    }

    /// Starts the configured session.
    pub async fn start(&mut self) -> AppResult<()> {
        self.engine.start().await
    }

    /// Requests a cooperative stop after the in-flight step.
    pub fn stop(&mut self) {
        self.engine.request_interruption();
    }

    /// Delivers one motion-complete notification into the engine.
    pub async fn on_motion_complete(&mut self) -> AppResult<()> {
        self.engine.on_motion_complete().await
    }

    /// Runs a configured session to completion.
    ///
    /// Subscribes to the rotator's motion notifications, starts the
    /// session, delivers each notification into the engine, and finalizes
    /// the report once the engine returns to idle.
    pub async fn run_session(&mut self) -> AppResult<SessionReport> {
        let mut motion = self.rotator.lock().await.motion_events();
        self.engine.start().await?;
        while self.engine.is_running() {
            match motion.recv().await {
                Ok(_) => self.engine.on_motion_complete().await?,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {missed} motion notifications; continuing");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ScanError::Instrument(
                        "rotator motion channel closed mid-session".to_string(),
                    ));
                }
            }
        }
        self.finish_session().await
    }

    /// Aggregates and persists the end-of-run report for the most recent
    /// session.
    pub async fn finish_session(&mut self) -> AppResult<SessionReport> {
        let run: CompletedRun = self.engine.take_last_run().ok_or_else(|| {
            ScanError::Processing("no completed session to report".to_string())
        })?;
        let metadata = self.hardware_metadata(&run).await;
        let report = SessionReport {
            metadata,
            summary: run.summary,
            stability: run.stability,
            timing: run.timing,
        };

        let session_dir = run
            .save_dir
            .unwrap_or_else(|| PathBuf::from(session_folder_name()));
        let path = session_dir.join("report.json");
        match serde_json::to_value(&report) {
            Ok(value) => {
                if let Err(e) = self.store.write_report(&value, &path).await {
                    warn!(
                        "Failed to persist session report to '{}': {e}",
                        path.display()
                    );
                }
            }
            Err(e) => warn!("Failed to serialize session report: {e}"),
        }
        Ok(report)
    }

    async fn hardware_metadata(&self, run: &CompletedRun) -> SessionMetadata {
        let detector = self.detector.lock().await;
        let rotator = self.rotator.lock().await;
        SessionMetadataBuilder::new()
            .sample_name(&self.sample_name)
            .description("OPT scan session")
            .instrument_config("detector", detector.id())
            .instrument_config("exposure_us", &detector.exposure_us().to_string())
            .instrument_config("rotator", rotator.id())
            .instrument_config(
                "steps_per_revolution",
                &rotator.steps_per_revolution().to_string(),
            )
            .parameter("step_count", serde_json::json!(run.summary.step_count))
            .parameter("demo_mode", serde_json::json!(run.summary.demo_mode))
            .build()
    }

    /// Acquires and persists a hot-pixel correction frame.
    pub async fn acquire_hot_pixel_correction(&mut self) -> AppResult<CorrectionStats> {
        self.acquire(CorrectionKind::HotPixel).await
    }

    /// Acquires and persists a dark-field correction frame.
    pub async fn acquire_dark_field_correction(&mut self) -> AppResult<CorrectionStats> {
        self.acquire(CorrectionKind::DarkField).await
    }

    /// Acquires and persists a flat-field correction frame.
    pub async fn acquire_flat_field_correction(&mut self) -> AppResult<CorrectionStats> {
        self.acquire(CorrectionKind::FlatField).await
    }

    async fn acquire(&mut self, kind: CorrectionKind) -> AppResult<CorrectionStats> {
        // Correction frames drive the same detector as a scan; never both.
        if self.engine.is_running() {
            return Err(ScanError::AlreadyRunning);
        }
        let correction = {
            let mut detector = self.detector.lock().await;
            acquire_correction(
                detector.as_mut(),
                kind,
                self.settings.correction.averages,
                self.settings.correction.sigma_cutoff,
            )
            .await?
        };

        let path = PathBuf::from("corrections").join(format!("{}.pgm", kind.label()));
        if let Err(e) = self.store.write_image(&correction.frame, &path).await {
            warn!(
                "Failed to persist {} correction to '{}': {e}",
                kind.label(),
                path.display()
            );
        }
        let _ = self.events.send(ScanEvent::CorrectionReady {
            stats: correction.stats.clone(),
        });
        Ok(correction.stats)
    }
}
