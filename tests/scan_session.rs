//! End-to-end session scenarios against the mock instruments.

use opt_scan::config::Settings;
use opt_scan::controller::ScanController;
use opt_scan::error::ScanError;
use opt_scan::instrument::{MockDetector, MockRotator};
use opt_scan::monitor::Corner;
use opt_scan::scan::{ScanConfig, ScanEvent, ScanState};
use opt_scan::storage::FsStore;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.scan.step_count = 8;
    settings.scan.demo_mode = true;
    settings.scan.demo_frame_size = 24;
    settings.scan.keep_frames_in_memory = true;
    settings.stability.corner_window = 4;
    settings.detector.exposure_us = 200;
    settings.correction.averages = 3;
    settings
}

fn build_controller(settings: &Settings, root: &Path) -> ScanController {
    let detector = MockDetector::new(
        "mock_cam",
        settings.scan.demo_frame_size,
        settings.scan.demo_frame_size,
        settings.detector.exposure_us,
    );
    let rotator = MockRotator::new("mock_stage", settings.rotator.steps_per_revolution);
    ScanController::new(
        Box::new(detector),
        Box::new(rotator),
        Arc::new(FsStore::new(root)),
        settings.clone(),
    )
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

fn find_report(root: &Path) -> Option<std::path::PathBuf> {
    for entry in std::fs::read_dir(root).ok()?.flatten() {
        let candidate = entry.path().join("report.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[tokio::test]
async fn demo_session_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings();
    let mut controller = build_controller(&settings, dir.path());
    let mut events = controller.subscribe();

    controller
        .configure(ScanConfig::from_settings(&settings))
        .await
        .unwrap();
    let report = controller.run_session().await.unwrap();

    assert_eq!(report.summary.step_count, 8);
    assert_eq!(report.summary.steps_completed, 8);
    assert_eq!(report.summary.frames_captured, 8);
    assert!(!report.summary.interrupted);
    assert!(report.summary.demo_mode);

    // Stability: one entry per step, baseline ratios exactly 1.0.
    assert_eq!(report.stability.steps, (0..8).collect::<Vec<_>>());
    for corner in Corner::ALL {
        let series = report.stability.series(corner);
        assert_eq!(series.len(), 8);
        assert_eq!(series[0], 1.0);
    }

    // Timing: every pipeline stage got bracketed once per step.
    for category in ["motion", "capture", "stability", "reconstruction"] {
        let stats = &report.timing.categories[category];
        assert_eq!(stats.samples.len(), 8, "category {category}");
        assert_eq!(stats.unmatched_marks, 0, "category {category}");
    }
    // Saving was disabled, so no save category appears.
    assert!(!report.timing.categories.contains_key("save"));

    // Events: phantom progress, then per-step updates, then completion.
    let events = drain(&mut events);
    let progress = events
        .iter()
        .filter(|e| matches!(e, ScanEvent::PhantomProgress { .. }))
        .count();
    assert_eq!(progress, 8);
    let last_recon = events
        .iter()
        .rev()
        .find_map(|e| match e {
            ScanEvent::ReconstructionUpdated { image, .. } => Some(image.clone()),
            _ => None,
        })
        .expect("reconstruction updates were emitted");
    assert_eq!(last_recon.updates, 8);
    assert_eq!(last_recon.size, 24);
    assert!(events
        .iter()
        .any(|e| matches!(e, ScanEvent::SessionDone { .. })));

    // One structured report artifact per session.
    let report_path = find_report(dir.path()).expect("report.json persisted");
    let text = std::fs::read_to_string(report_path).unwrap();
    assert!(text.contains("\"stability\""));
    assert!(text.contains("\"timing\""));
}

#[tokio::test]
async fn start_while_running_fails_and_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings();
    let mut controller = build_controller(&settings, dir.path());
    controller
        .configure(ScanConfig::from_settings(&settings))
        .await
        .unwrap();

    let engine = controller.engine_mut();
    engine.start().await.unwrap();
    assert_eq!(engine.state(), ScanState::Running);
    assert_eq!(engine.current_step(), 0);

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, ScanError::AlreadyRunning));
    assert_eq!(engine.current_step(), 0);
    assert_eq!(engine.state(), ScanState::Running);

    // Configuration is also rejected while running.
    let err = controller
        .configure(ScanConfig::from_settings(&settings))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::AlreadyRunning));
}

#[tokio::test]
async fn interruption_stops_after_in_flight_step() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings();
    let detector = MockDetector::new("mock_cam", 24, 24, 200);
    let rotator = MockRotator::new("mock_stage", settings.rotator.steps_per_revolution);
    let moves = rotator.move_counter();
    let mut controller = ScanController::new(
        Box::new(detector),
        Box::new(rotator),
        Arc::new(FsStore::new(dir.path())),
        settings.clone(),
    );

    controller
        .configure(ScanConfig::from_settings(&settings))
        .await
        .unwrap();
    let engine = controller.engine_mut();
    engine.start().await.unwrap();
    assert_eq!(moves.load(Ordering::SeqCst), 1);

    // Step 0 completes normally and step 1's motion is issued.
    engine.on_motion_complete().await.unwrap();
    assert_eq!(moves.load(Ordering::SeqCst), 2);
    assert_eq!(engine.current_step(), 1);

    // Interruption honored after step 1's processing, before any further
    // motion command.
    engine.request_interruption();
    assert_eq!(engine.state(), ScanState::Stopping);
    engine.on_motion_complete().await.unwrap();

    assert_eq!(engine.state(), ScanState::Idle);
    assert_eq!(moves.load(Ordering::SeqCst), 2);

    let run = engine.take_last_run().expect("completed run available");
    assert!(run.summary.interrupted);
    assert_eq!(run.summary.steps_completed, 2);
    assert_eq!(run.summary.frames_captured, 2);
}

#[tokio::test]
async fn empty_frame_advances_step_without_processing() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings();
    settings.scan.demo_mode = false;

    // The detector yields nothing usable on its fourth capture (step 3).
    let detector = MockDetector::new("mock_cam", 24, 24, 200).with_empty_captures(&[3]);
    let rotator = MockRotator::new("mock_stage", settings.rotator.steps_per_revolution);
    let mut controller = ScanController::new(
        Box::new(detector),
        Box::new(rotator),
        Arc::new(FsStore::new(dir.path())),
        settings.clone(),
    );
    let mut events = controller.subscribe();

    controller
        .configure(ScanConfig::from_settings(&settings))
        .await
        .unwrap();
    let report = controller.run_session().await.unwrap();

    // The session still advances through all eight steps and finalizes.
    assert_eq!(report.summary.steps_completed, 8);
    assert!(!report.summary.interrupted);
    // Only seven frames contributed to the stack and the monitors.
    assert_eq!(report.summary.frames_captured, 7);
    assert_eq!(report.stability.steps, vec![0, 1, 2, 4, 5, 6, 7]);

    let events = drain(&mut events);
    let last_recon = events
        .iter()
        .rev()
        .find_map(|e| match e {
            ScanEvent::ReconstructionUpdated { image, .. } => Some(image.clone()),
            _ => None,
        })
        .expect("reconstruction ran for the usable frames");
    assert_eq!(last_recon.updates, 7);
    let frame_events = events
        .iter()
        .filter(|e| matches!(e, ScanEvent::FrameReady { .. }))
        .count();
    assert_eq!(frame_events, 7);
}

#[tokio::test]
async fn out_of_range_line_index_is_corrected_to_mid_line() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings();
    settings.reconstruction.line_index = 9999;
    let mut controller = build_controller(&settings, dir.path());
    let mut events = controller.subscribe();

    controller
        .configure(ScanConfig::from_settings(&settings))
        .await
        .unwrap();
    let report = controller.run_session().await.unwrap();
    assert_eq!(report.summary.frames_captured, 8);

    // Every step reconstructed: the index was corrected before the first
    // update rather than rejecting the configured value per step.
    let events = drain(&mut events);
    let last_recon = events
        .iter()
        .rev()
        .find_map(|e| match e {
            ScanEvent::ReconstructionUpdated { image, .. } => Some(image.clone()),
            _ => None,
        })
        .expect("reconstruction updates were emitted");
    assert_eq!(last_recon.updates, 8);
    assert_eq!(last_recon.size, settings.scan.demo_frame_size);
}

#[tokio::test]
async fn saved_frames_land_in_the_session_folder() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings();
    settings.scan.save_frames = true;
    let mut controller = build_controller(&settings, dir.path());

    controller
        .configure(ScanConfig::from_settings(&settings))
        .await
        .unwrap();
    let report = controller.run_session().await.unwrap();
    assert_eq!(report.summary.frames_captured, 8);
    assert_eq!(report.timing.categories["save"].samples.len(), 8);

    let session_dir = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .find(|p| p.is_dir())
        .expect("session folder created");
    for step in 0..8 {
        assert!(
            session_dir.join(format!("{:04}.pgm", step)).exists(),
            "frame {step} persisted"
        );
    }
    assert!(session_dir.join("report.json").exists());
}

#[tokio::test]
async fn correction_acquisition_persists_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings();
    let mut controller = build_controller(&settings, dir.path());
    let mut events = controller.subscribe();

    let stats = controller.acquire_hot_pixel_correction().await.unwrap();
    assert_eq!(stats.averages, 3);
    let outliers = stats.outliers.expect("hot-pixel stats carry an outlier split");
    assert!(outliers.sigma_cutoff > 0.0);
    assert!(stats.mean > 0.0);

    let dark = controller.acquire_dark_field_correction().await.unwrap();
    assert!(dark.outliers.is_none());

    assert!(dir.path().join("corrections/hot_pixel.pgm").exists());
    assert!(dir.path().join("corrections/dark_field.pgm").exists());

    let events = drain(&mut events);
    let reported = events
        .iter()
        .filter(|e| matches!(e, ScanEvent::CorrectionReady { .. }))
        .count();
    assert_eq!(reported, 2);
}

#[tokio::test]
async fn correction_is_rejected_while_scanning() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings();
    let mut controller = build_controller(&settings, dir.path());

    controller
        .configure(ScanConfig::from_settings(&settings))
        .await
        .unwrap();
    controller.start().await.unwrap();
    let err = controller.acquire_flat_field_correction().await.unwrap_err();
    assert!(matches!(err, ScanError::AlreadyRunning));
}
