//! Reconstruction correctness through the full session pipeline.
//!
//! The demo session reconstructs incrementally, one projection per motion
//! notification. Feeding the identical synthetic sinogram to a standalone
//! engine in one batch must produce the same image, and the image must
//! resemble the sample: dense where the phantom's central body sits, empty
//! outside it.

use opt_scan::config::Settings;
use opt_scan::controller::ScanController;
use opt_scan::instrument::{MockDetector, MockRotator};
use opt_scan::recon::{Interpolation, ReconImage, ReconstructionEngine};
use opt_scan::scan::phantom::SyntheticProjections;
use opt_scan::scan::{ScanConfig, ScanEvent};
use opt_scan::storage::FsStore;
use std::sync::Arc;

const STEPS: usize = 32;
const SIZE: usize = 32;

fn demo_settings() -> Settings {
    let mut settings = Settings::default();
    settings.scan.step_count = STEPS;
    settings.scan.demo_mode = true;
    settings.scan.demo_frame_size = SIZE;
    settings.stability.corner_window = 4;
    settings
}

async fn run_demo_session() -> ReconImage {
    let dir = tempfile::tempdir().unwrap();
    let settings = demo_settings();
    let detector = MockDetector::new("mock_cam", SIZE, SIZE, 200);
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
    controller.run_session().await.unwrap();

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        if let ScanEvent::ReconstructionUpdated { image, .. } = event {
            last = Some(image);
        }
    }
    let image = last.expect("session emitted reconstruction updates");
    Arc::try_unwrap(image).unwrap_or_else(|arc| (*arc).clone())
}

/// Batch reference: the same deterministic sinogram, reconstructed outside
/// the session machinery.
fn batch_reference() -> ReconImage {
    let projections = SyntheticProjections::generate(STEPS, SIZE, |_, _| {});
    let mut engine = ReconstructionEngine::new(STEPS, Interpolation::Linear).unwrap();
    for step in 0..STEPS {
        let frame = projections.frame(step).expect("projection in range");
        let line = frame.line(SIZE / 2).expect("mid-line in range");
        engine.update(&line, step).unwrap();
    }
    engine.snapshot()
}

#[tokio::test]
async fn incremental_session_matches_batch_reconstruction() {
    let session_image = run_demo_session().await;
    let batch_image = batch_reference();

    assert_eq!(session_image.size, SIZE);
    assert_eq!(session_image.updates, STEPS);
    assert_eq!(batch_image.updates, STEPS);
    for (a, b) in session_image
        .pixels
        .iter()
        .zip(batch_image.pixels.iter())
    {
        assert!((a - b).abs() < 1e-9, "session {a} vs batch {b}");
    }
}

#[tokio::test]
async fn reconstruction_recovers_the_phantom_silhouette() {
    let image = run_demo_session().await;

    // The phantom's dominant body covers the volume center; the slice
    // corners lie outside every sphere.
    let center = image.pixels[(SIZE / 2) * SIZE + SIZE / 2];
    let corner = image.pixels[0]
        .abs()
        .max(image.pixels[SIZE - 1].abs())
        .max(image.pixels[(SIZE - 1) * SIZE].abs())
        .max(image.pixels[SIZE * SIZE - 1].abs());

    assert!(
        center > 0.5,
        "center density {center} should reflect the phantom body"
    );
    assert!(
        corner < 0.5 * center,
        "corner residual {corner} should be small relative to center {center}"
    );
}
