//! Demo runner for the OPT scanner core.
//!
//! Runs a complete demo-mode session against the mock detector and rotator,
//! streaming progress to the log and writing frames and the session report
//! under the output directory.

use anyhow::Context;
use clap::Parser;
use opt_scan::config::Settings;
use opt_scan::controller::ScanController;
use opt_scan::instrument::{MockDetector, MockRotator};
use opt_scan::scan::{ScanConfig, ScanEvent};
use opt_scan::storage::FsStore;
use std::path::PathBuf;
use std::sync::Arc;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "opt_scan", about = "OPT scanner demo session runner")]
struct Args {
    /// Path to a TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of angular positions.
    #[arg(long)]
    steps: Option<usize>,

    /// Side length of synthetic frames, in pixels.
    #[arg(long)]
    size: Option<usize>,

    /// Output directory for frames and the session report.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Persist every captured frame.
    #[arg(long)]
    save_frames: bool,

    /// Keep every frame in memory instead of only the most recent one.
    #[arg(long)]
    keep_frames: bool,

    /// Disable the live reconstruction.
    #[arg(long)]
    no_reconstruction: bool,

    /// Sample name recorded in the session metadata.
    #[arg(long, default_value = "demo sample")]
    sample: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut settings =
        Settings::new(args.config.as_deref()).context("failed to load settings")?;
    settings.scan.demo_mode = true;
    if let Some(steps) = args.steps {
        settings.scan.step_count = steps;
    }
    if let Some(size) = args.size {
        settings.scan.demo_frame_size = size;
    }
    if let Some(output) = &args.output {
        settings.storage.root = output.display().to_string();
    }
    settings.scan.save_frames |= args.save_frames;
    settings.scan.keep_frames_in_memory |= args.keep_frames;
    settings.scan.live_reconstruction &= !args.no_reconstruction;

    let detector = MockDetector::new(
        "mock_detector",
        settings.scan.demo_frame_size,
        settings.scan.demo_frame_size,
        settings.detector.exposure_us,
    );
    let rotator = MockRotator::new("mock_rotator", settings.rotator.steps_per_revolution);
    let store = Arc::new(FsStore::new(&settings.storage.root));

    let mut controller = ScanController::new(
        Box::new(detector),
        Box::new(rotator),
        store,
        settings.clone(),
    );
    controller.set_sample_name(&args.sample);

    // Narrate progress while the session runs.
    let mut events = controller.subscribe();
    let narrator = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ScanEvent::PhantomProgress { done, total } if done == total => {
                    println!("Synthesized {total} projections");
                }
                ScanEvent::ReconstructionUpdated { image, step } => {
                    if (step + 1) % 50 == 0 {
                        println!(
                            "Step {}: reconstruction updated ({} projections in)",
                            step + 1,
                            image.updates
                        );
                    }
                }
                ScanEvent::SessionDone { summary } => {
                    println!(
                        "Session {} done: {}/{} steps, {} frames",
                        summary.id,
                        summary.steps_completed,
                        summary.step_count,
                        summary.frames_captured
                    );
                    break;
                }
                _ => {}
            }
        }
    });

    controller
        .configure(ScanConfig::from_settings(&settings))
        .await
        .context("scan configuration rejected")?;
    let report = controller
        .run_session()
        .await
        .context("scan session failed")?;
    let _ = narrator.await;

    println!("\nTiming by category:");
    println!(
        "{:<16} {:>8} {:>10} {:>10} {:>10} {:>7}",
        "category", "samples", "total s", "mean s", "std s", "% run"
    );
    for (name, stats) in &report.timing.categories {
        println!(
            "{:<16} {:>8} {:>10.4} {:>10.4} {:>10.4} {:>7.2}",
            name,
            stats.samples.len(),
            stats.total_s,
            stats.mean_s,
            stats.std_dev_s,
            stats.percent_of_run
        );
    }

    Ok(())
}
