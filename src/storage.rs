//! Frame and report persistence.
//!
//! The core constructs destination paths relative to a session folder
//! (`<timestamp>/<zero-padded step>.pgm` for frames, `<timestamp>/report.json`
//! for the end-of-run report) and hands them to a [`ScanStore`]. The
//! filesystem implementation keeps the on-disk contract minimal: 16-bit
//! binary PGM for images, pretty-printed JSON for reports.

use async_trait::async_trait;
use chrono::Utc;
use log::info;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::{Frame, PixelBuffer};
use crate::error::AppResult;

/// File name of a per-step frame inside the session folder.
pub fn frame_filename(step: usize) -> String {
    format!("{:04}.pgm", step)
}

/// Session folder name derived from the current time.
pub fn session_folder_name() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Persistence collaborator consumed by the scan core.
///
/// Paths are interpreted relative to the store's root. Implementations must
/// be cheap to share across the engine and the session controller.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Creates `path` (and parents) if missing.
    async fn ensure_dir(&self, path: &Path) -> AppResult<()>;

    /// Writes one frame as an image.
    async fn write_image(&self, frame: &Frame, path: &Path) -> AppResult<()>;

    /// Writes the structured end-of-run report.
    async fn write_report(&self, report: &serde_json::Value, path: &Path) -> AppResult<()>;
}

/// Filesystem-backed store.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    fn encode_pgm(frame: &Frame) -> Vec<u8> {
        let mut out = Vec::with_capacity(17 + frame.width * frame.height * 2);
        out.extend_from_slice(format!("P5\n{} {}\n65535\n", frame.width, frame.height).as_bytes());
        match &frame.pixels {
            PixelBuffer::U16(data) => {
                for &v in data {
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            PixelBuffer::F64(data) => {
                // Computed frames carry arbitrary float ranges; scale the
                // positive range onto the full 16-bit depth.
                let max = data.iter().copied().fold(0.0f64, f64::max);
                let scale = if max > 0.0 { 65535.0 / max } else { 0.0 };
                for &v in data {
                    let scaled = (v.max(0.0) * scale).round() as u16;
                    out.extend_from_slice(&scaled.to_be_bytes());
                }
            }
        }
        out
    }
}

#[async_trait]
impl ScanStore for FsStore {
    async fn ensure_dir(&self, path: &Path) -> AppResult<()> {
        let full = self.resolve(path);
        if !full.exists() {
            fs::create_dir_all(&full)?;
            info!("Created session directory '{}'", full.display());
        }
        Ok(())
    }

    async fn write_image(&self, frame: &Frame, path: &Path) -> AppResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&full)?;
        file.write_all(&Self::encode_pgm(frame))?;
        Ok(())
    }

    async fn write_report(&self, report: &serde_json::Value, path: &Path) -> AppResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(report).map_err(|e| {
            crate::error::ScanError::Processing(format!("report serialization failed: {e}"))
        })?;
        fs::write(&full, json)?;
        info!("Session report written to '{}'", full.display());
        Ok(())
    }
}
