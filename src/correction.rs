//! Correction-frame acquisition.
//!
//! Hot-pixel, dark-field, and flat-field calibration frames share one
//! workflow: capture `averages` frames from the detector, average them
//! pixel-wise, and derive statistics. Hot-pixel frames additionally split
//! pixels into outliers and background by a configurable
//! standard-deviation cutoff.
//!
//! Correction acquisition drives the same detector as a scan session and
//! must never run concurrently with one; the session controller enforces
//! that.

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::core::{Detector, Frame, FrameOrigin, PixelBuffer};
use crate::error::{AppResult, ScanError};

/// Which calibration a correction frame captures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionKind {
    /// Sensor defects: bright pixels independent of illumination.
    HotPixel,
    /// Sensor offset with the shutter closed.
    DarkField,
    /// Illumination profile with no sample in the beam.
    FlatField,
}

impl CorrectionKind {
    /// Snake-case label used for file names and event payloads.
    pub fn label(&self) -> &'static str {
        match self {
            CorrectionKind::HotPixel => "hot_pixel",
            CorrectionKind::DarkField => "dark_field",
            CorrectionKind::FlatField => "flat_field",
        }
    }
}

/// Outlier split of a hot-pixel correction frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutlierStats {
    /// Standard-deviation cutoff that separated the populations.
    pub sigma_cutoff: f64,
    /// Number of pixels above `mean + sigma_cutoff * std_dev`.
    pub count: usize,
    /// Mean of the outlier population (0 when empty).
    pub outlier_mean: f64,
    /// Mean of the remaining pixels.
    pub clean_mean: f64,
}

/// Statistics of an averaged correction frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrectionStats {
    /// Calibration kind.
    pub kind: CorrectionKind,
    /// Number of captures that contributed to the average.
    pub averages: usize,
    /// Mean of the averaged frame.
    pub mean: f64,
    /// Population standard deviation of the averaged frame.
    pub std_dev: f64,
    /// Outlier split; present for hot-pixel corrections only.
    pub outliers: Option<OutlierStats>,
}

/// An averaged calibration frame with its derived statistics.
#[derive(Clone, Debug)]
pub struct CorrectionFrame {
    /// Calibration kind.
    pub kind: CorrectionKind,
    /// The pixel-wise average of the contributing captures.
    pub frame: Frame,
    /// Derived statistics.
    pub stats: CorrectionStats,
}

/// Captures `averages` frames, averages them, and derives statistics.
///
/// Empty captures are logged and skipped; the acquisition fails only when
/// no capture produced usable data.
pub async fn acquire_correction(
    detector: &mut dyn Detector,
    kind: CorrectionKind,
    averages: usize,
    sigma_cutoff: f64,
) -> AppResult<CorrectionFrame> {
    if averages == 0 {
        return Err(ScanError::Configuration(
            "correction acquisition requires at least one capture".to_string(),
        ));
    }

    info!(
        "Acquiring {} correction ({} captures)",
        kind.label(),
        averages
    );
    detector.start_acquisition().await?;
    let accumulated = accumulate(detector, kind, averages).await;
    let stopped = detector.stop_acquisition().await;
    let (sum, width, height, used) = accumulated?;
    stopped?;

    let scale = 1.0 / used as f64;
    let pixels: Vec<f64> = sum.into_iter().map(|v| v * scale).collect();
    let stats = derive_stats(kind, &pixels, used, sigma_cutoff);

    Ok(CorrectionFrame {
        kind,
        frame: Frame {
            step: 0,
            origin: FrameOrigin::Hardware,
            width,
            height,
            pixels: PixelBuffer::F64(pixels),
            timestamp: Utc::now(),
        },
        stats,
    })
}

async fn accumulate(
    detector: &mut dyn Detector,
    kind: CorrectionKind,
    averages: usize,
) -> AppResult<(Vec<f64>, usize, usize, usize)> {
    let exposure = Duration::from_micros(detector.exposure_us().max(1));
    let mut sum: Vec<f64> = Vec::new();
    let mut dims = (0usize, 0usize);
    let mut used = 0usize;

    for capture in 0..averages {
        tokio::time::sleep(exposure).await;
        let frame = detector.latest_frame().await?;
        if frame.is_empty() {
            warn!(
                "Empty frame during {} correction capture {}/{}; skipping",
                kind.label(),
                capture + 1,
                averages
            );
            continue;
        }
        if sum.is_empty() {
            dims = (frame.width, frame.height);
            sum = vec![0.0; frame.width * frame.height];
        } else if (frame.width, frame.height) != dims {
            return Err(ScanError::Instrument(format!(
                "detector frame size changed mid-correction: {}x{} then {}x{}",
                dims.0, dims.1, frame.width, frame.height
            )));
        }
        for (slot, value) in sum.iter_mut().zip(frame.pixels.as_f64().iter()) {
            *slot += value;
        }
        used += 1;
    }

    if used == 0 {
        return Err(ScanError::Instrument(format!(
            "no usable frames during {} correction acquisition",
            kind.label()
        )));
    }
    Ok((sum, dims.0, dims.1, used))
}

fn derive_stats(
    kind: CorrectionKind,
    pixels: &[f64],
    used: usize,
    sigma_cutoff: f64,
) -> CorrectionStats {
    let n = pixels.len() as f64;
    let mean = pixels.iter().sum::<f64>() / n;
    let variance = pixels.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let outliers = match kind {
        CorrectionKind::HotPixel => {
            let cutoff = mean + sigma_cutoff * std_dev;
            let (mut hot_sum, mut hot_count) = (0.0, 0usize);
            let (mut clean_sum, mut clean_count) = (0.0, 0usize);
            for &v in pixels {
                if v > cutoff {
                    hot_sum += v;
                    hot_count += 1;
                } else {
                    clean_sum += v;
                    clean_count += 1;
                }
            }
            Some(OutlierStats {
                sigma_cutoff,
                count: hot_count,
                outlier_mean: if hot_count > 0 {
                    hot_sum / hot_count as f64
                } else {
                    0.0
                },
                clean_mean: if clean_count > 0 {
                    clean_sum / clean_count as f64
                } else {
                    0.0
                },
            })
        }
        _ => None,
    };

    CorrectionStats {
        kind,
        averages: used,
        mean,
        std_dev,
        outliers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hot_pixel_outlier_split() {
        // 99 background pixels at 10, one hot pixel at 1000.
        let mut pixels = vec![10.0; 100];
        pixels[42] = 1000.0;
        let stats = derive_stats(CorrectionKind::HotPixel, &pixels, 5, 5.0);
        assert_eq!(stats.averages, 5);
        let outliers = stats.outliers.expect("hot-pixel stats carry outliers");
        assert_eq!(outliers.count, 1);
        assert!((outliers.outlier_mean - 1000.0).abs() < 1e-9);
        assert!((outliers.clean_mean - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_field_has_no_outlier_split() {
        let pixels = vec![100.0; 64];
        let stats = derive_stats(CorrectionKind::FlatField, &pixels, 10, 5.0);
        assert!(stats.outliers.is_none());
        assert!((stats.mean - 100.0).abs() < 1e-12);
        assert!(stats.std_dev.abs() < 1e-12);
    }
}
