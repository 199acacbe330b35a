//! Illumination stability diagnostics.
//!
//! A cheap per-frame drift check: the mean intensity of four fixed-size
//! corner windows, normalized against the first processed frame. A slow
//! drift in the light source or a vibrating sample holder shows up as the
//! four traces diverging from 1.0 over the course of a scan.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::Frame;
use crate::error::{AppResult, ScanError};

/// The four corner windows, in trace order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Corner {
    /// Upper-left window.
    UpperLeft,
    /// Upper-right window.
    UpperRight,
    /// Lower-left window.
    LowerLeft,
    /// Lower-right window.
    LowerRight,
}

impl Corner {
    /// All corners in trace order.
    pub const ALL: [Corner; 4] = [
        Corner::UpperLeft,
        Corner::UpperRight,
        Corner::LowerLeft,
        Corner::LowerRight,
    ];

    /// Short label used in reports and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Corner::UpperLeft => "UL",
            Corner::UpperRight => "UR",
            Corner::LowerLeft => "LL",
            Corner::LowerRight => "LR",
        }
    }
}

/// Per-corner normalized intensity ratios, one entry per processed step.
///
/// The entry for the baseline frame is exactly `1.0` in every corner; later
/// entries are ratios against the baseline corner means.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityTrace {
    /// Step indices the ratios correspond to.
    pub steps: Vec<usize>,
    /// Upper-left ratio series.
    pub ul: Vec<f64>,
    /// Upper-right ratio series.
    pub ur: Vec<f64>,
    /// Lower-left ratio series.
    pub ll: Vec<f64>,
    /// Lower-right ratio series.
    pub lr: Vec<f64>,
}

impl StabilityTrace {
    /// Ratio series for one corner.
    pub fn series(&self, corner: Corner) -> &[f64] {
        match corner {
            Corner::UpperLeft => &self.ul,
            Corner::UpperRight => &self.ur,
            Corner::LowerLeft => &self.ll,
            Corner::LowerRight => &self.lr,
        }
    }

    fn push(&mut self, step: usize, ratios: [f64; 4]) {
        self.steps.push(step);
        self.ul.push(ratios[0]);
        self.ur.push(ratios[1]);
        self.ll.push(ratios[2]);
        self.lr.push(ratios[3]);
    }
}

/// Computes and accumulates corner-intensity ratios across a session.
pub struct StabilityMonitor {
    window: usize,
    baseline: Option<[f64; 4]>,
    trace: StabilityTrace,
}

impl StabilityMonitor {
    /// Creates a monitor with square corner windows of side `window` pixels.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            baseline: None,
            trace: StabilityTrace::default(),
        }
    }

    /// Processes one frame and returns its four corner ratios
    /// `[UL, UR, LL, LR]`.
    ///
    /// The first processed frame becomes the normalization baseline and
    /// yields exactly `[1.0; 4]`.
    pub fn update(&mut self, frame: &Frame) -> AppResult<[f64; 4]> {
        let n = self.window;
        let x_right = frame.width.saturating_sub(n);
        let y_bottom = frame.height.saturating_sub(n);
        let windows = [
            (0, 0),
            (x_right, 0),
            (0, y_bottom),
            (x_right, y_bottom),
        ];

        let mut means = [0.0f64; 4];
        for (i, &(x0, y0)) in windows.iter().enumerate() {
            means[i] = frame.region_mean(x0, y0, n, n).ok_or_else(|| {
                ScanError::Processing(format!(
                    "cannot compute corner means of a {}x{} frame",
                    frame.width, frame.height
                ))
            })?;
        }

        let ratios = match self.baseline {
            None => {
                let mut baseline = means;
                for (corner, mean) in Corner::ALL.iter().zip(baseline.iter_mut()) {
                    if *mean == 0.0 {
                        warn!(
                            "Corner {} baseline mean is zero; normalizing against 1.0",
                            corner.label()
                        );
                        *mean = 1.0;
                    }
                }
                self.baseline = Some(baseline);
                [1.0; 4]
            }
            Some(baseline) => {
                let mut ratios = [0.0f64; 4];
                for i in 0..4 {
                    ratios[i] = means[i] / baseline[i];
                }
                ratios
            }
        };

        self.trace.push(frame.step, ratios);
        Ok(ratios)
    }

    /// The accumulated trace.
    pub fn trace(&self) -> &StabilityTrace {
        &self.trace
    }

    /// An owned copy of the trace for cross-context consumers.
    pub fn snapshot(&self) -> StabilityTrace {
        self.trace.clone()
    }

    /// Resets traces and baselines between sessions.
    pub fn clear(&mut self) {
        self.baseline = None;
        self.trace = StabilityTrace::default();
    }
}
