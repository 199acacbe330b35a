//! Core data types and collaborator traits for the scanner.
//!
//! This module defines the foundational abstractions shared by the whole
//! acquisition pipeline:
//!
//! - [`Frame`] and [`PixelBuffer`]: image data captured from the detector or
//!   synthesized in demo mode, stored in its native bit depth.
//! - [`Detector`] and [`Rotator`]: capability traits for the two hardware
//!   collaborators. Concrete drivers live outside this crate; the scan
//!   orchestrator only ever sees these traits.
//!
//! # Thread Safety
//!
//! All traits require `Send + Sync` to enable safe concurrent access across
//! async tasks. Motion completion is reported through a Tokio `broadcast`
//! channel so that the session driver — a different execution context than
//! the one that issued the move — can deliver the notification into the
//! state machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::AppResult;

// =============================================================================
// Pixel data
// =============================================================================

/// Memory-efficient pixel buffer supporting multiple bit depths.
///
/// Detector frames arrive as 16-bit unsigned integers; computed images
/// (averaged corrections, reconstruction slices) are 64-bit floats. Storing
/// each in its native format avoids converting every camera frame to `f64`
/// just to pass it along.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PixelBuffer {
    /// 16-bit unsigned integer pixels (2 bytes/pixel)
    U16(Vec<u16>),
    /// 64-bit floating point pixels (8 bytes/pixel)
    F64(Vec<f64>),
}

impl PixelBuffer {
    /// Returns pixel data as f64, using zero-copy for the F64 variant.
    pub fn as_f64(&self) -> std::borrow::Cow<'_, [f64]> {
        use std::borrow::Cow;
        match self {
            PixelBuffer::U16(data) => Cow::Owned(data.iter().map(|&v| v as f64).collect()),
            PixelBuffer::F64(data) => Cow::Borrowed(data.as_slice()),
        }
    }

    /// Returns the number of pixels in the buffer.
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U16(data) => data.len(),
            PixelBuffer::F64(data) => data.len(),
        }
    }

    /// Returns true if the buffer contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads a single pixel as f64 without converting the whole buffer.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            PixelBuffer::U16(data) => data.get(index).map(|&v| v as f64),
            PixelBuffer::F64(data) => data.get(index).copied(),
        }
    }
}

/// Where a frame came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOrigin {
    /// Captured from the detector collaborator.
    Hardware,
    /// Generated from the precomputed synthetic sinogram (demo mode).
    Synthetic,
}

/// A single 2D image captured (or synthesized) for one scan step.
///
/// Frames are produced exclusively by the scan orchestrator for the duration
/// of one step and handed to the stability monitor, the reconstruction
/// engine, and persistence behind an `Arc`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    /// Index of the scan step that produced this frame.
    pub step: usize,
    /// Hardware capture or synthetic projection.
    pub origin: FrameOrigin,
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Pixel data in native format (row-major order).
    pub pixels: PixelBuffer,
    /// UTC timestamp when the frame was captured.
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// True when the detector returned no usable data for this step.
    ///
    /// The acquisition layer may hand back a frame with a zero-length
    /// primary dimension; such frames are skipped rather than processed.
    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0 || self.pixels.is_empty()
    }

    /// Extracts one row as an f64 vector, or `None` if `y` is out of range.
    pub fn line(&self, y: usize) -> Option<Vec<f64>> {
        if y >= self.height || self.width == 0 {
            return None;
        }
        let start = y * self.width;
        let mut row = Vec::with_capacity(self.width);
        for x in 0..self.width {
            row.push(self.pixels.get_f64(start + x)?);
        }
        Some(row)
    }

    /// Mean intensity over a rectangular window, clamped to the frame
    /// bounds. Returns `None` for an empty frame or window.
    pub fn region_mean(&self, x0: usize, y0: usize, w: usize, h: usize) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let x1 = (x0 + w).min(self.width);
        let y1 = (y0 + h).min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        let mut sum = 0.0;
        for y in y0..y1 {
            for x in x0..x1 {
                sum += self.pixels.get_f64(y * self.width + x)?;
            }
        }
        Some(sum / ((x1 - x0) * (y1 - y0)) as f64)
    }
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// Detector capability trait.
///
/// The orchestrator starts acquisition once per session, then reads the most
/// recent frame after each motion settles. `latest_frame` may return an
/// empty frame when the sensor had nothing ready; the caller decides how to
/// handle that.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Unique detector identifier.
    fn id(&self) -> &str;

    /// Begin continuous acquisition.
    async fn start_acquisition(&mut self) -> AppResult<()>;

    /// Stop acquisition.
    async fn stop_acquisition(&mut self) -> AppResult<()>;

    /// Most recent frame from the sensor buffer.
    async fn latest_frame(&mut self) -> AppResult<Frame>;

    /// Current exposure duration in microseconds.
    fn exposure_us(&self) -> u64;
}

/// Notification that an asynchronous rotator move finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionEvent {
    /// Target position of the completed move, in motor steps.
    pub target: u32,
}

/// Rotator capability trait.
///
/// `move_absolute` initiates the motion and returns once the command has
/// been accepted; completion is reported asynchronously on the channel
/// returned by [`Rotator::motion_events`], never as a return value.
#[async_trait]
pub trait Rotator: Send + Sync {
    /// Unique rotator identifier.
    fn id(&self) -> &str;

    /// Motor steps per full revolution.
    fn steps_per_revolution(&self) -> u32;

    /// Start an absolute move to `target_steps`.
    async fn move_absolute(&mut self, target_steps: u32) -> AppResult<()>;

    /// Subscribe to motion-complete notifications.
    fn motion_events(&self) -> broadcast::Receiver<MotionEvent>;
}
