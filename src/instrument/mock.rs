//! Mock instruments that generate synthetic data.
//!
//! `MockDetector` produces deterministic frames (a smooth intensity field
//! plus low-amplitude deterministic noise) so acquisition logic can be
//! exercised end to end without a camera. `MockRotator` simulates motion
//! latency and reports completion over a broadcast channel, matching the
//! asynchronous contract of a real motion controller.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Duration;

use crate::core::{Detector, Frame, FrameOrigin, MotionEvent, PixelBuffer, Rotator};
use crate::error::{AppResult, ScanError};

/// A mock detector producing deterministic synthetic frames.
pub struct MockDetector {
    id: String,
    width: usize,
    height: usize,
    exposure_us: u64,
    acquiring: bool,
    captures: usize,
    empty_captures: Vec<usize>,
}

impl MockDetector {
    /// Creates a detector producing `width`x`height` frames.
    pub fn new(id: &str, width: usize, height: usize, exposure_us: u64) -> Self {
        Self {
            id: id.to_string(),
            width,
            height,
            exposure_us,
            acquiring: false,
            captures: 0,
            empty_captures: Vec::new(),
        }
    }

    /// Makes the listed capture indices return empty frames, emulating a
    /// sensor buffer with nothing ready.
    pub fn with_empty_captures(mut self, captures: &[usize]) -> Self {
        self.empty_captures = captures.to_vec();
        self
    }

    fn synthesize(&self, capture: usize) -> Frame {
        let (w, h) = (self.width, self.height);
        let mut pixels = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                // Smooth field with deterministic noise; no thread_rng so
                // repeated runs produce identical frames.
                let base = 2000.0
                    + 500.0 * (x as f64 / w.max(1) as f64)
                    + 300.0 * (y as f64 / h.max(1) as f64);
                let noise = ((capture * w * h + y * w + x) as f64 * 37.0).sin() * 20.0;
                pixels.push((base + noise).max(0.0) as u16);
            }
        }
        Frame {
            step: 0,
            origin: FrameOrigin::Hardware,
            width: w,
            height: h,
            pixels: PixelBuffer::U16(pixels),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl Detector for MockDetector {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start_acquisition(&mut self) -> AppResult<()> {
        info!("Mock detector '{}' acquisition started", self.id);
        self.acquiring = true;
        self.captures = 0;
        Ok(())
    }

    async fn stop_acquisition(&mut self) -> AppResult<()> {
        info!("Mock detector '{}' acquisition stopped", self.id);
        self.acquiring = false;
        Ok(())
    }

    async fn latest_frame(&mut self) -> AppResult<Frame> {
        if !self.acquiring {
            return Err(ScanError::Instrument(format!(
                "detector '{}' is not acquiring",
                self.id
            )));
        }
        let capture = self.captures;
        self.captures += 1;
        if self.empty_captures.contains(&capture) {
            debug!("Mock detector '{}' returning empty frame {}", self.id, capture);
            return Ok(Frame {
                step: 0,
                origin: FrameOrigin::Hardware,
                width: 0,
                height: 0,
                pixels: PixelBuffer::U16(Vec::new()),
                timestamp: Utc::now(),
            });
        }
        Ok(self.synthesize(capture))
    }

    fn exposure_us(&self) -> u64 {
        self.exposure_us
    }
}

/// A mock rotation stage with simulated motion latency.
pub struct MockRotator {
    id: String,
    steps_per_revolution: u32,
    position: u32,
    settle: Duration,
    moves_issued: Arc<AtomicUsize>,
    motion_tx: broadcast::Sender<MotionEvent>,
    _motion_rx_keeper: broadcast::Receiver<MotionEvent>,
}

impl MockRotator {
    /// Creates a rotator with `steps_per_revolution` and a 1 ms settle
    /// time.
    pub fn new(id: &str, steps_per_revolution: u32) -> Self {
        Self::with_settle(id, steps_per_revolution, Duration::from_millis(1))
    }

    /// Creates a rotator with an explicit settle time per move.
    pub fn with_settle(id: &str, steps_per_revolution: u32, settle: Duration) -> Self {
        let (motion_tx, motion_rx) = broadcast::channel(64);
        Self {
            id: id.to_string(),
            steps_per_revolution,
            position: 0,
            settle,
            moves_issued: Arc::new(AtomicUsize::new(0)),
            motion_tx,
            _motion_rx_keeper: motion_rx,
        }
    }

    /// Counter of issued move commands, shared for test assertions.
    pub fn move_counter(&self) -> Arc<AtomicUsize> {
        self.moves_issued.clone()
    }

    /// Last commanded position in motor steps.
    pub fn position(&self) -> u32 {
        self.position
    }
}

#[async_trait]
impl Rotator for MockRotator {
    fn id(&self) -> &str {
        &self.id
    }

    fn steps_per_revolution(&self) -> u32 {
        self.steps_per_revolution
    }

    async fn move_absolute(&mut self, target_steps: u32) -> AppResult<()> {
        debug!(
            "Mock rotator '{}' moving {} -> {}",
            self.id, self.position, target_steps
        );
        self.position = target_steps;
        self.moves_issued.fetch_add(1, Ordering::SeqCst);
        let tx = self.motion_tx.clone();
        let settle = self.settle;
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            // Ignore errors if no listener is subscribed.
            let _ = tx.send(MotionEvent {
                target: target_steps,
            });
        });
        Ok(())
    }

    fn motion_events(&self) -> broadcast::Receiver<MotionEvent> {
        self.motion_tx.subscribe()
    }
}
