//! Per-session quality-control monitors.
//!
//! [`stability`] tracks illumination drift through normalized corner
//! intensities; [`timing`] instruments every sub-step of the acquisition
//! loop and produces the per-category statistics that end up in the session
//! report.

pub mod stability;
pub mod timing;

pub use stability::{Corner, StabilityMonitor, StabilityTrace};
pub use timing::{MarkKind, TimingMonitor, TimingReport};
