//! Instrument collaborators.
//!
//! Concrete camera/motor drivers live outside this crate; what ships here
//! are the mock implementations used for development, demo sessions, and
//! tests without hardware.

pub mod mock;

pub use mock::{MockDetector, MockRotator};
