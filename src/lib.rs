//! Acquisition and reconstruction core for an OPT scanner.
//!
//! This library drives a rotating sample stage through a sequence of
//! angular positions, captures one frame per position, incrementally
//! reconstructs a cross-sectional density estimate via filtered
//! backprojection, and tracks illumination stability and per-step timing
//! for quality control. Hardware drivers are external; the core consumes
//! them through the `Detector` and `Rotator` traits and ships mock
//! implementations for development without hardware.

pub mod config;
pub mod controller;
pub mod core;
pub mod correction;
pub mod error;
pub mod instrument;
pub mod metadata;
pub mod monitor;
pub mod recon;
pub mod scan;
pub mod storage;
