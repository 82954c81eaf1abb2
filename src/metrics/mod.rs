//! Metrics derived from raw sensor samples.

pub mod cadence;
pub mod smoothing;

pub use cadence::cadence_rpm;
pub use smoothing::{SmoothingWindow, WindowSnapshot};
