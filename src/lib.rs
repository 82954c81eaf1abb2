//! RideLink - live telemetry from BLE fitness sensors
//!
//! Decodes heart rate, cycling speed/cadence and cycling power measurement
//! frames, derives cadence from wrapping crank counters, smooths the results
//! for display, and manages one connect/stream/disconnect session per sensor
//! kind on top of an abstract transport.

pub mod config;
pub mod metrics;
pub mod sensors;

// Re-export commonly used types
pub use config::AppConfig;
pub use sensors::hub::SensorHub;
pub use sensors::session::SessionRegistry;
pub use sensors::types::{SensorError, SensorEvent, SensorKind};
