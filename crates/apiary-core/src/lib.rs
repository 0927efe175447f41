//! # Apiary Core
//!
//! Error definitions and telemetry bootstrap shared by every Apiary crate.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::{init_telemetry, TelemetryConfig};
