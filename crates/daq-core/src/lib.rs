//! `daq-core`
//!
//! Core types for toptica-daq instrument control.
//!
//! - [`serial`]: async serial port helpers and the line-oriented command transport
//! - [`response`]: response decoding, `key = value` parsing, status keywords
//! - [`states`]: device state enumerations
//! - [`capabilities`]: the `LaserDevice` and `MicrowaveSource` traits
//! - [`driver`]: driver factories and the model registry
//! - [`error`]: [`DaqError`](error::DaqError) and [`AppResult`](error::AppResult)

pub mod capabilities;
pub mod driver;
pub mod error;
pub mod response;
pub mod serial;
pub mod states;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use capabilities::{LaserDevice, MicrowaveSource, Temperatures};
pub use error::{AppResult, DaqError};
pub use response::Reading;
