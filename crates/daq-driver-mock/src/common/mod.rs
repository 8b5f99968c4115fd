//! Shared infrastructure for mock devices.

pub mod errors;
pub mod rng;

pub use errors::{ErrorConfig, ErrorScenario};
pub use rng::MockRng;
