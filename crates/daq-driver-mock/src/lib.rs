//! Mock instrument drivers for toptica-daq
//!
//! Simulated devices for running the logic layer and the CLI without hardware.
//! Both are selected with `model = "mock"` in their configuration table.
//!
//! - [`MockLaser`] - diode laser with two channels, autopulse and FINE
//! - [`MockMicrowave`] - microwave source with the SGS100A limits
//!
//! Failures can be injected per operation with [`ErrorConfig`].
//!
//! ```rust,ignore
//! use daq_core::driver::{LaserRegistry, MicrowaveRegistry};
//!
//! let mut lasers = LaserRegistry::for_lasers();
//! let mut sources = MicrowaveRegistry::for_microwave();
//! daq_driver_mock::register_all(&mut lasers, &mut sources);
//! ```

pub mod common;
mod mock_laser;
mod mock_microwave;

pub use common::{ErrorConfig, ErrorScenario, MockRng};
pub use mock_laser::{MockLaser, MockLaserConfig, MockLaserFactory};
pub use mock_microwave::{MockMicrowave, MockMicrowaveFactory};

use daq_core::driver::{LaserRegistry, MicrowaveRegistry};

/// Register the mock factories with both registries.
pub fn register_all(lasers: &mut LaserRegistry, sources: &mut MicrowaveRegistry) {
    lasers.register_factory(Box::new(MockLaserFactory));
    sources.register_factory(Box::new(MockMicrowaveFactory));
}
