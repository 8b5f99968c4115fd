//! # toptica-daq
//!
//! Polling control of a Toptica iBeam Smart diode laser, with an optional
//! Rohde & Schwarz SGS100A microwave source, from the command line.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-based [`Settings`](config::Settings) loaded from TOML and
//!   `TOPTICA_DAQ_` environment variables.
//! - **`telemetry`**: `tracing-subscriber` initialization.
//! - **`presenter`**: console rendering of laser updates and sample history.
//! - **`cli`**: the `clap` command tree and its runners.
//!
//! Device drivers, the capability traits and the poll loop live in the workspace
//! crates `daq-core`, `daq-driver-toptica`, `daq-driver-rohde-schwarz`,
//! `daq-driver-mock` and `daq-laser-logic`.

pub mod cli;
pub mod config;
pub mod presenter;
pub mod telemetry;

use daq_core::driver::{LaserRegistry, MicrowaveRegistry};

/// Registries with every driver this application ships.
///
/// Lasers: `iBeamSmart`, `mock`. Microwave sources: `SGS100A`, `mock`.
pub fn driver_registries() -> (LaserRegistry, MicrowaveRegistry) {
    let mut lasers = LaserRegistry::for_lasers();
    let mut sources = MicrowaveRegistry::for_microwave();
    lasers.register_factory(Box::new(daq_driver_toptica::IBeamSmartFactory));
    sources.register_factory(Box::new(daq_driver_rohde_schwarz::Sgs100aFactory));
    daq_driver_mock::register_all(&mut lasers, &mut sources);
    (lasers, sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_driver_is_registered() {
        let (lasers, sources) = driver_registries();
        assert!(lasers.has_factory("ibeamsmart"));
        assert!(lasers.has_factory("mock"));
        assert!(sources.has_factory("SGS100A"));
        assert!(sources.has_factory("mock"));
    }
}
