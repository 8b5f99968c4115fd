//! Toptica hardware drivers for toptica-daq.
//!
//! This crate provides drivers for Toptica instruments, including:
//! - iBeam Smart diode laser (USB virtual COM port, 115200 8N1)
//!
//! # Usage
//!
//! Register the factory with the laser registry:
//!
//! ```rust,ignore
//! use daq_driver_toptica::IBeamSmartFactory;
//!
//! registry.register_factory(Box::new(IBeamSmartFactory));
//! ```

mod ibeam;

pub use ibeam::{IBeamSmart, IBeamSmartConfig, IBeamSmartFactory, IDENTITY_MARKER};
