//! Polling logic between a [`LaserDevice`](daq_core::capabilities::LaserDevice)
//! and whatever presents its state.
//!
//! [`LaserLogic::activate`] reads the laser's initial state, allocates the sample
//! buffers and spawns the poll task. Presentation subscribes to [`LogicEvent`]s and
//! reads [`LaserLogic::history`]; setters are queued on the poll task so they never
//! overlap a poll pass.

pub mod buffers;
pub mod messages;
mod poll;

pub use buffers::SampleBuffers;
pub use messages::{LaserCommand, LaserSnapshot, LogicEvent, PollOutcome};
pub use poll::{LaserLogic, LogicSettings, PollState};
