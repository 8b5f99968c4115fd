//! Rohde & Schwarz instrument drivers.
//!
//! - [`Sgs100a`]: SGS100A SGMA RF source over VISA
//!
//! VISA access needs the `instrument_visa` feature and a VISA runtime on the host.

mod sgs100a;
pub mod session;

pub use session::{ScpiSession, SharedSession};
pub use sgs100a::{Sgs100a, Sgs100aConfig, Sgs100aFactory, SGS100A_LIMITS};
