//! Platform bindings for the transport contracts in [`crate::radio::bus`].

#[cfg(feature = "raspberry-pi")]
pub mod raspberry_pi;

#[cfg(feature = "raspberry-pi")]
pub use raspberry_pi::{RaspberryPiBus, RaspberryPiInterruptLine, RaspberryPiResetLine};
