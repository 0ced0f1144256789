//! # Driver Error Handling
//!
//! This module defines the RfmError enum, which represents the different
//! error types that can occur in the rfm69-rs crate.

use thiserror::Error;

use crate::radio::bus::BusError;

/// Represents the different error types that can occur while driving the
/// radio.
#[derive(Debug, Error)]
pub enum RfmError {
    /// A transport (SPI or GPIO) operation failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Invalid driver configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The radio did not come up during initialization.
    #[error("radio initialization failed: {0}")]
    InitFailed(String),

    /// A bounded wait ran out of attempts.
    #[error("timeout waiting for {0}")]
    Timeout(&'static str),

    /// The radio never reported PacketSent for a transmission attempt.
    #[error("send attempt timed out")]
    SendTimeout,

    /// A transmission attempt was started while another was in flight.
    #[error("another send attempt is already in flight")]
    SendBusy,

    /// A frame does not fit the device FIFO behind the length byte.
    #[error("frame of {0} bytes exceeds the FIFO capacity")]
    FrameTooLarge(usize),

    /// The peer never acknowledged a frame within the retry limit.
    #[error("no acknowledgement after {attempts} attempts for frame {key}")]
    AckExhausted { attempts: u8, key: String },

    /// An inbound frame could not be decoded by the protocol module.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The driver instance has been torn down.
    #[error("driver has shut down")]
    Closed,
}
