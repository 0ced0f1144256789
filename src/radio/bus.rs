//! Transport contracts for the register bus and the GPIO lines.
//!
//! The driver talks to hardware exclusively through these traits so that
//! tests can run against the in-memory transport in [`crate::radio::mock`]
//! while deployments use the rppal bindings in [`crate::radio::hal`].
//!
//! The bus adapter is expected to serialize exchanges: one transfer
//! completes before the next begins. That ordering is the only mutual
//! exclusion the driver relies on for register and FIFO access.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a transport implementation.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("SPI transfer failed: {0}")]
    Transfer(String),

    #[error("GPIO operation failed: {0}")]
    Gpio(String),
}

/// Full-duplex register bus.
///
/// The response always has the same length as the request. For 2-byte
/// register operations `response[0]` is undefined and `response[1]` carries
/// the register's prior value on a write, or its current value on a read.
/// For `1 + N` byte FIFO bursts the N bytes following the address
/// placeholder carry the FIFO contents.
#[async_trait]
pub trait RadioBus: Send + Sync {
    async fn transfer(&self, request: &[u8]) -> Result<Vec<u8>, BusError>;
}

/// Output line holding the radio in reset.
#[async_trait]
pub trait ResetLine: Send + Sync {
    /// Drive the line high or low.
    async fn write(&self, level: bool) -> Result<(), BusError>;

    /// Release the pin on teardown.
    fn unexport(&self);
}

/// Rising-edge interrupt line.
pub trait InterruptLine: Send + Sync {
    /// Arm edge detection. Each detected edge delivers its line level on
    /// the returned channel.
    fn watch(&self) -> Result<mpsc::UnboundedReceiver<bool>, BusError>;

    /// Disarm edge detection.
    fn unwatch_all(&self);

    /// Release the pin on teardown.
    fn unexport(&self);
}
