//! # rfm69-rs - An Async Driver for the HopeRF RFM69 Packet Radio
//!
//! This crate drives an RFM69 transceiver over a register-addressed SPI bus
//! with a GPIO reset line and a GPIO interrupt line. It configures the
//! device registers through a layered mirror, manages the five-mode
//! operating state machine, and performs interrupt-driven packet
//! transmission and reception.
//!
//! ## Features
//!
//! - Async-first design using Tokio for non-blocking I/O
//! - Layered register mirror: device readback, protocol defaults and
//!   runtime overrides merged in fixed precedence
//! - Interrupt-driven send and receive pipelines with a bounded send
//!   timeout
//! - Pluggable link-layer protocol modules: a passthrough default and the
//!   LowPowerLab addressed ACK/retry protocol
//! - Hardware AES encryption, node/broadcast address filtering and
//!   frequency presets through the configuration surface
//! - rppal SPI/GPIO bindings behind the `raspberry-pi` feature; an
//!   in-memory mock transport for tests
//!
//! ## Usage
//!
//! ```no_run
//! use rfm69_rs::radio::mock::MockRadio;
//! use rfm69_rs::{Rfm69Config, Rfm69Driver};
//!
//! # async fn run() -> Result<(), rfm69_rs::RfmError> {
//! let transport = MockRadio::new();
//! let mut driver = Rfm69Driver::new(
//!     transport.bus(),
//!     transport.reset_line(),
//!     transport.interrupt_line(),
//!     Rfm69Config::default(),
//! );
//! let mut inbox = driver.subscribe();
//!
//! driver.initialize().await?;
//! driver.start_listening().await?;
//!
//! driver.send(b"hello").await?;
//! while let Some(message) = inbox.recv().await {
//!     println!("received: {:?}", message.payload);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! On a Raspberry Pi, build with `--features raspberry-pi` and construct
//! the transport from [`radio::hal::raspberry_pi`] instead of the mock.

pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod radio;

pub use crate::config::{frequency_preset, ProtocolChoice, Rfm69Config};
pub use crate::error::RfmError;
pub use crate::logging::init_logger;

// Protocol module contract and shipped variants
pub use crate::protocol::{
    InboundMessage, LinkProtocol, LowPowerLabProtocol, PassthroughProtocol, SendCompletion,
};

// Radio core types
pub use crate::radio::bus::{BusError, InterruptLine, RadioBus, ResetLine};
pub use crate::radio::driver::{DriverHandle, RadioStats, Rfm69Driver, SEND_TIMEOUT};
pub use crate::radio::registers::Mode;
pub use crate::radio::store::{RegisterLayer, RegisterStore};
