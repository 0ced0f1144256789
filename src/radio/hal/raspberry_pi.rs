//! rppal-backed transport for Raspberry Pi hosts.

use std::sync::Mutex;

use async_trait::async_trait;
use log::info;
use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
use rppal::spi::{Bus, Mode as SpiMode, SlaveSelect, Spi};
use tokio::sync::mpsc;

use crate::radio::bus::{BusError, InterruptLine, RadioBus, ResetLine};

/// SPI clock used for the RFM69.
pub const SPI_CLOCK_HZ: u32 = 1_000_000;

/// Hardware SPI endpoint.
pub struct RaspberryPiBus {
    spi: Mutex<Spi>,
}

impl RaspberryPiBus {
    pub fn new(bus: u8, device: u8) -> Result<Self, BusError> {
        let bus = match bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            other => return Err(BusError::Transfer(format!("unsupported SPI bus {other}"))),
        };
        let select = match device {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            other => {
                return Err(BusError::Transfer(format!(
                    "unsupported SPI device {other}"
                )))
            }
        };
        let spi = Spi::new(bus, select, SPI_CLOCK_HZ, SpiMode::Mode0)
            .map_err(|e| BusError::Transfer(format!("failed to open SPI: {e}")))?;
        info!("SPI interface initialized");
        Ok(Self {
            spi: Mutex::new(spi),
        })
    }
}

#[async_trait]
impl RadioBus for RaspberryPiBus {
    async fn transfer(&self, request: &[u8]) -> Result<Vec<u8>, BusError> {
        let mut response = vec![0u8; request.len()];
        let mut spi = self.spi.lock().unwrap();
        spi.transfer(&mut response, request)
            .map_err(|e| BusError::Transfer(e.to_string()))?;
        Ok(response)
    }
}

/// Output pin holding the radio in reset.
pub struct RaspberryPiResetLine {
    pin: Mutex<OutputPin>,
}

impl RaspberryPiResetLine {
    pub fn new(gpio: &Gpio, pin: u8) -> Result<Self, BusError> {
        let pin = gpio
            .get(pin)
            .map_err(|e| BusError::Gpio(format!("failed to get reset pin {pin}: {e}")))?
            .into_output();
        Ok(Self {
            pin: Mutex::new(pin),
        })
    }
}

#[async_trait]
impl ResetLine for RaspberryPiResetLine {
    async fn write(&self, level: bool) -> Result<(), BusError> {
        let mut pin = self.pin.lock().unwrap();
        if level {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }

    fn unexport(&self) {
        // rppal restores the pin state when the pin is dropped
    }
}

/// Input pin delivering rising-edge interrupts.
pub struct RaspberryPiInterruptLine {
    pin: Mutex<InputPin>,
}

impl RaspberryPiInterruptLine {
    pub fn new(gpio: &Gpio, pin: u8) -> Result<Self, BusError> {
        let pin = gpio
            .get(pin)
            .map_err(|e| BusError::Gpio(format!("failed to get interrupt pin {pin}: {e}")))?
            .into_input();
        Ok(Self {
            pin: Mutex::new(pin),
        })
    }
}

impl InterruptLine for RaspberryPiInterruptLine {
    fn watch(&self) -> Result<mpsc::UnboundedReceiver<bool>, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pin = self.pin.lock().unwrap();
        pin.set_async_interrupt(Trigger::RisingEdge, move |level| {
            let _ = tx.send(matches!(level, Level::High));
        })
        .map_err(|e| BusError::Gpio(format!("failed to arm interrupt: {e}")))?;
        Ok(rx)
    }

    fn unwatch_all(&self) {
        let _ = self.pin.lock().unwrap().clear_async_interrupt();
    }

    fn unexport(&self) {
        // rppal releases the pin when it is dropped
    }
}
