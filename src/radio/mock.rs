//! In-memory transport for testing without hardware.
//!
//! [`MockRadio`] emulates the register file and FIFO at the bus-contract
//! level: 2-byte transfers read or write one register, `1 + N` bursts at
//! address 0x00 stream the FIFO, and writes to the op-mode register raise
//! the mode-ready flag the way the chip does. Tests drive inbound traffic
//! with [`MockRadio::queue_inbound`] and observe outbound bursts through
//! [`MockRadio::sent_frames`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::radio::bus::{BusError, InterruptLine, RadioBus, ResetLine};
use crate::radio::registers::{
    ADDRESS_MASK, IrqFlags1, IrqFlags2, Mode, MODE_MASK, REGISTER_SPACE, REG_FIFO, REG_IRQFLAGS1,
    REG_IRQFLAGS2, REG_OPMODE, WRITE_MASK,
};

struct MockState {
    registers: [u8; REGISTER_SPACE],
    fifo_rx: VecDeque<u8>,
    sent_frames: Vec<Vec<u8>>,
    reset_writes: Vec<bool>,
    fail_next: Option<BusError>,
    auto_packet_sent: bool,
    irq_tx: Option<mpsc::UnboundedSender<bool>>,
}

impl MockState {
    fn new() -> Self {
        Self {
            registers: [0; REGISTER_SPACE],
            fifo_rx: VecDeque::new(),
            sent_frames: Vec::new(),
            reset_writes: Vec::new(),
            fail_next: None,
            auto_packet_sent: false,
            irq_tx: None,
        }
    }
}

/// Emulated radio shared by the mock bus and GPIO lines.
#[derive(Clone)]
pub struct MockRadio {
    state: Arc<Mutex<MockState>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new())),
        }
    }

    /// Bus endpoint wired to this radio.
    pub fn bus(&self) -> Arc<dyn RadioBus> {
        Arc::new(MockBus {
            radio: self.clone(),
        })
    }

    /// Reset line wired to this radio.
    pub fn reset_line(&self) -> Arc<dyn ResetLine> {
        Arc::new(MockResetLine {
            radio: self.clone(),
        })
    }

    /// Interrupt line wired to this radio.
    pub fn interrupt_line(&self) -> Arc<dyn InterruptLine> {
        Arc::new(MockInterruptLine {
            radio: self.clone(),
        })
    }

    /// Current value of a register.
    pub fn register(&self, address: u8) -> u8 {
        self.state.lock().unwrap().registers[(address & ADDRESS_MASK) as usize]
    }

    /// Overwrite a register directly, bypassing the bus.
    pub fn set_register(&self, address: u8, value: u8) {
        self.state.lock().unwrap().registers[(address & ADDRESS_MASK) as usize] = value;
    }

    /// Fire PacketSent as soon as transmit mode is entered.
    pub fn set_auto_packet_sent(&self, enabled: bool) {
        self.state.lock().unwrap().auto_packet_sent = enabled;
    }

    /// Fail the next bus transfer with `error`.
    pub fn fail_next_transfer(&self, error: BusError) {
        self.state.lock().unwrap().fail_next = Some(error);
    }

    /// Load an inbound packet into the FIFO (length byte prepended), raise
    /// PayloadReady and pulse the interrupt line.
    pub fn queue_inbound(&self, payload: &[u8]) {
        {
            let mut state = self.state.lock().unwrap();
            state.fifo_rx.push_back(payload.len() as u8);
            state.fifo_rx.extend(payload);
            state.registers[REG_IRQFLAGS2 as usize] |= IrqFlags2::PAYLOAD_READY.bits();
        }
        self.pulse_interrupt();
    }

    /// Deliver one rising edge on the interrupt line.
    pub fn pulse_interrupt(&self) {
        let tx = self.state.lock().unwrap().irq_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
    }

    /// FIFO bursts written so far, each as `[length, frame bytes...]`.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().sent_frames.clone()
    }

    /// Levels written to the reset line so far.
    pub fn reset_writes(&self) -> Vec<bool> {
        self.state.lock().unwrap().reset_writes.clone()
    }

    fn transfer_locked(&self, request: &[u8]) -> Result<(Vec<u8>, bool), BusError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        if request.is_empty() {
            return Err(BusError::Transfer("empty request".into()));
        }

        let address = request[0] & ADDRESS_MASK;
        let write = request[0] & WRITE_MASK != 0;
        let mut response = vec![0u8; request.len()];

        if address == REG_FIFO {
            if write {
                state.sent_frames.push(request[1..].to_vec());
            } else {
                for slot in response[1..].iter_mut() {
                    *slot = state.fifo_rx.pop_front().unwrap_or(0);
                }
                if state.fifo_rx.is_empty() {
                    state.registers[REG_IRQFLAGS2 as usize] &= !IrqFlags2::PAYLOAD_READY.bits();
                }
            }
            return Ok((response, false));
        }

        if request.len() != 2 {
            return Err(BusError::Transfer(format!(
                "unexpected burst at register 0x{address:02X}"
            )));
        }

        let slot = address as usize;
        response[1] = state.registers[slot];
        let mut pulse = false;
        if write {
            state.registers[slot] = request[1];
            if address == REG_OPMODE {
                // the chip reports mode-ready shortly after a mode change
                state.registers[REG_IRQFLAGS1 as usize] |= IrqFlags1::MODE_READY.bits();
                if request[1] & MODE_MASK == Mode::Transmit.bits() {
                    if state.auto_packet_sent {
                        state.registers[REG_IRQFLAGS2 as usize] |= IrqFlags2::PACKET_SENT.bits();
                        pulse = true;
                    }
                } else {
                    state.registers[REG_IRQFLAGS2 as usize] &= !IrqFlags2::PACKET_SENT.bits();
                }
            }
        }
        Ok((response, pulse))
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

struct MockBus {
    radio: MockRadio,
}

#[async_trait]
impl RadioBus for MockBus {
    async fn transfer(&self, request: &[u8]) -> Result<Vec<u8>, BusError> {
        let (response, pulse) = self.radio.transfer_locked(request)?;
        if pulse {
            self.radio.pulse_interrupt();
        }
        Ok(response)
    }
}

struct MockResetLine {
    radio: MockRadio,
}

#[async_trait]
impl ResetLine for MockResetLine {
    async fn write(&self, level: bool) -> Result<(), BusError> {
        self.radio.state.lock().unwrap().reset_writes.push(level);
        Ok(())
    }

    fn unexport(&self) {}
}

struct MockInterruptLine {
    radio: MockRadio,
}

impl InterruptLine for MockInterruptLine {
    fn watch(&self) -> Result<mpsc::UnboundedReceiver<bool>, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.radio.state.lock().unwrap().irq_tx = Some(tx);
        Ok(rx)
    }

    fn unwatch_all(&self) {
        self.radio.state.lock().unwrap().irq_tx = None;
    }

    fn unexport(&self) {}
}
