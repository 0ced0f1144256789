//! RFM69 driver core: mode state machine, interrupt dispatch and the
//! send/receive pipelines.
//!
//! The driver owns a layered register mirror, switches the radio between
//! its five operating modes while preserving unrelated register bits, and
//! coordinates transmission and reception through one-shot interrupt
//! listeners. Framing and reliability policy are delegated to the protocol
//! module selected in the configuration.
//!
//! All waits are expressed as futures; nothing blocks the caller's thread.
//! The transport adapter serializes bus exchanges, which is the only mutual
//! exclusion the driver relies on for register and FIFO access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

use crate::config::{frequency_preset, Rfm69Config};
use crate::error::RfmError;
use crate::protocol::{self, InboundMessage, LinkProtocol, SendCompletion};
use crate::radio::bus::{InterruptLine, RadioBus, ResetLine};
use crate::radio::irq::{IrqEvent, ListenerTable};
use crate::radio::registers::{
    ADDRESS_MASK, DIO_MAPPING_PACKET_SENT, DIO_MAPPING_PAYLOAD_READY, IrqFlags1, IrqFlags2,
    MAX_FRAME_LEN, MODE_MASK, Mode, PA_BOOST_HIGH, PA_BOOST_LOW, REG_AESKEY1, REG_BROADCASTADRS,
    REG_DIOMAPPING1, REG_FIFO, REG_FRFLSB, REG_FRFMID, REG_FRFMSB, REG_IRQFLAGS1, REG_IRQFLAGS2,
    REG_NODEADRS, REG_OCP, REG_OPMODE, REG_PACKETCONFIG2, REG_PALEVEL, REG_SYNCVALUE1,
    REG_TESTPA1, REG_TESTPA2, WRITE_MASK,
};
use crate::radio::store::{RegisterLayer, RegisterStore};

/// Bus-level deadline for one transmission attempt.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed delay between device-ready polls.
const READY_POLL_DELAY: Duration = Duration::from_millis(100);

/// Ready polls before the wait is abandoned.
const MAX_READY_POLLS: u32 = 50;

/// Attempts at the sync-value handshake during startup.
const MAX_SYNC_ATTEMPTS: u32 = 20;

/// Counters kept over the lifetime of a driver instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct RadioStats {
    /// Bus-level transmission attempts that completed on air.
    pub packets_sent: u64,
    /// Inbound packets drained from the FIFO.
    pub packets_received: u64,
    /// Attempts that never saw PacketSent within the deadline.
    pub send_timeouts: u64,
    /// Inbound frames the protocol module rejected.
    pub malformed_frames: u64,
    /// Edges with no known IRQ bit set.
    pub unexpected_interrupts: u64,
}

struct DriverShared {
    bus: Arc<dyn RadioBus>,
    reset_line: Arc<dyn ResetLine>,
    interrupt_line: Arc<dyn InterruptLine>,
    config: Rfm69Config,
    protocol: Arc<dyn LinkProtocol>,
    store: Mutex<RegisterStore>,
    listeners: ListenerTable,
    inbound: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    stats: Mutex<RadioStats>,
    send_active: AtomicBool,
}

/// Handle a protocol module uses to reach back into the driver that owns
/// it. Holds a weak reference, so a module can never keep a torn-down
/// driver alive.
#[derive(Clone)]
pub struct DriverHandle {
    shared: Weak<DriverShared>,
}

impl DriverHandle {
    fn upgrade(&self) -> Result<Arc<DriverShared>, RfmError> {
        self.shared.upgrade().ok_or(RfmError::Closed)
    }

    /// Run one bus-level transmission attempt for an already-framed
    /// payload. See [`Rfm69Driver::send`] for the completion contract.
    pub async fn attempt_send(
        &self,
        frame: &[u8],
        completion: SendCompletion,
    ) -> Result<(), RfmError> {
        DriverShared::attempt_send(&self.upgrade()?, frame, completion).await
    }
}

/// Async driver for the RFM69 transceiver.
pub struct Rfm69Driver {
    shared: Arc<DriverShared>,
    dispatch_task: Option<JoinHandle<()>>,
}

impl Rfm69Driver {
    /// Build a driver over the given transport endpoints.
    ///
    /// The protocol module named in the configuration is constructed here,
    /// seeded into the register store's protocol layer, and bound to this
    /// instance.
    pub fn new(
        bus: Arc<dyn RadioBus>,
        reset_line: Arc<dyn ResetLine>,
        interrupt_line: Arc<dyn InterruptLine>,
        config: Rfm69Config,
    ) -> Self {
        let protocol = protocol::for_choice(&config.protocol);
        let mut store = RegisterStore::new();
        for &(address, value) in protocol.register_defaults() {
            store.set(address, value, RegisterLayer::Protocol);
        }

        let shared = Arc::new(DriverShared {
            bus,
            reset_line,
            interrupt_line,
            config,
            protocol: Arc::clone(&protocol),
            store: Mutex::new(store),
            listeners: ListenerTable::default(),
            inbound: Mutex::new(None),
            stats: Mutex::new(RadioStats::default()),
            send_active: AtomicBool::new(false),
        });
        protocol.bind(DriverHandle {
            shared: Arc::downgrade(&shared),
        });

        Self {
            shared,
            dispatch_task: None,
        }
    }

    /// Channel on which decoded inbound messages are surfaced. Replaces
    /// any previous subscription.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<InboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.inbound.lock().unwrap() = Some(tx);
        rx
    }

    /// Snapshot of the lifetime counters.
    pub fn stats(&self) -> RadioStats {
        *self.shared.stats.lock().unwrap()
    }

    /// Stage a register override, written out by the next configuration
    /// pass.
    pub fn set_register(&self, address: u8, value: u8) {
        self.shared
            .store
            .lock()
            .unwrap()
            .set(address, value, RegisterLayer::Runtime);
    }

    /// Effective (merged) value of a register in the mirror.
    pub fn register(&self, address: u8) -> Option<u8> {
        self.shared.store.lock().unwrap().get(address)
    }

    /// Last device-reported value of a register.
    pub fn readback(&self, address: u8) -> Option<u8> {
        self.shared.store.lock().unwrap().readback(address)
    }

    /// Reset the radio and bring it to a fully configured, ready state.
    pub async fn initialize(&self) -> Result<(), RfmError> {
        info!("initializing RFM69 ({} protocol)", self.shared.protocol.name());
        let shared = &self.shared;
        shared.reset_radio().await?;
        shared.verify_sync().await?;
        shared.load_readback().await?;
        shared.apply_config()?;
        shared.configure().await?;
        shared.wait_until_ready().await?;
        info!("RFM69 ready");
        Ok(())
    }

    /// Arm the interrupt dispatcher and enter receive mode.
    pub async fn start_listening(&mut self) -> Result<(), RfmError> {
        let edges = self.shared.interrupt_line.watch()?;
        let shared = Arc::clone(&self.shared);
        self.dispatch_task = Some(tokio::spawn(DriverShared::dispatch_edges(shared, edges)));
        self.shared.enable_reception().await
    }

    /// Disarm the interrupt dispatcher.
    pub fn stop_listening(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        self.shared.interrupt_line.unwatch_all();
    }

    /// Tear the driver down: disarm the dispatcher, drop pending interrupt
    /// listeners and release both GPIO lines.
    pub fn shutdown(&mut self) {
        self.stop_listening();
        self.shared.listeners.clear();
        self.shared.interrupt_line.unexport();
        self.shared.reset_line.unexport();
        info!("RFM69 driver shut down");
    }

    /// Send an application payload through the active protocol module.
    ///
    /// Resolves once the protocol module declares the send finished: right
    /// after the on-air transmission for the passthrough module, or after
    /// ACK/retry resolution for LowPowerLab. The device is returned to the
    /// mode it was in when the call was made. Concurrent sends are not
    /// queued; callers must serialize.
    pub async fn send(&self, message: &[u8]) -> Result<(), RfmError> {
        DriverShared::send(&self.shared, message).await
    }

    /// Raw value of the operating-mode register.
    pub async fn detect_mode(&self) -> Result<u8, RfmError> {
        self.shared.detect_mode().await
    }

    /// Switch the radio to `mode`, preserving every non-mode bit.
    pub async fn change_mode(&self, mode: Mode) -> Result<(), RfmError> {
        self.shared.change_mode(mode).await
    }

    pub async fn sleep_mode(&self) -> Result<(), RfmError> {
        self.shared.change_mode(Mode::Sleep).await
    }

    pub async fn standby_mode(&self) -> Result<(), RfmError> {
        self.shared.change_mode(Mode::Standby).await
    }

    pub async fn transmit_mode(&self) -> Result<(), RfmError> {
        self.shared.change_mode(Mode::Transmit).await
    }

    pub async fn receive_mode(&self) -> Result<(), RfmError> {
        self.shared.change_mode(Mode::Receive).await
    }
}

impl Drop for Rfm69Driver {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
    }
}

impl DriverShared {
    // ------------------------------------------------------------------
    // Register access
    // ------------------------------------------------------------------

    async fn read_register(&self, address: u8) -> Result<u8, RfmError> {
        let request = [address & ADDRESS_MASK, 0];
        let response = self.bus.transfer(&request).await?;
        if self.config.verbose {
            debug!("register read  0x{address:02X} => 0x{:02X}", response[1]);
        }
        Ok(response[1])
    }

    async fn write_register(&self, address: u8, value: u8) -> Result<(), RfmError> {
        let request = [address | WRITE_MASK, value];
        let response = self.bus.transfer(&request).await?;
        if self.config.verbose {
            debug!(
                "register write 0x{address:02X} <= 0x{value:02X} (was 0x{:02X})",
                response[1]
            );
        }
        Ok(())
    }

    /// Burst-write a frame into the FIFO, variable-length format: the
    /// length byte goes first, then the frame bytes.
    async fn write_fifo(&self, frame: &[u8]) -> Result<(), RfmError> {
        let mut request = Vec::with_capacity(frame.len() + 2);
        request.push(REG_FIFO | WRITE_MASK);
        request.push(frame.len() as u8);
        request.extend_from_slice(frame);
        self.bus.transfer(&request).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mode state machine
    // ------------------------------------------------------------------

    async fn detect_mode(&self) -> Result<u8, RfmError> {
        self.read_register(REG_OPMODE).await
    }

    /// Read-modify-write of the mode bits. After a bus failure here the
    /// device's actual mode is unknown until the next successful
    /// `detect_mode`.
    async fn change_mode_bits(&self, desired: u8) -> Result<(), RfmError> {
        let current = self.detect_mode().await?;
        let next = (current & !MODE_MASK) | (desired & MODE_MASK);
        self.write_register(REG_OPMODE, next).await?;

        // Transmit and receive each select their own PA boost pair.
        if desired & MODE_MASK == Mode::Transmit.bits() {
            self.set_pa_boost(PA_BOOST_HIGH).await?;
        } else if desired & MODE_MASK == Mode::Receive.bits() {
            self.set_pa_boost(PA_BOOST_LOW).await?;
        }
        Ok(())
    }

    async fn change_mode(&self, mode: Mode) -> Result<(), RfmError> {
        self.change_mode_bits(mode.bits()).await
    }

    async fn set_pa_boost(&self, (pa1, pa2): (u8, u8)) -> Result<(), RfmError> {
        self.write_register(REG_TESTPA1, pa1).await?;
        self.write_register(REG_TESTPA2, pa2).await
    }

    /// Poll the mode-ready flag with a fixed delay and an attempt ceiling.
    async fn wait_until_ready(&self) -> Result<(), RfmError> {
        for _ in 0..MAX_READY_POLLS {
            let flags = IrqFlags1::from_bits_retain(self.read_register(REG_IRQFLAGS1).await?);
            if flags.contains(IrqFlags1::MODE_READY) {
                return Ok(());
            }
            sleep(READY_POLL_DELAY).await;
        }
        Err(RfmError::Timeout("device ready"))
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Pulse the reset line: high for about a millisecond, low, then give
    /// the chip a few milliseconds to come back.
    async fn reset_radio(&self) -> Result<(), RfmError> {
        self.reset_line.write(true).await?;
        sleep(Duration::from_millis(1)).await;
        self.reset_line.write(false).await?;
        sleep(Duration::from_millis(5)).await;
        Ok(())
    }

    /// Confirm register communication by writing test patterns through a
    /// sync-value register and reading them back.
    async fn verify_sync(&self) -> Result<(), RfmError> {
        for pattern in [0xAAu8, 0x55] {
            let mut confirmed = false;
            for _ in 0..MAX_SYNC_ATTEMPTS {
                self.write_register(REG_SYNCVALUE1, pattern).await?;
                if self.read_register(REG_SYNCVALUE1).await? == pattern {
                    confirmed = true;
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
            if !confirmed {
                return Err(RfmError::InitFailed(format!(
                    "sync pattern 0x{pattern:02X} did not stick"
                )));
            }
        }
        Ok(())
    }

    /// Snapshot every configured register from the device. Runs before any
    /// configuration write so the mirror reflects the chip's own defaults.
    async fn load_readback(&self) -> Result<(), RfmError> {
        let addresses = self.store.lock().unwrap().configured_addresses();
        if addresses.is_empty() {
            warn!("no registers to read back");
            return Ok(());
        }
        for address in addresses {
            let value = self.read_register(address).await?;
            self.store
                .lock()
                .unwrap()
                .set(address, value, RegisterLayer::Readback);
        }
        Ok(())
    }

    /// Translate the application-facing configuration surface into runtime
    /// register overrides.
    fn apply_config(&self) -> Result<(), RfmError> {
        let key = self.config.encryption_key_bytes()?;
        let frf = self
            .config
            .frequency_mhz
            .map(frequency_preset)
            .transpose()?;

        let mut store = self.store.lock().unwrap();

        // AES key registers 0x3E..=0x4D, zeroed when encryption is off.
        let key_bytes = key.unwrap_or([0u8; 16]);
        for (offset, byte) in key_bytes.iter().enumerate() {
            store.set(REG_AESKEY1 + offset as u8, *byte, RegisterLayer::Runtime);
        }
        if key.is_some() {
            store.set(REG_PACKETCONFIG2, 0x01, RegisterLayer::Runtime);
        }

        if self.config.high_power {
            store.set(REG_OCP, 0x0F, RegisterLayer::Runtime);
            let level = store.get(REG_PALEVEL).unwrap_or(0);
            store.set(REG_PALEVEL, (level & 0x1F) | 0x40 | 0x20, RegisterLayer::Runtime);
        }

        if let Some(address) = self.config.node_address {
            store.set(REG_NODEADRS, address, RegisterLayer::Runtime);
        }
        if let Some(address) = self.config.broadcast_address {
            store.set(REG_BROADCASTADRS, address, RegisterLayer::Runtime);
        }

        if let Some([msb, mid, lsb]) = frf {
            store.set(REG_FRFMSB, msb, RegisterLayer::Runtime);
            store.set(REG_FRFMID, mid, RegisterLayer::Runtime);
            store.set(REG_FRFLSB, lsb, RegisterLayer::Runtime);
        }
        Ok(())
    }

    /// Write every merged register value out to the device.
    async fn configure(&self) -> Result<(), RfmError> {
        let entries = self.store.lock().unwrap().merged_entries();
        debug!("writing {} configuration registers", entries.len());
        for (address, value) in entries {
            self.write_register(address, value).await?;
        }
        Ok(())
    }

    /// Map the interrupt line to PayloadReady and enter receive mode.
    async fn enable_reception(&self) -> Result<(), RfmError> {
        let flags = IrqFlags2::from_bits_retain(self.read_register(REG_IRQFLAGS2).await?);
        if flags.contains(IrqFlags2::PAYLOAD_READY) {
            warn!("payload already pending while enabling reception");
        }
        self.write_register(REG_DIOMAPPING1, DIO_MAPPING_PAYLOAD_READY)
            .await?;
        self.change_mode(Mode::Receive).await
    }

    // ------------------------------------------------------------------
    // Interrupt dispatch
    // ------------------------------------------------------------------

    async fn dispatch_edges(shared: Arc<Self>, mut edges: mpsc::UnboundedReceiver<bool>) {
        debug!("interrupt dispatcher started");
        while let Some(level) = edges.recv().await {
            if !level {
                warn!("unexpected interrupt level");
                continue;
            }
            if let Err(err) = Self::handle_interrupt(&shared).await {
                error!("interrupt handling failed: {err}");
            }
        }
        debug!("interrupt dispatcher stopped");
    }

    /// Classify one edge. PacketSent wins over PayloadReady and only one
    /// of the two is acted on; anything else is logged and receive mode is
    /// re-armed.
    async fn handle_interrupt(shared: &Arc<Self>) -> Result<(), RfmError> {
        let flags = IrqFlags2::from_bits_retain(shared.read_register(REG_IRQFLAGS2).await?);
        if flags.contains(IrqFlags2::PACKET_SENT) {
            debug!("packet sent");
            shared.listeners.fire(IrqEvent::PacketSent);
        } else if flags.contains(IrqFlags2::PAYLOAD_READY) {
            debug!("payload ready");
            shared.listeners.fire(IrqEvent::PayloadReady);
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                if let Err(err) = DriverShared::receive_pipeline(&shared).await {
                    error!("receive pipeline failed: {err}");
                }
            });
        } else {
            warn!("interrupt with no known IRQ bit set ({flags:?})");
            shared.stats.lock().unwrap().unexpected_interrupts += 1;
            shared.change_mode(Mode::Receive).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Receive pipeline
    // ------------------------------------------------------------------

    /// Drain one inbound packet from the FIFO and run it through the
    /// protocol module. The radio goes back to receive mode no matter how
    /// decoding went.
    async fn receive_pipeline(shared: &Arc<Self>) -> Result<(), RfmError> {
        shared.change_mode(Mode::Standby).await?;

        let header = shared.bus.transfer(&[REG_FIFO & ADDRESS_MASK, 0]).await?;
        let length = header[1] as usize;
        let mut request = vec![0u8; length + 1];
        request[0] = REG_FIFO & ADDRESS_MASK;
        let response = shared.bus.transfer(&request).await?;
        let payload = response[1..].to_vec();
        debug!("received {length}-byte payload");
        shared.stats.lock().unwrap().packets_received += 1;

        match shared.protocol.handle_payload(payload).await {
            Ok(Some(message)) => shared.surface(message),
            Ok(None) => {} // protocol-internal, nothing to surface
            Err(RfmError::MalformedFrame(detail)) => {
                shared.stats.lock().unwrap().malformed_frames += 1;
                error!("malformed inbound frame: {detail}");
            }
            Err(err) => error!("protocol failed to handle payload: {err}"),
        }

        shared.change_mode(Mode::Receive).await
    }

    fn surface(&self, message: InboundMessage) {
        let mut guard = self.inbound.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(message).is_err() {
                    warn!("inbound subscriber dropped, discarding message");
                    *guard = None;
                }
            }
            None => warn!("message received but no subscriber registered"),
        }
    }

    // ------------------------------------------------------------------
    // Send pipeline
    // ------------------------------------------------------------------

    async fn send(shared: &Arc<Self>, message: &[u8]) -> Result<(), RfmError> {
        let original_mode = shared.detect_mode().await? & MODE_MASK;
        let frame = shared.protocol.prepare_payload(message);

        let (completion, resolved) = SendCompletion::channel();
        let outcome = match Self::attempt_send(shared, &frame, completion).await {
            Ok(()) => resolved.await.unwrap_or(Err(RfmError::Closed)),
            Err(err) => Err(err),
        };

        let restored = shared.change_mode_bits(original_mode).await;
        if let Err(err) = &restored {
            error!("could not restore mode after send attempt: {err}");
        }
        outcome.and(restored)
    }

    /// One bus-level transmission attempt for an already-framed payload.
    ///
    /// At most one attempt may be in flight per instance; a concurrent
    /// caller gets `SendBusy` instead of being queued. A failed attempt
    /// leaves the device forced to standby rather than in an unknown mode.
    async fn attempt_send(
        shared: &Arc<Self>,
        frame: &[u8],
        completion: SendCompletion,
    ) -> Result<(), RfmError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(RfmError::FrameTooLarge(frame.len()));
        }
        if shared.send_active.swap(true, Ordering::SeqCst) {
            return Err(RfmError::SendBusy);
        }
        let result = Self::run_send_attempt(shared, frame, completion).await;
        shared.send_active.store(false, Ordering::SeqCst);

        if result.is_err() {
            if let Err(recover) = shared.change_mode(Mode::Standby).await {
                warn!("could not force standby after failed send attempt: {recover}");
            }
        }
        result
    }

    async fn run_send_attempt(
        shared: &Arc<Self>,
        frame: &[u8],
        completion: SendCompletion,
    ) -> Result<(), RfmError> {
        shared.change_mode(Mode::Standby).await?;
        shared.wait_until_ready().await?;

        // Interrupt line means PacketSent while transmitting.
        shared
            .write_register(REG_DIOMAPPING1, DIO_MAPPING_PACKET_SENT)
            .await?;
        shared.write_fifo(frame).await?;

        let sent = shared.listeners.on_next(IrqEvent::PacketSent);
        shared.change_mode(Mode::Transmit).await?;

        match timeout(SEND_TIMEOUT, sent).await {
            Ok(Ok(())) => {
                shared.change_mode(Mode::Standby).await?;
                shared.stats.lock().unwrap().packets_sent += 1;

                let handled = shared.protocol.payload_sent(frame, completion).await;
                debug!(
                    "payload on air, protocol {} the completion",
                    if handled { "resolved" } else { "took over" }
                );

                // Interrupt line back to PayloadReady for listening.
                shared
                    .write_register(REG_DIOMAPPING1, DIO_MAPPING_PAYLOAD_READY)
                    .await?;
                shared.change_mode(Mode::Receive).await
            }
            Ok(Err(_)) => {
                // listener dropped: the queues were cleared underneath us
                Err(RfmError::SendTimeout)
            }
            Err(_) => {
                warn!("send attempt timed out after {SEND_TIMEOUT:?}");
                shared.stats.lock().unwrap().send_timeouts += 1;
                shared.listeners.clear();
                Err(RfmError::SendTimeout)
            }
        }
    }
}
