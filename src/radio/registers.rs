//! # RFM69 Register Definitions and Constants
//!
//! Register addresses, operating-mode bit patterns and IRQ flag definitions
//! for the HopeRF RFM69 transceiver, taken from the RFM69 datasheet.
//!
//! The chip exposes a 7-bit register address space. A bus request whose
//! address byte has the MSB set is a write (the second byte carries the
//! value); with the MSB clear it is a read. Register 0x00 is the FIFO:
//! multi-byte transfers at that address stream packet data instead of
//! touching configuration.

use bitflags::bitflags;

// =============================================================================
// Register addresses
// =============================================================================

/// FIFO read/write access register
pub const REG_FIFO: u8 = 0x00;

/// Operating mode selection
pub const REG_OPMODE: u8 = 0x01;

/// Data processing mode and modulation scheme
pub const REG_DATAMODUL: u8 = 0x02;

/// Bit rate setting (MSB)
pub const REG_BITRATEMSB: u8 = 0x03;

/// Bit rate setting (LSB)
pub const REG_BITRATELSB: u8 = 0x04;

/// Frequency deviation setting (MSB)
pub const REG_FDEVMSB: u8 = 0x05;

/// Frequency deviation setting (LSB)
pub const REG_FDEVLSB: u8 = 0x06;

/// RF carrier frequency setting (MSB)
pub const REG_FRFMSB: u8 = 0x07;

/// RF carrier frequency setting (MID)
pub const REG_FRFMID: u8 = 0x08;

/// RF carrier frequency setting (LSB)
pub const REG_FRFLSB: u8 = 0x09;

/// PA selection and output power control
pub const REG_PALEVEL: u8 = 0x11;

/// Over current protection control
pub const REG_OCP: u8 = 0x13;

/// Channel filter bandwidth control
pub const REG_RXBW: u8 = 0x19;

/// Mapping of pins DIO0 to DIO3
pub const REG_DIOMAPPING1: u8 = 0x25;

/// Mapping of pins DIO4 and DIO5, ClkOut frequency
pub const REG_DIOMAPPING2: u8 = 0x26;

/// Status register: PLL lock state, timeout, RSSI, mode ready
pub const REG_IRQFLAGS1: u8 = 0x27;

/// Status register: FIFO handling flags, PacketSent, PayloadReady
pub const REG_IRQFLAGS2: u8 = 0x28;

/// RSSI trigger level for RSSI interrupt
pub const REG_RSSITHRESH: u8 = 0x29;

/// Sync word recognition control
pub const REG_SYNCCONFIG: u8 = 0x2E;

/// Sync word byte 1 (also used for the startup communication check)
pub const REG_SYNCVALUE1: u8 = 0x2F;

/// Sync word byte 2
pub const REG_SYNCVALUE2: u8 = 0x30;

/// Packet mode settings
pub const REG_PACKETCONFIG1: u8 = 0x37;

/// Payload length (maximum length in variable-length mode)
pub const REG_PAYLOADLENGTH: u8 = 0x38;

/// Node address filter
pub const REG_NODEADRS: u8 = 0x39;

/// Broadcast address filter
pub const REG_BROADCASTADRS: u8 = 0x3A;

/// FIFO threshold, TX start condition
pub const REG_FIFOTHRESH: u8 = 0x3C;

/// Packet mode settings (AES enable, RX restart)
pub const REG_PACKETCONFIG2: u8 = 0x3D;

/// First of the 16 AES key registers (0x3E through 0x4D)
pub const REG_AESKEY1: u8 = 0x3E;

/// PA boost test register 1
pub const REG_TESTPA1: u8 = 0x5A;

/// PA boost test register 2
pub const REG_TESTPA2: u8 = 0x5C;

/// Fading margin improvement (continuous DAGC)
pub const REG_TESTDAGC: u8 = 0x6F;

// =============================================================================
// Addressing
// =============================================================================

/// Number of addressable configuration registers (7-bit address space).
pub const REGISTER_SPACE: usize = 0x80;

/// Mask for the 7-bit register address.
pub const ADDRESS_MASK: u8 = 0x7F;

/// MSB set on the address byte selects a register write.
pub const WRITE_MASK: u8 = 0x80;

/// Largest link frame that fits the 66-byte FIFO behind the length byte.
pub const MAX_FRAME_LEN: usize = 65;

// =============================================================================
// Operating modes
// =============================================================================

/// Mode bits occupy bits 4:2 of REG_OPMODE; all other bits of that register
/// are preserved across mode changes.
pub const MODE_MASK: u8 = 0x1C;

/// Operating modes of the transceiver, as REG_OPMODE bit patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    /// Lowest power consumption, registers retained
    Sleep = 0x00,
    /// Crystal oscillator running, ready for fast TX/RX transitions
    Standby = 0x04,
    /// PLL locked on the carrier frequency
    FrequencySynth = 0x08,
    /// Transmitting the FIFO contents
    Transmit = 0x0C,
    /// Listening for packets
    Receive = 0x10,
}

impl Mode {
    /// REG_OPMODE bit pattern for this mode.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Decode the mode bits of a raw REG_OPMODE value. Returns `None` for
    /// the reserved bit patterns.
    pub fn from_register(value: u8) -> Option<Mode> {
        match value & MODE_MASK {
            0x00 => Some(Mode::Sleep),
            0x04 => Some(Mode::Standby),
            0x08 => Some(Mode::FrequencySynth),
            0x0C => Some(Mode::Transmit),
            0x10 => Some(Mode::Receive),
            _ => None,
        }
    }
}

// =============================================================================
// DIO mapping
// =============================================================================

/// DIO0 reflects PacketSent while in transmit mode.
pub const DIO_MAPPING_PACKET_SENT: u8 = 0x00;

/// DIO0 reflects PayloadReady while in receive mode.
pub const DIO_MAPPING_PAYLOAD_READY: u8 = 0x40;

// =============================================================================
// PA boost pairs
// =============================================================================

/// RegTestPa1/RegTestPa2 pair selecting the +20 dBm boost for transmit.
pub const PA_BOOST_HIGH: (u8, u8) = (0x5D, 0x7C);

/// RegTestPa1/RegTestPa2 pair restoring normal operation for receive.
pub const PA_BOOST_LOW: (u8, u8) = (0x55, 0x70);

// =============================================================================
// IRQ flags
// =============================================================================

bitflags! {
    /// Status bits of REG_IRQFLAGS1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags1: u8 {
        const MODE_READY = 0x80;
        const RX_READY = 0x40;
        const TX_READY = 0x20;
        const PLL_LOCK = 0x10;
        const RSSI = 0x08;
        const TIMEOUT = 0x04;
        const AUTO_MODE = 0x02;
        const SYNC_ADDRESS_MATCH = 0x01;
    }
}

bitflags! {
    /// Status bits of REG_IRQFLAGS2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags2: u8 {
        const FIFO_FULL = 0x80;
        const FIFO_NOT_EMPTY = 0x40;
        const FIFO_LEVEL = 0x20;
        const FIFO_OVERRUN = 0x10;
        const PACKET_SENT = 0x08;
        const PAYLOAD_READY = 0x04;
        const CRC_OK = 0x02;
        const LOW_BAT = 0x01;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bits_round_trip() {
        for mode in [
            Mode::Sleep,
            Mode::Standby,
            Mode::FrequencySynth,
            Mode::Transmit,
            Mode::Receive,
        ] {
            // decoding tolerates non-mode bits being set
            assert_eq!(Mode::from_register(mode.bits() | 0x83), Some(mode));
        }
        assert_eq!(Mode::from_register(0x14), None);
    }

    #[test]
    fn irq_flag_positions() {
        assert_eq!(IrqFlags1::MODE_READY.bits(), 0x80);
        assert_eq!(IrqFlags2::PACKET_SENT.bits(), 0x08);
        assert_eq!(IrqFlags2::PAYLOAD_READY.bits(), 0x04);
    }
}
