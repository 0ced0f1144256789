//! Driver configuration surface.

use serde::{Deserialize, Serialize};

use crate::error::RfmError;

/// Frequency presets supported by the radio, as MHz and the three FRF
/// register bytes.
const FREQUENCY_PRESETS: &[(u16, [u8; 3])] = &[
    (433, [0x6C, 0x40, 0x00]),
    (868, [0xD9, 0x00, 0x00]),
    (915, [0xE4, 0xC0, 0x00]),
];

/// Resolve a frequency preset to its FRF register bytes.
pub fn frequency_preset(mhz: u16) -> Result<[u8; 3], RfmError> {
    FREQUENCY_PRESETS
        .iter()
        .find(|(preset, _)| *preset == mhz)
        .map(|(_, bytes)| *bytes)
        .ok_or_else(|| RfmError::Config(format!("unsupported frequency: {mhz} MHz")))
}

/// Link-layer protocol module selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "name")]
pub enum ProtocolChoice {
    /// Passthrough framing, no reliability.
    Default,
    /// LowPowerLab addressed frames with ACK and bounded retransmission.
    #[serde(rename_all = "camelCase")]
    LowPowerLab {
        /// Address this node claims in outbound frames.
        #[serde(default = "default_local_id")]
        local_id: u8,
        /// Peer address targeted by outbound frames.
        #[serde(default = "default_peer_id")]
        peer_id: u8,
    },
}

fn default_local_id() -> u8 {
    0x64
}

fn default_peer_id() -> u8 {
    0x11
}

/// Configuration for the RFM69 driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Rfm69Config {
    /// SPI bus index (0 for `/dev/spidev0.x`).
    pub spi_bus: u8,
    /// SPI device (chip select) index.
    pub spi_device: u8,
    /// GPIO pin of the interrupt line (default: 25).
    pub interrupt_pin: u8,
    /// GPIO pin of the radio reset line (default: 24).
    pub reset_pin: u8,
    /// Hardware AES key, exactly 16 bytes, or `None` to disable encryption.
    pub encryption_key: Option<String>,
    /// Drive the PA boost pins for +20 dBm output.
    pub high_power: bool,
    /// Device-level node address filter.
    pub node_address: Option<u8>,
    /// Device-level broadcast address filter.
    pub broadcast_address: Option<u8>,
    /// Carrier frequency preset in MHz (433, 868 or 915).
    pub frequency_mhz: Option<u16>,
    /// Log every register transfer at debug level.
    pub verbose: bool,
    /// Link-layer protocol module.
    pub protocol: ProtocolChoice,
}

impl Default for Rfm69Config {
    fn default() -> Self {
        Self {
            spi_bus: 0,
            spi_device: 0,
            interrupt_pin: 25,
            reset_pin: 24,
            encryption_key: None,
            high_power: false,
            node_address: None,
            broadcast_address: None,
            frequency_mhz: None,
            verbose: false,
            protocol: ProtocolChoice::Default,
        }
    }
}

impl Rfm69Config {
    /// Validate and return the AES key bytes, if any.
    pub(crate) fn encryption_key_bytes(&self) -> Result<Option<[u8; 16]>, RfmError> {
        match self.encryption_key.as_deref() {
            None | Some("") => Ok(None),
            Some(key) if key.len() == 16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(key.as_bytes());
                Ok(Some(bytes))
            }
            Some(key) => Err(RfmError::Config(format!(
                "encryption key must be exactly 16 bytes, got {}",
                key.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_presets_resolve() {
        assert_eq!(frequency_preset(433).unwrap(), [0x6C, 0x40, 0x00]);
        assert_eq!(frequency_preset(868).unwrap(), [0xD9, 0x00, 0x00]);
        assert_eq!(frequency_preset(915).unwrap(), [0xE4, 0xC0, 0x00]);
    }

    #[test]
    fn unknown_preset_is_a_config_error() {
        assert!(matches!(frequency_preset(900), Err(RfmError::Config(_))));
    }

    #[test]
    fn encryption_key_must_be_16_bytes() {
        let mut config = Rfm69Config {
            encryption_key: Some("1234567890123456".into()),
            ..Default::default()
        };
        assert_eq!(
            config.encryption_key_bytes().unwrap(),
            Some(*b"1234567890123456")
        );

        config.encryption_key = Some("short".into());
        assert!(config.encryption_key_bytes().is_err());

        config.encryption_key = None;
        assert_eq!(config.encryption_key_bytes().unwrap(), None);
    }

    #[test]
    fn config_deserializes_from_json() {
        let config: Rfm69Config = serde_json::from_str(
            r#"{
                "encryptionKey": "1234567890123456",
                "highPower": true,
                "nodeAddress": 1,
                "broadcastAddress": 155,
                "frequencyMhz": 915,
                "protocol": {"name": "lowPowerLab", "localId": 100, "peerId": 17}
            }"#,
        )
        .unwrap();

        assert!(config.high_power);
        assert_eq!(config.node_address, Some(1));
        assert_eq!(config.interrupt_pin, 25); // default survives
        assert_eq!(
            config.protocol,
            ProtocolChoice::LowPowerLab {
                local_id: 100,
                peer_id: 17
            }
        );
    }
}
