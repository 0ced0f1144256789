//! Layered mirror of the device register file.

use crate::radio::registers::{ADDRESS_MASK, REGISTER_SPACE};

/// Precedence layers of the register mirror, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterLayer {
    /// Values read back from the device at startup.
    Readback,
    /// Defaults supplied by the active protocol module.
    Protocol,
    /// Overrides set through the configuration surface.
    Runtime,
}

/// In-memory register mirror merged from three layers.
///
/// The effective value of an address is the one in the highest-precedence
/// layer that defines it: runtime overrides beat protocol defaults, which
/// beat the readback snapshot. Each address holds at most one value in the
/// merged view.
#[derive(Debug)]
pub struct RegisterStore {
    readback: [Option<u8>; REGISTER_SPACE],
    protocol: [Option<u8>; REGISTER_SPACE],
    runtime: [Option<u8>; REGISTER_SPACE],
}

impl RegisterStore {
    pub fn new() -> Self {
        Self {
            readback: [None; REGISTER_SPACE],
            protocol: [None; REGISTER_SPACE],
            runtime: [None; REGISTER_SPACE],
        }
    }

    /// Define `address` in the given layer.
    pub fn set(&mut self, address: u8, value: u8, layer: RegisterLayer) {
        let slot = (address & ADDRESS_MASK) as usize;
        let layer = match layer {
            RegisterLayer::Readback => &mut self.readback,
            RegisterLayer::Protocol => &mut self.protocol,
            RegisterLayer::Runtime => &mut self.runtime,
        };
        layer[slot] = Some(value);
    }

    /// Effective value for `address`, if any layer defines it.
    pub fn get(&self, address: u8) -> Option<u8> {
        let slot = (address & ADDRESS_MASK) as usize;
        self.runtime[slot]
            .or(self.protocol[slot])
            .or(self.readback[slot])
    }

    /// Last device-reported value for `address`.
    pub fn readback(&self, address: u8) -> Option<u8> {
        self.readback[(address & ADDRESS_MASK) as usize]
    }

    /// Addresses defined by the protocol or runtime layers, ascending.
    ///
    /// These are the registers read back at startup and written out by the
    /// configuration pass.
    pub fn configured_addresses(&self) -> Vec<u8> {
        (0..REGISTER_SPACE)
            .filter(|&slot| self.protocol[slot].is_some() || self.runtime[slot].is_some())
            .map(|slot| slot as u8)
            .collect()
    }

    /// Merged `(address, value)` pairs for every configured address.
    pub fn merged_entries(&self) -> Vec<(u8, u8)> {
        self.configured_addresses()
            .into_iter()
            .filter_map(|address| self.get(address).map(|value| (address, value)))
            .collect()
    }
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_store_has_no_values() {
        let store = RegisterStore::new();
        assert_eq!(store.get(0x01), None);
        assert!(store.configured_addresses().is_empty());
    }

    #[test]
    fn layers_merge_in_precedence_order() {
        let mut store = RegisterStore::new();
        store.set(0x2F, 0x01, RegisterLayer::Readback);
        assert_eq!(store.get(0x2F), Some(0x01));

        store.set(0x2F, 0x2D, RegisterLayer::Protocol);
        assert_eq!(store.get(0x2F), Some(0x2D));

        store.set(0x2F, 0xAA, RegisterLayer::Runtime);
        assert_eq!(store.get(0x2F), Some(0xAA));

        // the snapshot is still visible through the dedicated accessor
        assert_eq!(store.readback(0x2F), Some(0x01));
    }

    #[test]
    fn readback_never_shadows_protocol_defaults() {
        let mut store = RegisterStore::new();
        store.set(0x37, 0x90, RegisterLayer::Protocol);
        store.set(0x37, 0x00, RegisterLayer::Readback);
        assert_eq!(store.get(0x37), Some(0x90));
    }

    #[test]
    fn merged_entries_cover_protocol_and_runtime_addresses() {
        let mut store = RegisterStore::new();
        store.set(0x01, 0x04, RegisterLayer::Protocol);
        store.set(0x39, 0x07, RegisterLayer::Runtime);
        store.set(0x10, 0x24, RegisterLayer::Readback);
        assert_eq!(store.merged_entries(), vec![(0x01, 0x04), (0x39, 0x07)]);
    }

    proptest! {
        // A runtime override wins for every address and value, no matter
        // what the other layers hold.
        #[test]
        fn runtime_overrides_always_win(
            address in 0u8..0x80,
            value: u8,
            shadow: u8,
        ) {
            let mut store = RegisterStore::new();
            store.set(address, shadow, RegisterLayer::Readback);
            store.set(address, shadow.wrapping_add(1), RegisterLayer::Protocol);
            store.set(address, value, RegisterLayer::Runtime);
            prop_assert_eq!(store.get(address), Some(value));
        }
    }
}
