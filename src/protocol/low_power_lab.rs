//! LowPowerLab-compatible addressed frames with ACK and bounded retry.
//!
//! Outbound frames carry `[target][sender][control]` ahead of the message.
//! Data frames request an acknowledgement (control bit 0x40) and are
//! retransmitted on a one-second timer until the matching ACK (control bit
//! 0x80) arrives or five total attempts have gone out. Inbound data frames
//! that request an acknowledgement are answered before the message is
//! surfaced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::error::RfmError;
use crate::protocol::{InboundMessage, LinkProtocol, SendCompletion};
use crate::radio::driver::DriverHandle;

/// Control bit marking a frame as an acknowledgement.
pub const CONTROL_ACK: u8 = 0x80;

/// Control bit requesting an acknowledgement from the receiver.
pub const CONTROL_ACK_REQUESTED: u8 = 0x40;

/// Total attempts (first send plus retransmissions) per frame.
pub const MAX_SEND_ATTEMPTS: u8 = 5;

/// Delay before an unacknowledged frame goes out again.
pub const RETRANSMIT_DELAY: Duration = Duration::from_secs(1);

/// Register profile of a LowPowerLab network: 55.55 kbps FSK, sync word
/// 0x2D plus network id 100, CRC on, variable-length packets, RSSI
/// threshold -110 dBm.
const REGISTER_DEFAULTS: &[(u8, u8)] = &[
    (0x01, 0b0000_0100),
    (0x02, 0b0000_0000),
    (0x03, 0b0000_0010),
    (0x04, 0b0100_0000),
    (0x05, 0b0000_0011),
    (0x06, 0b0011_0011),
    (0x07, 0xE4),
    (0x08, 0xC0),
    (0x09, 0x00),
    (0x19, 0b0100_0010),
    (0x25, 0b0100_0000),
    (0x26, 0b0000_0111),
    (0x28, 0b0001_0000),
    (0x29, 220),
    (0x2E, 0b1000_1000),
    (0x2F, 0x2D),
    (0x30, 100),
    (0x37, 0b1001_0000),
    (0x38, 66),
    (0x3C, 0b1000_1111),
    (0x3D, 0b0001_0010),
    (0x5A, 0b0101_0101),
    (0x5C, 0b0111_0000),
    (0x6F, 0x30),
];

struct PendingSend {
    /// Attempts that have gone out for this frame so far.
    attempts: u8,
    completion: SendCompletion,
    timer: JoinHandle<()>,
}

type PendingTable = Arc<Mutex<HashMap<Bytes, PendingSend>>>;

/// LowPowerLab protocol module.
///
/// All retry state is per instance: two drivers in one process each carry
/// their own pending table and cannot interfere.
pub struct LowPowerLabProtocol {
    local_id: u8,
    peer_id: u8,
    handle: OnceCell<DriverHandle>,
    pending: PendingTable,
}

impl LowPowerLabProtocol {
    pub fn new(local_id: u8, peer_id: u8) -> Self {
        Self {
            local_id,
            peer_id,
            handle: OnceCell::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn handle(&self) -> Result<DriverHandle, RfmError> {
        self.handle.get().cloned().ok_or(RfmError::Closed)
    }

    /// Resolve the pending frame addressed to `sender`, cancelling its
    /// retransmit timer. Returns false when nothing matched.
    fn complete_pending_for(&self, sender: u8) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let key = pending
            .keys()
            .find(|key| key.first() == Some(&sender))
            .cloned();
        match key.and_then(|key| pending.remove(&key)) {
            Some(entry) => {
                entry.timer.abort();
                entry.completion.complete(Ok(()));
                true
            }
            None => false,
        }
    }

    /// Arm (or re-arm) the retransmit timer for `frame`, carrying the
    /// attempt count across retransmissions. The entry is created on the
    /// first attempt.
    fn arm_retransmit(&self, handle: DriverHandle, frame: Bytes, completion: SendCompletion) {
        if completion.is_resolved() {
            // the ACK overtook this attempt while it was on air
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        let attempts = match pending.remove(&frame) {
            Some(previous) => {
                previous.timer.abort();
                previous.attempts
            }
            None => 1,
        };
        let timer = tokio::spawn(Self::retransmit_after(
            Arc::clone(&self.pending),
            handle,
            frame.clone(),
            completion.clone(),
        ));
        pending.insert(
            frame,
            PendingSend {
                attempts,
                completion,
                timer,
            },
        );
    }

    async fn retransmit_after(
        pending: PendingTable,
        handle: DriverHandle,
        frame: Bytes,
        completion: SendCompletion,
    ) {
        sleep(RETRANSMIT_DELAY).await;

        let attempts = {
            let mut table = pending.lock().unwrap();
            let Some(entry) = table.get_mut(&frame) else {
                // acknowledged or torn down in the meantime
                return;
            };
            entry.attempts += 1;
            if entry.attempts > MAX_SEND_ATTEMPTS {
                let entry = table.remove(&frame).unwrap();
                drop(table);
                warn!(
                    "giving up on frame {} after {MAX_SEND_ATTEMPTS} attempts",
                    hex::encode(&frame)
                );
                entry.completion.complete(Err(RfmError::AckExhausted {
                    attempts: MAX_SEND_ATTEMPTS,
                    key: hex::encode(&frame),
                }));
                return;
            }
            entry.attempts
        };

        debug!(
            "retransmitting frame {} (attempt {attempts})",
            hex::encode(&frame)
        );
        if let Err(err) = handle.attempt_send(&frame, completion.clone()).await {
            // a bus-level failure of a retransmission is terminal
            pending.lock().unwrap().remove(&frame);
            completion.complete(Err(err));
        }
    }
}

#[async_trait]
impl LinkProtocol for LowPowerLabProtocol {
    fn name(&self) -> &'static str {
        "lowPowerLab"
    }

    fn bind(&self, handle: DriverHandle) {
        let _ = self.handle.set(handle);
    }

    fn register_defaults(&self) -> &[(u8, u8)] {
        REGISTER_DEFAULTS
    }

    fn prepare_payload(&self, raw: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(raw.len() + 3);
        frame.extend_from_slice(&[self.peer_id, self.local_id, CONTROL_ACK_REQUESTED]);
        frame.extend_from_slice(raw);
        frame
    }

    async fn payload_sent(&self, frame: &[u8], completion: SendCompletion) -> bool {
        if frame.get(2).is_some_and(|control| control & CONTROL_ACK != 0) {
            // outbound ACKs are fire-and-forget, never retried
            completion.complete(Ok(()));
            return true;
        }

        match self.handle() {
            Ok(handle) => {
                self.arm_retransmit(handle, Bytes::copy_from_slice(frame), completion);
                false
            }
            Err(err) => {
                completion.complete(Err(err));
                true
            }
        }
    }

    async fn handle_payload(&self, raw: Vec<u8>) -> Result<Option<InboundMessage>, RfmError> {
        if raw.len() < 3 {
            return Err(RfmError::MalformedFrame(format!(
                "frame of {} bytes is shorter than the header",
                raw.len()
            )));
        }
        let target_id = raw[0];
        let sender_id = raw[1];
        let control = raw[2];

        if control & CONTROL_ACK != 0 {
            debug!("ack from node {sender_id}");
            if !self.complete_pending_for(sender_id) {
                warn!("ack from node {sender_id} matches no pending frame");
            }
            return Ok(None);
        }

        if control & CONTROL_ACK_REQUESTED != 0 {
            // answer before the message is surfaced
            let ack = [sender_id, self.local_id, CONTROL_ACK];
            let (completion, resolved) = SendCompletion::channel();
            self.handle()?.attempt_send(&ack, completion).await?;
            resolved.await.map_err(|_| RfmError::Closed)??;

            return Ok(Some(InboundMessage {
                payload: raw[3..].to_vec(),
                sender_id: Some(sender_id),
                target_id: Some(target_id),
            }));
        }

        Err(RfmError::MalformedFrame(format!(
            "control byte 0x{control:02X} in frame {}",
            hex::encode(&raw)
        )))
    }
}

impl Drop for LowPowerLabProtocol {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap();
        for (_, entry) in pending.drain() {
            entry.timer.abort();
            entry.completion.complete(Err(RfmError::Closed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_payload_prepends_the_three_byte_header() {
        let module = LowPowerLabProtocol::new(0x64, 0x11);
        let frame = module.prepare_payload(b"abc");
        assert_eq!(&frame[..3], &[0x11, 0x64, CONTROL_ACK_REQUESTED]);
        // stripping the header yields exactly the original message
        assert_eq!(&frame[3..], b"abc");
    }

    #[test]
    fn register_defaults_carry_the_network_profile() {
        let module = LowPowerLabProtocol::new(0x64, 0x11);
        let defaults = module.register_defaults();
        assert!(defaults.contains(&(0x2F, 0x2D))); // sync word
        assert!(defaults.contains(&(0x30, 100))); // network id
        assert!(defaults.contains(&(0x38, 66))); // max payload length
    }

    #[tokio::test]
    async fn short_frame_is_malformed() {
        let module = LowPowerLabProtocol::new(0x64, 0x11);
        let result = module.handle_payload(vec![0x64, 0x11]).await;
        assert!(matches!(result, Err(RfmError::MalformedFrame(_))));
    }

    #[tokio::test]
    async fn ack_with_no_pending_frame_is_internal() {
        let module = LowPowerLabProtocol::new(0x64, 0x11);
        let decoded = module
            .handle_payload(vec![0x64, 0x11, CONTROL_ACK])
            .await
            .unwrap();
        assert_eq!(decoded, None);
    }
}
