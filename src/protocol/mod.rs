//! Link-layer protocol modules.
//!
//! A protocol module owns framing and reliability policy for both
//! pipelines: it frames outbound payloads, decides what happens once the
//! radio reports a packet on the air, and decodes inbound payloads. Two
//! modules ship with the crate: a passthrough default and the LowPowerLab
//! ACK/retry protocol.

pub mod low_power_lab;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::config::ProtocolChoice;
use crate::error::RfmError;
use crate::radio::driver::DriverHandle;

pub use low_power_lab::LowPowerLabProtocol;

/// A decoded inbound message surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    /// Link-level sender address, when the protocol carries one.
    pub sender_id: Option<u8>,
    /// Link-level target address, when the protocol carries one.
    pub target_id: Option<u8>,
}

impl InboundMessage {
    /// A message with no link-level addressing.
    pub fn raw(payload: Vec<u8>) -> Self {
        Self {
            payload,
            sender_id: None,
            target_id: None,
        }
    }
}

/// One-shot completion for a logical send.
///
/// Cloneable so a protocol module can hold it across retransmissions; the
/// underlying channel fires at most once and later calls are no-ops.
#[derive(Clone)]
pub struct SendCompletion {
    tx: Arc<Mutex<Option<oneshot::Sender<Result<(), RfmError>>>>>,
}

impl SendCompletion {
    /// A completion and the receiver it resolves.
    pub fn channel() -> (Self, oneshot::Receiver<Result<(), RfmError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Resolve the send. Only the first call has any effect.
    pub fn complete(&self, result: Result<(), RfmError>) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(result);
        }
    }

    /// Whether the completion has already fired.
    pub fn is_resolved(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }
}

/// Framing and reliability policy plugged into the send/receive pipelines.
#[async_trait]
pub trait LinkProtocol: Send + Sync {
    /// Protocol name used in configuration and logs.
    fn name(&self) -> &'static str;

    /// Inject the handle of the owning driver. Called once while the
    /// driver is built; modules that never call back ignore it.
    fn bind(&self, _handle: DriverHandle) {}

    /// Register values contributed to the protocol layer of the store.
    fn register_defaults(&self) -> &[(u8, u8)] {
        &[]
    }

    /// Frame an application payload into the link-level frame written to
    /// the FIFO. The on-air length byte is added by the send pipeline.
    fn prepare_payload(&self, raw: &[u8]) -> Vec<u8>;

    /// Called once the radio reports `frame` on the air.
    ///
    /// Returns `true` when the hook resolved `completion` synchronously;
    /// `false` when the hook keeps the completion and resolves it later.
    /// In that case the hook's own timers own the outcome.
    async fn payload_sent(&self, frame: &[u8], completion: SendCompletion) -> bool;

    /// Decode one inbound payload. `Ok(None)` marks a protocol-internal
    /// frame that must not be surfaced to the application.
    async fn handle_payload(&self, raw: Vec<u8>) -> Result<Option<InboundMessage>, RfmError>;
}

/// Passthrough module: no framing, no reliability.
#[derive(Debug, Default)]
pub struct PassthroughProtocol;

#[async_trait]
impl LinkProtocol for PassthroughProtocol {
    fn name(&self) -> &'static str {
        "default"
    }

    fn prepare_payload(&self, raw: &[u8]) -> Vec<u8> {
        raw.to_vec()
    }

    async fn payload_sent(&self, _frame: &[u8], completion: SendCompletion) -> bool {
        completion.complete(Ok(()));
        true
    }

    async fn handle_payload(&self, raw: Vec<u8>) -> Result<Option<InboundMessage>, RfmError> {
        Ok(Some(InboundMessage::raw(raw)))
    }
}

/// Build the protocol module selected in the configuration.
pub fn for_choice(choice: &ProtocolChoice) -> Arc<dyn LinkProtocol> {
    match choice {
        ProtocolChoice::Default => Arc::new(PassthroughProtocol),
        ProtocolChoice::LowPowerLab { local_id, peer_id } => {
            Arc::new(LowPowerLabProtocol::new(*local_id, *peer_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_is_identity_in_both_directions() {
        let module = PassthroughProtocol;
        assert_eq!(module.prepare_payload(b"abc"), b"abc");

        let decoded = module.handle_payload(b"abc".to_vec()).await.unwrap();
        assert_eq!(decoded, Some(InboundMessage::raw(b"abc".to_vec())));
    }

    #[tokio::test]
    async fn passthrough_completes_synchronously() {
        let module = PassthroughProtocol;
        let (completion, resolved) = SendCompletion::channel();
        assert!(module.payload_sent(b"abc", completion).await);
        assert!(resolved.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn completion_fires_at_most_once() {
        let (completion, resolved) = SendCompletion::channel();
        completion.complete(Ok(()));
        completion.complete(Err(RfmError::SendTimeout));
        assert!(completion.is_resolved());
        assert!(resolved.await.unwrap().is_ok());
    }
}
