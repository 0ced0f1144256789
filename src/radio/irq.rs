//! IRQ listener queues.
//!
//! The interrupt dispatcher turns GPIO edges into one-shot notifications
//! keyed by the IRQ status bit that caused them. Listeners are registered
//! for the *next* occurrence of a bit; firing a bit drains its whole queue
//! atomically, so no listener can observe the same event twice.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::radio::registers::IrqFlags2;

/// IRQ status bits the dispatcher acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqEvent {
    /// A transmission left the FIFO and completed on air.
    PacketSent,
    /// A complete inbound packet is waiting in the FIFO.
    PayloadReady,
}

impl IrqEvent {
    /// The REG_IRQFLAGS2 bit backing this event.
    pub fn flag(self) -> IrqFlags2 {
        match self {
            IrqEvent::PacketSent => IrqFlags2::PACKET_SENT,
            IrqEvent::PayloadReady => IrqFlags2::PAYLOAD_READY,
        }
    }
}

/// One-shot listener queues keyed by IRQ bit.
///
/// Both queues are cleared together when a send attempt times out, so a
/// stale completion cannot fire after the caller was already told of the
/// failure.
#[derive(Default)]
pub(crate) struct ListenerTable {
    queues: Mutex<HashMap<IrqEvent, Vec<oneshot::Sender<()>>>>,
}

impl ListenerTable {
    /// Register a listener for the next occurrence of `event`.
    pub fn on_next(&self, event: IrqEvent) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.queues
            .lock()
            .unwrap()
            .entry(event)
            .or_default()
            .push(tx);
        rx
    }

    /// Fire `event`: notify and drop every queued listener. Returns how
    /// many listeners were drained.
    pub fn fire(&self, event: IrqEvent) -> usize {
        let drained = self
            .queues
            .lock()
            .unwrap()
            .remove(&event)
            .unwrap_or_default();
        let count = drained.len();
        for listener in drained {
            let _ = listener.send(());
        }
        count
    }

    /// Drop every listener for both bits.
    pub fn clear(&self) {
        self.queues.lock().unwrap().clear();
    }

    #[cfg(test)]
    fn pending(&self, event: IrqEvent) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(&event)
            .map_or(0, |queue| queue.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fire_drains_the_whole_queue() {
        let table = ListenerTable::default();
        let first = table.on_next(IrqEvent::PacketSent);
        let second = table.on_next(IrqEvent::PacketSent);
        assert_eq!(table.pending(IrqEvent::PacketSent), 2);

        assert_eq!(table.fire(IrqEvent::PacketSent), 2);
        first.await.unwrap();
        second.await.unwrap();

        // the queue is empty right after firing
        assert_eq!(table.pending(IrqEvent::PacketSent), 0);
        assert_eq!(table.fire(IrqEvent::PacketSent), 0);
    }

    #[tokio::test]
    async fn firing_one_bit_leaves_the_other_queue_alone() {
        let table = ListenerTable::default();
        let _sent = table.on_next(IrqEvent::PacketSent);
        let _ready = table.on_next(IrqEvent::PayloadReady);

        table.fire(IrqEvent::PacketSent);
        assert_eq!(table.pending(IrqEvent::PayloadReady), 1);
    }

    #[tokio::test]
    async fn clear_drops_listeners_for_both_bits() {
        let table = ListenerTable::default();
        let sent = table.on_next(IrqEvent::PacketSent);
        let ready = table.on_next(IrqEvent::PayloadReady);

        table.clear();
        assert!(sent.await.is_err());
        assert!(ready.await.is_err());
    }
}
