use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::peripheral::{UartEvent, UartEvents, UartFlags, UartId, UartPort};

/// Receive FIFO depth.
pub const RX_FIFO_SIZE: usize = 64;

/// One USART as the firmware and the host see it.
pub struct Usart {
    id: UartId,
    rx: VecDeque<u8>,
    flags: UartFlags,
    subscriber: Option<mpsc::UnboundedSender<UartEvent>>,
}

impl Usart {
    pub fn new(id: UartId) -> Self {
        Self {
            id,
            rx: VecDeque::with_capacity(RX_FIFO_SIZE),
            flags: UartFlags::STDIO | UartFlags::POLL_SLEEP,
            subscriber: None,
        }
    }

    pub fn id(&self) -> UartId {
        self.id
    }

    /// Bytes waiting for the firmware.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Firmware reads the receive register.
    pub fn receive(&mut self) -> Option<u8> {
        let byte = self.rx.pop_front()?;
        self.notify(UartEvent::Xon);
        Some(byte)
    }

    /// Firmware writes the transmit register.
    pub fn transmit(&mut self, byte: u8) {
        if self.flags.contains(UartFlags::STDIO) {
            tracing::info!(target: "console", uart = %self.id, "{}", char::from(byte).escape_default());
        }
        self.notify(UartEvent::Transmit(u32::from(byte)));
    }

    pub fn reset(&mut self) {
        self.rx.clear();
        self.notify(UartEvent::Xon);
    }

    fn notify(&self, event: UartEvent) {
        if let Some(subscriber) = &self.subscriber {
            // A dropped receiver means the bridge is gone; nothing to tell.
            let _ = subscriber.send(event);
        }
    }
}

impl UartPort for Usart {
    fn subscribe(&mut self) -> UartEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriber = Some(tx);
        rx
    }

    fn inject(&mut self, byte: u8) {
        if self.rx.len() >= RX_FIFO_SIZE {
            tracing::warn!(uart = %self.id, byte, "receive overrun, byte lost");
            return;
        }
        self.rx.push_back(byte);
        if self.rx.len() == RX_FIFO_SIZE {
            self.notify(UartEvent::Xoff);
        }
    }

    fn flags(&self) -> UartFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: UartFlags) {
        self.flags = flags;
    }
}
