use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use super::usart::Usart;
use crate::peripheral::{PortHandle, UartId};
use crate::shutdown::ShutdownHandle;

/// Bytes the firmware handles per USART in one slice.
pub const SLICE_BYTES: usize = 8;

/// Time between slices. The runtime services the ptys in between.
pub const SLICE_PERIOD: Duration = Duration::from_millis(1);

/// Two USARTs and an echo loop in place of real firmware.
pub struct Board {
    usarts: Vec<Rc<RefCell<Usart>>>,
}

impl Board {
    pub fn new() -> Self {
        let usarts = ['0', '1']
            .into_iter()
            .map(|tag| Rc::new(RefCell::new(Usart::new(UartId::new(tag)))))
            .collect();
        Self { usarts }
    }

    pub fn uarts(&self) -> Vec<UartId> {
        self.usarts.iter().map(|usart| usart.borrow().id()).collect()
    }

    pub fn usart(&self, id: UartId) -> Option<Rc<RefCell<Usart>>> {
        self.usarts
            .iter()
            .find(|usart| usart.borrow().id() == id)
            .cloned()
    }

    /// The USART as a bridge sees it.
    pub fn port(&self, id: UartId) -> Option<PortHandle> {
        let port: PortHandle = self.usart(id)?;
        Some(port)
    }

    /// Runs one slice of firmware. Returns how many bytes were echoed.
    pub fn step(&self) -> usize {
        let mut echoed = 0;
        for usart in &self.usarts {
            let mut usart = usart.borrow_mut();
            for _ in 0..SLICE_BYTES {
                let Some(byte) = usart.receive() else {
                    break;
                };
                usart.transmit(byte);
                echoed += 1;
            }
        }
        echoed
    }

    pub fn reset(&self) {
        tracing::info!("board reset");
        for usart in &self.usarts {
            usart.borrow_mut().reset();
        }
    }

    /// Steps until `shutdown` fires.
    pub async fn run(&self, shutdown: &ShutdownHandle) {
        let mut slices = interval(SLICE_PERIOD);
        slices.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = slices.tick() => {
                    self.step();
                }
            }
        }
        tracing::debug!("board stopped");
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}
