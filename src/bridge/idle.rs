use std::cell::RefCell;
use std::collections::BTreeSet;

use crate::peripheral::UartId;

/// Parking area for endpoints whose peer has gone away.
///
/// A pty master with no peer is permanently readable (hangup), so a parked
/// endpoint is left out of the event loop until its next probe. One domain is
/// shared by every bridge of a controller; it lives while any bridge holds it.
#[derive(Debug, Default)]
pub struct IdleDomain {
    parked: RefCell<BTreeSet<UartId>>,
}

impl IdleDomain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the UART was already parked.
    pub fn park(&self, uart: UartId) -> bool {
        self.parked.borrow_mut().insert(uart)
    }

    /// Returns false if the UART was not parked.
    pub fn release(&self, uart: UartId) -> bool {
        self.parked.borrow_mut().remove(&uart)
    }

    pub fn is_parked(&self, uart: UartId) -> bool {
        self.parked.borrow().contains(&uart)
    }

    pub fn parked(&self) -> Vec<UartId> {
        self.parked.borrow().iter().copied().collect()
    }
}
