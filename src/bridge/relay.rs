//! Flow-control state for one UART.

use std::collections::VecDeque;

/// Whether the peripheral currently accepts received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Room in the receive buffer; bytes may be injected.
    Open,
    /// Receive buffer full; bytes wait on the host side.
    Gated,
}

/// Moves host bytes towards the peripheral under XON/XOFF control.
///
/// Bytes read from the pty wait in `inbound` and leave it one at a time
/// through [`Relay::next_inbound`], so a gate change between two injections
/// takes effect before the next one.
#[derive(Debug)]
pub struct Relay {
    gate: Gate,
    reading: bool,
    inbound: VecDeque<u8>,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            gate: Gate::Open,
            reading: true,
            inbound: VecDeque::new(),
        }
    }

    pub fn gate(&self) -> Gate {
        self.gate
    }

    /// True while reads from the pty are enabled.
    pub fn is_reading(&self) -> bool {
        self.reading
    }

    /// Receive buffer full. Returns true if the gate was open.
    pub fn xoff(&mut self) -> bool {
        let was_open = self.gate == Gate::Open;
        self.gate = Gate::Gated;
        self.reading = false;
        was_open
    }

    /// Receive buffer has room. Returns true if the gate was closed.
    pub fn xon(&mut self) -> bool {
        let was_gated = self.gate == Gate::Gated;
        self.gate = Gate::Open;
        self.reading = true;
        was_gated
    }

    /// Re-enables pty reads without touching the gate.
    pub fn resume_reading(&mut self) {
        self.reading = true;
    }

    pub fn pause_reading(&mut self) {
        self.reading = false;
    }

    /// Queues bytes read from the host.
    pub fn accept(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Next byte that may go to the peripheral, if any may go right now.
    pub fn next_inbound(&mut self, peer_connected: bool) -> Option<u8> {
        if self.gate == Gate::Gated || !peer_connected {
            return None;
        }
        self.inbound.pop_front()
    }

    /// Bytes waiting for the gate.
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    /// Drops everything queued. Returns how many bytes were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.inbound.len();
        self.inbound.clear();
        discarded
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}
