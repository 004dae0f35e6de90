//! The seam between the UART bridge and the emulation core.
//!
//! A core exposes each UART through [`UartPort`]. The bridge subscribes once
//! and receives [`UartEvent`]s for transmitted bytes and receive-buffer edges,
//! and pushes received bytes back with [`UartPort::inject`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use tokio::sync::mpsc;

/// Single character tag naming a UART instance, e.g. `'0'` or `'1'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UartId(char);

impl UartId {
    pub const fn new(tag: char) -> Self {
        Self(tag)
    }

    pub fn tag(self) -> char {
        self.0
    }

    /// Numeric index for digit tags.
    pub fn index(self) -> Option<usize> {
        self.0.to_digit(10).map(|digit| digit as usize)
    }
}

impl fmt::Display for UartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UART{}", self.0)
    }
}

bitflags! {
    /// Behaviour switches a core may apply to its UART model.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UartFlags: u32 {
        /// Sleep the core while firmware polls an empty receive register.
        const POLL_SLEEP = 1 << 0;
        /// Echo transmitted characters to the emulator's console.
        const STDIO = 1 << 1;
    }
}

/// Notification raised by a UART towards its subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartEvent {
    /// A character was shifted out. Carries the raw line value; anything
    /// above `0xff` is a frame wider than a byte.
    Transmit(u32),
    /// The receive buffer is full.
    Xoff,
    /// The receive buffer has room. May repeat without an intervening `Xoff`.
    Xon,
}

/// Receiving half of a UART subscription.
pub type UartEvents = mpsc::UnboundedReceiver<UartEvent>;

/// What the bridge needs from an emulated UART.
pub trait UartPort {
    /// Starts delivering notifications to a fresh channel. A second call
    /// replaces the previous subscriber.
    fn subscribe(&mut self) -> UartEvents;

    /// Hands a byte received from the host to the UART's input path.
    fn inject(&mut self, byte: u8);

    fn flags(&self) -> UartFlags;

    fn set_flags(&mut self, flags: UartFlags);
}

/// Shared handle to a UART. Only ever touched from the event loop thread.
pub type PortHandle = Rc<RefCell<dyn UartPort>>;
