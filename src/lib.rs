//! drumfish: host-side glue for an emulated ATmega128RFA1.
//!
//! The interesting part is [`bridge`], which exposes each emulated UART as a
//! pseudo-terminal while honoring the peripheral's XON/XOFF flow control.

pub mod args;
pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod peripheral;
pub mod pty;
pub mod shutdown;
pub mod sim;

pub use error::BridgeError;
