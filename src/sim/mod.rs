//! Behavioral stand-in for the emulated board.
//!
//! Enough of an ATmega128RFA1 to exercise the bridges end to end: two USARTs
//! with receive FIFOs, and firmware that echoes whatever it receives.

mod board;
mod usart;

pub use board::{Board, SLICE_BYTES, SLICE_PERIOD};
pub use usart::{Usart, RX_FIFO_SIZE};
