//! Error types for the UART bridge.
//!
//! Only [`BridgeError::DeviceSetup`] and [`BridgeError::AlreadyAttached`] are
//! returned to callers, both while bridges are being set up. The other variants
//! are built at the point of failure so they format consistently in logs,
//! then dropped.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::peripheral::UartId;

/// Which way a byte was travelling when the stream failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host peer towards the peripheral.
    Inbound,
    /// Peripheral towards the host peer.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "reading from the pty"),
            Direction::Outbound => write!(f, "writing to the pty"),
        }
    }
}

/// Errors produced by the UART bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Pty allocation or terminal mode configuration failed.
    #[error("{uart}: failed to {action}: {source}")]
    DeviceSetup {
        uart: UartId,
        action: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Read or write on the byte stream failed.
    #[error("{uart}: transfer failed while {direction}: {source}")]
    Transfer {
        uart: UartId,
        direction: Direction,
        #[source]
        source: io::Error,
    },

    /// Creating or removing the published symlink failed.
    #[error("{uart}: can't {action} alias {}: {source}", path.display())]
    Alias {
        uart: UartId,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The peripheral reported something the bridge cannot act on.
    #[error("{uart}: ignoring notification: {detail}")]
    ProtocolViolation { uart: UartId, detail: String },

    /// A second bridge was requested for a UART that already has one.
    #[error("{uart}: already bridged")]
    AlreadyAttached { uart: UartId },
}

impl BridgeError {
    pub(crate) fn device_setup(
        uart: UartId,
        action: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        BridgeError::DeviceSetup {
            uart,
            action,
            source: source.into(),
        }
    }

    /// True for errors that must abort bridge construction.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::DeviceSetup { .. } | BridgeError::AlreadyAttached { .. }
        )
    }
}
