use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::loader::ConfigError;
use crate::peripheral::UartId;

/// Root configuration container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// How each UART is exposed to the host.
    #[serde(default)]
    pub uart: UartConfig,
    /// Port requested for the GDB stub.
    #[serde(default)]
    pub gdb_port: Option<u16>,
    /// Radio MAC address, `xx:xx:xx:xx:xx:xx`.
    #[serde(default)]
    pub mac: Option<String>,
    /// Log verbosity, 0 (errors only) to 4 (per-byte tracing).
    #[serde(default)]
    pub verbose: u8,
}

/// Per-UART host exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UartConfig {
    #[serde(default = "default_uart0")]
    pub uart0: UartMode,
    #[serde(default = "default_uart1")]
    pub uart1: UartMode,
}

fn default_uart0() -> UartMode {
    UartMode::Disabled
}

fn default_uart1() -> UartMode {
    UartMode::Auto
}

impl UartConfig {
    /// Every UART of the board with its configured mode, in board order.
    pub fn modes(&self) -> [(UartId, &UartMode); 2] {
        [
            (Peripheral::Uart0.uart_id(), &self.uart0),
            (Peripheral::Uart1.uart_id(), &self.uart1),
        ]
    }

    pub fn set(&mut self, peripheral: Peripheral, mode: UartMode) {
        match peripheral {
            Peripheral::Uart0 => self.uart0 = mode,
            Peripheral::Uart1 => self.uart1 = mode,
        }
    }
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            uart0: default_uart0(),
            uart1: default_uart1(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uart: UartConfig::default(),
            gdb_port: None,
            mac: None,
            verbose: 0,
        }
    }
}

/// How a UART is exposed on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UartMode {
    /// `off`: no pty. The MCU can still drive the UART.
    Disabled,
    /// `on`: pty plus an alias at `/tmp/drumfish-<pid>-uart<N>`.
    Auto,
    /// Any other value: pty plus an alias at this path.
    Path(PathBuf),
}

impl FromStr for UartMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" => Err(ConfigError::ValidationError {
                message: "UART value must be 'off', 'on' or a path".to_string(),
            }),
            "off" => Ok(UartMode::Disabled),
            "on" => Ok(UartMode::Auto),
            path => Ok(UartMode::Path(PathBuf::from(path))),
        }
    }
}

impl TryFrom<String> for UartMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UartMode> for String {
    fn from(mode: UartMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for UartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UartMode::Disabled => write!(f, "off"),
            UartMode::Auto => write!(f, "on"),
            UartMode::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Peripherals that can be configured from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peripheral {
    Uart0,
    Uart1,
}

impl Peripheral {
    pub fn uart_id(self) -> UartId {
        match self {
            Peripheral::Uart0 => UartId::new('0'),
            Peripheral::Uart1 => UartId::new('1'),
        }
    }
}

impl FromStr for Peripheral {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "uart0" => Ok(Peripheral::Uart0),
            "uart1" => Ok(Peripheral::Uart1),
            other => Err(ConfigError::UnknownPeripheral(other.to_string())),
        }
    }
}

/// One `name=value` peripheral assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralSetting {
    pub peripheral: Peripheral,
    pub mode: UartMode,
}

impl FromStr for PeripheralSetting {
    type Err = ConfigError;

    fn from_str(arg: &str) -> Result<Self, Self::Err> {
        let (name, value) = arg
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedPeripheral(arg.to_string()))?;
        Ok(Self {
            peripheral: name.parse()?,
            mode: value.parse()?,
        })
    }
}
