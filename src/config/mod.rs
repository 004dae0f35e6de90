mod loader;
mod types;

pub use loader::{parse_gdb_port, ConfigError};
pub use types::{Config, Peripheral, PeripheralSetting, UartConfig, UartMode};
