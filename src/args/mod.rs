//! Command line handling.
//!
//! ```text
//! argv → Cli (clap) → overlay onto file Config → validate → Config
//! ```

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::{parse_gdb_port, Config, ConfigError, PeripheralSetting};

#[derive(Debug, Parser)]
#[command(
    name = "drumfish",
    version,
    about = "ATmega128RFA1 emulator with UARTs exposed as pseudo-terminals",
    after_help = "Peripheral values: 'off' disables host access, 'on' publishes \
                  /tmp/drumfish-$PID-uartN, anything else is used as the alias path.\n\
                  Defaults: uart0=off, uart1=on"
)]
pub struct Cli {
    /// Configures a peripheral (uart0, uart1) as NAME=VALUE
    #[arg(short = 'p', long = "peripheral", value_name = "NAME=VALUE", value_parser = parse_peripheral)]
    pub peripherals: Vec<PeripheralSetting>,

    /// Port for the GDB stub (1024 < port <= 65535)
    #[arg(short = 'g', long = "gdb", value_name = "PORT", value_parser = parse_gdb_port)]
    pub gdb: Option<u16>,

    /// Radio MAC address
    #[arg(short = 'm', long = "mac", value_name = "MAC")]
    pub mac: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase verbosity of messages
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

fn parse_peripheral(arg: &str) -> Result<PeripheralSetting, ConfigError> {
    arg.parse()
}

impl Cli {
    /// Builds the effective configuration: file first, flags on top.
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let base = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        self.overlay(base)
    }

    /// Applies command line values over `config` and validates the result.
    pub fn overlay(self, mut config: Config) -> Result<Config, ConfigError> {
        for setting in self.peripherals {
            config.uart.set(setting.peripheral, setting.mode);
        }
        if let Some(port) = self.gdb {
            config.gdb_port = Some(port);
        }
        if let Some(mac) = self.mac {
            config.mac = Some(mac);
        }
        if self.verbose > 0 {
            config.verbose = self.verbose;
        }
        config.validate()?;
        Ok(config)
    }
}
