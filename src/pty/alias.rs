//! Stable symlinks pointing at dynamically numbered pty devices.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::config::UartMode;
use crate::error::BridgeError;
use crate::peripheral::UartId;

/// Directory for aliases published in `on` mode.
pub const ALIAS_DIR: &str = "/tmp";

/// Alias location for a UART, `None` when the UART is disabled.
pub fn alias_for(mode: &UartMode, uart: UartId) -> Option<PathBuf> {
    match mode {
        UartMode::Disabled => None,
        UartMode::Auto => Some(default_alias(uart, std::process::id())),
        UartMode::Path(path) => Some(path.clone()),
    }
}

/// `/tmp/drumfish-<pid>-uart<N>`
pub fn default_alias(uart: UartId, pid: u32) -> PathBuf {
    Path::new(ALIAS_DIR).join(format!("drumfish-{}-uart{}", pid, uart.tag()))
}

/// A symlink this process created.
#[derive(Debug)]
pub struct Alias {
    uart: UartId,
    path: PathBuf,
    target: PathBuf,
}

impl Alias {
    /// Replaces whatever sits at `path` with a link to `target`.
    pub fn publish(uart: UartId, path: &Path, target: &Path) -> Result<Self, BridgeError> {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(%uart, path = %path.display(), "removed stale alias"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            // symlink() below reports the real problem
            Err(err) => tracing::debug!(%uart, path = %path.display(), "can't remove old alias: {err}"),
        }

        symlink(target, path).map_err(|source| BridgeError::Alias {
            uart,
            action: "create",
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            uart,
            path: path.to_path_buf(),
            target: target.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the link, unless something else has replaced it since.
    pub fn remove(self) -> Result<(), BridgeError> {
        let failed = |source| BridgeError::Alias {
            uart: self.uart,
            action: "remove",
            path: self.path.clone(),
            source,
        };

        match fs::read_link(&self.path) {
            Ok(dest) if dest == self.target => match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(failed(err)),
            },
            Ok(_) => {
                tracing::debug!(uart = %self.uart, path = %self.path.display(), "alias now points elsewhere; leaving it");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => {
                tracing::debug!(uart = %self.uart, path = %self.path.display(), "alias replaced by a regular file; leaving it");
                Ok(())
            }
            Err(err) => Err(failed(err)),
        }
    }
}
