//! Peer presence detection for one pty.
//!
//! A pty master cannot tell whether anything holds the peer side open until
//! it tries to read: no peer means the read fails with `EIO`. The monitor
//! turns those failures and successful reads into a connected flag, and
//! while disconnected it keeps the endpoint parked between periodic probes
//! so a permanently hung-up stream does not spin the event loop.

use std::rc::Rc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::idle::IdleDomain;
use crate::peripheral::UartId;

/// Time between reconnection probes while no peer is attached.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(4);

#[derive(Debug)]
pub struct ConnectionMonitor {
    uart: UartId,
    connected: bool,
    probe: Option<Interval>,
    idle: Rc<IdleDomain>,
}

impl ConnectionMonitor {
    /// Starts out disconnected with the probe armed. Must run inside a
    /// tokio runtime.
    pub fn new(uart: UartId, idle: Rc<IdleDomain>) -> Self {
        Self {
            uart,
            connected: false,
            probe: Some(arm_probe()),
            idle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True while the endpoint sits in the idle domain waiting for a probe.
    pub fn is_parked(&self) -> bool {
        self.idle.is_parked(self.uart)
    }

    pub fn probe_armed(&self) -> bool {
        self.probe.is_some()
    }

    /// Resolves at the next probe tick. Pends forever while no probe is
    /// armed. Cancel safe.
    pub async fn probe_due(&mut self) {
        match self.probe.as_mut() {
            Some(probe) => {
                probe.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Probe fired: bring the endpoint back so the next read can tell
    /// whether a peer has attached.
    pub fn on_probe(&mut self) {
        if self.idle.release(self.uart) {
            tracing::trace!(uart = %self.uart, "endpoint unparked for probe");
        }
    }

    /// A read delivered data. Returns true when this is a new connection.
    pub fn on_data(&mut self) -> bool {
        self.idle.release(self.uart);
        self.probe = None;
        let newly = !self.connected;
        self.connected = true;
        newly
    }

    /// A read failed without data. Returns true when this ends a connection.
    pub fn on_read_error(&mut self) -> bool {
        let lost = self.connected;
        if lost {
            self.connected = false;
            self.probe = Some(arm_probe());
        }
        self.idle.park(self.uart);
        lost
    }

    /// Stops probing and leaves the idle domain.
    pub fn cancel(&mut self) {
        self.probe = None;
        self.idle.release(self.uart);
    }
}

fn arm_probe() -> Interval {
    let mut probe = interval_at(Instant::now() + PROBE_INTERVAL, PROBE_INTERVAL);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
    probe
}
