//! UART to host pty bridging.
//!
//! ```text
//!   UartPort ──Transmit──▶ Bridge ──write──▶ Endpoint ──▶ peer
//!   UartPort ◀──inject──── Relay  ◀──read─── Endpoint ◀── peer
//!            ──Xoff/Xon──▶ Relay gate
//! ```
//!
//! One [`Bridge`] per enabled UART, all owned by a [`BridgeController`] and
//! driven from the same current-thread runtime as the emulated board.

mod idle;
mod monitor;
mod relay;

pub use idle::IdleDomain;
pub use monitor::{ConnectionMonitor, PROBE_INTERVAL};
pub use relay::{Gate, Relay};

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::Poll;

use crate::config::UartMode;
use crate::error::{BridgeError, Direction};
use crate::peripheral::{PortHandle, UartEvent, UartEvents, UartFlags, UartId};
use crate::pty::{alias_for, Alias, Endpoint, FlushOutcome, ReadOutcome};
use crate::shutdown::ShutdownHandle;

const READ_CHUNK: usize = 256;

/// Transmitted bytes held while the pty is not accepting writes. Older bytes
/// win once it fills.
const OUTBOUND_LIMIT: usize = 4096;

/// What woke a bridge up.
enum Wake {
    Event(Option<UartEvent>),
    Read(ReadOutcome),
    Flushed(FlushOutcome),
    Probe,
}

/// Everything a live bridge owns. Dropped as a unit on teardown.
struct Session {
    port: PortHandle,
    events: UartEvents,
    relay: Relay,
    monitor: ConnectionMonitor,
    alias: Option<Alias>,
    outbound: VecDeque<u8>,
    scratch: Box<[u8; READ_CHUNK]>,
    // Set when the pty was re-registered and nothing has moved since.
    refreshed: bool,
    // Last field: the pty closes after everything else is released.
    endpoint: Endpoint,
}

/// Connects one emulated UART to a host pseudo-terminal.
pub struct Bridge {
    uart: UartId,
    device_path: PathBuf,
    host_path: PathBuf,
    session: Option<Session>,
}

impl Bridge {
    /// Allocates the pty, takes over the UART's notifications and publishes
    /// `alias` when given. Only pty setup failures are returned.
    pub fn open(
        uart: UartId,
        port: PortHandle,
        alias: Option<&Path>,
        idle: Rc<IdleDomain>,
    ) -> Result<Self, BridgeError> {
        let endpoint = Endpoint::open(uart)?;
        let device_path = endpoint.peer_path().to_path_buf();

        let events = {
            let mut port = port.borrow_mut();
            let mut flags = port.flags();
            // The pty replaces console echo and the core must keep running
            // while firmware waits for input.
            flags.remove(UartFlags::STDIO | UartFlags::POLL_SLEEP);
            port.set_flags(flags);
            port.subscribe()
        };

        let relay = Relay::new();
        let monitor = ConnectionMonitor::new(uart, idle);

        let alias = alias.and_then(|path| match Alias::publish(uart, path, &device_path) {
            Ok(alias) => Some(alias),
            Err(err) => {
                tracing::warn!("{err}");
                None
            }
        });
        let host_path = alias
            .as_ref()
            .map(|alias| alias.path().to_path_buf())
            .unwrap_or_else(|| device_path.clone());

        tracing::info!(
            %uart,
            device = %device_path.display(),
            path = %host_path.display(),
            "bridge up"
        );

        Ok(Self {
            uart,
            device_path,
            host_path,
            session: Some(Session {
                port,
                events,
                relay,
                monitor,
                alias,
                outbound: VecDeque::new(),
                scratch: Box::new([0; READ_CHUNK]),
                refreshed: false,
                endpoint,
            }),
        })
    }

    pub fn uart(&self) -> UartId {
        self.uart
    }

    /// Path to hand to terminal programs: the alias if one was published,
    /// otherwise the pty device.
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    pub fn device_path(&self) -> &Path {
        &self.device_path
    }

    pub fn alias_path(&self) -> Option<&Path> {
        self.session
            .as_ref()
            .and_then(|session| session.alias.as_ref())
            .map(Alias::path)
    }

    pub fn is_live(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.monitor.is_connected())
    }

    /// `None` once torn down.
    pub fn gate(&self) -> Option<Gate> {
        self.session.as_ref().map(|session| session.relay.gate())
    }

    /// Host bytes waiting to be injected.
    pub fn buffered(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.relay.buffered())
    }

    pub fn probe_armed(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.monitor.probe_armed())
    }

    /// Waits for the next event and handles it. Returns false once the
    /// bridge has nothing left to do.
    ///
    /// Cancel safe: every branch either completes within one poll or keeps
    /// its progress in the session.
    pub async fn poll_once(&mut self) -> bool {
        let uart = self.uart;
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        let wake = {
            let Session {
                events,
                relay,
                monitor,
                outbound,
                scratch,
                endpoint,
                ..
            } = &mut *session;
            let read_armed = relay.is_reading() && !monitor.is_parked();
            let flush_armed = !outbound.is_empty();

            tokio::select! {
                biased;
                event = events.recv() => Wake::Event(event),
                outcome = endpoint.read_some(&mut scratch[..]), if read_armed => Wake::Read(outcome),
                result = endpoint.flush(outbound), if flush_armed => Wake::Flushed(result),
                _ = monitor.probe_due() => Wake::Probe,
            }
        };

        match wake {
            Wake::Event(Some(event)) => {
                if session.apply(uart, event) {
                    session.drain(uart);
                }
            }
            Wake::Event(None) => {
                tracing::warn!(%uart, "peripheral dropped its notifications; closing bridge");
                self.teardown();
                return false;
            }
            Wake::Read(outcome) => session.on_read(uart, outcome),
            Wake::Flushed(FlushOutcome::Done) => session.refreshed = false,
            Wake::Flushed(FlushOutcome::Stale) => session.on_stale(uart),
            Wake::Flushed(FlushOutcome::Failed(source)) => {
                let dropped = session.outbound.len();
                session.outbound.clear();
                let err = BridgeError::Transfer {
                    uart,
                    direction: Direction::Outbound,
                    source,
                };
                tracing::warn!(dropped, "{err}");
            }
            Wake::Probe => {
                tracing::debug!(%uart, "probing for peer");
                session.monitor.on_probe();
                session.relay.resume_reading();
                session.refreshed = false;
                if let Err(source) = session.endpoint.unpark() {
                    session.lose_peer(uart, source);
                }
            }
        }
        true
    }

    /// Relays until `shutdown` fires or the bridge closes.
    pub async fn run(&mut self, shutdown: &ShutdownHandle) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                live = self.poll_once() => {
                    if !live {
                        break;
                    }
                }
            }
        }
    }

    /// Cancels the probe, frees buffered bytes, removes the alias and closes
    /// the pty. Does nothing the second time.
    pub fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let uart = self.uart;

        session.monitor.cancel();
        let discarded = session.relay.clear() + session.outbound.len();
        session.outbound.clear();
        if discarded > 0 {
            tracing::debug!(%uart, discarded, "dropping buffered bytes");
        }
        if let Some(alias) = session.alias.take() {
            if let Err(err) = alias.remove() {
                tracing::warn!("{err}");
            }
        }
        drop(session);

        tracing::info!(%uart, "bridge closed");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Session {
    /// Applies one peripheral notification. Returns true when buffered host
    /// bytes may now be injected.
    fn apply(&mut self, uart: UartId, event: UartEvent) -> bool {
        match event {
            UartEvent::Transmit(value) => {
                self.transmit(uart, value);
                false
            }
            UartEvent::Xoff => {
                if self.relay.xoff() {
                    tracing::info!(%uart, buffered = self.relay.buffered(), "XOFF");
                }
                false
            }
            UartEvent::Xon => {
                if self.relay.xon() {
                    tracing::info!(%uart, buffered = self.relay.buffered(), "XON");
                }
                true
            }
        }
    }

    fn transmit(&mut self, uart: UartId, value: u32) {
        let Ok(byte) = u8::try_from(value) else {
            let err = BridgeError::ProtocolViolation {
                uart,
                detail: format!("transmit value {value:#x} does not fit a byte"),
            };
            tracing::warn!("{err}");
            return;
        };
        if !self.monitor.is_connected() {
            tracing::trace!(%uart, byte, "no peer, tx dropped");
            return;
        }
        tracing::trace!(%uart, byte, "tx");

        // Keep order behind anything already waiting for the pty.
        if !self.outbound.is_empty() {
            self.queue_outbound(uart, byte);
            return;
        }
        match self.endpoint.try_write(&[byte]) {
            Ok(0) => self.queue_outbound(uart, byte),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.queue_outbound(uart, byte)
            }
            Err(source) => {
                let err = BridgeError::Transfer {
                    uart,
                    direction: Direction::Outbound,
                    source,
                };
                tracing::warn!("{err}");
            }
        }
    }

    fn queue_outbound(&mut self, uart: UartId, byte: u8) {
        if self.outbound.len() >= OUTBOUND_LIMIT {
            tracing::debug!(%uart, byte, "pty backlog full, dropping");
            return;
        }
        self.outbound.push_back(byte);
    }

    fn on_read(&mut self, uart: UartId, outcome: ReadOutcome) {
        match outcome {
            ReadOutcome::Data(n) => {
                if self.monitor.on_data() {
                    tracing::info!(%uart, "peer connected");
                }
                tracing::trace!(%uart, n, "rx");
                self.refreshed = false;
                self.relay.accept(&self.scratch[..n]);
                self.drain(uart);
                // While gated, a tick-enabled read takes one chunk only.
                if self.relay.gate() == Gate::Gated {
                    self.relay.pause_reading();
                }
            }
            ReadOutcome::Closed => {
                tracing::debug!(%uart, "end of file on pty; reads paused");
                self.relay.pause_reading();
            }
            ReadOutcome::Failed(source) => self.lose_peer(uart, source),
            ReadOutcome::Stale => self.on_stale(uart),
        }
    }

    /// Marks the peer gone and takes the pty out of the reactor until the
    /// next probe.
    fn lose_peer(&mut self, uart: UartId, source: io::Error) {
        let err = BridgeError::Transfer {
            uart,
            direction: Direction::Inbound,
            source,
        };
        tracing::trace!("{err}");
        if self.monitor.on_read_error() {
            tracing::info!(%uart, "peer disconnected");
        }
        self.endpoint.park();
    }

    /// The reactor reported a hangup that did not hold up. Re-register once;
    /// a second report with nothing moved in between is a real hangup.
    fn on_stale(&mut self, uart: UartId) {
        if self.refreshed {
            let dropped = self.outbound.len();
            self.outbound.clear();
            if dropped > 0 {
                tracing::debug!(%uart, dropped, "peer hung up with output pending");
            }
            self.lose_peer(uart, io::ErrorKind::BrokenPipe.into());
            return;
        }
        tracing::trace!(%uart, "stale hangup, re-registering pty");
        self.refreshed = true;
        if let Err(source) = self.endpoint.refresh() {
            self.lose_peer(uart, source);
        }
    }

    /// Injects buffered host bytes until the gate closes or the buffer runs
    /// dry. Notifications raised by each injection are applied before the
    /// next byte goes in, so an XOFF stops the batch where it happened.
    fn drain(&mut self, uart: UartId) {
        let connected = self.monitor.is_connected();
        while let Some(byte) = self.relay.next_inbound(connected) {
            tracing::trace!(%uart, byte, "inject");
            self.port.borrow_mut().inject(byte);
            while let Ok(event) = self.events.try_recv() {
                self.apply(uart, event);
            }
        }
    }
}

/// Owns every bridge of one emulated board.
#[derive(Default)]
pub struct BridgeController {
    bridges: Vec<Bridge>,
    idle: Weak<IdleDomain>,
}

impl BridgeController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridges `port` according to `mode`. Returns `None` for a disabled UART.
    /// A UART with a live bridge is refused.
    pub fn attach(
        &mut self,
        uart: UartId,
        mode: &UartMode,
        port: PortHandle,
    ) -> Result<Option<&Bridge>, BridgeError> {
        if self.bridge(uart).is_some_and(Bridge::is_live) {
            return Err(BridgeError::AlreadyAttached { uart });
        }
        let Some(alias) = alias_for(mode, uart) else {
            tracing::debug!(%uart, "host access disabled");
            return Ok(None);
        };
        let bridge = Bridge::open(uart, port, Some(&alias), self.idle_domain())?;
        self.bridges.retain(|closed| closed.uart() != uart);
        self.bridges.push(bridge);
        Ok(self.bridges.last())
    }

    fn idle_domain(&mut self) -> Rc<IdleDomain> {
        if let Some(domain) = self.idle.upgrade() {
            return domain;
        }
        tracing::debug!("creating idle domain");
        let domain = Rc::new(IdleDomain::new());
        self.idle = Rc::downgrade(&domain);
        domain
    }

    /// True while any live bridge still holds the idle domain.
    pub fn idle_domain_live(&self) -> bool {
        self.idle.strong_count() > 0
    }

    pub fn bridges(&self) -> &[Bridge] {
        &self.bridges
    }

    pub fn bridge(&self, uart: UartId) -> Option<&Bridge> {
        self.bridges.iter().find(|bridge| bridge.uart() == uart)
    }

    pub fn bridge_mut(&mut self, uart: UartId) -> Option<&mut Bridge> {
        self.bridges.iter_mut().find(|bridge| bridge.uart() == uart)
    }

    /// Drives all bridges until `shutdown` fires.
    pub async fn run(&mut self, shutdown: &ShutdownHandle) {
        let mut pending: Vec<Pin<Box<dyn Future<Output = ()> + '_>>> = Vec::new();
        for bridge in self.bridges.iter_mut() {
            pending.push(Box::pin(bridge.run(shutdown)));
        }
        std::future::poll_fn(|cx| {
            pending.retain_mut(|run| run.as_mut().poll(cx).is_pending());
            if pending.is_empty() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await;
    }

    /// Tears every bridge down. The idle domain goes with the last one.
    pub fn teardown(&mut self) {
        for bridge in self.bridges.iter_mut() {
            bridge.teardown();
        }
    }
}
