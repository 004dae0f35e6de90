//! Shared test utilities: a recording UART and helpers for driving the peer
//! side of a pty.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use drumfish::bridge::Bridge;
use drumfish::peripheral::{UartEvent, UartEvents, UartFlags, UartPort};
use tokio::sync::mpsc;

/// UART double that records injections and can raise XOFF after a count.
pub struct RecordingPort {
    pub flags: UartFlags,
    pub injected: Vec<u8>,
    pub xoff_after: Option<usize>,
    tx: Option<mpsc::UnboundedSender<UartEvent>>,
}

impl RecordingPort {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            flags: UartFlags::STDIO | UartFlags::POLL_SLEEP,
            injected: Vec::new(),
            xoff_after: None,
            tx: None,
        }))
    }

    pub fn emit(&self, event: UartEvent) {
        if let Some(tx) = &self.tx {
            tx.send(event).expect("bridge subscribed");
        }
    }
}

impl UartPort for RecordingPort {
    fn subscribe(&mut self) -> UartEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        rx
    }

    fn inject(&mut self, byte: u8) {
        self.injected.push(byte);
        if self.xoff_after == Some(self.injected.len()) {
            self.emit(UartEvent::Xoff);
        }
    }

    fn flags(&self) -> UartFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: UartFlags) {
        self.flags = flags;
    }
}

/// Opens the terminal side the way a user's terminal program would, minus
/// becoming its controlling tty.
pub fn open_peer(path: &Path) -> File {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(path)
        .expect("open pty peer")
}

/// Reads until `n` bytes arrived or five seconds passed.
pub async fn read_peer(peer: &mut File, n: usize) -> Vec<u8> {
    let mut got = Vec::new();
    let mut buf = [0u8; 64];
    for _ in 0..1000 {
        match peer.read(&mut buf) {
            Ok(count) => got.extend_from_slice(&buf[..count]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => panic!("peer read failed: {err}"),
        }
        if got.len() >= n {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    got
}

/// Collects whatever the peer receives within `period` of real time.
pub fn drain_peer(peer: &mut File, period: Duration) -> Vec<u8> {
    let deadline = std::time::Instant::now() + period;
    let mut got = Vec::new();
    let mut buf = [0u8; 64];
    while std::time::Instant::now() < deadline {
        match peer.read(&mut buf) {
            Ok(count) => got.extend_from_slice(&buf[..count]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(err) => panic!("peer read failed: {err}"),
        }
    }
    got
}

/// Polls the bridge until `done` holds. Panics after five seconds.
pub async fn drive_until(bridge: &mut Bridge, mut done: impl FnMut(&Bridge) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&*bridge) {
            assert!(bridge.poll_once().await, "bridge closed");
        }
    })
    .await
    .expect("bridge never reached the expected state");
}

/// Lets the bridge handle whatever arrives for `period`.
pub async fn idle_for(bridge: &mut Bridge, period: Duration) {
    let _ = tokio::time::timeout(period, async { while bridge.poll_once().await {} }).await;
}
