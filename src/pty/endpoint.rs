//! Controlling side of a pseudo-terminal, registered with the tokio reactor.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};

use portable_pty::{native_pty_system, MasterPty, PtySize};
use tokio::io::unix::AsyncFd;

use crate::error::BridgeError;
use crate::peripheral::UartId;

/// Result of waiting for and performing one read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes landed at the front of the buffer.
    Data(usize),
    /// The stream reported end-of-file.
    Closed,
    /// The read failed without delivering data. On a pty master this is how
    /// the kernel reports that nobody holds the peer side open.
    Failed(io::Error),
    /// The reactor still reports a hangup the peer has since recovered from.
    /// The registration must be renewed with [`Endpoint::refresh`].
    Stale,
}

/// Result of writing out a queue.
#[derive(Debug)]
pub enum FlushOutcome {
    Done,
    /// As [`ReadOutcome::Stale`]; the unsent bytes stay queued.
    Stale,
    Failed(io::Error),
}

/// Host end of one emulated UART.
///
/// Only the controlling side is kept. The peer side is closed as soon as the
/// pair exists, so bytes are never buffered for a peer that has not attached.
///
/// While nobody holds the peer side the master reports a hangup on every
/// poll. [`Endpoint::park`] takes it out of the reactor for that time and
/// [`Endpoint::unpark`] registers a fresh descriptor.
pub struct Endpoint {
    file: File,
    stream: Option<AsyncFd<File>>,
    peer_path: PathBuf,
    // Keeps the master descriptor that `file` duplicates open.
    _master: Box<dyn MasterPty + Send>,
}

impl Endpoint {
    /// Allocates a raw, non-blocking pty. Must run inside a tokio runtime.
    pub fn open(uart: UartId) -> Result<Self, BridgeError> {
        let pair = native_pty_system()
            .openpty(PtySize::default())
            .map_err(|err| BridgeError::device_setup(uart, "create pty", err))?;
        drop(pair.slave);

        let master = pair.master;
        let peer_path = master.tty_name().ok_or_else(|| {
            BridgeError::device_setup(uart, "resolve pty name", io::Error::other("no tty name"))
        })?;
        let fd = master.as_raw_fd().ok_or_else(|| {
            BridgeError::device_setup(uart, "access pty", io::Error::other("no descriptor"))
        })?;

        let file = dup_cloexec(fd).map_err(|err| BridgeError::device_setup(uart, "dup pty", err))?;
        make_raw(&file).map_err(|err| BridgeError::device_setup(uart, "set pty attributes", err))?;
        set_nonblocking(&file)
            .map_err(|err| BridgeError::device_setup(uart, "make pty non-blocking", err))?;
        let stream =
            register(&file).map_err(|err| BridgeError::device_setup(uart, "register pty", err))?;

        Ok(Self {
            file,
            stream: Some(stream),
            peer_path,
            _master: master,
        })
    }

    /// Device path a terminal program opens to talk to this UART.
    pub fn peer_path(&self) -> &Path {
        &self.peer_path
    }

    /// True while the reactor watches the stream.
    pub fn is_registered(&self) -> bool {
        self.stream.is_some()
    }

    /// Stops watching the stream. Reads and flushes pend until [`unpark`].
    ///
    /// [`unpark`]: Endpoint::unpark
    pub fn park(&mut self) {
        self.stream = None;
    }

    /// Watches the stream again, starting from the kernel's current state.
    pub fn unpark(&mut self) -> io::Result<()> {
        if self.stream.is_none() {
            self.stream = Some(register(&self.file)?);
        }
        Ok(())
    }

    /// Drops readiness the reactor cached for the old registration.
    pub fn refresh(&mut self) -> io::Result<()> {
        self.park();
        self.unpark()
    }

    /// Waits until the stream is readable, then performs a single read.
    ///
    /// Cancel safe: the read happens within one poll.
    pub async fn read_some(&self, buf: &mut [u8]) -> ReadOutcome {
        let Some(stream) = &self.stream else {
            return std::future::pending().await;
        };
        loop {
            let mut guard = match stream.readable().await {
                Ok(guard) => guard,
                Err(err) => return ReadOutcome::Failed(err),
            };
            // Closed readiness is never cleared by a would-block.
            let hung_up = guard.ready().is_read_closed();
            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(Ok(0)) => return ReadOutcome::Closed,
                Ok(Ok(n)) => return ReadOutcome::Data(n),
                Ok(Err(err)) if err.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(err)) => return ReadOutcome::Failed(err),
                Err(_would_block) if hung_up => return ReadOutcome::Stale,
                Err(_would_block) => continue,
            }
        }
    }

    /// Writes without waiting for readiness. May return `WouldBlock`.
    pub fn try_write(&self, bytes: &[u8]) -> io::Result<usize> {
        (&self.file).write(bytes)
    }

    /// Writes out `queue` as the stream accepts it, removing what was sent.
    ///
    /// Cancel safe: bytes leave the queue in the same poll that wrote them.
    pub async fn flush(&self, queue: &mut VecDeque<u8>) -> FlushOutcome {
        let Some(stream) = &self.stream else {
            return std::future::pending().await;
        };
        while !queue.is_empty() {
            let mut guard = match stream.writable().await {
                Ok(guard) => guard,
                Err(err) => return FlushOutcome::Failed(err),
            };
            let hung_up = guard.ready().is_write_closed();
            let (front, _) = queue.as_slices();
            match guard.try_io(|inner| inner.get_ref().write(front)) {
                Ok(Ok(0)) => return FlushOutcome::Failed(io::ErrorKind::WriteZero.into()),
                Ok(Ok(n)) => {
                    queue.drain(..n);
                }
                Ok(Err(err)) if err.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(err)) => return FlushOutcome::Failed(err),
                Err(_would_block) if hung_up => return FlushOutcome::Stale,
                Err(_would_block) => continue,
            }
        }
        FlushOutcome::Done
    }
}

fn register(file: &File) -> io::Result<AsyncFd<File>> {
    AsyncFd::new(file.try_clone()?)
}

fn dup_cloexec(fd: RawFd) -> io::Result<File> {
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(dup) })
}

/// No line discipline, no echo, no signal characters.
fn make_raw(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) < 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn set_nonblocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    fn open_peer(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
            .expect("open pty peer")
    }

    #[tokio::test]
    async fn read_without_peer_fails_instead_of_blocking() {
        let endpoint = Endpoint::open(UartId::new('0')).expect("pty");
        assert!(endpoint.peer_path().exists());

        let mut buf = [0u8; 16];
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            endpoint.read_some(&mut buf),
        )
        .await
        .expect("hangup is reported as readiness");
        assert!(matches!(outcome, ReadOutcome::Failed(_)), "{outcome:?}");
    }

    #[tokio::test]
    async fn peer_bytes_arrive_unmodified() {
        let mut endpoint = Endpoint::open(UartId::new('1')).expect("pty");
        let mut peer = open_peer(endpoint.peer_path());
        // Raw mode: CR and ^C pass through untouched.
        peer.write_all(&[b'\r', 0x03, 0xff]).unwrap();

        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        while got.len() < 3 {
            match endpoint.read_some(&mut buf).await {
                ReadOutcome::Data(n) => got.extend_from_slice(&buf[..n]),
                ReadOutcome::Stale => endpoint.refresh().expect("re-register"),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(got, vec![b'\r', 0x03, 0xff]);
    }

    #[tokio::test]
    async fn hangup_seen_before_the_peer_attached_is_not_a_busy_loop() {
        let mut endpoint = Endpoint::open(UartId::new('0')).expect("pty");
        let mut buf = [0u8; 16];
        let outcome = endpoint.read_some(&mut buf).await;
        assert!(matches!(outcome, ReadOutcome::Failed(_)), "{outcome:?}");

        // The reactor still holds the hangup from before the peer arrived.
        let _peer = open_peer(endpoint.peer_path());
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            endpoint.read_some(&mut buf),
        )
        .await
        .expect("returns instead of spinning");
        assert!(matches!(outcome, ReadOutcome::Stale), "{outcome:?}");

        endpoint.refresh().expect("re-register");
        let quiet = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            endpoint.read_some(&mut buf),
        )
        .await;
        assert!(quiet.is_err(), "a silent peer leaves the read pending");
    }

    #[tokio::test]
    async fn parked_endpoint_is_out_of_the_reactor() {
        let mut endpoint = Endpoint::open(UartId::new('1')).expect("pty");
        endpoint.park();
        assert!(!endpoint.is_registered());

        let mut buf = [0u8; 16];
        let parked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            endpoint.read_some(&mut buf),
        )
        .await;
        assert!(parked.is_err(), "no hangup is reported while parked");

        endpoint.unpark().expect("register");
        assert!(endpoint.is_registered());
        let outcome = endpoint.read_some(&mut buf).await;
        assert!(matches!(outcome, ReadOutcome::Failed(_)), "{outcome:?}");
    }

    #[tokio::test]
    async fn flush_drains_the_queue_in_order() {
        let endpoint = Endpoint::open(UartId::new('1')).expect("pty");
        let mut peer = open_peer(endpoint.peer_path());

        let mut queue: VecDeque<u8> = b"hello".iter().copied().collect();
        let outcome = endpoint.flush(&mut queue).await;
        assert!(matches!(outcome, FlushOutcome::Done), "{outcome:?}");
        assert!(queue.is_empty());

        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        for _ in 0..100 {
            match peer.read(&mut buf) {
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => panic!("peer read failed: {err}"),
            }
            if got.len() >= 5 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(got, b"hello");
    }
}
