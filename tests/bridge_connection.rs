//! Peer presence detection and bridge lifecycle.

mod common;

use std::fs;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use common::{drive_until, idle_for, open_peer, read_peer, RecordingPort};
use drumfish::bridge::{Bridge, BridgeController, Gate, IdleDomain, PROBE_INTERVAL};
use drumfish::config::UartMode;
use drumfish::peripheral::{UartEvent, UartId};
use drumfish::shutdown::ShutdownCoordinator;
use drumfish::sim::Board;
use tokio::time::Instant;

const UART: UartId = UartId::new('1');

#[tokio::test]
async fn peer_hangup_disconnects_within_one_probe_interval() {
    let port = RecordingPort::new();
    let mut bridge = Bridge::open(UART, port.clone(), None, Rc::new(IdleDomain::new())).unwrap();
    let mut peer = open_peer(bridge.device_path());
    peer.write_all(b"x").unwrap();
    drive_until(&mut bridge, |bridge| bridge.is_connected()).await;
    assert!(!bridge.probe_armed());

    drop(peer);
    tokio::time::timeout(PROBE_INTERVAL, async {
        while bridge.is_connected() {
            bridge.poll_once().await;
        }
    })
    .await
    .expect("disconnect noticed");
    assert!(bridge.probe_armed());

    // Nothing reaches the peripheral while nobody is attached.
    port.borrow().emit(UartEvent::Xon);
    idle_for(&mut bridge, Duration::from_millis(100)).await;
    assert_eq!(port.borrow().injected, b"x");
}

#[tokio::test(start_paused = true)]
async fn probe_finds_a_peer_that_attaches_later() {
    let port = RecordingPort::new();
    let mut bridge = Bridge::open(UART, port.clone(), None, Rc::new(IdleDomain::new())).unwrap();

    // No peer: the first read fails and parks the endpoint.
    assert!(bridge.poll_once().await);
    assert!(!bridge.is_connected());

    let start = Instant::now();
    assert!(bridge.poll_once().await);
    assert!(start.elapsed() >= PROBE_INTERVAL);

    let mut peer = open_peer(bridge.device_path());
    peer.write_all(&[0x55]).unwrap();
    // Real time for the kernel to move the byte; the runtime clock is paused.
    std::thread::sleep(Duration::from_millis(50));

    drive_until(&mut bridge, |bridge| bridge.is_connected()).await;
    drive_until(&mut bridge, |_| !port.borrow().injected.is_empty()).await;
    assert_eq!(port.borrow().injected, vec![0x55]);
    assert!(!bridge.probe_armed());

    // A quiet stretch after reconnecting must let the clock run.
    idle_for(&mut bridge, PROBE_INTERVAL * 2).await;
    assert!(bridge.is_connected());

    peer.write_all(&[0x66]).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    drive_until(&mut bridge, |_| port.borrow().injected.len() >= 2).await;
    assert_eq!(port.borrow().injected, vec![0x55, 0x66]);
}

#[tokio::test(start_paused = true)]
async fn gated_bridge_reads_one_chunk_per_tick() {
    let port = RecordingPort::new();
    let mut bridge = Bridge::open(UART, port.clone(), None, Rc::new(IdleDomain::new())).unwrap();
    port.borrow().emit(UartEvent::Xoff);
    assert!(bridge.poll_once().await);
    assert_eq!(bridge.gate(), Some(Gate::Gated));

    let mut peer = open_peer(bridge.device_path());
    let first: Vec<u8> = (0..100).collect();
    peer.write_all(&first).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    // The tick turns reads back on for one look at the pty.
    drive_until(&mut bridge, |bridge| bridge.is_connected()).await;
    let held = bridge.buffered();
    assert!(held > 0);
    assert!(port.borrow().injected.is_empty());

    let second: Vec<u8> = (100..200).collect();
    peer.write_all(&second).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    idle_for(&mut bridge, PROBE_INTERVAL * 2).await;
    assert_eq!(bridge.buffered(), held);
    assert!(port.borrow().injected.is_empty());

    port.borrow().emit(UartEvent::Xon);
    drive_until(&mut bridge, |_| port.borrow().injected.len() >= 200).await;
    let expected: Vec<u8> = first.into_iter().chain(second).collect();
    assert_eq!(port.borrow().injected, expected);
    assert_eq!(bridge.gate(), Some(Gate::Open));
}

#[tokio::test]
async fn teardown_twice_touches_the_alias_once() {
    let dir = tempfile::tempdir().unwrap();
    let alias = dir.path().join("uart1");
    let port = RecordingPort::new();
    let mut bridge =
        Bridge::open(UART, port.clone(), Some(&alias), Rc::new(IdleDomain::new())).unwrap();

    assert_eq!(bridge.alias_path(), Some(alias.as_path()));
    assert_eq!(bridge.host_path(), alias);
    assert_eq!(fs::read_link(&alias).unwrap(), bridge.device_path());

    bridge.teardown();
    assert!(!bridge.is_live());
    assert!(fs::symlink_metadata(&alias).is_err());

    fs::write(&alias, b"placeholder").unwrap();
    bridge.teardown();
    assert_eq!(fs::read(&alias).unwrap(), b"placeholder");
    assert!(!bridge.poll_once().await);
    assert_eq!(bridge.gate(), None);
}

#[tokio::test]
async fn alias_failure_does_not_stop_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let alias = dir.path().join("no-such-dir").join("uart1");
    let port = RecordingPort::new();
    let mut bridge =
        Bridge::open(UART, port.clone(), Some(&alias), Rc::new(IdleDomain::new())).unwrap();

    assert!(bridge.alias_path().is_none());
    assert_eq!(bridge.host_path(), bridge.device_path());

    let mut peer = open_peer(bridge.device_path());
    peer.write_all(b"ok").unwrap();
    drive_until(&mut bridge, |_| port.borrow().injected.len() >= 2).await;
    assert_eq!(port.borrow().injected, b"ok");

    port.borrow().emit(UartEvent::Transmit(u32::from(b'!')));
    assert!(bridge.poll_once().await);
    assert_eq!(read_peer(&mut peer, 1).await, b"!");
}

#[tokio::test]
async fn board_echoes_through_the_published_alias() {
    let dir = tempfile::tempdir().unwrap();
    let alias = dir.path().join("uart1");
    let board = Board::new();
    let mut controller = BridgeController::new();

    let uart0 = UartId::new('0');
    let skipped = controller
        .attach(uart0, &UartMode::Disabled, board.port(uart0).unwrap())
        .unwrap();
    assert!(skipped.is_none());
    controller
        .attach(UART, &UartMode::Path(alias.clone()), board.port(UART).unwrap())
        .unwrap()
        .expect("uart1 bridged");

    let coordinator = ShutdownCoordinator::new();
    let shutdown = coordinator.handle();
    let mut peer = open_peer(&alias);

    let session = async {
        peer.write_all(b"hello").unwrap();
        let echoed = read_peer(&mut peer, 5).await;
        coordinator.signal();
        echoed
    };
    let ((), (), echoed) = tokio::join!(board.run(&shutdown), controller.run(&shutdown), session);
    assert_eq!(echoed, b"hello");

    assert!(controller.idle_domain_live());
    controller.teardown();
    assert!(!controller.idle_domain_live());
    assert!(fs::symlink_metadata(&alias).is_err());
}
