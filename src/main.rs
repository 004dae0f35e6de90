use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

use drumfish::args::Cli;
use drumfish::bridge::BridgeController;
use drumfish::logging::init_tracing;
use drumfish::shutdown::{ShutdownCoordinator, ShutdownHandle};
use drumfish::sim::Board;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Cli::parse()
        .resolve()
        .context("invalid configuration")?;
    init_tracing(config.verbose);

    if let Some(port) = config.gdb_port {
        tracing::warn!(port, "GDB stub is not available in this build; port ignored");
    }
    if let Some(mac) = &config.mac {
        tracing::info!(%mac, "radio MAC");
    }

    let board = Board::new();
    let mut bridges = BridgeController::new();
    for (uart, mode) in config.uart.modes() {
        let port = board
            .port(uart)
            .with_context(|| format!("board has no {uart}"))?;
        let bridge = bridges
            .attach(uart, mode, port)
            .context("failed to set up UART bridge")?;
        if let Some(bridge) = bridge {
            println!("{uart} available at {}", bridge.host_path().display());
        }
    }

    let coordinator = ShutdownCoordinator::new();
    let shutdown = coordinator.handle();
    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("install SIGHUP handler")?;

    let watch_signals = async {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = terminate.recv() => break,
                _ = hangup.recv() => board.reset(),
                _ = shutdown.wait() => return,
            }
        }
        coordinator.signal();
    };

    tokio::join!(
        board.run(&shutdown),
        run_bridges(&mut bridges, &shutdown),
        watch_signals
    );

    bridges.teardown();
    Ok(())
}

async fn run_bridges(bridges: &mut BridgeController, shutdown: &ShutdownHandle) {
    bridges.run(shutdown).await;
    tracing::debug!("bridges stopped");
}
