//! Demo driver run against the in-memory host
//!
//! Usage: `pcdev [board.json]`. Without an argument the built-in board with
//! four devices is used. Every device is attached over the bus, exercised
//! with a write and a read-back where its permission allows, and finally the
//! driver is torn down.

use std::sync::Arc;

use pcdev::memhost::MemHost;
use pcdev::{
    AccessMode, Board, BusRuntime, DeviceInfo, Driver, FileOperations, Permission, Whence,
};
use tracing::{info, warn};

fn exercise(ops: &dyn FileOperations, device: &DeviceInfo) -> pcdev::Result<()> {
    let identity = device.identity;
    let serial = device.config.serial.as_bytes();

    if device.config.permission != Permission::ReadOnly {
        let session = ops.open(identity, AccessMode::WRITE)?;
        let written = ops.write(session, serial)?;
        ops.release(session)?;
        info!(identity = %identity, bytes = written, "wrote serial number");
    }

    if device.config.permission != Permission::WriteOnly {
        let session = ops.open(identity, AccessMode::READ)?;
        ops.seek(session, 0, Whence::Set)?;
        let data = ops.read(session, serial.len())?;
        ops.release(session)?;
        let text = String::from_utf8_lossy(&data);
        info!(identity = %identity, data = %text.trim_end_matches('\0'), "read back");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let board = match std::env::args().nth(1) {
        Some(path) => Board::load(path)?,
        None => Board::builtin(),
    };

    let host = Arc::new(MemHost::new());
    let driver = Arc::new(Driver::setup(Arc::clone(&host), board.settings.clone())?);
    let runtime = BusRuntime::new(Arc::clone(&driver));
    let client = runtime.client()?;
    let bus = tokio::spawn(runtime.run());

    for event in board.devices {
        let kind = event.kind.clone();
        match client.attach(event).await {
            Ok(device) => info!(
                slot = device.slot,
                identity = %device.identity,
                serial = %device.config.serial,
                capacity = device.config.capacity,
                "device ready"
            ),
            Err(e) => warn!(kind = %kind, error = %e, "device skipped"),
        }
    }
    info!(total = driver.total_devices(), "devices attached");

    for device in driver.devices() {
        let Some(ops) = host.ops(device.identity) else {
            warn!(identity = %device.identity, "no operation table routed");
            continue;
        };
        if let Err(e) = exercise(ops.as_ref(), &device) {
            warn!(identity = %device.identity, error = %e, "device I/O failed");
        }
    }

    drop(client);
    bus.await?;
    driver.teardown()?;
    Ok(())
}
