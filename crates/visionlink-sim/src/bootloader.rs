//! A device sitting in its bootloader.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use visionlink_package::SbrPackage;
use visionlink_protocol::bootloader::{Request, Response, Storage, WATCHDOG_KEEPALIVE, WATCHDOG_RESET};
use visionlink_protocol::streams::{BOOTLOADER_STREAM, WATCHDOG_STREAM};
use visionlink_stream::{BootState, LinkConnection, StreamChannel};

use crate::device::{finish, lock, wait_closed, Shared};

const WATCHDOG_POLL: Duration = Duration::from_millis(20);

struct Watchdog {
    last_keepalive: Mutex<Instant>,
    reset_requested: AtomicBool,
}

/// Serve one bootloader session until the host resets the device, boots
/// the application, or goes quiet.
pub(crate) fn run(link: &Arc<LinkConnection>, shared: &Arc<Shared>) {
    let watchdog = Arc::new(Watchdog {
        last_keepalive: Mutex::new(Instant::now()),
        reset_requested: AtomicBool::new(false),
    });

    let keepalive = {
        let link = Arc::clone(link);
        let watchdog = Arc::clone(&watchdog);
        thread::Builder::new()
            .name("visionlink-sim-bl-watchdog".to_string())
            .spawn(move || receive_keepalives(&link, &watchdog))
    };
    let monitor = match shared.config.watchdog_timeout {
        Some(timeout) => {
            let link = Arc::clone(link);
            let watchdog = Arc::clone(&watchdog);
            Some(
                thread::Builder::new()
                    .name("visionlink-sim-bl-monitor".to_string())
                    .spawn(move || monitor_keepalives(&link, &watchdog, timeout)),
            )
        }
        None => None,
    };

    let next = match link.open_stream(BOOTLOADER_STREAM, 0) {
        Ok(commands) => serve_commands(&commands, shared),
        Err(err) => {
            debug!(error = %err, "bootloader stream never opened");
            shared.config.initial_state
        }
    };
    if watchdog.reset_requested.load(Ordering::SeqCst) {
        info!("bootloader reset by host");
    }

    finish(shared, link, next);
    for handle in [Some(keepalive), monitor].into_iter().flatten() {
        match handle {
            Ok(handle) => {
                let _ = handle.join();
            }
            Err(err) => warn!(error = %err, "bootloader watchdog thread never started"),
        }
    }
}

fn receive_keepalives(link: &LinkConnection, watchdog: &Watchdog) {
    let Ok(stream) = link.open_stream(WATCHDOG_STREAM, 0) else {
        return;
    };
    while let Ok(packet) = stream.read() {
        if packet[..] == WATCHDOG_RESET {
            watchdog.reset_requested.store(true, Ordering::SeqCst);
            link.close();
            return;
        }
        if packet[..] == WATCHDOG_KEEPALIVE {
            *lock(&watchdog.last_keepalive) = Instant::now();
        }
    }
}

fn monitor_keepalives(link: &LinkConnection, watchdog: &Watchdog, timeout: Duration) {
    while !wait_closed(link, WATCHDOG_POLL) {
        if lock(&watchdog.last_keepalive).elapsed() > timeout {
            warn!(?timeout, "no keepalive; bootloader watchdog reset");
            link.close();
            return;
        }
    }
}

/// Returns the state the device is left in.
fn serve_commands(commands: &StreamChannel, shared: &Shared) -> BootState {
    while let Ok(packet) = commands.read() {
        let request = match Request::parse(&packet) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "bad bootloader request");
                continue;
            }
        };
        let replied = match request {
            Request::GetBootloaderVersion => {
                commands.write(&Response::BootloaderVersion(shared.config.bootloader_version).to_bytes())
            }
            Request::BootApplication => {
                info!("bootloader handing off to application");
                return BootState::Unbooted;
            }
            Request::UpdateFlash {
                storage,
                total_size,
                num_packets,
            } => update_flash(commands, shared, storage, total_size as usize, num_packets),
        };
        if replied.is_err() {
            break;
        }
    }
    shared.config.initial_state
}

fn update_flash(
    commands: &StreamChannel,
    shared: &Shared,
    storage: Storage,
    total_size: usize,
    num_packets: u32,
) -> visionlink_stream::Result<()> {
    let mut image = Vec::with_capacity(total_size);
    for _ in 0..num_packets {
        image.extend_from_slice(&commands.read()?);
    }
    debug!(?storage, size = image.len(), num_packets, "flash image received");

    for &progress in &shared.config.flash_progress {
        commands.write(&Response::FlashStatusUpdate { progress }.to_bytes())?;
    }
    if shared.config.flash_unknown_response {
        warn!(?storage, "answering flash with a version reply");
        return commands.write(&Response::BootloaderVersion(shared.config.bootloader_version).to_bytes());
    }

    let outcome = if let Some(reason) = &shared.config.flash_error {
        Err(reason.clone())
    } else if image.len() != total_size {
        Err(format!("received {} of {total_size} bytes", image.len()))
    } else if storage == Storage::Sbr {
        SbrPackage::parse(&image)
            .map(|_| ())
            .map_err(|err| err.to_string())
    } else {
        Ok(())
    };

    let complete = match outcome {
        Ok(()) => {
            info!(?storage, size = image.len(), "flash written");
            shared.record_flash(storage, image);
            Response::FlashComplete {
                success: true,
                error_msg: String::new(),
            }
        }
        Err(reason) => {
            warn!(?storage, %reason, "flash rejected");
            Response::FlashComplete {
                success: false,
                error_msg: reason,
            }
        }
    };
    commands.write(&complete.to_bytes())
}
