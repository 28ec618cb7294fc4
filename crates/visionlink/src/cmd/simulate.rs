use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use visionlink_device::BootState;
use visionlink_sim::{SimConfig, SimDevice};

use crate::cmd::{SimState, SimulateArgs};
use crate::exit::{sim_error, CliError, CliResult, INTERNAL, SUCCESS};

const POLL: Duration = Duration::from_millis(100);

pub fn run(args: SimulateArgs) -> CliResult<i32> {
    let state = match args.state {
        SimState::Unbooted => BootState::Unbooted,
        SimState::Bootloader => BootState::Bootloader,
        SimState::Booted => BootState::Booted,
    };
    let mut config = SimConfig::new(args.device_id, state);
    if let Some(ms) = args.watchdog_ms {
        config.watchdog_timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut sim = SimDevice::spawn(&args.path, config).map_err(|err| sim_error("simulator failed", err))?;
    tracing::info!(
        path = %sim.path().display(),
        device_id = sim.device_id(),
        %state,
        "simulated device ready"
    );

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(POLL);
    }

    tracing::info!("stopping simulated device");
    sim.stop();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
