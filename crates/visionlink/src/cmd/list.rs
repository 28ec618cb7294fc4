use visionlink_device::{get_all_available_devices, LinkBackend};

use crate::cmd::{Context, ListArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::print_devices;

pub fn run(args: ListArgs, context: &Context) -> CliResult<i32> {
    let backend = context.backend();
    let mut devices = if args.all {
        backend.enumerate()
    } else {
        get_all_available_devices(&backend)
    }
    .map_err(|err| link_error("discovery failed", err))?;
    devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));

    tracing::debug!(dir = %backend.dir().display(), count = devices.len(), "discovery finished");
    print_devices(&devices, context.format);
    Ok(SUCCESS)
}
