use visionlink_device::{BOOTLOADER_VERSION, DEVICE_FIRMWARE_VERSION};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("visionlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: visionlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("device_firmware: {DEVICE_FIRMWARE_VERSION}");
    println!("bootloader: {BOOTLOADER_VERSION}");
    println!(
        "build_target: {}",
        option_env!("VISIONLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));

    Ok(SUCCESS)
}
