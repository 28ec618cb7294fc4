use serde::Serialize;
use visionlink_device::{BootloaderConfig, DeviceBootloader};
use visionlink_package::SbrPackage;

use crate::cmd::{select_device, Context, FlashArgs};
use crate::exit::{device_error, io_error, package_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, OutputFormat, Progress};

#[derive(Serialize)]
struct FlashOutput<'a> {
    schema_id: &'static str,
    device_id: &'a str,
    size: usize,
    success: bool,
    message: &'a str,
}

pub fn run(args: FlashArgs, context: &Context) -> CliResult<i32> {
    let package = std::fs::read(&args.package)
        .map_err(|err| io_error(&format!("failed to read {}", args.package.display()), err))?;
    SbrPackage::parse(&package).map_err(|err| package_error("refusing to flash", err))?;

    let info = select_device(&args.selector, context)?;
    let bootloader =
        DeviceBootloader::open(info, &context.backend(), BootloaderConfig::from_env())
            .map_err(|err| device_error("bootloader connect failed", err))?;

    let mut bar = Progress::new("flash");
    let result = bootloader.flash_depthai_application_package(|value| bar.update(value), &package);
    bar.finish();
    let device_id = bootloader.device_info().device_id.clone();
    bootloader.close();

    let (success, message) = result.map_err(|err| device_error("flash failed", err))?;
    let out = FlashOutput {
        schema_id: "https://schemas.3leaps.dev/visionlink/cli/v1/flash-result.schema.json",
        device_id: &device_id,
        size: package.len(),
        success,
        message: &message,
    };
    match context.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Raw => println!("{success}"),
        OutputFormat::Table | OutputFormat::Pretty => {
            if success {
                println!("Flashed {} bytes to {device_id}", out.size);
            }
        }
    }

    if success {
        Ok(SUCCESS)
    } else {
        Err(CliError::new(FAILURE, format!("flash failed: {message}")))
    }
}
