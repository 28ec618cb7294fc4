use serde::Serialize;
use visionlink_device::{BootloaderConfig, DeviceBootloader, Version};

use crate::cmd::{select_device, BootloaderVersionArgs, Context};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize)]
struct BootloaderVersionOutput {
    schema_id: &'static str,
    device_id: String,
    version: Version,
    embedded_version: Version,
    update_available: bool,
}

pub fn run(args: BootloaderVersionArgs, context: &Context) -> CliResult<i32> {
    let info = select_device(&args.selector, context)?;
    let bootloader =
        DeviceBootloader::open(info, &context.backend(), BootloaderConfig::from_env())
            .map_err(|err| device_error("bootloader connect failed", err))?;
    let version = bootloader
        .get_bootloader_version()
        .map_err(|err| device_error("version query failed", err))?;
    let embedded_version = DeviceBootloader::embedded_bootloader_version();

    let out = BootloaderVersionOutput {
        schema_id: "https://schemas.3leaps.dev/visionlink/cli/v1/bootloader-version.schema.json",
        device_id: bootloader.device_info().device_id.clone(),
        version,
        embedded_version,
        update_available: version < embedded_version,
    };
    bootloader.close();

    match context.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut rows = table(vec!["DEVICE ID", "BOOTLOADER", "EMBEDDED", "UPDATE"]);
            rows.add_row(vec![
                out.device_id.clone(),
                out.version.to_string(),
                out.embedded_version.to_string(),
                out.update_available.to_string(),
            ]);
            println!("{rows}");
        }
        OutputFormat::Pretty => {
            println!("Bootloader:");
            println!("  Device ID:  {}", out.device_id);
            println!("  Version:    {}", out.version);
            println!("  Embedded:   {}", out.embedded_version);
            if out.update_available {
                println!("  Update:     available");
            }
        }
        OutputFormat::Raw => println!("{}", out.version),
    }
    Ok(SUCCESS)
}
