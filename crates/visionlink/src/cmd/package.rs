use std::path::PathBuf;

use serde::Serialize;
use visionlink_device::{DeviceBootloader, FirmwareSource, Pipeline, XLinkIn, XLinkOut};
use visionlink_package::{SbrPackage, SbrSection};

use crate::cmd::{Context, PackageCommand, PackageCreateArgs, PackageInspectArgs};
use crate::exit::{device_error, io_error, package_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, table, OutputFormat};

pub fn run(command: PackageCommand, context: &Context) -> CliResult<i32> {
    match command {
        PackageCommand::Create(args) => create(args, context),
        PackageCommand::Inspect(args) => inspect(args, context),
    }
}

#[derive(Serialize)]
struct CreateOutput {
    schema_id: &'static str,
    path: PathBuf,
    size: usize,
    inputs: Vec<String>,
    outputs: Vec<String>,
    assets: usize,
}

fn create(args: PackageCreateArgs, context: &Context) -> CliResult<i32> {
    let mut pipeline = Pipeline::new();
    for name in &args.xlink_in {
        pipeline.add_node(XLinkIn::new(name.clone()));
    }
    for name in &args.xlink_out {
        pipeline.add_node(XLinkOut::new(name.clone()));
    }
    for entry in &args.asset {
        let (key, path) = parse_asset(entry)?;
        let data = std::fs::read(&path)
            .map_err(|err| io_error(&format!("failed to read asset {}", path.display()), err))?;
        pipeline.add_asset(key, data);
    }

    let firmware = match args.firmware {
        Some(path) => FirmwareSource::Path(path),
        None => FirmwareSource::Embedded,
    };
    let size = DeviceBootloader::save_depthai_application_package(
        &args.output,
        &pipeline,
        &firmware,
        args.usb2,
    )
    .map_err(|err| device_error("package create failed", err))?;

    let out = CreateOutput {
        schema_id: "https://schemas.3leaps.dev/visionlink/cli/v1/package-created.schema.json",
        path: args.output,
        size,
        inputs: args.xlink_in,
        outputs: args.xlink_out,
        assets: args.asset.len(),
    };
    match context.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Raw => println!("{}", out.path.display()),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Wrote {} ({} bytes)", out.path.display(), out.size);
        }
    }
    Ok(SUCCESS)
}

fn parse_asset(entry: &str) -> CliResult<(String, PathBuf)> {
    match entry.split_once('=') {
        Some((key, path)) if !key.is_empty() && !path.is_empty() => {
            Ok((key.to_string(), PathBuf::from(path)))
        }
        _ => Err(CliError::new(
            USAGE,
            format!("invalid asset '{entry}', expected KEY=PATH"),
        )),
    }
}

#[derive(Serialize)]
struct InspectOutput<'a> {
    schema_id: &'static str,
    size: usize,
    sections: &'a [SbrSection],
    valid: bool,
    error: Option<String>,
}

fn inspect(args: PackageInspectArgs, context: &Context) -> CliResult<i32> {
    let data = std::fs::read(&args.path)
        .map_err(|err| io_error(&format!("failed to read {}", args.path.display()), err))?;
    let package = SbrPackage::parse_unverified(&data)
        .map_err(|err| package_error("not a valid package", err))?;
    let verified = package.verify();

    let out = InspectOutput {
        schema_id: "https://schemas.3leaps.dev/visionlink/cli/v1/package-info.schema.json",
        size: package.len(),
        sections: package.sections(),
        valid: verified.is_ok(),
        error: verified.as_ref().err().map(ToString::to_string),
    };
    match context.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut rows = table(vec!["SECTION", "OFFSET", "SIZE", "CHECKSUM", "FLAGS"]);
            for section in out.sections {
                rows.add_row(vec![
                    section.name.clone(),
                    section.offset.to_string(),
                    section.size.to_string(),
                    format!("{:#010x}", section.checksum),
                    flags(section),
                ]);
            }
            println!("{rows}");
        }
        OutputFormat::Pretty => {
            println!("Package: {} ({} bytes)", args.path.display(), out.size);
            for section in out.sections {
                println!(
                    "  {:<16} offset={:<10} size={:<10} checksum={:#010x} {}",
                    section.name,
                    section.offset,
                    section.size,
                    section.checksum,
                    flags(section)
                );
            }
        }
        OutputFormat::Raw => {
            for section in out.sections {
                println!("{}", section.name);
            }
        }
    }

    match verified {
        Ok(()) => Ok(SUCCESS),
        Err(err) => Err(package_error("package verification failed", err)),
    }
}

fn flags(section: &SbrSection) -> String {
    let mut flags = Vec::new();
    if section.bootable() {
        flags.push("bootable");
    }
    if section.ignores_checksum() {
        flags.push("no-checksum");
    }
    flags.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_entry_splits_on_first_equals() {
        let (key, path) = parse_asset("labels=/tmp/a=b.txt").unwrap();
        assert_eq!(key, "labels");
        assert_eq!(path, PathBuf::from("/tmp/a=b.txt"));
    }

    #[test]
    fn asset_entry_needs_key_and_path() {
        assert_eq!(parse_asset("labels").unwrap_err().code, USAGE);
        assert_eq!(parse_asset("=x").unwrap_err().code, USAGE);
        assert_eq!(parse_asset("x=").unwrap_err().code, USAGE);
    }
}
