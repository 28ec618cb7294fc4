use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use visionlink_device::{get_any_available_device, get_device_by_mx_id, DeviceInfo, UdsBackend};

use crate::exit::{link_error, CliError, CliResult, NOT_FOUND, USAGE};
use crate::output::OutputFormat;

pub mod bootloader_version;
pub mod flash;
pub mod info;
pub mod list;
pub mod package;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List devices reachable in the device directory.
    List(ListArgs),
    /// Boot a device and print its telemetry.
    Info(InfoArgs),
    /// Create or inspect SBR application packages.
    #[command(subcommand)]
    Package(PackageCommand),
    /// Flash an application package through the bootloader.
    Flash(FlashArgs),
    /// Query the bootloader version of a device.
    BootloaderVersion(BootloaderVersionArgs),
    /// Run a simulated device until interrupted.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, context: &Context) -> CliResult<i32> {
    match command {
        Command::List(args) => list::run(args, context),
        Command::Info(args) => info::run(args, context),
        Command::Package(command) => package::run(command, context),
        Command::Flash(args) => flash::run(args, context),
        Command::BootloaderVersion(args) => bootloader_version::run(args, context),
        Command::Simulate(args) => simulate::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// Settings shared by every subcommand.
pub struct Context {
    pub format: OutputFormat,
    pub device_dir: Option<PathBuf>,
    pub log_level: crate::logging::LogLevel,
}

impl Context {
    pub fn backend(&self) -> UdsBackend {
        match &self.device_dir {
            Some(dir) => UdsBackend::new(dir),
            None => UdsBackend::from_env(),
        }
    }
}

/// Which device a command talks to.
#[derive(Args, Debug)]
pub struct Selector {
    /// Device id (MX id). Default: first available device.
    #[arg(long, value_name = "ID")]
    pub device_id: Option<String>,
    /// How long to search for a device (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub search_timeout: String,
}

pub fn select_device(selector: &Selector, context: &Context) -> CliResult<DeviceInfo> {
    let backend = context.backend();
    let found = match &selector.device_id {
        Some(id) => get_device_by_mx_id(&backend, id),
        None => {
            let timeout = parse_timeout(&selector.search_timeout)?;
            get_any_available_device(&backend, timeout)
        }
    }
    .map_err(|err| link_error("discovery failed", err))?;

    found.ok_or_else(|| match &selector.device_id {
        Some(id) => CliError::new(NOT_FOUND, format!("device '{id}' not found")),
        None => CliError::new(NOT_FOUND, "no available devices"),
    })
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Also list devices already booted by another host.
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub selector: Selector,
    /// Boot the USB2-limited firmware variant.
    #[arg(long)]
    pub usb2: bool,
}

#[derive(Subcommand, Debug)]
pub enum PackageCommand {
    /// Build an application package for a pipeline of XLink endpoints.
    Create(PackageCreateArgs),
    /// Print and verify the sections of a package.
    Inspect(PackageInspectArgs),
}

#[derive(Args, Debug)]
pub struct PackageCreateArgs {
    /// Output file.
    pub output: PathBuf,
    /// Host-to-device stream names (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub xlink_in: Vec<String>,
    /// Device-to-host stream names (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub xlink_out: Vec<String>,
    /// Asset to embed, as KEY=PATH (repeatable).
    #[arg(long, value_name = "KEY=PATH")]
    pub asset: Vec<String>,
    /// Device firmware to embed instead of the bundled image.
    #[arg(long, value_name = "PATH", env = "VISIONLINK_DEVICE_BINARY")]
    pub firmware: Option<PathBuf>,
    /// Embed the USB2-limited firmware variant.
    #[arg(long)]
    pub usb2: bool,
}

#[derive(Args, Debug)]
pub struct PackageInspectArgs {
    /// Package file.
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct FlashArgs {
    /// Package file produced by `package create`.
    pub package: PathBuf,
    #[command(flatten)]
    pub selector: Selector,
}

#[derive(Args, Debug)]
pub struct BootloaderVersionArgs {
    #[command(flatten)]
    pub selector: Selector,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Socket path to serve on.
    pub path: PathBuf,
    /// Device id to report.
    #[arg(long, default_value = "14442C10D13EABCE00")]
    pub device_id: String,
    /// Boot state the device starts in.
    #[arg(long, value_enum, default_value = "unbooted")]
    pub state: SimState,
    /// Watchdog timeout in milliseconds; 0 disables it.
    #[arg(long, value_name = "MS")]
    pub watchdog_ms: Option<u64>,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum SimState {
    Unbooted,
    Bootloader,
    Booted,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_seconds() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_timeout_millis() {
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert_eq!(parse_timeout("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout("bad").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout("").unwrap_err().code, USAGE);
    }
}
