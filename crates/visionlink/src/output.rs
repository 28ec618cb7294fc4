use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use visionlink_stream::DeviceInfo;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

#[derive(Serialize)]
struct DeviceListOutput<'a> {
    schema_id: &'a str,
    count: usize,
    devices: &'a [DeviceInfo],
}

pub fn print_devices(devices: &[DeviceInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&DeviceListOutput {
            schema_id: "https://schemas.3leaps.dev/visionlink/cli/v1/device-list.schema.json",
            count: devices.len(),
            devices,
        }),
        OutputFormat::Table => {
            let mut out = table(vec!["DEVICE ID", "STATE", "ADDRESS"]);
            for info in devices {
                out.add_row(vec![
                    info.device_id.clone(),
                    info.state.to_string(),
                    info.address.display().to_string(),
                ]);
            }
            println!("{out}");
        }
        OutputFormat::Pretty => {
            if devices.is_empty() {
                println!("No devices found");
            }
            for info in devices {
                println!(
                    "{} [{}] at {}",
                    info.device_id,
                    info.state,
                    info.address.display()
                );
            }
        }
        OutputFormat::Raw => {
            for info in devices {
                println!("{}", info.device_id);
            }
        }
    }
}

/// Progress bar redrawn in place on stderr.
pub struct Progress {
    label: &'static str,
    enabled: bool,
    last: Option<u32>,
}

impl Progress {
    const WIDTH: usize = 30;

    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            enabled: std::io::stderr().is_terminal(),
            last: None,
        }
    }

    pub fn update(&mut self, fraction: f32) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
        if self.last == Some(percent) {
            return;
        }
        self.last = Some(percent);

        let mut err = std::io::stderr();
        if self.enabled {
            let _ = write!(err, "\r{}", render_bar(self.label, percent, Self::WIDTH));
        } else {
            let _ = writeln!(err, "{}: {percent}%", self.label);
        }
        let _ = err.flush();
    }

    pub fn finish(&mut self) {
        if self.enabled && self.last.is_some() {
            let _ = writeln!(std::io::stderr());
        }
    }
}

fn render_bar(label: &str, percent: u32, width: usize) -> String {
    let filled = width * percent.min(100) as usize / 100;
    format!(
        "{label} [{}{}] {percent:>3}%",
        "#".repeat(filled),
        "-".repeat(width - filled)
    )
}
