use serde::Serialize;
use visionlink_device::{
    CameraBoardSocket, ChipTemperature, CpuUsage, Device, DeviceConfig, MemoryInfo, Pipeline,
    UsbSpeed,
};

use crate::cmd::{select_device, Context, InfoArgs};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize)]
struct Telemetry {
    schema_id: &'static str,
    device_id: String,
    usb_speed: UsbSpeed,
    connected_cameras: Vec<CameraBoardSocket>,
    ddr: MemoryInfo,
    cmx: MemoryInfo,
    leon_css_heap: MemoryInfo,
    leon_mss_heap: MemoryInfo,
    chip_temperature: ChipTemperature,
    leon_css_cpu: CpuUsage,
    leon_mss_cpu: CpuUsage,
}

pub fn run(args: InfoArgs, context: &Context) -> CliResult<i32> {
    let info = select_device(&args.selector, context)?;
    let config = DeviceConfig {
        usb2_mode: args.usb2,
        log_output_level: context.log_level.as_device_level(),
        ..DeviceConfig::from_env()
    };
    let device = Device::open(&Pipeline::new(), info, &context.backend(), config)
        .map_err(|err| device_error("device open failed", err))?;

    let telemetry = read_telemetry(&device).map_err(|err| device_error("telemetry failed", err));
    device.close();
    print_telemetry(&telemetry?, context.format);
    Ok(SUCCESS)
}

fn read_telemetry(device: &Device) -> visionlink_device::Result<Telemetry> {
    Ok(Telemetry {
        schema_id: "https://schemas.3leaps.dev/visionlink/cli/v1/device-telemetry.schema.json",
        device_id: device.get_mx_id()?,
        usb_speed: device.get_usb_speed()?,
        connected_cameras: device.get_connected_cameras()?,
        ddr: device.get_ddr_memory_usage()?,
        cmx: device.get_cmx_memory_usage()?,
        leon_css_heap: device.get_leon_css_heap_usage()?,
        leon_mss_heap: device.get_leon_mss_heap_usage()?,
        chip_temperature: device.get_chip_temperature()?,
        leon_css_cpu: device.get_leon_css_cpu_usage()?,
        leon_mss_cpu: device.get_leon_mss_cpu_usage()?,
    })
}

fn print_telemetry(out: &Telemetry, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut memory = table(vec!["MEMORY", "USED", "REMAINING", "TOTAL"]);
            for (name, usage) in memory_rows(out) {
                memory.add_row(vec![
                    name.to_string(),
                    usage.used.to_string(),
                    usage.remaining.to_string(),
                    usage.total.to_string(),
                ]);
            }
            println!("Device {} ({:?}, cameras: {})", out.device_id, out.usb_speed, cameras(out));
            println!("{memory}");
            println!(
                "Temperature avg {:.1}C, LeonCSS {:.1}%, LeonMSS {:.1}%",
                out.chip_temperature.average,
                out.leon_css_cpu.average * 100.0,
                out.leon_mss_cpu.average * 100.0
            );
        }
        OutputFormat::Pretty => {
            println!("Device Info:");
            println!("  Device ID:        {}", out.device_id);
            println!("  USB speed:        {:?}", out.usb_speed);
            println!("  Cameras:          {}", cameras(out));
            for (name, usage) in memory_rows(out) {
                println!(
                    "  {:<17} {} / {} bytes",
                    format!("{name}:"),
                    usage.used,
                    usage.total
                );
            }
            println!("  Temperature:      {:.1}C", out.chip_temperature.average);
            println!("  LeonCSS CPU:      {:.1}%", out.leon_css_cpu.average * 100.0);
            println!("  LeonMSS CPU:      {:.1}%", out.leon_mss_cpu.average * 100.0);
        }
        OutputFormat::Raw => println!("{}", out.device_id),
    }
}

fn memory_rows(out: &Telemetry) -> [(&'static str, MemoryInfo); 4] {
    [
        ("DDR", out.ddr),
        ("CMX", out.cmx),
        ("LeonCSS heap", out.leon_css_heap),
        ("LeonMSS heap", out.leon_mss_heap),
    ]
}

fn cameras(out: &Telemetry) -> String {
    out.connected_cameras
        .iter()
        .map(|socket| format!("{socket:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}
