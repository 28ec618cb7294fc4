use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use visionlink_device::LogLevel as DeviceLogLevel;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Device records at or above this level are forwarded to stderr.
    pub fn as_device_level(self) -> DeviceLogLevel {
        match self {
            LogLevel::Off => DeviceLogLevel::Off,
            LogLevel::Error => DeviceLogLevel::Error,
            LogLevel::Warn => DeviceLogLevel::Warn,
            LogLevel::Info => DeviceLogLevel::Info,
            LogLevel::Debug => DeviceLogLevel::Debug,
            LogLevel::Trace => DeviceLogLevel::Trace,
        }
    }
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    // Targets stay on so device records (`visionlink::device`) stand apart
    // from host records.
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_onto_device_levels() {
        assert_eq!(LogLevel::Warn.as_device_level(), DeviceLogLevel::Warn);
        assert_eq!(LogLevel::Off.as_device_level(), DeviceLogLevel::Off);
        assert_eq!(LogLevel::Off.as_filter(), LevelFilter::OFF);
    }
}
