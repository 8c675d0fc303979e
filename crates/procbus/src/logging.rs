use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Crates whose events follow `--log-level`.
const BUS_TARGETS: [&str; 5] = [
    "procbus",
    "procbus_transport",
    "procbus_frame",
    "procbus_routing",
    "procbus_peer",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Bus crates log at `level`; other crates are capped at warn.
fn bus_targets(level: LevelFilter) -> Targets {
    BUS_TARGETS.iter().fold(
        Targets::new().with_default(level.min(LevelFilter::WARN)),
        |targets, target| targets.with_target(*target, level),
    )
}

/// Install the stderr subscriber. Stdout stays reserved for command output.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let filter = bus_targets(level.as_filter());
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false);

    let _ = match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(layer.json().with_filter(filter))
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    #[test]
    fn bus_crates_follow_requested_level() {
        let filter = bus_targets(LevelFilter::TRACE);
        assert!(filter.would_enable("procbus_peer::router", &Level::TRACE));
        assert!(filter.would_enable("procbus::cmd::listen", &Level::DEBUG));
        assert!(!filter.would_enable("tokio::runtime", &Level::DEBUG));
        assert!(filter.would_enable("tokio::runtime", &Level::WARN));
    }

    #[test]
    fn quiet_levels_apply_everywhere() {
        let filter = bus_targets(LogLevel::Error.as_filter());
        assert!(!filter.would_enable("procbus_frame::reader", &Level::WARN));
        assert!(!filter.would_enable("hyper", &Level::WARN));
        assert!(filter.would_enable("procbus_transport::tcp", &Level::ERROR));
    }
}
