use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use procbus_transport::DEFAULT_BUS_ADDRESS;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod route;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the bus daemon.
    Serve(ServeArgs),
    /// Send one message through the bus.
    Send(SendArgs),
    /// Register as a process and print received messages.
    Listen(ListenArgs),
    /// Resolve destinations against a config's routing table.
    Route(RouteArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Route(args) => route::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Daemon configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "PROCBUS_CONFIG")]
    pub config: Option<PathBuf>,
    /// Override the listen address from the config.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,
    /// Override the node id from the config.
    #[arg(long)]
    pub node_id: Option<u32>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Process id to register as.
    #[arg(long)]
    pub pid: u32,
    /// Destination path (e.g. s:/billing/invoice or x:/0/7).
    #[arg(long)]
    pub dest: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file. Without --data or --file, stdin is sent.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    #[command(flatten)]
    pub bus: BusArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Process id to register as.
    #[arg(long)]
    pub pid: u32,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub bus: BusArgs,
}

#[derive(Args, Debug)]
pub struct RouteArgs {
    /// Daemon configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "PROCBUS_CONFIG")]
    pub config: PathBuf,
    /// Destinations to resolve. Without any, the rule table is printed.
    pub destinations: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Connection flags shared by client commands.
#[derive(Args, Debug)]
pub struct BusArgs {
    /// Bus daemon address.
    #[arg(long, default_value = DEFAULT_BUS_ADDRESS, env = "PROCBUS_ADDR")]
    pub addr: String,
    /// Node id of the bus this process belongs to.
    #[arg(long, default_value = "0")]
    pub node_id: u32,
    /// Connect and registration timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }
}
