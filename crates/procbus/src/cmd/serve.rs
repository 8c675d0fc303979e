use procbus::{BusConfig, Daemon};
use tracing::info;

use crate::cmd::{shutdown_signal, ServeArgs};
use crate::exit::{config_error, peer_error, CliResult, SUCCESS};
use crate::output::{print_ready, OutputFormat, ReadyOutput};

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = match &args.config {
        Some(path) => BusConfig::load(path)
            .map_err(|err| config_error(&format!("failed to load {}", path.display()), err))?,
        None => BusConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(node_id) = args.node_id {
        config.node_id = node_id;
    }

    let daemon = Daemon::start(&config)
        .await
        .map_err(|err| peer_error("failed to start bus", err))?;

    print_ready(
        &ReadyOutput {
            listen: daemon.local_addr().to_string(),
            node_id: config.node_id,
            rules: daemon.routing().len(),
        },
        format,
    );

    shutdown_signal().await;
    info!("shutdown requested");

    daemon
        .shutdown()
        .await
        .map_err(|err| peer_error("shutdown failed", err))?;
    Ok(SUCCESS)
}
