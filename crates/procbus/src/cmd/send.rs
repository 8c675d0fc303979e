use std::fs;
use std::io::Read;

use procbus_frame::ReadStream;
use procbus_peer::{Client, ClientConfig};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{io_error, peer_error, CliResult, SUCCESS};
use crate::output::{print_sent, OutputFormat, SentOutput};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.bus.timeout)?;
    let payload = resolve_payload(&args)?;

    let config = ClientConfig {
        node_id: args.bus.node_id,
        handshake_timeout: timeout,
        ..ClientConfig::default()
    };
    let client = Client::connect(
        args.bus.addr.as_str(),
        args.pid,
        |_stream: ReadStream| {},
        config,
    )
    .await
    .map_err(|err| peer_error("connect failed", err))?;

    let id = client
        .send(&args.dest, &payload)
        .await
        .map_err(|err| peer_error("send failed", err))?;
    client.close().await;

    print_sent(
        &SentOutput {
            message_id: id.to_string(),
            destination: &args.dest,
            bytes: payload.len(),
        },
        format,
    );
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }

    let mut payload = Vec::new();
    std::io::stdin()
        .read_to_end(&mut payload)
        .map_err(|err| io_error("failed reading stdin", err))?;
    Ok(payload)
}
