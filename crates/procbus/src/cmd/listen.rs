use std::io;

use procbus_frame::{MessageId, ReadStream};
use procbus_peer::{Client, ClientConfig, StreamListener};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cmd::{parse_duration, shutdown_signal, ListenArgs};
use crate::exit::{io_error, peer_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_message, OutputFormat};

/// One inbound stream, read to its end.
struct Received {
    id: MessageId,
    destination: String,
    payload: io::Result<Vec<u8>>,
}

/// Reads each stream on its own task and forwards whole messages in the
/// order they complete. Streams are interleaved on the wire, so draining
/// them one at a time would stall the client's demultiplexer.
fn collect_messages(messages: mpsc::UnboundedSender<Received>) -> impl StreamListener {
    move |mut stream: ReadStream| {
        let messages = messages.clone();
        tokio::spawn(async move {
            let mut payload = Vec::new();
            let payload = stream.read_to_end(&mut payload).await.map(|_| payload);
            let received = Received {
                id: stream.message_id(),
                destination: stream.destination().to_string(),
                payload,
            };
            if messages.send(received).is_err() {
                debug!(message_id = %stream.message_id(), "listener finished; discarding message");
            }
        });
    }
}

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.bus.timeout)?;
    let config = ClientConfig {
        node_id: args.bus.node_id,
        handshake_timeout: timeout,
        ..ClientConfig::default()
    };

    let (messages_tx, mut messages_rx) = mpsc::unbounded_channel();
    let client = Client::connect(
        args.bus.addr.as_str(),
        args.pid,
        collect_messages(messages_tx),
        config,
    )
    .await
    .map_err(|err| peer_error("connect failed", err))?;
    info!(address = %client.address(), "listening");

    let mut received = 0usize;
    let result = loop {
        if args.count.is_some_and(|count| received >= count) {
            break Ok(SUCCESS);
        }

        let message = tokio::select! {
            message = messages_rx.recv() => match message {
                Some(message) => message,
                None => break Err(CliError::new(FAILURE, "bus connection closed")),
            },
            _ = shutdown_signal() => break Ok(SUCCESS),
        };

        match message.payload {
            Ok(payload) => print_message(message.id, &message.destination, &payload, format),
            Err(err) => break Err(io_error("failed reading message", err)),
        }
        received += 1;
    };

    client.close().await;
    result
}
