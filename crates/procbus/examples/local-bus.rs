//! Runs a bus daemon and two processes in one binary.
//!
//! Process 2 owns `s:/greeter`; process 1 sends it a message and gets a
//! reply addressed back to it literally (`x:/0/1/...`).
//!
//! Run with:
//!   cargo run --example local-bus

use std::time::Duration;

use procbus::frame::ReadStream;
use procbus::peer::{Client, ClientConfig};
use procbus::routing::{Address, RoutingUpdate, Simple};
use procbus::{BusConfig, Daemon};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = BusConfig {
        listen: "127.0.0.1:0".to_string(),
        routing: RoutingUpdate::default()
            .with_service("s:/greeter", Simple::new([Address::new(0, 2)])),
        ..BusConfig::default()
    };
    let daemon = Daemon::start(&config).await?;
    let addr = daemon.local_addr();
    eprintln!("bus listening on {addr}");

    let (greeter_tx, mut greeter_rx) = mpsc::unbounded_channel::<ReadStream>();
    let greeter = Client::connect(
        addr,
        2,
        move |stream: ReadStream| {
            let _ = greeter_tx.send(stream);
        },
        ClientConfig::default(),
    )
    .await?;

    let (caller_tx, mut caller_rx) = mpsc::unbounded_channel::<ReadStream>();
    let caller = Client::connect(
        addr,
        1,
        move |stream: ReadStream| {
            let _ = caller_tx.send(stream);
        },
        ClientConfig::default(),
    )
    .await?;

    while daemon.connections().len() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    caller.send("s:/greeter/hello", b"world").await?;

    let mut request = greeter_rx.recv().await.ok_or("greeter stopped")?;
    let mut name = String::new();
    request.read_to_string(&mut name).await?;
    let (node, process, _) = request.message_id().split();
    eprintln!("greeter got {name:?} on {}", request.destination());

    let reply_to = format!("x:/{node}/{process}/greeting");
    greeter
        .send(&reply_to, format!("hello, {name}").as_bytes())
        .await?;

    let mut reply = caller_rx.recv().await.ok_or("caller stopped")?;
    let mut text = String::new();
    reply.read_to_string(&mut text).await?;
    eprintln!("caller got {text:?} on {}", reply.destination());

    caller.close().await;
    greeter.close().await;
    let stats = daemon.shutdown().await?;
    eprintln!(
        "delivered {} frames, dropped {}",
        stats.delivered, stats.dropped
    );
    Ok(())
}
