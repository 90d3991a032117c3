//! Demo sender link client.
//!
//! Connects to a `senderlink-server`, sends a batch of messages through one
//! sender link and reports how many were accepted.
//!
//! ```bash
//! senderlink-client --connect unix:/tmp/senderlink.sock --count 100 --size 1024
//! senderlink-client --connect vsock:3:1234 --address queue/telemetry --property region=eu
//! ```

mod target;

use std::time::Instant;

use clap::Parser;
use futures::future::join_all;
use log::{debug, info, warn};
use senderlink::{LinkOptions, Message, SenderLink};

use target::{ClientTarget, connect};

#[derive(Parser, Debug)]
#[command(name = "senderlink-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server to connect to: unix:<path>, tcp:<host:port> or vsock:<cid>:<port>
    #[arg(short, long, default_value = "unix:/tmp/senderlink.sock")]
    connect: ClientTarget,

    /// Target address of the sender link
    #[arg(short, long, default_value = "queue/telemetry")]
    address: String,

    /// Link name announced on attach
    #[arg(short, long)]
    name: Option<String>,

    /// Attach property, repeatable
    #[arg(short, long = "property", value_name = "KEY=VALUE", value_parser = parse_property)]
    properties: Vec<(String, String)>,

    /// Number of messages to send
    #[arg(long, default_value = "10")]
    count: usize,

    /// Payload size of each message in bytes
    #[arg(long, default_value = "64")]
    size: usize,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn link_options(&self) -> LinkOptions {
        let mut options = LinkOptions::new();
        if let Some(name) = &self.name {
            options = options.with_name(name.clone());
        }
        for (key, value) in &self.properties {
            options = options.with_property(key.clone(), value.clone());
        }
        options
    }
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let transport = connect(&args.connect).await?;
    let link = SenderLink::new(args.address.clone(), args.link_options(), transport);

    let mut errors = link.subscribe_errors();
    tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            warn!("Sender link error: {}", err);
        }
    });

    info!(
        "Sending {} message(s) of {} bytes to {}...",
        args.count, args.size, args.address
    );
    let start = Instant::now();
    let sends = (0..args.count).map(|i| {
        let message = Message::new(vec![0xAB; args.size]).with_message_id(format!("msg-{i}"));
        link.send(message)
    });
    let outcomes = join_all(sends).await;
    let elapsed = start.elapsed();

    let mut accepted = 0usize;
    for (i, outcome) in outcomes.iter().enumerate() {
        match outcome {
            Ok(enqueued) => {
                accepted += 1;
                debug!("msg-{} settled: {:?}", i, enqueued.delivery);
            }
            Err(err) => warn!("msg-{} failed: {}", i, err),
        }
    }
    let failed = args.count - accepted;

    info!("=== Send Complete ===");
    info!("Accepted: {}", accepted);
    info!("Failed: {}", failed);
    info!("Time: {:.2} seconds", elapsed.as_secs_f64());
    if elapsed.as_secs_f64() > 0.0 {
        info!(
            "Rate: {:.2} msg/s",
            args.count as f64 / elapsed.as_secs_f64()
        );
    }

    link.detach();
    info!("Link state: {}", link.state().await?);

    if failed > 0 {
        return Err(format!("{} of {} message(s) failed", failed, args.count).into());
    }
    Ok(())
}
