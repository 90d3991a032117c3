//! Demo sender link server.
//!
//! Accepts yamux connections and acknowledges every message arriving on
//! their sender links.
//!
//! ```bash
//! senderlink-server --listen unix:/tmp/senderlink.sock
//! senderlink-server --listen vsock:any:1234 --reject-every 10
//! ```

mod acceptor;
mod listener;

use std::sync::Arc;

use clap::Parser;
use log::info;

use acceptor::AckServer;
use listener::{LinkServer, ServerTarget};

#[derive(Parser, Debug)]
#[command(name = "senderlink-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Where to listen: unix:<path>, tcp:<host:port> or vsock:<cid|any>:<port>
    #[arg(short, long, default_value = "unix:/tmp/senderlink.sock")]
    listen: ServerTarget,

    /// Reject every Nth message (0 disables rejection)
    #[arg(long)]
    reject_every: Option<u64>,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("Starting senderlink-server on {}", args.listen);
    if let Some(n) = args.reject_every {
        info!("Rejecting every {} message(s)", n);
    }

    let acceptor = Arc::new(AckServer::new(args.reject_every));
    let server = LinkServer::new(args.listen, acceptor.clone());

    tokio::select! {
        served = server.run() => served?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    info!(
        "Received {} message(s), rejected {}",
        acceptor.received(),
        acceptor.rejected()
    );
    Ok(())
}
