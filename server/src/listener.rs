use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use futures::io::{AsyncRead, AsyncWrite};
use log::{info, warn};
use senderlink::yamux::{Acceptor, serve_connection};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_vsock::{VsockAddr, VsockListener};

/// Wildcard vsock CID, accepting connections addressed to any CID.
const VMADDR_CID_ANY: u32 = u32::MAX;

/// Where the server listens.
///
/// Written as `unix:<path>`, `tcp:<host:port>` or `vsock:<cid>:<port>`, where
/// the CID may be `any`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

impl FromStr for ServerTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <scheme>:<address>, got {s:?}"))?;

        match scheme {
            "unix" if !rest.is_empty() => Ok(ServerTarget::Unix(PathBuf::from(rest))),
            "tcp" => rest
                .parse()
                .map(ServerTarget::Tcp)
                .map_err(|err| format!("invalid TCP address {rest:?}: {err}")),
            "vsock" => {
                let (cid, port) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("expected vsock:<cid>:<port>, got {s:?}"))?;
                let cid = match cid {
                    "any" => VMADDR_CID_ANY,
                    cid => cid.parse().map_err(|_| format!("invalid vsock CID {cid:?}"))?,
                };
                Ok(ServerTarget::Vsock {
                    cid,
                    port: port.parse().map_err(|_| format!("invalid vsock port {port:?}"))?,
                })
            }
            _ => Err(format!("unsupported target {s:?}")),
        }
    }
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerTarget::Unix(path) => write!(f, "unix:{}", path.display()),
            ServerTarget::Tcp(addr) => write!(f, "tcp:{}", addr),
            ServerTarget::Vsock { cid, port } => write!(f, "vsock:{}:{}", cid, port),
        }
    }
}

/// Accepts connections on a target and serves sender links on each one.
pub struct LinkServer<A> {
    target: ServerTarget,
    acceptor: Arc<A>,
}

impl<A: Acceptor> LinkServer<A> {
    pub fn new(target: ServerTarget, acceptor: Arc<A>) -> Self {
        Self { target, acceptor }
    }

    /// Runs the accept loop. Only returns if the listener fails.
    pub async fn run(&self) -> io::Result<()> {
        match &self.target {
            ServerTarget::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                info!("Server listening on Unix Socket {:?}", path);
                loop {
                    let (stream, _) = listener.accept().await?;
                    info!("Accepted Unix connection");
                    self.spawn_connection(stream.compat(), "unix peer".to_owned());
                }
            }
            ServerTarget::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!("Server listening on TCP {}", addr);
                loop {
                    let (stream, peer) = listener.accept().await?;
                    stream.set_nodelay(true)?;
                    info!("Accepted TCP connection from {}", peer);
                    self.spawn_connection(stream.compat(), peer.to_string());
                }
            }
            ServerTarget::Vsock { cid, port } => {
                let listener = VsockListener::bind(VsockAddr::new(*cid, *port))?;
                info!("Server listening on Vsock CID:{} Port:{}", cid, port);
                loop {
                    let (stream, peer) = listener.accept().await?;
                    info!("Accepted Vsock connection from {:?}", peer);
                    self.spawn_connection(stream.compat(), format!("{:?}", peer));
                }
            }
        }
    }

    fn spawn_connection<S>(&self, socket: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let acceptor = self.acceptor.clone();
        tokio::spawn(async move {
            match serve_connection(socket, acceptor).await {
                Ok(()) => info!("Connection from {} closed", peer),
                Err(err) => warn!("Connection from {} failed: {}", peer, err),
            }
        });
    }
}
